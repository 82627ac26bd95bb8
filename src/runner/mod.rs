//! Supervised external processes.
//!
//! Everything the harness drives (server, profiler, request tool, report
//! pipeline) goes through [`spawn`] and the [`ManagedProcess`] handle it returns.

pub mod words;

use anyhow::{bail, Context, Result};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};

/// Where a spawned process writes its stdout. Stderr is always discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSink {
    Discard,
    Inherit,
}

impl OutputSink {
    fn stdio(self) -> Stdio {
        match self {
            OutputSink::Discard => Stdio::null(),
            OutputSink::Inherit => Stdio::inherit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited(ExitStatus),
}

/// Owned handle to one spawned process.
///
/// The child is only reaped through [`ManagedProcess::try_poll`] or
/// [`ManagedProcess::wait_for_exit`], so while the state is `Running` the pid
/// cannot have been recycled and signalling it is safe.
#[derive(Debug)]
pub struct ManagedProcess {
    program: String,
    pid: u32,
    child: Child,
    state: ProcessState,
}

/// Split `command_line` into words and start it without a shell.
pub fn spawn(command_line: &str, sink: OutputSink) -> Result<ManagedProcess> {
    let argv = words::split(command_line)
        .with_context(|| format!("invalid command line `{command_line}`"))?;
    spawn_argv(&argv, sink)
}

/// Start `command` through `sh -c`. Only for commands that need pipes or redirection.
pub fn spawn_shell(command: &str, sink: OutputSink) -> Result<ManagedProcess> {
    spawn_argv(&["sh".to_string(), "-c".to_string(), command.to_string()], sink)
}

/// Run `command` through `sh -c` and block until it exits.
pub async fn run_shell(command: &str, sink: OutputSink) -> Result<ExitStatus> {
    spawn_shell(command, sink)?.wait_for_exit().await
}

pub fn spawn_argv(argv: &[String], sink: OutputSink) -> Result<ManagedProcess> {
    let Some((program, args)) = argv.split_first() else {
        bail!("empty command line");
    };
    let child = Command::new(program)
        .args(args)
        .stdout(sink.stdio())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn `{program}`"))?;
    let pid = child
        .id()
        .with_context(|| format!("`{program}` has no pid right after spawn"))?;
    Ok(ManagedProcess {
        program: program.clone(),
        pid,
        child,
        state: ProcessState::Running,
    })
}

impl ManagedProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Last observed state; call [`ManagedProcess::try_poll`] to refresh it.
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Check for exit without blocking.
    pub fn try_poll(&mut self) -> Result<ProcessState> {
        if self.state == ProcessState::Running {
            if let Some(status) = self
                .child
                .try_wait()
                .with_context(|| format!("failed to poll `{}` ({})", self.program, self.pid))?
            {
                self.state = ProcessState::Exited(status);
            }
        }
        Ok(self.state)
    }

    pub async fn wait_for_exit(&mut self) -> Result<ExitStatus> {
        if let ProcessState::Exited(status) = self.state {
            return Ok(status);
        }
        let status = self
            .child
            .wait()
            .await
            .with_context(|| format!("failed to wait for `{}` ({})", self.program, self.pid))?;
        self.state = ProcessState::Exited(status);
        Ok(status)
    }

    /// Ask the process to exit (SIGTERM). A no-op once the exit has been observed.
    pub fn terminate(&mut self) -> Result<()> {
        if let ProcessState::Exited(_) = self.state {
            return Ok(());
        }
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            match signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(e) => Err(e).with_context(|| {
                    format!("failed to send SIGTERM to `{}` ({})", self.program, self.pid)
                }),
            }
        }
        #[cfg(not(unix))]
        {
            self.child
                .start_kill()
                .with_context(|| format!("failed to terminate `{}` ({})", self.program, self.pid))
        }
    }

    /// Stop the process and discard the handle.
    ///
    /// With `wait`, blocks until the exit is observed before signalling, so
    /// anything the process writes on its way out (a profiler flushing its
    /// capture) is complete when this returns. Without `wait`, the signal is
    /// sent immediately and the exit is not awaited.
    pub async fn stop(mut self, wait: bool) -> Result<Option<ExitStatus>> {
        if wait && self.try_poll()? == ProcessState::Running {
            self.wait_for_exit().await?;
        }
        self.terminate()?;
        Ok(match self.state() {
            ProcessState::Exited(status) => Some(status),
            ProcessState::Running => None,
        })
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    /// True while `pid` exists and is not a zombie.
    pub(crate) fn is_alive(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub(crate) async fn wait_until_gone(pid: u32) -> bool {
        for _ in 0..100 {
            if !is_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn spawn_missing_binary_fails() {
        let err = spawn("definitely-not-a-binary-7f3a --flag", OutputSink::Discard).unwrap_err();
        assert!(format!("{err:#}").contains("definitely-not-a-binary-7f3a"));
    }

    #[tokio::test]
    async fn spawn_empty_command_fails() {
        assert!(spawn("   ", OutputSink::Discard).is_err());
        assert!(spawn("server 'unterminated", OutputSink::Discard).is_err());
    }

    #[tokio::test]
    async fn spawn_returns_without_blocking() {
        let start = Instant::now();
        let proc = spawn("sleep 5", OutputSink::Discard).unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(proc.state(), ProcessState::Running);
        assert_eq!(proc.program(), "sleep");
        assert!(proc.pid() > 0);
        proc.stop(false).await.unwrap();
    }

    #[tokio::test]
    async fn quoted_arguments_reach_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("args");
        let line = format!(
            "sh -c 'printf \"%s|\" \"$@\" > {}' sh 'a b' \"c d\" e",
            words::quote(out.to_str().unwrap())
        );
        spawn(&line, OutputSink::Discard)
            .unwrap()
            .stop(true)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "a b|c d|e|");
    }

    #[tokio::test]
    async fn stop_with_wait_blocks_until_exit() {
        let start = Instant::now();
        let proc = spawn("sleep 0.3", OutputSink::Discard).unwrap();
        let status = proc.stop(true).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(status.expect("exit observed").success());
    }

    #[tokio::test]
    async fn stop_with_wait_on_already_exited_process() {
        let mut proc = spawn("true", OutputSink::Discard).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let state = proc.try_poll().unwrap();
        assert!(matches!(state, ProcessState::Exited(s) if s.success()));
        let status = proc.stop(true).await.unwrap();
        assert!(status.unwrap().success());
    }

    #[tokio::test]
    async fn stop_without_wait_returns_promptly_and_terminates() {
        let proc = spawn("sleep 30", OutputSink::Discard).unwrap();
        let pid = proc.pid();
        let start = Instant::now();
        let status = proc.stop(false).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(status.is_none());
        assert!(wait_until_gone(pid).await, "pid {pid} still running");
    }

    #[tokio::test]
    async fn terminate_is_idempotent_after_exit() {
        let mut proc = spawn("true", OutputSink::Discard).unwrap();
        proc.wait_for_exit().await.unwrap();
        proc.terminate().unwrap();
        proc.terminate().unwrap();
    }

    #[tokio::test]
    async fn run_shell_honours_pipes_and_reports_status() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("piped");
        let cmd = format!("printf 'a\\nb\\n' | wc -l > {}", words::quote(out.to_str().unwrap()));
        let status = run_shell(&cmd, OutputSink::Discard).await.unwrap();
        assert!(status.success());
        assert_eq!(std::fs::read_to_string(out).unwrap().trim(), "2");

        let status = run_shell("exit 3", OutputSink::Discard).await.unwrap();
        assert_eq!(status.code(), Some(3));
    }
}
