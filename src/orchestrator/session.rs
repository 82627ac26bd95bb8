//! Session lifecycle: server, profiler, load, drain, stop, report.

use crate::engine::{run_load, Ammunition, Sequencer, ShotExecutor};
use crate::model::{
    InfoEvent, ProcessRole, SessionConfig, SessionEvent, SessionPhase, SessionReport,
};
use crate::orchestrator::toolchain::{self, ReportPipeline};
use crate::runner::{self, words, ManagedProcess, OutputSink};
use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio::sync::mpsc::UnboundedSender;

pub struct Session {
    cfg: SessionConfig,
}

impl Session {
    pub fn new(cfg: SessionConfig) -> Self {
        Self { cfg }
    }

    /// Run the whole session. Phases run strictly in order and a failing
    /// phase aborts everything after it. On abort, processes the session
    /// still holds are asked to terminate (announced as
    /// [`InfoEvent::CleanupAfterFailure`]) and the error names the phase.
    pub async fn run(self, event_tx: UnboundedSender<SessionEvent>) -> Result<SessionReport> {
        let mut run = SessionRun {
            cfg: &self.cfg,
            phase: SessionPhase::Idle,
            server: None,
            profiler: None,
            event_tx,
        };
        match run.drive().await {
            Ok(report) => Ok(report),
            Err(e) => {
                let phase = run.phase;
                run.cleanup().await;
                Err(e.context(format!("session aborted during {phase:?}")))
            }
        }
    }
}

struct SessionRun<'a> {
    cfg: &'a SessionConfig,
    phase: SessionPhase,
    server: Option<ManagedProcess>,
    profiler: Option<ManagedProcess>,
    event_tx: UnboundedSender<SessionEvent>,
}

impl SessionRun<'_> {
    fn advance(&mut self) {
        if let Some(next) = self.phase.next() {
            self.phase = next;
            let _ = self.event_tx.send(SessionEvent::PhaseStarted { phase: next });
        }
    }

    fn emit(&self, ev: SessionEvent) {
        let _ = self.event_tx.send(ev);
    }

    async fn drive(&mut self) -> Result<SessionReport> {
        let cfg = self.cfg;

        // Everything that can be rejected up front is, before any process starts.
        let pool = Ammunition::new(cfg.ammunition.clone())?;
        let mut sequencer = Sequencer::seeded(pool, cfg.seed, cfg.random_limit)?;
        let executor = ShotExecutor::new(&cfg.request_tool, cfg.cooldown)?;
        let profiler_cmd = words::split(&cfg.profiler)
            .with_context(|| format!("invalid profiler command `{}`", cfg.profiler))?;
        let pipeline = ReportPipeline::from_config(cfg);
        toolchain::ensure_flamegraph(cfg, &self.event_tx).await;

        self.advance();
        let server = runner::spawn(&cfg.server_command, OutputSink::Inherit)
            .with_context(|| format!("failed to start server `{}`", cfg.server_command))?;
        let server_pid = server.pid();
        self.server = Some(server);
        self.emit(SessionEvent::ProcessStarted {
            role: ProcessRole::Server,
            pid: server_pid,
        });

        self.advance();
        remove_stale_capture(&cfg.capture_file)?;
        let mut argv = profiler_cmd;
        argv.extend([
            "record".to_string(),
            "-o".to_string(),
            cfg.capture_file.to_string_lossy().into_owned(),
            "-p".to_string(),
            server_pid.to_string(),
        ]);
        let profiler = runner::spawn_argv(&argv, OutputSink::Inherit)
            .with_context(|| format!("failed to attach profiler to pid {server_pid}"))?;
        let profiler_pid = profiler.pid();
        self.profiler = Some(profiler);
        self.emit(SessionEvent::ProcessStarted {
            role: ProcessRole::Profiler,
            pid: profiler_pid,
        });

        self.advance();
        self.emit(SessionEvent::Info(InfoEvent::Message(format!(
            "Firing {} shots, {} apart",
            cfg.shot_count,
            humantime::format_duration(executor.cooldown())
        ))));
        let load = run_load(&mut sequencer, &executor, cfg.shot_count, &self.event_tx).await?;

        self.advance();
        let profiler = self.profiler.take().context("profiler handle already released")?;
        let status = profiler.stop(true).await?;
        match status {
            Some(s) if s.success() => {}
            Some(s) => bail!("profiler exited with {s}; capture is unusable"),
            None => bail!("profiler exit was not observed"),
        }
        if !cfg.capture_file.exists() {
            bail!(
                "profiler exited without writing {}",
                cfg.capture_file.display()
            );
        }

        self.advance();
        if let Some(server) = self.server.take() {
            server.stop(false).await?;
        }

        self.advance();
        pipeline.render().await?;

        self.advance();
        Ok(SessionReport {
            timestamp_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            config: cfg.clone(),
            server_pid,
            profiler_pid,
            load,
            capture_file: cfg.capture_file.clone(),
            output_file: cfg.output_file.clone(),
        })
    }

    /// Non-blocking stop of whatever is still held, profiler before server.
    async fn cleanup(&mut self) {
        let held = [
            (ProcessRole::Profiler, self.profiler.take()),
            (ProcessRole::Server, self.server.take()),
        ];
        for (role, proc) in held {
            let Some(proc) = proc else { continue };
            self.emit(SessionEvent::Info(InfoEvent::CleanupAfterFailure {
                role,
                pid: proc.pid(),
            }));
            let program = proc.program().to_string();
            if let Err(e) = proc.stop(false).await {
                self.emit(SessionEvent::Info(InfoEvent::Message(format!(
                    "Could not terminate {role:?} `{program}`: {e:#}"
                ))));
            }
        }
    }
}

/// A capture left by an earlier run must not pass for this run's output.
fn remove_stale_capture(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e)
            .with_context(|| format!("failed to remove stale capture {}", path.display())),
    }
}
