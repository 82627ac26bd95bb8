//! FlameGraph toolchain: bootstrap and the final rendering pipeline.

use crate::model::{InfoEvent, SessionConfig, SessionEvent};
use crate::runner::{self, words, OutputSink};
use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;

/// Clone the FlameGraph repository unless `cfg.flamegraph_dir` already exists.
///
/// Never fails the session: a missing toolchain surfaces later, when the
/// report pipeline cannot find its scripts.
pub(crate) async fn ensure_flamegraph(cfg: &SessionConfig, event_tx: &UnboundedSender<SessionEvent>) {
    let dir = cfg.flamegraph_dir.clone();
    if dir.exists() {
        let _ = event_tx.send(SessionEvent::Info(InfoEvent::ToolchainPresent { dir }));
        return;
    }

    let argv = vec![
        "git".to_string(),
        "clone".to_string(),
        cfg.flamegraph_repo.clone(),
        dir.to_string_lossy().into_owned(),
    ];
    let outcome = match runner::spawn_argv(&argv, OutputSink::Inherit) {
        Ok(mut git) => match git.wait_for_exit().await {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(format!("git exited with {status}")),
            Err(e) => Err(format!("{e:#}")),
        },
        Err(e) => Err(format!("{e:#}")),
    };
    let info = match outcome {
        Ok(()) => InfoEvent::ToolchainCloned { dir },
        Err(reason) => InfoEvent::ToolchainCloneFailed { dir, reason },
    };
    let _ = event_tx.send(SessionEvent::Info(info));
}

/// `perf script | stackcollapse-perf.pl | flamegraph.pl > output`, run through `sh`.
#[derive(Debug, Clone)]
pub(crate) struct ReportPipeline {
    profiler: String,
    capture_file: PathBuf,
    output_file: PathBuf,
    flamegraph_dir: PathBuf,
}

impl ReportPipeline {
    pub(crate) fn from_config(cfg: &SessionConfig) -> Self {
        Self {
            profiler: cfg.profiler.clone(),
            capture_file: cfg.capture_file.clone(),
            output_file: cfg.output_file.clone(),
            flamegraph_dir: cfg.flamegraph_dir.clone(),
        }
    }

    /// The profiler setting is already a command line and is embedded verbatim;
    /// paths are quoted.
    pub(crate) fn command(&self) -> String {
        let collapse = self.flamegraph_dir.join("stackcollapse-perf.pl");
        let render = self.flamegraph_dir.join("flamegraph.pl");
        format!(
            "{} script -i {} | {} | {} > {}",
            self.profiler,
            quote_path(&self.capture_file),
            quote_path(&collapse),
            quote_path(&render),
            quote_path(&self.output_file),
        )
    }

    pub(crate) async fn render(&self) -> Result<()> {
        let command = self.command();
        let status = runner::run_shell(&command, OutputSink::Inherit).await?;
        if !status.success() {
            bail!("flamegraph pipeline exited with {status}: {command}");
        }
        Ok(())
    }
}

fn quote_path(path: &Path) -> String {
    words::quote(&path.to_string_lossy())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn drain(mut rx: mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn default_pipeline_command() {
        let cfg = SessionConfig::with_defaults("server");
        let cmd = ReportPipeline::from_config(&cfg).command();
        assert_eq!(
            cmd,
            "perf script -i perf.data | FlameGraph/stackcollapse-perf.pl | FlameGraph/flamegraph.pl > graph.svg"
        );
    }

    #[test]
    fn pipeline_quotes_paths_with_spaces() {
        let mut cfg = SessionConfig::with_defaults("server");
        cfg.capture_file = PathBuf::from("my run/perf.data");
        cfg.output_file = PathBuf::from("out dir/graph.svg");
        let cmd = ReportPipeline::from_config(&cfg).command();
        assert!(cmd.contains("-i 'my run/perf.data' |"));
        assert!(cmd.ends_with("> 'out dir/graph.svg'"));
    }

    #[tokio::test]
    async fn existing_toolchain_is_not_cloned() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SessionConfig::with_defaults("server");
        cfg.flamegraph_dir = dir.path().to_path_buf();
        let (tx, rx) = mpsc::unbounded_channel();

        ensure_flamegraph(&cfg, &tx).await;
        let events = drain(rx);
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Info(InfoEvent::ToolchainPresent { .. })]
        ));
    }

    #[tokio::test]
    async fn failed_clone_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SessionConfig::with_defaults("server");
        cfg.flamegraph_dir = dir.path().join("FlameGraph");
        cfg.flamegraph_repo = dir.path().join("no-such-repo").to_string_lossy().into_owned();
        let (tx, rx) = mpsc::unbounded_channel();

        ensure_flamegraph(&cfg, &tx).await;
        let events = drain(rx);
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Info(InfoEvent::ToolchainCloneFailed { .. })]
        ));
    }

    #[tokio::test]
    async fn failing_pipeline_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SessionConfig::with_defaults("server");
        cfg.profiler = "true".to_string();
        cfg.flamegraph_dir = dir.path().to_path_buf();
        cfg.capture_file = dir.path().join("perf.data");
        cfg.output_file = dir.path().join("graph.svg");

        let err = ReportPipeline::from_config(&cfg).render().await.unwrap_err();
        assert!(err.to_string().contains("flamegraph pipeline exited"));
    }
}
