use crate::model::{self, SessionConfig, SessionEvent};
use crate::orchestrator::{process_session_completion, Session};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
#[derive(Debug, PartialEq, Eq)]
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "perf-shooter",
    version,
    about = "Fire a reproducible request sequence at a server under perf and render a flamegraph"
)]
pub struct Cli {
    /// Command line that starts the server under test, e.g. "myserver --port 8080"
    pub server: String,

    /// Number of shots to fire
    #[arg(long, default_value_t = model::DEFAULT_SHOT_COUNT)]
    pub shots: usize,

    /// Pause after each shot before waiting for the request tool to exit
    #[arg(long, default_value_t = humantime::Duration::from(model::DEFAULT_COOLDOWN))]
    pub cooldown: humantime::Duration,

    /// Seed for the shot order
    #[arg(long, default_value_t = model::DEFAULT_SEED)]
    pub seed: u64,

    /// Upper bound (exclusive) of each raw draw before it is reduced modulo the pool size
    #[arg(long, default_value_t = model::DEFAULT_RANDOM_LIMIT, value_parser = clap::value_parser!(u32).range(1..))]
    pub random_limit: u32,

    /// Request target; repeat to build the pool (defaults to the two map endpoints on localhost:8080)
    #[arg(long = "ammo", value_name = "TARGET")]
    pub ammo: Vec<String>,

    /// Command used to fire one request; the target is appended as its last argument
    #[arg(long, default_value = model::DEFAULT_REQUEST_TOOL)]
    pub request_tool: String,

    /// Profiler command; invoked as `<profiler> record` and `<profiler> script`
    #[arg(long, default_value = model::DEFAULT_PROFILER)]
    pub profiler: String,

    /// Where the profiler writes its capture
    #[arg(long, default_value = model::DEFAULT_CAPTURE_FILE)]
    pub capture_file: PathBuf,

    /// Where the rendered flamegraph is written
    #[arg(long, default_value = model::DEFAULT_OUTPUT_FILE)]
    pub output: PathBuf,

    /// FlameGraph checkout; cloned when missing
    #[arg(long, default_value = model::DEFAULT_FLAMEGRAPH_DIR)]
    pub flamegraph_dir: PathBuf,

    /// Repository cloned into --flamegraph-dir when it does not exist
    #[arg(long, default_value = model::DEFAULT_FLAMEGRAPH_REPO)]
    pub flamegraph_repo: String,

    /// Export the session record as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Run silently: suppress all output except errors
    #[arg(long)]
    pub silent: bool,
}

/// Build a `SessionConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> SessionConfig {
    let mut cfg = SessionConfig::with_defaults(args.server.clone());
    if !args.ammo.is_empty() {
        cfg.ammunition = args.ammo.clone();
    }
    cfg.shot_count = args.shots;
    cfg.cooldown = args.cooldown.into();
    cfg.seed = args.seed;
    cfg.random_limit = args.random_limit;
    cfg.request_tool = args.request_tool.clone();
    cfg.profiler = args.profiler.clone();
    cfg.capture_file = args.capture_file.clone();
    cfg.output_file = args.output.clone();
    cfg.flamegraph_dir = args.flamegraph_dir.clone();
    cfg.flamegraph_repo = args.flamegraph_repo.clone();
    cfg
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<SessionEvent>();

    let session = Session::new(cfg);
    let handle = tokio::spawn(async move { session.run(evt_tx).await });

    while let Some(ev) = evt_rx.recv().await {
        if args.silent {
            continue;
        }
        let _ = out_tx.send(render_event(&ev));
    }

    let outcome = finish_session(&args, &out_tx, handle).await;
    drop(out_tx);
    let _ = out_handle.await;
    outcome
}

async fn finish_session(
    args: &Cli,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
    handle: tokio::task::JoinHandle<Result<model::SessionReport>>,
) -> Result<()> {
    let report = handle.await.context("session task failed")??;
    let processed = process_session_completion(args.export_json.as_deref(), &report)?;
    if args.silent {
        return Ok(());
    }

    let summary = crate::text_summary::build_text_summary(&report);
    for line in summary.lines {
        let _ = out_tx.send(OutputLine::Stderr(line));
    }
    for msg in processed.export_messages {
        let _ = out_tx.send(OutputLine::Stderr(msg));
    }
    let _ = out_tx.send(OutputLine::Stdout("Job done".to_string()));
    Ok(())
}

/// Progress goes to stderr; completion markers go to stdout.
fn render_event(ev: &SessionEvent) -> OutputLine {
    match ev {
        SessionEvent::PhaseStarted { phase } => OutputLine::Stderr(format!("== {phase:?} ==")),
        SessionEvent::ProcessStarted { role, pid } => {
            OutputLine::Stderr(format!("{role:?} started (pid {pid})"))
        }
        SessionEvent::ShotFired {
            number,
            target,
            exit_code,
            ..
        } => {
            let status = match exit_code {
                Some(0) => "ok".to_string(),
                Some(code) => format!("exit {code}"),
                None => "killed".to_string(),
            };
            OutputLine::Stderr(format!("Shot {number}: {target} ({status})"))
        }
        SessionEvent::LoadCompleted { .. } => OutputLine::Stdout("Shooting complete".to_string()),
        SessionEvent::Info(info) => OutputLine::Stderr(info.to_message()),
    }
}
