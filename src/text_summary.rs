//! Text summary builder for CLI output.
//!
//! Formats human-readable lines describing a finished session.

use crate::model::SessionReport;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a finished session.
pub(crate) fn build_text_summary(report: &SessionReport) -> TextSummary {
    let mut lines = Vec::new();
    let cfg = &report.config;

    lines.push(format!(
        "Server: {} (pid {})",
        cfg.server_command, report.server_pid
    ));
    lines.push(format!(
        "Shots: {} fired, {} failed (seed {}, limit {}, cooldown {})",
        report.load.shots.len(),
        report.load.failed(),
        cfg.seed,
        cfg.random_limit,
        humantime::format_duration(cfg.cooldown)
    ));
    lines.push(format!(
        "Load phase: {:.2} s",
        report.load.elapsed.as_secs_f64()
    ));
    lines.push(format!("Capture: {}", report.capture_file.display()));
    lines.push(format!("Flamegraph: {}", report.output_file.display()));

    TextSummary { lines }
}
