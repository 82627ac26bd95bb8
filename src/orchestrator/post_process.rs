//! Post-session processing utilities.
//!
//! Handles exports after a session completes.

use crate::model::SessionReport;
use anyhow::{Context, Result};
use std::path::Path;

/// Result of post-session processing, ready for presentation layers.
pub(crate) struct ProcessedSession {
    pub export_messages: Vec<String>,
}

/// Process a completed session: write the optional JSON export.
pub(crate) fn process_session_completion(
    export_json: Option<&Path>,
    report: &SessionReport,
) -> Result<ProcessedSession> {
    let mut export_messages = Vec::new();
    if let Some(path) = export_json {
        export_report_json(path, report)?;
        export_messages.push(format!("Exported JSON: {}", path.display()));
    }
    Ok(ProcessedSession { export_messages })
}

pub(crate) fn export_report_json(path: &Path, report: &SessionReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create export directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report).context("serialize session report")?;
    std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
