//! JSON detection report

use super::writer::atomic_write;
use crate::error::{IoResultExt, Result};
use crate::system::DetectionReport;
use std::path::Path;
use tracing::info;

/// Write a detection report as pretty JSON, atomically
pub fn write_report(report: &DetectionReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    atomic_write(path, json.as_bytes())?;
    info!(path = %path.display(), degraded = report.degraded.len(), "detection report written");
    Ok(())
}

/// Load a detection report from JSON
pub fn load_report(path: &Path) -> Result<DetectionReport> {
    let content = std::fs::read_to_string(path).with_path(path)?;
    Ok(serde_json::from_str(&content)?)
}
