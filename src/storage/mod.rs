//! Reporting sink.
//!
//! Writes the latest cycle report to a JSON snapshot so an external
//! presentation layer can pick it up. Each save replaces the previous
//! snapshot; the file is written to a temporary sibling first and renamed
//! into place, so readers never see a half-written report.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::types::CycleReport;

/// Default snapshot file path.
pub const DEFAULT_SNAPSHOT_FILE: &str = "paddock_snapshot.json";

/// Save a cycle report as pretty-printed JSON.
pub fn save_report(report: &CycleReport, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_SNAPSHOT_FILE);
    let json = serde_json::to_string_pretty(report)
        .context("Failed to serialise cycle report")?;

    let tmp = format!("{path}.tmp");
    std::fs::write(&tmp, &json)
        .with_context(|| format!("Failed to write snapshot to {tmp}"))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move snapshot into place at {path}"))?;

    debug!(path, cycle = %report.cycle_id, races = report.races.len(), "Snapshot saved");
    Ok(())
}

/// Load the last saved report. Returns `None` if no snapshot exists.
pub fn load_report(path: Option<&str>) -> Result<Option<CycleReport>> {
    let path = path.unwrap_or(DEFAULT_SNAPSHOT_FILE);

    if !Path::new(path).exists() {
        info!(path, "No snapshot found");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot from {path}"))?;
    let report: CycleReport = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse snapshot from {path}"))?;

    info!(
        path,
        cycle = %report.cycle_id,
        finished_at = %report.finished_at,
        races = report.races.len(),
        "Snapshot loaded"
    );
    Ok(Some(report))
}

/// Delete the snapshot file, if any.
pub fn delete_report(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_SNAPSHOT_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to delete snapshot {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
