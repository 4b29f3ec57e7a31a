//! Persistent process state.
//!
//! Saves and loads the fund sizing record to/from a JSON file. This is
//! deliberately *not* in the ledger database: a ledger reset must not
//! silently erase rescale-trigger memory, and clearing sizing state must
//! not touch financial history.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::types::SizingRecord;

/// Default sizing-record file path.
const DEFAULT_SIZING_FILE: &str = "sizing_state.json";

/// Save the sizing record (written on fund open/rescale).
pub fn save_sizing(record: &SizingRecord, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_SIZING_FILE);
    let json = serde_json::to_string_pretty(record)
        .context("Failed to serialise sizing record")?;

    std::fs::write(path, &json)
        .context(format!("Failed to write sizing record to {path}"))?;

    debug!(path, risk = %record.risk_parameter, "Sizing record saved");
    Ok(())
}

/// Load the sizing record, read once at process start.
/// Returns None if the file doesn't exist (no fund was sized).
pub fn load_sizing(path: Option<&str>) -> Result<Option<SizingRecord>> {
    let path = path.unwrap_or(DEFAULT_SIZING_FILE);

    if !Path::new(path).exists() {
        info!(path, "No sizing record found");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read sizing record from {path}"))?;

    let record: SizingRecord = serde_json::from_str(&json)
        .context(format!("Failed to parse sizing record from {path}"))?;

    info!(
        path,
        risk = %record.risk_parameter,
        cycle = record.cycle_id,
        "Sizing record restored"
    );

    Ok(Some(record))
}

/// Delete the sizing record (cleared on fund closure).
pub fn clear_sizing(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_SIZING_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .context(format!("Failed to delete sizing record {path}"))?;
        debug!(path, "Sizing record cleared");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
