use anyhow::{Context, Result};

use gatekeeper_core::record::ExecutionRecord;

use super::atomic::atomic_write;

/// Load an execution record written by [`save_record`].
pub fn load_record(path: &str) -> Result<ExecutionRecord> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("cannot read record {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("{path}: invalid record JSON"))
}

/// Persist a record as pretty JSON, atomically.
pub fn save_record(path: &str, record: &ExecutionRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record)?;
    atomic_write(path, json.as_bytes())
}
