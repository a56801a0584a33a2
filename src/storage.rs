use crate::model::GeolocationResult;
use anyhow::{Context, Result};
use std::path::Path;

pub fn export_json(path: &Path, result: &GeolocationResult) -> Result<()> {
    // Create parent directories if they don't exist
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("create export directory")?;
    }
    let data = serde_json::to_vec_pretty(result)?;
    std::fs::write(path, data).context("write export json")?;
    Ok(())
}

/// One row per candidate of the final phase.
pub fn export_csv(path: &Path, result: &GeolocationResult) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("create export directory")?;
    }
    std::fs::write(path, render_csv(result)).context("write export csv")?;
    Ok(())
}

fn render_csv(result: &GeolocationResult) -> String {
    let mut out = String::new();
    out.push_str(
        "timestamp_utc,target,phase,rank,key,label,continent,country,state,city,min_rtt_ms,avg_rtt_ms,samples,anycast\n",
    );
    for (i, c) in result.candidates.iter().enumerate() {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{:.3},{:.3},{},{}\n",
            csv_escape(&result.timestamp_utc),
            csv_escape(&result.target),
            result.final_phase,
            i + 1,
            csv_escape(&c.key),
            csv_escape(&c.label(result.final_phase)),
            csv_escape(&c.continent),
            csv_escape(&c.country),
            csv_escape(c.state.as_deref().unwrap_or("")),
            csv_escape(c.city.as_deref().unwrap_or("")),
            c.min_rtt_ms,
            c.avg_rtt_ms,
            c.samples,
            result.anycast,
        ));
    }
    out
}

/// Escape a string for CSV format (handles commas, quotes, and newlines).
fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
