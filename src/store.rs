//! Flat-file persistence helpers.
//!
//! The pipeline's collaborators read these artifacts directly, so the
//! formats are part of the external contract: chunk streams are one JSON
//! object per line (`id`, `text`, `metadata`), the trend report is a
//! single pretty-printed JSON document.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::models::{Chunk, TrendReport};

/// Read a JSONL chunk stream. Blank lines are tolerated.
pub fn read_chunk_stream(path: &Path) -> Result<Vec<Chunk>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read chunk stream: {}", path.display()))?;

    let mut chunks = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let chunk: Chunk = serde_json::from_str(line).with_context(|| {
            format!("Malformed chunk at {}:{}", path.display(), line_no + 1)
        })?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// Write a JSONL chunk stream, one chunk per line.
pub fn write_chunk_stream(path: &Path, chunks: &[Chunk]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = String::new();
    for chunk in chunks {
        out.push_str(&serde_json::to_string(chunk)?);
        out.push('\n');
    }
    fs::write(path, out)
        .with_context(|| format!("Failed to write chunk stream: {}", path.display()))?;
    Ok(())
}

/// Write the trend report as pretty-printed JSON.
pub fn write_trend_report(path: &Path, report: &TrendReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(report)?)
        .with_context(|| format!("Failed to write trend report: {}", path.display()))?;
    Ok(())
}
