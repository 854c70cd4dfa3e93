//! Segmentation ingest: scan a source directory, extract text, segment,
//! and write the role's chunk stream.

use anyhow::{bail, Result};
use std::fs;

use crate::config::Config;
use crate::extract;
use crate::models::{SourceDoc, SourceRole};
use crate::segment::Segmenter;
use crate::sources;
use crate::store;

pub fn run_segment(
    config: &Config,
    role: SourceRole,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let role_name = match role {
        SourceRole::Reference => "reference",
        SourceRole::Guideline => "guidelines",
    };

    let Some(dir_config) = config.sources.for_role(role) else {
        bail!("No [sources.{}] section configured.", role_name);
    };

    let mut docs = sources::scan_sources(dir_config)?;
    if let Some(lim) = limit {
        docs.truncate(lim);
    }

    if dry_run {
        println!("segment {} (dry-run)", role_name);
    } else {
        println!("segment {}", role_name);
    }
    println!("  documents found: {}", docs.len());

    let segmenter = Segmenter::new(&config.segmenter)?;
    let mut all_chunks = Vec::new();
    let mut skipped_docs = 0usize;

    for doc in &docs {
        let text = match read_document(doc) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("Warning: skipping {}: {}", doc.rel_path, e);
                skipped_docs += 1;
                continue;
            }
        };
        let chunks = segmenter.segment(&text, &doc.name, role);
        println!("  {}: {} chunks", doc.rel_path, chunks.len());
        all_chunks.extend(chunks);
    }

    println!("  chunks: {}", all_chunks.len());
    if skipped_docs > 0 {
        println!("  documents skipped: {}", skipped_docs);
    }

    if dry_run {
        return Ok(());
    }

    let out_path = config.storage.chunks_path(role);
    store::write_chunk_stream(&out_path, &all_chunks)?;
    println!("  wrote: {}", out_path.display());
    println!("ok");

    Ok(())
}

fn read_document(doc: &SourceDoc) -> Result<String> {
    let bytes = fs::read(&doc.path)?;
    Ok(extract::extract_text(&bytes, &doc.content_type)?)
}
