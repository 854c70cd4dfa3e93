//! Brute-force cosine similarity search over the flat index.
//!
//! No indexing structure beyond the parallel arrays — every query scans
//! all stored vectors, O(n·d) per query. That is deliberate: at the
//! corpus scale this targets (tens of thousands of chunks) a flat scan is
//! fast enough and has none of the staleness or recall problems of an
//! approximate structure.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::index::EmbeddingIndex;

/// One ranked match from a similarity query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub score: f32,
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Return the top `k` stored chunks by cosine similarity to `query`,
/// highest score first.
///
/// A zero-norm query is defined to match nothing and returns an empty
/// sequence. Ties keep insertion order (the sort is stable).
pub fn search(index: &EmbeddingIndex, query: &[f32], k: usize) -> Vec<SearchHit> {
    if k == 0 || index.is_empty() {
        return Vec::new();
    }

    let query_norm: f32 = query.iter().map(|x| x * x).sum::<f32>().sqrt();
    if query_norm < f32::EPSILON {
        return Vec::new();
    }

    let mut scored: Vec<SearchHit> = index
        .ids()
        .iter()
        .zip(index.vectors())
        .map(|(id, vector)| SearchHit {
            chunk_id: id.clone(),
            score: cosine_similarity(query, vector),
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(k);
    scored
}

/// Embed a query string and print its nearest baseline chunks.
pub async fn run_search(config: &Config, query: &str, k: usize) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let data_dir = &config.storage.data_dir;
    if !EmbeddingIndex::present(data_dir) {
        bail!(
            "No index under {}. Run `drift index build` first.",
            data_dir.display()
        );
    }
    let index = EmbeddingIndex::load(data_dir)?;

    let embedder = create_embedder(&config.embedding)?;
    let query_vec = embedder.embed_one(query).await?;

    let hits = search(&index, &query_vec, k);
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for hit in &hits {
        match index.chunk(&hit.chunk_id) {
            Some(chunk) => {
                println!("score: {:.4}", hit.score);
                println!("  id: {}", chunk.id);
                println!("  topic: {}", chunk.metadata.topic);
                println!("  source: {}", chunk.metadata.source);
            }
            None => println!("score: {:.4}  id: {}", hit.score, hit.chunk_id),
        }
    }

    Ok(())
}
