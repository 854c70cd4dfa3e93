//! The flat embedding index.
//!
//! Parallel id/vector arrays plus an id → chunk map for text recovery.
//! Invariants, enforced at every mutation and on load:
//!
//! - `ids.len() == vectors.len()`
//! - ids are unique
//! - every stored vector has the index's dimension (fixed by the first
//!   vector stored)
//!
//! A violation means the similarity math can no longer be trusted, so it
//! is always a hard error rather than a warning.
//!
//! Persistence is three JSON files under the data directory:
//! `embeddings.json` (parallel arrays), `chunk_mapping.json` (full chunks
//! in insertion order), and `index_metadata.json` (counts, model,
//! dimension, creation timestamp).

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::models::{Chunk, IndexMetadata, SourceRole};
use crate::store;

pub const EMBEDDINGS_FILE: &str = "embeddings.json";
pub const MAPPING_FILE: &str = "chunk_mapping.json";
pub const METADATA_FILE: &str = "index_metadata.json";

/// On-disk shape of `embeddings.json`.
#[derive(Serialize, Deserialize)]
struct EmbeddingsFile {
    ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
}

/// In-memory index over a chunk corpus.
pub struct EmbeddingIndex {
    model: String,
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    chunks: HashMap<String, Chunk>,
    dims: Option<usize>,
}

impl EmbeddingIndex {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            ids: Vec::new(),
            vectors: Vec::new(),
            chunks: HashMap::new(),
            dims: None,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Vector dimension, `None` until the first vector is stored.
    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn contains(&self, id: &str) -> bool {
        self.chunks.contains_key(id)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    /// Recover the full chunk for a stored id.
    pub fn chunk(&self, id: &str) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    /// Append one chunk + vector pair, enforcing the index invariants.
    pub fn push(&mut self, chunk: Chunk, vector: Vec<f32>) -> Result<()> {
        if self.chunks.contains_key(&chunk.id) {
            bail!("duplicate chunk id in index: {}", chunk.id);
        }
        match self.dims {
            Some(d) if d != vector.len() => bail!(
                "embedding dimension mismatch: index has {}, got {} for chunk {}",
                d,
                vector.len(),
                chunk.id
            ),
            None => {
                if vector.is_empty() {
                    bail!("refusing to store an empty embedding vector");
                }
                self.dims = Some(vector.len());
            }
            _ => {}
        }

        self.ids.push(chunk.id.clone());
        self.vectors.push(vector);
        self.chunks.insert(chunk.id.clone(), chunk);
        Ok(())
    }

    /// Whether all three index files are present under `dir`.
    pub fn present(dir: &Path) -> bool {
        dir.join(EMBEDDINGS_FILE).exists()
            && dir.join(MAPPING_FILE).exists()
            && dir.join(METADATA_FILE).exists()
    }

    /// Load a persisted index, re-checking every invariant. Corrupt
    /// files are a hard error, never silently repaired.
    pub fn load(dir: &Path) -> Result<Self> {
        let read = |name: &str| -> Result<String> {
            fs::read_to_string(dir.join(name))
                .with_context(|| format!("Failed to read {}", dir.join(name).display()))
        };

        let embeddings: EmbeddingsFile = serde_json::from_str(&read(EMBEDDINGS_FILE)?)
            .with_context(|| format!("Malformed {}", EMBEDDINGS_FILE))?;
        let mapping: Vec<Chunk> = serde_json::from_str(&read(MAPPING_FILE)?)
            .with_context(|| format!("Malformed {}", MAPPING_FILE))?;
        let metadata: IndexMetadata = serde_json::from_str(&read(METADATA_FILE)?)
            .with_context(|| format!("Malformed {}", METADATA_FILE))?;

        if embeddings.ids.len() != embeddings.embeddings.len() {
            bail!(
                "corrupt index: {} ids but {} vectors",
                embeddings.ids.len(),
                embeddings.embeddings.len()
            );
        }

        let chunk_map: HashMap<String, Chunk> =
            mapping.into_iter().map(|c| (c.id.clone(), c)).collect();

        let mut index = Self::new(&metadata.embedding_model);
        for (id, vector) in embeddings.ids.iter().zip(embeddings.embeddings) {
            let chunk = chunk_map
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow!("corrupt index: id {} has no chunk mapping", id))?;
            index.push(chunk, vector)?;
        }

        Ok(index)
    }

    /// Persist the index. Always writes all three files, even when the
    /// index is partial after batch failures, so a rerun can be scoped
    /// to the remainder.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let embeddings = EmbeddingsFile {
            ids: self.ids.clone(),
            embeddings: self.vectors.clone(),
        };
        fs::write(
            dir.join(EMBEDDINGS_FILE),
            serde_json::to_string(&embeddings)?,
        )?;

        let mapping: Vec<&Chunk> = self
            .ids
            .iter()
            .map(|id| self.chunks.get(id).expect("id/chunk parity"))
            .collect();
        fs::write(
            dir.join(MAPPING_FILE),
            serde_json::to_string_pretty(&mapping)?,
        )?;

        let metadata = IndexMetadata {
            total_chunks: self.len(),
            embedding_model: self.model.clone(),
            embedding_dimension: self.dims.unwrap_or(0),
            created_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        };
        fs::write(
            dir.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        Ok(())
    }
}

/// Counters for one indexing pass.
#[derive(Debug, Default)]
pub struct IndexOutcome {
    pub indexed: usize,
    pub already_indexed: usize,
    pub failed_batches: usize,
    pub failed_chunks: usize,
}

/// Embed `chunks` in fixed-size batches and append them to `index`.
///
/// Batches run strictly sequentially — one embedding request in flight at
/// a time — with `batch_delay` inserted between successive successful
/// batches to respect the shared rate limit. A batch whose embedding call
/// fails after retries is logged and counted; the run continues with the
/// remaining batches. Only an index-invariant violation aborts.
pub async fn index_chunks(
    index: &mut EmbeddingIndex,
    chunks: Vec<Chunk>,
    embedder: &dyn Embedder,
    batch_size: usize,
    batch_delay: Duration,
) -> Result<IndexOutcome> {
    let mut outcome = IndexOutcome::default();

    let fresh: Vec<Chunk> = chunks
        .into_iter()
        .filter(|c| {
            if index.contains(&c.id) {
                outcome.already_indexed += 1;
                false
            } else {
                true
            }
        })
        .collect();

    let total_batches = fresh.len().div_ceil(batch_size);

    for (batch_num, batch) in fresh.chunks(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        match embedder.embed_batch(&texts).await {
            Ok(vectors) => {
                for (chunk, vector) in batch.iter().zip(vectors) {
                    index.push(chunk.clone(), vector)?;
                    outcome.indexed += 1;
                }
                if batch_num + 1 < total_batches {
                    tokio::time::sleep(batch_delay).await;
                }
            }
            Err(e) => {
                eprintln!(
                    "Warning: embedding batch {}/{} failed: {}",
                    batch_num + 1,
                    total_batches,
                    e
                );
                outcome.failed_batches += 1;
                outcome.failed_chunks += batch.len();
            }
        }
    }

    Ok(outcome)
}

/// Build (or append to) the baseline index from the reference chunk stream.
pub async fn run_index_build(config: &Config, append: bool) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let chunks_path = config.storage.chunks_path(SourceRole::Reference);
    if !chunks_path.exists() {
        bail!(
            "No reference chunks found at {}. Run `drift segment reference` first.",
            chunks_path.display()
        );
    }
    let chunks = store::read_chunk_stream(&chunks_path)?;

    let embedder = create_embedder(&config.embedding)?;
    let data_dir = &config.storage.data_dir;

    let mut index = if append {
        if !EmbeddingIndex::present(data_dir) {
            bail!(
                "No existing index under {}. Run `drift index build` first.",
                data_dir.display()
            );
        }
        let index = EmbeddingIndex::load(data_dir)?;
        if index.model() != embedder.model_name() {
            bail!(
                "index was built with model '{}' but config names '{}'",
                index.model(),
                embedder.model_name()
            );
        }
        index
    } else {
        EmbeddingIndex::new(embedder.model_name())
    };

    let total = chunks.len();
    let result = index_chunks(
        &mut index,
        chunks,
        embedder.as_ref(),
        config.embedding.batch_size,
        Duration::from_millis(config.embedding.batch_delay_ms),
    )
    .await;

    // Persist whatever succeeded before surfacing a fatal error, so a
    // rerun can pick up from the remainder.
    index.save(data_dir)?;
    let outcome = result?;

    println!("index {}", if append { "append" } else { "build" });
    println!("  chunks in stream: {}", total);
    if append {
        println!("  already indexed: {}", outcome.already_indexed);
    }
    println!("  indexed: {}", outcome.indexed);
    if outcome.failed_batches > 0 {
        println!("  failed batches: {}", outcome.failed_batches);
        println!("  failed chunks: {}", outcome.failed_chunks);
    }
    println!("  total in index: {}", index.len());
    println!("  dimension: {}", index.dims().unwrap_or(0));
    println!("ok");

    Ok(())
}

/// Print the persisted index metadata.
pub fn run_index_info(config: &Config) -> Result<()> {
    let path = config.storage.data_dir.join(METADATA_FILE);
    if !path.exists() {
        bail!(
            "No index metadata at {}. Run `drift index build` first.",
            path.display()
        );
    }
    let metadata: IndexMetadata = serde_json::from_str(&fs::read_to_string(&path)?)
        .with_context(|| format!("Malformed {}", METADATA_FILE))?;

    println!("index info");
    println!("  total chunks: {}", metadata.total_chunks);
    println!("  embedding model: {}", metadata.embedding_model);
    println!("  dimension: {}", metadata.embedding_dimension);
    println!("  created at: {}", metadata.created_at);

    Ok(())
}
