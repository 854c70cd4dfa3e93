//! Change-detection pipeline.
//!
//! Compares guideline chunks against the baseline index and records a
//! [`TrendRecord`] for every conceptual shift the oracle confirms. Each
//! chunk advances independently through a fixed sequence of states:
//!
//! ```text
//! Pending → Embedded → Retrieved → Classified → Recorded | Skipped | Failed
//! ```
//!
//! - Embedding failure substitutes a zero vector; the zero-norm query
//!   matches nothing and the chunk is skipped downstream.
//! - A missing or empty baseline index skips the chunk directly.
//! - An oracle-call or verdict-parse failure is logged and terminates the
//!   chunk as `Failed`; it is never fatal to the run.
//!
//! Chunks are processed one at a time — every step blocks on its external
//! call — and a run deadline, when set, is only checked between chunks.

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::{CategoryRule, Config};
use crate::embedding::{create_embedder, Embedder};
use crate::index::EmbeddingIndex;
use crate::models::{Chunk, ReportMetadata, SourceRole, TrendRecord, TrendReport};
use crate::oracle::{build_prompt, create_oracle, parse_verdict, truncate_chars, Oracle};
use crate::search::{search, SearchHit};
use crate::store;

/// Terminal state for one guideline chunk.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// The oracle confirmed a shift; a trend record was produced.
    Recorded(TrendRecord),
    /// No shift, no usable baseline, or nothing retrieved.
    Skipped,
    /// Oracle call or verdict parsing failed; logged and dropped.
    Failed,
}

/// Lazily-loaded, read-only handle to the baseline index.
///
/// Owned by the run invocation rather than living in module state, so
/// concurrent or repeated runs stay independent. The index is loaded at
/// most once; missing index files mean "unavailable" (chunks are skipped)
/// while corrupt files are a hard error.
pub struct BaselineHandle {
    dir: PathBuf,
    attempted: bool,
    index: Option<EmbeddingIndex>,
}

impl BaselineHandle {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            attempted: false,
            index: None,
        }
    }

    pub fn get(&mut self) -> Result<Option<&EmbeddingIndex>> {
        if !self.attempted {
            self.attempted = true;
            if EmbeddingIndex::present(&self.dir) {
                self.index = Some(EmbeddingIndex::load(&self.dir)?);
            }
        }
        Ok(self.index.as_ref())
    }
}

/// Assign a category by scanning the lowercased topic and new-concept
/// text against the ordered keyword table. First match wins; no match
/// falls through to `"Other"`.
pub fn detect_category(rules: &[CategoryRule], topic: &str, new_concept: &str) -> String {
    let combined = format!("{} {}", topic, new_concept).to_lowercase();
    for rule in rules {
        if rule
            .keywords
            .iter()
            .any(|kw| combined.contains(&kw.to_lowercase()))
        {
            return rule.name.clone();
        }
    }
    "Other".to_string()
}

/// Run one guideline chunk through the full state machine.
///
/// Only index corruption propagates as an error; every external failure
/// degrades to `Skipped` or `Failed`.
pub async fn analyze_chunk(
    chunk: &Chunk,
    baseline: &mut BaselineHandle,
    embedder: &dyn Embedder,
    oracle: &dyn Oracle,
    config: &Config,
) -> Result<ChunkOutcome> {
    let Some(index) = baseline.get()? else {
        return Ok(ChunkOutcome::Skipped);
    };
    if index.is_empty() {
        return Ok(ChunkOutcome::Skipped);
    }

    // Pending → Embedded
    let query = match embedder.embed_one(&chunk.text).await {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Warning: embedding failed for {}: {}", chunk.id, e);
            vec![0.0; index.dims().unwrap_or(0)]
        }
    };

    // Embedded → Retrieved
    let hits = search(index, &query, config.retrieval.top_k);
    if hits.is_empty() {
        return Ok(ChunkOutcome::Skipped);
    }
    let context = assemble_context(index, &hits, config.oracle.match_char_budget);

    // Retrieved → Classified
    let prompt = build_prompt(&config.oracle, &chunk.text, &context);
    let raw = match oracle.classify(&prompt).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Warning: oracle call failed for {}: {}", chunk.id, e);
            return Ok(ChunkOutcome::Failed);
        }
    };

    // Classified → Recorded | Skipped | Failed
    let verdict = match parse_verdict(&raw) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Warning: unparsable verdict for {}: {}", chunk.id, e);
            return Ok(ChunkOutcome::Failed);
        }
    };
    if !verdict.has_shift {
        return Ok(ChunkOutcome::Skipped);
    }

    let category = detect_category(&config.categories, &verdict.topic, &verdict.new_concept);
    Ok(ChunkOutcome::Recorded(TrendRecord {
        topic: verdict.topic,
        old_concept: verdict.old_concept,
        new_concept: verdict.new_concept,
        exam_relevance_score: verdict.exam_relevance_score.clamp(1, 10) as u8,
        reason: verdict.reason,
        source_guideline: chunk.metadata.source.clone(),
        category,
    }))
}

/// Join retrieved baseline chunks into the oracle's reference context,
/// capping each match at `match_budget` characters.
fn assemble_context(index: &EmbeddingIndex, hits: &[SearchHit], match_budget: usize) -> String {
    let mut blocks = Vec::with_capacity(hits.len());
    for hit in hits {
        let text = index
            .chunk(&hit.chunk_id)
            .map(|c| c.text.as_str())
            .unwrap_or("");
        blocks.push(format!(
            "--- MATCH (Score: {:.2}) ---\n{}",
            hit.score,
            truncate_chars(text, match_budget)
        ));
    }
    blocks.join("\n\n")
}

/// Aggregated result of one detection run.
#[derive(Debug, Default)]
pub struct DetectionSummary {
    pub analyzed: usize,
    pub recorded: Vec<TrendRecord>,
    pub skipped: usize,
    pub failed: usize,
    pub deadline_hit: bool,
}

/// Iterate guideline chunks sequentially, collecting trend records.
///
/// Chunks are independent; an optional deadline is honored between
/// chunks, never mid-call.
pub async fn detect_trends(
    chunks: &[Chunk],
    baseline: &mut BaselineHandle,
    embedder: &dyn Embedder,
    oracle: &dyn Oracle,
    config: &Config,
    deadline: Option<Instant>,
) -> Result<DetectionSummary> {
    let mut summary = DetectionSummary::default();

    for (i, chunk) in chunks.iter().enumerate() {
        if let Some(d) = deadline {
            if Instant::now() >= d {
                eprintln!("Warning: run deadline reached after {} chunks", i);
                summary.deadline_hit = true;
                break;
            }
        }

        println!("  [{}/{}] {}", i + 1, chunks.len(), chunk.metadata.topic);
        summary.analyzed += 1;

        match analyze_chunk(chunk, baseline, embedder, oracle, config).await? {
            ChunkOutcome::Recorded(record) => {
                println!(
                    "    shift: {} [{}] score {}",
                    record.topic, record.category, record.exam_relevance_score
                );
                summary.recorded.push(record);
            }
            ChunkOutcome::Skipped => summary.skipped += 1,
            ChunkOutcome::Failed => summary.failed += 1,
        }
    }

    Ok(summary)
}

/// Assemble the persisted report from the recorded trends.
pub fn build_report(records: Vec<TrendRecord>) -> TrendReport {
    let mut sources: Vec<String> = records.iter().map(|t| t.source_guideline.clone()).collect();
    sources.sort();
    sources.dedup();

    TrendReport {
        metadata: ReportMetadata {
            generated_at: chrono::Utc::now().to_rfc3339(),
            total_trends: records.len(),
            sources_analyzed: sources,
        },
        trends: records,
    }
}

/// The `drift analyze` command: load guideline chunks, run detection,
/// persist the trend report.
pub async fn run_analyze(
    config: &Config,
    limit: Option<usize>,
    timeout_secs: Option<u64>,
    dry_run: bool,
) -> Result<()> {
    let chunks_path = config.storage.chunks_path(SourceRole::Guideline);
    if !chunks_path.exists() {
        bail!(
            "No guideline chunks found at {}. Run `drift segment guidelines` first.",
            chunks_path.display()
        );
    }
    let mut chunks = store::read_chunk_stream(&chunks_path)?;
    if let Some(lim) = limit {
        chunks.truncate(lim);
    }

    if dry_run {
        println!("analyze (dry-run)");
        println!("  guideline chunks: {}", chunks.len());
        println!(
            "  baseline index present: {}",
            EmbeddingIndex::present(&config.storage.data_dir)
        );
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Analysis requires embeddings. Set [embedding] provider in config.");
    }
    if !config.oracle.is_enabled() {
        bail!("Analysis requires a classification oracle. Set [oracle] provider in config.");
    }
    let embedder = create_embedder(&config.embedding)?;
    let oracle = create_oracle(&config.oracle)?;

    let mut baseline = BaselineHandle::new(config.storage.data_dir.clone());
    let deadline = timeout_secs.map(|s| Instant::now() + Duration::from_secs(s));

    println!("analyze");
    println!("  guideline chunks: {}", chunks.len());

    let summary = detect_trends(
        &chunks,
        &mut baseline,
        embedder.as_ref(),
        oracle.as_ref(),
        config,
        deadline,
    )
    .await?;

    // The report is written even when some chunks failed, so partial
    // progress survives a flaky oracle.
    let report = build_report(summary.recorded);
    let trends_path = config.storage.trends_path();
    store::write_trend_report(&trends_path, &report)?;

    println!("  analyzed: {}", summary.analyzed);
    println!("  trends recorded: {}", report.metadata.total_trends);
    println!("  skipped: {}", summary.skipped);
    if summary.failed > 0 {
        println!("  failed: {}", summary.failed);
    }
    if summary.deadline_hit {
        println!("  stopped early: deadline reached");
    }
    println!("  report: {}", trends_path.display());
    println!("ok");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CategoryRule;
    use tempfile::TempDir;

    fn rules() -> Vec<CategoryRule> {
        let rule = |name: &str, keywords: &[&str]| CategoryRule {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        };
        vec![
            rule("TB", &["tuberculosis", " tb "]),
            rule("COPD", &["copd", "gold report"]),
        ]
    }

    #[test]
    fn category_matching_is_case_insensitive() {
        assert_eq!(detect_category(&rules(), "COPD staging", ""), "COPD");
        assert_eq!(detect_category(&rules(), "Gold Report 2025", ""), "COPD");
    }

    #[test]
    fn category_scans_new_concept_text_too() {
        assert_eq!(
            detect_category(&rules(), "Staging update", "revised copd grouping"),
            "COPD"
        );
    }

    #[test]
    fn first_matching_rule_wins() {
        // Text hits both rules; the earlier TB rule must win.
        assert_eq!(
            detect_category(&rules(), "tuberculosis in copd patients", ""),
            "TB"
        );
    }

    #[test]
    fn no_match_falls_back_to_other() {
        assert_eq!(detect_category(&rules(), "lung cancer screening", ""), "Other");
    }

    #[test]
    fn baseline_handle_reports_missing_index_as_unavailable() {
        let tmp = TempDir::new().unwrap();
        let mut handle = BaselineHandle::new(tmp.path().to_path_buf());
        assert!(handle.get().unwrap().is_none());
        // Second call takes the cached path.
        assert!(handle.get().unwrap().is_none());
    }

    #[test]
    fn baseline_handle_surfaces_corruption() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(crate::index::EMBEDDINGS_FILE), "{broken").unwrap();
        std::fs::write(tmp.path().join(crate::index::MAPPING_FILE), "[]").unwrap();
        std::fs::write(tmp.path().join(crate::index::METADATA_FILE), "{}").unwrap();
        let mut handle = BaselineHandle::new(tmp.path().to_path_buf());
        assert!(handle.get().is_err());
    }

    #[test]
    fn report_deduplicates_and_sorts_sources() {
        let record = |source: &str| TrendRecord {
            topic: "t".to_string(),
            old_concept: "o".to_string(),
            new_concept: "n".to_string(),
            exam_relevance_score: 5,
            reason: "r".to_string(),
            source_guideline: source.to_string(),
            category: "Other".to_string(),
        };
        let report = build_report(vec![record("b.pdf"), record("a.pdf"), record("b.pdf")]);
        assert_eq!(report.metadata.total_trends, 3);
        assert_eq!(report.metadata.sources_analyzed, vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn empty_report_has_zero_totals() {
        let report = build_report(Vec::new());
        assert_eq!(report.metadata.total_trends, 0);
        assert!(report.metadata.sources_analyzed.is_empty());
        assert!(report.trends.is_empty());
    }
}
