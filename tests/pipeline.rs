//! End-to-end change-detection tests with stub embedding and oracle
//! providers. No network access; the external seams are the `Embedder`
//! and `Oracle` traits.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::Path;
use tempfile::TempDir;

use corpus_drift::analyze::{analyze_chunk, build_report, detect_trends, BaselineHandle, ChunkOutcome};
use corpus_drift::config::Config;
use corpus_drift::embedding::Embedder;
use corpus_drift::index::{index_chunks, EmbeddingIndex};
use corpus_drift::models::{Chunk, ChunkMetadata, SourceRole};
use corpus_drift::oracle::Oracle;
use corpus_drift::segment::Segmenter;

/// Deterministic bag-of-words embedding: words hash into 8 buckets, so
/// near-identical texts get near-identical vectors.
fn embed_text(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; 8];
    for word in text.to_lowercase().split_whitespace() {
        let mut h = 0usize;
        for b in word.bytes() {
            h = h.wrapping_mul(31).wrapping_add(b as usize);
        }
        v[h % 8] += 1.0;
    }
    v
}

struct StubEmbedder;

#[async_trait]
impl Embedder for StubEmbedder {
    fn model_name(&self) -> &str {
        "stub-embed"
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }
}

struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing-embed"
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding service unreachable")
    }
}

/// Oracle that always answers with the same raw text.
struct FixedOracle(&'static str);

#[async_trait]
impl Oracle for FixedOracle {
    async fn classify(&self, _prompt: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

struct FailingOracle;

#[async_trait]
impl Oracle for FailingOracle {
    async fn classify(&self, _prompt: &str) -> Result<String> {
        bail!("oracle unavailable")
    }
}

fn test_config(data_dir: &Path) -> Config {
    corpus_drift::config::parse_config(&format!(
        "[storage]\ndata_dir = \"{}\"\n",
        data_dir.display()
    ))
    .unwrap()
}

fn chunk(id: &str, source: &str, topic: &str, body: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        text: format!("TOPIC: {}\nSOURCE: {}\n\n{}", topic, source, body),
        metadata: ChunkMetadata {
            source: source.to_string(),
            kind: "reference".to_string(),
            topic: topic.to_string(),
            chapter: None,
            section: None,
            page_number: None,
        },
    }
}

fn copd_baseline() -> Vec<Chunk> {
    vec![
        chunk(
            "ref_textbook_0",
            "textbook.pdf",
            "COPD staging",
            "GOLD stage one mild COPD is defined by FEV1 of at least 80 percent \
             of the predicted value with an FEV1/FVC ratio below 0.70.",
        ),
        chunk(
            "ref_textbook_1",
            "textbook.pdf",
            "COPD staging",
            "GOLD stage two moderate COPD spans FEV1 between 50 and 79 percent \
             predicted; symptoms usually progress at this stage.",
        ),
        chunk(
            "ref_textbook_2",
            "textbook.pdf",
            "COPD staging",
            "GOLD stages three and four cover severe and very severe COPD with \
             FEV1 under 50 and under 30 percent predicted respectively.",
        ),
    ]
}

fn guideline_chunk() -> Chunk {
    let mut c = chunk(
        "guide_gold_2025_0",
        "gold_2025.pdf",
        "COPD staging",
        "GOLD stage one mild COPD is defined by FEV1 of at least 85 percent \
         of the predicted value with an FEV1/FVC ratio below 0.70.",
    );
    c.metadata.kind = "guideline".to_string();
    c
}

async fn baseline_dir(chunks: Vec<Chunk>) -> TempDir {
    let tmp = TempDir::new().unwrap();
    let mut index = EmbeddingIndex::new("stub-embed");
    index_chunks(&mut index, chunks, &StubEmbedder, 100, std::time::Duration::ZERO)
        .await
        .unwrap();
    index.save(tmp.path()).unwrap();
    tmp
}

const SHIFT_VERDICT: &str = r#"```json
{
  "has_shift": true,
  "topic": "COPD GOLD staging update",
  "old_concept": "GOLD 1 requires FEV1 >= 80% predicted",
  "new_concept": "GOLD 1 cutoff moved to FEV1 >= 85% predicted",
  "exam_relevance_score": 9,
  "reason": "Changed numerical cut-off"
}
```"#;

#[tokio::test]
async fn copd_cutoff_change_yields_one_copd_trend() {
    let tmp = baseline_dir(copd_baseline()).await;
    let config = test_config(tmp.path());
    let mut baseline = BaselineHandle::new(tmp.path().to_path_buf());

    let chunks = vec![guideline_chunk()];
    let summary = detect_trends(
        &chunks,
        &mut baseline,
        &StubEmbedder,
        &FixedOracle(SHIFT_VERDICT),
        &config,
        None,
    )
    .await
    .unwrap();

    assert_eq!(summary.recorded.len(), 1);
    let record = &summary.recorded[0];
    assert_eq!(record.category, "COPD");
    assert_eq!(record.topic, "COPD GOLD staging update");
    assert_eq!(record.exam_relevance_score, 9);
    assert_eq!(record.source_guideline, "gold_2025.pdf");

    let report = build_report(summary.recorded);
    assert_eq!(report.metadata.total_trends, 1);
    assert_eq!(report.metadata.sources_analyzed, vec!["gold_2025.pdf"]);
}

#[tokio::test]
async fn zero_baseline_chunks_skip_everything() {
    // An index that exists but holds nothing.
    let tmp = baseline_dir(Vec::new()).await;
    let config = test_config(tmp.path());
    let mut baseline = BaselineHandle::new(tmp.path().to_path_buf());

    let chunks = vec![guideline_chunk(), guideline_chunk()];
    let summary = detect_trends(
        &chunks,
        &mut baseline,
        &StubEmbedder,
        &FixedOracle(SHIFT_VERDICT),
        &config,
        None,
    )
    .await
    .unwrap();

    assert_eq!(summary.analyzed, 2);
    assert_eq!(summary.skipped, 2);
    assert!(summary.recorded.is_empty());

    let report = build_report(summary.recorded);
    assert_eq!(report.metadata.total_trends, 0);
    assert!(report.trends.is_empty());
}

#[tokio::test]
async fn missing_baseline_index_skips_everything() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let mut baseline = BaselineHandle::new(tmp.path().to_path_buf());

    let outcome = analyze_chunk(
        &guideline_chunk(),
        &mut baseline,
        &StubEmbedder,
        &FixedOracle(SHIFT_VERDICT),
        &config,
    )
    .await
    .unwrap();

    assert!(matches!(outcome, ChunkOutcome::Skipped));
}

#[tokio::test]
async fn no_shift_verdict_produces_no_record() {
    let tmp = baseline_dir(copd_baseline()).await;
    let config = test_config(tmp.path());
    let mut baseline = BaselineHandle::new(tmp.path().to_path_buf());

    let outcome = analyze_chunk(
        &guideline_chunk(),
        &mut baseline,
        &StubEmbedder,
        &FixedOracle(r#"{ "has_shift": false }"#),
        &config,
    )
    .await
    .unwrap();

    assert!(matches!(outcome, ChunkOutcome::Skipped));
}

#[tokio::test]
async fn unparsable_verdict_is_contained() {
    let tmp = baseline_dir(copd_baseline()).await;
    let config = test_config(tmp.path());
    let mut baseline = BaselineHandle::new(tmp.path().to_path_buf());

    let chunks = vec![guideline_chunk()];
    let summary = detect_trends(
        &chunks,
        &mut baseline,
        &StubEmbedder,
        &FixedOracle("I am not JSON, sorry."),
        &config,
        None,
    )
    .await
    .unwrap();

    // The run completes; the chunk is counted failed, nothing recorded.
    assert_eq!(summary.analyzed, 1);
    assert_eq!(summary.failed, 1);
    assert!(summary.recorded.is_empty());
}

#[tokio::test]
async fn oracle_call_failure_is_contained() {
    let tmp = baseline_dir(copd_baseline()).await;
    let config = test_config(tmp.path());
    let mut baseline = BaselineHandle::new(tmp.path().to_path_buf());

    let outcome = analyze_chunk(
        &guideline_chunk(),
        &mut baseline,
        &StubEmbedder,
        &FailingOracle,
        &config,
    )
    .await
    .unwrap();

    assert!(matches!(outcome, ChunkOutcome::Failed));
}

#[tokio::test]
async fn embedding_failure_degrades_to_skip() {
    let tmp = baseline_dir(copd_baseline()).await;
    let config = test_config(tmp.path());
    let mut baseline = BaselineHandle::new(tmp.path().to_path_buf());

    // Zero-vector substitution: the query matches nothing, the oracle is
    // never consulted, and the chunk is skipped.
    let outcome = analyze_chunk(
        &guideline_chunk(),
        &mut baseline,
        &FailingEmbedder,
        &FixedOracle(SHIFT_VERDICT),
        &config,
    )
    .await
    .unwrap();

    assert!(matches!(outcome, ChunkOutcome::Skipped));
}

#[tokio::test]
async fn segment_then_index_then_detect_round_trip() {
    let reference_text = format!(
        "1.1 Asthma Maintenance\n{}\n1.2 COPD Staging Overview\n{}",
        "Controller therapy with inhaled corticosteroids remains the backbone \
         of long-term asthma management in adults and adolescents. "
            .repeat(2),
        "The GOLD report grades airflow limitation in COPD by FEV1 thresholds \
         measured after bronchodilator administration. "
            .repeat(2),
    );

    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());

    let segmenter = Segmenter::new(&config.segmenter).unwrap();
    let reference_chunks =
        segmenter.segment(&reference_text, "textbook.pdf", SourceRole::Reference);
    assert_eq!(reference_chunks.len(), 2);

    let mut index = EmbeddingIndex::new("stub-embed");
    let outcome = index_chunks(
        &mut index,
        reference_chunks,
        &StubEmbedder,
        100,
        std::time::Duration::ZERO,
    )
    .await
    .unwrap();
    assert_eq!(outcome.indexed, 2);
    index.save(tmp.path()).unwrap();

    let mut baseline = BaselineHandle::new(tmp.path().to_path_buf());
    let chunks = vec![guideline_chunk()];
    let summary = detect_trends(
        &chunks,
        &mut baseline,
        &StubEmbedder,
        &FixedOracle(SHIFT_VERDICT),
        &config,
        None,
    )
    .await
    .unwrap();

    assert_eq!(summary.recorded.len(), 1);
    assert_eq!(summary.recorded[0].category, "COPD");
}
