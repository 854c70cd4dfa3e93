//! Core data models used throughout corpus-drift.
//!
//! These types represent the chunks, trend records, and index metadata that
//! flow through the segmentation, indexing, and change-detection pipeline.
//! Serde attributes pin the on-disk JSON key names, which other tooling
//! (report viewers, the content-generation pipeline) reads directly.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which corpus a source document belongs to.
///
/// The reference corpus is the older/standard material the baseline index
/// is built from; guidelines are the newer documents compared against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    Reference,
    Guideline,
}

impl SourceRole {
    /// Value stored in chunk metadata under `"type"`.
    pub fn kind_label(self) -> &'static str {
        match self {
            SourceRole::Reference => "reference",
            SourceRole::Guideline => "guideline",
        }
    }

    /// Prefix used when deriving chunk ids.
    pub fn id_prefix(self) -> &'static str {
        match self {
            SourceRole::Reference => "ref",
            SourceRole::Guideline => "guide",
        }
    }

    /// File name of this role's chunk stream under the data directory.
    pub fn chunks_file(self) -> &'static str {
        match self {
            SourceRole::Reference => "reference_chunks.jsonl",
            SourceRole::Guideline => "guideline_chunks.jsonl",
        }
    }
}

impl FromStr for SourceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reference" => Ok(SourceRole::Reference),
            "guideline" | "guidelines" => Ok(SourceRole::Guideline),
            other => Err(format!(
                "unknown source role '{}' (expected 'reference' or 'guidelines')",
                other
            )),
        }
    }
}

/// A labeled, bounded unit of source text — the atomic unit of indexing
/// and retrieval. Immutable once created; the id is derived from the
/// source name plus a monotonic sequence number and is never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Descriptive metadata attached to every chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source document name (file name, not path).
    pub source: String,
    /// `"reference"` or `"guideline"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Heading the chunk was attributed to ("Introduction" for preamble,
    /// "Section N" for windowed fallback chunks).
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "pageNumber")]
    pub page_number: Option<u32>,
}

/// A raw document found by a source scan, before extraction.
#[derive(Debug, Clone)]
pub struct SourceDoc {
    /// File name, used as the chunk source label.
    pub name: String,
    /// Path relative to the configured root.
    pub rel_path: String,
    /// Absolute path on disk.
    pub path: std::path::PathBuf,
    /// MIME type guessed from the file extension.
    pub content_type: String,
}

/// A recorded, scored instance of a detected conceptual shift between the
/// baseline corpus and a guideline document. Append-only; never mutated
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendRecord {
    pub topic: String,
    pub old_concept: String,
    pub new_concept: String,
    /// 1..=10, 10 meaning a near-certain exam question.
    pub exam_relevance_score: u8,
    pub reason: String,
    pub source_guideline: String,
    pub category: String,
}

/// The persisted output of a change-detection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendReport {
    pub metadata: ReportMetadata,
    pub trends: Vec<TrendRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// RFC 3339 generation timestamp.
    pub generated_at: String,
    pub total_trends: usize,
    /// Deduplicated, sorted list of guideline sources that produced at
    /// least one trend.
    pub sources_analyzed: Vec<String>,
}

/// Metadata describing a persisted embedding index.
///
/// Key names are camelCase on disk; downstream consumers already read
/// that format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    pub total_chunks: usize,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_metadata_serializes_type_key() {
        let meta = ChunkMetadata {
            source: "gold_2025.pdf".to_string(),
            kind: "guideline".to_string(),
            topic: "Diagnosis".to_string(),
            chapter: None,
            section: Some(2),
            page_number: None,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["type"], "guideline");
        assert_eq!(json["section"], 2);
        assert!(json.get("chapter").is_none());
        assert!(json.get("pageNumber").is_none());
    }

    #[test]
    fn index_metadata_uses_camel_case_keys() {
        let meta = IndexMetadata {
            total_chunks: 3,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: 1536,
            created_at: "2025-01-01T00:00:00Z".to_string(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["totalChunks"], 3);
        assert_eq!(json["embeddingDimension"], 1536);
    }

    #[test]
    fn source_role_parses_both_spellings() {
        assert_eq!(
            SourceRole::from_str("guidelines").unwrap(),
            SourceRole::Guideline
        );
        assert_eq!(
            SourceRole::from_str("reference").unwrap(),
            SourceRole::Reference
        );
        assert!(SourceRole::from_str("notes").is_err());
    }
}
