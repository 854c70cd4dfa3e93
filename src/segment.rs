//! Heading-driven document segmenter with a windowed fallback.
//!
//! Splits cleaned document text into labeled [`Chunk`]s. Segmentation is an
//! ordered list of heading strategies, each a single regex; the first
//! strategy that yields at least one chunk wins and later strategies are
//! not consulted (deterministic priority, not best-match selection). When
//! no strategy produces anything and the input is long enough, the text is
//! partitioned into fixed-size word windows instead.
//!
//! # Algorithm
//!
//! 1. Collapse runs of 3+ newlines and strip `Page X of Y` artifacts.
//! 2. For each strategy in priority order, split at heading matches; text
//!    before the first heading is attributed to an implicit
//!    "Introduction" header.
//! 3. A split segment becomes a chunk only if its trimmed body exceeds
//!    `min_chunk_chars`; shorter fragments are dropped silently.
//! 4. Fallback: inputs longer than `fallback_min_text_chars` with no
//!    heading chunks are windowed into ~`window_words`-word pieces;
//!    windows shorter than `window_min_chars` after rejoining are dropped.
//!
//! Every emitted chunk's stored text is prefixed with a synthetic
//! `TOPIC:`/`SOURCE:` header so it stays self-describing out of context.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;

use crate::config::SegmenterConfig;
use crate::models::{Chunk, ChunkMetadata, SourceRole};

/// One heading-detection strategy: a regex whose matches become section
/// boundaries.
struct HeadingStrategy {
    pattern: Regex,
}

/// A section produced by a strategy, before length filtering.
struct Section {
    /// Byte offset of the body within the cleaned text (used for page
    /// attribution).
    offset: usize,
    heading: String,
    body: String,
}

impl HeadingStrategy {
    /// Split `text` at heading matches. Returns `None` when the pattern
    /// does not match at all; the caller then moves to the next strategy.
    fn try_split(&self, text: &str) -> Option<Vec<Section>> {
        let matches: Vec<(std::ops::Range<usize>, String)> = self
            .pattern
            .captures_iter(text)
            .map(|caps| {
                let full = caps.get(0).expect("capture 0 always present");
                let heading = caps
                    .get(1)
                    .map(|m| m.as_str())
                    .unwrap_or(full.as_str())
                    .trim()
                    .to_string();
                (full.range(), heading)
            })
            .collect();

        if matches.is_empty() {
            return None;
        }

        let mut sections = Vec::with_capacity(matches.len() + 1);
        let first_start = matches[0].0.start;
        sections.push(Section {
            offset: 0,
            heading: "Introduction".to_string(),
            body: text[..first_start].to_string(),
        });
        for (i, (range, heading)) in matches.iter().enumerate() {
            let body_start = range.end;
            let body_end = matches
                .get(i + 1)
                .map(|(next, _)| next.start)
                .unwrap_or(text.len());
            sections.push(Section {
                offset: body_start,
                heading: heading.clone(),
                body: text[body_start..body_end].to_string(),
            });
        }
        Some(sections)
    }
}

/// Turns raw document text into an ordered sequence of labeled chunks.
pub struct Segmenter {
    strategies: Vec<HeadingStrategy>,
    page_artifact: Regex,
    blank_lines: Regex,
    cfg: SegmenterConfig,
}

impl Segmenter {
    pub fn new(cfg: &SegmenterConfig) -> Result<Self> {
        let strategy = |name: &'static str, pattern: &str| -> Result<HeadingStrategy> {
            Ok(HeadingStrategy {
                pattern: Regex::new(pattern)
                    .with_context(|| format!("invalid heading pattern '{}'", name))?,
            })
        };

        // Priority order matters: the first pattern producing a chunk wins.
        let strategies = vec![
            strategy("numbered-subsection", r"(?m)^(\d+\.\d+\s+[A-Z].+)$")?,
            strategy("chapter", r"(?m)^(Chapter\s+\d+[:\s-]+.+)$")?,
            strategy("chapter-caps", r"(?m)^(CHAPTER\s+\d+[:\s-]+.+)$")?,
            strategy("all-caps-header", r"(?m)^([A-Z][A-Z\s]{5,40})$")?,
            strategy("numbered-section", r"(?m)^(\d+\.\s+[A-Z].+)$")?,
            strategy(
                "keyword-header",
                r"(?m)^(Key\s+Points?|Recommendations?|Summary|Definition|Management|Treatment|Diagnosis).*$",
            )?,
        ];

        Ok(Self {
            strategies,
            page_artifact: Regex::new(r"Page \d+ of \d+").expect("static pattern"),
            blank_lines: Regex::new(r"\n{3,}").expect("static pattern"),
            cfg: cfg.clone(),
        })
    }

    /// Segment `text` from `source_name` into chunks. Never fails: empty
    /// or unsplittable input yields an empty sequence.
    pub fn segment(&self, text: &str, source_name: &str, role: SourceRole) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let cleaned = self.clean(text);

        for strategy in &self.strategies {
            let Some(sections) = strategy.try_split(&cleaned) else {
                continue;
            };
            let chunks = self.emit_sections(&sections, &cleaned, source_name, role);
            if !chunks.is_empty() {
                return chunks;
            }
            // Pattern matched but every body was too short; fall through
            // to the next strategy.
        }

        if cleaned.len() > self.cfg.fallback_min_text_chars {
            return self.window_fallback(&cleaned, source_name, role);
        }

        Vec::new()
    }

    /// Strip page-number artifacts and collapse runs of blank lines.
    fn clean(&self, text: &str) -> String {
        let stripped = self.page_artifact.replace_all(text, "");
        let collapsed = self.blank_lines.replace_all(&stripped, "\n\n");
        collapsed.trim().to_string()
    }

    fn emit_sections(
        &self,
        sections: &[Section],
        cleaned: &str,
        source_name: &str,
        role: SourceRole,
    ) -> Vec<Chunk> {
        let paged = cleaned.contains('\u{000C}');
        let mut chunks = Vec::new();

        for section in sections {
            let body = section.body.trim();
            if body.len() <= self.cfg.min_chunk_chars {
                continue;
            }

            let page_number = if paged {
                Some(cleaned[..section.offset].matches('\u{000C}').count() as u32 + 1)
            } else {
                None
            };

            chunks.push(self.make_chunk(
                source_name,
                role,
                chunks.len(),
                &section.heading,
                body,
                chapter_of(&section.heading),
                section_of(&section.heading),
                page_number,
            ));
        }

        chunks
    }

    fn window_fallback(&self, cleaned: &str, source_name: &str, role: SourceRole) -> Vec<Chunk> {
        let words: Vec<&str> = cleaned.split_whitespace().collect();
        let mut chunks = Vec::new();

        for window in words.chunks(self.cfg.window_words) {
            let body = window.join(" ");
            if body.len() <= self.cfg.window_min_chars {
                continue;
            }
            let ordinal = chunks.len() as u32 + 1;
            let topic = format!("Section {}", ordinal);
            chunks.push(self.make_chunk(
                source_name,
                role,
                chunks.len(),
                &topic,
                &body,
                None,
                Some(ordinal),
                None,
            ));
        }

        chunks
    }

    #[allow(clippy::too_many_arguments)]
    fn make_chunk(
        &self,
        source_name: &str,
        role: SourceRole,
        seq: usize,
        topic: &str,
        body: &str,
        chapter: Option<u32>,
        section: Option<u32>,
        page_number: Option<u32>,
    ) -> Chunk {
        let stem = Path::new(source_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| source_name.to_string());

        Chunk {
            id: format!("{}_{}_{}", role.id_prefix(), stem, seq),
            text: format!(
                "TOPIC: {}\nSOURCE: {}\n\n{}",
                topic,
                source_name,
                body.replace('\u{c}', "\n")
            ),
            metadata: ChunkMetadata {
                source: source_name.to_string(),
                kind: role.kind_label().to_string(),
                topic: topic.to_string(),
                chapter,
                section,
                page_number,
            },
        }
    }
}

/// Parse a chapter number out of `Chapter N ...` style headings.
fn chapter_of(heading: &str) -> Option<u32> {
    let trimmed = heading.trim_start();
    if trimmed.len() < 7 || !trimmed[..7].eq_ignore_ascii_case("chapter") {
        return None;
    }
    leading_number(trimmed[7..].trim_start())
}

/// Parse a section number from `N.` / `N.M` style headings.
fn section_of(heading: &str) -> Option<u32> {
    let trimmed = heading.trim_start();
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        leading_number(trimmed)
    } else {
        None
    }
}

fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
