use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::SourceRole;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub segmenter: SegmenterConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryRule>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding chunk streams, index files, and the trend report.
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn chunks_path(&self, role: SourceRole) -> PathBuf {
        self.data_dir.join(role.chunks_file())
    }

    pub fn trends_path(&self) -> PathBuf {
        self.data_dir.join("trends.json")
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    pub reference: Option<SourceDirConfig>,
    pub guidelines: Option<SourceDirConfig>,
}

impl SourcesConfig {
    pub fn for_role(&self, role: SourceRole) -> Option<&SourceDirConfig> {
        match role {
            SourceRole::Reference => self.reference.as_ref(),
            SourceRole::Guideline => self.guidelines.as_ref(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceDirConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct SegmenterConfig {
    /// Trimmed segments at or below this length are discarded.
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
    /// Minimum input length before the windowed fallback is attempted.
    #[serde(default = "default_fallback_min_text_chars")]
    pub fallback_min_text_chars: usize,
    /// Words per window in the fallback path.
    #[serde(default = "default_window_words")]
    pub window_words: usize,
    /// Rejoined windows shorter than this are discarded.
    #[serde(default = "default_window_min_chars")]
    pub window_min_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_chunk_chars: default_min_chunk_chars(),
            fallback_min_text_chars: default_fallback_min_text_chars(),
            window_words: default_window_words(),
            window_min_chars: default_window_min_chars(),
        }
    }
}

fn default_min_chunk_chars() -> usize {
    50
}
fn default_fallback_min_text_chars() -> usize {
    200
}
fn default_window_words() -> usize {
    400
}
fn default_window_min_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Endpoint override; defaults to the OpenAI API.
    #[serde(default)]
    pub url: Option<String>,
    /// Texts per embedding request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Total attempts per request, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Starting backoff for rate-limited calls; doubles per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Fixed delay before retrying non-rate-limit transient failures.
    #[serde(default = "default_flat_delay_ms")]
    pub flat_delay_ms: u64,
    /// Pause between successive successful batches.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            flat_delay_ms: default_flat_delay_ms(),
            batch_delay_ms: default_batch_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_flat_delay_ms() -> u64 {
    1000
}
fn default_batch_delay_ms() -> u64 {
    500
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Baseline matches retrieved per guideline chunk.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct OracleConfig {
    /// `"openai"` or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Endpoint override; defaults to the OpenAI API.
    #[serde(default)]
    pub url: Option<String>,
    /// Examiner persona inserted into the classification prompt.
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_flat_delay_ms")]
    pub flat_delay_ms: u64,
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
    /// Character cap applied to the guideline text in the prompt.
    #[serde(default = "default_text_budget")]
    pub guideline_char_budget: usize,
    /// Character cap applied to the assembled reference context.
    #[serde(default = "default_text_budget")]
    pub context_char_budget: usize,
    /// Character cap applied to each retrieved match before joining.
    #[serde(default = "default_match_budget")]
    pub match_char_budget: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            subject: default_subject(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            flat_delay_ms: default_flat_delay_ms(),
            timeout_secs: default_oracle_timeout_secs(),
            guideline_char_budget: default_text_budget(),
            context_char_budget: default_text_budget(),
            match_char_budget: default_match_budget(),
        }
    }
}

impl OracleConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_subject() -> String {
    "Pulmonology".to_string()
}
fn default_oracle_timeout_secs() -> u64 {
    60
}
fn default_text_budget() -> usize {
    4000
}
fn default_match_budget() -> usize {
    1500
}

/// One row of the ordered categorization table. The first rule whose
/// keyword list hits the lowercased topic + new-concept text wins.
#[derive(Debug, Deserialize, Clone)]
pub struct CategoryRule {
    pub name: String,
    pub keywords: Vec<String>,
}

fn default_categories() -> Vec<CategoryRule> {
    let rule = |name: &str, keywords: &[&str]| CategoryRule {
        name: name.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    };
    vec![
        rule(
            "TB",
            &[
                "tuberculosis",
                " tb ",
                "dr-tb",
                "mdr-tb",
                "xdr-tb",
                "ntep",
                "rntcp",
                "dots",
            ],
        ),
        rule(
            "Asthma",
            &[
                "asthma",
                "gina",
                "bronchodilator",
                "ics-formoterol",
                "inhaler",
            ],
        ),
        rule(
            "ARDS",
            &[
                "ards",
                "acute respiratory distress",
                "ventilation",
                "plateau pressure",
            ],
        ),
        rule(
            "COPD",
            &["copd", "gold report", "emphysema", "chronic obstructive"],
        ),
        rule("Pneumonia", &["pneumonia", "cap ", "community-acquired"]),
    ]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a config document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate segmenter
    if config.segmenter.window_words == 0 {
        anyhow::bail!("segmenter.window_words must be > 0");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        if config.embedding.max_retries == 0 {
            anyhow::bail!("embedding.max_retries must be > 0");
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    // Validate oracle
    if config.oracle.is_enabled() {
        if config.oracle.model.is_none() {
            anyhow::bail!(
                "oracle.model must be specified when provider is '{}'",
                config.oracle.provider
            );
        }
        if config.oracle.guideline_char_budget == 0 || config.oracle.context_char_budget == 0 {
            anyhow::bail!("oracle character budgets must be > 0");
        }
    }
    match config.oracle.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown oracle provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    // Validate categories
    for rule in &config.categories {
        if rule.name.is_empty() || rule.keywords.is_empty() {
            anyhow::bail!("each [[categories]] entry needs a name and at least one keyword");
        }
    }

    Ok(config)
}
