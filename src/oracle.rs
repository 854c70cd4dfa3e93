//! Classification oracle abstraction and OpenAI-compatible implementation.
//!
//! The oracle judges whether a guideline passage represents a substantive
//! conceptual change against retrieved reference context. It returns raw
//! text expected to contain a JSON verdict, possibly wrapped in code
//! fences; parsing failures are the caller's problem by design — the
//! pipeline downgrades them to "no shift detected" rather than aborting.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::OracleConfig;
use crate::retry::{classify_status, Failure, RetryPolicy};

const DEFAULT_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// External classification capability: prompt in, raw text out.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn classify(&self, prompt: &str) -> Result<String>;
}

/// Instantiate the oracle named by the configuration.
pub fn create_oracle(config: &OracleConfig) -> Result<Box<dyn Oracle>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(ChatOracle::new(config)?)),
        "disabled" => bail!("Oracle provider is disabled. Set [oracle] provider in config."),
        other => bail!("Unknown oracle provider: {}", other),
    }
}

/// Oracle backed by an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct ChatOracle {
    model: String,
    url: String,
    api_key: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl ChatOracle {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("oracle.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_CHAT_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let retry = RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.flat_delay_ms),
        );

        Ok(Self {
            model,
            url,
            api_key,
            client,
            retry,
        })
    }
}

#[async_trait]
impl Oracle for ChatOracle {
    async fn classify(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [ { "role": "user", "content": prompt } ],
        });

        self.retry
            .run(|| {
                let client = self.client.clone();
                let url = self.url.clone();
                let api_key = self.api_key.clone();
                let body = body.clone();
                async move {
                    let resp = client
                        .post(&url)
                        .header("Authorization", format!("Bearer {}", api_key))
                        .header("Content-Type", "application/json")
                        .json(&body)
                        .send()
                        .await;

                    match resp {
                        Ok(response) => {
                            let status = response.status();
                            if status.is_success() {
                                let json: serde_json::Value =
                                    response.json().await.map_err(|e| Failure::Fatal(e.into()))?;
                                parse_chat_response(&json).map_err(Failure::Fatal)
                            } else {
                                let body_text = response.text().await.unwrap_or_default();
                                Err(classify_status(status, body_text, "chat API"))
                            }
                        }
                        Err(e) => {
                            Err(Failure::Transient(anyhow!("chat request failed: {}", e)))
                        }
                    }
                }
            })
            .await
    }
}

/// Pull the assistant message text out of a chat completion response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message.content"))
}

/// The oracle's structured verdict on one guideline chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct Verdict {
    #[serde(default)]
    pub has_shift: bool,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub old_concept: String,
    #[serde(default)]
    pub new_concept: String,
    #[serde(default = "default_score")]
    pub exam_relevance_score: i64,
    #[serde(default)]
    pub reason: String,
}

fn default_score() -> i64 {
    1
}

/// Parse the oracle's raw text as a verdict, stripping optional Markdown
/// code-fence markers first.
pub fn parse_verdict(raw: &str) -> Result<Verdict> {
    let stripped = raw.trim().replace("```json", "").replace("```", "");
    serde_json::from_str(stripped.trim()).context("oracle response is not a JSON verdict")
}

/// Build the comparison prompt for one guideline chunk.
///
/// Both texts are truncated to their configured character budgets
/// (char-boundary safe) to respect the oracle's input limits.
pub fn build_prompt(config: &OracleConfig, guideline_text: &str, reference_context: &str) -> String {
    format!(
        r#"You are an expert {subject} examiner.
Task: Compare the "Recent Guideline" text with the "Standard Reference" context.

GUIDELINE (Newer):
{guideline}

REFERENCE (Older/Standard):
{reference}

Determine if the Guideline represents a SIGNIFICANT PARADIGM SHIFT or UPDATE that conflicts with or adds to the reference.
Ignore minor phrasing differences. Focus on:
1. New Drug Approvals
2. Changed Numerical Cut-offs
3. Contraindications becoming Indications (or vice versa)
4. New Classification Systems

If there is a shift, output JSON:
{{
  "has_shift": true,
  "topic": "Short Topic Name",
  "old_concept": "Summary of old reference view",
  "new_concept": "Summary of new guideline view",
  "exam_relevance_score": 1-10 (10 = Certain Exam Question),
  "reason": "Why is this high yield?"
}}

If NO significant shift, output:
{{ "has_shift": false }}
"#,
        subject = config.subject,
        guideline = truncate_chars(guideline_text, config.guideline_char_budget),
        reference = truncate_chars(reference_context, config.context_char_budget),
    )
}

/// Truncate to at most `budget` bytes without splitting a UTF-8 char.
pub fn truncate_chars(s: &str, budget: usize) -> &str {
    if s.len() <= budget {
        return s;
    }
    let mut end = budget;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
