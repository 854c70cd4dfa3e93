//! Embedding client abstraction and OpenAI-compatible implementation.
//!
//! Defines the [`Embedder`] trait the indexing and detection pipelines
//! call through, plus [`OpenAiEmbedder`], which posts batches to an
//! OpenAI-style `/v1/embeddings` endpoint.
//!
//! # Retry Strategy
//!
//! All requests go through the shared [`RetryPolicy`]:
//! - HTTP 429 → retry with exponential backoff
//! - HTTP 5xx and network errors → retry after a fixed short delay
//! - other HTTP 4xx → fail immediately
//!
//! The attempt budget, base delay, and endpoint are configured under
//! `[embedding]` in the TOML config.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::retry::{classify_status, Failure, RetryPolicy};

const DEFAULT_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Batched vector generation, with a single-item specialization.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in the index metadata.
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        let vectors = self.embed_batch(&texts).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("empty embedding response"))
    }
}

/// Instantiate the embedder named by the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        "disabled" => bail!("Embedding provider is disabled. Set [embedding] provider in config."),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embedding client for an OpenAI-compatible `/v1/embeddings` endpoint.
///
/// Requires the `OPENAI_API_KEY` environment variable. The endpoint can be
/// overridden with `embedding.url` (e.g. for a local gateway).
pub struct OpenAiEmbedder {
    model: String,
    url: String,
    api_key: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_EMBEDDINGS_URL.to_string());
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
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let vectors = self
            .retry
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
                                parse_embeddings_response(&json).map_err(Failure::Fatal)
                            } else {
                                let body_text = response.text().await.unwrap_or_default();
                                Err(classify_status(status, body_text, "embeddings API"))
                            }
                        }
                        Err(e) => Err(Failure::Transient(anyhow!(
                            "embeddings request failed: {}",
                            e
                        ))),
                    }
                }
            })
            .await?;

        if vectors.len() != texts.len() {
            bail!(
                "embeddings API returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            );
        }

        Ok(vectors)
    }
}

/// Parse the embeddings API response JSON, returning vectors in input order.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid embeddings response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid embeddings response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_response() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, 0.2, 0.3] },
                { "embedding": [0.4, 0.5, 0.6] },
            ]
        });
        let vectors = parse_embeddings_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 3);
        assert!((vectors[1][0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn parse_missing_data_errors() {
        let json = serde_json::json!({ "error": "nope" });
        assert!(parse_embeddings_response(&json).is_err());
    }

    #[test]
    fn parse_missing_embedding_errors() {
        let json = serde_json::json!({ "data": [ { "index": 0 } ] });
        assert!(parse_embeddings_response(&json).is_err());
    }
}
