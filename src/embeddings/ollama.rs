use crate::embeddings::types::EmbeddingService;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const OLLAMA_DEFAULT_MODEL: &str = "nomic-embed-text";
const OLLAMA_DEFAULT_DIM: usize = 768;

pub struct OllamaEmbedding {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedding {
    pub fn new(base_url: Option<&str>, model: Option<&str>, dimensions: Option<usize>) -> Self {
        let base_url = base_url.unwrap_or(OLLAMA_DEFAULT_URL).trim_end_matches('/');
        let model = model.unwrap_or(OLLAMA_DEFAULT_MODEL);
        let dimensions = dimensions.unwrap_or(OLLAMA_DEFAULT_DIM);
        info!(
            "Ollama embeddings at {} (model: {}, dim: {})",
            base_url, model, dimensions
        );
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            model: model.to_string(),
            dimensions,
        }
    }

    async fn embed(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let resp = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&json!({ "model": self.model, "input": input }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Ollama embedding API error: {} {}", status, body);
        }

        let data: EmbedResponse = resp.json().await.context("Malformed Ollama embedding response")?;
        if data.embeddings.len() != input.len() {
            bail!(
                "Ollama returned {} embeddings for {} inputs",
                data.embeddings.len(),
                input.len()
            );
        }
        Ok(data.embeddings)
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .context("Ollama returned no embedding")
    }
}

#[async_trait]
impl EmbeddingService for OllamaEmbedding {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_passage(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text).await
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed(texts).await
    }
}
