use crate::embeddings::types::EmbeddingService;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

const GEMINI_DEFAULT_DIM: usize = 768;
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const BATCH_LIMIT: usize = 100;

pub struct GeminiEmbedding {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Values,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Values>,
}

#[derive(Deserialize)]
struct Values {
    values: Vec<f32>,
}

impl GeminiEmbedding {
    pub fn new(api_key: &str, model: Option<&str>, dimensions: Option<usize>) -> Self {
        let model = model.unwrap_or("gemini-embedding-001");
        let dimensions = dimensions.unwrap_or(GEMINI_DEFAULT_DIM);
        info!(
            "Gemini embeddings (model: {}, dim: {})",
            model, dimensions
        );
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            dimensions,
        }
    }

    fn request(&self, text: &str, task_type: &str) -> serde_json::Value {
        json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] },
            "taskType": task_type,
            "outputDimensionality": self.dimensions
        })
    }

    async fn post<T: for<'de> Deserialize<'de>>(&self, method: &str, body: &serde_json::Value) -> Result<T> {
        let url = format!("{}/models/{}:{}", GEMINI_BASE_URL, self.model, method);
        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Gemini embedding API error: {} {}", status, body);
        }

        resp.json().await.context("Malformed Gemini embedding response")
    }

    async fn embed(&self, text: &str, task_type: &str) -> Result<Vec<f32>> {
        let data: EmbedResponse = self
            .post("embedContent", &self.request(text, task_type))
            .await?;
        Ok(data.embedding.values)
    }
}

#[async_trait]
impl EmbeddingService for GeminiEmbedding {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_passage(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text, "RETRIEVAL_DOCUMENT").await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text, "RETRIEVAL_QUERY").await
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_LIMIT) {
            let requests: Vec<_> = chunk
                .iter()
                .map(|t| self.request(t, "RETRIEVAL_DOCUMENT"))
                .collect();
            let data: BatchEmbedResponse = self
                .post("batchEmbedContents", &json!({ "requests": requests }))
                .await?;
            if data.embeddings.len() != chunk.len() {
                bail!(
                    "Gemini returned {} embeddings for {} inputs",
                    data.embeddings.len(),
                    chunk.len()
                );
            }
            vectors.extend(data.embeddings.into_iter().map(|e| e.values));
        }
        Ok(vectors)
    }
}
