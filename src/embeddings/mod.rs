mod gemini;
mod local;
mod ollama;
mod types;

use crate::config::Config;
use anyhow::{Result, bail};
pub use gemini::GeminiEmbedding;
pub use local::LocalEmbedding;
pub use ollama::OllamaEmbedding;
use std::sync::Arc;
pub use types::EmbeddingService;

pub fn create_embedding_service(config: &Config) -> Result<Arc<dyn EmbeddingService>> {
    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "gemini" => {
            let api_key = embedding
                .api_key
                .clone()
                .or_else(|| config.provider(crate::config::Provider::Gemini).key);
            let Some(api_key) = api_key else {
                bail!("Gemini embeddings need embedding.api_key or [providers.gemini] key");
            };
            Ok(Arc::new(GeminiEmbedding::new(
                &api_key,
                embedding.model.as_deref(),
                embedding.dimensions,
            )))
        }
        "ollama" => {
            let url = embedding
                .url
                .clone()
                .or_else(|| config.provider(crate::config::Provider::Ollama).url);
            Ok(Arc::new(OllamaEmbedding::new(
                url.as_deref(),
                embedding.model.as_deref(),
                embedding.dimensions,
            )))
        }
        "local" => {
            let local = LocalEmbedding::new(&config.data_dir.join("models"));
            local.start_unload_timer();
            Ok(Arc::new(local))
        }
        other => bail!("Unknown embedding provider '{}'", other),
    }
}
