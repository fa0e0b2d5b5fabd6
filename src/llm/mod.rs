mod rig_model;

use crate::config::{Config, ModelSpec, Provider};
use anyhow::Result;
use async_trait::async_trait;
use rig::providers::{anthropic, gemini, openai};
pub use rig_model::RigModel;
use std::sync::Arc;
use tracing::info;

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, prompt: &Prompt) -> Result<String>;
}

#[derive(Clone)]
pub struct ModelSet {
    pub intent: Arc<dyn LanguageModel>,
    pub extraction: Arc<dyn LanguageModel>,
    pub generation: Arc<dyn LanguageModel>,
}

impl ModelSet {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            intent: create_model(&config.models.intent, config)?,
            extraction: create_model(&config.models.extraction, config)?,
            generation: create_model(&config.models.generation, config)?,
        })
    }
}

pub fn create_model(selection: &ModelSpec, config: &Config) -> Result<Arc<dyn LanguageModel>> {
    let provider = config.provider(selection.provider);
    let key = provider.key.clone().unwrap_or_default();
    info!("Using model {}", selection);

    match selection.provider {
        Provider::OpenAi => {
            let mut builder = openai::CompletionsClient::builder().api_key(&key);
            if let Some(url) = provider.url.as_deref() {
                builder = builder.base_url(url);
            }
            let client: openai::CompletionsClient = builder.build()?;
            Ok(Arc::new(RigModel::new(client, &selection.model)))
        }
        Provider::Gemini => {
            let client = gemini::Client::new(&key)?;
            Ok(Arc::new(RigModel::new(client, &selection.model)))
        }
        Provider::Anthropic => {
            let mut builder = anthropic::Client::builder().api_key(&key);
            if let Some(url) = provider.url.as_deref() {
                builder = builder.base_url(url);
            }
            let client: anthropic::Client = builder.build()?;
            Ok(Arc::new(RigModel::new(client, &selection.model)))
        }
        Provider::Ollama => {
            // Ollama serves an OpenAI-compatible API under /v1 and ignores the key.
            let url = provider.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
            let key = if key.is_empty() { "ollama".to_string() } else { key };
            let base_url = format!("{}/v1", url.trim_end_matches('/'));
            let client: openai::CompletionsClient = openai::CompletionsClient::builder()
                .api_key(&key)
                .base_url(&base_url)
                .build()?;
            Ok(Arc::new(RigModel::new(client, &selection.model)))
        }
    }
}
