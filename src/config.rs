use crate::pipeline::{MissingPolicy, PipelineSettings};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_BIND: &str = "0.0.0.0:8000";
const DEFAULT_TOP_K: usize = 15;

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    storage: StorageConfig,
    models: Option<ModelsConfig>,
    #[serde(default)]
    providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    embedding: EmbeddingConfig,
    #[serde(default)]
    pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerConfig {
    bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StorageConfig {
    data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelsConfig {
    intent: Option<String>,
    extraction: Option<String>,
    generation: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    pub key: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub dimensions: Option<usize>,
    pub api_key: Option<String>,
    pub url: Option<String>,
}

fn default_embedding_provider() -> String {
    "local".to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dimensions: None,
            api_key: None,
            url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PipelineConfig {
    search_top_k: Option<usize>,
    missing_policy: Option<MissingPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
}

impl Provider {
    pub fn name(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::Ollama => "ollama",
        }
    }

    fn needs_key(self) -> bool {
        !matches!(self, Provider::Ollama)
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "gemini" | "google" => Ok(Provider::Gemini),
            "ollama" => Ok(Provider::Ollama),
            other => bail!("unsupported model provider '{}'", other),
        }
    }
}

/// A `provider::model-name` selection for one pipeline role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: Provider,
    pub model: String,
}

impl FromStr for ModelSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((provider, model)) = s.trim().split_once("::") else {
            bail!("expected 'provider::model-name', got '{}'", s);
        };
        if model.is_empty() {
            bail!("model name missing in '{}'", s);
        }
        Ok(Self {
            provider: provider.parse()?,
            model: model.to_string(),
        })
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.provider.name(), self.model)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRoles {
    pub intent: ModelSpec,
    pub extraction: ModelSpec,
    pub generation: ModelSpec,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub models: ModelRoles,
    pub providers: HashMap<String, ProviderConfig>,
    pub embedding: EmbeddingConfig,
    pub pipeline: PipelineSettings,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config_file: ConfigFile =
            toml::from_str(content).context("Failed to parse config file")?;

        let models = config_file
            .models
            .context("Missing [models] section (intent, extraction, generation)")?;
        let models = ModelRoles {
            intent: model_role("intent", models.intent)?,
            extraction: model_role("extraction", models.extraction)?,
            generation: model_role("generation", models.generation)?,
        };

        for selection in [&models.intent, &models.extraction, &models.generation] {
            let has_key = config_file
                .providers
                .get(selection.provider.name())
                .and_then(|p| p.key.as_deref())
                .is_some_and(|k| !k.is_empty());
            if selection.provider.needs_key() && !has_key {
                bail!(
                    "Missing credentials: [providers.{}] key is required for model {}",
                    selection.provider.name(),
                    selection
                );
            }
        }

        let bind = config_file
            .server
            .bind
            .parse()
            .with_context(|| format!("Invalid server bind address: {}", config_file.server.bind))?;

        let search_top_k = config_file.pipeline.search_top_k.unwrap_or(DEFAULT_TOP_K);
        if search_top_k == 0 {
            bail!("pipeline.search_top_k must be at least 1");
        }

        Ok(Self {
            bind,
            data_dir: config_file.storage.data_dir.into(),
            models,
            providers: config_file.providers,
            embedding: config_file.embedding,
            pipeline: PipelineSettings {
                search_top_k,
                missing_policy: config_file.pipeline.missing_policy.unwrap_or_default(),
            },
        })
    }

    pub fn provider(&self, provider: Provider) -> ProviderConfig {
        self.providers
            .get(provider.name())
            .cloned()
            .unwrap_or_default()
    }
}

fn model_role(role: &str, value: Option<String>) -> Result<ModelSpec> {
    let value = value.with_context(|| format!("Missing model selection: models.{}", role))?;
    value
        .parse()
        .with_context(|| format!("Malformed model selection for models.{}", role))
}
