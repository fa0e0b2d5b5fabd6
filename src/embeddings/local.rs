use crate::embeddings::types::EmbeddingService;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const LOCAL_DIM: usize = 384;
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const IDLE_CHECK: Duration = Duration::from_secs(60);

pub struct LocalEmbedding {
    model: Arc<Mutex<Option<TextEmbedding>>>,
    cache_dir: PathBuf,
    last_used: Arc<Mutex<Instant>>,
}

impl LocalEmbedding {
    pub fn new(cache_dir: &Path) -> Self {
        info!(
            "Local embeddings (lazy loading, {}s idle timeout)",
            IDLE_TIMEOUT.as_secs()
        );
        Self {
            model: Arc::new(Mutex::new(None)),
            cache_dir: cache_dir.to_path_buf(),
            last_used: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn start_unload_timer(&self) {
        let model = self.model.clone();
        let last_used = self.last_used.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(IDLE_CHECK).await;
                let Ok(elapsed) = last_used.lock().map(|last| last.elapsed()) else {
                    continue;
                };
                if elapsed < IDLE_TIMEOUT {
                    continue;
                }
                let Ok(mut guard) = model.lock() else {
                    continue;
                };
                if guard.take().is_some() {
                    info!("Embedding model unloaded (idle for {}s)", elapsed.as_secs());
                }
            }
        });
    }

    /// e5 models expect a `query: ` or `passage: ` marker on every input.
    async fn embed(&self, prefix: &'static str, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<String> = texts.into_iter().map(|t| format!("{prefix}{t}")).collect();
        let expected = inputs.len();
        let model = self.model.clone();
        let cache_dir = self.cache_dir.clone();
        let last_used = self.last_used.clone();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|e| anyhow!("model lock poisoned: {e}"))?;
            let model = ensure_loaded(&mut guard, &cache_dir)?;
            *last_used
                .lock()
                .map_err(|e| anyhow!("last_used lock poisoned: {e}"))? = Instant::now();
            Ok::<_, anyhow::Error>(model.embed(inputs, None)?)
        })
        .await
        .context("Embedding task panicked")??;

        if vectors.len() != expected {
            anyhow::bail!("embedding model returned {} of {} vectors", vectors.len(), expected);
        }
        debug!("Embedded {} inputs locally", expected);
        Ok(vectors)
    }

    async fn embed_one(&self, prefix: &'static str, text: &str) -> Result<Vec<f32>> {
        self.embed(prefix, vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .context("embedding model returned empty result")
    }
}

#[async_trait]
impl EmbeddingService for LocalEmbedding {
    fn dimensions(&self) -> usize {
        LOCAL_DIM
    }

    async fn embed_passage(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one("passage: ", text).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one("query: ", text).await
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed("passage: ", texts.to_vec()).await
    }
}

fn ensure_loaded<'a>(
    slot: &'a mut Option<TextEmbedding>,
    cache_dir: &Path,
) -> Result<&'a mut TextEmbedding> {
    if slot.is_none() {
        info!("Loading embedding model (multilingual-e5-small)...");
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::MultilingualE5Small)
                .with_cache_dir(cache_dir.to_path_buf())
                .with_show_download_progress(true),
        )
        .context("Failed to initialize embedding model")?;
        info!("Embedding model ready");
        *slot = Some(model);
    }
    slot.as_mut().context("embedding model not loaded")
}
