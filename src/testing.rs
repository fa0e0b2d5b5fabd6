//! Fakes and fixtures shared by unit tests.

use crate::embeddings::EmbeddingService;
use crate::llm::{LanguageModel, ModelSet, Prompt};
use crate::pipeline::{Attributes, Pipeline, PipelineSettings};
use crate::search::SemanticSearch;
use crate::store::{BotConfig, EntityKind, IntentExamples, NewProduct, TenantStore};
use crate::tenant::{TenantContext, TenantSlug, TenantStorageRouter};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;

/// Answers with canned replies in order, then errors.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    fail: bool,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedModel {
    pub fn replies<I>(replies: I) -> Arc<Self>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            fail: false,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn silent() -> Arc<Self> {
        Self::replies(Vec::<String>::new())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fail: true,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<Prompt> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn invoke(&self, prompt: &Prompt) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        if self.fail {
            bail!("model unavailable");
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted reply left"))
    }
}

/// Bag-of-words vectors: texts sharing words land close together.
pub struct FakeEmbedding {
    fail: bool,
    reject: Option<&'static str>,
    query_calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

const FAKE_DIM: usize = 16;

impl FakeEmbedding {
    fn build(fail: bool, reject: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            fail,
            reject,
            query_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
        })
    }

    pub fn new() -> Arc<Self> {
        Self::build(false, None)
    }

    pub fn failing() -> Arc<Self> {
        Self::build(true, None)
    }

    pub fn rejecting(word: &'static str) -> Arc<Self> {
        Self::build(false, Some(word))
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            bail!("embedding backend down");
        }
        if let Some(word) = self.reject.filter(|w| text.contains(w)) {
            bail!("cannot embed text containing '{}'", word);
        }
        let mut v = vec![0.0; FAKE_DIM];
        for word in text.split_whitespace() {
            let word = word.to_lowercase();
            let bucket = word.bytes().map(usize::from).sum::<usize>() % FAKE_DIM;
            v[bucket] += 1.0;
        }
        Ok(v)
    }
}

#[async_trait]
impl EmbeddingService for FakeEmbedding {
    fn dimensions(&self) -> usize {
        FAKE_DIM
    }

    async fn embed_passage(&self, text: &str) -> Result<Vec<f32>> {
        self.vector(text)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.vector(text)
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        texts.iter().map(|t| self.vector(t)).collect()
    }
}

/// Replies once `release` is notified, after signalling `entered`.
pub struct GatedModel {
    pub entered: Notify,
    pub release: Notify,
    reply: String,
    calls: AtomicUsize,
}

impl GatedModel {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Notify::new(),
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for GatedModel {
    async fn invoke(&self, _prompt: &Prompt) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.reply.clone())
    }
}

pub fn attributes(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub fn bot_config(schema: Value) -> BotConfig {
    BotConfig {
        name: "Acme Outfitters".into(),
        system_prompt: "You are a friendly shopping assistant.".into(),
        intent_examples: IntentExamples::default(),
        attribute_extraction_prompt: "Extract color and size.".into(),
        required_attributes: attributes(schema),
        product_recommendation_prompt: String::new(),
    }
}

pub async fn product(name: &str, embedder: &FakeEmbedding) -> NewProduct {
    let mut product = NewProduct {
        name: name.to_string(),
        price: 25.0,
        attributes: Attributes::new(),
        image: Some(format!("{}.jpg", name.replace(' ', "-"))),
        created_at: None,
        embedding: None,
    };
    product.embedding = embedder.embed_passage(name).await.ok();
    product
}

pub struct Fixture {
    pub dir: TempDir,
    pub router: Arc<TenantStorageRouter>,
    pub ctx: TenantContext,
    pub store: Arc<TenantStore>,
    pub config: BotConfig,
}

impl Fixture {
    pub async fn new(schema: Value) -> Self {
        let dir = TempDir::new().unwrap();
        let router = TenantStorageRouter::open(dir.path()).await.unwrap();
        let slug = TenantSlug::parse("acme").unwrap();
        router.register_tenant(&slug, "Acme").await.unwrap();
        let ctx = TenantContext::for_tenant(slug);
        let store = router
            .tenant_store(EntityKind::BotConfiguration, &ctx)
            .await
            .unwrap();
        let config = bot_config(schema);
        store.replace_bot_config(&config).await.unwrap();

        Self {
            dir,
            router,
            ctx,
            store,
            config,
        }
    }

    pub fn pipeline(
        &self,
        intent: Arc<dyn LanguageModel>,
        extraction: Arc<dyn LanguageModel>,
        generation: Arc<dyn LanguageModel>,
        embedder: Arc<FakeEmbedding>,
    ) -> Pipeline {
        Pipeline::new(
            ModelSet {
                intent,
                extraction,
                generation,
            },
            embedder,
            SemanticSearch::new(self.router.clone()),
            PipelineSettings::default(),
        )
    }
}
