mod error;
mod json;
mod nodes;
mod prompts;
mod state;

pub use error::TurnError;
pub use state::{
    AnswerContent, Attributes, Intent, MissingPolicy, PipelineSettings, PipelineState,
    SuggestedItem, attribute_value_text, merge_attributes, missing_attributes,
};

use crate::embeddings::EmbeddingService;
use crate::llm::ModelSet;
use crate::search::SemanticSearch;
use crate::session::TurnEvent;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    AnalyzeIntent,
    GeneralResponse,
    ExtractAttributes,
    CheckAttributes,
    AskMissing,
    Search,
    Recommend,
}

pub struct Edge {
    pub from: Node,
    pub to: Node,
    pub condition: Option<&'static str>,
}

const fn edge(from: Node, to: Node, condition: Option<&'static str>) -> Edge {
    Edge { from, to, condition }
}

pub const EDGES: &[Edge] = &[
    edge(Node::AnalyzeIntent, Node::GeneralResponse, Some("general")),
    edge(Node::AnalyzeIntent, Node::ExtractAttributes, Some("product_search")),
    edge(Node::ExtractAttributes, Node::CheckAttributes, None),
    edge(Node::CheckAttributes, Node::AskMissing, Some("missing")),
    edge(Node::CheckAttributes, Node::Search, Some("complete")),
    edge(Node::Search, Node::Recommend, None),
];

impl Node {
    pub const ENTRY: Node = Node::AnalyzeIntent;

    pub const ALL: [Node; 7] = [
        Node::AnalyzeIntent,
        Node::GeneralResponse,
        Node::ExtractAttributes,
        Node::CheckAttributes,
        Node::AskMissing,
        Node::Search,
        Node::Recommend,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Node::AnalyzeIntent => "analyze_intent",
            Node::GeneralResponse => "general_response",
            Node::ExtractAttributes => "extract_attributes",
            Node::CheckAttributes => "check_attributes",
            Node::AskMissing => "ask_missing",
            Node::Search => "search_products",
            Node::Recommend => "recommend",
        }
    }

    /// The node after `self`, or `None` once a terminal node has run.
    pub fn next(self, state: &PipelineState) -> Option<Node> {
        match self {
            Node::AnalyzeIntent => match state.intent {
                Some(Intent::ProductSearch) => Some(Node::ExtractAttributes),
                _ => Some(Node::GeneralResponse),
            },
            Node::ExtractAttributes => Some(Node::CheckAttributes),
            Node::CheckAttributes if state.missing_attributes.is_empty() => Some(Node::Search),
            Node::CheckAttributes => Some(Node::AskMissing),
            Node::Search => Some(Node::Recommend),
            Node::GeneralResponse | Node::AskMissing | Node::Recommend => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn mermaid() -> String {
    let mut out = String::from("flowchart TD\n");
    out.push_str(&format!("    start([start]) --> {}\n", Node::ENTRY));
    for e in EDGES {
        match e.condition {
            Some(label) => out.push_str(&format!("    {} -->|{}| {}\n", e.from, label, e.to)),
            None => out.push_str(&format!("    {} --> {}\n", e.from, e.to)),
        }
    }
    for node in Node::ALL {
        if !EDGES.iter().any(|e| e.from == node) {
            out.push_str(&format!("    {} --> done([end])\n", node));
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub answer: AnswerContent,
    pub extracted_attributes: Attributes,
    pub missing_attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(TurnOutcome),
    Cancelled,
}

pub struct Pipeline {
    models: ModelSet,
    embedder: Arc<dyn EmbeddingService>,
    search: SemanticSearch,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        models: ModelSet,
        embedder: Arc<dyn EmbeddingService>,
        search: SemanticSearch,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            models,
            embedder,
            search,
            settings,
        }
    }

    /// Runs nodes one after another until a terminal node produces the
    /// answer. Stops early, without an answer, once `events` is closed.
    pub async fn run(
        &self,
        mut state: PipelineState,
        events: &mpsc::Sender<TurnEvent>,
    ) -> Result<RunOutcome, TurnError> {
        let mut node = Node::ENTRY;
        loop {
            if events.is_closed() {
                info!("Client gone, stopping before {}", node);
                return Ok(RunOutcome::Cancelled);
            }

            info!("Running node {}", node);
            self.execute(node, &mut state, events).await?;

            match node.next(&state) {
                Some(next) => node = next,
                None => break,
            }
        }

        if events.is_closed() {
            return Ok(RunOutcome::Cancelled);
        }

        let answer = state
            .final_response
            .take()
            .unwrap_or_else(|| AnswerContent::plain(nodes::GENERAL_FALLBACK));
        // Recomputed on every path, CheckAttributes only runs for searches.
        let missing = missing_attributes(
            &state.bot_config.required_attributes,
            &state.extracted_attributes,
            self.settings.missing_policy,
        );
        Ok(RunOutcome::Completed(TurnOutcome {
            answer,
            extracted_attributes: state.extracted_attributes,
            missing_attributes: missing,
        }))
    }

    async fn execute(
        &self,
        node: Node,
        state: &mut PipelineState,
        events: &mpsc::Sender<TurnEvent>,
    ) -> Result<(), TurnError> {
        match node {
            Node::AnalyzeIntent => {
                self.analyze_intent(state).await;
                if let Some(intent) = state.intent {
                    let _ = events
                        .send(TurnEvent::status(format!("Intent: {}", intent.label())))
                        .await;
                }
            }
            Node::GeneralResponse => self.general_response(state).await,
            Node::ExtractAttributes => self.extract_attributes(state).await,
            Node::CheckAttributes => self.check_attributes(state),
            Node::AskMissing => self.ask_missing(state).await,
            Node::Search => self.search(state, events).await?,
            Node::Recommend => self.recommend(state).await,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEmbedding, Fixture, ScriptedModel, product};
    use serde_json::{Value, json};

    async fn run(
        fixture: &Fixture,
        pipeline: &Pipeline,
        input: &str,
        prior: Attributes,
    ) -> (Result<RunOutcome, TurnError>, Vec<TurnEvent>) {
        let (tx, mut rx) = mpsc::channel(16);
        let state = PipelineState::new(input, Vec::new(), fixture.ctx.clone(), fixture.config.clone(), prior);
        let result = pipeline.run(state, &tx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (result, events)
    }

    fn completed(result: Result<RunOutcome, TurnError>) -> TurnOutcome {
        match result {
            Ok(RunOutcome::Completed(outcome)) => outcome,
            other => panic!("expected a completed turn, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn greeting_gets_a_general_answer() {
        let fixture = Fixture::new(json!({"color": "string"})).await;
        let intent = ScriptedModel::replies(["{\"intent\": \"general_shopping_query\"}"]);
        let generation = ScriptedModel::replies(["Hello! How can I help you shop today?"]);
        let embedder = FakeEmbedding::new();
        let pipeline = fixture.pipeline(intent, ScriptedModel::silent(), generation, embedder.clone());

        let (result, events) = run(&fixture, &pipeline, "Hello", Attributes::new()).await;
        let outcome = completed(result);

        assert!(!outcome.answer.text.is_empty());
        assert!(outcome.answer.item_suggested.is_empty());
        assert_eq!(events, vec![TurnEvent::status("Intent: general")]);
        assert_eq!(embedder.query_calls(), 0);
    }

    #[tokio::test]
    async fn product_request_with_an_attribute_searches() {
        let fixture = Fixture::new(json!({"color": "string"})).await;
        let embedder = FakeEmbedding::new();
        for i in 0..20 {
            fixture
                .store
                .insert_product(product(&format!("red dress {i}"), &embedder).await)
                .await
                .unwrap();
        }
        let pipeline = fixture.pipeline(
            ScriptedModel::replies(["```json\n{\"intent\": \"product_search\"}\n```"]),
            ScriptedModel::replies(["{\"extracted_attributes\": {\"color\": \"red\"}}"]),
            ScriptedModel::replies(["These dresses would look great on you."]),
            embedder.clone(),
        );

        let (result, events) = run(&fixture, &pipeline, "show me red dresses", Attributes::new()).await;
        let outcome = completed(result);

        assert!(outcome.missing_attributes.is_empty());
        assert_eq!(outcome.extracted_attributes.get("color"), Some(&json!("red")));
        let items = &outcome.answer.item_suggested;
        assert!(!items.is_empty() && items.len() <= 15);
        for item in serde_json::to_value(items).unwrap().as_array().unwrap() {
            let mut keys: Vec<&str> = item.as_object().unwrap().keys().map(String::as_str).collect();
            keys.sort_unstable();
            assert_eq!(keys, vec!["image", "name", "price"]);
        }
        assert_eq!(
            events,
            vec![
                TurnEvent::status("Intent: product_search"),
                TurnEvent::status("Searching products..."),
            ]
        );
        assert_eq!(embedder.query_calls(), 1);
    }

    #[tokio::test]
    async fn missing_attributes_lead_to_a_question_without_search() {
        let fixture = Fixture::new(json!({"color": "string", "size": "string"})).await;
        let embedder = FakeEmbedding::new();
        let generation = ScriptedModel::replies(["<think>ask</think>What color and size would you like?"]);
        let pipeline = fixture.pipeline(
            ScriptedModel::replies(["{\"intent\": \"product_search\"}"]),
            ScriptedModel::replies(["{\"extracted_attributes\": {}}"]),
            generation.clone(),
            embedder.clone(),
        );

        let (result, _) = run(&fixture, &pipeline, "I want shoes", Attributes::new()).await;
        let outcome = completed(result);

        assert_eq!(outcome.missing_attributes, vec!["color", "size"]);
        assert_eq!(outcome.answer.text, "What color and size would you like?");
        assert!(outcome.answer.item_suggested.is_empty());
        assert_eq!(embedder.query_calls(), 0);
        assert!(generation.last_prompt().unwrap().system.contains("color, size"));
    }

    #[tokio::test]
    async fn unparseable_or_failed_intent_falls_back_to_general() {
        let fixture = Fixture::new(json!({})).await;
        for intent in [ScriptedModel::replies(["I think they want shoes"]), ScriptedModel::failing()] {
            let pipeline = fixture.pipeline(
                intent,
                ScriptedModel::silent(),
                ScriptedModel::replies(["Happy to help."]),
                FakeEmbedding::new(),
            );
            let (result, events) = run(&fixture, &pipeline, "hmm", Attributes::new()).await;
            assert_eq!(completed(result).answer.text, "Happy to help.");
            assert_eq!(events, vec![TurnEvent::status("Intent: general")]);
        }
    }

    #[tokio::test]
    async fn generation_failures_use_fixed_fallbacks() {
        let fixture = Fixture::new(json!({"color": "string"})).await;
        let pipeline = fixture.pipeline(
            ScriptedModel::replies(["{\"intent\": \"general\"}"]),
            ScriptedModel::silent(),
            ScriptedModel::failing(),
            FakeEmbedding::new(),
        );
        let (result, _) = run(&fixture, &pipeline, "hi", Attributes::new()).await;
        assert_eq!(completed(result).answer.text, nodes::GENERAL_FALLBACK);

        let pipeline = fixture.pipeline(
            ScriptedModel::replies(["{\"intent\": \"product_search\"}"]),
            ScriptedModel::replies(["{}"]),
            ScriptedModel::failing(),
            FakeEmbedding::new(),
        );
        let (result, _) = run(&fixture, &pipeline, "shoes", Attributes::new()).await;
        assert_eq!(completed(result).answer.text, nodes::ASK_FALLBACK);
    }

    #[tokio::test]
    async fn bad_extraction_keeps_earlier_attributes() {
        let fixture = Fixture::new(json!({"color": "string", "size": "string"})).await;
        let mut prior = Attributes::new();
        prior.insert("color".into(), Value::from("red"));
        let pipeline = fixture.pipeline(
            ScriptedModel::replies(["{\"intent\": \"product_search\"}"]),
            ScriptedModel::replies(["not json at all"]),
            ScriptedModel::replies(["unused"]),
            FakeEmbedding::new(),
        );

        let (result, _) = run(&fixture, &pipeline, "something nice", prior.clone()).await;
        let outcome = completed(result);
        assert_eq!(outcome.extracted_attributes, prior);
        assert!(outcome.missing_attributes.is_empty());
        assert_eq!(outcome.answer.text, nodes::NO_MATCHES);
    }

    #[tokio::test]
    async fn embedding_failure_is_search_unavailable() {
        let fixture = Fixture::new(json!({"color": "string"})).await;
        let pipeline = fixture.pipeline(
            ScriptedModel::replies(["{\"intent\": \"product_search\"}"]),
            ScriptedModel::replies(["{\"extracted_attributes\": {\"color\": \"red\"}}"]),
            ScriptedModel::silent(),
            FakeEmbedding::failing(),
        );

        let (result, _) = run(&fixture, &pipeline, "red dress", Attributes::new()).await;
        assert!(matches!(result, Err(TurnError::SearchUnavailable(_))));
    }

    #[tokio::test]
    async fn closed_receiver_stops_before_any_node() {
        let fixture = Fixture::new(json!({})).await;
        let intent = ScriptedModel::replies(["{\"intent\": \"general\"}"]);
        let pipeline = fixture.pipeline(
            intent.clone(),
            ScriptedModel::silent(),
            ScriptedModel::replies(["hi"]),
            FakeEmbedding::new(),
        );

        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let state = PipelineState::new("hi", Vec::new(), fixture.ctx.clone(), fixture.config.clone(), Attributes::new());
        let result = pipeline.run(state, &tx).await.unwrap();

        assert_eq!(result, RunOutcome::Cancelled);
        assert_eq!(intent.calls(), 0);
    }

    #[test]
    fn transition_table_matches_edges() {
        let mut seen = Vec::new();
        for e in EDGES {
            seen.push((e.from, e.to));
        }
        for (from, to) in [
            (Node::AnalyzeIntent, Node::GeneralResponse),
            (Node::AnalyzeIntent, Node::ExtractAttributes),
            (Node::CheckAttributes, Node::AskMissing),
            (Node::CheckAttributes, Node::Search),
        ] {
            assert!(seen.contains(&(from, to)));
        }
        let diagram = mermaid();
        for node in Node::ALL {
            assert!(diagram.contains(node.name()));
        }
        assert!(diagram.contains("recommend --> done([end])"));
    }
}
