mod events;

pub use events::TurnEvent;

use crate::pipeline::{Pipeline, PipelineState, RunOutcome, TurnError};
use crate::store::{EntityKind, MessagePayload, Sender, StoredMessage, TenantStore};
use crate::tenant::{TenantContext, TenantStorageRouter};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const EVENT_BUFFER: usize = 16;
const ANONYMOUS_OWNER: &str = "anonymous";

#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    pub prompt: String,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

pub struct PreparedTurn {
    room_id: String,
    store: Arc<TenantStore>,
    state: PipelineState,
}

pub struct TurnStream {
    pub room_id: String,
    pub events: mpsc::Receiver<TurnEvent>,
    pub driver: JoinHandle<()>,
}

#[derive(Clone)]
pub struct StreamingSession {
    router: Arc<TenantStorageRouter>,
    pipeline: Arc<Pipeline>,
}

impl StreamingSession {
    pub fn new(router: Arc<TenantStorageRouter>, pipeline: Arc<Pipeline>) -> Self {
        Self { router, pipeline }
    }

    /// Checks everything a turn needs before any event is produced, then
    /// stores the user's message so history stays consistent even if the
    /// turn fails later.
    pub async fn prepare(
        &self,
        ctx: TenantContext,
        request: TurnRequest,
    ) -> Result<PreparedTurn, TurnError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(TurnError::InvalidRequest("prompt must not be empty".into()));
        }

        let store = self
            .router
            .tenant_store(EntityKind::BotConfiguration, &ctx)
            .await?;
        let config = store.bot_config().await?.ok_or_else(|| {
            TurnError::Configuration(format!("tenant {} has no bot configuration", store.slug()))
        })?;

        let room = match request.room_id {
            Some(room_id) => store
                .find_room(&room_id)
                .await?
                .ok_or_else(|| TurnError::RoomNotFound(room_id.clone()))?,
            None => {
                let owner = request.user.as_deref().unwrap_or(ANONYMOUS_OWNER);
                store.create_room(owner).await?
            }
        };

        let history = store.messages(&room.id).await?;
        store
            .append_message(&room.id, Sender::User, &MessagePayload::Text(prompt.to_string()))
            .await?;

        let state = PipelineState::new(prompt, history, ctx, config, room.extracted_attributes);
        Ok(PreparedTurn {
            room_id: room.id,
            store,
            state,
        })
    }

    pub fn stream(&self, turn: PreparedTurn) -> TurnStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let room_id = turn.room_id.clone();
        let driver = tokio::spawn(drive(self.pipeline.clone(), turn, tx));
        TurnStream {
            room_id,
            events: rx,
            driver,
        }
    }

    pub async fn room_messages(
        &self,
        ctx: &TenantContext,
        room_id: &str,
    ) -> Result<Vec<StoredMessage>, TurnError> {
        let store = self.router.tenant_store(EntityKind::Message, ctx).await?;
        if store.find_room(room_id).await?.is_none() {
            return Err(TurnError::RoomNotFound(room_id.to_string()));
        }
        Ok(store.messages(room_id).await?)
    }
}

async fn drive(pipeline: Arc<Pipeline>, turn: PreparedTurn, tx: mpsc::Sender<TurnEvent>) {
    let PreparedTurn {
        room_id,
        store,
        state,
    } = turn;

    let result = tokio::select! {
        result = pipeline.run(state, &tx) => result,
        _ = tx.closed() => Ok(RunOutcome::Cancelled),
    };

    match result {
        Ok(RunOutcome::Completed(outcome)) => {
            let reply = MessagePayload::Answer(outcome.answer.clone());
            if tx.send(TurnEvent::Answer(outcome.answer)).await.is_err() {
                info!("Room {}: client left before the answer, discarding it", room_id);
                return;
            }
            if let Err(e) = store
                .complete_turn(
                    &room_id,
                    &reply,
                    &outcome.extracted_attributes,
                    &outcome.missing_attributes,
                )
                .await
            {
                error!(
                    tenant = %store.slug(),
                    room = %room_id,
                    "Answer delivered but not persisted: {}",
                    e
                );
                let _ = tx
                    .send(TurnEvent::Error(format!("Failed to save the conversation: {}", e)))
                    .await;
            }
        }
        Ok(RunOutcome::Cancelled) => {
            info!("Room {}: turn cancelled, nothing persisted", room_id);
        }
        Err(e) => {
            warn!(tenant = %store.slug(), room = %room_id, "Turn failed: {}", e);
            let _ = tx.send(TurnEvent::Error(e.to_string())).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::AnswerContent;
    use crate::store::StoreError;
    use crate::testing::{FakeEmbedding, Fixture, GatedModel, ScriptedModel, product};
    use serde_json::json;

    fn request(prompt: &str, room_id: Option<&str>) -> TurnRequest {
        TurnRequest {
            prompt: prompt.into(),
            room_id: room_id.map(String::from),
            user: Some("alice".into()),
        }
    }

    async fn collect(mut stream: TurnStream) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Some(event) = stream.events.recv().await {
            events.push(event);
        }
        stream.driver.await.unwrap();
        events
    }

    fn session(fixture: &Fixture, pipeline: Pipeline) -> StreamingSession {
        StreamingSession::new(fixture.router.clone(), Arc::new(pipeline))
    }

    #[tokio::test]
    async fn successful_turn_streams_then_persists_both_messages() {
        let fixture = Fixture::new(json!({"color": "string"})).await;
        let session = session(
            &fixture,
            fixture.pipeline(
                ScriptedModel::replies(["{\"intent\": \"general\"}"]),
                ScriptedModel::silent(),
                ScriptedModel::replies(["Hi! What are you shopping for?"]),
                FakeEmbedding::new(),
            ),
        );

        let turn = session.prepare(fixture.ctx.clone(), request("Hello", None)).await.unwrap();
        let stream = session.stream(turn);
        let room_id = stream.room_id.clone();
        let events = collect(stream).await;

        assert_eq!(
            events,
            vec![
                TurnEvent::status("Intent: general"),
                TurnEvent::Answer(AnswerContent::plain("Hi! What are you shopping for?")),
            ]
        );

        let messages = session.room_messages(&fixture.ctx, &room_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[0].payload, MessagePayload::Text("Hello".into()));
        assert_eq!(messages[1].sender, Sender::Bot);
        assert_eq!(
            messages[1].payload,
            MessagePayload::Answer(AnswerContent::plain("Hi! What are you shopping for?"))
        );
        assert_eq!(fixture.store.find_room(&room_id).await.unwrap().unwrap().owner, "alice");
    }

    #[tokio::test]
    async fn follow_up_turn_sees_history_and_accumulated_attributes() {
        let fixture = Fixture::new(json!({"color": "string", "size": "string"})).await;
        let embedder = FakeEmbedding::new();
        fixture
            .store
            .insert_product(product("red dress", &embedder).await)
            .await
            .unwrap();
        let intent = ScriptedModel::replies([
            "{\"intent\": \"product_search\"}",
            "{\"intent\": \"product_search\"}",
        ]);
        let session = session(
            &fixture,
            fixture.pipeline(
                intent.clone(),
                ScriptedModel::replies([
                    "{\"extracted_attributes\": {\"color\": \"red\"}}",
                    "{\"extracted_attributes\": {\"size\": \"M\"}}",
                ]),
                ScriptedModel::replies(["A red dress it is.", "Here is one in M."]),
                embedder,
            ),
        );

        let turn = session.prepare(fixture.ctx.clone(), request("red dress", None)).await.unwrap();
        let stream = session.stream(turn);
        let room_id = stream.room_id.clone();
        collect(stream).await;

        let turn = session
            .prepare(fixture.ctx.clone(), request("size M please", Some(&room_id)))
            .await
            .unwrap();
        let events = collect(session.stream(turn)).await;
        assert!(matches!(events.last(), Some(TurnEvent::Answer(a)) if a.item_suggested.len() == 1));

        assert!(intent.last_prompt().unwrap().system.contains("User: red dress"));
        let room = fixture.store.find_room(&room_id).await.unwrap().unwrap();
        assert_eq!(room.extracted_attributes.get("color"), Some(&json!("red")));
        assert_eq!(room.extracted_attributes.get("size"), Some(&json!("M")));
        assert!(room.missing_attributes.is_empty());

        let senders: Vec<Sender> = fixture
            .store
            .messages(&room_id)
            .await
            .unwrap()
            .iter()
            .map(|m| m.sender)
            .collect();
        assert_eq!(senders, vec![Sender::User, Sender::Bot, Sender::User, Sender::Bot]);
    }

    #[tokio::test]
    async fn failed_turn_keeps_the_user_message_only() {
        let fixture = Fixture::new(json!({"color": "string"})).await;
        let session = session(
            &fixture,
            fixture.pipeline(
                ScriptedModel::replies(["{\"intent\": \"product_search\"}"]),
                ScriptedModel::replies(["{\"extracted_attributes\": {\"color\": \"blue\"}}"]),
                ScriptedModel::silent(),
                FakeEmbedding::failing(),
            ),
        );

        let turn = session.prepare(fixture.ctx.clone(), request("blue shirt", None)).await.unwrap();
        let stream = session.stream(turn);
        let room_id = stream.room_id.clone();
        let events = collect(stream).await;

        assert!(matches!(events.last(), Some(TurnEvent::Error(msg)) if msg.contains("search unavailable")));
        assert!(!events.iter().any(|e| matches!(e, TurnEvent::Answer(_))));

        let messages = fixture.store.messages(&room_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, Sender::User);
        let room = fixture.store.find_room(&room_id).await.unwrap().unwrap();
        assert!(room.extracted_attributes.is_empty());
    }

    #[tokio::test]
    async fn disconnect_persists_no_bot_message() {
        let fixture = Fixture::new(json!({})).await;
        let intent = ScriptedModel::replies(["{\"intent\": \"general\"}"]);
        let session = session(
            &fixture,
            fixture.pipeline(
                intent.clone(),
                ScriptedModel::silent(),
                ScriptedModel::replies(["hi"]),
                FakeEmbedding::new(),
            ),
        );

        let turn = session.prepare(fixture.ctx.clone(), request("Hello", None)).await.unwrap();
        let TurnStream {
            room_id,
            events,
            driver,
        } = session.stream(turn);
        drop(events);
        driver.await.unwrap();

        assert_eq!(intent.calls(), 0);
        let messages = fixture.store.messages(&room_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, Sender::User);
    }

    #[tokio::test]
    async fn disconnect_mid_turn_discards_the_in_flight_call() {
        let fixture = Fixture::new(json!({"color": "string"})).await;
        let extraction = GatedModel::new("{\"extracted_attributes\": {\"color\": \"red\"}}");
        let generation = ScriptedModel::replies(["unused"]);
        let embedder = FakeEmbedding::new();
        let session = session(
            &fixture,
            fixture.pipeline(
                ScriptedModel::replies(["{\"intent\": \"product_search\"}"]),
                extraction.clone(),
                generation.clone(),
                embedder.clone(),
            ),
        );

        let turn = session.prepare(fixture.ctx.clone(), request("red dress", None)).await.unwrap();
        let TurnStream {
            room_id,
            mut events,
            driver,
        } = session.stream(turn);

        assert_eq!(events.recv().await, Some(TurnEvent::status("Intent: product_search")));
        extraction.entered.notified().await;
        drop(events);
        extraction.release.notify_one();
        driver.await.unwrap();

        assert_eq!(extraction.calls(), 1);
        assert_eq!(generation.calls(), 0);
        assert_eq!(embedder.query_calls(), 0);
        let messages = fixture.store.messages(&room_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, Sender::User);
        let room = fixture.store.find_room(&room_id).await.unwrap().unwrap();
        assert!(room.extracted_attributes.is_empty());
    }

    #[tokio::test]
    async fn general_turn_still_records_missing_attributes() {
        let fixture = Fixture::new(json!({"color": "string", "size": "string"})).await;
        let session = session(
            &fixture,
            fixture.pipeline(
                ScriptedModel::replies([
                    "{\"intent\": \"product_search\"}",
                    "{\"intent\": \"general\"}",
                ]),
                ScriptedModel::replies(["{\"extracted_attributes\": {}}"]),
                ScriptedModel::replies(["Which color and size?", "Hello there!"]),
                FakeEmbedding::new(),
            ),
        );

        let turn = session.prepare(fixture.ctx.clone(), request("I want shoes", None)).await.unwrap();
        let stream = session.stream(turn);
        let room_id = stream.room_id.clone();
        collect(stream).await;
        let room = fixture.store.find_room(&room_id).await.unwrap().unwrap();
        assert_eq!(room.missing_attributes, vec!["color", "size"]);

        let turn = session
            .prepare(fixture.ctx.clone(), request("Hello", Some(&room_id)))
            .await
            .unwrap();
        let events = collect(session.stream(turn)).await;
        assert_eq!(events.last(), Some(&TurnEvent::Answer(AnswerContent::plain("Hello there!"))));

        let room = fixture.store.find_room(&room_id).await.unwrap().unwrap();
        assert_eq!(room.missing_attributes, vec!["color", "size"]);
    }

    #[tokio::test]
    async fn preconditions_fail_before_streaming() {
        let fixture = Fixture::new(json!({})).await;
        let session = session(
            &fixture,
            fixture.pipeline(
                ScriptedModel::silent(),
                ScriptedModel::silent(),
                ScriptedModel::silent(),
                FakeEmbedding::new(),
            ),
        );

        let err = session.prepare(fixture.ctx.clone(), request("   ", None)).await.err().unwrap();
        assert!(matches!(err, TurnError::InvalidRequest(_)));

        let err = session
            .prepare(fixture.ctx.clone(), request("hi", Some("no-such-room")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TurnError::RoomNotFound(_)));

        let err = session
            .prepare(TenantContext::none(), request("hi", None))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TurnError::Storage(StoreError::ContextMissing { .. })));

        let other = TenantContext::for_tenant(crate::tenant::TenantSlug::parse("globex").unwrap());
        let err = session.prepare(other, request("hi", None)).await.err().unwrap();
        assert!(matches!(err, TurnError::Configuration(_)));
    }
}
