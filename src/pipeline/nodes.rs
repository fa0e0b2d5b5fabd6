use super::json::{parse_json, strip_reasoning};
use super::state::{
    AnswerContent, Attributes, Intent, PipelineState, SuggestedItem, merge_attributes,
    missing_attributes,
};
use super::{Pipeline, TurnError, prompts};
use crate::session::TurnEvent;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub(super) const GENERAL_FALLBACK: &str =
    "Sorry, I'm having trouble answering right now. Could you try again in a moment?";
pub(super) const ASK_FALLBACK: &str =
    "Could you please provide more details about what you're looking for?";
pub(super) const RECOMMEND_FALLBACK: &str =
    "Here are some products that match what you're looking for.";
pub(super) const NO_MATCHES: &str =
    "I couldn't find products matching that yet. Could you tell me a bit more about what you're looking for?";

#[derive(Deserialize)]
struct IntentReply {
    intent: String,
}

#[derive(Deserialize)]
struct ExtractionReply {
    #[serde(default)]
    extracted_attributes: Option<Attributes>,
}

impl Pipeline {
    pub(super) async fn analyze_intent(&self, state: &mut PipelineState) {
        let intent = match self.models.intent.invoke(&prompts::intent(state)).await {
            Ok(output) => match parse_json::<IntentReply>(strip_reasoning(&output)) {
                Ok(reply) if reply.intent.trim() == "product_search" => Intent::ProductSearch,
                Ok(_) => Intent::General,
                Err(e) => {
                    warn!("Unparseable intent output, treating as general: {}", e);
                    Intent::General
                }
            },
            Err(e) => {
                warn!("Intent model failed, treating as general: {:#}", e);
                Intent::General
            }
        };
        info!("Intent: {}", intent.label());
        state.intent = Some(intent);
    }

    pub(super) async fn general_response(&self, state: &mut PipelineState) {
        let text = self
            .generate(&prompts::general(state), "general response")
            .await
            .unwrap_or_else(|| GENERAL_FALLBACK.to_string());
        state.final_response = Some(AnswerContent::plain(text));
    }

    pub(super) async fn extract_attributes(&self, state: &mut PipelineState) {
        let extracted = match self.models.extraction.invoke(&prompts::extraction(state)).await {
            Ok(output) => match parse_json::<ExtractionReply>(strip_reasoning(&output)) {
                Ok(reply) => reply.extracted_attributes.unwrap_or_default(),
                Err(e) => {
                    warn!("Unparseable extraction output, keeping prior attributes: {}", e);
                    Attributes::new()
                }
            },
            Err(e) => {
                warn!("Extraction model failed, keeping prior attributes: {:#}", e);
                Attributes::new()
            }
        };
        debug!("Extracted this turn: {:?}", extracted);
        merge_attributes(&mut state.extracted_attributes, extracted);
    }

    pub(super) fn check_attributes(&self, state: &mut PipelineState) {
        state.missing_attributes = missing_attributes(
            &state.bot_config.required_attributes,
            &state.extracted_attributes,
            self.settings.missing_policy,
        );
        if state.missing_attributes.is_empty() {
            info!("Attributes sufficient, searching");
        } else {
            info!("Missing attributes: {}", state.missing_attributes.join(", "));
        }
    }

    pub(super) async fn ask_missing(&self, state: &mut PipelineState) {
        let text = self
            .generate(&prompts::missing(state), "missing-attribute question")
            .await
            .unwrap_or_else(|| ASK_FALLBACK.to_string());
        state.final_response = Some(AnswerContent::plain(text));
    }

    pub(super) async fn search(
        &self,
        state: &mut PipelineState,
        events: &mpsc::Sender<TurnEvent>,
    ) -> Result<(), TurnError> {
        let _ = events.send(TurnEvent::status("Searching products...")).await;

        let query = state.search_query();
        debug!("Search query: {}", query);
        let vector = self
            .embedder
            .embed_query(&query)
            .await
            .map_err(|e| TurnError::SearchUnavailable(format!("{:#}", e)))?;

        state.search_results = self
            .search
            .search(&vector, &state.tenant, self.settings.search_top_k)
            .await?;
        info!("Search returned {} products", state.search_results.len());
        Ok(())
    }

    pub(super) async fn recommend(&self, state: &mut PipelineState) {
        if state.search_results.is_empty() {
            state.final_response = Some(AnswerContent::plain(NO_MATCHES));
            return;
        }

        let items: Vec<SuggestedItem> = state.search_results.iter().map(SuggestedItem::from).collect();
        let text = self
            .generate(
                &prompts::recommendation(state, &state.search_results),
                "recommendation",
            )
            .await
            .unwrap_or_else(|| RECOMMEND_FALLBACK.to_string());
        state.final_response = Some(AnswerContent {
            text,
            item_suggested: items,
        });
    }

    async fn generate(&self, prompt: &crate::llm::Prompt, purpose: &str) -> Option<String> {
        match self.models.generation.invoke(prompt).await {
            Ok(output) => {
                let text = strip_reasoning(&output);
                if text.is_empty() {
                    warn!("Empty {} from model, using fallback", purpose);
                    None
                } else {
                    Some(text.to_string())
                }
            }
            Err(e) => {
                warn!("Model failed on {}, using fallback: {:#}", purpose, e);
                None
            }
        }
    }
}
