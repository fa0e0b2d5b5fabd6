use crate::pipeline::AnswerContent;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum TurnEvent {
    Status(String),
    Answer(AnswerContent),
    Error(String),
}

impl TurnEvent {
    pub fn status(text: impl Into<String>) -> Self {
        TurnEvent::Status(text.into())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "content": e.to_string() }).to_string()
        })
    }
}
