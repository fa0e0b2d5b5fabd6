use super::StoreError;
use crate::entity::{bot_configs, messages, products, rooms, tenants};
use crate::pipeline::{AnswerContent, Attributes};
use crate::tenant::TenantSlug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub slug: TenantSlug,
    pub name: String,
    pub created_at_us: i64,
}

impl TryFrom<tenants::Model> for Tenant {
    type Error = StoreError;

    fn try_from(m: tenants::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            slug: TenantSlug::parse(&m.slug)?,
            name: m.name,
            created_at_us: m.created_at_us,
        })
    }
}

fn default_general_example() -> String {
    "How are you today?".to_string()
}

fn default_product_example1() -> String {
    "Show me some running shoes".to_string()
}

fn default_product_example2() -> String {
    "I want to buy a red dress".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentExamples {
    #[serde(default = "default_general_example")]
    pub general_shopping_query_example: String,
    #[serde(default = "default_product_example1")]
    pub product_search_example1: String,
    #[serde(default = "default_product_example2")]
    pub product_search_example2: String,
}

impl Default for IntentExamples {
    fn default() -> Self {
        Self {
            general_shopping_query_example: default_general_example(),
            product_search_example1: default_product_example1(),
            product_search_example2: default_product_example2(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    pub name: String,
    pub system_prompt: String,
    #[serde(default)]
    pub intent_examples: IntentExamples,
    pub attribute_extraction_prompt: String,
    /// Attribute name to a description or type hint.
    pub required_attributes: Attributes,
    pub product_recommendation_prompt: String,
}

impl TryFrom<bot_configs::Model> for BotConfig {
    type Error = StoreError;

    fn try_from(m: bot_configs::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            name: m.name,
            system_prompt: m.system_prompt,
            intent_examples: serde_json::from_str(&m.intent_examples)?,
            attribute_extraction_prompt: m.attribute_extraction_prompt,
            required_attributes: serde_json::from_str(&m.required_attributes)?,
            product_recommendation_prompt: m.product_recommendation_prompt,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: String,
    pub owner: String,
    pub extracted_attributes: Attributes,
    pub missing_attributes: Vec<String>,
    pub created_at_us: i64,
}

impl TryFrom<rooms::Model> for Room {
    type Error = StoreError;

    fn try_from(m: rooms::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: m.id,
            owner: m.owner,
            extracted_attributes: serde_json::from_str(&m.extracted_attributes)?,
            missing_attributes: serde_json::from_str(&m.missing_attributes)?,
            created_at_us: m.created_at_us,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }

    fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "user" => Ok(Sender::User),
            "bot" => Ok(Sender::Bot),
            other => Err(StoreError::Corrupt(format!("unknown sender role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum MessagePayload {
    Text(String),
    Answer(AnswerContent),
}

impl MessagePayload {
    pub fn text(&self) -> &str {
        match self {
            MessagePayload::Text(text) => text,
            MessagePayload::Answer(answer) => &answer.text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub sender: Sender,
    pub payload: MessagePayload,
    pub timestamp_us: i64,
}

impl TryFrom<messages::Model> for StoredMessage {
    type Error = StoreError;

    fn try_from(m: messages::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            sender: Sender::parse(&m.sender)?,
            payload: serde_json::from_str(&m.payload)?,
            timestamp_us: m.timestamp_us,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub attributes: Attributes,
    pub image: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub created_at_us: i64,
}

impl Product {
    pub fn embedding_text(&self) -> String {
        let mut text = format!("{} ", self.name);
        let pairs: Vec<String> = self
            .attributes
            .iter()
            .map(|(k, v)| format!("{}: {}", k, crate::pipeline::attribute_value_text(v)))
            .collect();
        text.push_str(&pairs.join(" "));
        text
    }
}

impl TryFrom<products::Model> for Product {
    type Error = StoreError;

    fn try_from(m: products::Model) -> Result<Self, Self::Error> {
        let embedding = m
            .embedding
            .as_deref()
            .map(serde_json::from_str::<Vec<f32>>)
            .transpose()?;
        Ok(Self {
            id: m.rowid,
            name: m.name,
            price: m.price,
            attributes: serde_json::from_str(&m.attributes)?,
            image: m.image,
            embedding,
            created_at_us: m.created_at_us,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(deserialize_with = "price_from_number_or_string")]
    pub price: f64,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Older catalog dumps carry the price as a decimal string.
fn price_from_number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Price {
        Number(f64),
        Text(String),
    }

    match Price::deserialize(deserializer)? {
        Price::Number(n) => Ok(n),
        Price::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
