use crate::search::ProductSummary;
use crate::store::{BotConfig, Sender, StoredMessage};
use crate::tenant::TenantContext;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Attribute name to value, as extracted from shopper messages or declared
/// in a bot's required-attribute schema.
pub type Attributes = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    General,
    ProductSearch,
}

impl Intent {
    pub fn label(self) -> &'static str {
        match self {
            Intent::General => "general",
            Intent::ProductSearch => "product_search",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum MissingPolicy {
    #[default]
    #[serde(rename = "any")]
    AnySatisfied,
    #[serde(rename = "all")]
    AllRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub search_top_k: usize,
    pub missing_policy: MissingPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            search_top_k: 15,
            missing_policy: MissingPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedItem {
    pub name: String,
    pub price: f64,
    pub image: Option<String>,
}

impl From<&ProductSummary> for SuggestedItem {
    fn from(p: &ProductSummary) -> Self {
        Self {
            name: p.name.clone(),
            price: p.price,
            image: p.image.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerContent {
    #[serde(alias = "airesponse")]
    pub text: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub item_suggested: Vec<SuggestedItem>,
}

impl AnswerContent {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            item_suggested: Vec::new(),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<SuggestedItem>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<SuggestedItem>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone)]
pub struct PipelineState {
    pub input: String,
    pub history: Vec<StoredMessage>,
    pub tenant: TenantContext,
    pub bot_config: BotConfig,
    pub intent: Option<Intent>,
    pub extracted_attributes: Attributes,
    pub missing_attributes: Vec<String>,
    pub search_results: Vec<ProductSummary>,
    pub final_response: Option<AnswerContent>,
}

impl PipelineState {
    pub fn new(
        input: impl Into<String>,
        history: Vec<StoredMessage>,
        tenant: TenantContext,
        bot_config: BotConfig,
        extracted_attributes: Attributes,
    ) -> Self {
        Self {
            input: input.into(),
            history,
            tenant,
            bot_config,
            intent: None,
            extracted_attributes,
            missing_attributes: Vec::new(),
            search_results: Vec::new(),
            final_response: None,
        }
    }

    pub fn history_text(&self) -> String {
        if self.history.is_empty() {
            return "(no previous messages)".to_string();
        }
        self.history
            .iter()
            .map(|m| {
                let role = match m.sender {
                    Sender::User => "User",
                    Sender::Bot => "Assistant",
                };
                format!("{}: {}", role, m.payload.text())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Utterance followed by the known `key: value` pairs, the text a
    /// product search embeds.
    pub fn search_query(&self) -> String {
        let mut query = self.input.clone();
        for (key, value) in &self.extracted_attributes {
            query.push(' ');
            query.push_str(&format!("{}: {}", key, attribute_value_text(value)));
        }
        query
    }
}

pub fn attribute_value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Folds one turn's extraction into the running attributes. Values that
/// carry something overwrite; null, blank or absent keys leave earlier
/// values alone.
pub fn merge_attributes(current: &mut Attributes, extracted: Attributes) {
    for (key, value) in extracted {
        if is_present(&value) {
            current.insert(key, value);
        }
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

fn has_value(attributes: &Attributes, key: &str) -> bool {
    attributes.get(key).is_some_and(is_present)
}

/// Schema keys still lacking a value, in schema order.
pub fn missing_attributes(
    schema: &Attributes,
    merged: &Attributes,
    policy: MissingPolicy,
) -> Vec<String> {
    let missing: Vec<String> = schema
        .keys()
        .filter(|key| !has_value(merged, key))
        .cloned()
        .collect();

    match policy {
        MissingPolicy::AllRequired => missing,
        MissingPolicy::AnySatisfied if missing.len() < schema.len() => Vec::new(),
        MissingPolicy::AnySatisfied => missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn merging_never_forgets_known_attributes() {
        let mut merged = Attributes::new();
        merge_attributes(&mut merged, attrs(json!({"color": "red"})));
        merge_attributes(&mut merged, Attributes::new());
        merge_attributes(&mut merged, attrs(json!({"size": "M"})));
        assert_eq!(merged, attrs(json!({"color": "red", "size": "M"})));

        merge_attributes(&mut merged, attrs(json!({"color": null, "size": "L"})));
        assert_eq!(merged, attrs(json!({"color": "red", "size": "L"})));
    }

    #[test]
    fn blank_extraction_keeps_the_known_value() {
        let schema = attrs(json!({"color": "string", "size": "string"}));
        let mut merged = attrs(json!({"color": "red"}));
        merge_attributes(&mut merged, attrs(json!({"color": "", "size": "  "})));
        assert_eq!(merged, attrs(json!({"color": "red"})));
        assert!(missing_attributes(&schema, &merged, MissingPolicy::AnySatisfied).is_empty());
    }

    #[test]
    fn merging_the_same_extraction_twice_is_idempotent() {
        let extraction = attrs(json!({"color": "blue"}));
        let mut once = Attributes::new();
        merge_attributes(&mut once, extraction.clone());
        let mut twice = once.clone();
        merge_attributes(&mut twice, extraction);
        assert_eq!(once, twice);
    }

    #[test]
    fn any_policy_proceeds_once_one_attribute_is_known() {
        let schema = attrs(json!({"color": "string", "size": "string"}));

        let missing = missing_attributes(&schema, &attrs(json!({"color": "red"})), MissingPolicy::AnySatisfied);
        assert!(missing.is_empty());

        let missing = missing_attributes(&schema, &Attributes::new(), MissingPolicy::AnySatisfied);
        assert_eq!(missing, vec!["color", "size"]);

        let missing = missing_attributes(&schema, &attrs(json!({"color": null})), MissingPolicy::AnySatisfied);
        assert_eq!(missing, vec!["color", "size"]);
    }

    #[test]
    fn all_policy_reports_each_gap() {
        let schema = attrs(json!({"color": "string", "size": "string"}));
        let missing = missing_attributes(&schema, &attrs(json!({"color": "red"})), MissingPolicy::AllRequired);
        assert_eq!(missing, vec!["size"]);
    }

    #[test]
    fn empty_schema_never_blocks_search() {
        let schema = Attributes::new();
        assert!(missing_attributes(&schema, &Attributes::new(), MissingPolicy::AnySatisfied).is_empty());
        assert!(missing_attributes(&schema, &Attributes::new(), MissingPolicy::AllRequired).is_empty());
    }

    #[test]
    fn answer_reads_legacy_field_names() {
        let answer: AnswerContent =
            serde_json::from_value(json!({"airesponse": "hi", "item_suggested": null})).unwrap();
        assert_eq!(answer, AnswerContent::plain("hi"));
    }
}
