use super::state::PipelineState;
use crate::llm::Prompt;
use crate::search::ProductSummary;
use serde_json::json;
use std::fmt::Write;

const INTENT_RULES: &str = "# Context rules\n\
                            - Read the chat history to understand context.\n\
                            - If the user is answering a question from the previous turn, classify by the original goal of that question.\n\
                            - If the user explicitly changes the topic, switch intent.\n\n";

const INTENT_OUTPUT: &str = "Return only a JSON object:\n\
                             {\"intent\": \"general\" | \"product_search\"}\n";

const EXTRACTION_OUTPUT: &str = "# Output rules\n\
                                 - Return ONLY a valid JSON object, no explanations or markdown.\n\
                                 - Use null for attributes the user has not mentioned.\n\
                                 - Format: {\"extracted_attributes\": {\"<name>\": <value>}}\n";

const RECOMMENDATION_RULES: &str = "# Rules\n\
                                    - Briefly explain the best 2 to 3 matching products. Never mention product ids.\n\
                                    - End with a follow-up question that keeps the conversation going.\n\
                                    - Sound like a sales expert who understands what the shopper needs.\n\n";

const MISSING_RULES: &str = "Ask the shopper for the missing details in a single, direct, polite question. \
                             Do not offer options or list products.";

fn user_message(state: &PipelineState) -> String {
    format!("User Message: {}", state.input)
}

fn attributes_json(state: &PipelineState) -> String {
    serde_json::Value::Object(state.extracted_attributes.clone()).to_string()
}

pub fn intent(state: &PipelineState) -> Prompt {
    let config = &state.bot_config;
    let examples = &config.intent_examples;
    let mut system = String::with_capacity(1200);
    let _ = write!(
        system,
        "You are {}'s routing system. Classify the user's message into one intent.\n\n\
         # Intents\n\
         - `general`: greetings, small talk, vague statements (\"{}\" with no details), or answers without a new request.\n\
         - `product_search`: explicit requests for products (\"{}\", \"{}\").\n\n",
        config.name,
        examples.general_shopping_query_example,
        examples.product_search_example1,
        examples.product_search_example2,
    );
    system.push_str(INTENT_RULES);
    let _ = write!(system, "# Chat history\n{}\n\n", state.history_text());
    system.push_str(INTENT_OUTPUT);
    Prompt::new(system, user_message(state))
}

pub fn extraction(state: &PipelineState) -> Prompt {
    let config = &state.bot_config;
    let mut system = String::with_capacity(1200);
    let _ = write!(
        system,
        "You are {}'s shop assistant. Work out what the shopper is looking for and extract its attributes.\n\n\
         {}\n\n\
         # Attribute schema\n{}\n\n\
         # Already known\n{}\n\n\
         # Chat history\n{}\n\n",
        config.name,
        config.attribute_extraction_prompt,
        serde_json::Value::Object(config.required_attributes.clone()),
        attributes_json(state),
        state.history_text(),
    );
    system.push_str(EXTRACTION_OUTPUT);
    Prompt::new(system, user_message(state))
}

pub fn general(state: &PipelineState) -> Prompt {
    let mut system = state.bot_config.system_prompt.clone();
    let _ = write!(system, "\n\n# Chat history\n{}\n", state.history_text());
    Prompt::new(system, state.input.clone())
}

pub fn missing(state: &PipelineState) -> Prompt {
    let mut system = String::with_capacity(800);
    let _ = write!(
        system,
        "You are {}'s shop assistant. The shopper gave some information but these details are missing: {}.\n\n\
         # Known attributes\n{}\n\n\
         # Chat history\n{}\n\n",
        state.bot_config.name,
        state.missing_attributes.join(", "),
        attributes_json(state),
        state.history_text(),
    );
    system.push_str(MISSING_RULES);
    Prompt::new(system, user_message(state))
}

pub fn recommendation(state: &PipelineState, products: &[ProductSummary]) -> Prompt {
    let config = &state.bot_config;
    let available: Vec<_> = products
        .iter()
        .map(|p| json!({ "name": p.name, "price": p.price }))
        .collect();

    let mut system = String::with_capacity(2000);
    let _ = write!(
        system,
        "You are {}'s product recommendation assistant. Suggest products matching the shopper's desired attributes.\n\n",
        config.name
    );
    if !config.product_recommendation_prompt.trim().is_empty() {
        let _ = write!(system, "{}\n\n", config.product_recommendation_prompt);
    }
    system.push_str(RECOMMENDATION_RULES);
    let _ = write!(
        system,
        "# Desired attributes\n{}\n\n# Available products\n{}\n",
        attributes_json(state),
        serde_json::Value::Array(available),
    );
    Prompt::new(system, user_message(state))
}
