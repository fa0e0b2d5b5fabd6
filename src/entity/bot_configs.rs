use sea_orm::entity::prelude::*;

/// JSON-typed fields are stored as text and decoded by the tenant store.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "bot_configs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub rowid: i64,
    pub name: String,
    pub system_prompt: String,
    pub intent_examples: String,
    pub attribute_extraction_prompt: String,
    pub required_attributes: String,
    pub product_recommendation_prompt: String,
    pub updated_at_us: i64,
}

impl ActiveModelBehavior for ActiveModel {}
