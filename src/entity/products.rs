use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub rowid: i64,
    pub name: String,
    pub price: f64,
    pub attributes: String,
    pub image: Option<String>,
    pub embedding: Option<String>,
    pub created_at_us: i64,
}

impl ActiveModelBehavior for ActiveModel {}
