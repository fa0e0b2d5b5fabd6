use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "rooms")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub rowid: i64,
    #[sea_orm(unique)]
    pub id: String,
    pub owner: String,
    pub extracted_attributes: String,
    pub missing_attributes: String,
    pub created_at_us: i64,
}

impl ActiveModelBehavior for ActiveModel {}
