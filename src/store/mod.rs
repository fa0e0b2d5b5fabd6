mod error;
mod shared;
mod tenant;
mod types;

pub use error::StoreError;
pub use shared::SharedStore;
pub use tenant::TenantStore;
pub use types::{
    BotConfig, IntentExamples, MessagePayload, NewProduct, Product, Room, Sender, StoredMessage,
    Tenant,
};

use sea_orm::{Database, DatabaseConnection};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Shared,
    TenantScoped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Tenant,
    BotConfiguration,
    ConversationRoom,
    Message,
    Product,
}

impl EntityKind {
    pub const TENANT_SCOPED: [EntityKind; 4] = [
        EntityKind::BotConfiguration,
        EntityKind::ConversationRoom,
        EntityKind::Message,
        EntityKind::Product,
    ];

    pub fn scope(self) -> Scope {
        match self {
            EntityKind::Tenant => Scope::Shared,
            EntityKind::BotConfiguration
            | EntityKind::ConversationRoom
            | EntityKind::Message
            | EntityKind::Product => Scope::TenantScoped,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Tenant => "Tenant",
            EntityKind::BotConfiguration => "BotConfiguration",
            EntityKind::ConversationRoom => "ConversationRoom",
            EntityKind::Message => "Message",
            EntityKind::Product => "Product",
        };
        f.write_str(name)
    }
}

fn sqlite_url(path: &Path) -> String {
    format!("sqlite:{}?mode=rwc", path.display())
}

async fn blocking<T, F>(db_url: &str, op: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&DatabaseConnection) -> Result<T, StoreError> + Send + 'static,
{
    let db_url = db_url.to_string();
    tokio::task::spawn_blocking(move || {
        let db = Database::connect(&db_url)?;
        op(&db)
    })
    .await?
}

fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}
