use super::EntityKind;
use crate::tenant::InvalidSlug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No active tenant context while accessing tenant-scoped entity '{kind}'")]
    ContextMissing { kind: EntityKind },
    #[error(transparent)]
    InvalidSlug(#[from] InvalidSlug),
    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),
    #[error("'{kind}' lives in the shared store, not a tenant store")]
    NotTenantScoped { kind: EntityKind },
    #[error("{0} not found")]
    NotFound(String),
    #[error("Corrupt stored record: {0}")]
    Corrupt(String),
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Stored JSON could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
