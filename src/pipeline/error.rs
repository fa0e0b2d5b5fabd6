use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Product search unavailable: {0}")]
    SearchUnavailable(String),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Room not found: {0}")]
    RoomNotFound(String),
}
