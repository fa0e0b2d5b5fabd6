use crate::pipeline::TurnError;
use crate::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::http::header::InvalidHeaderValue;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No tenant in request path")]
    NoTenant,

    #[error(transparent)]
    Turn(#[from] TurnError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),
}

fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::ContextMissing { .. } | StoreError::InvalidSlug(_) => StatusCode::BAD_REQUEST,
        StoreError::UnknownTenant(_) | StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoTenant => StatusCode::BAD_REQUEST,
            ApiError::Turn(TurnError::InvalidRequest(_) | TurnError::Configuration(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Turn(TurnError::RoomNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Turn(TurnError::SearchUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Turn(TurnError::Storage(e)) | ApiError::Store(e) => store_status(e),
            ApiError::Header(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
