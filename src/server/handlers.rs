use super::{ApiError, AppState};
use crate::session::TurnRequest;
use crate::store::StoredMessage;
use crate::tenant::TenantContext;
use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::HeaderValue;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;

pub const ROOM_ID_HEADER: &str = "x-room-id";

fn require_tenant(ctx: &TenantContext) -> Result<(), ApiError> {
    ctx.get().map(|_| ()).ok_or(ApiError::NoTenant)
}

/// Starts a turn and streams its events. Anything that fails before the
/// first event is a plain JSON error instead of a stream.
pub async fn chat(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(request): Json<TurnRequest>,
) -> Result<Response, ApiError> {
    require_tenant(&ctx)?;

    let turn = state.session.prepare(ctx, request).await?;
    let stream = state.session.stream(turn);
    let room_id = HeaderValue::from_str(&stream.room_id)?;

    let events = ReceiverStream::new(stream.events)
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_json())));

    let mut response = Sse::new(events).into_response();
    response.headers_mut().insert(ROOM_ID_HEADER, room_id);
    Ok(response)
}

pub async fn room_messages(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    require_tenant(&ctx)?;
    let messages = state.session.room_messages(&ctx, &room_id).await?;
    Ok(Json(messages))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
