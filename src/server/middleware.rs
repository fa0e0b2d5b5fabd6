use super::{ApiError, AppState};
use crate::tenant::{TenantContext, TenantSlug};
use axum::extract::{Request, State};
use axum::http::Uri;
use axum::http::uri::PathAndQuery;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

pub fn split_first_segment(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.strip_prefix('/')?;
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.find('/') {
        Some(idx) => Some((&trimmed[..idx], &trimmed[idx..])),
        None => Some((trimmed, "/")),
    }
}

fn strip_prefix(uri: &Uri, rest: &str) -> Option<Uri> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", rest, query),
        None => rest.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}

/// Sets the request's tenant from its first path segment when that segment
/// names a registered tenant, removing it from the path before routing.
/// Any other request runs with an empty context. The context lives in the
/// request's extensions, so it ends with the request.
pub async fn resolve_tenant(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let mut ctx = TenantContext::none();

    let candidate = split_first_segment(req.uri().path())
        .and_then(|(segment, rest)| Some((TenantSlug::parse(segment).ok()?, rest.to_string())));

    if let Some((slug, rest)) = candidate {
        match state.router.is_known_tenant(slug.as_str()).await {
            Ok(true) => {
                if let Some(uri) = strip_prefix(req.uri(), &rest) {
                    debug!("Tenant {} resolved, routing {}", slug, uri.path());
                    *req.uri_mut() = uri;
                    ctx.set(slug);
                }
            }
            Ok(false) => {}
            Err(e) => return ApiError::from(e).into_response(),
        }
    }

    req.extensions_mut().insert(ctx);
    next.run(req).await
}
