use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::config::GatewayConfig;
use crate::error::AppError;
use crate::models::CallerIdentity;
use crate::AppState;

/// Identity middleware.
/// The upstream gateway has already authenticated the caller; its asserted
/// user id and privileged flag are taken from the configured headers as-is.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = identity_from_headers(request.headers(), &state.config.gateway)?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

fn identity_from_headers(
    headers: &HeaderMap,
    gateway: &GatewayConfig,
) -> Result<CallerIdentity, AppError> {
    let user_id = headers
        .get(gateway.user_id_header.as_str())
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .ok_or_else(|| AppError::Unauthorized("Missing caller identity".to_string()))?
        .parse::<i64>()
        .map_err(|_| AppError::Unauthorized("Invalid caller identity".to_string()))?;

    let is_privileged = headers
        .get(gateway.privileged_header.as_str())
        .and_then(|h| h.to_str().ok())
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1"))
        .unwrap_or(false);

    Ok(CallerIdentity {
        user_id,
        is_privileged,
    })
}
