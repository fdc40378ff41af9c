//! Bearer-token authentication for protected routes.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::routes::ApiResponse;
use crate::state::AppState;

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check an `Authorization` header value against the expected token.
/// Returns Ok(()) on success, Err(message) on failure.
pub fn authorize(header: Option<&str>, expected: &str) -> Result<(), &'static str> {
    let header = header.ok_or("Unauthorized: Missing Authorization header")?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or("Unauthorized: Invalid Authorization format. Use 'Bearer <token>'")?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err("Unauthorized: Invalid API token")
    }
}

/// Middleware rejecting requests without the configured bearer token.
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.api_token.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match authorize(provided, expected) {
        Ok(()) => next.run(request).await,
        Err(message) => (StatusCode::UNAUTHORIZED, ApiResponse::error(message)).into_response(),
    }
}
