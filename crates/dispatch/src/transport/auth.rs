// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signed bearer tokens and the HTTP auth middleware.
//!
//! Tokens are `base64url(user_id|role|expires_ms).base64url(hmac_sha256)`;
//! verification is constant-time via the HMAC check and runs before a
//! WebSocket upgrade is accepted.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::hmac;

use crate::error::ApiError;
use crate::model::{epoch_ms, Role};
use crate::state::DispatchState;

/// Verified token claims.
#[derive(Debug, Clone)]
pub struct Claims {
    pub user_id: String,
    pub role: Role,
    pub expires_at: u64,
}

/// Issue a signed bearer token.  Registration and login live outside this
/// service; this is used by tests and operator tooling.
pub fn sign_token(secret: &str, user_id: &str, role: Role, ttl: Duration) -> String {
    let expires_at = epoch_ms() + ttl.as_millis() as u64;
    let payload = format!("{user_id}|{role}|{expires_at}");
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, payload.as_bytes());
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(payload.as_bytes()),
        URL_SAFE_NO_PAD.encode(tag.as_ref())
    )
}

/// Verify a bearer token; returns the claims or `Unauthorized`.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    let (payload_b64, tag_b64) = token.split_once('.').ok_or(ApiError::Unauthorized)?;
    let payload =
        URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| ApiError::Unauthorized)?;
    let tag = URL_SAFE_NO_PAD.decode(tag_b64).map_err(|_| ApiError::Unauthorized)?;

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    hmac::verify(&key, &payload, &tag).map_err(|_| ApiError::Unauthorized)?;

    let payload = String::from_utf8(payload).map_err(|_| ApiError::Unauthorized)?;
    let mut parts = payload.split('|');
    let user_id = parts.next().filter(|s| !s.is_empty()).ok_or(ApiError::Unauthorized)?;
    let role = parts
        .next()
        .and_then(Role::parse)
        .ok_or(ApiError::Unauthorized)?;
    let expires_at: u64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or(ApiError::Unauthorized)?;
    if parts.next().is_some() {
        return Err(ApiError::Unauthorized);
    }
    if expires_at <= epoch_ms() {
        return Err(ApiError::Unauthorized);
    }
    Ok(Claims { user_id: user_id.to_owned(), role, expires_at })
}

/// Extract and verify the `Authorization: Bearer` header.
pub fn claims_from_headers(
    headers: &axum::http::HeaderMap,
    secret: &str,
) -> Result<Claims, ApiError> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let token = header.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;
    verify_token(secret, token)
}

/// Axum middleware enforcing bearer auth and stashing claims in request
/// extensions.
///
/// Exempt: `/api/v1/health` and WebSocket upgrades (`/ws`), which verify
/// via query parameter in the handler.
pub async fn auth_layer(
    state: State<Arc<DispatchState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/api/v1/health" || path.starts_with("/ws") {
        return next.run(req).await;
    }

    match claims_from_headers(req.headers(), &state.config.auth_secret) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(code) => {
            let body = crate::error::ErrorResponse { error: code.to_error_body("unauthorized") };
            (
                StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::UNAUTHORIZED),
                axum::Json(body),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
