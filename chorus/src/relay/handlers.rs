use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::RelayState;
use crate::error::{ChorusError, Result};
use crate::provider::ensure_success;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub credential_configured: bool,
}

/// `POST /api/anthropic`
///
/// Forwards the request body to the Anthropic Messages API unchanged and
/// streams the upstream response back as it arrives. Every failure is a
/// plain-text 500.
pub async fn relay_messages(State(state): State<RelayState>, body: Bytes) -> Result<Response> {
    let api_key = state
        .config
        .anthropic_api_key
        .as_deref()
        .ok_or(ChorusError::MissingCredential("ANTHROPIC_API_KEY"))?;

    // Only checked for well-formedness; the bytes go upstream as received.
    serde_json::from_slice::<serde::de::IgnoredAny>(&body)?;

    tracing::debug!(bytes = body.len(), "Relaying message request upstream");

    let upstream = state
        .client
        .post(state.messages_url.clone())
        .header("x-api-key", api_key)
        .header("anthropic-version", &state.config.anthropic_version)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await?;
    let upstream = ensure_success(upstream).await?;

    let content_type = upstream
        .headers()
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("text/event-stream"));

    Ok((
        [(CONTENT_TYPE, content_type)],
        Body::from_stream(upstream.bytes_stream()),
    )
        .into_response())
}

/// `GET /api/health`
pub async fn health(State(state): State<RelayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        credential_configured: state.config.anthropic_api_key.is_some(),
    })
}
