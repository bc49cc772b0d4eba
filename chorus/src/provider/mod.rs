//! Streaming adapters that turn each backend's native incremental response
//! into a uniform sequence of [`TextDelta`]s.

mod azure;
mod decode;
mod gemini;
mod relay;
mod sse;

use std::fmt;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{ChorusError, Result};

pub use azure::AzureOpenAiAdapter;
pub use decode::Utf8Decoder;
pub use gemini::GeminiAdapter;
pub use relay::{anthropic_text_stream, decode_text_stream, RelayAdapter, RelayFraming};
pub use sse::SseDecoder;

/// One incremental fragment of model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDelta(String);

impl TextDelta {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for TextDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TextDelta {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// Generation knobs shared by every backend. Unset fields leave the
/// backend default in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// A finite, non-restartable sequence of deltas. The first `Err` item ends
/// the stream.
pub type TextDeltaStream = BoxStream<'static, Result<TextDelta>>;

/// Boundary between one backend's streaming protocol and the fan-out.
///
/// `stream` must be lazy: no network I/O happens until the returned stream
/// is first polled.
pub trait ProviderAdapter: Send + Sync {
    fn stream(&self, prompt: &str, options: &StreamOptions) -> TextDeltaStream;
}

/// A named, toggleable provider as registered with the fan-out controller.
#[derive(Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub enabled: bool,
    pub adapter: Arc<dyn ProviderAdapter>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, enabled: bool, adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            name: name.into(),
            enabled,
            adapter,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Error object some backends send inside an otherwise successful stream.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayload {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: String,
}

impl ErrorPayload {
    /// Numeric codes are HTTP-like; anything else reports as a bad gateway.
    pub(crate) fn into_error(self) -> ChorusError {
        let status = self
            .code
            .as_ref()
            .and_then(|code| code.as_u64())
            .and_then(|code| u16::try_from(code).ok())
            .unwrap_or(502);
        let message = if self.message.is_empty() {
            "backend reported an error".to_string()
        } else {
            self.message
        };
        ChorusError::Backend { status, message }
    }
}

/// Pass a 2xx response through; turn anything else into a `Backend` error
/// carrying the backend's own message.
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = backend_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    Err(ChorusError::Backend {
        status: status.as_u16(),
        message,
    })
}

/// Every supported backend nests its message under `error.message`; plain
/// text bodies (the relay) are used as-is.
pub(crate) fn backend_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    let nested = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(|message| message.as_str())
                .map(ToString::to_string)
        });

    Some(nested.unwrap_or_else(|| body.to_string()))
}

impl From<&Config> for StreamOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_tokens: config.providers.max_tokens,
            temperature: config.providers.temperature,
        }
    }
}

/// Build every configured provider once, sharing one HTTP client.
///
/// Enabled direct providers without credentials fail here so the process
/// stops before any prompt is sent. Disabled providers are still registered
/// (so they can be toggled on by name later) only when they are fully
/// configured.
pub fn build_providers(config: &Config, client: reqwest::Client) -> Result<Vec<ProviderConfig>> {
    let providers = &config.providers;
    let mut built = Vec::new();

    let gemini = &providers.gemini;
    match GeminiAdapter::new(client.clone(), gemini) {
        Ok(adapter) => built.push(ProviderConfig::new(
            GeminiAdapter::NAME,
            gemini.enabled,
            Arc::new(adapter),
        )),
        Err(e) if gemini.enabled => return Err(e),
        Err(_) => tracing::debug!("Gemini not configured, skipping"),
    }

    for deployment in [&providers.gpt4_turbo, &providers.gpt4, &providers.gpt35] {
        match AzureOpenAiAdapter::new(client.clone(), deployment) {
            Ok(adapter) => built.push(ProviderConfig::new(
                deployment.name.clone(),
                deployment.enabled,
                Arc::new(adapter),
            )),
            Err(e) if deployment.enabled => return Err(e),
            Err(_) => tracing::debug!("{} not configured, skipping", deployment.name),
        }
    }

    let claude = &providers.claude;
    match RelayAdapter::new(client, claude) {
        Ok(adapter) => built.push(ProviderConfig::new(
            RelayAdapter::NAME,
            claude.enabled,
            Arc::new(adapter),
        )),
        Err(e) if claude.enabled => return Err(e),
        Err(e) => tracing::debug!("Claude relay not usable, skipping: {}", e),
    }

    Ok(built)
}
