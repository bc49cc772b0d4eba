use async_openai::error::OpenAIError;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChorusError {
    #[error("Missing {0} environment variable")]
    MissingCredential(&'static str),

    #[error("HTTP request error: {0}")]
    Http(reqwest::Error),

    #[error("Backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Decoding error: {0}")]
    Decode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl From<reqwest::Error> for ChorusError {
    // Request URLs can carry keys in query strings; never surface them.
    fn from(error: reqwest::Error) -> Self {
        ChorusError::Http(error.without_url())
    }
}

impl From<OpenAIError> for ChorusError {
    fn from(error: OpenAIError) -> Self {
        match error {
            OpenAIError::Reqwest(error) => error.into(),
            OpenAIError::ApiError(api_error) => ChorusError::Backend {
                status: api_error
                    .code
                    .as_deref()
                    .and_then(|code| code.parse().ok())
                    .unwrap_or(500),
                message: api_error.message,
            },
            OpenAIError::JSONDeserialize(error) => {
                ChorusError::Decode(format!("malformed chat chunk: {error}"))
            }
            // Non-success statuses on a stream arrive here as text.
            other => ChorusError::Upstream(other.to_string()),
        }
    }
}

/// Relay failures are always a plain-text 500 carrying the error message.
impl IntoResponse for ChorusError {
    fn into_response(self) -> Response {
        tracing::error!("Relay request failed: {}", self);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, ChorusError>;
