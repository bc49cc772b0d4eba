use std::str::FromStr;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use url::Url;

use super::decode::Utf8Decoder;
use super::sse::SseDecoder;
use super::{ensure_success, ErrorPayload, ProviderAdapter, StreamOptions, TextDelta, TextDeltaStream};
use crate::config::ClaudeRelayConfig;
use crate::error::{ChorusError, Result};

/// How the relayed body is turned into deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelayFraming {
    /// Every received byte chunk is decoded and emitted as-is, so the
    /// accumulated text is the decoded body.
    #[default]
    Raw,
    /// The body is read as an Anthropic event stream and only
    /// `text_delta` content is emitted.
    AnthropicSse,
}

impl FromStr for RelayFraming {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(RelayFraming::Raw),
            "anthropic-sse" | "anthropic_sse" => Ok(RelayFraming::AnthropicSse),
            other => Err(format!("expected 'raw' or 'anthropic-sse', got '{other}'")),
        }
    }
}

/// Claude, reached through the server-side relay so the Anthropic key never
/// leaves the server.
#[derive(Clone)]
pub struct RelayAdapter {
    client: reqwest::Client,
    relay_url: Url,
    model: String,
    max_tokens: u32,
    framing: RelayFraming,
}

/// Anthropic Messages API request, sent to the relay unchanged.
#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Event {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: BlockDelta },
    #[serde(rename = "error")]
    Error { error: ErrorPayload },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum BlockDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

impl Event {
    fn into_delta(self) -> Result<Option<TextDelta>> {
        match self {
            Event::ContentBlockDelta {
                delta: BlockDelta::TextDelta { text },
            } if !text.is_empty() => Ok(Some(TextDelta::new(text))),
            Event::Error { error } => Err(error.into_error()),
            _ => Ok(None),
        }
    }
}

impl RelayAdapter {
    pub const NAME: &'static str = "Claude";

    pub fn new(client: reqwest::Client, config: &ClaudeRelayConfig) -> Result<Self> {
        Ok(Self {
            client,
            relay_url: Url::parse(&config.relay_url)?,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            framing: config.framing,
        })
    }

    pub fn framing(&self) -> RelayFraming {
        self.framing
    }

    fn build_body<'a>(&'a self, prompt: &'a str, options: &StreamOptions) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            stream: true,
            temperature: options.temperature,
        }
    }
}

impl ProviderAdapter for RelayAdapter {
    fn stream(&self, prompt: &str, options: &StreamOptions) -> TextDeltaStream {
        let request = self
            .client
            .post(self.relay_url.clone())
            .json(&self.build_body(prompt, options));
        let framing = self.framing;

        Box::pin(try_stream! {
            // A relay 500 arrives here as a Backend error carrying its text body.
            let response = ensure_success(request.send().await?).await?;
            let body = response.bytes_stream();
            let mut deltas: TextDeltaStream = match framing {
                RelayFraming::Raw => Box::pin(decode_text_stream(body)),
                RelayFraming::AnthropicSse => Box::pin(anthropic_text_stream(body)),
            };

            while let Some(delta) = deltas.next().await {
                yield delta?;
            }
        })
    }
}

/// Decode a byte stream to text deltas, holding back split multi-byte
/// characters until the next chunk completes them.
pub fn decode_text_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<TextDelta>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ChorusError> + Send + 'static,
{
    try_stream! {
        let mut decoder = Utf8Decoder::new();
        let mut bytes = Box::pin(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(Into::into)?;
            let text = decoder.decode(chunk.as_ref());
            if !text.is_empty() {
                yield TextDelta::new(text);
            }
        }

        let tail = decoder.finish();
        if !tail.is_empty() {
            yield TextDelta::new(tail);
        }
    }
}

/// Extract `text_delta` content from an Anthropic event-stream body.
pub fn anthropic_text_stream<S, B, E>(
    bytes: S,
) -> impl Stream<Item = Result<TextDelta>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ChorusError> + Send + 'static,
{
    try_stream! {
        let mut decoder = SseDecoder::new();
        let mut bytes = Box::pin(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(Into::into)?;
            for data in decoder.feed(chunk.as_ref()) {
                if let Some(delta) = parse_event(&data)? {
                    yield delta;
                }
            }
        }

        for data in decoder.finish() {
            if let Some(delta) = parse_event(&data)? {
                yield delta;
            }
        }
    }
}

fn parse_event(data: &str) -> Result<Option<TextDelta>> {
    serde_json::from_str::<Event>(data)
        .map_err(|e| ChorusError::Decode(format!("malformed Anthropic event: {e}")))?
        .into_delta()
}
