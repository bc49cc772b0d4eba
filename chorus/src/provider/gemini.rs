use async_stream::try_stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use url::Url;

use super::sse::data_payloads;
use super::{ensure_success, ErrorPayload, ProviderAdapter, StreamOptions, TextDelta, TextDeltaStream};
use crate::config::GeminiConfig;
use crate::error::{ChorusError, Result};

/// Harm categories relaxed to `BLOCK_NONE` on every request.
const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
];

/// Finish reasons that mean the candidate was withheld, not completed.
const BLOCKING_FINISH_REASONS: [&str; 5] = [
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

/// Google Gemini via `streamGenerateContent` with SSE framing.
#[derive(Clone)]
pub struct GeminiAdapter {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    safety_settings: Vec<SafetySetting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ErrorPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateChunk {
    /// Text of the first candidate. Usage and normal finish-reason chunks
    /// carry no parts and yield `None`; a blocking finish reason fails.
    fn into_delta(self) -> Result<Option<TextDelta>> {
        if let Some(error) = self.error {
            return Err(error.into_error());
        }

        if self.candidates.is_empty() {
            if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
                return Err(ChorusError::Backend {
                    status: 400,
                    message: format!("Prompt blocked: {reason}"),
                });
            }
            return Ok(None);
        }

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Ok(None);
        };

        if let Some(reason) = candidate
            .finish_reason
            .filter(|reason| BLOCKING_FINISH_REASONS.contains(&reason.as_str()))
        {
            return Err(ChorusError::Backend {
                status: 400,
                message: format!("Response blocked: {reason}"),
            });
        }

        let text: String = candidate
            .content
            .map(|content| content.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| part.text)
            .collect();

        Ok((!text.is_empty()).then(|| TextDelta::new(text)))
    }
}

impl GeminiAdapter {
    pub const NAME: &'static str = "Gemini Pro";

    pub fn new(client: reqwest::Client, config: &GeminiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or(ChorusError::MissingCredential("GEMINI_API_KEY"))?;

        let mut endpoint = Url::parse(&format!(
            "{}/v1beta/models/{}:streamGenerateContent",
            config.base_url.trim_end_matches('/'),
            config.model
        ))?;
        endpoint.query_pairs_mut().append_pair("alt", "sse");

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    fn build_body<'a>(prompt: &'a str, options: &StreamOptions) -> GenerateRequest<'a> {
        let generation_config = (options.max_tokens.is_some() || options.temperature.is_some())
            .then(|| GenerationConfig {
                max_output_tokens: options.max_tokens,
                temperature: options.temperature,
            });

        GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: "BLOCK_NONE",
                })
                .collect(),
            generation_config,
        }
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn stream(&self, prompt: &str, options: &StreamOptions) -> TextDeltaStream {
        let request = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::build_body(prompt, options));

        Box::pin(try_stream! {
            let response = ensure_success(request.send().await?).await?;
            let mut payloads = Box::pin(data_payloads(response));

            while let Some(data) = payloads.next().await {
                let chunk: GenerateChunk = serde_json::from_str(&data?)
                    .map_err(|e| ChorusError::Decode(format!("malformed Gemini chunk: {e}")))?;
                if let Some(delta) = chunk.into_delta()? {
                    yield delta;
                }
            }
        })
    }
}
