use async_openai::{
    config::{AzureConfig, Config},
    types::{
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateChatCompletionStreamResponse,
    },
    Client,
};
use async_stream::try_stream;
use futures::StreamExt;
use url::Url;

use super::{ProviderAdapter, StreamOptions, TextDelta, TextDeltaStream};
use crate::config::AzureDeploymentConfig;
use crate::error::{ChorusError, Result};

/// One Azure OpenAI chat deployment, streamed through the chat completions
/// endpoint.
#[derive(Clone)]
pub struct AzureOpenAiAdapter {
    client: Client<AzureConfig>,
    deployment: String,
}

impl AzureOpenAiAdapter {
    pub fn new(http_client: reqwest::Client, config: &AzureDeploymentConfig) -> Result<Self> {
        let api_base = config
            .endpoint
            .as_deref()
            .ok_or(ChorusError::MissingCredential(config.endpoint_var))?;
        let api_key = config
            .api_key
            .as_deref()
            .ok_or(ChorusError::MissingCredential(config.key_var))?;

        // Reject a malformed endpoint here rather than on the first request.
        Url::parse(api_base)?;

        let azure_config = AzureConfig::new()
            .with_api_base(api_base.trim_end_matches('/'))
            .with_api_key(api_key)
            .with_deployment_id(&config.deployment)
            .with_api_version(&config.api_version);

        Ok(Self {
            client: Client::with_config(azure_config).with_http_client(http_client),
            deployment: config.deployment.clone(),
        })
    }

    /// Full chat completions URL, including the `api-version` query.
    pub fn endpoint(&self) -> String {
        let config = self.client.config();
        Url::parse_with_params(&config.url("/chat/completions"), config.query())
            .map(String::from)
            .unwrap_or_else(|_| config.url("/chat/completions"))
    }

    fn build_request(
        &self,
        prompt: &str,
        options: &StreamOptions,
    ) -> Result<CreateChatCompletionRequest> {
        let messages = vec![ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()?
            .into()];

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.deployment.clone())
            .messages(messages)
            .stream(true);

        if let Some(max_tokens) = options.max_tokens {
            args.max_tokens(max_tokens);
        }
        if let Some(temperature) = options.temperature {
            args.temperature(temperature);
        }

        Ok(args.build()?)
    }
}

/// Content deltas of every choice, in order. The leading prompt-filter chunk
/// has no choices and role-only deltas have no content; both yield `None`.
fn chunk_text(chunk: CreateChatCompletionStreamResponse) -> Option<TextDelta> {
    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();

    (!text.is_empty()).then(|| TextDelta::new(text))
}

impl ProviderAdapter for AzureOpenAiAdapter {
    fn stream(&self, prompt: &str, options: &StreamOptions) -> TextDeltaStream {
        let client = self.client.clone();
        let request = self.build_request(prompt, options);

        Box::pin(try_stream! {
            let mut chunks = client.chat().create_stream(request?).await?;

            while let Some(chunk) = chunks.next().await {
                if let Some(delta) = chunk_text(chunk?) {
                    yield delta;
                }
            }
        })
    }
}
