use std::sync::Arc;

use url::Url;

use crate::config::RelayConfig;
use crate::error::Result;

#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<RelayConfig>,
    pub client: reqwest::Client,
    /// `{anthropic_base_url}/v1/messages`, resolved once at startup.
    pub messages_url: Url,
}

impl RelayState {
    pub fn new(config: RelayConfig, client: reqwest::Client) -> Result<Self> {
        let messages_url = Url::parse(&format!(
            "{}/v1/messages",
            config.anthropic_base_url.trim_end_matches('/')
        ))?;

        Ok(Self {
            config: Arc::new(config),
            client,
            messages_url,
        })
    }
}
