use std::env;

use crate::provider::RelayFraming;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

/// Empty values count as unset so `KEY=` in a `.env` file does not pass
/// credential checks.
fn env_non_empty(var: &str) -> Option<String> {
    env::var(var).ok().filter(|value| !value.trim().is_empty())
}

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-01";
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3000/api/anthropic";

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upstream settings for the server-side relay. The key is read per request
/// so a relay started without it still answers with a descriptive error.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub anthropic_version: String,
}

#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    pub gemini: GeminiConfig,
    pub gpt4_turbo: AzureDeploymentConfig,
    pub gpt4: AzureDeploymentConfig,
    pub gpt35: AzureDeploymentConfig,
    pub claude: ClaudeRelayConfig,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

/// One Azure OpenAI resource hosting one chat deployment.
#[derive(Debug, Clone)]
pub struct AzureDeploymentConfig {
    pub name: String,
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub deployment: String,
    pub api_version: String,
    /// Variable names reported when the deployment is enabled but unconfigured.
    pub endpoint_var: &'static str,
    pub key_var: &'static str,
}

#[derive(Debug, Clone)]
pub struct ClaudeRelayConfig {
    pub enabled: bool,
    pub relay_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// How the relayed body becomes text; `raw` keeps every byte.
    pub framing: RelayFraming,
}

impl AzureDeploymentConfig {
    fn from_env(
        name: &str,
        deployment: &str,
        enable_var: &str,
        endpoint_var: &'static str,
        key_var: &'static str,
        enabled_by_default: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            enabled: parse_env_or(enable_var, enabled_by_default),
            endpoint: env_non_empty(endpoint_var),
            api_key: env_non_empty(key_var),
            deployment: deployment.to_string(),
            api_version: env::var("AZURE_API_VERSION")
                .unwrap_or_else(|_| DEFAULT_AZURE_API_VERSION.to_string()),
            endpoint_var,
            key_var,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env::var("CHORUS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env_or("CHORUS_PORT", 3000),
            },
            relay: RelayConfig {
                anthropic_api_key: env_non_empty("ANTHROPIC_API_KEY"),
                anthropic_base_url: env::var("ANTHROPIC_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
                anthropic_version: env::var("ANTHROPIC_VERSION")
                    .unwrap_or_else(|_| DEFAULT_ANTHROPIC_VERSION.to_string()),
            },
            providers: ProvidersConfig {
                gemini: GeminiConfig {
                    enabled: parse_env_or("ENABLE_GEMINI", true),
                    api_key: env_non_empty("GEMINI_API_KEY"),
                    model: env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-pro".to_string()),
                    base_url: env::var("GEMINI_BASE_URL")
                        .unwrap_or_else(|_| DEFAULT_GEMINI_BASE_URL.to_string()),
                },
                gpt4_turbo: AzureDeploymentConfig::from_env(
                    "GPT-4 Turbo",
                    "gpt-4-turbo",
                    "ENABLE_GPT4_TURBO",
                    "AZURE_ENDPOINT",
                    "AZURE_KEY",
                    true,
                ),
                gpt4: AzureDeploymentConfig::from_env(
                    "GPT-4",
                    "gpt-4",
                    "ENABLE_GPT4",
                    "AZURE_ENDPOINT2",
                    "AZURE_KEY2",
                    false,
                ),
                gpt35: AzureDeploymentConfig::from_env(
                    "GPT-3.5 Turbo",
                    "gpt-35-turbo",
                    "ENABLE_GPT35",
                    "AZURE_ENDPOINT3",
                    "AZURE_KEY3",
                    false,
                ),
                claude: ClaudeRelayConfig {
                    enabled: parse_env_or("ENABLE_CLAUDE", false),
                    relay_url: env::var("RELAY_URL")
                        .unwrap_or_else(|_| DEFAULT_RELAY_URL.to_string()),
                    model: env::var("CLAUDE_MODEL")
                        .unwrap_or_else(|_| "claude-3-opus-20240229".to_string()),
                    max_tokens: parse_env_or("CLAUDE_MAX_TOKENS", 1024),
                    framing: parse_env_or("CLAUDE_RELAY_FRAMING", RelayFraming::default()),
                },
                max_tokens: parse_env_opt("MAX_TOKENS"),
                temperature: parse_env_opt("TEMPERATURE"),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}
