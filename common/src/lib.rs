/*!
common/src/lib.rs

Shared configuration types and credential loading for newsframe.

This file provides:
- Config data structures (deserialized from TOML, every section optional)
- An async loader merging a default TOML file with an override file
- Credentials read from the process environment, validated before any network call
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable holding the AI provider API key
pub const XAI_API_KEY: &str = "XAI_API_KEY";
pub const TWITTER_CONSUMER_KEY: &str = "TWITTER_CONSUMER_KEY";
pub const TWITTER_CONSUMER_SECRET: &str = "TWITTER_CONSUMER_SECRET";
pub const TWITTER_ACCESS_TOKEN: &str = "TWITTER_ACCESS_TOKEN";
pub const TWITTER_ACCESS_TOKEN_SECRET: &str = "TWITTER_ACCESS_TOKEN_SECRET";
/// Environment variable holding the news provider API key
pub const NEWS_API_KEY: &str = "NEWS_API_KEY";

/// Every variable that must be present (and non-empty) at startup, in reporting order.
pub const REQUIRED_ENV_VARS: [&str; 6] = [
    XAI_API_KEY,
    TWITTER_CONSUMER_KEY,
    TWITTER_CONSUMER_SECRET,
    TWITTER_ACCESS_TOKEN,
    TWITTER_ACCESS_TOKEN_SECRET,
    NEWS_API_KEY,
];

/// Smallest caption limit that still fits one link (weighted 23) and a character.
pub const MIN_CAPTION_CHARS: usize = 24;

/// Longest history retention accepted, in days.
pub const MAX_RETENTION_DAYS: i64 = 3650;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingVariables(Vec<&'static str>),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to load configuration: {0}")]
    File(String),
}

/// News provider section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    /// Top-headlines endpoint (NewsAPI v2 wire format)
    pub endpoint: String,
    /// ISO 3166 two-letter country code
    pub country: String,
    pub category: String,
    pub page_size: Option<u32>,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://newsapi.org/v2/top-headlines".to_string(),
            country: "us".to_string(),
            category: "technology".to_string(),
            page_size: None,
        }
    }
}

/// Generative AI provider section (OpenAI-compatible HTTP API)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// API root, e.g. "https://api.x.ai/v1"; `/chat/completions` and `/images/generations` are appended
    pub base_url: String,
    pub chat_model: String,
    pub image_model: String,
    /// "url" or "b64_json"
    pub image_response_format: String,
    pub timeout_seconds: u64,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.x.ai/v1".to_string(),
            chat_model: "grok-4-1-fast-reasoning".to_string(),
            image_model: "grok-imagine-image-pro".to_string(),
            image_response_format: "url".to_string(),
            timeout_seconds: 120,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Image prompt composition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub system: String,
    /// Length requested from the model
    pub target_chars: usize,
    /// Hard cap enforced after sanitising the completion
    pub max_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: "Image prompt engineer. Output: dense, photorealistic prompts.".to_string(),
            target_chars: 160,
            max_chars: 1000,
        }
    }
}

/// Caption composition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionConfig {
    pub system: String,
    pub target_chars: usize,
    /// Platform post limit; URLs count as 23 characters
    pub max_chars: usize,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            system: "Tweet writer. Include article URLs for deals, guides, resources, breaking news. \
                     Concise, standalone, journalistic."
                .to_string(),
            target_chars: 160,
            max_chars: 280,
        }
    }
}

/// Social platform endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub media_upload_url: String,
    pub posts_url: String,
    /// Reply to the new post with the article source link
    pub source_reply: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            media_upload_url: "https://upload.twitter.com/1.1/media/upload.json".to_string(),
            posts_url: "https://api.twitter.com/2/tweets".to_string(),
            source_reply: false,
        }
    }
}

/// Outbound HTTP client settings shared by every component
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            user_agent: concat!("newsframe/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Posted-article history (disabled when `path` is unset)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub path: Option<PathBuf>,
    pub retention_days: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            retention_days: 7,
        }
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub news: NewsConfig,
    pub ai: AiConfig,
    pub prompt: PromptConfig,
    pub caption: CaptionConfig,
    pub publish: PublishConfig,
    pub http: HttpConfig,
    pub history: HistoryConfig,
}

impl Config {
    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence). Keys absent
    /// from both fall back to the built-in defaults.
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Reject settings the pipeline cannot run with. Called once at startup.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let endpoints = [
            ("news.endpoint", &self.news.endpoint),
            ("ai.base_url", &self.ai.base_url),
            ("publish.media_upload_url", &self.publish.media_upload_url),
            ("publish.posts_url", &self.publish.posts_url),
        ];
        for (key, value) in endpoints {
            let parsed = url::Url::parse(value)
                .map_err(|e| ConfigError::Invalid(format!("{} '{}': {}", key, value, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!("{} must be an http(s) URL", key)));
            }
        }

        if self.news.country.trim().is_empty() {
            return Err(ConfigError::Invalid("news.country must not be empty".into()));
        }
        if self.ai.chat_model.trim().is_empty() || self.ai.image_model.trim().is_empty() {
            return Err(ConfigError::Invalid("ai.chat_model and ai.image_model must be set".into()));
        }
        if !matches!(self.ai.image_response_format.as_str(), "url" | "b64_json") {
            return Err(ConfigError::Invalid(format!(
                "ai.image_response_format must be \"url\" or \"b64_json\", got \"{}\"",
                self.ai.image_response_format
            )));
        }
        if self.ai.timeout_seconds == 0 || self.http.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("timeouts must be at least one second".into()));
        }

        for (key, target, max) in [
            ("prompt", self.prompt.target_chars, self.prompt.max_chars),
            ("caption", self.caption.target_chars, self.caption.max_chars),
        ] {
            if max == 0 {
                return Err(ConfigError::Invalid(format!("{}.max_chars must be positive", key)));
            }
            if target > max {
                return Err(ConfigError::Invalid(format!(
                    "{}.target_chars ({}) exceeds {}.max_chars ({})",
                    key, target, key, max
                )));
            }
        }

        if self.caption.max_chars < MIN_CAPTION_CHARS {
            return Err(ConfigError::Invalid(format!(
                "caption.max_chars must be at least {}",
                MIN_CAPTION_CHARS
            )));
        }

        if !(1..=MAX_RETENTION_DAYS).contains(&self.history.retention_days) {
            return Err(ConfigError::Invalid(format!(
                "history.retention_days must be between 1 and {}",
                MAX_RETENTION_DAYS
            )));
        }

        Ok(())
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// OAuth 1.0a user-context token set for the social platform
#[derive(Clone)]
pub struct TwitterCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

impl fmt::Debug for TwitterCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitterCredentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("access_token_secret", &"<redacted>")
            .finish()
    }
}

/// Secrets required by a run. Never read from the TOML files.
#[derive(Clone)]
pub struct Credentials {
    pub ai_api_key: String,
    pub news_api_key: String,
    pub twitter: TwitterCredentials,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ai_api_key", &"<redacted>")
            .field("news_api_key", &"<redacted>")
            .field("twitter", &self.twitter)
            .finish()
    }
}

impl Credentials {
    /// Read every required variable from the process environment.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build credentials from an arbitrary lookup. Empty or whitespace-only values
    /// count as missing; all missing names are reported at once.
    pub fn from_lookup<F>(lookup: F) -> std::result::Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut fetch = |name: &'static str| -> String {
            match lookup(name) {
                Some(value) if !value.trim().is_empty() => value,
                _ => {
                    missing.push(name);
                    String::new()
                }
            }
        };

        let ai_api_key = fetch(XAI_API_KEY);
        let consumer_key = fetch(TWITTER_CONSUMER_KEY);
        let consumer_secret = fetch(TWITTER_CONSUMER_SECRET);
        let access_token = fetch(TWITTER_ACCESS_TOKEN);
        let access_token_secret = fetch(TWITTER_ACCESS_TOKEN_SECRET);
        let news_api_key = fetch(NEWS_API_KEY);

        if !missing.is_empty() {
            return Err(ConfigError::MissingVariables(missing));
        }

        Ok(Self {
            ai_api_key,
            news_api_key,
            twitter: TwitterCredentials {
                consumer_key,
                consumer_secret,
                access_token,
                access_token_secret,
            },
        })
    }
}
