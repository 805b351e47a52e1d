use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Admins notified when no `[telegram] admin_ids` list is configured.
pub const DEFAULT_ADMIN_IDS: [i64; 2] = [5084915945, 1762671580];

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub texts: TextsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_admin_ids")]
    pub admin_ids: Vec<i64>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupervisorConfig {
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthFormat {
    /// `running` as text/plain
    #[default]
    Plain,
    /// status/service/timestamp object
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    #[serde(default = "default_health_bind")]
    pub bind: String,
    #[serde(default = "default_health_port")]
    pub port: u16,
    #[serde(default)]
    pub format: HealthFormat,
    #[serde(default = "default_service_name")]
    pub service: String,
}

/// User-facing wording. `{username}` in `startup` is replaced with the bot's handle.
#[derive(Debug, Deserialize, Clone)]
pub struct TextsConfig {
    #[serde(default = "default_welcome")]
    pub welcome: String,
    #[serde(default = "default_ack_success")]
    pub ack_success: String,
    #[serde(default = "default_ack_failure")]
    pub ack_failure: String,
    #[serde(default = "default_startup")]
    pub startup: String,
}

fn default_admin_ids() -> Vec<i64> {
    DEFAULT_ADMIN_IDS.to_vec()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_restarts() -> u32 {
    5
}

fn default_backoff_base_secs() -> u64 {
    5
}

fn default_backoff_max_secs() -> u64 {
    60
}

fn default_health_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_health_port() -> u16 {
    8080
}

fn default_service_name() -> String {
    "suggestbot".to_string()
}

fn default_welcome() -> String {
    "Hi! Send us anything you'd like to see published and we'll take a look. \
     Don't forget to credit the author (a link is best). Posts without an author \
     or with offensive content will not be accepted."
        .to_string()
}

fn default_ack_success() -> String {
    "✅ Your message has been sent to the admins!".to_string()
}

fn default_ack_failure() -> String {
    "❌ Could not deliver your message. Please try again later.".to_string()
}

fn default_startup() -> String {
    "🤖 Suggestion bot @{username} is up!".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            admin_ids: default_admin_ids(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            bind: default_health_bind(),
            port: default_health_port(),
            format: HealthFormat::default(),
            service: default_service_name(),
        }
    }
}

impl Default for TextsConfig {
    fn default() -> Self {
        Self {
            welcome: default_welcome(),
            ack_success: default_ack_success(),
            ack_failure: default_ack_failure(),
            startup: default_startup(),
        }
    }
}

impl TelegramConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl HealthConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.bind, self.port);
        raw.parse()
            .map_err(|_| ConfigError::Invalid {
                name: "health address",
                value: raw,
            })
    }
}

impl Config {
    /// Load from `path` if it exists, apply environment overrides, then validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            Self::parse(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?
        } else {
            Config::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// `BOT_TOKEN` replaces the token, `PORT` replaces the health port.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.telegram.bot_token = token.trim().to_string();
        }
        if let Some(port) = lookup("PORT") {
            self.health.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid {
                    name: "PORT",
                    value: port.clone(),
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.telegram.admin_ids.is_empty() {
            return Err(ConfigError::NoAdmins);
        }
        self.health.socket_addr()?;
        Ok(())
    }
}
