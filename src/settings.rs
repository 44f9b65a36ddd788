// Application settings.
//
// Sources, later ones win:
//   /etc/moderator.{yml,yaml}   (optional)
//   etc/moderator.{yml,yaml}    (optional, relative to the working dir)
//   MODERATOR_* environment     (nested keys joined with `__`)

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::core::ingestion::{IngestionConfig, OverflowPolicy};
use crate::core::moderation::{ApiError, ContentKind, EnforcementStrategy, ModerationConfig};
use crate::infra::moderation::RedisMode;

const CONFIG_FILES: [&str; 2] = ["/etc/moderator", "etc/moderator"];
const ENV_PREFIX: &str = "MODERATOR";
// Longest window or restriction accepted. Telegram treats longer
// restrictions as permanent.
const MAX_PERIOD_SECS: u64 = 366 * 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Missing required setting `{0}`")]
    MissingField(&'static str),
    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("Invalid store address list `{0}`")]
    InvalidStoreAddress(String),
    #[error("Counter store unavailable: {0}")]
    Store(#[source] redis::RedisError),
    #[error("Failed to build the Telegram client: {0}")]
    Client(#[source] ApiError),
    #[error("Failed to register the webhook: {0}")]
    Webhook(#[source] ApiError),
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub telegram: TelegramSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub moderation: ModerationSettings,
    #[serde(default)]
    pub ingestion: IngestionSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub token: String,
    /// Public base URL Telegram calls back
    pub url: String,
    /// Webhook path, appended to `url`
    pub path: String,
    /// SOCKS5 proxy for outbound calls
    pub proxy: Option<String>,
    pub secret_token: Option<String>,
    pub api_base: String,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            token: String::new(),
            url: String::new(),
            path: String::new(),
            proxy: None,
            secret_token: None,
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// Single process only
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Comma-separated `host:port` or `redis://host:port` list
    pub addrs: String,
    pub mode: RedisMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub listen: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModerationSettings {
    pub threshold: i64,
    pub window_secs: u64,
    pub restrict_secs: u64,
    pub monitored_kinds: Vec<ContentKind>,
    pub strategy: EnforcementStrategy,
    pub key_domain: String,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        let defaults = ModerationConfig::default();
        Self {
            threshold: defaults.threshold,
            window_secs: defaults.window.as_secs(),
            restrict_secs: defaults.restrict_duration.as_secs(),
            monitored_kinds: vec![ContentKind::Sticker, ContentKind::Photo],
            strategy: defaults.strategy,
            key_domain: defaults.key_domain,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub shutdown_grace_secs: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        let defaults = IngestionConfig::default();
        Self {
            workers: defaults.workers,
            queue_capacity: defaults.queue_capacity,
            overflow: defaults.overflow,
            shutdown_grace_secs: defaults.shutdown_grace.as_secs(),
        }
    }
}

impl AppConfig {
    /// Load from the standard files and the process environment, then validate.
    pub fn load() -> Result<Self, StartupError> {
        Self::load_from(&CONFIG_FILES, env_source(None))
    }

    pub fn load_from(files: &[&str], env: Environment) -> Result<Self, StartupError> {
        let mut builder = Config::builder();
        for file in files {
            builder = builder.add_source(File::with_name(file).required(false));
        }

        let settings: AppConfig = builder.add_source(env).build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), StartupError> {
        let required = [
            ("telegram.token", &self.telegram.token),
            ("telegram.url", &self.telegram.url),
            ("telegram.path", &self.telegram.path),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(StartupError::MissingField(field));
            }
        }

        if self.store.backend == StoreBackend::Redis && self.store.addrs.trim().is_empty() {
            return Err(StartupError::MissingField("store.addrs"));
        }

        let positive = [
            ("moderation.threshold", self.moderation.threshold > 0),
            ("moderation.window_secs", self.moderation.window_secs > 0),
            ("moderation.restrict_secs", self.moderation.restrict_secs > 0),
            ("ingestion.workers", self.ingestion.workers > 0),
            ("ingestion.queue_capacity", self.ingestion.queue_capacity > 0),
        ];
        for (field, ok) in positive {
            if !ok {
                return Err(StartupError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        let periods = [
            ("moderation.window_secs", self.moderation.window_secs),
            ("moderation.restrict_secs", self.moderation.restrict_secs),
        ];
        for (field, secs) in periods {
            if secs > MAX_PERIOD_SECS {
                return Err(StartupError::Invalid {
                    field,
                    reason: format!("must be at most {} seconds (366 days)", MAX_PERIOD_SECS),
                });
            }
        }

        if self.moderation.key_domain.trim().is_empty() {
            return Err(StartupError::MissingField("moderation.key_domain"));
        }

        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, StartupError> {
        self.server
            .listen
            .parse()
            .map_err(|e: std::net::AddrParseError| StartupError::Invalid {
                field: "server.listen",
                reason: e.to_string(),
            })
    }

    /// `url` and `path` joined with exactly one slash.
    pub fn webhook_url(&self) -> String {
        format!(
            "{}/{}",
            self.telegram.url.trim_end_matches('/'),
            self.telegram.path.trim_start_matches('/')
        )
    }

    pub fn moderation_config(&self) -> ModerationConfig {
        let m = &self.moderation;
        ModerationConfig {
            threshold: m.threshold,
            window: Duration::from_secs(m.window_secs),
            restrict_duration: Duration::from_secs(m.restrict_secs),
            monitored_kinds: m.monitored_kinds.iter().copied().collect(),
            strategy: m.strategy,
            key_domain: m.key_domain.clone(),
        }
    }

    pub fn ingestion_config(&self) -> IngestionConfig {
        let i = &self.ingestion;
        IngestionConfig {
            workers: i.workers,
            queue_capacity: i.queue_capacity,
            overflow: i.overflow,
            shutdown_grace: Duration::from_secs(i.shutdown_grace_secs),
        }
    }
}

/// `MODERATOR_*` variables. `vars` replaces the process environment (tests).
pub fn env_source(vars: Option<HashMap<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("moderation.monitored_kinds")
        .try_parsing(true)
        .source(vars)
}
