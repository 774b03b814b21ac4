//! Application configuration loaded from environment variables.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Matrix configuration
    pub matrix: MatrixConfig,

    /// Bot configuration
    #[serde(default)]
    pub bot: BotConfig,

    /// Call session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// gRPC client configuration
    #[serde(default)]
    pub grpc: GrpcConfig,

    /// Service catalog configuration
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Payment configuration
    pub payments: mpe_payments::PaymentConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatrixConfig {
    /// Homeserver base URL
    pub homeserver_url: String,

    /// Access token of the bot account
    pub access_token: SecretString,

    /// Bot account, e.g. `@snetbot:matrix.org`
    pub user_id: String,

    /// Long-poll timeout of `/sync`
    #[serde(default = "default_sync_timeout", with = "humantime_serde")]
    pub sync_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Name that addresses the bot in group rooms
    #[serde(default = "default_bot_name")]
    pub name: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// How long an idle call session is kept
    #[serde(default = "default_session_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrpcConfig {
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Bound on a single service call
    #[serde(default = "default_call_timeout", with = "humantime_serde")]
    pub call_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// JSON manifest of callable services
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
}

// Default implementations
impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: default_session_ttl(),
        }
    }
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            call_timeout: default_call_timeout(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
        }
    }
}

// Default value functions
fn default_sync_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_bot_name() -> String {
    "snetbot".into()
}

fn default_log_level() -> String {
    "info".into()
}

fn default_session_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_manifest() -> PathBuf {
    PathBuf::from("catalog.json")
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    // Keys and addresses are hex strings; keep strings as strings.
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// A session must outlive the payment it waits for.
    pub fn validate(&self) -> Result<()> {
        if self.session.ttl <= self.payments.payment_timeout {
            bail!(
                "session.ttl ({:?}) must be longer than payments.payment_timeout ({:?})",
                self.session.ttl,
                self.payments.payment_timeout
            );
        }
        Ok(())
    }
}
