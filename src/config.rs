use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::protocol::basic::BASIC_PROTOCOL_NAME;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub agreement_bot: AgreementBotConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgreementBotConfig {
    /// Identity of this agreement bot in the exchange
    pub exchange_id: String,
    /// Token used to authenticate with the exchange and to sign proposals
    pub exchange_token: String,
    /// Agreement protocol spoken by this bot
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Number of negotiation workers started at initialization
    #[serde(default = "default_agreement_workers")]
    pub agreement_workers: usize,
    /// Interval between deferred command sweeps in seconds
    #[serde(default = "default_deferred_interval")]
    pub deferred_command_interval_secs: u64,
    /// Seconds to wait for a proposal reply before timing the agreement out
    #[serde(default = "default_process_timeout")]
    pub process_timeout_secs: u64,
}

fn default_protocol() -> String {
    BASIC_PROTOCOL_NAME.to_string()
}

fn default_agreement_workers() -> usize {
    5
}

fn default_deferred_interval() -> u64 {
    10
}

fn default_process_timeout() -> u64 {
    180
}

impl Default for AgreementBotConfig {
    fn default() -> Self {
        Self {
            exchange_id: "agbot".to_string(),
            exchange_token: String::new(),
            protocol: default_protocol(),
            agreement_workers: default_agreement_workers(),
            deferred_command_interval_secs: default_deferred_interval(),
            process_timeout_secs: default_process_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("agreement_bot.exchange_id", "agbot")?
            .set_default("agreement_bot.exchange_token", "")?
            .set_default("agreement_bot.agreement_workers", 5)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("AGBOT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (AGBOT__AGREEMENT_BOT__AGREEMENT_WORKERS, etc.)
            .add_source(
                Environment::with_prefix("AGBOT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration for CLI usage
    pub fn default_config(agreement_workers: usize) -> Self {
        Self {
            agreement_bot: AgreementBotConfig {
                agreement_workers,
                ..Default::default()
            },
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let ab = &self.agreement_bot;

        if ab.exchange_id.trim().is_empty() {
            errors.push("exchange_id must not be empty".to_string());
        }

        if ab.agreement_workers == 0 {
            errors.push("agreement_workers must be at least 1".to_string());
        }

        if ab.protocol != BASIC_PROTOCOL_NAME {
            errors.push(format!(
                "protocol {} is not supported, expected {}",
                ab.protocol, BASIC_PROTOCOL_NAME
            ));
        }

        if ab.deferred_command_interval_secs == 0 {
            errors.push("deferred_command_interval_secs must be positive".to_string());
        }

        if ab.process_timeout_secs == 0 {
            errors.push("process_timeout_secs must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
