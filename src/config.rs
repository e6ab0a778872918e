//! Bot configuration from environment variables

use std::time::Duration;
use thiserror::Error;

const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} must be a whole number of seconds, got {value:?}")]
    InvalidSeconds { name: &'static str, value: String },
}

/// Runtime configuration for the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub telegram_token: String,
    pub db_path: String,
    /// `None` disables session expiry
    pub session_ttl: Option<chrono::Duration>,
    pub sweep_interval: Duration,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let telegram_token = lookup("QUIZBOT_TELEGRAM_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::Missing("QUIZBOT_TELEGRAM_TOKEN"))?;

        let db_path = lookup("QUIZBOT_DB_PATH").unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            format!("{home}/.quizbot/quizbot.db")
        });

        let ttl_secs = seconds(&lookup, "QUIZBOT_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?;
        let session_ttl = match ttl_secs {
            0 => None,
            secs => Some(chrono::Duration::seconds(i64::try_from(secs).map_err(|_| {
                ConfigError::InvalidSeconds {
                    name: "QUIZBOT_SESSION_TTL_SECS",
                    value: secs.to_string(),
                }
            })?)),
        };

        let sweep_secs = seconds(&lookup, "QUIZBOT_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;
        if sweep_secs == 0 {
            return Err(ConfigError::InvalidSeconds {
                name: "QUIZBOT_SWEEP_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            telegram_token,
            db_path,
            session_ttl,
            sweep_interval: Duration::from_secs(sweep_secs),
        })
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidSeconds { name, value }),
    }
}
