//! Environment-backed runtime configuration for the smoke harness.

use std::{env, error::Error, fmt};

use client_core::EngineConfig;

const DEFAULT_SERVER_URL: &str = "https://chat.example.org";
const DEFAULT_SELF_USER: &str = "u-demo-self";
const DEFAULT_PEER_USER: &str = "u-demo-peer";
const DEFAULT_CONVERSATION: &str = "conv-demo";

/// Runtime configuration for the smoke harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// Backend base URL (normalized later by the gateway).
    pub server_url: String,
    /// Local user id driving the scripted conversation.
    pub self_user_id: String,
    /// The other participant.
    pub peer_user_id: String,
    /// Conversation id opened by the scenario.
    pub conversation_id: String,
    /// Engine tuning overrides.
    pub engine: EngineConfig,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            match_tolerance_ms: parse_optional_u64(
                "WRENCHAT_MATCH_TOLERANCE_MS",
                defaults.match_tolerance_ms,
                &mut lookup,
            )?,
            typing_timeout_ms: parse_optional_u64(
                "WRENCHAT_TYPING_TIMEOUT_MS",
                defaults.typing_timeout_ms,
                &mut lookup,
            )?,
            presence_poll_interval_ms: parse_optional_u64(
                "WRENCHAT_PRESENCE_POLL_INTERVAL_MS",
                defaults.presence_poll_interval_ms,
                &mut lookup,
            )?,
        };

        if engine.typing_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WRENCHAT_TYPING_TIMEOUT_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            server_url: trimmed_or(
                "WRENCHAT_SERVER_URL",
                DEFAULT_SERVER_URL,
                &mut lookup,
            ),
            self_user_id: trimmed_or("WRENCHAT_SELF_USER", DEFAULT_SELF_USER, &mut lookup),
            peer_user_id: trimmed_or("WRENCHAT_PEER_USER", DEFAULT_PEER_USER, &mut lookup),
            conversation_id: trimmed_or(
                "WRENCHAT_CONVERSATION",
                DEFAULT_CONVERSATION,
                &mut lookup,
            ),
            engine,
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn trimmed_or<F>(key: &'static str, default: &str, lookup: &mut F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_owned())
}

fn parse_optional_u64<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
