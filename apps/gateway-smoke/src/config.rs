//! Environment-backed configuration for `gateway-smoke`.

use std::env;

use gateway_backend::BackendClientConfig;
use gateway_core::SessionConfig;
use gateway_runtime::{FacadeConfig, GatewayOptions};
use thiserror::Error;

const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_BACKEND_ATTEMPTS: u32 = 3;
const DEFAULT_INIT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
const DEFAULT_OTP_EXPIRY_MINUTES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Remote backend base URL. The in-memory backend is used when unset.
    pub backend_url: Option<String>,
    pub backend_api_key: Option<String>,
    pub backend_timeout_ms: u64,
    pub backend_attempts: u32,
    pub session: SessionConfig,
    pub facade: FacadeConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let backend_url = optional_trimmed_env("GATEWAY_BACKEND_URL", &mut lookup);
        let backend_api_key = optional_trimmed_env("GATEWAY_BACKEND_API_KEY", &mut lookup);
        let backend_timeout_ms = parse_or(
            "GATEWAY_BACKEND_TIMEOUT_MS",
            DEFAULT_BACKEND_TIMEOUT_MS,
            &mut lookup,
        )?;
        let backend_attempts = parse_or(
            "GATEWAY_BACKEND_ATTEMPTS",
            DEFAULT_BACKEND_ATTEMPTS,
            &mut lookup,
        )?;
        let init_timeout_ms = parse_or(
            "GATEWAY_INIT_TIMEOUT_MS",
            DEFAULT_INIT_TIMEOUT_MS,
            &mut lookup,
        )?;
        let reconnect_delay_ms = parse_or(
            "GATEWAY_RECONNECT_DELAY_MS",
            DEFAULT_RECONNECT_DELAY_MS,
            &mut lookup,
        )?;
        let reconnect_on_init_timeout =
            parse_flag("GATEWAY_RECONNECT_ON_INIT_TIMEOUT", &mut lookup)?;
        let otp_expiry_minutes = parse_or(
            "GATEWAY_OTP_EXPIRY_MINUTES",
            DEFAULT_OTP_EXPIRY_MINUTES,
            &mut lookup,
        )?;
        let default_webhook_url = optional_trimmed_env("GATEWAY_DEFAULT_WEBHOOK_URL", &mut lookup);

        if backend_attempts == 0 {
            return Err(ConfigError::at_least_one("GATEWAY_BACKEND_ATTEMPTS"));
        }
        if otp_expiry_minutes == 0 {
            return Err(ConfigError::at_least_one("GATEWAY_OTP_EXPIRY_MINUTES"));
        }

        Ok(Self {
            backend_url,
            backend_api_key,
            backend_timeout_ms,
            backend_attempts,
            session: SessionConfig {
                init_timeout_ms,
                reconnect_delay_ms,
                reconnect_on_init_timeout,
            },
            facade: FacadeConfig {
                otp_expiry_minutes,
                default_webhook_url,
            },
        })
    }

    /// HTTP backend settings, or `None` for the in-memory backend.
    pub fn backend_client_config(&self) -> Option<BackendClientConfig> {
        let base_url = self.backend_url.as_ref()?;
        let mut config = BackendClientConfig::new(base_url.clone());
        config.api_key = self.backend_api_key.clone();
        config.request_timeout_ms = self.backend_timeout_ms;
        config.max_attempts = self.backend_attempts;
        Some(config)
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            session: self.session,
            facade: self.facade.clone(),
            ..GatewayOptions::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn at_least_one(key: &'static str) -> Self {
        Self::InvalidValue {
            key,
            value: "0".to_owned(),
            reason: "must be at least 1".to_owned(),
        }
    }
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_or<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        reason: err.to_string(),
        value,
    })
}

fn parse_flag<F>(key: &'static str, lookup: &mut F) -> Result<bool, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(false);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected true or false".to_owned(),
        }),
    }
}
