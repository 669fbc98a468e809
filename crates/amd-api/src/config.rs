use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use amd_core::util::is_http_url;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Apps Script web app that stores leads and issues partner tokens.
    pub gas_exec_url: Option<String>,
    pub webhook_secret: Option<String>,
    /// Landing path for the redirect exchange.
    pub redirect_base_path: String,
    pub upstream_timeout: Duration,
    pub rate_limit_window: Duration,
    pub lead_rate_limit_per_window: u32,
    pub token_rate_limit_per_window: u32,
}

/// Both halves of the upstream configuration, present together or not at all.
#[derive(Clone, Copy)]
pub struct UpstreamTarget<'a> {
    pub exec_url: &'a str,
    pub secret: &'a str,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("gas_exec_url", &self.gas_exec_url)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("redirect_base_path", &self.redirect_base_path)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "lead_rate_limit_per_window",
                &self.lead_rate_limit_per_window,
            )
            .field(
                "token_rate_limit_per_window",
                &self.token_rate_limit_per_window,
            )
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "AMD_API_BIND_ADDR", "127.0.0.1:8080");

        let gas_exec_url = optional_trimmed(&lookup, "GAS_EXEC_URL");
        if let Some(url) = gas_exec_url.as_deref() {
            if !is_http_url(url) {
                return Err(ConfigError::Invalid(
                    "GAS_EXEC_URL must start with http:// or https://".to_string(),
                ));
            }
        }
        let webhook_secret = optional_trimmed(&lookup, "WEBHOOK_SECRET");
        if gas_exec_url.is_none() || webhook_secret.is_none() {
            tracing::warn!(
                "GAS_EXEC_URL or WEBHOOK_SECRET is not set; lead and token endpoints will report a configuration error"
            );
        }

        let redirect_base_path = value_or_default(&lookup, "REDIRECT_BASE_PATH", "/en/");
        if !redirect_base_path.starts_with('/') || redirect_base_path.starts_with("//") {
            return Err(ConfigError::Invalid(
                "REDIRECT_BASE_PATH must be a site-relative path such as /en/".to_string(),
            ));
        }

        let upstream_timeout_secs = value_or_default(&lookup, "UPSTREAM_TIMEOUT_SECS", "10")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "UPSTREAM_TIMEOUT_SECS must be an integer in [1, 60]".to_string(),
                )
            })?;
        if !(1..=60).contains(&upstream_timeout_secs) {
            return Err(ConfigError::Invalid(
                "UPSTREAM_TIMEOUT_SECS must be in [1, 60]".to_string(),
            ));
        }

        let rate_limit_window_secs = value_or_default(&lookup, "RATE_LIMIT_WINDOW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RATE_LIMIT_WINDOW_SECS must be an integer in [10, 3600]".to_string(),
                )
            })?;
        if !(10..=3_600).contains(&rate_limit_window_secs) {
            return Err(ConfigError::Invalid(
                "RATE_LIMIT_WINDOW_SECS must be in [10, 3600]".to_string(),
            ));
        }

        let lead_rate_limit_per_window =
            value_or_default(&lookup, "LEAD_RATE_LIMIT_PER_WINDOW", "30")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "LEAD_RATE_LIMIT_PER_WINDOW must be an integer in [1, 1000]".to_string(),
                    )
                })?;
        if !(1..=1_000).contains(&lead_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "LEAD_RATE_LIMIT_PER_WINDOW must be in [1, 1000]".to_string(),
            ));
        }

        let token_rate_limit_per_window =
            value_or_default(&lookup, "TOKEN_RATE_LIMIT_PER_WINDOW", "60")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "TOKEN_RATE_LIMIT_PER_WINDOW must be an integer in [1, 5000]".to_string(),
                    )
                })?;
        if !(1..=5_000).contains(&token_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "TOKEN_RATE_LIMIT_PER_WINDOW must be in [1, 5000]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            gas_exec_url,
            webhook_secret,
            redirect_base_path,
            upstream_timeout: Duration::from_secs(upstream_timeout_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            lead_rate_limit_per_window,
            token_rate_limit_per_window,
        })
    }

    pub fn upstream(&self) -> Option<UpstreamTarget<'_>> {
        Some(UpstreamTarget {
            exec_url: self.gas_exec_url.as_deref()?,
            secret: self.webhook_secret.as_deref()?,
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = config_from(&HashMap::new()).unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.redirect_base_path, "/en/");
        assert_eq!(config.upstream_timeout, Duration::from_secs(10));
        assert_eq!(config.lead_rate_limit_per_window, 30);
        assert_eq!(config.token_rate_limit_per_window, 60);
        assert!(config.upstream().is_none());
    }

    #[test]
    fn upstream_needs_both_url_and_secret() {
        let mut map = HashMap::new();
        map.insert("GAS_EXEC_URL", "https://script.google.com/macros/s/abc/exec");
        assert!(config_from(&map).unwrap().upstream().is_none());

        map.insert("WEBHOOK_SECRET", "  s3cret ");
        let config = config_from(&map).unwrap();
        let upstream = config.upstream().unwrap();
        assert_eq!(upstream.secret, "s3cret");
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let mut map = HashMap::new();
        map.insert("UPSTREAM_TIMEOUT_SECS", "0");
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("UPSTREAM_TIMEOUT_SECS"));

        let mut map = HashMap::new();
        map.insert("REDIRECT_BASE_PATH", "//evil.example.com/");
        assert!(config_from(&map).is_err());

        let mut map = HashMap::new();
        map.insert("GAS_EXEC_URL", "ftp://script.google.com");
        assert!(config_from(&map).is_err());
    }

    #[test]
    fn config_redacts_webhook_secret() {
        let mut map = HashMap::new();
        map.insert("GAS_EXEC_URL", "https://script.google.com/macros/s/abc/exec");
        map.insert("WEBHOOK_SECRET", "sensitive-webhook-secret");

        let config = config_from(&map).unwrap();

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sensitive-webhook-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
