//! Site configuration for the attribution scripts.
//!
//! One `SiteConfig` replaces the per-page copies of host lists and constants.
//! Every field has a default, so an empty JSON object is a valid configuration.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::is_http_url;

const DEFAULT_TOKEN_TTL_SECS: u64 = 60 * 60;
const DEFAULT_SUBMISSION_LOCK_SECS: u64 = 8;
const DEFAULT_REFERENCE_WAIT_MS: u64 = 4_000;

/// How a missing token is obtained when a partner arrives without one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStrategy {
    /// Send the whole page through the redirect endpoint.
    Redirect,
    /// Call the JSON exchange endpoint and rewrite the URL in place.
    #[default]
    Fetch,
}

/// Page-independent configuration shared by every script on the site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Partner-facing destination hosts (transfer/tour sub-sites).
    pub pass_hosts: BTreeSet<String>,
    /// Hosts the main site runs under.
    pub main_hosts: BTreeSet<String>,
    /// Clear all stored attribution when a page loads without `partner`.
    pub reset_on_bare_visit: bool,
    pub token_ttl_secs: u64,
    pub submission_lock_secs: u64,
    pub lead_endpoint: String,
    pub token_endpoint: String,
    pub redirect_endpoint: String,
    pub token_strategy: TokenStrategy,
    pub reference_wait_ms: u64,
    pub whatsapp_number: String,
    pub email_address: String,
    /// Base path for partner brand logos, without trailing slash.
    pub partner_logo_base: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            pass_hosts: [
                "transfer.amd-germancenter.com",
                "tours.amd-germancenter.com",
                "amdtransfer.netlify.app",
                "amdtourbooking.netlify.app",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            main_hosts: [
                "neuewebsite.netlify.app",
                "www.amd-germancenter.com",
                "amd-germancenter.com",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            reset_on_bare_visit: false,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            submission_lock_secs: DEFAULT_SUBMISSION_LOCK_SECS,
            lead_endpoint: "/.netlify/functions/leads".to_string(),
            token_endpoint: "/.netlify/functions/token".to_string(),
            redirect_endpoint: "/r".to_string(),
            token_strategy: TokenStrategy::default(),
            reference_wait_ms: DEFAULT_REFERENCE_WAIT_MS,
            whatsapp_number: "96181622668".to_string(),
            email_address: "info@amd-germancenter.com".to_string(),
            partner_logo_base: "../assets/partners".to_string(),
        }
    }
}

impl SiteConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.token_ttl_secs == 0 {
            return Err(Error::InvalidInput(
                "token_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.submission_lock_secs == 0 {
            return Err(Error::InvalidInput(
                "submission_lock_secs must be greater than zero".to_string(),
            ));
        }
        for (field, value) in [
            ("lead_endpoint", &self.lead_endpoint),
            ("token_endpoint", &self.token_endpoint),
            ("redirect_endpoint", &self.redirect_endpoint),
        ] {
            validate_endpoint(field, value)?;
        }
        if self.whatsapp_number.trim().is_empty()
            || !self.whatsapp_number.chars().all(|c| c.is_ascii_digit())
        {
            return Err(Error::InvalidInput(
                "whatsapp_number must contain digits only".to_string(),
            ));
        }
        Ok(())
    }

    pub const fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub const fn submission_lock_window(&self) -> Duration {
        Duration::from_secs(self.submission_lock_secs)
    }

    pub const fn reference_wait(&self) -> Duration {
        Duration::from_millis(self.reference_wait_ms)
    }
}

/// Endpoints are either same-origin absolute paths or full http(s) URLs.
fn validate_endpoint(field: &str, value: &str) -> Result<()> {
    let value = value.trim();
    let same_origin = value.starts_with('/') && !value.starts_with("//");
    if same_origin || is_http_url(value) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "{field} must be an absolute path or include http:// or https://"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = SiteConfig::from_json("{}").unwrap();
        assert_eq!(config, SiteConfig::default());
        assert_eq!(config.token_ttl(), Duration::from_secs(3_600));
        assert_eq!(config.submission_lock_window(), Duration::from_secs(8));
        assert!(!config.reset_on_bare_visit);
    }

    #[test]
    fn rejects_unknown_fields() {
        let error = SiteConfig::from_json(r#"{ "resetOnBareVisit": true }"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn rejects_zero_ttl() {
        let error = SiteConfig::from_json(r#"{ "token_ttl_secs": 0 }"#).unwrap_err();
        assert!(error.to_string().contains("token_ttl_secs"));
    }

    #[test]
    fn rejects_protocol_relative_endpoint() {
        let error =
            SiteConfig::from_json(r#"{ "lead_endpoint": "//evil.example.com/x" }"#).unwrap_err();
        assert!(error.to_string().contains("lead_endpoint"));
    }

    #[test]
    fn parses_token_strategy() {
        let config = SiteConfig::from_json(r#"{ "token_strategy": "redirect" }"#).unwrap();
        assert_eq!(config.token_strategy, TokenStrategy::Redirect);
    }
}
