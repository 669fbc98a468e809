//! Client for the Apps Script backend that stores leads and issues tokens.

use amd_core::util::{compact_text, normalize_text_option, sanitize_partner_id};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::{AppConfig, UpstreamTarget};
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct GasClient {
    client: reqwest::Client,
}

/// A token issued for a partner by `mode=qr_check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerToken {
    pub token: String,
    pub partner_id: String,
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("token exchange is not configured")]
    NotConfigured,
    #[error("token service refused: {0}")]
    Rejected(String),
    #[error("token service unreachable: {0}")]
    Unreachable(String),
}

impl ExchangeError {
    /// Value of the `err` parameter the redirect exchange lands with.
    pub const fn redirect_code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "cfg",
            Self::Rejected(_) => "tok",
            Self::Unreachable(_) => "ex",
        }
    }
}

impl From<ExchangeError> for AppError {
    fn from(error: ExchangeError) -> Self {
        match error {
            ExchangeError::NotConfigured => Self::MissingConfig,
            other => Self::external(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QrCheckResponse {
    #[serde(default)]
    ok: bool,
    token: Option<String>,
    #[serde(rename = "partnerId")]
    partner_id: Option<String>,
    error: Option<String>,
}

impl GasClient {
    pub fn new(config: &AppConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// POST a hardened lead; the reply is returned as JSON when it parses,
    /// as text otherwise.
    pub async fn forward_lead(
        &self,
        target: UpstreamTarget<'_>,
        payload: &Value,
    ) -> Result<Value, AppError> {
        let response = self
            .client
            .post(target.exec_url)
            .json(payload)
            .send()
            .await
            .map_err(|error| {
                AppError::external(format!(
                    "Lead forwarding failed: {}",
                    compact_text(&error.to_string())
                ))
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let upstream = parse_upstream(&text);
        if !status.is_success() {
            return Err(AppError::Upstream {
                status: status.as_u16(),
                upstream,
            });
        }
        Ok(upstream)
    }

    /// `GET <exec>?mode=qr_check&partnerId=<partner>&secret=<secret>`
    pub async fn qr_check(
        &self,
        target: UpstreamTarget<'_>,
        partner: &str,
    ) -> Result<PartnerToken, ExchangeError> {
        let url = Url::parse_with_params(
            target.exec_url,
            [
                ("mode", "qr_check"),
                ("partnerId", partner),
                ("secret", target.secret),
            ],
        )
        .map_err(|_| ExchangeError::NotConfigured)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| ExchangeError::Unreachable(compact_text(&error.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExchangeError::Rejected(format!("HTTP {}", status.as_u16())));
        }
        let payload = response
            .json::<QrCheckResponse>()
            .await
            .map_err(|error| ExchangeError::Rejected(compact_text(&error.to_string())))?;
        if !payload.ok {
            return Err(ExchangeError::Rejected(
                payload
                    .error
                    .unwrap_or_else(|| "qr_check was not ok".to_string()),
            ));
        }
        let token = normalize_text_option(payload.token)
            .ok_or_else(|| ExchangeError::Rejected("qr_check returned no token".to_string()))?;

        Ok(PartnerToken {
            token,
            partner_id: payload
                .partner_id
                .map(|id| sanitize_partner_id(&id))
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| partner.to_string()),
        })
    }
}

fn parse_upstream(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn upstream_body_prefers_json_then_text() {
        assert_eq!(parse_upstream(r#"{"ok":true}"#), json!({ "ok": true }));
        assert_eq!(parse_upstream("<html>quota</html>"), json!("<html>quota</html>"));
        assert_eq!(parse_upstream(""), Value::Null);
    }

    #[test]
    fn exchange_errors_map_to_redirect_codes() {
        assert_eq!(ExchangeError::NotConfigured.redirect_code(), "cfg");
        assert_eq!(ExchangeError::Rejected(String::new()).redirect_code(), "tok");
        assert_eq!(ExchangeError::Unreachable(String::new()).redirect_code(), "ex");
    }
}
