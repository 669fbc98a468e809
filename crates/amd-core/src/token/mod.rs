//! Token acquisition for partners that arrive without a token.
//!
//! All storage writes happen before the exchange is issued, so an abandoned
//! exchange (page navigated away) leaves storage consistent.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::attribution::{Attribution, AttributionResolver, PageUrl, PARTNER_PARAM, TOKEN_PARAM};
use crate::config::{SiteConfig, TokenStrategy};
use crate::error::{Error, Result};
use crate::storage::{PARTNER_KEY, TOKEN_KEY};
use crate::util::{compact_text, fingerprint, normalize_text_option};

const TOKEN_HTTP_TIMEOUT_SECS: u64 = 6;

/// A token handed out by the exchange endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    /// Partner id as confirmed by the issuer; may differ in normalization.
    pub partner_id: Option<String>,
}

/// Exchanges a partner id for a short-lived token.
#[allow(async_fn_in_trait)]
pub trait TokenIssuer {
    async fn exchange(&self, partner: &str) -> Result<IssuedToken>;
}

/// Result of [`TokenFlow::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    /// Attribution is settled for this page view.
    Ready(Attribution),
    /// The whole page must navigate here to obtain a token.
    Redirect(String),
}

#[derive(Debug, Clone)]
pub struct TokenFlow {
    strategy: TokenStrategy,
    redirect_endpoint: String,
}

impl TokenFlow {
    pub fn from_config(config: &SiteConfig) -> Self {
        Self {
            strategy: config.token_strategy,
            redirect_endpoint: config.redirect_endpoint.clone(),
        }
    }

    /// Make sure a partner arriving via the URL ends up with a token.
    ///
    /// Exchange failures never block: the partner stays, the token stays empty.
    pub async fn ensure<I: TokenIssuer>(
        &self,
        resolver: &AttributionResolver,
        page: &mut PageUrl,
        issuer: &I,
    ) -> TokenOutcome {
        let url_partner = page.param(PARTNER_PARAM);
        if url_partner.is_empty() {
            resolver.begin_bare_visit();
            return TokenOutcome::Ready(resolver.resolve(page));
        }

        let store = resolver.store();
        store.set_active(true);
        store.switch_partner(&url_partner);

        if !page.param(TOKEN_PARAM).is_empty() {
            return TokenOutcome::Ready(resolver.resolve(page));
        }

        // Survived the partner switch, so it was issued to this partner.
        if !store.read(TOKEN_KEY).is_empty() {
            return TokenOutcome::Ready(resolver.resolve(page));
        }

        match self.strategy {
            TokenStrategy::Redirect => {
                let target = redirect_target(&self.redirect_endpoint, &url_partner, page);
                tracing::info!(
                    partner = fingerprint(&url_partner),
                    "Redirecting through token exchange"
                );
                TokenOutcome::Redirect(target)
            }
            TokenStrategy::Fetch => match issuer.exchange(&url_partner).await {
                Ok(issued) => {
                    let partner = issued
                        .partner_id
                        .and_then(|value| normalize_text_option(Some(value)))
                        .unwrap_or(url_partner);
                    store.write(PARTNER_KEY, &partner);
                    store.write(TOKEN_KEY, &issued.token);
                    page.set_param(PARTNER_PARAM, &partner);
                    page.set_param(TOKEN_PARAM, &issued.token);
                    page.remove_param("qr");
                    tracing::info!(partner = fingerprint(&partner), "Obtained partner token");
                    TokenOutcome::Ready(Attribution::new(partner, issued.token))
                }
                Err(error) => {
                    tracing::warn!(
                        partner = fingerprint(&url_partner),
                        %error,
                        "Token exchange failed; continuing without token"
                    );
                    TokenOutcome::Ready(Attribution::new(url_partner, ""))
                }
            },
        }
    }
}

/// `<endpoint>?pid=<partner>&next=<current path and query without attribution>`
fn redirect_target(endpoint: &str, partner: &str, page: &PageUrl) -> String {
    let mut next = page.clone();
    for key in [PARTNER_PARAM, TOKEN_PARAM, "err", "qr"] {
        next.remove_param(key);
    }
    let next_url = next.as_url();
    let next_path = match next_url.query() {
        Some(query) if !query.is_empty() => format!("{}?{query}", next_url.path()),
        _ => next_url.path().to_string(),
    };
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!(
        "{endpoint}{separator}pid={}&next={}",
        urlencoding::encode(partner),
        urlencoding::encode(&next_path)
    )
}

/// Token issuer backed by the JSON exchange endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenIssuer {
    client: reqwest::Client,
    endpoint: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeResponse {
    #[serde(default)]
    ok: bool,
    token: Option<String>,
    partner_id: Option<String>,
    error: Option<String>,
}

impl HttpTokenIssuer {
    pub fn new(endpoint: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TOKEN_HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, endpoint })
    }

    /// Resolve the configured endpoint against the current page.
    pub fn for_page(config: &SiteConfig, page: &PageUrl) -> Result<Self> {
        Self::new(page.as_url().join(&config.token_endpoint)?)
    }
}

impl TokenIssuer for HttpTokenIssuer {
    async fn exchange(&self, partner: &str) -> Result<IssuedToken> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("pid", partner)])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "token endpoint returned HTTP {}: {}",
                status.as_u16(),
                compact_text(&body)
            )));
        }

        let payload: ExchangeResponse = serde_json::from_str(&body)?;
        parse_exchange(payload)
    }
}

fn parse_exchange(payload: ExchangeResponse) -> Result<IssuedToken> {
    if !payload.ok {
        return Err(Error::Upstream(
            payload
                .error
                .unwrap_or_else(|| "token exchange was not ok".to_string()),
        ));
    }
    let token = normalize_text_option(payload.token)
        .ok_or_else(|| Error::Upstream("token exchange returned no token".to_string()))?;
    Ok(IssuedToken {
        token,
        partner_id: normalize_text_option(payload.partner_id),
    })
}
