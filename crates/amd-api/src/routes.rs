use std::sync::Arc;

use amd_core::util::{fingerprint, sanitize_partner_id};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::exchange::{landing_path, location};
use crate::lead::harden_lead;
use crate::rate_limit::{
    client_key, Admission, EndpointRateLimiter, LimitedRoute, RateLimitSnapshot,
};
use crate::upstream::{ExchangeError, GasClient, PartnerToken};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    gas: Arc<GasClient>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            gas: Arc::new(GasClient::new(&config)?),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            config,
        })
    }

    async fn exchange(&self, partner: &str) -> Result<PartnerToken, ExchangeError> {
        let target = self.config.upstream().ok_or(ExchangeError::NotConfigured)?;
        self.gas.qr_check(target, partner).await
    }
}

pub fn app_router(state: AppState) -> Router {
    let leads = post(submit_lead)
        .options(lead_preflight)
        .fallback(method_not_allowed);
    let token = get(token_exchange);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/leads", leads.clone())
        .route("/.netlify/functions/leads", leads)
        .route("/r", get(redirect_exchange))
        .route("/token", token.clone())
        .route("/.netlify/functions/token", token)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    upstream_configured: bool,
    rate_limit: RateLimitSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        upstream_configured: state.config.upstream().is_some(),
        rate_limit: state.endpoint_rate_limiter.snapshot(),
    })
}

async fn lead_preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

#[derive(Debug, Serialize)]
struct LeadResponse {
    ok: bool,
    upstream: Value,
}

async fn submit_lead(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<LeadResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .admit(LimitedRoute::Lead, &client_key(&headers))
        .await
        .into_result()?;

    let target = state.config.upstream().ok_or(AppError::MissingConfig)?;
    let payload = harden_lead(&body, target.secret);
    let service = payload["service"].as_str().unwrap_or_default().to_string();
    let partner = payload["partnerId"].as_str().unwrap_or_default().to_string();

    let upstream = state
        .gas
        .forward_lead(target, &payload)
        .await
        .inspect_err(|error| {
            tracing::warn!(
                endpoint = "lead",
                service = service.as_str(),
                %error,
                "Lead forwarding failed"
            );
        })?;

    tracing::info!(
        endpoint = "lead",
        service = service.as_str(),
        partner = fingerprint(&partner),
        partner_len = partner.len(),
        body_len = body.len(),
        "Forwarded lead"
    );
    Ok(Json(LeadResponse { ok: true, upstream }))
}

#[derive(Debug, Deserialize)]
struct RedirectQuery {
    pid: Option<String>,
    next: Option<String>,
}

/// Always a `302`; failures land with `err=` instead of an error page.
async fn redirect_exchange(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RedirectQuery>,
) -> Response {
    let partner = sanitize_partner_id(query.pid.as_deref().unwrap_or_default());
    let landing = landing_path(query.next.as_deref(), &state.config.redirect_base_path);
    if partner.is_empty() {
        return found(&landing);
    }

    let outcome = match state
        .endpoint_rate_limiter
        .admit(LimitedRoute::TokenExchange, &client_key(&headers))
        .await
    {
        Admission::Admitted => state.exchange(&partner).await,
        Admission::Refused { .. } => Err(ExchangeError::Rejected(
            "rate limit exceeded".to_string(),
        )),
    };

    match &outcome {
        Ok(_) => tracing::info!(
            endpoint = "redirect",
            partner = fingerprint(&partner),
            "Issued partner token"
        ),
        Err(error) => tracing::warn!(
            endpoint = "redirect",
            partner = fingerprint(&partner),
            code = error.redirect_code(),
            %error,
            "Token exchange failed"
        ),
    }
    found(&location(&landing, &partner, &outcome))
}

fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, location),
            (header::CACHE_CONTROL, "no-store"),
        ],
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    pid: Option<String>,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    ok: bool,
    token: String,
    #[serde(rename = "partnerId")]
    partner_id: String,
}

async fn token_exchange(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    state
        .endpoint_rate_limiter
        .admit(LimitedRoute::TokenExchange, &client_key(&headers))
        .await
        .into_result()?;

    let partner = sanitize_partner_id(query.pid.as_deref().unwrap_or_default());
    if partner.is_empty() {
        return Err(AppError::bad_request("pid is required"));
    }

    let issued = state.exchange(&partner).await.inspect_err(|error| {
        tracing::warn!(
            endpoint = "token",
            partner = fingerprint(&partner),
            %error,
            "Token exchange failed"
        );
    })?;
    tracing::info!(
        endpoint = "token",
        partner = fingerprint(&partner),
        "Issued partner token"
    );

    let body = TokenResponse {
        ok: true,
        token: issued.token,
        partner_id: issued.partner_id,
    };
    Ok(([(header::CACHE_CONTROL, "no-store")], Json(body)).into_response())
}
