//! Per-client fixed windows for the lead proxy and the token exchanges.
//!
//! Clients are tracked by fingerprint, never by raw address. A refused
//! redirect exchange still lands the visitor, with `err=tok`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use amd_core::util::fingerprint;
use axum::http::HeaderMap;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitedRoute {
    Lead,
    TokenExchange,
}

impl LimitedRoute {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::TokenExchange => "token_exchange",
        }
    }
}

/// Result of asking the limiter for room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Refused { retry_after: Duration },
}

impl Admission {
    /// `429` with a whole-second `Retry-After` for refused requests.
    pub fn into_result(self) -> Result<(), AppError> {
        match self {
            Self::Admitted => Ok(()),
            Self::Refused { retry_after } => Err(AppError::too_many_requests(
                "Rate limit exceeded, please retry later",
                retry_after.as_secs().max(1),
            )),
        }
    }
}

#[derive(Debug, Default)]
struct RouteBudget {
    limit: u32,
    admitted: AtomicU64,
    refused: AtomicU64,
}

impl RouteBudget {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    fn usage(&self) -> RouteUsage {
        RouteUsage {
            limit: self.limit,
            admitted: self.admitted.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouteUsage {
    pub limit: u32,
    pub admitted: u64,
    pub refused: u64,
}

/// Counters reported on `/healthz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    pub window_secs: u64,
    pub lead: RouteUsage,
    pub token_exchange: RouteUsage,
}

#[derive(Debug, Clone, Copy)]
struct ClientWindow {
    opened: Instant,
    used: u32,
}

pub struct EndpointRateLimiter {
    windows: Mutex<HashMap<(LimitedRoute, u64), ClientWindow>>,
    window: Duration,
    lead: RouteBudget,
    token_exchange: RouteBudget,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.lead_rate_limit_per_window,
            config.token_rate_limit_per_window,
        )
    }

    fn new(window: Duration, lead_limit: u32, token_limit: u32) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window,
            lead: RouteBudget::new(lead_limit),
            token_exchange: RouteBudget::new(token_limit),
        }
    }

    pub async fn admit(&self, route: LimitedRoute, client: &str) -> Admission {
        let budget = self.budget(route);
        let client = fingerprint(client);
        let now = Instant::now();

        let mut windows = self.windows.lock().await;
        windows.retain(|_, entry| now.duration_since(entry.opened) < self.window);
        let entry = windows.entry((route, client)).or_insert(ClientWindow {
            opened: now,
            used: 0,
        });

        if entry.used >= budget.limit {
            budget.refused.fetch_add(1, Ordering::Relaxed);
            let retry_after = self.window.saturating_sub(now.duration_since(entry.opened));
            tracing::warn!(
                route = route.label(),
                client,
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );
            return Admission::Refused { retry_after };
        }

        entry.used += 1;
        budget.admitted.fetch_add(1, Ordering::Relaxed);
        Admission::Admitted
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            window_secs: self.window.as_secs(),
            lead: self.lead.usage(),
            token_exchange: self.token_exchange.usage(),
        }
    }

    const fn budget(&self, route: LimitedRoute) -> &RouteBudget {
        match route {
            LimitedRoute::Lead => &self.lead,
            LimitedRoute::TokenExchange => &self.token_exchange,
        }
    }
}

/// Client address as reported by the edge, `unknown` when absent.
pub fn client_key(headers: &HeaderMap) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    header_value("x-nf-client-connection-ip")
        .or_else(|| header_value("x-forwarded-for"))
        .unwrap_or_else(|| "unknown".to_string())
}
