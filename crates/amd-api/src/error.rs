use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Missing server configuration")]
    MissingConfig,
    #[error("Upstream error")]
    Upstream { status: u16, upstream: Value },
    #[error("External dependency error: {0}")]
    External(String),
    #[error("{0}")]
    TooManyRequests(String, u64),
}

/// Every error leaves the service as `{ "ok": false, "error": ... }`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream: Option<Value>,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::External(message.into())
    }

    pub fn too_many_requests(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::TooManyRequests(message.into(), retry_after_secs)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::MissingConfig => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream { .. } | Self::External(_) => StatusCode::BAD_GATEWAY,
            Self::TooManyRequests(..) => StatusCode::TOO_MANY_REQUESTS,
        };
        let retry_after = match &self {
            Self::TooManyRequests(_, secs) => Some(*secs),
            _ => None,
        };

        let error = self.to_string();
        let (upstream_status, upstream) = match self {
            Self::Upstream { status, upstream } => (Some(status), Some(upstream)),
            _ => (None, None),
        };
        let body = ErrorBody {
            ok: false,
            error,
            status: upstream_status,
            upstream,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
