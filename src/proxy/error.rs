//! Invocation failures and their HTTP translation.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Why a single invocation failed. Never affects other requests.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Request body is not valid JSON: {0}")]
    InvalidRequest(#[source] serde_json::Error),

    #[error("Engine did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Engine unreachable: {0}")]
    Unreachable(String),

    #[error("Engine returned a response that is not JSON: {0}")]
    MalformedResponse(#[source] serde_json::Error),
}

impl ProxyError {
    /// Classify a failed call to the engine.
    pub fn from_upstream(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Unreachable(err.to_string())
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Unreachable(_) | Self::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Timeout(_) => "engine_timeout",
            Self::Unreachable(_) => "engine_unreachable",
            Self::MalformedResponse(_) => "malformed_engine_response",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: &'static str,
    message: String,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::warn!("Invocation failed: {}", self);
        } else {
            log::debug!("Invocation rejected: {}", self);
        }

        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
