//! Hosting-platform HTTP contract.
//!
//! - `GET /ping` answers 200 with an empty body.
//! - `POST /invocations` relays the request body to the engine's
//!   chat-completions endpoint and relays the engine's status and body back.
//!
//! Bodies are forwarded as bytes. They are only checked to be JSON.

mod error;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use reqwest::Client;
use serde::de::IgnoredAny;

use crate::defaults;

pub use error::ProxyError;

/// Shared handler state.
#[derive(Clone)]
pub struct ProxyState {
    client: Client,
    completions_url: Arc<str>,
    timeout: Duration,
}

impl ProxyState {
    /// Relay to `completions_url`, failing any call that takes longer than
    /// `timeout`. Connections are not reused between invocations.
    pub fn new(completions_url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()?;

        Ok(Self {
            client,
            completions_url: Arc::from(completions_url.into()),
            timeout,
        })
    }

    pub fn completions_url(&self) -> &str {
        &self.completions_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for ProxyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyState")
            .field("completions_url", &self.completions_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Default invocation deadline.
pub fn default_timeout() -> Duration {
    Duration::from_secs(defaults::INVOCATION_TIMEOUT_SECS)
}

/// Router serving `/ping` and `/invocations`.
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/invocations", post(invoke))
        .layer(DefaultBodyLimit::max(defaults::MAX_INVOCATION_BYTES))
        .with_state(state)
}

async fn ping() -> StatusCode {
    StatusCode::OK
}

async fn invoke(
    State(state): State<ProxyState>,
    body: Bytes,
) -> std::result::Result<Response, ProxyError> {
    serde_json::from_slice::<IgnoredAny>(&body).map_err(ProxyError::InvalidRequest)?;

    let upstream = state
        .client
        .post(state.completions_url())
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| ProxyError::from_upstream(e, state.timeout))?;

    let status = upstream.status();
    let payload = upstream
        .bytes()
        .await
        .map_err(|e| ProxyError::from_upstream(e, state.timeout))?;

    serde_json::from_slice::<IgnoredAny>(&payload).map_err(ProxyError::MalformedResponse)?;

    if !status.is_success() {
        log::warn!("Engine answered invocation with {}", status);
    }

    Ok((status, [(header::CONTENT_TYPE, "application/json")], payload).into_response())
}
