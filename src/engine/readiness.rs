//! Engine readiness probing.
//!
//! The engine exposes `GET /health`. The prober polls it on a fixed interval
//! until it answers 200 or the attempt budget is spent. Attempts start on a
//! schedule that does not drift with request latency, so a hung engine is
//! given up on after roughly `readiness_window()`. Individual failures are
//! expected while weights load and are only logged.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::time::MissedTickBehavior;

use crate::defaults;

/// Progress of the readiness protocol.
///
/// `NotStarted -> Probing -> Ready | Failed`. Terminal states stick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    NotStarted,
    Probing,
    Ready,
    Failed,
}

impl ReadinessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NOT_STARTED"),
            Self::Probing => write!(f, "PROBING"),
            Self::Ready => write!(f, "READY"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Probe timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Delay between the start of consecutive attempts. An attempt that
    /// outlives it delays the next one rather than stacking up.
    pub interval: Duration,
    pub max_attempts: u32,
    /// Per-attempt request timeout. Should not exceed `interval`.
    pub attempt_timeout: Duration,
}

impl ProbeSettings {
    /// Upper bound on how long the engine is given to become healthy.
    pub fn readiness_window(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(defaults::PROBE_INTERVAL_SECS),
            max_attempts: defaults::PROBE_MAX_ATTEMPTS,
            attempt_timeout: Duration::from_secs(defaults::PROBE_ATTEMPT_TIMEOUT_SECS),
        }
    }
}

/// Polls the engine health endpoint.
pub struct ReadinessProber {
    client: Client,
    health_url: String,
    settings: ProbeSettings,
    state: ReadinessState,
    attempts: u32,
}

impl ReadinessProber {
    /// Fails only if the HTTP client cannot be built.
    pub fn new(health_url: impl Into<String>, settings: ProbeSettings) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(settings.attempt_timeout)
            .pool_max_idle_per_host(0)
            .build()?;

        Ok(Self {
            client,
            health_url: health_url.into(),
            settings,
            state: ReadinessState::NotStarted,
            attempts: 0,
        })
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    /// Health requests issued so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Run the probe loop to a terminal state.
    ///
    /// Calling this again after a terminal state returns that state without
    /// issuing requests.
    pub async fn probe(&mut self) -> ReadinessState {
        if self.state.is_terminal() {
            return self.state;
        }

        self.state = ReadinessState::Probing;
        log::info!(
            "Waiting for engine health at {} (up to {} attempts, every {:?})",
            self.health_url,
            self.settings.max_attempts,
            self.settings.interval
        );

        // Log progress about once a minute.
        let progress_every = (Duration::from_secs(60).as_millis()
            / self.settings.interval.as_millis().max(1))
        .max(1) as u32;

        let mut ticks = tokio::time::interval(self.settings.interval.max(Duration::from_millis(1)));
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for attempt in 1..=self.settings.max_attempts {
            // The first tick completes immediately.
            ticks.tick().await;
            self.attempts = attempt;

            match self.check_once().await {
                Ok(StatusCode::OK) => {
                    log::info!("Engine ready after {} health check(s)", attempt);
                    self.state = ReadinessState::Ready;
                    return self.state;
                }
                Ok(status) => {
                    log::debug!("Health check {} returned {}", attempt, status);
                }
                Err(e) => {
                    log::debug!("Health check {} failed: {}", attempt, e);
                }
            }

            if attempt % progress_every == 0 {
                log::info!(
                    "Engine not ready yet ({}/{} health checks)",
                    attempt,
                    self.settings.max_attempts
                );
            }
        }

        log::error!(
            "Engine failed to become ready after {} health checks",
            self.settings.max_attempts
        );
        self.state = ReadinessState::Failed;
        self.state
    }

    async fn check_once(&self) -> std::result::Result<StatusCode, reqwest::Error> {
        self.client
            .get(&self.health_url)
            .send()
            .await
            .map(|resp| resp.status())
    }
}
