//! Inference engine process lifecycle management.
//!
//! Provides the `EngineSupervisor` which:
//! - launches the engine and waits for it to become healthy
//! - owns the engine process for as long as the sidecar runs
//! - stops the engine exactly once on shutdown, whichever path triggers it

use std::fmt;
use std::future::{self, Future};
use std::process::ExitStatus;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};

use crate::defaults;
use crate::engine::command::EngineCommand;
use crate::engine::launcher::{self, EngineProcess};
use crate::engine::readiness::{ReadinessProber, ReadinessState};

/// Errors that can occur during engine lifecycle management.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Failed to spawn engine '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine startup failed: {0}")]
    StartupFailed(String),

    #[error("Engine did not become ready within {0:?}")]
    ReadinessTimeout(Duration),

    #[error("Engine exited before becoming ready ({0})")]
    ExitedDuringStartup(ExitStatus),

    #[error("Shutdown requested before the engine became ready; engine {0}")]
    StartupCancelled(EngineStop),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Shutdown and monitoring timings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Time between SIGTERM and SIGKILL.
    pub shutdown_grace: Duration,
    /// How often `wait_for_engine_exit` checks the process.
    pub exit_poll_interval: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(defaults::SHUTDOWN_GRACE_SECS),
            exit_poll_interval: Duration::from_millis(defaults::EXIT_POLL_INTERVAL_MS),
        }
    }
}

/// How the engine process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStop {
    /// Exited before shutdown signalled it.
    AlreadyExited(ExitStatus),
    /// Exited after SIGTERM.
    Terminated(ExitStatus),
    /// Ignored SIGTERM for the grace period and was killed.
    Killed,
    /// Could not be confirmed stopped; see the log.
    Unconfirmed,
}

impl fmt::Display for EngineStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExited(status) => write!(f, "already exited ({})", status),
            Self::Terminated(status) => write!(f, "terminated ({})", status),
            Self::Killed => write!(f, "killed after grace period"),
            Self::Unconfirmed => write!(f, "unconfirmed"),
        }
    }
}

/// Sole owner of a ready engine process.
///
/// Only `start` constructs one, and only once the engine has reported
/// healthy, so holding an `EngineSupervisor` means the engine is ready.
pub struct EngineSupervisor {
    pid: u32,
    started_at: SystemTime,
    process: Mutex<Option<EngineProcess>>,
    stopped: OnceCell<EngineStop>,
    options: SupervisorOptions,
}

impl EngineSupervisor {
    /// Launch the engine and block until it is ready.
    ///
    /// Fails if the engine cannot be spawned, exits while starting, or does
    /// not become healthy within the prober's window. The engine is stopped
    /// before any error is returned.
    pub async fn start(
        command: &EngineCommand,
        prober: ReadinessProber,
        options: SupervisorOptions,
    ) -> Result<Self> {
        Self::start_until(command, prober, options, future::pending()).await
    }

    /// Like `start`, but gives up as soon as `cancel` resolves.
    ///
    /// A cancelled startup stops the engine the same way `shutdown` does and
    /// returns `LifecycleError::StartupCancelled`.
    pub async fn start_until<C>(
        command: &EngineCommand,
        mut prober: ReadinessProber,
        options: SupervisorOptions,
        cancel: C,
    ) -> Result<Self>
    where
        C: Future<Output = ()>,
    {
        let mut process = launcher::launch(command)?;
        let window = prober.settings().readiness_window();

        let outcome = tokio::select! {
            state = prober.probe() => Startup::Probed(state),
            exited = process.wait() => Startup::Exited(exited),
            _ = cancel => Startup::Cancelled,
        };

        match outcome {
            Startup::Probed(ReadinessState::Ready) => {
                log::info!("Engine process {} is ready", process.pid());
                Ok(Self {
                    pid: process.pid(),
                    started_at: process.started_at(),
                    process: Mutex::new(Some(process)),
                    stopped: OnceCell::new(),
                    options,
                })
            }
            Startup::Probed(state) => {
                log::error!(
                    "Engine readiness {} after {} attempts; stopping engine process {}",
                    state,
                    prober.attempts(),
                    process.pid()
                );
                stop_process(process, options.shutdown_grace).await;
                Err(LifecycleError::ReadinessTimeout(window))
            }
            Startup::Exited(Ok(status)) => {
                log::error!("Engine process {} exited during startup: {}", process.pid(), status);
                Err(LifecycleError::ExitedDuringStartup(status))
            }
            Startup::Exited(Err(e)) => {
                stop_process(process, options.shutdown_grace).await;
                Err(LifecycleError::Io(e))
            }
            Startup::Cancelled => {
                log::info!(
                    "Shutdown requested after {} health checks; stopping engine process {}",
                    prober.attempts(),
                    process.pid()
                );
                let stop = stop_process(process, options.shutdown_grace).await;
                Err(LifecycleError::StartupCancelled(stop))
            }
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Stop the engine. Idempotent.
    ///
    /// The first call signals the engine; concurrent and later calls wait for
    /// and return that call's outcome.
    pub async fn shutdown(&self) -> EngineStop {
        *self
            .stopped
            .get_or_init(|| async {
                let process = self.process.lock().await.take();
                match process {
                    Some(process) => stop_process(process, self.options.shutdown_grace).await,
                    None => EngineStop::Unconfirmed,
                }
            })
            .await
    }

    /// True until shutdown has run or the engine has exited.
    pub async fn is_running(&self) -> bool {
        let mut guard = self.process.lock().await;
        match guard.as_mut() {
            Some(process) => matches!(process.poll_exit(), Ok(None)),
            None => false,
        }
    }

    /// Resolve when the engine exits on its own.
    ///
    /// Never resolves once shutdown has taken the process.
    pub async fn wait_for_engine_exit(&self) -> ExitStatus {
        loop {
            let polled = self.process.lock().await.as_mut().map(EngineProcess::poll_exit);
            match polled {
                None => return future::pending().await,
                Some(Ok(Some(status))) => {
                    log::error!("Engine process {} exited unexpectedly: {}", self.pid, status);
                    return status;
                }
                Some(Ok(None)) => {}
                Some(Err(e)) => log::warn!("Failed to check engine process {}: {}", self.pid, e),
            }
            tokio::time::sleep(self.options.exit_poll_interval).await;
        }
    }
}

enum Startup {
    Probed(ReadinessState),
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
}

/// SIGTERM, wait up to `grace`, then SIGKILL. Failures are logged only.
async fn stop_process(mut process: EngineProcess, grace: Duration) -> EngineStop {
    let pid = process.pid();

    match process.poll_exit() {
        Ok(Some(status)) => {
            log::info!("Engine process {} already exited: {}", pid, status);
            return EngineStop::AlreadyExited(status);
        }
        Ok(None) => {}
        Err(e) => log::warn!("Failed to check engine process {}: {}", pid, e),
    }

    log::info!("Sending termination signal to engine process {}", pid);
    if let Err(e) = process.terminate() {
        log::warn!("Failed to signal engine process {}: {}", pid, e);
    }

    match tokio::time::timeout(grace, process.wait()).await {
        Ok(Ok(status)) => {
            log::info!("Engine process {} terminated: {}", pid, status);
            EngineStop::Terminated(status)
        }
        Ok(Err(e)) => {
            log::warn!("Failed to wait for engine process {}: {}", pid, e);
            EngineStop::Unconfirmed
        }
        Err(_) => {
            log::warn!(
                "Engine process {} did not exit within {:?}, sending SIGKILL",
                pid,
                grace
            );
            match process.kill().await {
                Ok(_) => EngineStop::Killed,
                Err(e) => {
                    log::error!("Failed to kill engine process {}: {}", pid, e);
                    EngineStop::Unconfirmed
                }
            }
        }
    }
}
