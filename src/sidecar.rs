//! Startup, serving and shutdown of the sidecar as one sequence.
//!
//! `Sidecar::start` returns only once the engine is healthy, `bind` opens the
//! listener after that, and `serve` runs until a shutdown trigger fires and
//! then stops the engine. There is no way to bind before the engine is ready.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::engine::command::{EngineCommand, EngineEndpoint};
use crate::defaults;
use crate::engine::lifecycle::{EngineSupervisor, LifecycleError, SupervisorOptions};
use crate::engine::readiness::{ProbeSettings, ReadinessProber};
use crate::error::{Error, Result};
use crate::proxy::{self, ProxyState};

/// Everything the sidecar needs besides the engine command.
#[derive(Debug, Clone)]
pub struct SidecarOptions {
    pub endpoint: EngineEndpoint,
    pub probe: ProbeSettings,
    pub invocation_timeout: Duration,
    /// How long in-flight invocations may run once shutdown has begun.
    pub drain_timeout: Duration,
    pub supervisor: SupervisorOptions,
}

impl Default for SidecarOptions {
    fn default() -> Self {
        Self {
            endpoint: EngineEndpoint::default(),
            probe: ProbeSettings::default(),
            invocation_timeout: proxy::default_timeout(),
            drain_timeout: Duration::from_secs(defaults::DRAIN_TIMEOUT_SECS),
            supervisor: SupervisorOptions::default(),
        }
    }
}

/// Why serving stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The external shutdown trigger fired.
    Requested,
    /// The engine died while the sidecar was serving.
    EngineExited(ExitStatus),
}

/// A sidecar whose engine is ready.
pub struct Sidecar {
    supervisor: Arc<EngineSupervisor>,
    proxy: ProxyState,
    drain_timeout: Duration,
}

impl Sidecar {
    /// Launch the engine and wait for it to become healthy.
    pub async fn start(command: &EngineCommand, options: SidecarOptions) -> Result<Self> {
        Self::start_until(command, options, std::future::pending()).await
    }

    /// Like `start`, but stops the engine and fails with
    /// `LifecycleError::StartupCancelled` if `cancel` resolves first.
    pub async fn start_until<C>(
        command: &EngineCommand,
        options: SidecarOptions,
        cancel: C,
    ) -> Result<Self>
    where
        C: Future<Output = ()>,
    {
        let proxy = ProxyState::new(options.endpoint.completions_url(), options.invocation_timeout)?;
        let prober = ReadinessProber::new(options.endpoint.health_url(), options.probe)?;
        let supervisor =
            EngineSupervisor::start_until(command, prober, options.supervisor, cancel).await?;

        Ok(Self {
            supervisor: Arc::new(supervisor),
            proxy,
            drain_timeout: options.drain_timeout,
        })
    }

    /// Shared handle to the engine supervisor.
    pub fn supervisor(&self) -> Arc<EngineSupervisor> {
        Arc::clone(&self.supervisor)
    }

    /// Open the inbound listener. Stops the engine if binding fails.
    pub async fn bind(self, addr: SocketAddr) -> Result<Listening> {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                let local_addr = listener.local_addr()?;
                log::info!("Sidecar listening on http://{}", local_addr);
                Ok(Listening {
                    sidecar: self,
                    listener,
                    local_addr,
                })
            }
            Err(source) => {
                self.supervisor.shutdown().await;
                Err(Error::Bind { addr, source })
            }
        }
    }
}

/// A ready sidecar with its listener bound.
pub struct Listening {
    sidecar: Sidecar,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Listening {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn supervisor(&self) -> Arc<EngineSupervisor> {
        self.sidecar.supervisor()
    }

    /// Serve until `shutdown` resolves or the engine dies, then stop the
    /// engine.
    ///
    /// Once shutdown begins no new connections are accepted. In-flight
    /// invocations get up to the drain timeout to finish; whatever is still
    /// running after that is abandoned and the engine is signalled anyway.
    pub async fn serve<F>(self, shutdown: F) -> Result<ExitReason>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Listening {
            sidecar, listener, ..
        } = self;
        let supervisor = sidecar.supervisor();
        let watched = sidecar.supervisor();
        let drain_timeout = sidecar.drain_timeout;

        let (reason_tx, mut reason_rx) = oneshot::channel();
        let trigger = async move {
            let reason = tokio::select! {
                _ = shutdown => ExitReason::Requested,
                status = watched.wait_for_engine_exit() => ExitReason::EngineExited(status),
            };
            log::info!("Shutting down ({:?})", reason);
            let _ = reason_tx.send(reason);
        };

        let server = axum::serve(listener, proxy::router(sidecar.proxy))
            .with_graceful_shutdown(trigger)
            .into_future();
        tokio::pin!(server);

        let mut reason = None;
        let served = tokio::select! {
            served = &mut server => served,
            fired = &mut reason_rx => {
                reason = fired.ok();
                match tokio::time::timeout(drain_timeout, &mut server).await {
                    Ok(served) => served,
                    Err(_) => {
                        log::warn!(
                            "In-flight invocations still running after {:?}; abandoning them",
                            drain_timeout
                        );
                        Ok(())
                    }
                }
            }
        };

        let stop = supervisor.shutdown().await;
        log::info!("Engine shutdown: {}", stop);

        served.map_err(Error::Server)?;
        Ok(reason
            .or_else(|| reason_rx.try_recv().ok())
            .unwrap_or(ExitReason::Requested))
    }
}

/// Start, bind and serve in one call.
///
/// `shutdown` is honoured from the moment the engine is launched. If it
/// resolves before the engine is ready, the engine is stopped and the result
/// is `ExitReason::Requested`.
pub async fn run<F>(
    command: &EngineCommand,
    options: SidecarOptions,
    bind_addr: SocketAddr,
    shutdown: F,
) -> Result<ExitReason>
where
    F: Future<Output = ()> + Send + 'static,
{
    let mut shutdown = Box::pin(shutdown);

    let sidecar = match Sidecar::start_until(command, options, &mut shutdown).await {
        Ok(sidecar) => sidecar,
        Err(Error::Lifecycle(LifecycleError::StartupCancelled(stop))) => {
            log::info!("Startup cancelled; engine {}", stop);
            return Ok(ExitReason::Requested);
        }
        Err(e) => return Err(e),
    };
    sidecar.bind(bind_addr).await?.serve(shutdown).await
}

/// Resolve on SIGINT or SIGTERM.
///
/// The handlers are installed when this is called, not when the future is
/// first polled, so call it before launching the engine. Must be called from
/// within a tokio runtime.
#[cfg(unix)]
pub fn termination_signal() -> impl Future<Output = ()> + Send + 'static {
    use tokio::signal::unix::{signal, Signal, SignalKind};

    fn install(kind: SignalKind, name: &'static str) -> Option<Signal> {
        signal(kind)
            .map_err(|e| log::warn!("Cannot listen for {}: {}", name, e))
            .ok()
    }

    async fn received(signal: Option<Signal>) {
        match signal {
            Some(mut signal) => {
                signal.recv().await;
            }
            None => std::future::pending().await,
        }
    }

    let terminate = install(SignalKind::terminate(), "SIGTERM");
    let interrupt = install(SignalKind::interrupt(), "SIGINT");

    async move {
        tokio::select! {
            _ = received(interrupt) => log::info!("Received SIGINT"),
            _ = received(terminate) => log::info!("Received SIGTERM"),
        }
    }
}

/// Resolve on Ctrl-C.
#[cfg(not(unix))]
pub fn termination_signal() -> impl Future<Output = ()> + Send + 'static {
    async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => log::info!("Received Ctrl-C"),
            Err(e) => {
                log::error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
}
