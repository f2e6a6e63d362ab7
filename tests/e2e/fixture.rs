//! Fake engine and sidecar helpers shared by the end-to-end tests.
//!
//! The fake engine is an in-process HTTP server that imitates vLLM's
//! `/health` and `/v1/chat/completions`. The supervised "engine process" is a
//! stand-in shell command, so no GPU or Python is needed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use vllm_sidecar::{
    EngineCommand, EngineEndpoint, EngineSupervisor, ExitReason, ProbeSettings, Sidecar,
    SidecarOptions, SupervisorOptions,
};

pub(crate) const NEVER: u32 = u32::MAX;

/// What the fake engine answers on `/v1/chat/completions`.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Json { status: u16, body: &'static str },
    Text(&'static str),
    Hang,
}

struct EngineState {
    health_calls: AtomicU32,
    healthy_after: AtomicU32,
    ready_seen: AtomicBool,
    completion_calls: AtomicU32,
    early_completions: AtomicU32,
    last_body: Mutex<Option<Bytes>>,
    reply: Mutex<Reply>,
}

pub(crate) struct FakeEngine {
    addr: SocketAddr,
    state: Arc<EngineState>,
    task: JoinHandle<()>,
}

impl FakeEngine {
    /// Health answers 503 until the `healthy_after`-th call, then 200.
    pub(crate) async fn start(healthy_after: u32) -> Self {
        let state = Arc::new(EngineState {
            health_calls: AtomicU32::new(0),
            healthy_after: AtomicU32::new(healthy_after),
            ready_seen: AtomicBool::new(false),
            completion_calls: AtomicU32::new(0),
            early_completions: AtomicU32::new(0),
            last_body: Mutex::new(None),
            reply: Mutex::new(Reply::Json {
                status: 200,
                body: r#"{"choices":[{"message":{"content":"hi"}}],"usage":{"total_tokens":5}}"#,
            }),
        });

        let app = Router::new()
            .route("/health", get(health))
            .route("/v1/chat/completions", post(completions))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake engine");
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake engine failed");
        });

        Self { addr, state, task }
    }

    pub(crate) fn endpoint(&self) -> EngineEndpoint {
        EngineEndpoint::new(self.addr.ip().to_string(), self.addr.port())
    }

    pub(crate) fn make_healthy(&self) {
        self.state.healthy_after.store(0, Ordering::SeqCst);
    }

    pub(crate) fn set_reply(&self, reply: Reply) {
        *self.state.reply.lock().unwrap() = reply;
    }

    pub(crate) fn health_calls(&self) -> u32 {
        self.state.health_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn completion_calls(&self) -> u32 {
        self.state.completion_calls.load(Ordering::SeqCst)
    }

    /// Completions received before `/health` ever answered 200.
    pub(crate) fn early_completions(&self) -> u32 {
        self.state.early_completions.load(Ordering::SeqCst)
    }

    pub(crate) fn last_body(&self) -> Option<Bytes> {
        self.state.last_body.lock().unwrap().clone()
    }

    /// Close the listener so new connections are refused.
    pub(crate) fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn health(State(state): State<Arc<EngineState>>) -> StatusCode {
    let call = state.health_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if call >= state.healthy_after.load(Ordering::SeqCst) {
        state.ready_seen.store(true, Ordering::SeqCst);
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn completions(State(state): State<Arc<EngineState>>, body: Bytes) -> Response {
    state.completion_calls.fetch_add(1, Ordering::SeqCst);
    if !state.ready_seen.load(Ordering::SeqCst) {
        state.early_completions.fetch_add(1, Ordering::SeqCst);
    }
    *state.last_body.lock().unwrap() = Some(body);

    let reply = state.reply.lock().unwrap().clone();
    match reply {
        Reply::Json { status, body } => (
            StatusCode::from_u16(status).unwrap(),
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Reply::Text(body) => (StatusCode::OK, body).into_response(),
        Reply::Hang => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            StatusCode::OK.into_response()
        }
    }
}

/// A process that stays up until signalled.
pub(crate) fn stand_in_engine() -> EngineCommand {
    EngineCommand::new("sleep").arg("300")
}

pub(crate) fn fast_options(endpoint: EngineEndpoint) -> SidecarOptions {
    SidecarOptions {
        endpoint,
        probe: ProbeSettings {
            interval: Duration::from_millis(20),
            max_attempts: 100,
            attempt_timeout: Duration::from_millis(500),
        },
        invocation_timeout: Duration::from_secs(5),
        drain_timeout: Duration::from_secs(2),
        supervisor: SupervisorOptions {
            shutdown_grace: Duration::from_secs(2),
            exit_poll_interval: Duration::from_millis(20),
        },
    }
}

/// A sidecar serving on an ephemeral loopback port.
pub(crate) struct RunningSidecar {
    pub(crate) addr: SocketAddr,
    pub(crate) supervisor: Arc<EngineSupervisor>,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<vllm_sidecar::Result<ExitReason>>,
}

impl RunningSidecar {
    pub(crate) async fn start(command: EngineCommand, options: SidecarOptions) -> Self {
        let sidecar = Sidecar::start(&command, options)
            .await
            .expect("sidecar failed to start");
        let listening = sidecar
            .bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("sidecar failed to bind");

        let addr = listening.local_addr();
        let supervisor = listening.supervisor();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(listening.serve(async move {
            let _ = rx.await;
        }));

        Self {
            addr,
            supervisor,
            stop: Some(tx),
            handle,
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for serving to end.
    pub(crate) async fn stop(mut self) -> ExitReason {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        self.join().await
    }

    /// Wait for serving to end on its own.
    pub(crate) async fn join(self) -> ExitReason {
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("sidecar did not stop")
            .expect("sidecar task panicked")
            .expect("sidecar returned an error")
    }
}

pub(crate) fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Poll `path` until it exists.
pub(crate) async fn wait_for_file(path: &std::path::Path) {
    for _ in 0..250 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} was never created", path.display());
}
