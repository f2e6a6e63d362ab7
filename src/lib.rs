//! vllm-sidecar - hosting-platform sidecar for a supervised vLLM engine.
//!
//! The sidecar launches the engine, waits for its health endpoint, then
//! serves `GET /ping` and `POST /invocations`, relaying invocations to the
//! engine's chat-completions API. The engine is stopped when the sidecar
//! shuts down.

pub mod defaults;
pub mod error;

pub mod config;
pub mod engine;
pub mod proxy;
pub mod sidecar;

pub use error::{Error, Result};

pub use config::{ConfigError, EngineConfig, ModelCategory, MultimodalLimits, Precision};

pub use engine::command::{engine_args, EngineCommand, EngineEndpoint, MULTIMODAL_FLAGS};
pub use engine::launcher::EngineProcess;
pub use engine::lifecycle::{EngineStop, EngineSupervisor, LifecycleError, SupervisorOptions};
pub use engine::readiness::{ProbeSettings, ReadinessProber, ReadinessState};

pub use proxy::{ProxyError, ProxyState};

pub use sidecar::{run, termination_signal, ExitReason, Listening, Sidecar, SidecarOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
