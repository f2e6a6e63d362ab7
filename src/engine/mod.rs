//! Engine management for the supervised vLLM server.
//!
//! This module provides:
//! - Command-line assembly (`command`)
//! - Process spawning and signalling (`launcher`)
//! - Health polling (`readiness`)
//! - Process lifecycle ownership (`lifecycle`)

pub mod command;
pub mod launcher;
pub mod lifecycle;
pub mod readiness;

pub use command::{engine_args, EngineCommand, EngineEndpoint};
pub use launcher::EngineProcess;
pub use lifecycle::{EngineStop, EngineSupervisor, LifecycleError, SupervisorOptions};
pub use readiness::{ProbeSettings, ReadinessProber, ReadinessState};
