//! vllm-sidecar binary.
//!
//! Reads the engine configuration from the environment, launches vLLM,
//! waits for it to become healthy and serves the hosting-platform contract
//! until SIGTERM/SIGINT.
//!
//! Exit status is 0 after SIGTERM/SIGINT, including one received during
//! startup, and non-zero if startup fails or the engine exits on its own.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use vllm_sidecar::defaults;
use vllm_sidecar::{
    EngineCommand, EngineConfig, EngineEndpoint, ExitReason, ProbeSettings, SidecarOptions,
    SupervisorOptions,
};

#[derive(Parser, Debug)]
#[command(name = "vllm-sidecar", version)]
#[command(about = "Supervise a vLLM engine and relay /invocations to it")]
struct Args {
    /// Address the hosting platform reaches the sidecar on.
    #[arg(long, env = "SIDECAR_BIND", default_value = defaults::SERVICE_BIND)]
    bind: SocketAddr,

    /// Loopback host the engine binds.
    #[arg(long, env = "ENGINE_HOST", default_value = defaults::ENGINE_HOST)]
    engine_host: String,

    /// Port the engine binds.
    #[arg(long, env = "ENGINE_PORT", default_value_t = defaults::ENGINE_PORT)]
    engine_port: u16,

    /// Python interpreter that runs the vLLM entrypoint.
    #[arg(long, env = "ENGINE_PYTHON", default_value = defaults::ENGINE_PYTHON)]
    engine_python: String,

    /// Write engine stdout/stderr here instead of inheriting them.
    #[arg(long, env = "ENGINE_LOG")]
    engine_log: Option<PathBuf>,

    #[arg(long, env = "PROBE_INTERVAL_SECS", default_value_t = defaults::PROBE_INTERVAL_SECS)]
    probe_interval_secs: u64,

    #[arg(long, env = "PROBE_MAX_ATTEMPTS", default_value_t = defaults::PROBE_MAX_ATTEMPTS)]
    probe_max_attempts: u32,

    #[arg(long, env = "PROBE_TIMEOUT_SECS", default_value_t = defaults::PROBE_ATTEMPT_TIMEOUT_SECS)]
    probe_timeout_secs: u64,

    /// Deadline for a single relayed invocation.
    #[arg(long, env = "INVOCATION_TIMEOUT_SECS", default_value_t = defaults::INVOCATION_TIMEOUT_SECS)]
    invocation_timeout_secs: u64,

    /// Time in-flight invocations get to finish once shutdown begins.
    #[arg(long, env = "DRAIN_TIMEOUT_SECS", default_value_t = defaults::DRAIN_TIMEOUT_SECS)]
    drain_timeout_secs: u64,

    /// Time the engine gets to exit after SIGTERM before it is killed.
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = defaults::SHUTDOWN_GRACE_SECS)]
    shutdown_grace_secs: u64,

    /// Print the engine command line and exit.
    #[arg(long)]
    print_command: bool,
}

impl Args {
    fn options(&self) -> SidecarOptions {
        SidecarOptions {
            endpoint: EngineEndpoint::new(self.engine_host.clone(), self.engine_port),
            probe: ProbeSettings {
                interval: Duration::from_secs(self.probe_interval_secs),
                max_attempts: self.probe_max_attempts,
                attempt_timeout: Duration::from_secs(self.probe_timeout_secs),
            },
            invocation_timeout: Duration::from_secs(self.invocation_timeout_secs),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            supervisor: SupervisorOptions {
                shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
                ..Default::default()
            },
        }
    }

    fn engine_command(&self, config: &EngineConfig, endpoint: &EngineEndpoint) -> EngineCommand {
        let command =
            EngineCommand::vllm(config, endpoint).with_program(self.engine_python.clone());
        match &self.engine_log {
            Some(path) => command.with_log_file(path),
            None => command,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vllm_sidecar=info")),
        )
        .init();

    // Installed before the engine exists so a stop during startup still
    // tears it down.
    let shutdown = vllm_sidecar::termination_signal();

    let args = Args::parse();
    let config = EngineConfig::from_env().context("resolving engine configuration")?;
    let options = args.options();
    let command = args.engine_command(&config, &options.endpoint);

    if args.print_command {
        println!("{}", command);
        return Ok(ExitCode::SUCCESS);
    }

    log::info!(
        "vllm-sidecar {} serving '{}' ({}, {}, max_model_len={})",
        vllm_sidecar::VERSION,
        config.served_model_name,
        config.category,
        config.precision,
        config.max_model_len
    );

    let reason = vllm_sidecar::run(&command, options, args.bind, shutdown)
        .await
        .context("sidecar failed")?;

    match reason {
        ExitReason::Requested => Ok(ExitCode::SUCCESS),
        ExitReason::EngineExited(status) => {
            log::error!("Exiting because the engine stopped ({})", status);
            Ok(ExitCode::FAILURE)
        }
    }
}
