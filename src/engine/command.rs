//! Engine command-line construction.
//!
//! Turning an `EngineConfig` into arguments is a pure function so the flag
//! sets can be checked without spawning anything.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use serde_json::json;

use crate::config::{EngineConfig, ModelCategory, MultimodalLimits};
use crate::defaults;

/// Flags that only the multimodal launch carries.
pub const MULTIMODAL_FLAGS: [&str; 6] = [
    "--allowed-local-media-path",
    "--mm-encoder-tp-mode",
    "--mm-processor-cache-type",
    "--mm-processor-kwargs",
    "--chat-template-content-format",
    "--limit-mm-per-prompt",
];

/// Loopback address the engine listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEndpoint {
    pub host: String,
    pub port: u16,
}

impl EngineEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Readiness probe target.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url())
    }

    /// Invocation forwarding target.
    pub fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url())
    }
}

impl Default for EngineEndpoint {
    fn default() -> Self {
        Self::new(defaults::ENGINE_HOST, defaults::ENGINE_PORT)
    }
}

/// A fully assembled engine launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Applied on top of the inherited parent environment.
    pub env_overrides: Vec<(String, String)>,
    /// Where engine stdout/stderr go. Inherited when `None`.
    pub log_file: Option<PathBuf>,
}

impl EngineCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_overrides: Vec::new(),
            log_file: None,
        }
    }

    /// vLLM's OpenAI-compatible server for `config`, bound to `endpoint`.
    pub fn vllm(config: &EngineConfig, endpoint: &EngineEndpoint) -> Self {
        Self::new(defaults::ENGINE_PYTHON)
            .arg("-m")
            .arg(defaults::ENGINE_ENTRYPOINT)
            .args(engine_args(config, endpoint))
            .env(
                defaults::WORKER_MULTIPROC_METHOD_VAR,
                defaults::WORKER_MULTIPROC_METHOD,
            )
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.push((key.into(), value.into()));
        self
    }

    /// Build the tokio command. The child is killed if its handle is dropped.
    pub(crate) fn to_command(&self) -> std::io::Result<tokio::process::Command> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env_overrides.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if let Some(path) = &self.log_file {
            let log_file = std::fs::File::create(path)?;
            cmd.stdout(Stdio::from(log_file.try_clone()?))
                .stderr(Stdio::from(log_file));
        }

        Ok(cmd)
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env_overrides {
            write!(f, "{}={} ", key, value)?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Engine arguments for `config`, in launch order.
///
/// The multimodal block is appended whole for `Multimodal` and is absent for
/// `Text`.
pub fn engine_args(config: &EngineConfig, endpoint: &EngineEndpoint) -> Vec<String> {
    let mut args = vec![
        "--model".to_string(),
        config.model_path.to_string_lossy().into_owned(),
        "--served-model-name".to_string(),
        config.served_model_name.clone(),
        "--max-model-len".to_string(),
        config.max_model_len.to_string(),
        "--dtype".to_string(),
        config.precision.to_string(),
    ];

    match config.category {
        ModelCategory::Multimodal => args.extend(multimodal_args(&config.multimodal)),
        ModelCategory::Text => {}
    }

    args.extend([
        "--host".to_string(),
        endpoint.host.clone(),
        "--port".to_string(),
        endpoint.port.to_string(),
    ]);
    args
}

fn multimodal_args(limits: &MultimodalLimits) -> Vec<String> {
    let processor_kwargs = json!({ "max_pixels": limits.max_pixels });
    let per_prompt = json!({ "image": limits.max_images_per_prompt });

    [
        (
            MULTIMODAL_FLAGS[0],
            limits.allowed_local_media_path.to_string_lossy().into_owned(),
        ),
        (MULTIMODAL_FLAGS[1], "data".to_string()),
        (MULTIMODAL_FLAGS[2], "shm".to_string()),
        (MULTIMODAL_FLAGS[3], processor_kwargs.to_string()),
        (MULTIMODAL_FLAGS[4], "string".to_string()),
        (MULTIMODAL_FLAGS[5], per_prompt.to_string()),
    ]
    .into_iter()
    .flat_map(|(flag, value)| [flag.to_string(), value])
    .collect()
}
