//! Default values for the engine command line and the sidecar's timing.

pub const ENGINE_HOST: &str = "127.0.0.1";
pub const ENGINE_PORT: u16 = 8000;
pub const SERVICE_BIND: &str = "0.0.0.0:8080";

pub const ENGINE_PYTHON: &str = "python3";
pub const ENGINE_ENTRYPOINT: &str = "vllm.entrypoints.openai.api_server";
pub const WORKER_MULTIPROC_METHOD_VAR: &str = "VLLM_WORKER_MULTIPROC_METHOD";
pub const WORKER_MULTIPROC_METHOD: &str = "spawn";

pub const SERVED_MODEL_NAME: &str = "autoglm-phone-9b";
pub const MAX_MODEL_LEN: u32 = 25480;
pub const MODEL_PATH: &str = "/opt/ml/model";

pub const ALLOWED_LOCAL_MEDIA_PATH: &str = "/";
pub const MAX_PIXELS: u64 = 5_000_000;
pub const MAX_IMAGES_PER_PROMPT: u32 = 10;

pub const PROBE_INTERVAL_SECS: u64 = 5;
pub const PROBE_MAX_ATTEMPTS: u32 = 120;
pub const PROBE_ATTEMPT_TIMEOUT_SECS: u64 = 5;

pub const INVOCATION_TIMEOUT_SECS: u64 = 300;
/// Inbound body cap. Image payloads are base64 inline, so this is generous.
pub const MAX_INVOCATION_BYTES: usize = 64 * 1024 * 1024;

/// In-flight invocations are abandoned this long after shutdown begins.
pub const DRAIN_TIMEOUT_SECS: u64 = 20;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;
pub const EXIT_POLL_INTERVAL_MS: u64 = 1000;
