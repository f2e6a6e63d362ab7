//! Engine configuration resolved from the process environment.
//!
//! Every value has a default; a variable that is unset or empty falls back to
//! it. A variable that is set but cannot be parsed is a startup error, so an
//! `EngineConfig` is either complete or never built.

use std::fmt;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::defaults;

pub const ENV_SERVED_MODEL_NAME: &str = "SERVED_MODEL_NAME";
pub const ENV_MAX_MODEL_LEN: &str = "MAX_MODEL_LEN";
pub const ENV_DTYPE: &str = "DTYPE";
pub const ENV_MODEL_TYPE: &str = "MODEL_TYPE";
pub const ENV_MODEL_PATH: &str = "MODEL_PATH";
pub const ENV_ALLOWED_LOCAL_MEDIA_PATH: &str = "ALLOWED_LOCAL_MEDIA_PATH";
pub const ENV_MAX_PIXELS: &str = "MAX_PIXELS";
pub const ENV_MAX_IMAGES_PER_PROMPT: &str = "MAX_IMAGES_PER_PROMPT";

/// Errors raised while resolving configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Kind of model being served. Selects the engine flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCategory {
    Text,
    Multimodal,
}

impl ModelCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Multimodal => "multimodal",
        }
    }
}

impl fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "multimodal" => Ok(Self::Multimodal),
            _ => Err("expected 'text' or 'multimodal'".to_string()),
        }
    }
}

/// Numeric precision the engine loads weights in (vLLM `--dtype`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Auto,
    Half,
    Float16,
    BFloat16,
    Float,
    Float32,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Half => "half",
            Self::Float16 => "float16",
            Self::BFloat16 => "bfloat16",
            Self::Float => "float",
            Self::Float32 => "float32",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "half" => Ok(Self::Half),
            "float16" => Ok(Self::Float16),
            "bfloat16" => Ok(Self::BFloat16),
            "float" => Ok(Self::Float),
            "float32" => Ok(Self::Float32),
            _ => Err(
                "expected one of auto, half, float16, bfloat16, float, float32".to_string(),
            ),
        }
    }
}

/// Limits applied to multimodal prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultimodalLimits {
    pub allowed_local_media_path: PathBuf,
    pub max_pixels: u64,
    pub max_images_per_prompt: u32,
}

impl Default for MultimodalLimits {
    fn default() -> Self {
        Self {
            allowed_local_media_path: PathBuf::from(defaults::ALLOWED_LOCAL_MEDIA_PATH),
            max_pixels: defaults::MAX_PIXELS,
            max_images_per_prompt: defaults::MAX_IMAGES_PER_PROMPT,
        }
    }
}

/// Engine configuration, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub served_model_name: String,
    pub max_model_len: NonZeroU32,
    pub precision: Precision,
    pub category: ModelCategory,
    pub model_path: PathBuf,
    /// Only consulted when `category` is multimodal.
    pub multimodal: MultimodalLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            served_model_name: defaults::SERVED_MODEL_NAME.to_string(),
            max_model_len: NonZeroU32::new(defaults::MAX_MODEL_LEN).unwrap_or(NonZeroU32::MIN),
            precision: Precision::BFloat16,
            category: ModelCategory::Multimodal,
            model_path: PathBuf::from(defaults::MODEL_PATH),
            multimodal: MultimodalLimits::default(),
        }
    }
}

impl EngineConfig {
    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = Self::default();

        let served_model_name =
            read_var(&lookup, ENV_SERVED_MODEL_NAME).unwrap_or(base.served_model_name);
        let model_path = read_var(&lookup, ENV_MODEL_PATH)
            .map(PathBuf::from)
            .unwrap_or(base.model_path);
        let allowed_local_media_path = read_var(&lookup, ENV_ALLOWED_LOCAL_MEDIA_PATH)
            .map(PathBuf::from)
            .unwrap_or(base.multimodal.allowed_local_media_path);

        Ok(Self {
            served_model_name,
            max_model_len: parse_var(&lookup, ENV_MAX_MODEL_LEN, base.max_model_len)?,
            precision: parse_var(&lookup, ENV_DTYPE, base.precision)?,
            category: parse_var(&lookup, ENV_MODEL_TYPE, base.category)?,
            model_path,
            multimodal: MultimodalLimits {
                allowed_local_media_path,
                max_pixels: parse_var(&lookup, ENV_MAX_PIXELS, base.multimodal.max_pixels)?,
                max_images_per_prompt: parse_var(
                    &lookup,
                    ENV_MAX_IMAGES_PER_PROMPT,
                    base.multimodal.max_images_per_prompt,
                )?,
            },
        })
    }
}

/// Trimmed value of `key`, or `None` when unset or blank.
fn read_var<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match read_var(lookup, key) {
        None => Ok(default),
        Some(value) => value.parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}
