// config.rs - Centralized constants and the pipeline configuration.
//
// IMPORTANT:
// Keep ALL numeric values centralized here (repo rule: no hardcoded numeric values scattered around).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::embeddings::extract::Pooling;
use crate::error::{EmbedError, Result};

// NOTE: HOST_VERSION must stay in sync with the `version` field in Cargo.toml.
pub const HOST_VERSION: &str = "0.3.0";

pub mod logging {
    pub const LOG_DIR_REL: &str = ".embed_pipeline/logs";
    pub const LOG_FILE_NAME: &str = "embed_helper.log";
    // Overrides LOG_DIR_REL when set and non-empty.
    pub const LOG_DIR_ENV: &str = "EMBED_HELPER_LOG_DIR";
    // File level when RUST_LOG is unset.
    pub const DEFAULT_LEVEL: &str = "debug";

    pub const LOG_ROTATE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
    pub const LOG_ROTATE_KEEP_FILES: usize = 5;
}

pub mod native_messaging {
    pub const MAX_MESSAGE_SIZE_BYTES: u32 = 128 * 1024 * 1024;
}

pub mod embedding {
    pub const DEFAULT_BATCH_SIZE: usize = 256;

    // Floor for the L2 norm so near-zero vectors don't blow up.
    pub const NORM_EPSILON: f32 = 1e-12;
    // Floor for the mask sum in mean pooling (all-padding rows).
    pub const MASK_SUM_EPSILON: f32 = 1e-9;

    // Used when truncation is on and neither maxTokens nor tokenizer_config.json say otherwise.
    pub const FALLBACK_MAX_TOKENS: usize = 512;

    pub const DEFAULT_MODEL_NAME: &str = "all-MiniLM-L6-v2";

    // Local model storage directory (relative to home)
    pub const MODELS_DIR_REL: &str = ".embed_pipeline/models";

    // Batches buffered between the blocking worker and an async consumer.
    pub const STREAM_CHANNEL_CAPACITY: usize = 1;

    // ONNX session threads (only used with the `onnx` feature).
    pub const ONNX_INTRA_THREADS: usize = 2;
}

pub mod text_prep {
    pub const QUERY_PREFIX: &str = "query: ";
    pub const PASSAGE_PREFIX: &str = "passage: ";

    // Word windows for pre-segmenting long documents. Word-piece tokenization
    // expands by ~1.3x, so 180 words stays under a 256-token context.
    pub const SEGMENT_WORDS: usize = 180;
}

/// Which inference runtime evaluates the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// candle BERT over `model.safetensors` + `config.json`.
    #[default]
    Candle,
    /// ONNX Runtime over `model.onnx` (requires the `onnx` feature).
    Onnx,
}

/// Known model presets. Both bundled models emit 384-d hidden states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProfile {
    pub name: &'static str,
    pub dimensions: usize,
    pub pooling: Pooling,
}

pub const MODEL_PROFILES: &[ModelProfile] = &[
    ModelProfile {
        name: "all-MiniLM-L6-v2",
        dimensions: 384,
        pooling: Pooling::Mean,
    },
    ModelProfile {
        name: "gte-small",
        dimensions: 384,
        pooling: Pooling::Cls,
    },
];

impl ModelProfile {
    pub fn by_name(name: &str) -> Option<&'static ModelProfile> {
        MODEL_PROFILES.iter().find(|p| p.name == name)
    }
}

/// Runtime configuration for loading and running a [`crate::Pipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Directory holding the model and tokenizer artifacts. May start with `~/`.
    /// Empty means `~/.embed_pipeline/models/<model>`.
    pub model_dir: String,
    /// Model name, used for the default directory and profile lookup.
    pub model: String,
    pub backend: Backend,
    pub pooling: Pooling,
    /// Opt-in truncation. Off by default: callers pre-segment long documents.
    pub truncation: bool,
    /// Truncation length when `truncation` is on.
    pub max_tokens: Option<usize>,
    pub batch_size: usize,
    /// When set, the engine's hidden size must match.
    pub expected_dimensions: Option<usize>,
    /// File name (relative to the model dir) -> SHA-256 hex.
    pub checksums: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_dir: String::new(),
            model: embedding::DEFAULT_MODEL_NAME.to_string(),
            backend: Backend::default(),
            pooling: Pooling::default(),
            truncation: false,
            max_tokens: None,
            batch_size: embedding::DEFAULT_BATCH_SIZE,
            expected_dimensions: None,
            checksums: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EmbedError::Initialization(format!("read config {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            EmbedError::Initialization(format!("parse config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EmbedError::Config("batchSize must be positive".into()));
        }
        if self.max_tokens == Some(0) {
            return Err(EmbedError::Config("maxTokens must be positive".into()));
        }
        Ok(())
    }

    /// Resolve the model directory, expanding `~/` to the home directory.
    pub fn resolved_model_dir(&self) -> Result<PathBuf> {
        if self.model_dir.is_empty() {
            return Ok(home_dir()?.join(embedding::MODELS_DIR_REL).join(&self.model));
        }
        if let Some(rest) = self.model_dir.strip_prefix("~/") {
            return Ok(home_dir()?.join(rest));
        }
        Ok(PathBuf::from(&self.model_dir))
    }

    pub fn profile(&self) -> Option<&'static ModelProfile> {
        ModelProfile::by_name(&self.model)
    }
}

pub fn home_dir() -> Result<PathBuf> {
    // Use $HOME on all platforms (macOS, Linux, Windows via MSYS/Git Bash)
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| {
            EmbedError::Initialization(
                "cannot determine home directory (neither HOME nor USERPROFILE is set)".into(),
            )
        })
}
