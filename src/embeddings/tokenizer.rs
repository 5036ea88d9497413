// tokenizer.rs - Tokenizer adapter: text -> token ids + attention mask.
//
// The packer only relies on the `TextTokenizer` contract. `HfTokenizer` backs it with
// a HuggingFace tokenizer.json. Padding is always disabled here (the packer pads per
// batch), truncation is opt-in.

use std::path::Path;

use serde::Deserialize;
use tokenizers::{Tokenizer, TruncationParams};

use crate::config;
use crate::error::{EmbedError, Result, TokenizeError};

/// One document's encoding. Both vectors have the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSequence {
    pub ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

impl TokenSequence {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Pure function of text and tokenizer state. `Sync` so a batch can be encoded in parallel.
pub trait TextTokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> std::result::Result<TokenSequence, TokenizeError>;
}

/// The subset of tokenizer_config.json we care about.
#[derive(Debug, Default, Deserialize)]
struct TokenizerSettings {
    model_max_length: Option<f64>,
}

pub struct HfTokenizer {
    inner: Tokenizer,
    truncate_to: Option<usize>,
}

impl std::fmt::Debug for HfTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HfTokenizer")
            .field("truncate_to", &self.truncate_to)
            .finish_non_exhaustive()
    }
}

impl HfTokenizer {
    /// Load tokenizer.json, plus the optional companion tokenizer_config.json.
    ///
    /// With `truncation` off, any truncation baked into tokenizer.json is removed so
    /// long inputs come through whole.
    pub fn load(
        tokenizer_path: &Path,
        settings_path: Option<&Path>,
        truncation: bool,
        max_tokens: Option<usize>,
    ) -> Result<Self> {
        let mut inner = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            EmbedError::Initialization(format!("load tokenizer {}: {e}", tokenizer_path.display()))
        })?;

        let settings = match settings_path {
            Some(path) => read_settings(path)?,
            None => TokenizerSettings::default(),
        };

        let truncate_to = if truncation {
            Some(
                max_tokens
                    .or_else(|| settings.model_max_length.and_then(max_length_from_settings))
                    .unwrap_or(config::embedding::FALLBACK_MAX_TOKENS),
            )
        } else {
            None
        };

        let truncation_params = truncate_to.map(|max_length| TruncationParams {
            max_length,
            ..TruncationParams::default()
        });
        inner
            .with_truncation(truncation_params)
            .map_err(|e| EmbedError::Initialization(format!("configure truncation: {e}")))?;
        inner.with_padding(None);

        log::info!(
            "Tokenizer loaded from {} (truncation: {})",
            tokenizer_path.display(),
            truncate_to.map_or_else(|| "off".to_string(), |n| format!("{n} tokens")),
        );

        Ok(Self { inner, truncate_to })
    }

    pub fn truncate_to(&self) -> Option<usize> {
        self.truncate_to
    }
}

impl TextTokenizer for HfTokenizer {
    fn tokenize(&self, text: &str) -> std::result::Result<TokenSequence, TokenizeError> {
        if text.trim().is_empty() {
            return Err(TokenizeError::EmptyInput);
        }

        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| TokenizeError::Encode(e.to_string()))?;

        Ok(TokenSequence {
            ids: encoding.get_ids().to_vec(),
            attention_mask: encoding.get_attention_mask().to_vec(),
        })
    }
}

fn read_settings(path: &Path) -> Result<TokenizerSettings> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| EmbedError::Initialization(format!("read {}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| EmbedError::Initialization(format!("parse {}: {e}", path.display())))
}

// HF writes a huge sentinel (1e30) when the model has no real limit.
fn max_length_from_settings(value: f64) -> Option<usize> {
    if value.is_finite() && value >= 1.0 && value <= u32::MAX as f64 {
        Some(value as usize)
    } else {
        None
    }
}
