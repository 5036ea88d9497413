// artifacts.rs - Locate model/tokenizer files on disk and verify their SHA256.
//
// Layout (HF export conventions):
//   tokenizer.json           required
//   tokenizer_config.json    optional companion (model_max_length)
//   candle: model.safetensors + config.json
//   onnx:   model.onnx, or onnx/model.onnx

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::Backend;
use crate::error::{EmbedError, Result};

pub const TOKENIZER_JSON: &str = "tokenizer.json";
pub const TOKENIZER_CONFIG_JSON: &str = "tokenizer_config.json";
pub const MODEL_SAFETENSORS: &str = "model.safetensors";
pub const MODEL_CONFIG_JSON: &str = "config.json";
pub const MODEL_ONNX: &str = "model.onnx";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifacts {
    pub dir: PathBuf,
    /// Weights (safetensors) or graph (onnx).
    pub model: PathBuf,
    /// BERT config.json, candle only.
    pub model_config: Option<PathBuf>,
    pub tokenizer: PathBuf,
    pub tokenizer_config: Option<PathBuf>,
}

impl ModelArtifacts {
    /// Resolve every file the backend needs. All missing files are reported at once.
    pub fn locate(dir: &Path, backend: Backend) -> Result<Self> {
        if !dir.is_dir() {
            return Err(EmbedError::Initialization(format!(
                "model directory {} does not exist",
                dir.display()
            )));
        }

        let mut missing = Vec::new();
        let mut require = |name: &str| {
            let path = dir.join(name);
            if !path.is_file() {
                missing.push(name.to_string());
            }
            path
        };

        let tokenizer = require(TOKENIZER_JSON);
        let (model, model_config) = match backend {
            Backend::Candle => (require(MODEL_SAFETENSORS), Some(require(MODEL_CONFIG_JSON))),
            Backend::Onnx => {
                let nested = dir.join("onnx").join(MODEL_ONNX);
                if nested.is_file() {
                    (nested, None)
                } else {
                    (require(MODEL_ONNX), None)
                }
            }
        };

        if !missing.is_empty() {
            return Err(EmbedError::Initialization(format!(
                "missing model files in {}: {}",
                dir.display(),
                missing.join(", ")
            )));
        }

        let tokenizer_config = Some(dir.join(TOKENIZER_CONFIG_JSON)).filter(|p| p.is_file());

        log::info!("Model files found at {}", dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            model,
            model_config,
            tokenizer,
            tokenizer_config,
        })
    }

    /// Compare each listed file (relative to the model dir) against its SHA256 hex.
    pub fn verify_checksums(&self, checksums: &BTreeMap<String, String>) -> Result<()> {
        for (name, expected) in checksums {
            let path = self.dir.join(name);
            let actual = sha256_file(&path)?;
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(EmbedError::Initialization(format!(
                    "SHA256 mismatch for {name}: expected {expected}, got {actual}"
                )));
            }
            log::info!("SHA256 verified for {} ({})", name, &actual[..12]);
        }
        Ok(())
    }
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path)
        .map_err(|e| EmbedError::Initialization(format!("open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| EmbedError::Initialization(format!("read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("hello")
    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn touch(dir: &Path, name: &str, contents: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_locate_candle_layout() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), TOKENIZER_JSON, "{}");
        touch(dir.path(), MODEL_SAFETENSORS, "");
        touch(dir.path(), MODEL_CONFIG_JSON, "{}");

        let artifacts = ModelArtifacts::locate(dir.path(), Backend::Candle).unwrap();
        assert_eq!(artifacts.model, dir.path().join(MODEL_SAFETENSORS));
        assert_eq!(artifacts.model_config, Some(dir.path().join(MODEL_CONFIG_JSON)));
        assert!(artifacts.tokenizer_config.is_none());
    }

    #[test]
    fn test_locate_onnx_nested_layout() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), TOKENIZER_JSON, "{}");
        touch(dir.path(), TOKENIZER_CONFIG_JSON, "{}");
        touch(dir.path(), "onnx/model.onnx", "");

        let artifacts = ModelArtifacts::locate(dir.path(), Backend::Onnx).unwrap();
        assert_eq!(artifacts.model, dir.path().join("onnx").join(MODEL_ONNX));
        assert!(artifacts.model_config.is_none());
        assert_eq!(
            artifacts.tokenizer_config,
            Some(dir.path().join(TOKENIZER_CONFIG_JSON))
        );
    }

    #[test]
    fn test_missing_files_listed() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), MODEL_SAFETENSORS, "");
        let err = ModelArtifacts::locate(dir.path(), Backend::Candle).unwrap_err();
        let message = err.to_string();
        assert!(message.contains(TOKENIZER_JSON));
        assert!(message.contains(MODEL_CONFIG_JSON));
        assert!(!message.contains(MODEL_SAFETENSORS));
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelArtifacts::locate(&dir.path().join("nope"), Backend::Onnx).unwrap_err();
        assert!(matches!(err, EmbedError::Initialization(_)));
    }

    #[test]
    fn test_checksums() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), TOKENIZER_JSON, "hello");
        touch(dir.path(), MODEL_ONNX, "");
        let artifacts = ModelArtifacts::locate(dir.path(), Backend::Onnx).unwrap();

        let mut checksums = BTreeMap::new();
        checksums.insert(TOKENIZER_JSON.to_string(), HELLO_SHA256.to_uppercase());
        artifacts.verify_checksums(&checksums).unwrap();

        checksums.insert(TOKENIZER_JSON.to_string(), "00".repeat(32));
        let err = artifacts.verify_checksums(&checksums).unwrap_err();
        assert!(err.to_string().contains("SHA256 mismatch"));
    }
}
