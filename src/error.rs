// error.rs - Error taxonomy for the embedding pipeline.
//
// Every failure is fatal for the call that hit it: nothing retries, nothing is
// replaced by a placeholder vector. Indices identify the offending document/batch.

use thiserror::Error;

/// Failure inside the tokenizer adapter, before it is tagged with a position.
#[derive(Debug, Error)]
pub enum TokenizeError {
    #[error("input is empty")]
    EmptyInput,

    #[error("encode failed: {0}")]
    Encode(String),
}

/// Failure inside an inference engine, before it is tagged with a batch index.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine refused the input tensors.
    #[error("rejected input shape: {0}")]
    Shape(String),

    #[error("{0}")]
    Runtime(String),
}

#[derive(Debug, Error)]
pub enum EmbedError {
    /// Model or tokenizer artifact missing/corrupt, or the engine could not be built.
    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("tokenization failed for document {document} (batch {batch}): {source}")]
    Tokenization {
        document: usize,
        batch: usize,
        #[source]
        source: TokenizeError,
    },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("dimension mismatch at candidate {index}: expected {expected}, got {actual}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("inference failed for batch {batch}: {source}")]
    Inference {
        batch: usize,
        #[source]
        source: EngineError,
    },

    /// A blocking worker panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, EmbedError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_carries_indices() {
        let err = EmbedError::Tokenization {
            document: 7,
            batch: 1,
            source: TokenizeError::EmptyInput,
        };
        assert_eq!(
            err.to_string(),
            "tokenization failed for document 7 (batch 1): input is empty"
        );

        let err = EmbedError::DimensionMismatch {
            index: 2,
            expected: 384,
            actual: 768,
        };
        assert_eq!(
            err.to_string(),
            "dimension mismatch at candidate 2: expected 384, got 768"
        );
    }

    #[test]
    fn test_source_chain_preserved() {
        let err = EmbedError::Inference {
            batch: 3,
            source: EngineError::Runtime("session closed".into()),
        };
        let source = err.source().expect("should have source");
        assert_eq!(source.to_string(), "session closed");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<EmbedError>();
    }
}
