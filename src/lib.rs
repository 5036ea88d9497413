// lib.rs - Sentence embedding pipeline.
//
// documents -> tokenizer -> batch packer -> inference engine -> pooling/normalize -> vectors,
// plus similarity scoring between vectors.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod similarity;

pub use config::{Backend, ModelProfile, PipelineConfig};
pub use embeddings::extract::{Embedding, Pooling};
pub use embeddings::pipeline::{EmbedStream, Embedded, Metrics, Pipeline};
pub use embeddings::service::EmbeddingService;
pub use error::{EmbedError, EngineError, Result, TokenizeError};
pub use similarity::{Metric, Ranked};
