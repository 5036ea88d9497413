// embeddings/ - Local sentence embedding pipeline.
//
// Provides:
// - Tokenizer adapter and batch packing (padded i64 matrices)
// - Inference engines (candle BERT; ONNX Runtime behind the `onnx` feature)
// - Pooling + L2 normalization
// - Pipeline orchestration, async service, artifact checks, text preparation

pub mod artifacts;
pub mod batch;
pub mod engine;
pub mod extract;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pipeline;
pub mod service;
pub mod text_prep;
pub mod tokenizer;

#[cfg(test)]
pub(crate) mod testing;
