// pipeline.rs - Tokenize -> pack -> infer -> pool/normalize, batch by batch.
//
// `embed` returns a lazy stream: each `next()` packs one batch, runs exactly one
// inference on it and yields that batch's vectors. Batches run strictly in order.
// The first error ends the stream; no batch is skipped or zero-filled.
// Timing/counters live in a `Metrics` value owned by the call, never in globals.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{Backend, PipelineConfig};
use crate::embeddings::artifacts::ModelArtifacts;
use crate::embeddings::batch::BatchPacker;
use crate::embeddings::engine::{CandleBertEngine, InferenceEngine};
use crate::embeddings::extract::{extract, Embedding, Pooling};
use crate::embeddings::tokenizer::{HfTokenizer, TextTokenizer};
use crate::error::{EmbedError, Result};

/// Counters and timings for one pipeline invocation. Callers aggregate with `merge`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub documents: usize,
    pub batches: usize,
    /// Unpadded tokens fed to the model.
    pub tokens: usize,
    pub padded_positions: usize,
    #[serde(serialize_with = "as_millis")]
    pub tokenize_time: Duration,
    #[serde(serialize_with = "as_millis")]
    pub inference_time: Duration,
    #[serde(serialize_with = "as_millis")]
    pub extract_time: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

impl Metrics {
    pub fn merge(&mut self, other: &Metrics) {
        self.documents += other.documents;
        self.batches += other.batches;
        self.tokens += other.tokens;
        self.padded_positions += other.padded_positions;
        self.tokenize_time += other.tokenize_time;
        self.inference_time += other.inference_time;
        self.extract_time += other.extract_time;
    }

    pub fn total_time(&self) -> Duration {
        self.tokenize_time + self.inference_time + self.extract_time
    }
}

/// All vectors of one call, in input order, plus that call's metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embedded {
    pub embeddings: Vec<Embedding>,
    pub metrics: Metrics,
}

/// A loaded tokenizer/engine pair. Read-only after construction.
pub struct Pipeline {
    tokenizer: Box<dyn TextTokenizer>,
    engine: Box<dyn InferenceEngine>,
    pooling: Pooling,
    batch_size: usize,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("engine", &self.engine.name())
            .field("dimensions", &self.engine.hidden_size())
            .field("pooling", &self.pooling)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        tokenizer: Box<dyn TextTokenizer>,
        engine: Box<dyn InferenceEngine>,
        pooling: Pooling,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(EmbedError::Config("batch size must be positive".into()));
        }
        Ok(Self {
            tokenizer,
            engine,
            pooling,
            batch_size,
        })
    }

    /// Locate artifacts, verify checksums, load tokenizer and engine. Blocking.
    pub fn load(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let dir = config.resolved_model_dir()?;
        let artifacts = ModelArtifacts::locate(&dir, config.backend)?;
        artifacts.verify_checksums(&config.checksums)?;

        let tokenizer = HfTokenizer::load(
            &artifacts.tokenizer,
            artifacts.tokenizer_config.as_deref(),
            config.truncation,
            config.max_tokens,
        )?;
        let engine = load_engine(config, &artifacts)?;

        if let Some(expected) = config.expected_dimensions {
            if engine.hidden_size() != expected {
                return Err(EmbedError::Initialization(format!(
                    "model emits {}-d vectors, config expects {expected}",
                    engine.hidden_size()
                )));
            }
        }

        log::info!(
            "Pipeline ready: model={} engine={} dims={} pooling={} batch_size={}",
            config.model,
            engine.name(),
            engine.hidden_size(),
            config.pooling,
            config.batch_size,
        );

        Self::new(Box::new(tokenizer), engine, config.pooling, config.batch_size)
    }

    pub fn dimensions(&self) -> usize {
        self.engine.hidden_size()
    }

    pub fn pooling(&self) -> Pooling {
        self.pooling
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Lazy per-batch stream with the configured batch size.
    pub fn embed<'a, S>(&'a self, documents: &'a [S]) -> EmbedStream<'a, S>
    where
        S: AsRef<str> + Sync,
    {
        self.embed_with(documents, self.batch_size)
    }

    /// Like [`Pipeline::embed`] with an explicit batch size (0 yields a config error).
    pub fn embed_with<'a, S>(&'a self, documents: &'a [S], batch_size: usize) -> EmbedStream<'a, S>
    where
        S: AsRef<str> + Sync,
    {
        let (packer, pending) = match BatchPacker::new(self.tokenizer.as_ref(), documents, batch_size) {
            Ok(packer) => (Some(packer), None),
            Err(e) => (None, Some(e)),
        };
        EmbedStream {
            pipeline: self,
            packer,
            pending,
            metrics: Metrics::default(),
            done: false,
        }
    }

    /// Drain the stream into one list in input order.
    pub fn embed_all<S>(&self, documents: &[S]) -> Result<Embedded>
    where
        S: AsRef<str> + Sync,
    {
        collect(self.embed(documents), documents.len())
    }

    pub fn embed_all_with<S>(&self, documents: &[S], batch_size: usize) -> Result<Embedded>
    where
        S: AsRef<str> + Sync,
    {
        collect(self.embed_with(documents, batch_size), documents.len())
    }

    pub fn embed_one(&self, text: &str) -> Result<Embedding> {
        let mut embedded = self.embed_all(&[text])?;
        embedded
            .embeddings
            .pop()
            .ok_or_else(|| EmbedError::ShapeMismatch("no vector produced for one document".into()))
    }
}

fn collect<S>(mut stream: EmbedStream<'_, S>, expected: usize) -> Result<Embedded>
where
    S: AsRef<str> + Sync,
{
    let mut embeddings = Vec::with_capacity(expected);
    for batch in stream.by_ref() {
        embeddings.extend(batch?);
    }
    Ok(Embedded {
        embeddings,
        metrics: stream.metrics(),
    })
}

fn load_engine(config: &PipelineConfig, artifacts: &ModelArtifacts) -> Result<Box<dyn InferenceEngine>> {
    match config.backend {
        Backend::Candle => {
            let config_path = artifacts.model_config.as_deref().ok_or_else(|| {
                EmbedError::Initialization("candle backend needs config.json".into())
            })?;
            Ok(Box::new(CandleBertEngine::load(&artifacts.model, config_path)?))
        }
        Backend::Onnx => load_onnx(config, &artifacts.model),
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(config: &PipelineConfig, model_path: &Path) -> Result<Box<dyn InferenceEngine>> {
    let hidden = config
        .expected_dimensions
        .or_else(|| config.profile().map(|p| p.dimensions))
        .ok_or_else(|| {
            EmbedError::Initialization(format!(
                "unknown model `{}`: set expectedDimensions for the onnx backend",
                config.model
            ))
        })?;
    Ok(Box::new(crate::embeddings::onnx::OnnxEngine::load(model_path, hidden)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(_config: &PipelineConfig, model_path: &Path) -> Result<Box<dyn InferenceEngine>> {
    Err(EmbedError::Initialization(format!(
        "{} needs the onnx backend; rebuild with `--features onnx`",
        model_path.display()
    )))
}

/// Lazy, finite sequence of per-batch embedding lists. See [`Pipeline::embed`].
pub struct EmbedStream<'a, S> {
    pipeline: &'a Pipeline,
    packer: Option<BatchPacker<'a, S>>,
    /// Construction error, reported by the first `next()`.
    pending: Option<EmbedError>,
    metrics: Metrics,
    done: bool,
}

impl<S> EmbedStream<'_, S>
where
    S: AsRef<str> + Sync,
{
    /// Metrics for the batches yielded so far.
    pub fn metrics(&self) -> Metrics {
        self.metrics
    }

    fn step(&mut self) -> Option<Result<Vec<Embedding>>> {
        if let Some(e) = self.pending.take() {
            return Some(Err(e));
        }
        let packer = self.packer.as_mut()?;

        let started = Instant::now();
        let batch = match packer.next()? {
            Ok(batch) => batch,
            Err(e) => return Some(Err(e)),
        };
        self.metrics.tokenize_time += started.elapsed();

        let started = Instant::now();
        let output = match self.pipeline.engine.run(&batch) {
            Ok(output) => output,
            Err(source) => {
                log::error!("Inference failed on batch {}: {}", batch.index, source);
                return Some(Err(EmbedError::Inference {
                    batch: batch.index,
                    source,
                }));
            }
        };
        self.metrics.inference_time += started.elapsed();

        if let Err(e) = output.check_against(&batch) {
            return Some(Err(e));
        }

        let started = Instant::now();
        let embeddings = match extract(
            &output.last_hidden_state,
            &batch.attention_mask,
            self.pipeline.pooling,
        ) {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        self.metrics.extract_time += started.elapsed();

        self.metrics.documents += batch.size;
        self.metrics.batches += 1;
        self.metrics.tokens += batch.real_tokens();
        self.metrics.padded_positions += batch.padded_positions();

        log::debug!(
            "Embedded batch {} ({} docs at offset {})",
            batch.index,
            batch.size,
            batch.offset
        );
        Some(Ok(embeddings))
    }
}

impl<S> Iterator for EmbedStream<'_, S>
where
    S: AsRef<str> + Sync,
{
    type Item = Result<Vec<Embedding>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.step();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        match &self.packer {
            Some(packer) => packer.size_hint(),
            None => (1, Some(1)),
        }
    }
}

impl<S> std::iter::FusedIterator for EmbedStream<'_, S> where S: AsRef<str> + Sync {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::{FakeEngine, FakeTokenizer};
    use crate::similarity::{cosine_similarity, rank, Metric};

    const HIDDEN: usize = 16;

    fn pipeline(pooling: Pooling, batch_size: usize) -> Pipeline {
        Pipeline::new(
            Box::new(FakeTokenizer::default()),
            Box::new(FakeEngine::new(HIDDEN)),
            pooling,
            batch_size,
        )
        .unwrap()
    }

    fn assert_close(a: &[Embedding], b: &[Embedding], tol: f32) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert_eq!(x.len(), y.len());
            for (p, q) in x.iter().zip(y) {
                assert!((p - q).abs() <= tol, "{p} vs {q}");
            }
        }
    }

    const SCENARIO: [&str; 3] = [
        "passage: Hello, World!",
        "passage: Hello, World!!",
        "query: Hello, World!",
    ];

    #[test]
    fn test_scenario_batch_sizes_agree() {
        let p = pipeline(Pooling::Cls, 256);

        let batches: Vec<Vec<Embedding>> = p
            .embed_with(&SCENARIO, 2)
            .collect::<Result<_>>()
            .unwrap();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1]);

        let flat: Vec<Embedding> = batches.into_iter().flatten().collect();
        let single = p.embed_all_with(&SCENARIO, 3).unwrap();
        assert_eq!(single.metrics.batches, 1);
        assert_close(&flat, &single.embeddings, 1e-5);
    }

    #[test]
    fn test_order_preserved_across_batch_sizes() {
        let docs = [
            "the quick brown fox",
            "jumps",
            "over the lazy dog and keeps running far away",
            "hello",
            "a b c d e",
        ];
        for pooling in [Pooling::Cls, Pooling::Mean] {
            let p = pipeline(pooling, 256);
            let one_by_one: Vec<Embedding> = docs.iter().map(|d| p.embed_one(d).unwrap()).collect();
            for batch_size in [1, 2, 3, docs.len()] {
                let out = p.embed_all_with(&docs, batch_size).unwrap();
                assert_close(&out.embeddings, &one_by_one, 1e-5);
            }
        }
    }

    #[test]
    fn test_embeddings_are_unit_length() {
        let p = pipeline(Pooling::Mean, 2);
        let out = p.embed_all(&SCENARIO).unwrap();
        assert_eq!(out.embeddings.len(), 3);
        for v in &out.embeddings {
            assert_eq!(v.len(), HIDDEN);
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_pooling_choice_changes_vectors() {
        let cls = pipeline(Pooling::Cls, 4).embed_one("several words in here").unwrap();
        let mean = pipeline(Pooling::Mean, 4).embed_one("several words in here").unwrap();
        assert!(cosine_similarity(&cls, &mean) < 0.9999);
    }

    #[test]
    fn test_identical_text_ranks_first() {
        let p = pipeline(Pooling::Mean, 4);
        let query = p.embed_one("I work at Kin").unwrap();
        let candidates = [
            "thomas works at Kin",
            "Kin values transparency and trustworthiness",
            "I work at Kin",
            "0.1.4 version of Kin",
        ];
        let vectors = p.embed_all(&candidates).unwrap().embeddings;
        let ranked = rank(&query, &vectors, Metric::Cosine).unwrap();
        assert_eq!(ranked[0].index, 2);
        assert!(ranked.iter().all(|r| ranked[0].value >= r.value));
    }

    #[test]
    fn test_metrics_account_for_padding() {
        let p = pipeline(Pooling::Cls, 2);
        // token counts: 3, 5 | 4
        let docs = ["one", "one two three", "one two"];
        let out = p.embed_all(&docs).unwrap();
        assert_eq!(out.metrics.documents, 3);
        assert_eq!(out.metrics.batches, 2);
        assert_eq!(out.metrics.tokens, 12);
        assert_eq!(out.metrics.padded_positions, 2);

        let mut total = Metrics::default();
        total.merge(&out.metrics);
        total.merge(&out.metrics);
        assert_eq!(total.documents, 6);
        assert_eq!(total.batches, 4);
    }

    #[test]
    fn test_empty_input() {
        let p = pipeline(Pooling::Cls, 4);
        let docs: [&str; 0] = [];
        assert_eq!(p.embed(&docs).count(), 0);
        let out = p.embed_all(&docs).unwrap();
        assert!(out.embeddings.is_empty());
        assert_eq!(out.metrics, Metrics::default());
    }

    #[test]
    fn test_inference_failure_stops_stream() {
        let engine = FakeEngine::failing_on(HIDDEN, 1);
        let p = Pipeline::new(
            Box::new(FakeTokenizer::default()),
            Box::new(engine),
            Pooling::Cls,
            1,
        )
        .unwrap();
        let docs = ["a", "b", "c"];
        let mut stream = p.embed(&docs);
        assert!(stream.next().unwrap().is_ok());
        match stream.next().unwrap() {
            Err(EmbedError::Inference { batch, .. }) => assert_eq!(batch, 1),
            other => panic!("expected inference error, got {other:?}"),
        }
        assert!(stream.next().is_none());
        assert_eq!(stream.metrics().batches, 1);

        assert!(matches!(
            p.embed_all(&docs),
            Err(EmbedError::Inference { batch: 1, .. })
        ));
    }

    #[test]
    fn test_tokenization_failure_reports_document() {
        let p = pipeline(Pooling::Cls, 2);
        let docs = ["fine", "fine too", "", "never"];
        match p.embed_all(&docs) {
            Err(EmbedError::Tokenization { document, batch, .. }) => {
                assert_eq!((document, batch), (2, 1));
            }
            other => panic!("expected tokenization error, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_batch_size() {
        let p = pipeline(Pooling::Cls, 2);
        let docs = ["a"];
        let mut stream = p.embed_with(&docs, 0);
        assert!(matches!(stream.next(), Some(Err(EmbedError::Config(_)))));
        assert!(stream.next().is_none());
        assert!(Pipeline::new(
            Box::new(FakeTokenizer::default()),
            Box::new(FakeEngine::new(HIDDEN)),
            Pooling::Cls,
            0
        )
        .is_err());
    }

    #[test]
    fn test_one_inference_per_batch() {
        let engine = std::sync::Arc::new(FakeEngine::new(HIDDEN));
        struct Shared(std::sync::Arc<FakeEngine>);
        impl InferenceEngine for Shared {
            fn name(&self) -> &str {
                self.0.name()
            }
            fn hidden_size(&self) -> usize {
                self.0.hidden_size()
            }
            fn run(
                &self,
                batch: &crate::embeddings::batch::Batch,
            ) -> std::result::Result<crate::embeddings::engine::ModelOutput, crate::error::EngineError>
            {
                self.0.run(batch)
            }
        }
        let p = Pipeline::new(
            Box::new(FakeTokenizer::default()),
            Box::new(Shared(engine.clone())),
            Pooling::Cls,
            3,
        )
        .unwrap();
        let docs = ["a"; 7];
        p.embed_all(&docs).unwrap();
        assert_eq!(engine.runs(), 3);
    }

    #[test]
    fn test_load_without_artifacts_fails_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            model_dir: dir.path().to_string_lossy().into_owned(),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            Pipeline::load(&config),
            Err(EmbedError::Initialization(_))
        ));
    }
}
