// service.rs - Async surface over the blocking pipeline.
//
// Model loading and inference are CPU-bound, so they run on tokio's blocking pool.
// `shared` keeps one pipeline per process: the first caller loads it, concurrent
// callers wait on the same initialization, everyone after reuses it.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, OnceCell};

use crate::config::{self, PipelineConfig};
use crate::embeddings::extract::Embedding;
use crate::embeddings::pipeline::{Embedded, Metrics, Pipeline};
use crate::error::{EmbedError, Result};

static SHARED: OnceCell<EmbeddingService> = OnceCell::const_new();

/// Process-wide service, initialized on first use with `config`. Later calls
/// ignore their config and return the existing instance.
pub async fn shared(config: &PipelineConfig) -> Result<&'static EmbeddingService> {
    init_once(&SHARED, || EmbeddingService::initialize(config.clone())).await
}

/// Run `init` at most once per cell. Concurrent callers wait on the same run; a
/// failed run leaves the cell empty so a later call can retry.
async fn init_once<F, Fut>(cell: &OnceCell<EmbeddingService>, init: F) -> Result<&EmbeddingService>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<EmbeddingService>>,
{
    cell.get_or_try_init(init).await
}

/// The shared instance, if `shared` already succeeded.
pub fn try_shared() -> Option<&'static EmbeddingService> {
    SHARED.get()
}

/// Per-batch results forwarded from the blocking worker.
pub type BatchReceiver = mpsc::Receiver<Result<Vec<Embedding>>>;

#[derive(Debug, Clone)]
pub struct EmbeddingService {
    pipeline: Arc<Pipeline>,
}

impl EmbeddingService {
    /// Load tokenizer + model off the async runtime.
    pub async fn initialize(config: PipelineConfig) -> Result<Self> {
        let pipeline = tokio::task::spawn_blocking(move || Pipeline::load(&config))
            .await
            .map_err(|e| EmbedError::Task(format!("model load task: {e}")))??;
        log::info!("Embedding service ready");
        Ok(Self::from_pipeline(pipeline))
    }

    pub fn from_pipeline(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn dimensions(&self) -> usize {
        self.pipeline.dimensions()
    }

    pub async fn embed_all(&self, documents: Vec<String>) -> Result<Embedded> {
        let pipeline = Arc::clone(&self.pipeline);
        tokio::task::spawn_blocking(move || pipeline.embed_all(&documents))
            .await
            .map_err(|e| EmbedError::Task(format!("embed task: {e}")))?
    }

    pub async fn embed_one(&self, text: String) -> Result<Embedding> {
        let pipeline = Arc::clone(&self.pipeline);
        tokio::task::spawn_blocking(move || pipeline.embed_one(&text))
            .await
            .map_err(|e| EmbedError::Task(format!("embed task: {e}")))?
    }

    /// Stream batches as they finish. The channel holds at most one finished
    /// batch, so the worker only runs ahead of the consumer by one inference.
    /// Dropping the receiver abandons the remaining batches. The returned
    /// handle resolves to the metrics of the batches that were delivered.
    pub fn embed_batches(
        &self,
        documents: Vec<String>,
        batch_size: Option<usize>,
    ) -> (BatchReceiver, tokio::task::JoinHandle<Metrics>) {
        let (tx, rx) = mpsc::channel(config::embedding::STREAM_CHANNEL_CAPACITY);
        let pipeline = Arc::clone(&self.pipeline);
        let handle = tokio::task::spawn_blocking(move || {
            let batch_size = batch_size.unwrap_or_else(|| pipeline.batch_size());
            let mut stream = pipeline.embed_with(&documents, batch_size);
            for item in stream.by_ref() {
                if tx.blocking_send(item).is_err() {
                    log::debug!("Batch receiver dropped; abandoning remaining batches");
                    break;
                }
            }
            stream.metrics()
        });
        (rx, handle)
    }
}
