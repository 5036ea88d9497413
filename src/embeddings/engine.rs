// engine.rs - Inference engine adapter and the candle BERT engine.
//
// An engine takes one padded batch (input_ids, attention_mask, token_type_ids; i64,
// [batch, seq_len]) and returns last_hidden_state ([batch, seq_len, hidden], f32).
// One evaluation per batch; the session lock keeps one evaluation in flight.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use parking_lot::Mutex;

use crate::embeddings::batch::Batch;
use crate::error::{EmbedError, EngineError, Result};

/// Flat last-hidden-state buffer with its `[batch, seq_len, hidden]` shape.
/// The buffer length always equals the product of the shape.
#[derive(Debug, Clone, PartialEq)]
pub struct HiddenState {
    data: Vec<f32>,
    shape: [usize; 3],
}

impl HiddenState {
    pub fn new(data: Vec<f32>, shape: [usize; 3]) -> Result<Self> {
        let expected = shape.iter().product::<usize>();
        if data.len() != expected {
            return Err(EmbedError::ShapeMismatch(format!(
                "buffer has {} values, shape {:?} needs {expected}",
                data.len(),
                shape
            )));
        }
        Ok(Self { data, shape })
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn batch_size(&self) -> usize {
        self.shape[0]
    }

    pub fn seq_len(&self) -> usize {
        self.shape[1]
    }

    pub fn hidden_size(&self) -> usize {
        self.shape[2]
    }

    /// Hidden vector of token `t` in document `i`.
    pub fn token(&self, i: usize, t: usize) -> &[f32] {
        let [_, s, h] = self.shape;
        let start = (i * s + t) * h;
        &self.data[start..start + h]
    }
}

/// Named outputs of one model evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub last_hidden_state: HiddenState,
}

impl ModelOutput {
    /// The engine must answer with the batch's own `[size, seq_len]` leading dims.
    pub fn check_against(&self, batch: &Batch) -> Result<()> {
        let [b, s, _] = self.last_hidden_state.shape();
        if b != batch.size || s != batch.seq_len {
            return Err(EmbedError::ShapeMismatch(format!(
                "engine returned [{b}, {s}, _] for batch {} of shape [{}, {}]",
                batch.index, batch.size, batch.seq_len
            )));
        }
        Ok(())
    }
}

pub trait InferenceEngine: Send + Sync {
    fn name(&self) -> &str;

    fn hidden_size(&self) -> usize;

    fn run(&self, batch: &Batch) -> std::result::Result<ModelOutput, EngineError>;
}

/// candle BERT encoder on CPU, loaded from model.safetensors + config.json.
pub struct CandleBertEngine {
    model: Mutex<BertModel>,
    device: Device,
    hidden_size: usize,
}

impl CandleBertEngine {
    pub fn load(weights_path: &Path, config_path: &Path) -> Result<Self> {
        let device = Device::Cpu;

        let config_str = std::fs::read_to_string(config_path).map_err(|e| {
            EmbedError::Initialization(format!("read {}: {e}", config_path.display()))
        })?;
        let config: BertConfig = serde_json::from_str(&config_str).map_err(|e| {
            EmbedError::Initialization(format!("parse {}: {e}", config_path.display()))
        })?;

        log::info!(
            "Loading embedding model: hidden_size={}, layers={}, heads={}",
            config.hidden_size,
            config.num_hidden_layers,
            config.num_attention_heads,
        );

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path.to_path_buf()], DType::F32, &device)
                .map_err(|e| {
                    EmbedError::Initialization(format!(
                        "load weights from {}: {e}",
                        weights_path.display()
                    ))
                })?
        };

        let model = BertModel::load(vb, &config)
            .map_err(|e| EmbedError::Initialization(format!("load BERT model: {e}")))?;

        log::info!("Embedding model loaded successfully (dims={})", config.hidden_size);

        Ok(Self {
            model: Mutex::new(model),
            device,
            hidden_size: config.hidden_size,
        })
    }

    fn input_tensor(&self, values: &[i64], batch: &Batch) -> std::result::Result<Tensor, EngineError> {
        Tensor::from_vec(values.to_vec(), (batch.size, batch.seq_len), &self.device)
            .map_err(|e| EngineError::Shape(e.to_string()))
    }
}

impl InferenceEngine for CandleBertEngine {
    fn name(&self) -> &str {
        "candle-bert"
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn run(&self, batch: &Batch) -> std::result::Result<ModelOutput, EngineError> {
        batch
            .validate()
            .map_err(|e| EngineError::Shape(e.to_string()))?;

        let input_ids = self.input_tensor(&batch.input_ids, batch)?;
        let attention_mask = self.input_tensor(&batch.attention_mask, batch)?;
        let token_type_ids = self.input_tensor(&batch.token_type_ids, batch)?;

        let model = self.model.lock();

        // Forward pass → [batch, seq_len, hidden_size]
        let output = model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(|e| EngineError::Runtime(format!("forward: {e}")))?;

        let (b, s, h) = output
            .dims3()
            .map_err(|e| EngineError::Runtime(format!("output rank: {e}")))?;
        let data: Vec<f32> = output
            .flatten_all()
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| EngineError::Runtime(format!("read output: {e}")))?;

        let last_hidden_state =
            HiddenState::new(data, [b, s, h]).map_err(|e| EngineError::Shape(e.to_string()))?;
        Ok(ModelOutput { last_hidden_state })
    }
}
