// onnx.rs - ONNX Runtime engine (feature `onnx`).
//
// The graph has three named i64 inputs of shape [batch, seq_len] (input_ids,
// attention_mask, token_type_ids) and one f32 output last_hidden_state of shape
// [batch, seq_len, hidden].

use std::path::Path;

use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;

use crate::config;
use crate::embeddings::batch::Batch;
use crate::embeddings::engine::{HiddenState, InferenceEngine, ModelOutput};
use crate::error::{EmbedError, EngineError, Result};

pub const INPUT_IDS: &str = "input_ids";
pub const ATTENTION_MASK: &str = "attention_mask";
pub const TOKEN_TYPE_IDS: &str = "token_type_ids";
pub const LAST_HIDDEN_STATE: &str = "last_hidden_state";

pub struct OnnxEngine {
    session: Mutex<Session>,
    hidden_size: usize,
}

impl OnnxEngine {
    /// `hidden_size` comes from the model profile/config; ONNX graphs often leave
    /// output dims symbolic, so it is checked on every run. Missing inputs or
    /// outputs surface from the first run.
    pub fn load(model_path: &Path, hidden_size: usize) -> Result<Self> {
        log::info!("Loading ONNX model from {}", model_path.display());

        let session = Session::builder()
            .map_err(|e| EmbedError::Initialization(format!("session builder: {e}")))?
            .with_intra_threads(config::embedding::ONNX_INTRA_THREADS)
            .map_err(|e| EmbedError::Initialization(format!("thread config: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| {
                EmbedError::Initialization(format!("model load {}: {e}", model_path.display()))
            })?;

        log::info!("ONNX model ready (dims={hidden_size})");
        Ok(Self {
            session: Mutex::new(session),
            hidden_size,
        })
    }
}

fn input_tensor(values: &[i64], batch: &Batch) -> std::result::Result<Tensor<i64>, EngineError> {
    let shape = vec![batch.size as i64, batch.seq_len as i64];
    Tensor::from_array((shape, values.to_vec())).map_err(|e| EngineError::Shape(e.to_string()))
}

impl InferenceEngine for OnnxEngine {
    fn name(&self) -> &str {
        "onnx"
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn run(&self, batch: &Batch) -> std::result::Result<ModelOutput, EngineError> {
        batch
            .validate()
            .map_err(|e| EngineError::Shape(e.to_string()))?;

        let input_ids = input_tensor(&batch.input_ids, batch)?;
        let attention_mask = input_tensor(&batch.attention_mask, batch)?;
        let token_type_ids = input_tensor(&batch.token_type_ids, batch)?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![
                INPUT_IDS => input_ids,
                ATTENTION_MASK => attention_mask,
                TOKEN_TYPE_IDS => token_type_ids
            ])
            .map_err(|e| EngineError::Runtime(format!("inference: {e}")))?;

        let (shape, data) = outputs[LAST_HIDDEN_STATE]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::Runtime(format!("extract {LAST_HIDDEN_STATE}: {e}")))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        let [b, s, h] = <[usize; 3]>::try_from(dims.as_slice()).map_err(|_| {
            EngineError::Shape(format!("{LAST_HIDDEN_STATE} has shape {dims:?}, expected rank 3"))
        })?;
        if h != self.hidden_size {
            return Err(EngineError::Shape(format!(
                "hidden size {h}, expected {}",
                self.hidden_size
            )));
        }

        let last_hidden_state = HiddenState::new(data.to_vec(), [b, s, h])
            .map_err(|e| EngineError::Shape(e.to_string()))?;
        Ok(ModelOutput { last_hidden_state })
    }
}
