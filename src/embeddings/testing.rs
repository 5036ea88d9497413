// testing.rs - Deterministic tokenizer/engine doubles for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embeddings::batch::Batch;
use crate::embeddings::engine::{HiddenState, InferenceEngine, ModelOutput};
use crate::embeddings::tokenizer::{TextTokenizer, TokenSequence};
use crate::error::{EngineError, TokenizeError};

pub const CLS: u32 = 101;
pub const SEP: u32 = 102;

/// Whitespace word tokenizer: `[CLS] w1 .. wn [SEP]`, word ids derived from the bytes.
#[derive(Debug, Default)]
pub struct FakeTokenizer {
    calls: AtomicUsize,
}

impl FakeTokenizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn word_id(word: &str) -> u32 {
    1000 + word
        .bytes()
        .fold(7u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)))
        % 20_000
}

impl TextTokenizer for FakeTokenizer {
    fn tokenize(&self, text: &str) -> Result<TokenSequence, TokenizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.trim().is_empty() {
            return Err(TokenizeError::EmptyInput);
        }
        let mut ids = vec![CLS];
        ids.extend(text.split_whitespace().map(word_id));
        ids.push(SEP);
        let attention_mask = vec![1; ids.len()];
        Ok(TokenSequence { ids, attention_mask })
    }
}

/// Engine whose output for a row depends only on that row's real tokens, like a
/// real encoder with a correct attention mask. Padding positions get junk.
#[derive(Debug)]
pub struct FakeEngine {
    hidden: usize,
    fail_on_batch: Option<usize>,
    runs: AtomicUsize,
}

pub const PADDING_JUNK: f32 = 7.5;

impl FakeEngine {
    pub fn new(hidden: usize) -> Self {
        Self {
            hidden,
            fail_on_batch: None,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(hidden: usize, batch: usize) -> Self {
        Self {
            fail_on_batch: Some(batch),
            ..Self::new(hidden)
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl InferenceEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    fn hidden_size(&self) -> usize {
        self.hidden
    }

    fn run(&self, batch: &Batch) -> Result<ModelOutput, EngineError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_batch == Some(batch.index) {
            return Err(EngineError::Runtime("engine exploded".into()));
        }

        let (b, s, h) = (batch.size, batch.seq_len, self.hidden);
        let mut data = vec![0f32; b * s * h];
        for i in 0..b {
            let row = batch
                .row(i)
                .ok_or_else(|| EngineError::Shape(format!("missing row {i}")))?;
            let real: Vec<(usize, i64)> = row
                .input_ids
                .iter()
                .zip(row.attention_mask)
                .enumerate()
                .filter(|(_, (_, m))| **m == 1)
                .map(|(t, (id, _))| (t, *id))
                .collect();

            let mut context = vec![0f32; h];
            for (d, c) in context.iter_mut().enumerate() {
                for &(t, id) in &real {
                    *c += ((id as f32) * 0.001 * (d as f32 + 1.0) + t as f32).sin();
                }
            }

            for t in 0..s {
                let base = (i * s + t) * h;
                let is_real = row.attention_mask[t] == 1;
                for d in 0..h {
                    data[base + d] = if is_real {
                        context[d] + ((row.input_ids[t] as f32) * 0.01 + d as f32).cos()
                    } else {
                        PADDING_JUNK
                    };
                }
            }
        }

        let state = HiddenState::new(data, [b, s, h])
            .map_err(|e| EngineError::Shape(e.to_string()))?;
        Ok(ModelOutput {
            last_hidden_state: state,
        })
    }
}
