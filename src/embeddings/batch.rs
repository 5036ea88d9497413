// batch.rs - Batch packer: chunk documents, tokenize, right-pad to the chunk max.
//
// Every batch carries three row-major i64 matrices of identical shape
// [size, seq_len]: input ids, attention mask, token types (always zero; single
// segment). Padding is id 0 / mask 0 / type 0.

use rayon::prelude::*;

use crate::embeddings::tokenizer::{TextTokenizer, TokenSequence};
use crate::error::{EmbedError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 0-based batch number within one packing run.
    pub index: usize,
    /// Input position of this batch's first document.
    pub offset: usize,
    pub size: usize,
    pub seq_len: usize,
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
    /// Unpadded token count per row.
    pub lengths: Vec<usize>,
}

/// Borrowed view of one padded row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Row<'a> {
    pub input_ids: &'a [i64],
    pub attention_mask: &'a [i64],
    pub token_type_ids: &'a [i64],
}

impl Batch {
    /// Pad `sequences` into one batch. `seq_len` is the longest sequence.
    pub fn from_sequences(index: usize, offset: usize, sequences: &[TokenSequence]) -> Self {
        let size = sequences.len();
        let seq_len = sequences.iter().map(TokenSequence::len).max().unwrap_or(0);

        let mut input_ids = vec![0i64; size * seq_len];
        let mut attention_mask = vec![0i64; size * seq_len];
        let mut lengths = Vec::with_capacity(size);

        for (row, seq) in sequences.iter().enumerate() {
            let start = row * seq_len;
            for (j, (&id, &m)) in seq.ids.iter().zip(&seq.attention_mask).enumerate() {
                input_ids[start + j] = i64::from(id);
                attention_mask[start + j] = i64::from(m);
            }
            lengths.push(seq.len());
        }

        Self {
            index,
            offset,
            size,
            seq_len,
            input_ids,
            attention_mask,
            token_type_ids: vec![0i64; size * seq_len],
            lengths,
        }
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.size, self.seq_len]
    }

    pub fn row(&self, i: usize) -> Option<Row<'_>> {
        if i >= self.size {
            return None;
        }
        let range = i * self.seq_len..(i + 1) * self.seq_len;
        Some(Row {
            input_ids: &self.input_ids[range.clone()],
            attention_mask: &self.attention_mask[range.clone()],
            token_type_ids: &self.token_type_ids[range],
        })
    }

    /// Real (unpadded) tokens across the batch.
    pub fn real_tokens(&self) -> usize {
        self.lengths.iter().sum()
    }

    /// Padding positions across the batch.
    pub fn padded_positions(&self) -> usize {
        self.size * self.seq_len - self.real_tokens()
    }

    /// Check the three matrices agree with the declared shape.
    pub fn validate(&self) -> Result<()> {
        let expected = self.size * self.seq_len;
        let lens = [
            ("input_ids", self.input_ids.len()),
            ("attention_mask", self.attention_mask.len()),
            ("token_type_ids", self.token_type_ids.len()),
        ];
        for (name, len) in lens {
            if len != expected {
                return Err(EmbedError::ShapeMismatch(format!(
                    "{name} has {len} elements, expected {} x {} = {expected}",
                    self.size, self.seq_len
                )));
            }
        }
        if self.lengths.len() != self.size {
            return Err(EmbedError::ShapeMismatch(format!(
                "{} row lengths for {} rows",
                self.lengths.len(),
                self.size
            )));
        }
        Ok(())
    }
}

/// Lazy producer of batches. Finite, not restartable: each packer tokenizes
/// from scratch and yields `ceil(len / batch_size)` batches in input order.
/// After an error it yields nothing more.
pub struct BatchPacker<'a, S> {
    tokenizer: &'a dyn TextTokenizer,
    texts: &'a [S],
    batch_size: usize,
    next_offset: usize,
    next_index: usize,
    failed: bool,
}

impl<'a, S> BatchPacker<'a, S>
where
    S: AsRef<str> + Sync,
{
    pub fn new(tokenizer: &'a dyn TextTokenizer, texts: &'a [S], batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(EmbedError::Config("batch size must be positive".into()));
        }
        Ok(Self {
            tokenizer,
            texts,
            batch_size,
            next_offset: 0,
            next_index: 0,
            failed: false,
        })
    }

    pub fn batch_count(&self) -> usize {
        self.texts.len().div_ceil(self.batch_size)
    }

    fn remaining(&self) -> usize {
        if self.failed {
            return 0;
        }
        self.batch_count() - self.next_index
    }

    fn pack_next(&mut self) -> Result<Batch> {
        let offset = self.next_offset;
        let end = (offset + self.batch_size).min(self.texts.len());
        let index = self.next_index;
        let chunk = &self.texts[offset..end];
        let tokenizer = self.tokenizer;

        // Parallel encode; collect keeps input order. The lowest failing document
        // is reported so the error does not depend on scheduling.
        let encoded: Vec<Result<TokenSequence>> = chunk
            .par_iter()
            .enumerate()
            .map(|(i, text)| {
                tokenizer
                    .tokenize(text.as_ref())
                    .map_err(|source| EmbedError::Tokenization {
                        document: offset + i,
                        batch: index,
                        source,
                    })
            })
            .collect();
        let sequences = encoded.into_iter().collect::<Result<Vec<_>>>()?;

        self.next_offset = end;
        self.next_index += 1;

        let batch = Batch::from_sequences(index, offset, &sequences);
        log::debug!(
            "Packed batch {} ({} docs, seq_len {}, {} padded positions)",
            batch.index,
            batch.size,
            batch.seq_len,
            batch.padded_positions()
        );
        Ok(batch)
    }
}

impl<S> Iterator for BatchPacker<'_, S>
where
    S: AsRef<str> + Sync,
{
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next_offset >= self.texts.len() {
            return None;
        }
        let result = self.pack_next();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (0, Some(remaining))
    }
}

impl<S> std::iter::FusedIterator for BatchPacker<'_, S> where S: AsRef<str> + Sync {}
