// extract.rs - Pool per-token hidden states into one vector per document, then L2-normalize.
//
// Cls: the first token's hidden vector (data[i*s*h .. i*s*h + h]).
// Mean: average over tokens whose attention mask is 1; padding never contributes.

use serde::{Deserialize, Serialize};

use crate::config;
use crate::embeddings::engine::HiddenState;
use crate::error::{EmbedError, Result};

pub type Embedding = Vec<f32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    /// First-token ("CLS") pooling.
    #[default]
    Cls,
    /// Attention-mask-aware mean pooling.
    Mean,
}

impl std::fmt::Display for Pooling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pooling::Cls => f.write_str("cls"),
            Pooling::Mean => f.write_str("mean"),
        }
    }
}

/// One normalized embedding per document, in batch order.
///
/// `attention_mask` is the batch's flat `[batch, seq_len]` mask. The buffer/shape
/// agreement is already guaranteed by [`HiddenState::new`].
pub fn extract(state: &HiddenState, attention_mask: &[i64], pooling: Pooling) -> Result<Vec<Embedding>> {
    let [b, s, _] = state.shape();
    if attention_mask.len() != b * s {
        return Err(EmbedError::ShapeMismatch(format!(
            "attention mask has {} values, expected {b} x {s}",
            attention_mask.len()
        )));
    }
    if s == 0 && b > 0 {
        return Err(EmbedError::ShapeMismatch(
            "zero-length sequences have no token to pool".into(),
        ));
    }

    let embeddings = (0..b)
        .map(|i| {
            let mut v = match pooling {
                Pooling::Cls => state.token(i, 0).to_vec(),
                Pooling::Mean => mean_pool(state, i, &attention_mask[i * s..(i + 1) * s]),
            };
            l2_normalize(&mut v);
            v
        })
        .collect();

    Ok(embeddings)
}

fn mean_pool(state: &HiddenState, i: usize, mask: &[i64]) -> Embedding {
    let mut sum = vec![0f32; state.hidden_size()];
    let mut count = 0f32;
    for (t, &m) in mask.iter().enumerate() {
        if m == 0 {
            continue;
        }
        for (acc, x) in sum.iter_mut().zip(state.token(i, t)) {
            *acc += x;
        }
        count += 1.0;
    }
    let count = count.max(config::embedding::MASK_SUM_EPSILON);
    sum.iter().map(|x| x / count).collect()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// `v / max(||v||, 1e-12)` in place. Zero vectors stay zero.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = l2_norm(v).max(config::embedding::NORM_EPSILON);
    for x in v.iter_mut() {
        *x /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-6;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    #[test]
    fn test_l2_normalize_known_vector() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!(approx_eq(v[0], 0.6));
        assert!(approx_eq(v[1], 0.8));
    }

    #[test]
    fn test_l2_normalize_idempotent() {
        let mut v = vec![0.6, 0.0, 0.8];
        let before = v.clone();
        l2_normalize(&mut v);
        for (a, b) in v.iter().zip(&before) {
            assert!(approx_eq(*a, *b));
        }
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0; 4];
        l2_normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
        assert!(!v.iter().any(|x| x.is_nan()));
    }

    #[test]
    fn test_cls_pooling_takes_first_token() {
        // 2 docs, 2 tokens, hidden 2
        let data = vec![3.0, 4.0, 9.0, 9.0, 0.0, 2.0, 9.0, 9.0];
        let state = HiddenState::new(data, [2, 2, 2]).unwrap();
        let out = extract(&state, &[1, 1, 1, 0], Pooling::Cls).unwrap();
        assert_eq!(out.len(), 2);
        assert!(approx_eq(out[0][0], 0.6) && approx_eq(out[0][1], 0.8));
        assert!(approx_eq(out[1][0], 0.0) && approx_eq(out[1][1], 1.0));
    }

    #[test]
    fn test_mean_pooling_ignores_padding() {
        // doc 0: tokens [1,0] and [3,0] real, [100,100] padding → mean [2,0] → [1,0]
        let data = vec![1.0, 0.0, 3.0, 0.0, 100.0, 100.0];
        let state = HiddenState::new(data, [1, 3, 2]).unwrap();
        let out = extract(&state, &[1, 1, 0], Pooling::Mean).unwrap();
        assert!(approx_eq(out[0][0], 1.0));
        assert!(approx_eq(out[0][1], 0.0));
    }

    #[test]
    fn test_mean_differs_from_cls() {
        let data = vec![1.0, 0.0, 0.0, 1.0];
        let state = HiddenState::new(data, [1, 2, 2]).unwrap();
        let cls = extract(&state, &[1, 1], Pooling::Cls).unwrap();
        let mean = extract(&state, &[1, 1], Pooling::Mean).unwrap();
        assert!(approx_eq(cls[0][0], 1.0));
        assert!(approx_eq(mean[0][0], std::f32::consts::FRAC_1_SQRT_2));
        assert!(approx_eq(mean[0][1], std::f32::consts::FRAC_1_SQRT_2));
    }

    #[test]
    fn test_fully_masked_row_is_zero_not_nan() {
        let state = HiddenState::new(vec![5.0, 5.0], [1, 1, 2]).unwrap();
        let out = extract(&state, &[0], Pooling::Mean).unwrap();
        assert_eq!(out[0], vec![0.0, 0.0]);
    }

    #[test]
    fn test_mask_length_checked() {
        let state = HiddenState::new(vec![0.0; 8], [2, 2, 2]).unwrap();
        assert!(matches!(
            extract(&state, &[1, 1, 1], Pooling::Cls),
            Err(EmbedError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_pooling_serde() {
        assert_eq!(serde_json::to_string(&Pooling::Mean).unwrap(), "\"mean\"");
        let p: Pooling = serde_json::from_str("\"cls\"").unwrap();
        assert_eq!(p, Pooling::Cls);
        assert_eq!(Pooling::default(), Pooling::Cls);
    }
}
