// similarity.rs - Score a query vector against candidates and rank them.
//
// Cosine ranks descending (higher = closer), euclidean/manhattan rank ascending.
// Ties keep input order. NaN scores always rank last.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::embeddings::extract::l2_norm;
use crate::error::{EmbedError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
    Manhattan,
}

impl Metric {
    /// Cosine is a similarity; the others are distances.
    pub fn higher_is_closer(self) -> bool {
        matches!(self, Metric::Cosine)
    }

    pub fn compute(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(a, b),
            Metric::Euclidean => euclidean_distance(a, b),
            Metric::Manhattan => manhattan_distance(a, b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Ranked {
    pub index: usize,
    pub value: f32,
}

/// `dot / (|a| * |b|)` clamped to [-1, 1]; 0 when either vector is all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    // f32 rounding can land just past +-1 for (near) parallel vectors.
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

pub fn manhattan_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

fn check_dimensions<V: AsRef<[f32]>>(query: &[f32], candidates: &[V]) -> Result<()> {
    for (index, c) in candidates.iter().enumerate() {
        let actual = c.as_ref().len();
        if actual != query.len() {
            return Err(EmbedError::DimensionMismatch {
                index,
                expected: query.len(),
                actual,
            });
        }
    }
    Ok(())
}

/// Raw scores in candidate order.
pub fn scores<V: AsRef<[f32]>>(query: &[f32], candidates: &[V], metric: Metric) -> Result<Vec<f32>> {
    check_dimensions(query, candidates)?;
    Ok(candidates
        .iter()
        .map(|c| metric.compute(query, c.as_ref()))
        .collect())
}

/// Candidates ordered closest first.
pub fn rank<V: AsRef<[f32]>>(query: &[f32], candidates: &[V], metric: Metric) -> Result<Vec<Ranked>> {
    let raw = scores(query, candidates, metric)?;
    Ok(rank_scores(&raw, metric))
}

/// Order precomputed scores closest first (stable for ties).
pub fn rank_scores(raw: &[f32], metric: Metric) -> Vec<Ranked> {
    let mut ranked: Vec<Ranked> = raw
        .iter()
        .enumerate()
        .map(|(index, &value)| Ranked { index, value })
        .collect();
    ranked.sort_by(|a, b| closer_first(a.value, b.value, metric));
    ranked
}

fn closer_first(a: f32, b: f32, metric: Metric) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) if metric.higher_is_closer() => b.total_cmp(&a),
        (false, false) => a.total_cmp(&b),
    }
}
