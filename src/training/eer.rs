//! Embedding quality on validation pairs: cosine scores and equal error rate.

use crate::error::MetricError;
use crate::training::harvester::Triplet;

const COSINE_EPS: f64 = 1e-8;

/// Cosine similarity with the norm product clamped away from zero
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt()).max(COSINE_EPS)
}

/// Equal error rate of `scores`, where `genuine[i]` marks a same-class pair.
///
/// Thresholds are swept from the highest score down; tied scores are
/// accepted together as one step. The EER is read off the first ROC segment
/// on which FNR - FPR changes sign, interpolating linearly along it. A point
/// where the two rates are exactly equal is returned as is.
pub fn compute_eer(genuine: &[bool], scores: &[f64]) -> Result<f64, MetricError> {
    if genuine.len() != scores.len() {
        return Err(MetricError::LengthMismatch {
            labels: genuine.len(),
            scores: scores.len(),
        });
    }
    if let Some(idx) = scores.iter().position(|score| !score.is_finite()) {
        return Err(MetricError::NonFiniteScore(idx));
    }

    let n_genuine = genuine.iter().filter(|&&g| g).count();
    let n_impostor = genuine.len() - n_genuine;
    if n_genuine == 0 || n_impostor == 0 {
        return Err(MetricError::EmptyClass {
            genuine: n_genuine,
            impostor: n_impostor,
        });
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    // (fpr, fnr) at each distinct threshold, starting from "accept nothing"
    let mut points = vec![(0.0, 1.0)];
    let (mut accepted_genuine, mut accepted_impostor) = (0usize, 0usize);
    let mut cursor = 0;
    while cursor < order.len() {
        let threshold = scores[order[cursor]];
        while cursor < order.len() && scores[order[cursor]] == threshold {
            if genuine[order[cursor]] {
                accepted_genuine += 1;
            } else {
                accepted_impostor += 1;
            }
            cursor += 1;
        }
        let fpr = accepted_impostor as f64 / n_impostor as f64;
        let fnr = (n_genuine - accepted_genuine) as f64 / n_genuine as f64;
        points.push((fpr, fnr));
    }

    let crossing = points.windows(2).find_map(|segment| {
        let (fpr0, fnr0) = segment[0];
        let (fpr1, fnr1) = segment[1];
        let (d0, d1) = (fnr0 - fpr0, fnr1 - fpr1);
        if d1 > 0.0 {
            return None;
        }
        if d1 == 0.0 {
            return Some(fpr1);
        }
        let t = d0 / (d0 - d1);
        Some(fpr0 + t * (fpr1 - fpr0))
    });

    // The last point always has fpr = 1 and fnr = 0, so a crossing exists.
    Ok(crossing.unwrap_or(0.5))
}

/// Similarity scores collected over a validation pass
#[derive(Debug, Clone, Default)]
pub struct PairScores {
    scores: Vec<f64>,
    genuine: Vec<bool>,
}

impl PairScores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, score: f64, genuine: bool) {
        self.scores.push(score);
        self.genuine.push(genuine);
    }

    /// Scores every triplet of a batch: (anchor, positive) as a genuine pair
    /// and (anchor, negative) as an impostor pair. `embeddings` is the
    /// row-major [batch, dim] embedding matrix.
    pub fn extend_from_triplets(&mut self, embeddings: &[f32], dim: usize, triplets: &[Triplet]) {
        let row = |idx: usize| &embeddings[idx * dim..(idx + 1) * dim];

        self.scores.reserve(2 * triplets.len());
        self.genuine.reserve(2 * triplets.len());
        for t in triplets {
            self.push(cosine_similarity(row(t.anchor), row(t.positive)), true);
        }
        for t in triplets {
            self.push(cosine_similarity(row(t.anchor), row(t.negative)), false);
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn eer(&self) -> Result<f64, MetricError> {
        compute_eer(&self.genuine, &self.scores)
    }
}
