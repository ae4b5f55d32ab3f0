//! Distance metrics for dense vectors.
//!
//! A single, shared definition of the metrics an index can be built with.
//! The metric is declared once in the manifest and drives every distance
//! computation at build and search time; mixing metrics across an index's
//! lifetime is a compatibility error, not a per-call choice.

use crate::simd;
use serde::{Deserialize, Serialize};

/// Distance metric for dense vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Euclidean (L2) distance.
    L2,
    /// Cosine distance $1 - \cos(a,b)$. Computes norms, so inputs need not
    /// be pre-normalized.
    Cosine,
    /// Inner product distance $-\langle a,b\rangle$ (maximum inner product
    /// search).
    Dot,
}

impl DistanceMetric {
    /// Compute distance between two vectors (lower is closer).
    ///
    /// If dimensions mismatch, returns `f32::INFINITY` so the pair is never
    /// selected as a nearest neighbor.
    #[inline]
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return f32::INFINITY;
        }
        match self {
            DistanceMetric::L2 => simd::l2_distance(a, b),
            DistanceMetric::Cosine => 1.0 - simd::cosine(a, b).clamp(-1.0, 1.0),
            DistanceMetric::Dot => -simd::dot(a, b),
        }
    }

    /// Convert a distance back into a similarity score (higher is better).
    ///
    /// Cosine maps to similarity in `[-1, 1]`; L2 and Dot negate, which
    /// preserves ranking without pretending to a bounded range.
    #[inline]
    #[must_use]
    pub fn similarity(self, distance: f32) -> f32 {
        match self {
            DistanceMetric::L2 => -distance,
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::Dot => -distance,
        }
    }

    /// Stable name used in manifests and error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dot",
        }
    }
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Cosine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_distance_is_zero_for_identical() {
        let a = [1.0_f32, 2.0, 3.0];
        let d = DistanceMetric::Cosine.distance(&a, &a);
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn dimension_mismatch_is_infinite() {
        let a = [1.0_f32, 2.0];
        let b = [1.0_f32, 2.0, 3.0];
        assert_eq!(DistanceMetric::L2.distance(&a, &b), f32::INFINITY);
    }

    #[test]
    fn similarity_inverts_ranking() {
        let q = [1.0_f32, 0.0];
        let near = [0.9_f32, 0.1];
        let far = [0.0_f32, 1.0];
        for metric in [DistanceMetric::L2, DistanceMetric::Cosine, DistanceMetric::Dot] {
            let d_near = metric.distance(&q, &near);
            let d_far = metric.distance(&q, &far);
            assert!(metric.similarity(d_near) > metric.similarity(d_far));
        }
    }

    #[test]
    fn metric_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&DistanceMetric::Cosine).unwrap();
        assert_eq!(json, "\"cosine\"");
        let parsed: DistanceMetric = serde_json::from_str("\"l2\"").unwrap();
        assert_eq!(parsed, DistanceMetric::L2);
    }
}
