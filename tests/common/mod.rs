//! Shared test embedders.
//!
//! Real embedding models are out of scope; these stand-ins are
//! deterministic so tests are reproducible, while still encoding enough
//! structure for semantic assertions to be meaningful.

#![allow(dead_code)]

use nearline::{Embedder, IndexError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Concept axes + hashed fallback: related words land on the same axis, so
/// "feline" is close to "cats" the way a real model would make it.
pub struct ConceptEmbedder;

const CONCEPTS: &[(&[&str], usize)] = &[
    (&["cat", "cats", "feline", "felines", "kitten"], 0),
    (&["dog", "dogs", "canine", "canines", "puppy"], 1),
    (&["mammal", "mammals", "animal", "animals", "pet", "pets"], 2),
    (&["rust", "programming", "language", "code", "software"], 3),
];

impl ConceptEmbedder {
    pub const DIM: usize = 8;

    fn token_axis(token: &str) -> (usize, f32) {
        for (words, axis) in CONCEPTS {
            if words.contains(&token) {
                return (*axis, 1.0);
            }
        }
        // Unknown words spread over the remaining axes with lower weight.
        let mut h = 0xcbf2_9ce4_8422_2325u64;
        for b in token.bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        (4 + (h % 4) as usize, 0.5)
    }
}

impl Embedder for ConceptEmbedder {
    fn model_name(&self) -> &str {
        "concept-test"
    }

    fn dimension(&self) -> usize {
        Self::DIM
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; Self::DIM];
                for token in text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                {
                    let (axis, weight) = Self::token_axis(&token.to_lowercase());
                    v[axis] += weight;
                }
                if v.iter().all(|&x| x == 0.0) {
                    v[Self::DIM - 1] = 1.0;
                }
                let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                v.iter().map(|x| x / norm).collect()
            })
            .collect())
    }
}

/// Deterministic pseudo-random unit vectors keyed by the full text. Good
/// spread for recall/parity tests where semantics do not matter.
pub struct RandEmbedder {
    pub dimension: usize,
}

impl RandEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for RandEmbedder {
    fn model_name(&self) -> &str {
        "rand-test"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut seed = 0x9e37_79b9_7f4a_7c15u64;
                for b in text.bytes() {
                    seed = seed.rotate_left(7) ^ b as u64;
                }
                let mut rng = StdRng::seed_from_u64(seed);
                let v: Vec<f32> = (0..self.dimension)
                    .map(|_| rng.random::<f32>() * 2.0 - 1.0)
                    .collect();
                let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                v.iter().map(|x| x / (norm + 1e-10)).collect()
            })
            .collect())
    }
}

/// Always fails: for exercising the degraded-availability paths.
pub struct FailingEmbedder {
    pub dimension: usize,
}

impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing-test"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Err(IndexError::EmbeddingUnavailable {
            failed: texts.len(),
        })
    }
}
