//! QUBO bridge between the feature-count constraint and bitstring samplers.
//!
//! The encoder expands the squared penalty `(Σx_i − m)²` into a quadratic
//! bias model that pushes a sampler toward masks with about `m` ones. The
//! model is soft: decoded candidates must still be validated.

use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use qa_types::{Configuration, Hyperparameters};

use crate::space::SearchSpace;

/// Symmetric quadratic matrix plus linear bias over `n` binary variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuboMatrix {
    pub q: Vec<Vec<f64>>,
    pub linear: Vec<f64>,
}

impl QuboMatrix {
    pub fn size(&self) -> usize {
        self.linear.len()
    }

    pub fn is_symmetric(&self) -> bool {
        let n = self.size();
        self.q.len() == n
            && self.q.iter().all(|row| row.len() == n)
            && (0..n).all(|i| (0..i).all(|j| self.q[i][j] == self.q[j][i]))
    }

    /// Cost `xᵀQx + linear·x` of a bitstring (shorter inputs are zero-padded).
    pub fn energy(&self, bits: &[u8]) -> f64 {
        let x: Vec<f64> = (0..self.size())
            .map(|i| if bits.get(i) == Some(&1) { 1.0 } else { 0.0 })
            .collect();

        let quadratic: f64 = self
            .q
            .iter()
            .zip(&x)
            .map(|(row, xi)| xi * row.iter().zip(&x).map(|(q, xj)| q * xj).sum::<f64>())
            .sum();
        let linear: f64 = self.linear.iter().zip(&x).map(|(l, xi)| l * xi).sum();
        quadratic + linear
    }
}

/// Builds the cardinality bias model for a search space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuboEncoder {
    pub penalty: f64,
    pub selection_bias: f64,
}

impl Default for QuboEncoder {
    fn default() -> Self {
        Self {
            penalty: 1.0,
            selection_bias: -0.1,
        }
    }
}

impl QuboEncoder {
    pub fn encode(&self, space: &SearchSpace) -> QuboMatrix {
        let n = space.num_features();
        let m = space.max_features() as f64;

        let mut q = vec![vec![0.0; n]; n];
        for (i, row) in q.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = if i == j {
                    self.penalty * (1.0 - 2.0 * m)
                } else {
                    2.0 * self.penalty
                };
            }
        }

        // Symmetrize explicitly: (Q + Qᵀ) / 2.
        let symmetric = (0..n)
            .map(|i| (0..n).map(|j| (q[i][j] + q[j][i]) / 2.0).collect())
            .collect();

        QuboMatrix {
            q: symmetric,
            linear: vec![self.selection_bias; n],
        }
    }
}

/// Turns sampled bitstrings into candidate configurations.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuboDecoder;

impl QuboDecoder {
    /// Decode bitstrings into at most `requested` candidates with distinct
    /// masks. Each bitstring is truncated or zero-padded to the feature count;
    /// the model is drawn uniformly (the bias model says nothing about it) and
    /// hyperparameters are left empty for evaluator defaults.
    pub fn decode<R: Rng>(
        &self,
        bitstrings: &[Vec<u8>],
        space: &SearchSpace,
        requested: usize,
        rng: &mut R,
    ) -> Vec<Configuration> {
        let n = space.num_features();
        let models = space.model_names();

        let mut candidates = Vec::with_capacity(bitstrings.len());
        for bits in bitstrings {
            let Some(model) = models.choose(&mut *rng) else {
                break;
            };
            candidates.push(Configuration {
                model: model.clone(),
                hyperparameters: Hyperparameters::new(),
                feature_mask: (0..n).map(|i| bits.get(i) == Some(&1)).collect(),
            });
        }

        dedup_by_mask(candidates, requested)
    }
}

/// Keep the first candidate per distinct mask, up to `limit` of them.
pub fn dedup_by_mask(candidates: Vec<Configuration>, limit: usize) -> Vec<Configuration> {
    let mut seen: HashSet<Vec<bool>> = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.feature_mask.clone()))
        .take(limit)
        .collect()
}
