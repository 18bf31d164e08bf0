//! Weighted sampling over a discrete distribution (Vose's alias method).
//!
//! Construction is O(n); every draw costs one uniform index, one uniform
//! float and one table lookup.

use rand::Rng;
use thiserror::Error;

/// Tolerance for the sum of the input probabilities.
const SUM_TOLERANCE: f64 = 1e-6;

/// Errors raised while building a [`Sampler`].
#[derive(Debug, Error, PartialEq)]
pub enum SamplerError {
    #[error("cannot sample from an empty distribution")]
    Empty,

    #[error("probability at index {index} is not a finite non-negative number: {value}")]
    InvalidProbability { index: usize, value: f64 },

    #[error("probabilities must sum to 1, got {0}")]
    NotNormalized(f64),
}

/// Alias tables for O(1) biased draws.
///
/// The tables are immutable after construction; the random source is
/// supplied per draw, so a shared sampler only needs synchronisation around
/// its generator, never around the tables.
#[derive(Debug, Clone)]
pub struct Sampler {
    probabilities: Vec<f64>,
    alias: Vec<usize>,
}

impl Sampler {
    /// Build the alias tables from probabilities that sum to 1.
    pub fn new(probabilities: &[f64]) -> Result<Self, SamplerError> {
        let n = probabilities.len();
        if n == 0 {
            return Err(SamplerError::Empty);
        }

        let mut sum = 0.0;
        for (index, &value) in probabilities.iter().enumerate() {
            if !value.is_finite() || value < 0.0 {
                return Err(SamplerError::InvalidProbability { index, value });
            }
            sum += value;
        }
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(SamplerError::NotNormalized(sum));
        }

        let mut scaled: Vec<f64> = probabilities.iter().map(|p| p * n as f64).collect();
        let mut small = Vec::with_capacity(n);
        let mut large = Vec::with_capacity(n);
        for (i, &p) in scaled.iter().enumerate() {
            if p < 1.0 {
                small.push(i);
            } else {
                large.push(i);
            }
        }

        let mut prob = vec![1.0; n];
        let mut alias: Vec<usize> = (0..n).collect();

        // Each iteration retires one index from `small`, so the loop is
        // bounded by n regardless of rounding in the inputs.
        while let (Some(l), Some(g)) = (small.pop(), large.pop()) {
            prob[l] = scaled[l];
            alias[l] = g;
            scaled[g] = (scaled[g] + scaled[l]) - 1.0;
            if scaled[g] < 1.0 {
                small.push(g);
            } else {
                large.push(g);
            }
        }

        // Leftovers only differ from 1 by accumulated rounding error.
        for i in small.into_iter().chain(large) {
            prob[i] = 1.0;
            alias[i] = i;
        }

        Ok(Self {
            probabilities: prob,
            alias,
        })
    }

    /// Number of outcomes.
    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    /// Draw an index distributed according to the construction weights.
    pub fn next<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let i = rng.gen_range(0..self.probabilities.len());
        let u: f64 = rng.gen();
        if u < self.probabilities[i] {
            i
        } else {
            self.alias[i]
        }
    }

    /// Probability threshold table.
    pub fn probability_table(&self) -> &[f64] {
        &self.probabilities
    }

    /// Alias index table.
    pub fn alias_table(&self) -> &[usize] {
        &self.alias
    }
}

/// Normalise raw non-negative weights so they sum to 1.
pub fn normalize(weights: &[f64]) -> Result<Vec<f64>, SamplerError> {
    if weights.is_empty() {
        return Err(SamplerError::Empty);
    }
    for (index, &value) in weights.iter().enumerate() {
        if !value.is_finite() || value < 0.0 {
            return Err(SamplerError::InvalidProbability { index, value });
        }
    }
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        return Err(SamplerError::NotNormalized(sum));
    }
    Ok(weights.iter().map(|w| w / sum).collect())
}
