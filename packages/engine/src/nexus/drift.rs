// packages/engine/src/nexus/drift.rs
//! Windowed drift detection over agent state vectors
//!
//! Two cheap statistics per window, both O(window · dim) per assessment:
//!
//! - **Dispersion**: population variance per dimension, averaged over
//!   dimensions, square-rooted.
//! - **Entropy proxy**: 16-bin histogram of the first dimension only,
//!   Shannon entropy normalised by `log2(16)` into 0..1. Needs at least 4
//!   samples, otherwise 0.
//!
//! Drift is declared when either statistic exceeds its threshold.

use crate::utils::config::DriftConfig;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const ENTROPY_BINS: usize = 16;
const MIN_ENTROPY_SAMPLES: usize = 4;

/// Upper bound on the up-front window allocation
const MAX_PREALLOCATED_SAMPLES: usize = 1024;

/// One emitted state vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftSample {
    pub tick: u64,
    pub state: Vec<f64>,
}

/// Result of [`DriftMonitor::assess`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftAssessment {
    pub std_dev: f64,
    pub entropy: f64,
    pub drift: bool,
}

/// Rolling window of samples for a single agent
#[derive(Debug, Clone)]
pub struct DriftMonitor {
    history: VecDeque<DriftSample>,
    window: usize,
    std_dev_threshold: f64,
    entropy_threshold: f64,
}

impl DriftMonitor {
    pub fn new() -> Self {
        Self::with_config(&DriftConfig::default())
    }

    pub fn with_config(config: &DriftConfig) -> Self {
        let window = config.window.max(1);
        Self {
            history: VecDeque::with_capacity(window.saturating_add(1).min(MAX_PREALLOCATED_SAMPLES)),
            window,
            std_dev_threshold: config.std_dev_threshold,
            entropy_threshold: config.entropy_threshold,
        }
    }

    /// Append a sample, evicting the oldest once the window is full.
    ///
    /// Rejects empty vectors, non-finite components and vectors whose
    /// dimensionality differs from the samples already in the window.
    pub fn push(&mut self, sample: DriftSample) -> Result<()> {
        if sample.state.is_empty() {
            return Err(EngineError::MalformedState("empty state vector".into()));
        }
        if let Some(pos) = sample.state.iter().position(|v| !v.is_finite()) {
            return Err(EngineError::MalformedState(format!(
                "non-finite value {} at index {}",
                sample.state[pos], pos
            )));
        }
        if let Some(dim) = self.dimension() {
            if sample.state.len() != dim {
                return Err(EngineError::MalformedState(format!(
                    "expected {} dimensions, got {}",
                    dim,
                    sample.state.len()
                )));
            }
        }

        self.history.push_back(sample);
        while self.history.len() > self.window {
            self.history.pop_front();
        }
        Ok(())
    }

    pub fn assess(&self) -> DriftAssessment {
        let std_dev = self.std_dev();
        let entropy = self.entropy_proxy();
        DriftAssessment {
            std_dev,
            entropy,
            drift: std_dev > self.std_dev_threshold || entropy > self.entropy_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Dimensionality of the current window
    pub fn dimension(&self) -> Option<usize> {
        self.history.front().map(|s| s.state.len())
    }

    pub fn latest(&self) -> Option<&DriftSample> {
        self.history.back()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    fn std_dev(&self) -> f64 {
        let Some(dim) = self.dimension() else {
            return 0.0;
        };
        let n = self.history.len() as f64;

        let var_sum: f64 = (0..dim)
            .map(|d| {
                let mean = self.history.iter().map(|s| s.state[d]).sum::<f64>() / n;
                self.history
                    .iter()
                    .map(|s| (s.state[d] - mean).powi(2))
                    .sum::<f64>()
                    / n
            })
            .sum();

        (var_sum / dim as f64).sqrt()
    }

    fn entropy_proxy(&self) -> f64 {
        if self.history.len() < MIN_ENTROPY_SAMPLES {
            return 0.0;
        }

        let values: Vec<f64> = self.history.iter().map(|s| s.state[0]).collect();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = if max - min == 0.0 { 1.0 } else { max - min };
        let step = span / ENTROPY_BINS as f64;

        let mut hist = [0usize; ENTROPY_BINS];
        for v in &values {
            let bin = (((v - min) / step).floor() as usize).min(ENTROPY_BINS - 1);
            hist[bin] += 1;
        }

        let total = values.len() as f64;
        let h: f64 = hist
            .iter()
            .filter(|&&count| count > 0)
            .map(|&count| {
                let p = count as f64 / total;
                -p * p.log2()
            })
            .sum();

        h / (ENTROPY_BINS as f64).log2()
    }
}

impl Default for DriftMonitor {
    fn default() -> Self {
        Self::new()
    }
}
