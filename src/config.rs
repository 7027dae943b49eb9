//! Hyperparameters controlling the condition search.
//!
//! Grounded in `spec.md` §6's input contract. Unlike the teacher crate's
//! stringly-typed `Hyperparameters` bag (a `HashMap<String, HyperparamValue>`,
//! appropriate when the set of knobs is open-ended across many ML
//! algorithms), this core has a fixed, small hyperparameter surface, so a
//! plain struct is the more idiomatic fit.

use serde::{Deserialize, Serialize};

/// Hyperparameters shared by every tree fit in an ensemble.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hyperparameters {
    /// Maximum recursion depth of a single tree.
    pub max_depth: u32,
    /// A node with fewer samples than `2 * min_num_samples` stays a leaf.
    pub min_num_samples: usize,
    /// Scales the number of numerical/discrete critical values tried:
    /// `grid_size ≈ grid_factor * sqrt(n)`.
    pub grid_factor: f64,
    /// Fraction of candidate conditions kept after random sampling,
    /// `(0.0, 1.0]`. `1.0` means every eligible column/condition is tried.
    pub share_conditions: f64,
    /// Additive slack subtracted from a candidate's improvement before it
    /// is compared against the committed value.
    pub regularisation: f64,
    /// Whether categorical conditions may combine multiple categories into
    /// a set (`IN (...)`) rather than being limited to single categories.
    pub allow_sets: bool,
    /// Seed for the RNG that drives `share_conditions` sampling. Synchronised
    /// across distributed ranks so every rank enumerates the same columns.
    pub random_seed: u64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            max_depth: 4,
            min_num_samples: 200,
            grid_factor: 1.0,
            share_conditions: 1.0,
            regularisation: 0.0,
            allow_sets: true,
            random_seed: 42,
        }
    }
}

/// The epsilon slack added to `regularisation` on the accept check
/// (`spec.md` §4.6, "Improvement threshold").
pub const ACCEPT_EPSILON: f64 = 1e-7;

impl Hyperparameters {
    pub fn validate(&self) -> crate::error::Result<()> {
        if !(self.share_conditions > 0.0 && self.share_conditions <= 1.0) {
            return Err(crate::error::CoreError::InvalidHyperparameters(format!(
                "share_conditions must be in (0, 1], got {}",
                self.share_conditions
            )));
        }
        if self.grid_factor <= 0.0 {
            return Err(crate::error::CoreError::InvalidHyperparameters(format!(
                "grid_factor must be positive, got {}",
                self.grid_factor
            )));
        }
        if self.min_num_samples == 0 {
            return Err(crate::error::CoreError::InvalidHyperparameters(
                "min_num_samples must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Minimum sample size below which a node never attempts a split
    /// (`spec.md` §4.6, "Sample-size guard").
    pub fn sample_size_guard(&self) -> usize {
        2 * self.min_num_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hyperparameters_validate() {
        assert!(Hyperparameters::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_share_conditions() {
        let hp = Hyperparameters {
            share_conditions: 0.0,
            ..Hyperparameters::default()
        };
        assert!(hp.validate().is_err());
    }

    #[test]
    fn sample_size_guard_is_double_min() {
        let hp = Hyperparameters {
            min_num_samples: 50,
            ..Hyperparameters::default()
        };
        assert_eq!(hp.sample_size_guard(), 100);
    }
}
