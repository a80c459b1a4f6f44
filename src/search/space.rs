use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TrainError;
use crate::model::Architecture;
use crate::training::{TrainMode, TrainingConfig};

/// The searched part of a run's configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub momentum: f64,
    pub slack: f64,
    pub patience: usize,
    pub architecture: Architecture,
    pub train_mode: TrainMode,
}

impl Hyperparameters {
    /// Overlays these values on the fixed settings of `base`
    pub fn apply(&self, base: &TrainingConfig) -> TrainingConfig {
        TrainingConfig {
            architecture: self.architecture,
            train_mode: self.train_mode,
            learning_rate: self.learning_rate,
            weight_decay: self.weight_decay,
            momentum: self.momentum,
            slack: self.slack,
            patience: self.patience,
            ..base.clone()
        }
    }
}

impl fmt::Display for Hyperparameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "model={} train_mode={} lr={:.3e} momentum={:.4} l2={:.3e} slack={:.4} patience={}",
            self.architecture,
            self.train_mode,
            self.learning_rate,
            self.momentum,
            self.weight_decay,
            self.slack,
            self.patience
        )
    }
}

/// Bounded, mixed continuous/discrete parameter space
#[derive(Debug, Clone)]
pub struct SearchSpace {
    /// lr = 10^-u with u drawn uniformly from this range
    pub lr_exponent: (f64, f64),
    /// l2 = 10^-u with u drawn uniformly from this range
    pub l2_exponent: (f64, f64),
    pub momentum: (f64, f64),
    pub slack: (f64, f64),
    /// Drawn as a float and truncated
    pub patience: (f64, f64),
    pub architectures: Vec<Architecture>,
    pub train_modes: Vec<TrainMode>,
}

impl SearchSpace {
    pub fn new(architectures: Vec<Architecture>, train_modes: Vec<TrainMode>) -> Result<Self, TrainError> {
        if architectures.is_empty() || train_modes.is_empty() {
            return Err(TrainError::invalid_config(
                "search space needs at least one architecture and one train mode",
            ));
        }
        Ok(Self {
            lr_exponent: (1.0, 4.0),
            l2_exponent: (1.0, 5.0),
            momentum: (0.01, 0.99),
            slack: (1.01, 3.0),
            patience: (1.0, 100.0),
            architectures,
            train_modes,
        })
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Hyperparameters {
        let uniform = |rng: &mut R, (low, high): (f64, f64)| rng.gen_range(low..high);

        let lr_exponent = uniform(rng, self.lr_exponent);
        let l2_exponent = uniform(rng, self.l2_exponent);
        Hyperparameters {
            learning_rate: 10f64.powf(-lr_exponent),
            weight_decay: 10f64.powf(-l2_exponent),
            momentum: uniform(rng, self.momentum),
            slack: uniform(rng, self.slack),
            patience: uniform(rng, self.patience) as usize,
            architecture: self.architectures[rng.gen_range(0..self.architectures.len())],
            train_mode: self.train_modes[rng.gen_range(0..self.train_modes.len())],
        }
    }
}
