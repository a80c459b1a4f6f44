//! Learning-rate reduction when the validation error stops improving.

use serde::{Deserialize, Serialize};
use tracing::info;

/// How `threshold` is compared against the best value seen so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    /// improvement iff value < best * (1 - threshold)
    Relative,
    /// improvement iff value < best - threshold
    Absolute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauConfig {
    pub factor: f64,
    pub patience: usize,
    pub threshold: f64,
    pub threshold_mode: ThresholdMode,
    pub cooldown: usize,
    pub min_lr: f64,
    /// Reductions smaller than this are skipped
    pub eps: f64,
}

impl PlateauConfig {
    pub fn new(patience: usize) -> Self {
        Self {
            factor: 0.5,
            patience,
            threshold: 1e-4,
            threshold_mode: ThresholdMode::Relative,
            cooldown: 0,
            min_lr: 1e-8,
            eps: 1e-8,
        }
    }
}

/// Mutable scheduler state; persisted inside checkpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauState {
    pub lr: f64,
    /// Lowest metric seen so far, `None` before the first step
    pub best: Option<f64>,
    pub num_bad_epochs: usize,
    pub cooldown_counter: usize,
    pub last_epoch: usize,
}

/// Minimises a metric, multiplying the learning rate by `factor` once the
/// metric has failed to improve for more than `patience` consecutive steps.
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    config: PlateauConfig,
    state: PlateauState,
}

impl PlateauScheduler {
    pub fn new(config: PlateauConfig, initial_lr: f64) -> Self {
        Self {
            config,
            state: PlateauState {
                lr: initial_lr,
                best: None,
                num_bad_epochs: 0,
                cooldown_counter: 0,
                last_epoch: 0,
            },
        }
    }

    pub fn lr(&self) -> f64 {
        self.state.lr
    }

    pub fn state(&self) -> &PlateauState {
        &self.state
    }

    pub fn load_state(&mut self, state: PlateauState) {
        self.state = state;
    }

    fn is_better(&self, value: f64) -> bool {
        let Some(best) = self.state.best else {
            return value < f64::INFINITY;
        };
        match self.config.threshold_mode {
            ThresholdMode::Relative => value < best * (1.0 - self.config.threshold),
            ThresholdMode::Absolute => value < best - self.config.threshold,
        }
    }

    /// Feeds one epoch's metric. Returns the new learning rate when it was
    /// reduced.
    pub fn step(&mut self, metric: f64) -> Option<f64> {
        self.state.last_epoch += 1;

        if self.is_better(metric) {
            self.state.best = Some(metric);
            self.state.num_bad_epochs = 0;
        } else {
            self.state.num_bad_epochs += 1;
        }

        if self.state.cooldown_counter > 0 {
            self.state.cooldown_counter -= 1;
            self.state.num_bad_epochs = 0;
        }

        if self.state.num_bad_epochs <= self.config.patience {
            return None;
        }

        self.state.cooldown_counter = self.config.cooldown;
        self.state.num_bad_epochs = 0;

        let old_lr = self.state.lr;
        let new_lr = (old_lr * self.config.factor).max(self.config.min_lr);
        if old_lr - new_lr <= self.config.eps {
            return None;
        }
        self.state.lr = new_lr;
        info!(epoch = self.state.last_epoch, old_lr, new_lr, "Reducing learning rate");
        Some(new_lr)
    }
}
