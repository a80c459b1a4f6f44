use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TrainError;
use crate::model::Architecture;
use crate::training::loss::TrainMode;

/// All settings of one training run in one place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Network to train
    pub architecture: Architecture,
    /// Objective used for the gradient step
    pub train_mode: TrainMode,
    /// Number of full passes through the training data
    pub num_epochs: usize,
    /// Samples per training batch
    pub batch_size: usize,
    /// Samples per validation batch
    pub valid_batch_size: usize,
    /// Initial learning rate, later driven by the plateau scheduler
    pub learning_rate: f64,
    /// L2 weight decay coefficient
    pub weight_decay: f64,
    pub momentum: f64,
    /// Nadir point multiplier for the hyper loss, must exceed 1
    pub slack: f64,
    /// Epochs without improvement tolerated before halving the learning rate
    pub patience: usize,
    /// Save a checkpoint whenever the epoch index is a multiple of this
    pub save_every: usize,
    /// Whether checkpoints are written at all
    pub checkpointing: bool,
    /// Directory holding checkpoints
    pub checkpoint_dir: PathBuf,
    /// Fixed checkpoint file name; per-epoch names are used when absent
    pub checkpoint_name: Option<String>,
    /// Completed-epoch count of the per-epoch checkpoint to resume from
    pub checkpoint_epoch: Option<usize>,
    /// Directory holding the CIFAR-10 binary batches
    pub data_path: PathBuf,
    /// Data loading worker threads
    pub num_workers: usize,
    /// Shuffling seed for the training loader
    pub seed: u64,
    /// Log progress every N batches
    pub log_every: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            architecture: Architecture::Resnet,
            train_mode: TrainMode::Vanilla,
            num_epochs: 500,
            batch_size: 64,
            valid_batch_size: 256,
            learning_rate: 0.1,
            weight_decay: 5e-4,
            momentum: 0.9,
            slack: 1.1,
            patience: 10,
            save_every: 1,
            checkpointing: true,
            checkpoint_dir: PathBuf::from("checkpoints"),
            checkpoint_name: None,
            checkpoint_epoch: None,
            data_path: PathBuf::from("data"),
            num_workers: 4,
            seed: 42,
            log_every: 50,
        }
    }
}

impl TrainingConfig {
    /// Smaller config for quick testing
    pub fn quick_test() -> Self {
        Self {
            num_epochs: 2,
            batch_size: 16,
            valid_batch_size: 16,
            learning_rate: 1e-2,
            patience: 1,
            num_workers: 1,
            log_every: 5,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), TrainError> {
        if self.train_mode == TrainMode::Hyper && !(self.slack > 1.0) {
            return Err(TrainError::invalid_config(format!(
                "slack must be greater than 1 in hyper mode, got {}",
                self.slack
            )));
        }
        if self.save_every == 0 {
            return Err(TrainError::invalid_config("save_every must be at least 1"));
        }
        if self.batch_size == 0 || self.valid_batch_size == 0 {
            return Err(TrainError::invalid_config("batch sizes must be positive"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(TrainError::invalid_config(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(TrainError::invalid_config(format!(
                "momentum must lie in [0, 1), got {}",
                self.momentum
            )));
        }
        if self.weight_decay < 0.0 {
            return Err(TrainError::invalid_config("weight decay must not be negative"));
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_valid() {
        TrainingConfig::default().validate().unwrap();
        TrainingConfig::quick_test().validate().unwrap();
    }

    #[test]
    fn rejects_bad_settings() {
        let hyper = TrainingConfig {
            train_mode: TrainMode::Hyper,
            slack: 1.0,
            ..TrainingConfig::default()
        };
        assert!(matches!(hyper.validate(), Err(TrainError::InvalidConfig(_))));

        let vanilla = TrainingConfig {
            slack: 1.0,
            ..TrainingConfig::default()
        };
        vanilla.validate().unwrap();

        for config in [
            TrainingConfig { save_every: 0, ..TrainingConfig::default() },
            TrainingConfig { batch_size: 0, ..TrainingConfig::default() },
            TrainingConfig { learning_rate: 0.0, ..TrainingConfig::default() },
            TrainingConfig { momentum: 1.0, ..TrainingConfig::default() },
            TrainingConfig { weight_decay: -1.0, ..TrainingConfig::default() },
        ] {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn json_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        let config = TrainingConfig {
            architecture: Architecture::Densenet,
            train_mode: TrainMode::Hyper,
            checkpoint_name: Some("123.ckpt".into()),
            ..TrainingConfig::quick_test()
        };
        config.save(&path).unwrap();

        assert_eq!(TrainingConfig::load(&path).unwrap(), config);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"train_mode\": \"hyper\""));
    }
}
