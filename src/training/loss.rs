//! Training objectives.

use burn::tensor::{
    activation::log_softmax, backend::Backend, ElementConversion, Int, Tensor,
};
use serde::{Deserialize, Serialize};

use crate::error::TrainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TrainMode {
    Vanilla,
    Hyper,
}

impl TrainMode {
    pub const ALL: [TrainMode; 2] = [TrainMode::Vanilla, TrainMode::Hyper];

    pub fn name(&self) -> &'static str {
        match self {
            TrainMode::Vanilla => "vanilla",
            TrainMode::Hyper => "hyper",
        }
    }
}

impl std::fmt::Display for TrainMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Loss selected once per run
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Loss {
    /// Mean cross-entropy over the batch
    Vanilla,
    /// `-sum(log(eta - l_i))` over per-sample cross-entropies `l_i`, with the
    /// nadir point `eta = slack * max(l_i)` held constant for the gradient
    Hyper { slack: f64 },
}

impl Loss {
    pub fn new(mode: TrainMode, slack: f64) -> Result<Self, TrainError> {
        match mode {
            TrainMode::Vanilla => Ok(Loss::Vanilla),
            TrainMode::Hyper => {
                if !(slack > 1.0) || !slack.is_finite() {
                    return Err(TrainError::invalid_config(format!(
                        "hyper mode needs a finite slack greater than 1, got {slack}"
                    )));
                }
                Ok(Loss::Hyper { slack })
            }
        }
    }

    /// logits: [batch, classes], targets: [batch] -> scalar loss tensor [1]
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> Result<Tensor<B, 1>, TrainError> {
        let per_sample = per_sample_cross_entropy(logits, targets);

        match *self {
            Loss::Vanilla => Ok(per_sample.mean()),
            Loss::Hyper { slack } => {
                let worst: f64 = per_sample.clone().detach().max().into_scalar().elem();
                let eta = slack * worst;
                // eta must exceed every sample loss, else the log argument is <= 0
                if !(eta > worst) {
                    return Err(TrainError::NadirViolation { eta, worst });
                }
                Ok(per_sample.neg().add_scalar(eta).log().sum().neg())
            }
        }
    }
}

/// Cross-entropy of each sample without reduction: [batch, classes] -> [batch]
pub fn per_sample_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    let [batch_size, _] = logits.dims();
    log_softmax(logits, 1)
        .gather(1, targets.reshape([batch_size, 1]))
        .reshape([batch_size])
        .neg()
}
