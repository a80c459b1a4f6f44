//! Turns a training run into a scalar objective and searches over it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use anyhow::Context;
use burn::tensor::backend::AutodiffBackend;
use rand::{rngs::StdRng, SeedableRng};
use tracing::{info, warn};

use crate::search::space::{Hyperparameters, SearchSpace};
use crate::training::{checkpoint::unique_checkpoint_name, session, Datasets, TrainingConfig};

/// Total attempts per evaluation before giving up
pub const MAX_ATTEMPTS: usize = 5;

/// Cost reported when every attempt failed
pub const FAILURE_COST: f64 = 0.99;

/// Anything that maps a hyperparameter vector to a cost to minimize
pub trait Objective {
    fn evaluate(&mut self, params: &Hyperparameters) -> anyhow::Result<f64>;
}

impl<F> Objective for F
where
    F: FnMut(&Hyperparameters) -> anyhow::Result<f64>,
{
    fn evaluate(&mut self, params: &Hyperparameters) -> anyhow::Result<f64> {
        self(params)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs `objective` up to [`MAX_ATTEMPTS`] times, returning the first
/// successful cost or [`FAILURE_COST`] once all attempts failed. Errors and
/// panics are both counted as failed attempts.
pub fn evaluate_with_retry<O: Objective + ?Sized>(objective: &mut O, params: &Hyperparameters) -> f64 {
    for attempt in 1..=MAX_ATTEMPTS {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| objective.evaluate(params)));
        let failure = match outcome {
            Ok(Ok(cost)) => {
                info!(attempt, cost, %params, "Evaluation succeeded");
                return cost;
            }
            Ok(Err(err)) => format!("{err:#}"),
            Err(payload) => format!("panic: {}", panic_message(payload.as_ref())),
        };
        warn!(attempt, max_attempts = MAX_ATTEMPTS, error = %failure, "Training attempt failed");
    }

    warn!(cost = FAILURE_COST, %params, "All attempts failed, reporting failure cost");
    FAILURE_COST
}

/// One evaluated point of the search
#[derive(Debug, Clone)]
pub struct Trial {
    pub params: Hyperparameters,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best: Trial,
    pub trials: Vec<Trial>,
}

/// Uniform random search over a [`SearchSpace`]
pub struct RandomSearch {
    space: SearchSpace,
    budget: usize,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, budget: usize, seed: u64) -> Self {
        Self {
            space,
            budget,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Evaluates `budget` sampled points and keeps the cheapest. Returns
    /// `None` for a zero budget.
    pub fn optimize<O: Objective + ?Sized>(&mut self, objective: &mut O) -> Option<SearchOutcome> {
        let mut trials: Vec<Trial> = Vec::with_capacity(self.budget);
        let mut best: Option<Trial> = None;

        for index in 0..self.budget {
            let params = self.space.sample(&mut self.rng);
            info!(trial = index + 1, budget = self.budget, %params, "Starting trial");

            let cost = evaluate_with_retry(objective, &params);
            let trial = Trial { params, cost };
            if best.as_ref().map_or(true, |b| trial.cost < b.cost) {
                best = Some(trial.clone());
            }
            trials.push(trial);
        }

        let best = best?;
        info!(cost = best.cost, params = %best.params, "Search finished");
        Some(SearchOutcome { best, trials })
    }
}

/// Full training runs as the search objective. Every evaluation builds a
/// fresh model and optimizer and checkpoints under a new unique name.
pub struct TrainingObjective<B: AutodiffBackend> {
    base: TrainingConfig,
    datasets: Datasets,
    device: B::Device,
    rng: StdRng,
}

impl<B: AutodiffBackend> TrainingObjective<B> {
    pub fn new(base: TrainingConfig, datasets: Datasets, device: B::Device) -> Self {
        let rng = StdRng::seed_from_u64(base.seed);
        Self {
            base,
            datasets,
            device,
            rng,
        }
    }

    /// Config for one attempt: searched values over the base settings, a
    /// unique checkpoint file, and periodic saves pushed past the last epoch
    /// so only improving epochs are written.
    pub fn trial_config(&mut self, params: &Hyperparameters) -> TrainingConfig {
        let mut config = params.apply(&self.base);
        config.checkpoint_name = Some(unique_checkpoint_name(&config.checkpoint_dir, &mut self.rng));
        config.checkpoint_epoch = None;
        config.save_every = config.num_epochs + 10;
        config
    }
}

impl<B: AutodiffBackend> Objective for TrainingObjective<B> {
    fn evaluate(&mut self, params: &Hyperparameters) -> anyhow::Result<f64> {
        let config = self.trial_config(params);
        let outcome = session::run::<B>(&config, &self.datasets, &self.device)
            .with_context(|| format!("training failed for {params}"))?;
        Ok(outcome.best_error_rate)
    }
}
