pub mod driver;
pub mod space;

pub use driver::{
    evaluate_with_retry, Objective, RandomSearch, SearchOutcome, TrainingObjective, Trial, FAILURE_COST,
    MAX_ATTEMPTS,
};
pub use space::{Hyperparameters, SearchSpace};
