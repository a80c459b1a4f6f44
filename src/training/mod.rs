pub mod checkpoint;
pub mod config;
pub mod eer;
pub mod harvester;
pub mod loss;
pub mod metrics;
pub mod scheduler;
pub mod session;
pub mod trainer;

pub use checkpoint::{Checkpoint, CheckpointNaming, CheckpointStore};
pub use config::TrainingConfig;
pub use eer::{compute_eer, cosine_similarity, PairScores};
pub use harvester::{AllTripletSelector, Triplet, TripletSelector};
pub use loss::{Loss, TrainMode};
pub use metrics::{EpochSummary, MetricsAccumulator, RunHistory};
pub use scheduler::{PlateauConfig, PlateauScheduler, PlateauState};
pub use session::{fit, run, Datasets, TrainOutcome};
pub use trainer::{Phase, TrainLoop};
