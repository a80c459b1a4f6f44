//! Image classifier training with a vanilla or hyper loss, triplet-based
//! EER validation, resumable checkpoints and random hyperparameter search.

pub mod data;
pub mod error;
pub mod model;
pub mod search;
pub mod training;
