pub mod batcher;
pub mod cifar;
pub mod dataset;

pub use batcher::{ImageBatch, ImageBatcher, Normalization};
pub use cifar::{load_cifar10, Split, NUM_CLASSES};
pub use dataset::{ImageDataset, ImageItem, ImageShape};
