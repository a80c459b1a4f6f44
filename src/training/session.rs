//! Builds loaders, model and optimizer for one run and drives the loop.

use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    optim::{decay::WeightDecayConfig, momentum::MomentumConfig, SgdConfig},
    tensor::backend::AutodiffBackend,
};
use tracing::info;

use crate::{
    data::{load_cifar10, ImageBatcher, ImageDataset, Normalization, Split, NUM_CLASSES},
    error::{DataError, TrainError},
    model::{Architecture, DenseNetConfig, ImageClassifier, ResNetConfig, VggConfig},
    training::{
        config::TrainingConfig,
        metrics::RunHistory,
        trainer::{TrainLoader, TrainLoop, ValidLoader},
    },
};

/// Train and validation splits plus what is needed to batch them
#[derive(Debug, Clone)]
pub struct Datasets {
    pub train: ImageDataset,
    pub valid: ImageDataset,
    pub normalization: Normalization,
    pub num_classes: usize,
}

impl Datasets {
    /// CIFAR-10: the five training batches for training, the test batch for
    /// validation
    pub fn cifar10(config: &TrainingConfig) -> Result<Self, DataError> {
        Ok(Self {
            train: load_cifar10(&config.data_path, Split::Train)?,
            valid: load_cifar10(&config.data_path, Split::Test)?,
            normalization: Normalization::cifar(),
            num_classes: NUM_CLASSES,
        })
    }
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub best_error_rate: f64,
    pub history: RunHistory,
}

/// SGD with the configured weight decay and undampened momentum
pub fn sgd_config(config: &TrainingConfig) -> SgdConfig {
    let mut sgd = SgdConfig::new();
    if config.weight_decay > 0.0 {
        sgd = sgd.with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay as f32)));
    }
    if config.momentum > 0.0 {
        sgd = sgd.with_momentum(Some(
            MomentumConfig::new().with_momentum(config.momentum).with_dampening(0.0),
        ));
    }
    sgd
}

/// Shuffled training loader and sequential validation loader
pub fn build_loaders<B: AutodiffBackend>(
    datasets: &Datasets,
    config: &TrainingConfig,
) -> (TrainLoader<B>, ValidLoader<B>) {
    let batcher = ImageBatcher::new(datasets.train.shape, datasets.normalization.clone());

    let mut train = DataLoaderBuilder::new(batcher.clone())
        .batch_size(config.batch_size)
        .shuffle(config.seed);
    if config.num_workers > 0 {
        train = train.num_workers(config.num_workers);
    }

    let mut valid = DataLoaderBuilder::new(batcher).batch_size(config.valid_batch_size);
    if config.num_workers > 0 {
        valid = valid.num_workers(config.num_workers);
    }

    (
        train.build(datasets.train.clone()),
        valid.build(datasets.valid.clone()),
    )
}

/// Trains `model` under `config`, resuming from `config.checkpoint_epoch`
/// when set.
pub fn fit<B, M>(
    model: M,
    config: &TrainingConfig,
    datasets: &Datasets,
    device: &B::Device,
) -> Result<TrainOutcome, TrainError>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
{
    if datasets.train.is_empty() {
        return Err(TrainError::EmptyLoader("training"));
    }
    let label_classes = datasets.train.num_classes().max(datasets.valid.num_classes());
    if label_classes > datasets.num_classes {
        return Err(TrainError::invalid_config(format!(
            "labels reach class {} but the classifier head has {} outputs",
            label_classes - 1,
            datasets.num_classes
        )));
    }

    let optimizer = sgd_config(config).init::<B, M>();
    let (train_loader, valid_loader) = build_loaders::<B>(datasets, config);

    let mut trainer = TrainLoop::new(model, optimizer, train_loader, valid_loader, config, device.clone())?;
    if let Some(epoch) = config.checkpoint_epoch {
        trainer = trainer.resume_epoch(epoch)?;
    }

    let best_error_rate = trainer.train(config.num_epochs, config.save_every)?;
    Ok(TrainOutcome {
        best_error_rate,
        history: trainer.history().clone(),
    })
}

/// Builds the configured architecture from scratch and trains it
pub fn run<B: AutodiffBackend>(
    config: &TrainingConfig,
    datasets: &Datasets,
    device: &B::Device,
) -> Result<TrainOutcome, TrainError> {
    config.validate()?;
    info!(
        architecture = %config.architecture,
        train_mode = %config.train_mode,
        epochs = config.num_epochs,
        batch_size = config.batch_size,
        lr = config.learning_rate,
        momentum = config.momentum,
        l2 = config.weight_decay,
        slack = config.slack,
        patience = config.patience,
        train_items = datasets.train.len(),
        valid_items = datasets.valid.len(),
        "=== Starting Training ==="
    );

    let classes = datasets.num_classes;
    match config.architecture {
        Architecture::Vgg => fit(VggConfig::vgg16(classes).init::<B>(device), config, datasets, device),
        Architecture::Resnet => fit(ResNetConfig::resnet18(classes).init::<B>(device), config, datasets, device),
        Architecture::Densenet => fit(DenseNetConfig::cifar(classes).init::<B>(device), config, datasets, device),
    }
}

