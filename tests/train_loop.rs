use burn::{
    backend::{Autodiff, NdArray},
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    nn::{Linear, LinearConfig},
    optim::Optimizer,
    tensor::{backend::Backend, ElementConversion, Tensor},
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use hyperclf::data::{ImageBatch, ImageBatcher, ImageDataset, ImageItem, ImageShape, Normalization};
use hyperclf::error::{MetricError, TrainError};
use hyperclf::model::ImageClassifier;
use hyperclf::training::{
    compute_eer, cosine_similarity, session, AllTripletSelector, Datasets, Phase, TrainLoop, TrainMode,
    TrainingConfig, TripletSelector,
};

type TestBackend = Autodiff<NdArray<f32>>;
type InnerBackend = NdArray<f32>;

const SHAPE: ImageShape = ImageShape {
    channels: 1,
    height: 2,
    width: 2,
};

#[derive(burn::module::Module, Debug)]
struct TinyNet<B: Backend> {
    embed: Linear<B>,
    head: Linear<B>,
}

impl<B: Backend> TinyNet<B> {
    fn new(num_classes: usize, device: &B::Device) -> Self {
        Self {
            embed: LinearConfig::new(SHAPE.num_pixels(), 4).init(device),
            head: LinearConfig::new(4, num_classes).init(device),
        }
    }
}

impl<B: Backend> ImageClassifier<B> for TinyNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.embed.forward(images.flatten::<2>(1, 3))
    }

    fn out_proj(&self, embeddings: Tensor<B, 2>) -> Tensor<B, 2> {
        self.head.forward(embeddings)
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-12
}

fn item(label: usize, offset: u8) -> ImageItem {
    let base = (label as u8) * 80 + offset;
    ImageItem {
        pixels: vec![base, base + 10, 255 - base, base / 2],
        label,
    }
}

/// Three classes, two samples each
fn six_items() -> Vec<ImageItem> {
    (0..3).flat_map(|label| [item(label, 0), item(label, 7)]).collect()
}

fn datasets(train: Vec<ImageItem>, valid: Vec<ImageItem>) -> Datasets {
    Datasets {
        train: ImageDataset::from_items(train, SHAPE),
        valid: ImageDataset::from_items(valid, SHAPE),
        normalization: Normalization::identity(SHAPE.channels),
        num_classes: 3,
    }
}

fn config(dir: &TempDir) -> TrainingConfig {
    TrainingConfig {
        num_epochs: 1,
        batch_size: 3,
        valid_batch_size: 6,
        learning_rate: 0.05,
        momentum: 0.9,
        weight_decay: 1e-4,
        checkpoint_dir: dir.path().to_path_buf(),
        num_workers: 0,
        log_every: 1,
        ..TrainingConfig::default()
    }
}

fn build_loop(
    config: &TrainingConfig,
    data: &Datasets,
) -> TrainLoop<TestBackend, TinyNet<TestBackend>, impl Optimizer<TinyNet<TestBackend>, TestBackend>> {
    let device = Default::default();
    let model = TinyNet::<TestBackend>::new(data.num_classes, &device);
    let optimizer = session::sgd_config(config).init::<TestBackend, TinyNet<TestBackend>>();
    let (train_loader, valid_loader) = session::build_loaders::<TestBackend>(data, config);
    TrainLoop::new(model, optimizer, train_loader, valid_loader, config, device).unwrap()
}

#[test]
fn one_vanilla_epoch_matches_an_independent_evaluation() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let data = datasets(six_items(), six_items());
    let mut trainer = build_loop(&config, &data);

    assert_eq!(trainer.phase(1), Phase::Fresh);
    let best = trainer.train(1, 1).unwrap();
    assert_eq!(trainer.phase(1), Phase::Done);
    assert_eq!(trainer.cur_epoch(), 1);
    assert_eq!(trainer.total_iters(), 2);

    let history = trainer.history();
    assert!(history.is_consistent(1));
    assert_eq!(history.train_loss_batch.len(), 2);

    // Re-score the validation batch by hand with the trained weights
    let device = Default::default();
    let model = trainer.model().valid();
    let batcher = ImageBatcher::new(SHAPE, Normalization::identity(1));
    let batch: ImageBatch<InnerBackend> = batcher.batch(six_items(), &device);

    let embeddings = model.forward(batch.images);
    let logits = model.out_proj(embeddings.clone());
    let predictions = logits.argmax(1).reshape([6]);
    let correct: i64 = predictions.equal(batch.targets).int().sum().into_scalar().elem();
    let expected_error = 1.0 - correct as f64 / 6.0;

    assert_eq!(history.error_rate[0], expected_error);
    assert_eq!(best, expected_error);

    let flat = embeddings.into_data().convert::<f32>().to_vec::<f32>().unwrap();
    let row = |i: usize| &flat[i * 4..(i + 1) * 4];
    let triplets = AllTripletSelector::new().triplets(&batch.labels);
    assert_eq!(triplets.len(), 24);

    let mut labels = Vec::new();
    let mut scores = Vec::new();
    for t in &triplets {
        labels.push(true);
        scores.push(cosine_similarity(row(t.anchor), row(t.positive)));
    }
    for t in &triplets {
        labels.push(false);
        scores.push(cosine_similarity(row(t.anchor), row(t.negative)));
    }
    let expected_eer = compute_eer(&labels, &scores).unwrap();
    assert!((history.eer[0] - expected_eer).abs() < 1e-9);

    // First epoch always improves, so a checkpoint exists
    assert!(trainer.store().path_for(1).is_file());
}

#[test]
fn resuming_continues_where_the_checkpoint_left_off() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let data = datasets(six_items(), six_items());

    let mut full = build_loop(&config, &data);
    full.train(2, 1).unwrap();
    assert!(full.store().path_for(1).is_file());
    assert!(full.store().path_for(2).is_file());

    let resumed = build_loop(&config, &data).resume_epoch(1).unwrap();
    assert_eq!(resumed.cur_epoch(), 1);
    assert_eq!(resumed.total_iters(), 2);
    assert_eq!(resumed.phase(2), Phase::Running);
    assert_eq!(resumed.history().train_loss.len(), 1);
    assert!(close(resumed.history().train_loss[0], full.history().train_loss[0]));

    let mut resumed = resumed;
    resumed.train(2, 1).unwrap();
    assert_eq!(resumed.cur_epoch(), 2);
    assert_eq!(resumed.total_iters(), 4);
    assert!(resumed.history().is_consistent(2));
    assert_eq!(resumed.history().train_loss_batch.len(), 4);
    assert!(close(resumed.history().train_loss[0], full.history().train_loss[0]));
    assert!(close(resumed.history().error_rate[0], full.history().error_rate[0]));
}

#[test]
fn resuming_a_finished_run_trains_nothing() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let data = datasets(six_items(), six_items());

    let mut first = build_loop(&config, &data);
    first.train(1, 1).unwrap();

    let mut again = build_loop(&config, &data).resume_epoch(1).unwrap();
    assert_eq!(again.phase(1), Phase::Done);
    again.train(1, 1).unwrap();
    assert_eq!(again.total_iters(), 2);
    assert_eq!(again.history().train_loss.len(), 1);
}

#[test]
fn missing_checkpoint_keeps_fresh_state() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let data = datasets(six_items(), six_items());

    let trainer = build_loop(&config, &data).resume_epoch(5).unwrap();
    assert_eq!(trainer.cur_epoch(), 0);
    assert_eq!(trainer.total_iters(), 0);
    assert_eq!(trainer.history().completed_epochs(), 0);
}

#[test]
fn hyper_mode_trains_with_finite_losses() {
    let dir = TempDir::new().unwrap();
    let config = TrainingConfig {
        train_mode: TrainMode::Hyper,
        slack: 1.5,
        learning_rate: 0.01,
        checkpointing: false,
        ..config(&dir)
    };
    let data = datasets(six_items(), six_items());
    let mut trainer = build_loop(&config, &data);

    trainer.train(1, 1).unwrap();
    assert!(trainer.history().train_loss_batch.iter().all(|loss| loss.is_finite()));
    assert!(!trainer.store().path_for(1).exists());
}

#[test]
fn single_class_validation_has_no_eer() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let valid = vec![item(0, 0), item(0, 3), item(0, 5)];
    let data = datasets(six_items(), valid);
    let mut trainer = build_loop(&config, &data);

    let err = trainer.train(1, 1).unwrap_err();
    assert!(matches!(
        err,
        TrainError::Metric(MetricError::EmptyClass { genuine: 0, impostor: 0 })
    ));
}

#[test]
fn empty_validation_set_is_an_error() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let data = datasets(six_items(), Vec::new());
    let mut trainer = build_loop(&config, &data);

    let err = trainer.train(1, 1).unwrap_err();
    assert!(matches!(err, TrainError::EmptyLoader("validation")));
}

#[test]
fn fit_reports_the_best_error_rate() {
    let dir = TempDir::new().unwrap();
    let config = TrainingConfig {
        num_epochs: 2,
        checkpointing: false,
        ..config(&dir)
    };
    let data = datasets(six_items(), six_items());
    let device = Default::default();

    let outcome = session::fit::<TestBackend, _>(TinyNet::<TestBackend>::new(3, &device), &config, &data, &device).unwrap();
    let min = outcome.history.error_rate.iter().cloned().fold(f64::INFINITY, f64::min);
    assert_eq!(outcome.best_error_rate, min);
    assert_eq!(outcome.history.completed_epochs(), 2);
}

/// Updates of this size vanish against f32 weights, so every epoch
/// validates exactly like the first and nothing improves after it.
fn frozen_config(dir: &TempDir) -> TrainingConfig {
    TrainingConfig {
        learning_rate: 1e-30,
        momentum: 0.0,
        weight_decay: 0.0,
        ..config(dir)
    }
}

fn saved_epochs(
    trainer: &TrainLoop<TestBackend, TinyNet<TestBackend>, impl Optimizer<TinyNet<TestBackend>, TestBackend>>,
    n_epochs: usize,
) -> Vec<usize> {
    (1..=n_epochs).filter(|&epoch| trainer.store().path_for(epoch).is_file()).collect()
}

#[test]
fn untrained_loop_checkpoint_loads_back() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let data = datasets(six_items(), six_items());

    let fresh = build_loop(&config, &data);
    let path = fresh.checkpoint().unwrap();
    assert_eq!(path, fresh.store().path_for(0));

    let mut resumed = build_loop(&config, &data).resume_from(&path).unwrap();
    assert_eq!(resumed.cur_epoch(), 0);
    assert_eq!(resumed.total_iters(), 0);
    assert_eq!(resumed.learning_rate(), config.learning_rate);

    resumed.train(1, 1).unwrap();
    assert_eq!(resumed.cur_epoch(), 1);
}

#[test]
fn stalled_run_only_saves_improving_epochs() {
    let dir = TempDir::new().unwrap();
    let config = frozen_config(&dir);
    let data = datasets(six_items(), six_items());
    let mut trainer = build_loop(&config, &data);

    trainer.train(3, 10).unwrap();

    let history = trainer.history();
    assert_eq!(history.error_rate[1], history.error_rate[0]);
    assert_eq!(history.eer[2], history.eer[0]);
    assert_eq!(saved_epochs(&trainer, 3), vec![1]);
    assert_eq!(trainer.learning_rate(), 1e-30);
}

#[test]
fn periodic_saves_fire_without_improvement() {
    let dir = TempDir::new().unwrap();
    let config = frozen_config(&dir);
    let data = datasets(six_items(), six_items());
    let mut trainer = build_loop(&config, &data);

    trainer.train(4, 2).unwrap();

    // epoch indices 0 and 2 are due; index 0 also improves
    assert_eq!(saved_epochs(&trainer, 4), vec![1, 3]);
}

#[test]
fn fit_rejects_labels_beyond_the_head() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let data = Datasets {
        num_classes: 2,
        ..datasets(six_items(), six_items())
    };
    let device = Default::default();

    let err = session::fit::<TestBackend, _>(TinyNet::<TestBackend>::new(2, &device), &config, &data, &device)
        .unwrap_err();
    assert!(matches!(err, TrainError::InvalidConfig(_)));
}
