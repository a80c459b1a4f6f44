use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use burn::{
    data::dataloader::DataLoader,
    module::{AutodiffModule, Module},
    optim::{GradientsParams, Optimizer},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder, RecorderError},
    tensor::{
        activation::softmax,
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
};
use tracing::{debug, info, warn};

use crate::{
    data::ImageBatch,
    error::{CheckpointError, TrainError},
    model::ImageClassifier,
    training::{
        checkpoint::{Checkpoint, CheckpointNaming, CheckpointStore, EPOCH_TEMPLATE},
        config::TrainingConfig,
        eer::PairScores,
        harvester::{AllTripletSelector, TripletSelector},
        loss::Loss,
        metrics::{EpochSummary, MetricsAccumulator, RunHistory},
        scheduler::{PlateauConfig, PlateauScheduler},
    },
};

/// Lossless encoding for model and optimizer records
type StateRecorder = BinBytesRecorder<FullPrecisionSettings>;

pub type TrainLoader<B> = Arc<dyn DataLoader<B, ImageBatch<B>>>;
pub type ValidLoader<B> =
    Arc<dyn DataLoader<<B as AutodiffBackend>::InnerBackend, ImageBatch<<B as AutodiffBackend>::InnerBackend>>>;

/// Where a loop stands relative to its epoch budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fresh,
    Running,
    Done,
}

/// Owns the whole mutable training state of one run: model, optimizer,
/// scheduler, history and counters.
pub struct TrainLoop<B, M, O>
where
    B: AutodiffBackend,
{
    model: M,
    optimizer: O,
    scheduler: PlateauScheduler,
    loss: Loss,
    harvester: AllTripletSelector,
    history: RunHistory,
    total_iters: usize,
    cur_epoch: usize,
    store: CheckpointStore,
    checkpointing: bool,
    log_every: usize,
    train_loader: TrainLoader<B>,
    valid_loader: ValidLoader<B>,
    device: B::Device,
}

impl<B, M, O> TrainLoop<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    pub fn new(
        model: M,
        optimizer: O,
        train_loader: TrainLoader<B>,
        valid_loader: ValidLoader<B>,
        config: &TrainingConfig,
        device: B::Device,
    ) -> Result<Self, TrainError> {
        config.validate()?;
        let loss = Loss::new(config.train_mode, config.slack)?;
        let naming = match &config.checkpoint_name {
            Some(name) => CheckpointNaming::Fixed(name.clone()),
            None => CheckpointNaming::PerEpoch(EPOCH_TEMPLATE.to_string()),
        };
        let store = CheckpointStore::new(&config.checkpoint_dir, naming)?;

        Ok(Self {
            model,
            optimizer,
            scheduler: PlateauScheduler::new(PlateauConfig::new(config.patience), config.learning_rate),
            loss,
            harvester: AllTripletSelector::new(),
            history: RunHistory::new(),
            total_iters: 0,
            cur_epoch: 0,
            store,
            checkpointing: config.checkpointing,
            log_every: config.log_every,
            train_loader,
            valid_loader,
            device,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn total_iters(&self) -> usize {
        self.total_iters
    }

    pub fn cur_epoch(&self) -> usize {
        self.cur_epoch
    }

    pub fn learning_rate(&self) -> f64 {
        self.scheduler.lr()
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn phase(&self, n_epochs: usize) -> Phase {
        if self.cur_epoch >= n_epochs {
            Phase::Done
        } else if self.cur_epoch == 0 {
            Phase::Fresh
        } else {
            Phase::Running
        }
    }

    /// Runs epochs until `n_epochs` have completed and returns the lowest
    /// validation error rate in the history.
    pub fn train(&mut self, n_epochs: usize, save_every: usize) -> Result<f64, TrainError> {
        if save_every == 0 {
            return Err(TrainError::invalid_config("save_every must be at least 1"));
        }

        while self.cur_epoch < n_epochs {
            let epoch_start = Instant::now();
            info!("--- Epoch {} / {} ---", self.cur_epoch + 1, n_epochs);

            let train_loss = self.train_epoch()?;
            let (error_rate, eer) = self.validate()?;

            self.history.push_epoch(train_loss, error_rate, eer);
            self.scheduler.step(error_rate);

            let epoch_index = self.cur_epoch;
            self.cur_epoch += 1;

            EpochSummary {
                epoch: self.cur_epoch,
                n_epochs,
                train_loss,
                error_rate,
                eer,
                best_error_rate: self.history.best_error_rate().unwrap_or((self.cur_epoch, error_rate)),
                best_eer: self.history.best_eer().unwrap_or((self.cur_epoch, eer)),
                learning_rate: self.scheduler.lr(),
                duration_secs: epoch_start.elapsed().as_secs_f64(),
            }
            .log();

            if self.checkpointing && checkpoint_due(epoch_index, save_every, &self.history) {
                self.checkpoint()?;
            }
        }

        let (best_epoch, best_error_rate) = self.history.best_error_rate().ok_or(TrainError::EmptyHistory)?;
        info!("Training done!");
        if let Some((eer_epoch, best_eer)) = self.history.best_eer() {
            info!(
                "Best error rate {:.4} at epoch {} | Best EER {:.4} at epoch {}",
                best_error_rate, best_epoch, best_eer, eer_epoch
            );
        }
        Ok(best_error_rate)
    }

    fn train_epoch(&mut self) -> Result<f64, TrainError> {
        let loader = Arc::clone(&self.train_loader);
        let mut accumulator = MetricsAccumulator::new();

        for batch in loader.iter() {
            let loss = self.train_step(batch)?;
            self.history.push_batch(loss);
            accumulator.update_loss(loss);
            self.total_iters += 1;

            if self.log_every > 0 && accumulator.num_batches() % self.log_every == 0 {
                debug!(
                    "  Batch {:>5} | Loss: {:.4} | Running mean: {:.4}",
                    accumulator.num_batches(),
                    loss,
                    accumulator.avg_loss()
                );
            }
        }

        if accumulator.num_batches() == 0 {
            return Err(TrainError::EmptyLoader("training"));
        }
        Ok(accumulator.avg_loss())
    }

    fn train_step(&mut self, batch: ImageBatch<B>) -> Result<f64, TrainError> {
        let embeddings = self.model.forward(batch.images);
        let logits = self.model.out_proj(embeddings);
        let loss = self.loss.forward(logits, batch.targets)?;

        let value: f64 = loss.clone().into_scalar().elem();
        if !value.is_finite() {
            return Err(TrainError::NonFiniteLoss(value, self.total_iters));
        }

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self.optimizer.step(self.scheduler.lr(), self.model.clone(), grads);

        Ok(value)
    }

    /// One pass over the validation data without gradient tracking.
    /// Returns (error rate, EER).
    fn validate(&self) -> Result<(f64, f64), TrainError> {
        let model = self.model.valid();
        let mut accumulator = MetricsAccumulator::new();
        let mut pairs = PairScores::new();

        for batch in self.valid_loader.iter() {
            let (correct, total) = valid_step(&model, &self.harvester, batch, &mut pairs)?;
            accumulator.update_accuracy(correct, total);
        }

        if accumulator.total() == 0 {
            return Err(TrainError::EmptyLoader("validation"));
        }
        if pairs.is_empty() {
            warn!("Validation produced no triplets, every batch held a single class");
        }
        let eer = pairs.eer()?;
        Ok((accumulator.error_rate(), eer))
    }

    /// Captures the full training state
    pub fn snapshot(&self) -> Result<Checkpoint, TrainError> {
        let recorder = StateRecorder::default();
        let model_state = Recorder::<B>::record(&recorder, self.model.clone().into_record(), ())
            .map_err(record_error)?;
        let optimizer_state =
            Recorder::<B>::record(&recorder, self.optimizer.to_record(), ()).map_err(record_error)?;

        Ok(Checkpoint::new(
            &model_state,
            &optimizer_state,
            self.scheduler.state().clone(),
            self.history.clone(),
            self.total_iters,
            self.cur_epoch,
        ))
    }

    /// Writes the current state to the checkpoint store
    pub fn checkpoint(&self) -> Result<PathBuf, TrainError> {
        info!("Checkpointing...");
        let checkpoint = self.snapshot()?;
        Ok(self.store.save(&checkpoint)?)
    }

    /// Restores a checkpoint into a loop that has not started training.
    /// A missing file is logged and the fresh state is kept; any other
    /// failure leaves nothing restored.
    pub fn resume_from(mut self, path: &Path) -> Result<Self, TrainError> {
        if self.cur_epoch != 0 {
            return Err(TrainError::invalid_config(
                "a checkpoint can only be loaded before training starts",
            ));
        }

        let checkpoint = match CheckpointStore::load(path) {
            Ok(checkpoint) => checkpoint,
            Err(CheckpointError::NotFound(missing)) => {
                warn!(path = %missing.display(), "No checkpoint found, starting from scratch");
                return Ok(self);
            }
            Err(err) => return Err(err.into()),
        };

        let recorder = StateRecorder::default();
        let model_record: M::Record =
            Recorder::<B>::load(&recorder, checkpoint.model_bytes()?, &self.device).map_err(record_error)?;
        let optimizer_record: O::Record =
            Recorder::<B>::load(&recorder, checkpoint.optimizer_bytes()?, &self.device)
                .map_err(record_error)?;

        self.model = self.model.load_record(model_record);
        self.optimizer = self.optimizer.load_record(optimizer_record);
        self.scheduler.load_state(checkpoint.scheduler_state);
        self.history = checkpoint.history;
        self.total_iters = checkpoint.total_iters;
        self.cur_epoch = checkpoint.cur_epoch;

        info!(
            path = %path.display(),
            epoch = self.cur_epoch,
            total_iters = self.total_iters,
            lr = self.scheduler.lr(),
            "Resumed from checkpoint"
        );
        Ok(self)
    }

    /// Resumes from the per-epoch checkpoint written after `epoch` epochs
    pub fn resume_epoch(self, epoch: usize) -> Result<Self, TrainError> {
        let path = self.store.path_for(epoch);
        self.resume_from(&path)
    }
}

/// Scores one validation batch: counts correct predictions and adds the
/// cosine scores of every triplet in the batch to `pairs`.
fn valid_step<B, M, S>(
    model: &M,
    harvester: &S,
    batch: ImageBatch<B>,
    pairs: &mut PairScores,
) -> Result<(usize, usize), TrainError>
where
    B: Backend,
    M: ImageClassifier<B>,
    S: TripletSelector,
{
    let embeddings = model.forward(batch.images);
    let [batch_size, dim] = embeddings.dims();

    let logits = model.out_proj(embeddings.clone());
    let predictions = softmax(logits, 1).argmax(1).reshape([batch_size]);
    let correct: i64 = predictions.equal(batch.targets).int().sum().into_scalar().elem();

    let triplets = harvester.triplets(&batch.labels);
    let embeddings = embeddings
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| TrainError::Tensor(format!("{e:?}")))?;
    pairs.extend_from_triplets(&embeddings, dim, &triplets);

    Ok((correct as usize, batch_size))
}

/// Periodic saves at every `save_every`-th 0-based epoch index, plus any
/// epoch whose error rate or EER is a new strict minimum.
fn checkpoint_due(epoch_index: usize, save_every: usize, history: &RunHistory) -> bool {
    epoch_index % save_every == 0 || history.error_rate_improved() || history.eer_improved()
}

fn record_error(err: RecorderError) -> TrainError {
    CheckpointError::Record(format!("{err:?}")).into()
}
