//! On-disk training state.
//!
//! A checkpoint is one JSON document holding the encoded model and optimizer
//! records next to the scheduler state, run history and iteration counters.
//! Files are overwritten in place.

use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CheckpointError;
use crate::training::{metrics::RunHistory, scheduler::PlateauState};

pub const CHECKPOINT_VERSION: u32 = 1;
/// Default per-epoch file name; `{}` becomes the number of completed epochs
pub const EPOCH_TEMPLATE: &str = "checkpoint_{}ep.ckpt";
/// Used when a per-epoch template cannot be rendered
pub const FALLBACK_NAME: &str = "checkpoint.ckpt";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    /// Model record, base64
    pub model_state: String,
    /// Optimizer record, base64
    pub optimizer_state: String,
    pub scheduler_state: PlateauState,
    pub history: RunHistory,
    pub total_iters: usize,
    /// Completed epochs; training resumes at this epoch index
    pub cur_epoch: usize,
}

impl Checkpoint {
    pub fn new(
        model_state: &[u8],
        optimizer_state: &[u8],
        scheduler_state: PlateauState,
        history: RunHistory,
        total_iters: usize,
        cur_epoch: usize,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            model_state: STANDARD.encode(model_state),
            optimizer_state: STANDARD.encode(optimizer_state),
            scheduler_state,
            history,
            total_iters,
            cur_epoch,
        }
    }

    pub fn model_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        Ok(STANDARD.decode(&self.model_state)?)
    }

    pub fn optimizer_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        Ok(STANDARD.decode(&self.optimizer_state)?)
    }

    fn verify(&self) -> Result<(), CheckpointError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: self.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        if !self.history.is_consistent(self.cur_epoch) {
            return Err(CheckpointError::Corrupt(format!(
                "history holds {} epochs but cur_epoch is {}",
                self.history.completed_epochs(),
                self.cur_epoch
            )));
        }
        Ok(())
    }
}

/// How checkpoint files are named inside the checkpoint directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointNaming {
    /// One file per run, overwritten on every save
    Fixed(String),
    /// One file per save; `{}` is replaced by the completed epoch count
    PerEpoch(String),
}

impl Default for CheckpointNaming {
    fn default() -> Self {
        CheckpointNaming::PerEpoch(EPOCH_TEMPLATE.to_string())
    }
}

/// Renders a `{}` file-name template. A template without braces is returned
/// unchanged; any other use of braces fails.
pub fn render_template(template: &str, epoch: usize) -> Option<String> {
    let parts: Vec<&str> = template.split("{}").collect();
    if parts.iter().any(|part| part.contains('{') || part.contains('}')) {
        return None;
    }
    match parts.as_slice() {
        [fixed] if !fixed.is_empty() => Some(fixed.to_string()),
        [prefix, suffix] => Some(format!("{prefix}{epoch}{suffix}")),
        _ => None,
    }
}

/// Picks a random numeric file name that does not exist in `dir` yet
pub fn unique_checkpoint_name<R: Rng>(dir: &Path, rng: &mut R) -> String {
    loop {
        let name = format!("{}.ckpt", rng.gen_range(1..999_999_999u32));
        if !dir.join(&name).exists() {
            return name;
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    naming: CheckpointNaming,
}

impl CheckpointStore {
    /// Creates the checkpoint directory if needed
    pub fn new(dir: impl Into<PathBuf>, naming: CheckpointNaming) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, naming })
    }

    /// Path a checkpoint taken after `epoch` completed epochs is written to
    pub fn path_for(&self, epoch: usize) -> PathBuf {
        let name = match &self.naming {
            CheckpointNaming::Fixed(name) => name.clone(),
            CheckpointNaming::PerEpoch(template) => render_template(template, epoch).unwrap_or_else(|| {
                warn!(template = %template, "Cannot render checkpoint name, using {FALLBACK_NAME}");
                FALLBACK_NAME.to_string()
            }),
        };
        self.dir.join(name)
    }

    /// Writes `checkpoint` and returns the path it landed at
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<PathBuf, CheckpointError> {
        let path = self.path_for(checkpoint.cur_epoch);
        let bytes = serde_json::to_vec(checkpoint)?;
        fs::write(&path, bytes)?;
        info!(path = %path.display(), epoch = checkpoint.cur_epoch, "Checkpoint saved");
        Ok(path)
    }

    /// Reads and validates a checkpoint. Either every field is present and
    /// consistent or an error is returned.
    pub fn load(path: &Path) -> Result<Checkpoint, CheckpointError> {
        if !path.is_file() {
            return Err(CheckpointError::NotFound(path.to_path_buf()));
        }
        let bytes = fs::read(path)?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        checkpoint.verify()?;
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn sample_checkpoint(cur_epoch: usize) -> Checkpoint {
        let mut history = RunHistory::new();
        for epoch in 0..cur_epoch {
            history.push_batch(2.0 - epoch as f64 * 0.1);
            history.push_epoch(2.0 - epoch as f64 * 0.1, 0.5, 0.25);
        }
        let scheduler = PlateauState {
            lr: 0.05,
            best: Some(0.5),
            num_bad_epochs: 1,
            cooldown_counter: 0,
            last_epoch: cur_epoch,
        };
        Checkpoint::new(&[1, 2, 3], &[9, 8], scheduler, history, 7 * cur_epoch, cur_epoch)
    }

    #[test]
    fn renders_epoch_templates() {
        assert_eq!(render_template("checkpoint_{}ep.ckpt", 3), Some("checkpoint_3ep.ckpt".into()));
        assert_eq!(render_template("run.ckpt", 3), Some("run.ckpt".into()));
        assert_eq!(render_template("bad_{x}.ckpt", 3), None);
        assert_eq!(render_template("twice_{}_{}.ckpt", 3), None);
        assert_eq!(render_template("", 3), None);
    }

    #[test]
    fn save_then_load_restores_every_field() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path().join("cp"), CheckpointNaming::default()).unwrap();
        let checkpoint = sample_checkpoint(3);

        let path = store.save(&checkpoint).unwrap();
        assert_eq!(path, tmp.path().join("cp").join("checkpoint_3ep.ckpt"));

        let loaded = CheckpointStore::load(&path).unwrap();
        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.model_bytes().unwrap(), vec![1, 2, 3]);
        assert_eq!(loaded.optimizer_bytes().unwrap(), vec![9, 8]);
    }

    #[test]
    fn malformed_template_falls_back_to_fixed_name() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path(), CheckpointNaming::PerEpoch("cp_{epoch}.ckpt".into())).unwrap();

        let first = store.save(&sample_checkpoint(1)).unwrap();
        let second = store.save(&sample_checkpoint(2)).unwrap();
        assert_eq!(first, tmp.path().join(FALLBACK_NAME));
        assert_eq!(first, second);
        assert_eq!(CheckpointStore::load(&second).unwrap().cur_epoch, 2);
    }

    #[test]
    fn fixed_name_is_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path(), CheckpointNaming::Fixed("42.ckpt".into())).unwrap();
        store.save(&sample_checkpoint(1)).unwrap();
        let path = store.save(&sample_checkpoint(4)).unwrap();

        assert_eq!(path, tmp.path().join("42.ckpt"));
        assert_eq!(CheckpointStore::load(&path).unwrap().total_iters, 28);
    }

    #[test]
    fn missing_file_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = CheckpointStore::load(&tmp.path().join("nope.ckpt")).unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[test]
    fn missing_field_fails_the_whole_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("partial.ckpt");
        let mut value = serde_json::to_value(sample_checkpoint(2)).unwrap();
        value.as_object_mut().unwrap().remove("scheduler_state");
        fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        assert!(matches!(CheckpointStore::load(&path), Err(CheckpointError::Serde(_))));
    }

    #[test]
    fn inconsistent_history_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path(), CheckpointNaming::Fixed("x.ckpt".into())).unwrap();
        let mut checkpoint = sample_checkpoint(2);
        checkpoint.cur_epoch = 3;
        let path = store.save(&checkpoint).unwrap();

        assert!(matches!(CheckpointStore::load(&path), Err(CheckpointError::Corrupt(_))));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path(), CheckpointNaming::Fixed("v.ckpt".into())).unwrap();
        let mut checkpoint = sample_checkpoint(1);
        checkpoint.version = 99;
        let path = store.save(&checkpoint).unwrap();

        assert!(matches!(
            CheckpointStore::load(&path),
            Err(CheckpointError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn unique_names_avoid_existing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let taken = unique_checkpoint_name(tmp.path(), &mut rng);
        fs::write(tmp.path().join(&taken), b"").unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let fresh = unique_checkpoint_name(tmp.path(), &mut rng);
        assert_ne!(fresh, taken);
        assert!(fresh.ends_with(".ckpt"));
    }
}
