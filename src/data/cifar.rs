//! Reader for the CIFAR-10 binary distribution.
//!
//! Each record is one label byte followed by 3072 pixel bytes laid out as
//! three 32x32 planes (red, green, blue).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::data::dataset::{ImageDataset, ImageItem, ImageShape};
use crate::error::DataError;

pub const NUM_CLASSES: usize = 10;

const RECORD_LEN: usize = 1 + 3 * 32 * 32;
const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_FILES: [&str; 1] = ["test_batch.bin"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    fn files(&self) -> &'static [&'static str] {
        match self {
            Split::Train => &TRAIN_FILES,
            Split::Test => &TEST_FILES,
        }
    }
}

/// Loads one split from `root`, which may point at the extracted
/// `cifar-10-batches-bin` directory or at its parent.
pub fn load_cifar10(root: &Path, split: Split) -> Result<ImageDataset, DataError> {
    let dir = resolve_dir(root);
    let mut items = Vec::new();

    for name in split.files() {
        let path = dir.join(name);
        if !path.is_file() {
            return Err(DataError::NotFound(path));
        }
        let bytes = fs::read(&path)?;
        items.extend(parse_records(&bytes, &path)?);
    }

    info!(dir = %dir.display(), ?split, items = items.len(), "Loaded CIFAR-10 split");
    Ok(ImageDataset::from_items(items, ImageShape::CIFAR))
}

fn resolve_dir(root: &Path) -> PathBuf {
    let nested = root.join("cifar-10-batches-bin");
    if nested.is_dir() {
        nested
    } else {
        root.to_path_buf()
    }
}

fn parse_records(bytes: &[u8], path: &Path) -> Result<Vec<ImageItem>, DataError> {
    if bytes.len() % RECORD_LEN != 0 {
        return Err(DataError::Malformed {
            path: path.to_path_buf(),
            reason: format!(
                "{} bytes is not a multiple of the {RECORD_LEN}-byte record size",
                bytes.len()
            ),
        });
    }

    bytes
        .chunks_exact(RECORD_LEN)
        .map(|record| {
            let label = record[0] as usize;
            if label >= NUM_CLASSES {
                return Err(DataError::Malformed {
                    path: path.to_path_buf(),
                    reason: format!("label {label} out of range"),
                });
            }
            Ok(ImageItem {
                pixels: record[1..].to_vec(),
                label,
            })
        })
        .collect()
}
