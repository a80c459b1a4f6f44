use burn::data::dataset::Dataset;

/// A single labelled image, stored channel-major (C, H, W) as raw bytes.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub pixels: Vec<u8>,
    pub label: usize,
}

/// Spatial layout shared by every item of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub const CIFAR: ImageShape = ImageShape {
        channels: 3,
        height: 32,
        width: 32,
    };

    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Number of bytes per image
    pub fn num_pixels(&self) -> usize {
        self.channels * self.height * self.width
    }
}

/// In-memory labelled image collection
#[derive(Debug, Clone)]
pub struct ImageDataset {
    pub items: Vec<ImageItem>,
    pub shape: ImageShape,
}

impl ImageDataset {
    pub fn from_items(items: Vec<ImageItem>, shape: ImageShape) -> Self {
        Self { items, shape }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of distinct classes, assuming labels are 0..K
    pub fn num_classes(&self) -> usize {
        self.items.iter().map(|item| item.label + 1).max().unwrap_or(0)
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_classes_from_highest_label() {
        let shape = ImageShape::new(1, 1, 1);
        let items = [0, 3, 1]
            .into_iter()
            .map(|label| ImageItem {
                pixels: vec![0],
                label,
            })
            .collect();
        let dataset = ImageDataset::from_items(items, shape);

        assert_eq!(dataset.num_classes(), 4);
        assert_eq!(Dataset::len(&dataset), 3);
        assert_eq!(dataset.get(1).map(|item| item.label), Some(3));
        assert!(dataset.get(3).is_none());
    }
}
