use burn::{
    data::dataloader::batcher::Batcher,
    tensor::{backend::Backend, Int, Tensor},
};

use crate::data::dataset::{ImageItem, ImageShape};

/// Per-channel mean of the CIFAR-10 training set, in [0, 1] units
pub const CIFAR_MEAN: [f32; 3] = [125.3 / 255.0, 123.0 / 255.0, 113.9 / 255.0];
/// Per-channel standard deviation of the CIFAR-10 training set
pub const CIFAR_STD: [f32; 3] = [63.0 / 255.0, 62.1 / 255.0, 66.7 / 255.0];

#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// [batch, channels, height, width], normalised
    pub images: Tensor<B, 4>,
    /// [batch] class indices
    pub targets: Tensor<B, 1, Int>,
    /// Host copy of `targets`, used by the triplet harvester
    pub labels: Vec<usize>,
}

/// Per-channel normalisation applied while batching
#[derive(Debug, Clone)]
pub struct Normalization {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl Normalization {
    pub fn cifar() -> Self {
        Self {
            mean: CIFAR_MEAN.to_vec(),
            std: CIFAR_STD.to_vec(),
        }
    }

    /// Scales bytes to [0, 1] without centring
    pub fn identity(channels: usize) -> Self {
        Self {
            mean: vec![0.0; channels],
            std: vec![1.0; channels],
        }
    }
}

#[derive(Clone, Debug)]
pub struct ImageBatcher {
    shape: ImageShape,
    normalization: Normalization,
}

impl ImageBatcher {
    pub fn new(shape: ImageShape, normalization: Normalization) -> Self {
        assert_eq!(
            normalization.mean.len(),
            shape.channels,
            "one normalisation mean per channel"
        );
        assert_eq!(
            normalization.std.len(),
            shape.channels,
            "one normalisation std per channel"
        );
        Self {
            shape,
            normalization,
        }
    }

    fn normalize_into(&self, pixels: &[u8], out: &mut Vec<f32>) {
        let plane = self.shape.height * self.shape.width;
        for (idx, &px) in pixels.iter().enumerate() {
            let channel = idx / plane;
            let value = px as f32 / 255.0;
            out.push((value - self.normalization.mean[channel]) / self.normalization.std[channel]);
        }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let ImageShape {
            channels,
            height,
            width,
        } = self.shape;

        let mut pixels = Vec::with_capacity(batch_size * self.shape.num_pixels());
        for item in &items {
            assert_eq!(
                item.pixels.len(),
                self.shape.num_pixels(),
                "image does not match the configured shape"
            );
            self.normalize_into(&item.pixels, &mut pixels);
        }

        let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
        let labels_flat: Vec<i32> = labels.iter().map(|&label| label as i32).collect();

        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), device)
            .reshape([batch_size, channels, height, width]);
        let targets = Tensor::<B, 1, Int>::from_ints(labels_flat.as_slice(), device);

        ImageBatch {
            images,
            targets,
            labels,
        }
    }
}
