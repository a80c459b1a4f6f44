use burn::{
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::model::{classifier::ImageClassifier, layers::ConvBnRelu};

/// VGG configuration: each stage is a list of conv widths followed by a
/// 2x2 max-pool.
#[derive(Debug, Clone)]
pub struct VggConfig {
    pub stages: Vec<Vec<usize>>,
    pub in_channels: usize,
    pub num_classes: usize,
}

impl VggConfig {
    pub fn new(stages: Vec<Vec<usize>>, num_classes: usize) -> Self {
        Self {
            stages,
            in_channels: 3,
            num_classes,
        }
    }

    /// VGG-16 sized for 32x32 inputs
    pub fn vgg16(num_classes: usize) -> Self {
        Self::new(
            vec![
                vec![64, 64],
                vec![128, 128],
                vec![256, 256, 256],
                vec![512, 512, 512],
                vec![512, 512, 512],
            ],
            num_classes,
        )
    }

    pub fn embedding_dim(&self) -> usize {
        self.stages
            .iter()
            .rev()
            .find_map(|stage| stage.last().copied())
            .unwrap_or(self.in_channels)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Vgg<B> {
        let mut channels = self.in_channels;
        let stages = self
            .stages
            .iter()
            .map(|widths| {
                let layers = widths
                    .iter()
                    .map(|&width| {
                        let layer = ConvBnRelu::new(channels, width, device);
                        channels = width;
                        layer
                    })
                    .collect();
                VggStage {
                    layers,
                    pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
                }
            })
            .collect();

        Vgg {
            stages,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: LinearConfig::new(self.embedding_dim(), self.num_classes).init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct VggStage<B: Backend> {
    layers: Vec<ConvBnRelu<B>>,
    pool: MaxPool2d,
}

#[derive(Module, Debug)]
pub struct Vgg<B: Backend> {
    stages: Vec<VggStage<B>>,
    global_pool: AdaptiveAvgPool2d,
    head: Linear<B>,
}

impl<B: Backend> ImageClassifier<B> for Vgg<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for stage in &self.stages {
            for layer in &stage.layers {
                x = layer.forward(x);
            }
            x = stage.pool.forward(x);
        }
        self.global_pool.forward(x).flatten::<2>(1, 3)
    }

    fn out_proj(&self, embeddings: Tensor<B, 2>) -> Tensor<B, 2> {
        self.head.forward(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn produces_embedding_and_class_scores() {
        let device = Default::default();
        let config = VggConfig::new(vec![vec![4], vec![8, 8]], 10);
        let model = config.init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);
        let embeddings = model.forward(images);
        assert_eq!(embeddings.dims(), [2, config.embedding_dim()]);
        assert_eq!(model.out_proj(embeddings).dims(), [2, 10]);
    }
}
