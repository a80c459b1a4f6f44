use burn::{
    module::Module,
    nn::{
        conv::Conv2d,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::model::{
    classifier::ImageClassifier,
    layers::{conv1x1, conv3x3},
};

#[derive(Debug, Clone)]
pub struct DenseNetConfig {
    /// Bottleneck layers per dense block
    pub blocks: Vec<usize>,
    pub growth_rate: usize,
    /// Channel compression applied by each transition layer
    pub reduction: f64,
    pub in_channels: usize,
    pub num_classes: usize,
}

impl DenseNetConfig {
    pub fn new(blocks: Vec<usize>, growth_rate: usize, num_classes: usize) -> Self {
        Self {
            blocks,
            growth_rate,
            reduction: 0.5,
            in_channels: 3,
            num_classes,
        }
    }

    /// DenseNet-121 layout with the small CIFAR growth rate
    pub fn cifar(num_classes: usize) -> Self {
        Self::new(vec![6, 12, 24, 16], 12, num_classes)
    }

    /// Channel count entering each block, followed by the final width
    fn plan(&self) -> (Vec<usize>, usize) {
        let mut channels = 2 * self.growth_rate;
        let mut inputs = Vec::with_capacity(self.blocks.len());
        for (idx, &layers) in self.blocks.iter().enumerate() {
            inputs.push(channels);
            channels += layers * self.growth_rate;
            if idx + 1 < self.blocks.len() {
                channels = (channels as f64 * self.reduction).floor() as usize;
            }
        }
        (inputs, channels)
    }

    pub fn embedding_dim(&self) -> usize {
        self.plan().1
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> DenseNet<B> {
        let (inputs, out_channels) = self.plan();
        let stages = self
            .blocks
            .iter()
            .zip(inputs)
            .enumerate()
            .map(|(idx, (&count, channels))| {
                let layers = (0..count)
                    .map(|layer| DenseLayer::new(channels + layer * self.growth_rate, self.growth_rate, device))
                    .collect();
                let grown = channels + count * self.growth_rate;
                let transition = (idx + 1 < self.blocks.len()).then(|| {
                    let reduced = (grown as f64 * self.reduction).floor() as usize;
                    Transition::new(grown, reduced, device)
                });
                DenseStage { layers, transition }
            })
            .collect();

        DenseNet {
            stem: conv3x3(self.in_channels, 2 * self.growth_rate, 1, device),
            stages,
            norm: BatchNormConfig::new(out_channels).init(device),
            activation: Relu::new(),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: LinearConfig::new(out_channels, self.num_classes).init(device),
        }
    }
}

/// BN-ReLU-conv1x1-BN-ReLU-conv3x3, output concatenated onto the input
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    norm1: BatchNorm<B, 2>,
    conv1: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> DenseLayer<B> {
    fn new(in_channels: usize, growth_rate: usize, device: &B::Device) -> Self {
        let inner = 4 * growth_rate;
        Self {
            norm1: BatchNormConfig::new(in_channels).init(device),
            conv1: conv1x1(in_channels, inner, 1, device),
            norm2: BatchNormConfig::new(inner).init(device),
            conv2: conv3x3(inner, growth_rate, 1, device),
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv1.forward(self.activation.forward(self.norm1.forward(x.clone())));
        let out = self.conv2.forward(self.activation.forward(self.norm2.forward(out)));
        Tensor::cat(vec![out, x], 1)
    }
}

#[derive(Module, Debug)]
pub struct Transition<B: Backend> {
    norm: BatchNorm<B, 2>,
    conv: Conv2d<B>,
    pool: AvgPool2d,
    activation: Relu,
}

impl<B: Backend> Transition<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            norm: BatchNormConfig::new(in_channels).init(device),
            conv: conv1x1(in_channels, out_channels, 1, device),
            pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(self.activation.forward(self.norm.forward(x)));
        self.pool.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct DenseStage<B: Backend> {
    layers: Vec<DenseLayer<B>>,
    transition: Option<Transition<B>>,
}

#[derive(Module, Debug)]
pub struct DenseNet<B: Backend> {
    stem: Conv2d<B>,
    stages: Vec<DenseStage<B>>,
    norm: BatchNorm<B, 2>,
    activation: Relu,
    pool: AdaptiveAvgPool2d,
    head: Linear<B>,
}

impl<B: Backend> ImageClassifier<B> for DenseNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.stem.forward(images);
        for stage in &self.stages {
            for layer in &stage.layers {
                x = layer.forward(x);
            }
            if let Some(transition) = &stage.transition {
                x = transition.forward(x);
            }
        }
        let x = self.activation.forward(self.norm.forward(x));
        self.pool.forward(x).flatten::<2>(1, 3)
    }

    fn out_proj(&self, embeddings: Tensor<B, 2>) -> Tensor<B, 2> {
        self.head.forward(embeddings)
    }
}
