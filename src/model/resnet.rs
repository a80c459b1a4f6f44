use burn::{
    module::Module,
    nn::{
        conv::Conv2d,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::model::{
    classifier::ImageClassifier,
    layers::{conv1x1, conv3x3, ConvBnRelu},
};

/// ResNet built from basic residual blocks. `blocks[i]` blocks run at width
/// `widths[i]`; every stage after the first halves the resolution.
#[derive(Debug, Clone)]
pub struct ResNetConfig {
    pub blocks: Vec<usize>,
    pub widths: Vec<usize>,
    pub in_channels: usize,
    pub num_classes: usize,
}

impl ResNetConfig {
    pub fn new(blocks: Vec<usize>, widths: Vec<usize>, num_classes: usize) -> Self {
        assert_eq!(blocks.len(), widths.len(), "one width per stage");
        Self {
            blocks,
            widths,
            in_channels: 3,
            num_classes,
        }
    }

    pub fn resnet18(num_classes: usize) -> Self {
        Self::new(vec![2, 2, 2, 2], vec![64, 128, 256, 512], num_classes)
    }

    pub fn embedding_dim(&self) -> usize {
        self.widths.last().copied().unwrap_or(self.in_channels)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let stem_width = self.widths.first().copied().unwrap_or(self.in_channels);
        let mut channels = stem_width;
        let mut blocks = Vec::new();

        for (stage, (&count, &width)) in self.blocks.iter().zip(&self.widths).enumerate() {
            for idx in 0..count {
                let stride = if stage > 0 && idx == 0 { 2 } else { 1 };
                blocks.push(BasicBlock::new(channels, width, stride, device));
                channels = width;
            }
        }

        ResNet {
            stem: ConvBnRelu::new(self.in_channels, stem_width, device),
            blocks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: LinearConfig::new(self.embedding_dim(), self.num_classes).init(device),
        }
    }
}

/// Projection used when a block changes width or resolution
#[derive(Module, Debug)]
pub struct Shortcut<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> Shortcut<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(self.conv.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    shortcut: Option<Shortcut<B>>,
    activation: Relu,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let shortcut = (stride != 1 || in_channels != out_channels).then(|| Shortcut {
            conv: conv1x1(in_channels, out_channels, stride, device),
            norm: BatchNormConfig::new(out_channels).init(device),
        });

        Self {
            conv1: conv3x3(in_channels, out_channels, stride, device),
            norm1: BatchNormConfig::new(out_channels).init(device),
            conv2: conv3x3(out_channels, out_channels, 1, device),
            norm2: BatchNormConfig::new(out_channels).init(device),
            shortcut,
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.shortcut {
            Some(shortcut) => shortcut.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.activation.forward(self.norm1.forward(self.conv1.forward(x)));
        let out = self.norm2.forward(self.conv2.forward(out));
        self.activation.forward(out + identity)
    }
}

#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    stem: ConvBnRelu<B>,
    blocks: Vec<BasicBlock<B>>,
    pool: AdaptiveAvgPool2d,
    head: Linear<B>,
}

impl<B: Backend> ImageClassifier<B> for ResNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.stem.forward(images);
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.pool.forward(x).flatten::<2>(1, 3)
    }

    fn out_proj(&self, embeddings: Tensor<B, 2>) -> Tensor<B, 2> {
        self.head.forward(embeddings)
    }
}
