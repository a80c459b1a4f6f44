pub mod classifier;
pub mod densenet;
pub mod layers;
pub mod resnet;
pub mod vgg;

pub use classifier::{Architecture, ImageClassifier};
pub use densenet::{DenseNet, DenseNetConfig};
pub use resnet::{ResNet, ResNetConfig};
pub use vgg::{Vgg, VggConfig};
