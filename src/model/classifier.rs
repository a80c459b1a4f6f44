use std::fmt;

use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

/// A network that maps images to an embedding and the embedding to class
/// scores. Validation needs the embedding on its own, so the classifier head
/// is exposed separately.
pub trait ImageClassifier<B: Backend>: Module<B> {
    /// images: [batch, channels, height, width] -> embeddings: [batch, dim]
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// embeddings: [batch, dim] -> unnormalised class scores: [batch, classes]
    fn out_proj(&self, embeddings: Tensor<B, 2>) -> Tensor<B, 2>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Vgg,
    Resnet,
    Densenet,
}

impl Architecture {
    pub const ALL: [Architecture; 3] = [Architecture::Vgg, Architecture::Resnet, Architecture::Densenet];

    pub fn name(&self) -> &'static str {
        match self {
            Architecture::Vgg => "vgg",
            Architecture::Resnet => "resnet",
            Architecture::Densenet => "densenet",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
