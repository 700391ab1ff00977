pub mod architecture;
pub mod checkpoint;
pub mod missing_value_layer;

use crate::data::batcher::MultimodalBatch;
use crate::error::Error;
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Input configuration of the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Image, categorical and continuous inputs
    #[default]
    Multimodal,
    /// Image input only
    #[value(name = "image_only")]
    ImageOnly,
    /// Categorical and continuous inputs only
    #[value(name = "tabular_only")]
    TabularOnly,
}

impl Modality {
    /// Name used in file names and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Multimodal => "multimodal",
            Modality::ImageOnly => "image_only",
            Modality::TabularOnly => "tabular_only",
        }
    }

    pub fn requires_image(&self) -> bool {
        matches!(self, Modality::Multimodal | Modality::ImageOnly)
    }

    pub fn requires_tabular(&self) -> bool {
        matches!(self, Modality::Multimodal | Modality::TabularOnly)
    }

    /// Select the batch fields this modality feeds to the model
    ///
    /// A batch lacking a required field is a configuration error.
    pub fn route<B: Backend>(&self, batch: &MultimodalBatch<B>) -> crate::error::Result<ModelInput<B>> {
        let images = || {
            batch.images.clone().ok_or(Error::MissingModality {
                modality: *self,
                field: "image",
            })
        };

        Ok(match self {
            Modality::Multimodal => ModelInput::Multimodal {
                images: images()?,
                tabular: TabularInput::from_batch(batch),
            },
            Modality::ImageOnly => ModelInput::Image { images: images()? },
            Modality::TabularOnly => ModelInput::Tabular {
                tabular: TabularInput::from_batch(batch),
            },
        })
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tabular tensors of a batch
#[derive(Debug, Clone)]
pub struct TabularInput<B: Backend> {
    pub categorical: Tensor<B, 2, Int>,
    pub continuous: Tensor<B, 2>,
    pub continuous_mask: Tensor<B, 2>,
}

impl<B: Backend> TabularInput<B> {
    fn from_batch(batch: &MultimodalBatch<B>) -> Self {
        Self {
            categorical: batch.categorical.clone(),
            continuous: batch.continuous.clone(),
            continuous_mask: batch.continuous_mask.clone(),
        }
    }
}

/// Model input for one batch, shaped by the modality
#[derive(Debug, Clone)]
pub enum ModelInput<B: Backend> {
    Multimodal {
        images: Tensor<B, 4>,
        tabular: TabularInput<B>,
    },
    Image {
        images: Tensor<B, 4>,
    },
    Tabular {
        tabular: TabularInput<B>,
    },
}

/// Fusion classifier configuration
#[derive(Config, Debug)]
pub struct FusionModelConfig {
    /// Input configuration; only the branches it needs are built
    pub modality: Modality,

    /// Number of target classes
    pub num_classes: usize,

    /// Cardinality of each categorical column
    pub category_dims: Vec<usize>,

    /// Number of continuous columns
    pub num_continuous: usize,

    /// Embedding size per categorical column
    #[config(default = "8")]
    pub embedding_dim: usize,

    /// Width of each branch output
    #[config(default = "64")]
    pub hidden_size: usize,

    /// Channels of the first convolution (doubled by the second)
    #[config(default = "16")]
    pub conv_channels: usize,

    /// Hidden size of the continuous imputation network
    #[config(default = "16")]
    pub missing_value_hidden_size: usize,

    /// Dropout rate before the head
    #[config(default = "0.1")]
    pub dropout: f64,
}

impl FusionModelConfig {
    /// Configuration sized for a dataset's columns and classes
    pub fn for_dataset(modality: Modality, dataset: &crate::data::dataset::MultimodalDataset) -> Self {
        Self::new(
            modality,
            dataset.num_classes(),
            dataset.category_dims(),
            dataset.num_continuous(),
        )
    }

    /// Reject configurations that cannot build a classifier
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.num_classes == 0 {
            return Err(Error::InvalidConfig("model needs at least one class".to_string()));
        }
        if self.modality.requires_tabular()
            && self.category_dims.is_empty()
            && self.num_continuous == 0
        {
            return Err(Error::InvalidConfig(format!(
                "{} model needs at least one tabular column",
                self.modality
            )));
        }
        if self.category_dims.iter().any(|&d| d == 0) {
            return Err(Error::InvalidConfig("categorical column with no classes".to_string()));
        }
        Ok(())
    }
}
