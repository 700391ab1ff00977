//! # octfuse: multimodal OCT diagnosis classifier
//!
//! octfuse trains and evaluates classifiers that combine a clinical table
//! (categorical and continuous columns) with OCT image slices organized per
//! patient, eye and scan date.
//!
//! ## Features
//!
//! - Tabular input from CSV/TSV exports, optionally gzipped
//! - Image volume discovery keyed by (patient, eye, scan date)
//! - Multimodal, image-only and tabular-only model routing
//! - Missing value handling with masks and learned imputation
//! - Plateau learning rate schedule, checkpoints and test reports
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use octfuse::data::dataset::{DatasetOptions, MultimodalDataset};
//! use octfuse::data::{DatasetConfig, SplitConfig};
//! use octfuse::model::{FusionModelConfig, Modality};
//! use octfuse::training::{TrainingConfig, trainer::Trainer};
//!
//! // Load, align and encode
//! let dataset = MultimodalDataset::from_file(
//!     "labels.csv",
//!     &DatasetConfig::default(),
//!     &DatasetOptions::default(),
//! ).unwrap();
//! let split = dataset.split(&SplitConfig::default()).unwrap();
//!
//! // Train the tabular branch only
//! let config = TrainingConfig { modality: Modality::TabularOnly, ..TrainingConfig::default() };
//! let model_config = FusionModelConfig::for_dataset(Modality::TabularOnly, &dataset);
//! let mut trainer = Trainer::<octfuse::TrainBackend>::new(config, model_config, Default::default());
//! let result = trainer.train(&dataset, &split).unwrap();
//! ```

pub mod cli;
pub mod data;
pub mod error;
pub mod eval;
pub mod model;
pub mod training;
pub mod utils;

use burn::backend::{Autodiff, NdArray};

/// Default backend type
pub type DefaultBackend = NdArray<f32>;

/// Backend used for training
pub type TrainBackend = Autodiff<DefaultBackend>;

/// Re-export commonly used types
pub use data::dataset::{MultimodalDataset, Sample};
pub use data::{DatasetConfig, SplitConfig};
pub use error::{Error, Result};
pub use model::{architecture::FusionModel, FusionModelConfig, Modality};
pub use training::trainer::{Trainer, TrainingResult};
pub use training::{TrainingConfig, TrainingHistory};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn info() -> String {
    format!(
        "{} v{} - multimodal OCT diagnosis classifier",
        NAME, VERSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info() {
        let info_str = info();
        assert!(info_str.contains("octfuse"));
        assert!(info_str.contains(VERSION));
    }
}
