use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use tracing::info;

use crate::data::dataset::MultimodalDataset;
use crate::data::encoding::FittedEncoders;
use crate::error::Error;
use crate::model::architecture::FusionModel;
use crate::model::{FusionModelConfig, Modality};
use crate::training::TrainingConfig;

/// Checkpoint metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Crate version that wrote the checkpoint
    pub version: String,
    pub modality: Modality,
    /// Number of completed epochs
    pub epoch: usize,
    /// Validation loss of the last epoch; `None` without a validation partition
    pub val_loss: Option<f64>,
    /// Validation accuracy of the last epoch
    pub val_accuracy: Option<f64>,
    /// Model configuration
    pub model_config: FusionModelConfig,
    /// Training configuration
    pub training_config: TrainingConfig,
    /// Label strings indexed by class id
    pub label_map: Vec<String>,
    /// Category and label encoders fitted on the training table
    pub encoders: FittedEncoders,
    /// Timestamp
    pub timestamp: String,
}

impl CheckpointMetadata {
    /// Metadata stamped with the current time
    pub fn new(
        epoch: usize,
        val_loss: Option<f64>,
        val_accuracy: Option<f64>,
        model_config: FusionModelConfig,
        training_config: TrainingConfig,
        encoders: FittedEncoders,
    ) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            modality: model_config.modality,
            epoch,
            val_loss: val_loss.filter(|v| v.is_finite()),
            val_accuracy: val_accuracy.filter(|v| v.is_finite()),
            model_config,
            training_config,
            label_map: encoders.label.classes().to_vec(),
            encoders,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Ensure a dataset feeds the saved model the inputs it was built for
    pub fn check_dataset(&self, dataset: &MultimodalDataset) -> crate::error::Result<()> {
        let config = &self.model_config;
        if dataset.category_dims() != config.category_dims {
            return Err(Error::InvalidConfig(format!(
                "category cardinalities {:?} differ from the model's {:?}",
                dataset.category_dims(),
                config.category_dims
            )));
        }
        if dataset.num_continuous() != config.num_continuous {
            return Err(Error::InvalidConfig(format!(
                "{} continuous columns given, the model expects {}",
                dataset.num_continuous(),
                config.num_continuous
            )));
        }
        if dataset.label_map() != self.label_map.as_slice() {
            return Err(Error::InvalidConfig(format!(
                "label set {:?} differs from the model's {:?}",
                dataset.label_map(),
                self.label_map
            )));
        }
        Ok(())
    }
}

/// Checkpoint manager for the final model of each modality
pub struct CheckpointManager {
    /// Directory to save checkpoints
    checkpoint_dir: PathBuf,
}

impl CheckpointManager {
    /// Create new checkpoint manager
    pub fn new<P: AsRef<Path>>(checkpoint_dir: P) -> Result<Self> {
        let checkpoint_dir = checkpoint_dir.as_ref().to_path_buf();
        fs::create_dir_all(&checkpoint_dir)
            .context("Failed to create checkpoint directory")?;

        Ok(Self { checkpoint_dir })
    }

    /// Model record path (the recorder adds `.mpk`)
    pub fn model_path(&self, modality: Modality) -> PathBuf {
        self.checkpoint_dir.join(format!("final_{}_model", modality))
    }

    /// Optimizer record path (the recorder adds `.mpk`)
    pub fn optimizer_path(&self, modality: Modality) -> PathBuf {
        self.checkpoint_dir.join(format!("final_{}_optimizer", modality))
    }

    /// Metadata JSON path
    pub fn metadata_path(&self, modality: Modality) -> PathBuf {
        self.checkpoint_dir.join(format!("final_{}_model.json", modality))
    }

    /// Save model parameters, optimizer state and metadata
    pub fn save_final<B, O>(
        &self,
        model: &FusionModel<B>,
        optim: &O,
        metadata: &CheckpointMetadata,
    ) -> Result<PathBuf>
    where
        B: AutodiffBackend,
        O: Optimizer<FusionModel<B>, B>,
    {
        let recorder = CompactRecorder::new();
        let model_path = self.model_path(metadata.modality);

        recorder
            .record(model.valid().into_record(), model_path.clone())
            .context("Failed to save model checkpoint")?;
        recorder
            .record(optim.to_record(), self.optimizer_path(metadata.modality))
            .context("Failed to save optimizer state")?;

        let metadata_json = serde_json::to_string_pretty(metadata)
            .context("Failed to serialize metadata")?;
        fs::write(self.metadata_path(metadata.modality), metadata_json)
            .context("Failed to write metadata file")?;

        info!("Saved final {} model to {:?}", metadata.modality, model_path);
        Ok(model_path.with_extension("mpk"))
    }

    /// Read the metadata of a saved model
    pub fn load_metadata(&self, modality: Modality) -> Result<CheckpointMetadata> {
        let path = self.metadata_path(modality);
        let metadata_json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read metadata file {:?}", path))?;
        serde_json::from_str(&metadata_json)
            .with_context(|| format!("Failed to parse metadata file {:?}", path))
    }

    /// Rebuild the saved model of a modality for inference
    pub fn load_final<B: Backend>(
        &self,
        modality: Modality,
        device: &B::Device,
    ) -> Result<(FusionModel<B>, CheckpointMetadata)> {
        let metadata = self.load_metadata(modality)?;
        let model_path = self.model_path(modality);
        info!("Loading checkpoint from {:?}", model_path);

        let record = CompactRecorder::new()
            .load(model_path, device)
            .context("Failed to load model checkpoint")?;
        let model = metadata.model_config.init::<B>(device).load_record(record);

        info!("Loaded checkpoint from epoch {}", metadata.epoch);
        Ok((model, metadata))
    }
}
