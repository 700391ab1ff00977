use crate::data::batcher::{batch_positions, MultimodalBatcher};
use crate::data::dataset::MultimodalDataset;
use crate::data::DatasetSplit;
use crate::error::Error;
use crate::eval::metrics::accuracy;
use crate::eval::{class_ids, evaluate, predicted_classes};
use crate::model::architecture::FusionModel;
use crate::model::checkpoint::{CheckpointManager, CheckpointMetadata};
use crate::model::FusionModelConfig;
use crate::training::callbacks::{CallbackManager, TrainingCallback};
use crate::training::{EpochRecord, TrainingConfig, TrainingHistory};
use crate::utils::random::seeded_rng;
use anyhow::Result;
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of a training run
#[derive(Debug)]
pub struct TrainingResult<B: AutodiffBackend> {
    /// Model after the last epoch
    pub model: FusionModel<B>,
    /// One record per completed epoch
    pub history: TrainingHistory,
    /// Path of the saved model record, if checkpointing was enabled
    pub checkpoint: Option<PathBuf>,
    /// Training duration in seconds
    pub duration_secs: f64,
}

/// Trainer for the fusion classifier
pub struct Trainer<B: AutodiffBackend> {
    /// Training configuration
    config: TrainingConfig,
    /// Model configuration
    model_config: FusionModelConfig,
    /// Device
    device: B::Device,
    /// Checkpoint manager
    checkpoint_manager: Option<CheckpointManager>,
    callbacks: CallbackManager,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Create new trainer
    pub fn new(config: TrainingConfig, model_config: FusionModelConfig, device: B::Device) -> Self {
        Self {
            config,
            model_config,
            device,
            checkpoint_manager: None,
            callbacks: CallbackManager::new(),
        }
    }

    /// Set checkpoint directory
    pub fn with_checkpoint_dir<P: AsRef<std::path::Path>>(mut self, checkpoint_dir: P) -> Result<Self> {
        self.checkpoint_manager = Some(CheckpointManager::new(checkpoint_dir)?);
        Ok(self)
    }

    /// Register a callback
    pub fn with_callback<C: TrainingCallback + 'static>(mut self, callback: C) -> Self {
        self.callbacks.add_callback(callback);
        self
    }

    /// Train on the train partition, validating on the validation partition each epoch
    pub fn train(&mut self, dataset: &MultimodalDataset, split: &DatasetSplit) -> Result<TrainingResult<B>> {
        self.config.validate()?;
        self.model_config.validate()?;

        let modality = self.config.modality;
        if split.train.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "training partition is empty ({} records, {} validation, {} test)",
                dataset.len(),
                split.val.len(),
                split.test.len()
            )).into());
        }

        let train_batcher = MultimodalBatcher::<B>::new(dataset, modality.requires_image(), self.device.clone());
        if modality.requires_image() && !train_batcher.collates_images() {
            return Err(Error::MissingModality { modality, field: "image" }.into());
        }
        let valid_batcher =
            MultimodalBatcher::<B::InnerBackend>::new(dataset, modality.requires_image(), self.device.clone());

        info!("Starting training {} model for {} epochs...", modality, self.config.epochs);
        debug!("Training configuration: {:?}", self.config);

        let start_time = Instant::now();
        B::seed(self.config.seed);
        let mut rng = seeded_rng(self.config.seed);

        let mut model = self.model_config.init::<B>(&self.device);
        let weight_decay = (self.config.weight_decay > 0.0)
            .then(|| WeightDecayConfig::new(self.config.weight_decay as f32));
        let mut optim = AdamConfig::new()
            .with_weight_decay(weight_decay)
            .init::<B, FusionModel<B>>();
        let mut scheduler = self.config.scheduler.build(self.config.learning_rate);

        let train_set = dataset.partition(&split.train);
        let val_set = dataset.partition(&split.val);
        if val_set.is_empty() {
            warn!("Validation partition is empty; the learning rate will not be adjusted");
        }

        let mut history = TrainingHistory::new();
        let mut last_val = (None, None);
        self.callbacks.on_train_begin(self.config.epochs);

        for epoch in 1..=self.config.epochs {
            let epoch_start = Instant::now();
            self.callbacks.on_epoch_begin(epoch);

            let shuffle_rng = if self.config.shuffle { Some(&mut rng) } else { None };
            let batches = batch_positions(train_set.len(), self.config.batch_size, shuffle_rng);
            let lr = scheduler.lr();

            let progress = if self.config.show_progress {
                ProgressBar::new(batches.len() as u64)
            } else {
                ProgressBar::hidden()
            };
            progress.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );

            let mut batch_losses = Vec::with_capacity(batches.len());
            let mut predictions = Vec::with_capacity(train_set.len());
            let mut targets = Vec::with_capacity(train_set.len());
            let mut non_finite_batches = 0;

            for (batch_idx, positions) in batches.iter().enumerate() {
                let batch = train_batcher.load(&train_set, positions)?;
                let input = modality.route(&batch)?;
                let output = model.forward_classification(input, batch.labels)?;

                let loss = output.loss.clone().into_scalar().elem::<f64>();
                if !check_loss(loss, epoch, batch_idx, self.config.fail_on_non_finite)? {
                    non_finite_batches += 1;
                    progress.inc(1);
                    continue;
                }

                predictions.extend(predicted_classes(output.logits.clone()));
                targets.extend(class_ids(output.targets.clone()));
                batch_losses.push(loss);

                let grads = output.loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optim.step(lr, model, grads);

                self.callbacks.on_batch_end(batch_idx, loss);
                progress.set_message(format!("loss: {:.4}", loss));
                progress.inc(1);
            }
            progress.finish_and_clear();

            let train_loss = mean(&batch_losses);
            let train_accuracy = accuracy(&predictions, &targets);

            let (learning_rate, val_loss, val_accuracy) = if val_set.is_empty() {
                (scheduler.lr(), None, None)
            } else {
                let val = evaluate(
                    &model.valid(),
                    modality,
                    &valid_batcher,
                    &val_set,
                    self.config.batch_size,
                )?;
                (scheduler.step(val.mean_loss), Some(val.mean_loss), Some(val.accuracy))
            };
            last_val = (val_loss, val_accuracy);

            let record = EpochRecord {
                epoch,
                train_loss,
                val_loss,
                train_accuracy,
                val_accuracy,
                learning_rate,
                epoch_duration: epoch_start.elapsed().as_secs_f64(),
                non_finite_batches,
            };
            history.push(record.clone());
            self.callbacks.on_epoch_end(&record, &history);
        }

        let checkpoint = match &self.checkpoint_manager {
            Some(manager) => {
                let metadata = CheckpointMetadata::new(
                    history.len(),
                    last_val.0,
                    last_val.1,
                    self.model_config.clone(),
                    self.config.clone(),
                    dataset.encoders().clone(),
                );
                Some(manager.save_final(&model, &optim, &metadata)?)
            }
            None => None,
        };

        self.callbacks.on_train_end(&history);

        Ok(TrainingResult {
            model,
            history,
            checkpoint,
            duration_secs: start_time.elapsed().as_secs_f64(),
        })
    }
}

/// Arithmetic mean, NaN when empty
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        f64::NAN
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// `Ok(true)` for a finite loss; a non-finite one is logged and skipped, or
/// fails the run when `fail` is set
fn check_loss(loss: f64, epoch: usize, batch: usize, fail: bool) -> crate::error::Result<bool> {
    if loss.is_finite() {
        return Ok(true);
    }
    if fail {
        return Err(Error::NonFiniteLoss { epoch, batch, loss });
    }
    warn!(
        "Non-finite loss ({}) in epoch {}, batch {}; skipping optimizer step",
        loss, epoch, batch
    );
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::DatasetOptions;
    use crate::data::imaging::ImageTransform;
    use crate::data::volumes::tests::{record, write_slices};
    use crate::data::{DatasetConfig, SplitConfig, Table};
    use crate::model::Modality;
    use burn::backend::{Autodiff, NdArray};
    use std::path::Path;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn schema() -> DatasetConfig {
        DatasetConfig {
            label_column: "label".to_string(),
            categorical_columns: vec!["eye".to_string()],
            continuous_columns: vec!["value".to_string()],
            ..DatasetConfig::default()
        }
    }

    fn dataset() -> MultimodalDataset {
        let records = (0..20)
            .map(|i| {
                let eye = if i % 2 == 0 { "L" } else { "R" };
                let label = if i % 2 == 0 { "AMD" } else { "CNV" };
                record(i, &i.to_string(), eye, "20210101", label)
            })
            .collect();
        MultimodalDataset::build(Table { records, ..Table::default() }, &schema(), &DatasetOptions::default())
            .unwrap()
    }

    /// Six patients; only patients 0 to 3 have slices on disk
    fn image_dataset(root: &Path) -> MultimodalDataset {
        let records = (0..6)
            .map(|i| {
                let label = if i % 2 == 0 { "AMD" } else { "CNV" };
                record(i, &i.to_string(), "L", "20210101", label)
            })
            .collect();
        for patient in 0..4 {
            write_slices(root, &format!("{}/L/20210101", patient), &["slice_0.png"]);
        }
        let options = DatasetOptions {
            image_root: Some(root.to_path_buf()),
            transform: ImageTransform::new(8),
            ..DatasetOptions::default()
        };
        MultimodalDataset::build(Table { records, ..Table::default() }, &schema(), &options).unwrap()
    }

    fn trainer(modality: Modality, dataset: &MultimodalDataset) -> Trainer<TestBackend> {
        let config = TrainingConfig {
            modality,
            ..TrainingConfig::quick_test()
        };
        let model_config = FusionModelConfig::for_dataset(modality, dataset).with_hidden_size(8);
        Trainer::new(config, model_config, Default::default())
    }

    #[test]
    fn test_tabular_training_records_history_and_checkpoint() {
        let tmp = TempDir::new().unwrap();
        let dataset = dataset();
        let split = dataset.split(&SplitConfig::default()).unwrap();

        let mut trainer = trainer(Modality::TabularOnly, &dataset)
            .with_checkpoint_dir(tmp.path())
            .unwrap();
        let result = trainer.train(&dataset, &split).unwrap();

        assert_eq!(result.history.len(), 2);
        for (i, record) in result.history.epochs().iter().enumerate() {
            assert_eq!(record.epoch, i + 1);
            assert!(record.train_loss.is_finite());
            assert!(record.val_loss.unwrap().is_finite());
            assert!((0.0..=1.0).contains(&record.val_accuracy.unwrap()));
            assert!((0.0..=1.0).contains(&record.train_accuracy));
            assert_eq!(record.non_finite_batches, 0);
        }

        let checkpoint = result.checkpoint.unwrap();
        assert!(checkpoint.exists());
        let metadata = CheckpointManager::new(tmp.path())
            .unwrap()
            .load_metadata(Modality::TabularOnly)
            .unwrap();
        assert_eq!(metadata.epoch, 2);
        assert_eq!(metadata.val_loss, result.history.last().unwrap().val_loss);
        assert_eq!(&metadata.encoders, dataset.encoders());
        assert_eq!(metadata.label_map, dataset.label_map());
    }

    #[test]
    fn test_image_modalities_train_with_partial_volumes() {
        let tmp = TempDir::new().unwrap();
        let dataset = image_dataset(tmp.path());
        assert!(dataset.has_images());
        assert!(dataset.image_path(0).is_some());
        assert!(dataset.image_path(4).is_none());

        // Patient 4 trains on a placeholder image, patient 5 validates on one
        let split = DatasetSplit { train: vec![0, 1, 2, 4], val: vec![3, 5], test: vec![] };
        for modality in [Modality::Multimodal, Modality::ImageOnly] {
            let config = TrainingConfig {
                modality,
                epochs: 1,
                batch_size: 2,
                ..TrainingConfig::quick_test()
            };
            let model_config = FusionModelConfig::for_dataset(modality, &dataset)
                .with_hidden_size(8)
                .with_conv_channels(4);
            let result = Trainer::<TestBackend>::new(config, model_config, Default::default())
                .train(&dataset, &split)
                .unwrap();

            assert_eq!(result.history.len(), 1);
            let record = &result.history.epochs()[0];
            assert!(record.train_loss.is_finite(), "{}", modality);
            assert!(record.val_loss.unwrap().is_finite(), "{}", modality);
            assert_eq!(record.non_finite_batches, 0);
        }
    }

    #[test]
    fn test_empty_training_partition_is_rejected() {
        let records = (0..3)
            .map(|i| record(i, "7", "L", "20210101", if i == 0 { "AMD" } else { "CNV" }))
            .collect();
        let dataset = MultimodalDataset::build(Table { records, ..Table::default() }, &schema(), &DatasetOptions::default())
            .unwrap();
        // One patient group cannot fill a 70% train share
        let split = dataset.split(&SplitConfig::default()).unwrap();
        assert!(split.train.is_empty());

        let tmp = TempDir::new().unwrap();
        let err = trainer(Modality::TabularOnly, &dataset)
            .with_checkpoint_dir(tmp.path())
            .unwrap()
            .train(&dataset, &split)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::InvalidConfig(_))));
        assert!(!tmp.path().join("final_tabular_only_model.mpk").exists());
    }

    #[test]
    fn test_training_without_validation_keeps_learning_rate() {
        let tmp = TempDir::new().unwrap();
        let dataset = dataset();
        let split = DatasetSplit {
            train: (0..16).collect(),
            val: vec![],
            test: (16..20).collect(),
        };

        let mut trainer = trainer(Modality::TabularOnly, &dataset)
            .with_checkpoint_dir(tmp.path())
            .unwrap();
        let result = trainer.train(&dataset, &split).unwrap();

        for record in result.history.epochs() {
            assert_eq!(record.val_loss, None);
            assert_eq!(record.val_accuracy, None);
            assert_eq!(record.learning_rate, 1e-3);
        }
        let metadata = CheckpointManager::new(tmp.path())
            .unwrap()
            .load_metadata(Modality::TabularOnly)
            .unwrap();
        assert_eq!(metadata.val_loss, None);
        assert_eq!(metadata.val_accuracy, None);
    }

    #[test]
    fn test_image_modality_without_images_fails_fast() {
        let dataset = dataset();
        let split = dataset.split(&SplitConfig::default()).unwrap();

        for modality in [Modality::Multimodal, Modality::ImageOnly] {
            let err = trainer(modality, &dataset).train(&dataset, &split).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<Error>(),
                Some(Error::MissingModality { field: "image", .. })
            ));
        }
    }

    #[test]
    fn test_non_finite_loss_policy() {
        assert!(check_loss(0.7, 1, 0, true).unwrap());
        assert!(!check_loss(f64::NAN, 1, 0, false).unwrap());
        assert!(matches!(
            check_loss(f64::INFINITY, 2, 3, true),
            Err(Error::NonFiniteLoss { epoch: 2, batch: 3, .. })
        ));
    }
}
