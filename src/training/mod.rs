pub mod callbacks;
pub mod scheduler;
pub mod trainer;

use crate::error::{Error, Result};
use crate::model::Modality;
use crate::training::scheduler::LearningRateScheduler;
use serde::{Deserialize, Serialize};

/// Learning rate schedule selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SchedulerConfig {
    /// Keep the initial learning rate
    Constant,
    /// Decay when validation loss stops improving
    ReduceOnPlateau {
        factor: f64,
        patience: usize,
        min_lr: f64,
    },
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::ReduceOnPlateau {
            factor: 0.5,
            patience: 3,
            min_lr: 0.0,
        }
    }
}

impl SchedulerConfig {
    /// Build the scheduler starting at `lr`
    pub fn build(&self, lr: f64) -> LearningRateScheduler {
        match *self {
            Self::Constant => LearningRateScheduler::constant(lr),
            Self::ReduceOnPlateau { factor, patience, min_lr } => {
                LearningRateScheduler::reduce_on_plateau(lr, factor, patience, min_lr)
            }
        }
    }
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Model inputs used for training
    pub modality: Modality,
    /// Number of training epochs
    pub epochs: usize,
    /// Batch size
    pub batch_size: usize,
    /// Initial learning rate
    pub learning_rate: f64,
    /// Weight decay (L2 regularization), 0 disables it
    pub weight_decay: f64,
    /// Learning rate schedule
    pub scheduler: SchedulerConfig,
    /// Random seed for parameter init and batch shuffling
    pub seed: u64,
    /// Shuffle training batches each epoch
    pub shuffle: bool,
    /// Show a per-batch progress bar
    pub show_progress: bool,
    /// Abort on a NaN or infinite batch loss instead of counting it
    pub fail_on_non_finite: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            modality: Modality::Multimodal,
            epochs: 10,
            batch_size: 16,
            learning_rate: 1e-4,
            weight_decay: 1e-5,
            scheduler: SchedulerConfig::default(),
            seed: 2026,
            shuffle: true,
            show_progress: true,
            fail_on_non_finite: false,
        }
    }
}

impl TrainingConfig {
    /// Create configuration for quick testing
    pub fn quick_test() -> Self {
        Self {
            epochs: 2,
            batch_size: 4,
            learning_rate: 1e-3,
            show_progress: false,
            ..Default::default()
        }
    }

    /// Reject values the training loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be positive".to_string()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.weight_decay < 0.0 {
            return Err(Error::InvalidConfig("weight decay must not be negative".to_string()));
        }
        if let SchedulerConfig::ReduceOnPlateau { factor, .. } = self.scheduler {
            if !(factor > 0.0 && factor < 1.0) {
                return Err(Error::InvalidConfig(format!(
                    "plateau factor must be in (0, 1), got {}",
                    factor
                )));
            }
        }
        Ok(())
    }
}

/// Metrics of one completed epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based epoch number
    pub epoch: usize,
    pub train_loss: f64,
    /// `None` when the validation partition is empty
    pub val_loss: Option<f64>,
    pub train_accuracy: f64,
    pub val_accuracy: Option<f64>,
    /// Learning rate after the scheduler step of this epoch
    pub learning_rate: f64,
    /// Wall time in seconds
    pub epoch_duration: f64,
    /// Training batches whose loss was NaN or infinite
    pub non_finite_batches: usize,
}

/// Append-only per-epoch history of a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed epoch
    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn epochs(&self) -> &[EpochRecord] {
        &self.epochs
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Sum of epoch durations in seconds
    pub fn total_duration(&self) -> f64 {
        self.epochs.iter().map(|e| e.epoch_duration).sum()
    }
}
