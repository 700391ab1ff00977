use crate::training::{EpochRecord, TrainingHistory};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Training callback trait
///
/// Callbacks allow custom actions to be performed at various points during training.
pub trait TrainingCallback: Send + Sync {
    /// Called at the start of training
    fn on_train_begin(&mut self, _total_epochs: usize) {}

    /// Called at the end of training
    fn on_train_end(&mut self, _history: &TrainingHistory) {}

    /// Called at the start of each epoch (1-based)
    fn on_epoch_begin(&mut self, _epoch: usize) {}

    /// Called once the epoch's record has been appended to the history
    fn on_epoch_end(&mut self, _record: &EpochRecord, _history: &TrainingHistory) {}

    /// Called after each optimizer step
    fn on_batch_end(&mut self, _batch: usize, _loss: f64) {}
}

/// Callback manager that handles multiple callbacks
#[derive(Default)]
pub struct CallbackManager {
    callbacks: Vec<Box<dyn TrainingCallback>>,
}

impl CallbackManager {
    /// Create new callback manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback
    pub fn add_callback<C: TrainingCallback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn on_train_begin(&mut self, total_epochs: usize) {
        for callback in &mut self.callbacks {
            callback.on_train_begin(total_epochs);
        }
    }

    pub fn on_train_end(&mut self, history: &TrainingHistory) {
        for callback in &mut self.callbacks {
            callback.on_train_end(history);
        }
    }

    pub fn on_epoch_begin(&mut self, epoch: usize) {
        for callback in &mut self.callbacks {
            callback.on_epoch_begin(epoch);
        }
    }

    pub fn on_epoch_end(&mut self, record: &EpochRecord, history: &TrainingHistory) {
        for callback in &mut self.callbacks {
            callback.on_epoch_end(record, history);
        }
    }

    pub fn on_batch_end(&mut self, batch: usize, loss: f64) {
        for callback in &mut self.callbacks {
            callback.on_batch_end(batch, loss);
        }
    }
}

/// Logs the per-epoch summary lines
pub struct ProgressLoggerCallback {
    total_epochs: usize,
}

impl ProgressLoggerCallback {
    pub fn new() -> Self {
        Self { total_epochs: 0 }
    }
}

impl Default for ProgressLoggerCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingCallback for ProgressLoggerCallback {
    fn on_train_begin(&mut self, total_epochs: usize) {
        self.total_epochs = total_epochs;
    }

    fn on_epoch_end(&mut self, record: &EpochRecord, _history: &TrainingHistory) {
        tracing::info!(
            "Epoch {}/{} - {:.2}s - lr: {:.6}",
            record.epoch,
            self.total_epochs,
            record.epoch_duration,
            record.learning_rate
        );
        tracing::info!(
            "  Train Loss: {:.4} - Train Acc: {:.4}",
            record.train_loss,
            record.train_accuracy
        );
        match (record.val_loss, record.val_accuracy) {
            (Some(loss), Some(acc)) => tracing::info!("  Val Loss: {:.4} - Val Acc: {:.4}", loss, acc),
            _ => tracing::info!("  Val Loss: n/a - Val Acc: n/a"),
        }
        if record.non_finite_batches > 0 {
            tracing::warn!(
                "  {} batches had a non-finite loss",
                record.non_finite_batches
            );
        }
    }
}

/// Rewrites the JSON history file after every epoch
pub struct MetricsLoggerCallback {
    log_file: PathBuf,
}

impl MetricsLoggerCallback {
    /// Create new metrics logger
    pub fn new<P: AsRef<Path>>(log_file: P) -> Self {
        Self {
            log_file: log_file.as_ref().to_path_buf(),
        }
    }

    /// Save metrics to file
    fn save_metrics(&self, history: &TrainingHistory) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(history.epochs())?;
        std::fs::write(&self.log_file, json)?;
        Ok(())
    }
}

impl TrainingCallback for MetricsLoggerCallback {
    fn on_epoch_end(&mut self, _record: &EpochRecord, history: &TrainingHistory) {
        if let Err(e) = self.save_metrics(history) {
            tracing::warn!("Failed to save metrics: {}", e);
        }
    }

    fn on_train_end(&mut self, history: &TrainingHistory) {
        if let Err(e) = self.save_metrics(history) {
            tracing::warn!("Failed to save final metrics: {}", e);
        }
    }
}

/// Timer callback that tracks training time
#[derive(Default)]
pub struct TimerCallback {
    start_time: Option<Instant>,
}

impl TimerCallback {
    /// Create new timer callback
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrainingCallback for TimerCallback {
    fn on_train_begin(&mut self, total_epochs: usize) {
        self.start_time = Some(Instant::now());
        tracing::info!("Training started ({} epochs)", total_epochs);
    }

    fn on_train_end(&mut self, history: &TrainingHistory) {
        if let Some(start) = self.start_time {
            tracing::info!(
                "Training completed in {:.2?} ({} epochs, {:.2}s in epochs)",
                start.elapsed(),
                history.len(),
                history.total_duration()
            );
        }
        if let Some(acc) = history.last().and_then(|last| last.val_accuracy) {
            tracing::info!("Final validation accuracy: {:.4}", acc);
        }
    }
}
