use crate::eval::TestReport;
use crate::model::Modality;
use crate::training::TrainingHistory;
use crate::utils::ensure_dir;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Consumer of the numeric artifacts of a run
pub trait ReportSink {
    /// Receive the complete per-epoch history after training
    fn write_history(&mut self, modality: Modality, history: &TrainingHistory) -> Result<()>;

    /// Receive the breakdown of the terminal test pass
    fn write_test_report(&mut self, modality: Modality, report: &TestReport) -> Result<()>;
}

/// Writes CSV and text reports into an output directory
pub struct FileReportSink {
    output_dir: PathBuf,
}

impl FileReportSink {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        ensure_dir(&output_dir)?;
        Ok(Self { output_dir })
    }

    /// `<output_dir>/<modality>_<suffix>`
    pub fn path(&self, modality: Modality, suffix: &str) -> PathBuf {
        self.output_dir.join(format!("{}_{}", modality, suffix))
    }

    fn write_confusion_matrix(&self, path: &Path, report: &TestReport) -> Result<()> {
        let names = &report.classification.class_names;
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {:?}", path))?;

        let mut header = vec![String::new()];
        header.extend(names.iter().cloned());
        writer.write_record(&header)?;

        for (name, row) in names.iter().zip(report.confusion.matrix()) {
            let mut record = vec![name.clone()];
            record.extend(row.iter().map(|c| c.to_string()));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl ReportSink for FileReportSink {
    fn write_history(&mut self, modality: Modality, history: &TrainingHistory) -> Result<()> {
        let path = self.path(modality, "training_history.csv");
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create {:?}", path))?;
        for record in history.epochs() {
            writer.serialize(record)?;
        }
        writer.flush()?;

        info!("Saved training history to {:?}", path);
        Ok(())
    }

    fn write_test_report(&mut self, modality: Modality, report: &TestReport) -> Result<()> {
        let matrix_path = self.path(modality, "confusion_matrix.csv");
        self.write_confusion_matrix(&matrix_path, report)?;

        let results_path = self.path(modality, "test_results.csv");
        let mut writer = csv::Writer::from_path(&results_path)
            .with_context(|| format!("Failed to create {:?}", results_path))?;
        for prediction in &report.predictions {
            writer.serialize(prediction)?;
        }
        writer.flush()?;

        let report_path = self.path(modality, "classification_report.txt");
        let text = format!(
            "Test Loss: {:.4}\nTest Accuracy: {:.4}\n\n{}",
            report.mean_loss, report.accuracy, report.classification
        );
        std::fs::write(&report_path, &text)
            .with_context(|| format!("Failed to write {:?}", report_path))?;

        info!("Test Loss: {:.4} - Test Accuracy: {:.4}", report.mean_loss, report.accuracy);
        info!("Classification Report:\n{}", report.classification);
        info!("Saved test results to {:?}", results_path);
        Ok(())
    }
}
