pub mod metrics;
pub mod report;

use crate::data::batcher::{batch_positions, MultimodalBatcher};
use crate::data::dataset::Partition;
use crate::error::Result;
use crate::eval::metrics::{accuracy, ClassificationReport, ConfusionMatrix};
use crate::model::architecture::FusionModel;
use crate::model::Modality;
use burn::prelude::*;
use burn::tensor::ElementConversion;
use serde::Serialize;
use tracing::{debug, warn};

/// Aggregates of a forward-only pass
///
/// Both aggregates are NaN for an empty partition.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    /// Mean of per-batch mean losses
    pub mean_loss: f64,
    pub accuracy: f64,
    pub predictions: Vec<usize>,
    pub targets: Vec<usize>,
}

/// Class ids of the highest score per row
pub fn predicted_classes<B: Backend>(logits: Tensor<B, 2>) -> Vec<usize> {
    logits.argmax(1)
        .flatten::<1>(0, 1)
        .into_data()
        .iter::<i64>()
        .map(|c| c as usize)
        .collect()
}

/// Class ids held in a label tensor
pub fn class_ids<B: Backend>(labels: Tensor<B, 1, Int>) -> Vec<usize> {
    labels.into_data()
        .iter::<i64>()
        .map(|c| c as usize)
        .collect()
}

/// Forward-only pass over a partition, in partition order
///
/// Pass a model that does not track gradients (`AutodiffModule::valid`).
pub fn evaluate<B: Backend>(
    model: &FusionModel<B>,
    modality: Modality,
    batcher: &MultimodalBatcher<B>,
    partition: &Partition<'_>,
    batch_size: usize,
) -> Result<EvalOutcome> {
    let mut batch_losses = Vec::new();
    let mut predictions = Vec::with_capacity(partition.len());
    let mut targets = Vec::with_capacity(partition.len());

    for positions in batch_positions(partition.len(), batch_size, None) {
        let batch = batcher.load(partition, &positions)?;
        let input = modality.route(&batch)?;
        let output = model.forward_classification(input, batch.labels)?;

        batch_losses.push(output.loss.into_scalar().elem::<f64>());
        predictions.extend(predicted_classes(output.logits));
        targets.extend(class_ids(output.targets));
    }

    if batch_losses.is_empty() {
        warn!("Evaluating an empty partition");
        return Ok(EvalOutcome {
            mean_loss: f64::NAN,
            accuracy: f64::NAN,
            predictions,
            targets,
        });
    }
    let mean_loss = batch_losses.iter().sum::<f64>() / batch_losses.len() as f64;
    debug!("Evaluated {} samples in {} batches", targets.len(), batch_losses.len());

    Ok(EvalOutcome {
        mean_loss,
        accuracy: accuracy(&predictions, &targets),
        predictions,
        targets,
    })
}

/// One row of the prediction dump
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    #[serde(rename = "True")]
    pub true_class: usize,
    #[serde(rename = "Predicted")]
    pub predicted_class: usize,
    #[serde(rename = "True_Label")]
    pub true_label: String,
    #[serde(rename = "Predicted_Label")]
    pub predicted_label: String,
}

/// Full breakdown of the terminal test pass
#[derive(Debug, Clone, PartialEq)]
pub struct TestReport {
    pub mean_loss: f64,
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
    pub classification: ClassificationReport,
    pub predictions: Vec<PredictionRecord>,
}

impl TestReport {
    /// Derive the breakdown from an evaluation and the label map
    pub fn from_outcome(outcome: &EvalOutcome, label_map: &[String]) -> Self {
        let n_classes = label_map.len();
        let confusion = ConfusionMatrix::from_predictions(&outcome.predictions, &outcome.targets, n_classes);
        let classification = ClassificationReport::from_confusion_matrix(&confusion, label_map);

        let decode = |c: usize| label_map.get(c).cloned().unwrap_or_else(|| c.to_string());
        let predictions = outcome.targets.iter()
            .zip(&outcome.predictions)
            .map(|(&t, &p)| PredictionRecord {
                true_class: t,
                predicted_class: p,
                true_label: decode(t),
                predicted_label: decode(p),
            })
            .collect();

        Self {
            mean_loss: outcome.mean_loss,
            accuracy: outcome.accuracy,
            confusion,
            classification,
            predictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::{DatasetOptions, MultimodalDataset};
    use crate::data::volumes::tests::record;
    use crate::data::{DatasetConfig, Table};
    use crate::model::FusionModelConfig;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn dataset() -> MultimodalDataset {
        let records = (0..9)
            .map(|i| {
                let eye = if i % 2 == 0 { "L" } else { "R" };
                let label = ["AMD", "CNV", "GA"][i % 3];
                record(i, &i.to_string(), eye, "20210101", label)
            })
            .collect();
        let config = DatasetConfig {
            label_column: "label".to_string(),
            categorical_columns: vec!["eye".to_string()],
            continuous_columns: vec!["value".to_string()],
            ..DatasetConfig::default()
        };
        MultimodalDataset::build(Table { records, ..Table::default() }, &config, &DatasetOptions::default())
            .unwrap()
    }

    #[test]
    fn test_evaluate_is_repeatable() {
        let dataset = dataset();
        let device = Default::default();
        let model = FusionModelConfig::for_dataset(Modality::TabularOnly, &dataset)
            .init::<TestBackend>(&device);
        let batcher = MultimodalBatcher::new(&dataset, false, device);
        let indices: Vec<usize> = (0..dataset.len()).collect();
        let partition = dataset.partition(&indices);

        let first = evaluate(&model, Modality::TabularOnly, &batcher, &partition, 4).unwrap();
        let second = evaluate(&model, Modality::TabularOnly, &batcher, &partition, 4).unwrap();

        assert_eq!(first.targets, vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
        assert_eq!(first.predictions.len(), 9);
        assert!((first.mean_loss - second.mean_loss).abs() < 1e-6);
        assert_eq!(first.accuracy, second.accuracy);
        assert_eq!(first.predictions, second.predictions);
    }

    #[test]
    fn test_empty_partition_has_no_metrics() {
        let dataset = dataset();
        let device = Default::default();
        let model = FusionModelConfig::for_dataset(Modality::TabularOnly, &dataset)
            .init::<TestBackend>(&device);
        let batcher = MultimodalBatcher::new(&dataset, false, device);

        let outcome = evaluate(&model, Modality::TabularOnly, &batcher, &dataset.partition(&[]), 4).unwrap();
        assert!(outcome.mean_loss.is_nan());
        assert!(outcome.accuracy.is_nan());
        assert!(outcome.predictions.is_empty());
    }

    #[test]
    fn test_multimodal_evaluation_without_images_fails() {
        let dataset = dataset();
        let device = Default::default();
        let model = FusionModelConfig::for_dataset(Modality::Multimodal, &dataset)
            .init::<TestBackend>(&device);
        let batcher = MultimodalBatcher::new(&dataset, true, device);
        let indices = vec![0, 1];

        let err = evaluate(&model, Modality::Multimodal, &batcher, &dataset.partition(&indices), 2)
            .unwrap_err();
        assert!(matches!(err, crate::Error::MissingModality { .. }));
    }

    #[test]
    fn test_report_decodes_labels() {
        let outcome = EvalOutcome {
            mean_loss: 0.4,
            accuracy: 0.5,
            predictions: vec![1, 1],
            targets: vec![0, 1],
        };
        let labels = vec!["AMD".to_string(), "CNV".to_string()];
        let report = TestReport::from_outcome(&outcome, &labels);

        assert_eq!(report.confusion.get(0, 1), 1);
        assert_eq!(report.predictions[0].true_label, "AMD");
        assert_eq!(report.predictions[0].predicted_label, "CNV");
        assert_eq!(report.classification.class_names, labels);
    }
}
