//! Confusion matrix and per-class classification metrics

use serde::Serialize;
use std::fmt;

/// Fraction of positions where prediction and target agree
pub fn accuracy(predictions: &[usize], targets: &[usize]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let correct = predictions.iter()
        .zip(targets)
        .filter(|(p, t)| p == t)
        .count();
    correct as f64 / targets.len() as f64
}

/// Confusion matrix for multi-class classification
///
/// Element [i][j] represents count of samples with true label i predicted as j
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConfusionMatrix {
    matrix: Vec<Vec<usize>>,
    n_classes: usize,
}

impl ConfusionMatrix {
    /// Create a new confusion matrix with given number of classes
    pub fn new(n_classes: usize) -> Self {
        Self {
            matrix: vec![vec![0; n_classes]; n_classes],
            n_classes,
        }
    }

    /// Count prediction / target pairs; ids outside `[0, n_classes)` are ignored
    pub fn from_predictions(predictions: &[usize], targets: &[usize], n_classes: usize) -> Self {
        let mut cm = Self::new(n_classes);
        for (&pred, &truth) in predictions.iter().zip(targets) {
            if pred < n_classes && truth < n_classes {
                cm.matrix[truth][pred] += 1;
            }
        }
        cm
    }

    /// Rows of true classes, columns of predicted classes
    pub fn matrix(&self) -> &[Vec<usize>] {
        &self.matrix
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Get element at [true_label][predicted_label]
    pub fn get(&self, true_label: usize, predicted_label: usize) -> usize {
        self.matrix[true_label][predicted_label]
    }

    pub fn true_positives(&self, class: usize) -> usize {
        self.matrix[class][class]
    }

    /// Samples predicted as `class` that belong elsewhere
    pub fn false_positives(&self, class: usize) -> usize {
        (0..self.n_classes).filter(|&i| i != class).map(|i| self.matrix[i][class]).sum()
    }

    /// Samples of `class` predicted as something else
    pub fn false_negatives(&self, class: usize) -> usize {
        (0..self.n_classes).filter(|&j| j != class).map(|j| self.matrix[class][j]).sum()
    }

    /// Calculate support (total true instances) for a class
    pub fn support(&self, class: usize) -> usize {
        self.matrix[class].iter().sum()
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: usize = (0..self.n_classes).map(|i| self.matrix[i][i]).sum();
        correct as f64 / total as f64
    }
}

/// Precision, recall and F1 of one class
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn f1_score(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Per-class breakdown with macro and weighted averages
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub class_names: Vec<String>,
    pub per_class: Vec<ClassMetrics>,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
    pub accuracy: f64,
}

impl ClassificationReport {
    /// Build the report; classes without a name are shown by id
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_names: &[String]) -> Self {
        let per_class: Vec<ClassMetrics> = (0..cm.n_classes())
            .map(|c| {
                let tp = cm.true_positives(c);
                let precision = ratio(tp, tp + cm.false_positives(c));
                let recall = ratio(tp, tp + cm.false_negatives(c));
                ClassMetrics {
                    precision,
                    recall,
                    f1: f1_score(precision, recall),
                    support: cm.support(c),
                }
            })
            .collect();

        let total = cm.total();
        let n = per_class.len().max(1) as f64;
        let mut macro_avg = ClassMetrics { support: total, ..ClassMetrics::default() };
        let mut weighted_avg = macro_avg;
        for m in &per_class {
            macro_avg.precision += m.precision / n;
            macro_avg.recall += m.recall / n;
            macro_avg.f1 += m.f1 / n;

            let w = ratio(m.support, total);
            weighted_avg.precision += m.precision * w;
            weighted_avg.recall += m.recall * w;
            weighted_avg.f1 += m.f1 * w;
        }

        let class_names = (0..cm.n_classes())
            .map(|c| class_names.get(c).cloned().unwrap_or_else(|| format!("Class {}", c)))
            .collect();

        Self {
            class_names,
            per_class,
            macro_avg,
            weighted_avg,
            accuracy: cm.accuracy(),
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.class_names.iter()
            .map(|n| n.len())
            .max()
            .unwrap_or(0)
            .max(12);
        let row = |f: &mut fmt::Formatter<'_>, name: &str, m: &ClassMetrics| {
            writeln!(
                f,
                "{:>width$} {:>10.4} {:>10.4} {:>10.4} {:>10}",
                name, m.precision, m.recall, m.f1, m.support,
                width = width
            )
        };

        writeln!(
            f,
            "{:>width$} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support",
            width = width
        )?;
        writeln!(f, "{}", "-".repeat(width + 44))?;
        for (name, m) in self.class_names.iter().zip(&self.per_class) {
            row(f, name, m)?;
        }
        writeln!(f, "{}", "-".repeat(width + 44))?;
        row(f, "macro avg", &self.macro_avg)?;
        row(f, "weighted avg", &self.weighted_avg)?;
        writeln!(f)?;
        writeln!(f, "Accuracy: {:.4}", self.accuracy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_rows_are_truth() {
        let cm = ConfusionMatrix::from_predictions(&[0, 1, 1, 2, 0], &[0, 1, 0, 2, 1], 3);
        assert_eq!(cm.get(0, 0), 1);
        assert_eq!(cm.get(0, 1), 1);
        assert_eq!(cm.get(1, 0), 1);
        assert_eq!(cm.support(0), 2);
        assert_eq!(cm.total(), 5);
        assert!((cm.accuracy() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_fixed_class_count_keeps_unpredicted_classes() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0], &[0, 0], 3);
        assert_eq!(cm.n_classes(), 3);
        assert_eq!(cm.matrix()[2], vec![0, 0, 0]);
    }

    #[test]
    fn test_report_metrics() {
        let names = vec!["AMD".to_string(), "CNV".to_string()];
        // truth: AMD AMD AMD CNV, predicted: AMD AMD CNV CNV
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 1, 1], &[0, 0, 0, 1], 2);
        let report = ClassificationReport::from_confusion_matrix(&cm, &names);

        let amd = report.per_class[0];
        assert_eq!(amd.precision, 1.0);
        assert!((amd.recall - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(amd.support, 3);

        let cnv = report.per_class[1];
        assert_eq!(cnv.precision, 0.5);
        assert_eq!(cnv.recall, 1.0);

        assert!((report.macro_avg.precision - 0.75).abs() < 1e-12);
        assert!((report.weighted_avg.recall - 0.75).abs() < 1e-12);
        assert_eq!(report.accuracy, 0.75);

        let text = report.to_string();
        assert!(text.contains("AMD"));
        assert!(text.contains("weighted avg"));
        assert!(text.contains("Accuracy: 0.7500"));
    }

    #[test]
    fn test_accuracy_helper() {
        assert_eq!(accuracy(&[1, 0, 1], &[1, 1, 1]), 2.0 / 3.0);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }
}
