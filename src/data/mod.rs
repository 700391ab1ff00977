pub mod align;
pub mod batcher;
pub mod dataset;
pub mod encoding;
pub mod imaging;
pub mod loader;
pub mod volumes;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Token substituted for absent categorical values before encoding
pub const MISSING_TOKEN: &str = "MISSING_VALUE";

/// Default categorical columns of the clinical table
pub const DEFAULT_CATEGORICAL_COLUMNS: &[&str] = &[
    "Laterality", "SEX", "CIGARETTES_YN", "SMOKING_TOB_USE_NAME",
    "SMOKELESS_TOB_USE_NAME", "TOBACCO_USER_NAME", "ALCOHOL_USE_NAME",
    "ILL_DRUG_USER_NAME", "VA (Closest to Dx)", "PRIMARY_DX_YN",
];

/// Default continuous columns of the clinical table
pub const DEFAULT_CONTINUOUS_COLUMNS: &[&str] = &[
    "BIRTH_YEAR", "BIRTH_MONTH", "BIRTH_DAY",
    "VISION_YEAR", "VISION_MONTH", "VISION_DAY",
    "DIAGNOSIS_YEAR", "DIAGNOSIS_MONTH", "DIAGNOSIS_DAY",
];

/// Column schema of the tabular input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatasetConfig {
    /// Target label column
    pub label_column: String,
    /// Categorical feature columns, in model input order
    pub categorical_columns: Vec<String>,
    /// Continuous feature columns, in model input order
    pub continuous_columns: Vec<String>,
    /// Patient identifier column (volume key)
    pub patient_column: String,
    /// Eye column holding `L` or `R` (volume key)
    pub laterality_column: String,
    /// Scan date column (volume key)
    pub date_column: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            label_column: "Diagnosis Label".to_string(),
            categorical_columns: DEFAULT_CATEGORICAL_COLUMNS.iter().map(|s| s.to_string()).collect(),
            continuous_columns: DEFAULT_CONTINUOUS_COLUMNS.iter().map(|s| s.to_string()).collect(),
            patient_column: "Patient Number".to_string(),
            laterality_column: "Laterality".to_string(),
            date_column: "Diagnosis Date".to_string(),
        }
    }
}

impl DatasetConfig {
    /// Load a column schema from a JSON file
    pub fn from_json_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file {:?}", path))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse schema file {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the schema can produce a sample
    pub fn validate(&self) -> Result<()> {
        if self.label_column.is_empty() {
            return Err(Error::InvalidConfig("label column name is empty".to_string()));
        }
        if self.categorical_columns.is_empty() && self.continuous_columns.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one categorical or continuous column is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Eye of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Laterality {
    Left,
    Right,
}

impl Laterality {
    /// Both eyes, in folder lookup order
    pub const ALL: [Laterality; 2] = [Laterality::Left, Laterality::Right];

    /// Folder / table code
    pub fn as_str(&self) -> &'static str {
        match self {
            Laterality::Left => "L",
            Laterality::Right => "R",
        }
    }

    /// Parse the `L` / `R` code
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "L" => Some(Laterality::Left),
            "R" => Some(Laterality::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Laterality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite key of an image volume: (patient, eye, scan date)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VolumeKey {
    pub patient: u64,
    pub laterality: Laterality,
    pub scan_date: u64,
}

impl VolumeKey {
    pub fn new(patient: u64, laterality: Laterality, scan_date: u64) -> Self {
        Self { patient, laterality, scan_date }
    }
}

impl fmt::Display for VolumeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.patient, self.laterality, self.scan_date)
    }
}

/// Parse an integer key field, accepting spreadsheet floats such as `12.0`
pub fn parse_integer_field(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Ok(v) = s.parse::<u64>() {
        return Some(v);
    }
    s.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0)
        .map(|v| v as u64)
}

/// One labelled row of the clinical table
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Zero-based data row in the source file
    pub row: usize,
    /// Raw categorical values, aligned with `DatasetConfig::categorical_columns`
    pub categorical: Vec<Option<String>>,
    /// Continuous values, aligned with `DatasetConfig::continuous_columns`
    pub continuous: Vec<Option<f32>>,
    /// Diagnosis label (never empty)
    pub label: String,
    /// Patient identifier as written in the table
    pub patient_id: Option<String>,
    /// Eye code as written in the table
    pub laterality: Option<String>,
    /// Normalized scan date (`-` removed)
    pub scan_date: Option<String>,
}

impl Record {
    /// Composite volume key, if all three key fields parse
    pub fn volume_key(&self) -> Option<VolumeKey> {
        let patient = parse_integer_field(self.patient_id.as_deref()?)?;
        let laterality = Laterality::parse(self.laterality.as_deref()?)?;
        let scan_date = parse_integer_field(self.scan_date.as_deref()?)?;
        Some(VolumeKey::new(patient, laterality, scan_date))
    }
}

/// Clinical table after loading
#[derive(Debug, Clone, Default)]
pub struct Table {
    /// Retained (labelled) records in file order
    pub records: Vec<Record>,
    /// Rows dropped because the label was missing
    pub dropped_unlabeled: usize,
    /// Continuous cells that were present but not a finite number
    pub invalid_continuous: usize,
}

impl Table {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Dataset split configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Training set ratio
    pub train_ratio: f32,
    /// Validation set ratio
    pub val_ratio: f32,
    /// Test set ratio
    pub test_ratio: f32,
    /// Random seed
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_ratio: 0.7,
            val_ratio: 0.1,
            test_ratio: 0.2,
            seed: 2026,
        }
    }
}

impl SplitConfig {
    /// Reject ratios that cannot describe a partition
    pub fn validate(&self) -> Result<()> {
        let ratios = [self.train_ratio, self.val_ratio, self.test_ratio];
        if ratios.iter().any(|r| !(0.0..=1.0).contains(r)) {
            return Err(Error::InvalidConfig(format!("split ratios must be in [0, 1], got {:?}", ratios)));
        }
        let total: f32 = ratios.iter().sum();
        if (total - 1.0).abs() > 1e-4 {
            return Err(Error::InvalidConfig(format!("split ratios must sum to 1, got {}", total)));
        }
        Ok(())
    }
}

/// Row indices of each partition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetSplit {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
}

impl DatasetSplit {
    /// Total number of indexed rows
    pub fn total_samples(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(patient: &str, eye: &str, date: &str) -> Record {
        Record {
            row: 0,
            categorical: vec![],
            continuous: vec![],
            label: "AMD".to_string(),
            patient_id: Some(patient.to_string()),
            laterality: Some(eye.to_string()),
            scan_date: Some(date.to_string()),
        }
    }

    #[test]
    fn test_volume_key_parsing() {
        let key = record("12", "L", "20210315").volume_key().unwrap();
        assert_eq!(key, VolumeKey::new(12, Laterality::Left, 20210315));
        assert_eq!(key.to_string(), "12_L_20210315");

        // Spreadsheet exports write integer ids as floats
        assert_eq!(record("12.0", "R", "20210315").volume_key().unwrap().patient, 12);
    }

    #[test]
    fn test_volume_key_rejects_malformed_fields() {
        assert!(record("abc", "L", "20210315").volume_key().is_none());
        assert!(record("12", "X", "20210315").volume_key().is_none());
        assert!(record("12", "L", "20210315 00:00:00").volume_key().is_none());
        assert!(record("12.5", "L", "20210315").volume_key().is_none());
    }

    #[test]
    fn test_split_config_validation() {
        assert!(SplitConfig::default().validate().is_ok());

        let bad = SplitConfig { train_ratio: 0.9, ..SplitConfig::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_dataset_config_validation() {
        assert!(DatasetConfig::default().validate().is_ok());

        let empty = DatasetConfig {
            categorical_columns: vec![],
            continuous_columns: vec![],
            ..DatasetConfig::default()
        };
        assert!(matches!(empty.validate(), Err(Error::InvalidConfig(_))));
    }
}
