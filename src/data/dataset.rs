use crate::data::align::{AlignedTable, Aligner, MergePolicy};
use crate::data::encoding::{EncodedRecord, FittedEncoders};
use crate::data::imaging::{load_image, ImagePixels, ImageTransform};
use crate::data::loader::TabularLoader;
use crate::data::volumes::VolumeIndex;
use crate::data::{DatasetConfig, DatasetSplit, SplitConfig, Table, VolumeKey};
use crate::error::{Error, Result};
use crate::utils::random::seeded_rng;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One training sample, materialized on access
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub categorical: Vec<usize>,
    /// Continuous values with missing entries set to 0
    pub continuous: Vec<f32>,
    /// `true` where the continuous value was observed
    pub continuous_mask: Vec<bool>,
    pub label: usize,
    pub image: Option<ImagePixels>,
}

/// Image-side options for dataset construction
#[derive(Debug, Clone, Default)]
pub struct DatasetOptions {
    /// Root of the per-patient image tree
    pub image_root: Option<PathBuf>,
    pub merge_policy: MergePolicy,
    pub transform: ImageTransform,
}

/// Encoded clinical table with optional image references
#[derive(Debug, Clone)]
pub struct MultimodalDataset {
    records: Vec<EncodedRecord>,
    patients: Vec<Option<String>>,
    image_paths: Vec<Option<PathBuf>>,
    has_images: bool,
    encoders: FittedEncoders,
    num_continuous: usize,
    volumes: Option<VolumeIndex>,
    transform: ImageTransform,
}

impl MultimodalDataset {
    /// Load the table, discover images, align and encode
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        config: &DatasetConfig,
        options: &DatasetOptions,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let table = TabularLoader::new(config.clone()).load(path)?;
        Self::build(table, config, options)
    }

    /// Load a table for a trained model, encoding it with that model's encoders
    ///
    /// A category or label the encoders never saw is an
    /// [`Error::UnseenCategory`].
    pub fn from_file_with_encoders<P: AsRef<Path>>(
        path: P,
        config: &DatasetConfig,
        options: &DatasetOptions,
        encoders: FittedEncoders,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        encoders.check_schema(config)?;
        let table = TabularLoader::new(config.clone()).load(path)?;
        Self::build_with_encoders(table, config, options, encoders)
    }

    /// Align and encode an already loaded table
    pub fn build(table: Table, config: &DatasetConfig, options: &DatasetOptions) -> anyhow::Result<Self> {
        options.transform.validate()?;
        let aligned = Aligner::new(options.merge_policy)
            .align(table, options.image_root.as_deref())?;
        Ok(Self::from_aligned(aligned, config, options.transform)?)
    }

    /// Align a loaded table and encode it with previously fitted encoders
    pub fn build_with_encoders(
        table: Table,
        config: &DatasetConfig,
        options: &DatasetOptions,
        encoders: FittedEncoders,
    ) -> anyhow::Result<Self> {
        options.transform.validate()?;
        let aligned = Aligner::new(options.merge_policy)
            .align(table, options.image_root.as_deref())?;
        Ok(Self::with_encoders(aligned, config, encoders, options.transform)?)
    }

    /// Fit the encoders over every aligned record and encode them
    pub fn from_aligned(
        aligned: AlignedTable,
        config: &DatasetConfig,
        transform: ImageTransform,
    ) -> Result<Self> {
        let encoders = FittedEncoders::fit(&aligned.records, config)?;
        Self::with_encoders(aligned, config, encoders, transform)
    }

    /// Encode aligned records without refitting
    pub fn with_encoders(
        aligned: AlignedTable,
        config: &DatasetConfig,
        encoders: FittedEncoders,
        transform: ImageTransform,
    ) -> Result<Self> {
        encoders.check_schema(config)?;
        let records = aligned.records.iter()
            .map(|r| encoders.transform(r))
            .collect::<Result<Vec<_>>>()?;
        let patients = aligned.records.into_iter().map(|r| r.patient_id).collect();

        info!(
            "Encoded {} records: {} categorical columns {:?}, {} continuous columns, {} classes",
            records.len(),
            encoders.categorical.len(),
            encoders.category_dims(),
            config.continuous_columns.len(),
            encoders.num_classes()
        );

        Ok(Self {
            records,
            patients,
            image_paths: aligned.image_paths,
            has_images: aligned.has_images,
            encoders,
            num_continuous: config.continuous_columns.len(),
            volumes: aligned.volumes,
            transform,
        })
    }

    /// Materialize the sample at `index`
    ///
    /// The continuous mask is taken before missing values are zero-filled.
    /// An image that cannot be read is logged and left out of the sample.
    pub fn get(&self, index: usize) -> Result<Sample> {
        let record = self.records.get(index).ok_or(Error::IndexOutOfRange {
            index,
            len: self.records.len(),
        })?;

        let continuous_mask: Vec<bool> = record.continuous.iter().map(|v| !v.is_nan()).collect();
        let continuous = record.continuous.iter()
            .map(|&v| if v.is_nan() { 0.0 } else { v })
            .collect();

        Ok(Sample {
            categorical: record.categorical.clone(),
            continuous,
            continuous_mask,
            label: record.label,
            image: self.load_sample_image(index),
        })
    }

    fn load_sample_image(&self, index: usize) -> Option<ImagePixels> {
        let path = self.image_paths.get(index)?.as_deref()?;
        if !path.exists() {
            warn!("Image {:?} for sample {} no longer exists", path, index);
            return None;
        }
        match load_image(path, &self.transform) {
            Ok(pixels) => Some(pixels),
            Err(e) => {
                warn!("Skipping image for sample {}: {}", index, e);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether any slice was aligned to the table
    pub fn has_images(&self) -> bool {
        self.has_images
    }

    /// Cardinality of each categorical column (sentinel included)
    pub fn category_dims(&self) -> Vec<usize> {
        self.encoders.category_dims()
    }

    pub fn num_continuous(&self) -> usize {
        self.num_continuous
    }

    pub fn num_classes(&self) -> usize {
        self.encoders.num_classes()
    }

    /// Label strings indexed by class id
    pub fn label_map(&self) -> &[String] {
        self.encoders.label.classes()
    }

    /// Number of records per label
    pub fn class_distribution(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            if let Some(label) = self.encoders.label.decode(record.label) {
                *counts.entry(label.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Class ids of the given records
    pub fn labels(&self, indices: &[usize]) -> Vec<usize> {
        indices.iter()
            .filter_map(|&i| self.records.get(i).map(|r| r.label))
            .collect()
    }

    /// Expected volumes without slices on disk
    pub fn missing_volumes(&self) -> BTreeSet<VolumeKey> {
        self.volumes.as_ref().map(VolumeIndex::missing).unwrap_or_default()
    }

    /// Log the expected / loaded / missing volume summary
    pub fn report_missing_volumes(&self) {
        match &self.volumes {
            Some(volumes) => volumes.report_missing(),
            None => info!("No image root was scanned; volume report unavailable"),
        }
    }

    /// Volume discovery results, when an image root was scanned
    pub fn volumes(&self) -> Option<&VolumeIndex> {
        self.volumes.as_ref()
    }

    pub fn encoders(&self) -> &FittedEncoders {
        &self.encoders
    }

    pub fn transform(&self) -> &ImageTransform {
        &self.transform
    }

    /// Aligned slice of a record, if any
    pub fn image_path(&self, index: usize) -> Option<&Path> {
        self.image_paths.get(index)?.as_deref()
    }

    /// Split into train / validation / test indices, grouped by patient
    ///
    /// All records of one patient land in the same partition; records
    /// without a patient id form their own group.
    pub fn split(&self, config: &SplitConfig) -> Result<DatasetSplit> {
        config.validate()?;
        info!("Splitting dataset with seed {}", config.seed);

        let mut groups: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
        for (i, patient) in self.patients.iter().enumerate() {
            let key = match patient {
                Some(p) => GroupKey::Patient(p.clone()),
                None => GroupKey::Row(i),
            };
            groups.entry(key).or_default().push(i);
        }

        let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
        let mut rng = seeded_rng(config.seed);
        groups.shuffle(&mut rng);

        let n_groups = groups.len();
        let n_train = (n_groups as f32 * config.train_ratio) as usize;
        let n_val = ((n_groups as f32 * config.val_ratio) as usize).min(n_groups - n_train);
        debug!("{} patient groups: {} train, {} val", n_groups, n_train, n_val);

        let mut split = DatasetSplit::default();
        for (g, rows) in groups.into_iter().enumerate() {
            let target = if g < n_train {
                &mut split.train
            } else if g < n_train + n_val {
                &mut split.val
            } else {
                &mut split.test
            };
            target.extend(rows);
        }
        split.train.sort_unstable();
        split.val.sort_unstable();
        split.test.sort_unstable();

        info!(
            "Dataset split: train={}, val={}, test={}",
            split.train.len(),
            split.val.len(),
            split.test.len()
        );
        Ok(split)
    }

    /// View over a subset of records
    pub fn partition<'a>(&'a self, indices: &'a [usize]) -> Partition<'a> {
        Partition { dataset: self, indices }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    Patient(String),
    Row(usize),
}

/// Read-only view of a dataset restricted to some records
#[derive(Debug, Clone, Copy)]
pub struct Partition<'a> {
    dataset: &'a MultimodalDataset,
    indices: &'a [usize],
}

impl<'a> Partition<'a> {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Sample at position `i` of the partition
    pub fn get(&self, i: usize) -> Result<Sample> {
        let index = *self.indices.get(i).ok_or(Error::IndexOutOfRange {
            index: i,
            len: self.indices.len(),
        })?;
        self.dataset.get(index)
    }

    pub fn dataset(&self) -> &'a MultimodalDataset {
        self.dataset
    }

    /// Dataset indices covered by the partition
    pub fn indices(&self) -> &'a [usize] {
        self.indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::volumes::tests::{record, write_slices};
    use crate::data::Record;
    use std::fs;
    use tempfile::TempDir;

    const TABLE: &str = "\
patient,eye,date,sex,smoker,va,age,iop,label
1,L,2021-01-01,F,Y,20/40,70,15,AMD
2,R,2021-01-02,M,N,20/20,65,,CNV
3,L,2021-01-03,F,N,20/30,81,18,AMD
4,R,2021-01-04,M,,20/40,59,14,CNV
5,L,2021-01-05,F,Y,20/25,77,16,AMD
6,R,2021-01-06,M,N,20/40,68,17,CNV
7,L,2021-01-07,F,Y,20/20,72,13,AMD
8,R,2021-01-08,M,N,20/30,,19,CNV
9,L,2021-01-09,F,Y,20/25,63,12,AMD
10,R,2021-01-10,M,N,20/40,74,15,CNV
";

    fn schema() -> DatasetConfig {
        DatasetConfig {
            label_column: "label".to_string(),
            categorical_columns: vec!["sex".to_string(), "smoker".to_string(), "va".to_string()],
            continuous_columns: vec!["age".to_string(), "iop".to_string()],
            patient_column: "patient".to_string(),
            laterality_column: "eye".to_string(),
            date_column: "date".to_string(),
        }
    }

    fn tabular_dataset(tmp: &TempDir) -> MultimodalDataset {
        let path = tmp.path().join("table.csv");
        fs::write(&path, TABLE).unwrap();
        MultimodalDataset::from_file(&path, &schema(), &DatasetOptions::default()).unwrap()
    }

    #[test]
    fn test_tabular_only_dataset() {
        let tmp = TempDir::new().unwrap();
        let dataset = tabular_dataset(&tmp);

        assert_eq!(dataset.len(), 10);
        assert!(!dataset.has_images());
        assert_eq!(dataset.category_dims().len(), 3);
        assert_eq!(dataset.num_classes(), 2);
        assert_eq!(dataset.num_continuous(), 2);
        for i in 0..dataset.len() {
            assert!(dataset.get(i).unwrap().image.is_none());
        }
    }

    #[test]
    fn test_missing_values_round_trip() {
        let tmp = TempDir::new().unwrap();
        let dataset = tabular_dataset(&tmp);

        let sample = dataset.get(1).unwrap();
        assert_eq!(sample.continuous_mask, vec![true, false]);
        assert_eq!(sample.continuous, vec![65.0, 0.0]);

        let sample = dataset.get(7).unwrap();
        assert_eq!(sample.continuous_mask, vec![false, true]);
        assert_eq!(sample.continuous[0], 0.0);

        // Only row 4 lacks a smoker value
        let sentinel = dataset.encoders().categorical[1]
            .encode(crate::data::MISSING_TOKEN)
            .unwrap();
        assert_eq!(dataset.get(3).unwrap().categorical[1], sentinel);
        assert_eq!(dataset.category_dims()[1], 3);
    }

    #[test]
    fn test_get_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        let dataset = tabular_dataset(&tmp);
        assert_eq!(dataset.get(4).unwrap(), dataset.get(4).unwrap());
        assert!(matches!(dataset.get(10), Err(Error::IndexOutOfRange { index: 10, len: 10 })));
    }

    #[test]
    fn test_diagnostics() {
        let tmp = TempDir::new().unwrap();
        let dataset = tabular_dataset(&tmp);

        assert_eq!(dataset.label_map(), &["AMD".to_string(), "CNV".to_string()]);
        let distribution = dataset.class_distribution();
        assert_eq!(distribution["AMD"], 5);
        assert_eq!(distribution["CNV"], 5);
        assert!(dataset.missing_volumes().is_empty());
    }

    #[test]
    fn test_saved_encoders_keep_training_codes() {
        let tmp = TempDir::new().unwrap();
        let trained = tabular_dataset(&tmp);
        let male = trained.encoders().categorical[0].encode("M").unwrap();
        let cnv = trained.encoders().label.encode("CNV").unwrap();
        assert_eq!(male, 1);

        // Refitting on this table alone would give M code 0 and CNV class 0
        let path = tmp.path().join("eval.csv");
        fs::write(&path, "\
patient,eye,date,sex,smoker,va,age,iop,label
11,R,2021-02-01,M,N,20/20,61,14,CNV
12,L,2021-02-02,M,Y,20/40,69,,CNV
").unwrap();
        let dataset = MultimodalDataset::from_file_with_encoders(
            &path,
            &schema(),
            &DatasetOptions::default(),
            trained.encoders().clone(),
        ).unwrap();

        assert_eq!(dataset.encoders(), trained.encoders());
        assert_eq!(dataset.category_dims(), trained.category_dims());
        assert_eq!(dataset.label_map(), trained.label_map());
        for i in 0..dataset.len() {
            let sample = dataset.get(i).unwrap();
            assert_eq!(sample.categorical[0], male);
            assert_eq!(sample.label, cnv);
        }
    }

    #[test]
    fn test_saved_encoders_reject_unseen_category() {
        let tmp = TempDir::new().unwrap();
        let trained = tabular_dataset(&tmp);

        let path = tmp.path().join("eval.csv");
        fs::write(&path, "\
patient,eye,date,sex,smoker,va,age,iop,label
11,R,2021-02-01,X,N,20/20,61,14,CNV
").unwrap();
        let err = MultimodalDataset::from_file_with_encoders(
            &path,
            &schema(),
            &DatasetOptions::default(),
            trained.encoders().clone(),
        ).unwrap_err();

        match err.downcast_ref::<Error>() {
            Some(Error::UnseenCategory { column, value }) => {
                assert_eq!(column, "sex");
                assert_eq!(value, "X");
            }
            other => panic!("Expected UnseenCategory, got {:?}", other),
        }
    }

    #[test]
    fn test_split_keeps_patients_together() {
        let records: Vec<Record> = (0..20)
            .map(|i| {
                let patient = (i / 2).to_string();
                let label = if i % 3 == 0 { "AMD" } else { "CNV" };
                record(i, &patient, "L", "20210101", label)
            })
            .collect();
        let table = Table { records, ..Table::default() };
        let config = DatasetConfig {
            label_column: "label".to_string(),
            categorical_columns: vec!["eye".to_string()],
            continuous_columns: vec!["value".to_string()],
            ..DatasetConfig::default()
        };
        let dataset = MultimodalDataset::build(table, &config, &DatasetOptions::default()).unwrap();

        let split = dataset.split(&SplitConfig::default()).unwrap();
        assert_eq!(split.total_samples(), 20);
        assert_eq!(split.train.len(), 14);
        assert_eq!(split.val.len(), 2);
        assert_eq!(split.test.len(), 4);

        let patient_of = |i: usize| i / 2;
        for a in &split.train {
            assert!(split.val.iter().chain(&split.test).all(|b| patient_of(*a) != patient_of(*b)));
        }

        // Same seed, same split
        assert_eq!(split, dataset.split(&SplitConfig::default()).unwrap());
    }

    #[test]
    fn test_unreadable_image_is_omitted() {
        let tmp = TempDir::new().unwrap();
        write_slices(tmp.path(), "1/L/20210101", &["a.png"]);
        let table = Table {
            records: vec![
                record(0, "1", "L", "20210101", "AMD"),
                record(1, "2", "L", "20210101", "CNV"),
            ],
            ..Table::default()
        };
        let config = DatasetConfig {
            label_column: "label".to_string(),
            categorical_columns: vec!["eye".to_string()],
            continuous_columns: vec!["value".to_string()],
            ..DatasetConfig::default()
        };
        let options = DatasetOptions {
            image_root: Some(tmp.path().to_path_buf()),
            transform: ImageTransform::new(8),
            ..DatasetOptions::default()
        };
        let dataset = MultimodalDataset::build(table, &config, &options).unwrap();

        assert!(dataset.has_images());
        assert_eq!(dataset.get(0).unwrap().image.unwrap().shape, [3, 8, 8]);
        assert!(dataset.get(1).unwrap().image.is_none());

        fs::write(tmp.path().join("1/L/20210101/a.png"), b"corrupt").unwrap();
        assert!(dataset.get(0).unwrap().image.is_none());
    }

    #[test]
    fn test_partition_view() {
        let tmp = TempDir::new().unwrap();
        let dataset = tabular_dataset(&tmp);
        let indices = vec![2, 5];
        let partition = dataset.partition(&indices);

        assert_eq!(partition.len(), 2);
        assert_eq!(partition.get(1).unwrap(), dataset.get(5).unwrap());
        assert!(partition.get(2).is_err());
    }
}
