use crate::data::volumes::VolumeIndex;
use crate::data::{Record, Table, VolumeKey};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// How records are paired with discovered slices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// First slice of the record's own (patient, eye, date) volume
    #[default]
    VolumeKey,
    /// First slice anywhere whose volume label equals the record label.
    /// Several records may share one slice; only for reproducing old runs.
    FirstLabelMatch,
}

/// Table rows with an optional slice path each
#[derive(Debug, Clone)]
pub struct AlignedTable {
    /// Records in table order
    pub records: Vec<Record>,
    /// Slice path per record (same order as `records`)
    pub image_paths: Vec<Option<PathBuf>>,
    /// Whether any slice was discovered under the image root
    pub has_images: bool,
    /// Volume discovery results, when an image root was walked
    pub volumes: Option<VolumeIndex>,
}

impl AlignedTable {
    /// Tabular-only alignment: no record has an image
    fn tabular_only(table: Table, volumes: Option<VolumeIndex>) -> Self {
        let image_paths = vec![None; table.records.len()];
        Self {
            records: table.records,
            image_paths,
            has_images: false,
            volumes,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records that received a slice
    pub fn records_with_images(&self) -> usize {
        self.image_paths.iter().filter(|p| p.is_some()).count()
    }
}

/// Pairs clinical records with image slices
#[derive(Debug, Clone, Copy, Default)]
pub struct Aligner {
    policy: MergePolicy,
}

impl Aligner {
    pub fn new(policy: MergePolicy) -> Self {
        Self { policy }
    }

    /// Merge the table with the slices found under `image_root`
    ///
    /// Falls back to a tabular-only table (with a warning) when no root is
    /// given, the root does not exist, or no slice matches the table.
    pub fn align(&self, table: Table, image_root: Option<&Path>) -> Result<AlignedTable> {
        let Some(root) = image_root else {
            info!("No image root configured; using tabular data only");
            return Ok(AlignedTable::tabular_only(table, None));
        };

        if !root.is_dir() {
            warn!("Image root {:?} does not exist; using tabular data only", root);
            return Ok(AlignedTable::tabular_only(table, None));
        }

        let volumes = VolumeIndex::build(&table, root)?;
        if volumes.images().is_empty() {
            warn!("No matching image slices found under {:?}; using tabular data only", root);
            return Ok(AlignedTable::tabular_only(table, Some(volumes)));
        }

        let image_paths = match self.policy {
            MergePolicy::VolumeKey => merge_by_volume_key(&table.records, &volumes),
            MergePolicy::FirstLabelMatch => merge_by_first_label(&table.records, &volumes),
        };

        let aligned = AlignedTable {
            records: table.records,
            image_paths,
            has_images: true,
            volumes: Some(volumes),
        };
        info!(
            "Aligned {} of {} records with an image ({:?} merge)",
            aligned.records_with_images(),
            aligned.len(),
            self.policy
        );
        Ok(aligned)
    }
}

fn merge_by_volume_key(records: &[Record], volumes: &VolumeIndex) -> Vec<Option<PathBuf>> {
    let mut first_slice: HashMap<VolumeKey, &Path> = HashMap::new();
    for entry in volumes.images() {
        first_slice.entry(entry.key).or_insert(entry.path.as_path());
    }

    records.iter()
        .map(|r| {
            r.volume_key()
                .and_then(|key| first_slice.get(&key))
                .map(|p| p.to_path_buf())
        })
        .collect()
}

fn merge_by_first_label(records: &[Record], volumes: &VolumeIndex) -> Vec<Option<PathBuf>> {
    let mut first_slice: HashMap<&str, &Path> = HashMap::new();
    for entry in volumes.images() {
        first_slice.entry(entry.label.as_str()).or_insert(entry.path.as_path());
    }

    records.iter()
        .map(|r| first_slice.get(r.label.as_str()).map(|p| p.to_path_buf()))
        .collect()
}
