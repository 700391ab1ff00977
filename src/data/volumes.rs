//! Discovery of per-patient image volumes on disk
//!
//! The image root is laid out `root/<patient>/<L|R>/<scan-date>/.../<slices>`.
//! The folders visited are driven by the clinical table: only patients, eyes
//! and scan dates that appear in some record are considered, and the slice
//! folder of a volume is the first directory below the scan-date folder that
//! holds `.jpg`/`.png` files.

use crate::data::{parse_integer_field, Laterality, Table, VolumeKey};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Image file extensions recognized as slices
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "png"];

/// One discovered slice paired with the label of its volume
#[derive(Debug, Clone, PartialEq)]
pub struct ImageEntry {
    pub path: PathBuf,
    pub key: VolumeKey,
    pub label: String,
}

/// Expected and discovered volumes plus the per-image expansion
#[derive(Debug, Clone, Default)]
pub struct VolumeIndex {
    expected: BTreeSet<VolumeKey>,
    loaded: BTreeSet<VolumeKey>,
    images: Vec<ImageEntry>,
    unparseable_keys: usize,
}

impl VolumeIndex {
    /// Volume keys derivable from the table, and how many rows had none
    ///
    /// Rows whose patient id, eye or date do not parse are left out of the
    /// expected set; they are counted but never rejected.
    pub fn expected_volumes(table: &Table) -> (BTreeSet<VolumeKey>, usize) {
        let mut expected = BTreeSet::new();
        let mut unparseable = 0;
        for record in &table.records {
            match record.volume_key() {
                Some(key) => {
                    expected.insert(key);
                }
                None => unparseable += 1,
            }
        }
        (expected, unparseable)
    }

    /// Walk the image root and index every volume that matches the table
    pub fn build(table: &Table, root: &Path) -> Result<Self> {
        let (expected, unparseable_keys) = Self::expected_volumes(table);
        if unparseable_keys > 0 {
            warn!(
                "{} of {} records have no parseable volume key and are excluded from the expected volumes",
                unparseable_keys,
                table.len()
            );
        }

        // First record wins for the label of a volume
        let mut volume_labels: BTreeMap<VolumeKey, &str> = BTreeMap::new();
        for record in &table.records {
            if let Some(key) = record.volume_key() {
                volume_labels.entry(key).or_insert(record.label.as_str());
            }
        }
        let eyes: HashSet<(u64, Laterality)> = volume_labels.keys()
            .map(|k| (k.patient, k.laterality))
            .collect();

        let mut index = Self {
            expected,
            unparseable_keys,
            ..Self::default()
        };

        for patient_dir in sorted_subdirs(root)
            .with_context(|| format!("Failed to read image root {:?}", root))?
        {
            let Some(patient) = dir_name(&patient_dir).and_then(parse_integer_field) else {
                debug!("Skipping non-patient folder {:?}", patient_dir);
                continue;
            };

            for eye in Laterality::ALL {
                if !eyes.contains(&(patient, eye)) {
                    continue;
                }
                let eye_dir = patient_dir.join(eye.as_str());
                if !eye_dir.is_dir() {
                    continue;
                }

                let date_dirs = match sorted_subdirs(&eye_dir) {
                    Ok(dirs) => dirs,
                    Err(e) => {
                        warn!("Failed to read {:?}: {}", eye_dir, e);
                        continue;
                    }
                };

                for date_dir in date_dirs {
                    let Some(scan_date) = dir_name(&date_dir).and_then(parse_integer_field) else {
                        continue;
                    };
                    let key = VolumeKey::new(patient, eye, scan_date);
                    let Some(label) = volume_labels.get(&key) else {
                        continue;
                    };

                    if let Some(slice_dir) = find_slice_dir(&date_dir) {
                        index.loaded.insert(key);
                        for path in list_images(&slice_dir) {
                            index.images.push(ImageEntry {
                                path,
                                key,
                                label: label.to_string(),
                            });
                        }
                    }
                }
            }
        }

        info!("Discovered {} image slices", index.images.len());
        info!(
            "Volumes loaded: {} out of {} expected",
            index.loaded.len(),
            index.expected.len()
        );
        Ok(index)
    }

    /// Volumes derivable from the table
    pub fn expected(&self) -> &BTreeSet<VolumeKey> {
        &self.expected
    }

    /// Volumes with slices found on disk
    pub fn loaded(&self) -> &BTreeSet<VolumeKey> {
        &self.loaded
    }

    /// Expected volumes without slices on disk
    pub fn missing(&self) -> BTreeSet<VolumeKey> {
        self.expected.difference(&self.loaded).copied().collect()
    }

    /// One entry per discovered slice, in discovery order
    pub fn images(&self) -> &[ImageEntry] {
        &self.images
    }

    /// Records whose volume key fields did not parse
    pub fn unparseable_keys(&self) -> usize {
        self.unparseable_keys
    }

    /// Log the expected / loaded / missing volume summary
    pub fn report_missing(&self) {
        let missing = self.missing();
        info!("Total expected volumes in label file: {}", self.expected.len());
        info!("Volumes loaded from image folders: {}", self.loaded.len());
        info!("Missing volumes: {}", missing.len());
        for key in &missing {
            info!(" - {}", key);
        }
    }
}

/// Name of the last path component
fn dir_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Immediate subdirectories, sorted by name
fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }
    Ok(dirs)
}

/// Check whether a path names a slice image
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image files directly inside `dir`, sorted by name
fn list_images(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
        .map(|e| e.into_path())
        .collect()
}

/// First directory at or below `root` (pre-order, sorted) holding slices
fn find_slice_dir(root: &Path) -> Option<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .find(|dir| !list_images(dir).is_empty())
}
