use crate::data::{DatasetConfig, Record, Table};
use crate::error::Error;
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

/// Tokens read as a missing cell
const MISSING_TOKENS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "NULL", "null", "None"];

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Csv,
    Tsv,
    GzippedCsv,
    GzippedTsv,
}

impl FileFormat {
    /// Detect file format from path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str());
        let stem = path.file_stem().and_then(|s| s.to_str());

        match (ext, stem) {
            (Some("gz"), Some(stem)) => {
                if stem.ends_with(".csv") {
                    Ok(FileFormat::GzippedCsv)
                } else if stem.ends_with(".tsv") || stem.ends_with(".txt") {
                    Ok(FileFormat::GzippedTsv)
                } else {
                    Err(anyhow::anyhow!("Cannot determine format of gzipped file {:?}", path))
                }
            }
            (Some("csv"), _) => Ok(FileFormat::Csv),
            (Some("tsv"), _) | (Some("txt"), _) => Ok(FileFormat::Tsv),
            _ => Err(anyhow::anyhow!(
                "Unsupported tabular format {:?}; export the spreadsheet as CSV or TSV",
                path
            )),
        }
    }

    /// Get delimiter character
    pub fn delimiter(&self) -> u8 {
        match self {
            FileFormat::Csv | FileFormat::GzippedCsv => b',',
            FileFormat::Tsv | FileFormat::GzippedTsv => b'\t',
        }
    }

    /// Check if format is gzipped
    pub fn is_gzipped(&self) -> bool {
        matches!(self, FileFormat::GzippedCsv | FileFormat::GzippedTsv)
    }
}

/// Remove the `-` separators of a date cell (`2021-03-15` -> `20210315`)
pub fn normalize_date(raw: &str) -> String {
    raw.trim().replace('-', "")
}

/// Header positions of the configured columns
struct ColumnIndex {
    label: usize,
    categorical: Vec<usize>,
    continuous: Vec<usize>,
    patient: Option<usize>,
    laterality: Option<usize>,
    date: Option<usize>,
}

impl ColumnIndex {
    fn resolve(headers: &[String], config: &DatasetConfig) -> std::result::Result<Self, Error> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let require = |name: &str| find(name).ok_or_else(|| Error::MissingColumn(name.to_string()));

        let categorical = config.categorical_columns.iter()
            .map(|c| require(c))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let continuous = config.continuous_columns.iter()
            .map(|c| require(c))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            label: require(&config.label_column)?,
            categorical,
            continuous,
            patient: find(&config.patient_column),
            laterality: find(&config.laterality_column),
            date: find(&config.date_column),
        })
    }
}

/// Reader for the clinical table
pub struct TabularLoader {
    config: DatasetConfig,
}

impl TabularLoader {
    /// Create a loader for the given column schema
    pub fn new(config: DatasetConfig) -> Self {
        Self { config }
    }

    /// Load the clinical table from file
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<Table> {
        let path = path.as_ref();
        info!("Loading tabular data from {:?}", path);

        let format = FileFormat::from_path(path)?;
        debug!("Detected file format: {:?}", format);

        let file = File::open(path)
            .with_context(|| format!("Failed to open tabular file {:?}", path))?;
        let table = if format.is_gzipped() {
            self.parse_table(BufReader::new(GzDecoder::new(file)), format)?
        } else {
            self.parse_table(BufReader::new(file), format)?
        };

        info!(
            "Loaded {} labelled records ({} rows without label dropped)",
            table.len(),
            table.dropped_unlabeled
        );
        Ok(table)
    }

    /// Parse the table from any reader
    pub fn parse_table<R: Read>(&self, reader: R, format: FileFormat) -> Result<Table> {
        let mut csv_reader = ReaderBuilder::new()
            .delimiter(format.delimiter())
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader.headers()
            .context("Failed to read header row")?
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        debug!("Headers: {:?}", headers);

        let columns = ColumnIndex::resolve(&headers, &self.config)?;
        let mut table = Table::default();

        for (row, result) in csv_reader.records().enumerate() {
            let record = result
                .with_context(|| format!("Failed to parse row {}", row + 2))?;

            let cell = |idx: usize| -> Option<String> {
                record.get(idx)
                    .map(str::trim)
                    .filter(|s| !MISSING_TOKENS.contains(s))
                    .map(|s| s.to_string())
            };

            let Some(label) = cell(columns.label) else {
                table.dropped_unlabeled += 1;
                continue;
            };

            let categorical = columns.categorical.iter().map(|&i| cell(i)).collect();
            let continuous = columns.continuous.iter()
                .map(|&i| {
                    let raw = cell(i)?;
                    match raw.parse::<f32>() {
                        Ok(v) if v.is_finite() => Some(v),
                        _ => {
                            table.invalid_continuous += 1;
                            None
                        }
                    }
                })
                .collect();

            table.records.push(Record {
                row,
                categorical,
                continuous,
                label,
                patient_id: columns.patient.and_then(cell),
                laterality: columns.laterality.and_then(cell),
                scan_date: columns.date.and_then(cell).map(|d| normalize_date(&d)),
            });
        }

        if table.invalid_continuous > 0 {
            warn!(
                "{} continuous cells were not finite numbers and are treated as missing",
                table.invalid_continuous
            );
        }

        Ok(table)
    }
}
