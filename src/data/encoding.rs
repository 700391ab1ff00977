//! Integer encoding of categorical columns and the label
//!
//! Encoders are fitted once over the whole table, before any split, and are
//! immutable afterwards. Classes are kept sorted, so the code of a value is
//! its rank among the fitted values and the mapping is identical for the same
//! input multiset regardless of row order.

use crate::data::{DatasetConfig, Record, MISSING_TOKEN};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Bijection between the fitted string values of one column and `[0, N)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEncoder {
    column: String,
    classes: Vec<String>,
}

impl CategoryEncoder {
    /// Fit on the observed values of a column
    pub fn fit<'a, I>(column: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let classes: BTreeSet<&str> = values.into_iter().collect();
        if classes.is_empty() {
            return Err(Error::EmptyColumn { column: column.to_string() });
        }

        Ok(Self {
            column: column.to_string(),
            classes: classes.into_iter().map(str::to_string).collect(),
        })
    }

    /// Fit on a column with absent cells, which become [`MISSING_TOKEN`]
    pub fn fit_with_missing<'a, I>(column: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        Self::fit(column, values.into_iter().map(|v| v.unwrap_or(MISSING_TOKEN)))
    }

    /// Integer code of a fitted value
    pub fn encode(&self, value: &str) -> Result<usize> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(value))
            .map_err(|_| Error::UnseenCategory {
                column: self.column.clone(),
                value: value.to_string(),
            })
    }

    /// Code of an optional cell; absent cells map to the sentinel
    pub fn encode_optional(&self, value: Option<&str>) -> Result<usize> {
        self.encode(value.unwrap_or(MISSING_TOKEN))
    }

    /// String value of a code
    pub fn decode(&self, code: usize) -> Option<&str> {
        self.classes.get(code).map(String::as_str)
    }

    /// Column this encoder was fitted on
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Fitted values, indexed by code
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// One record after encoding
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRecord {
    pub categorical: Vec<usize>,
    /// Raw values; missing cells stay `NaN` until sample access
    pub continuous: Vec<f32>,
    pub label: usize,
}

/// All encoders of a table: one per categorical column plus the label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FittedEncoders {
    pub categorical: Vec<CategoryEncoder>,
    pub label: CategoryEncoder,
}

impl FittedEncoders {
    /// Fit every encoder over all records
    pub fn fit(records: &[Record], config: &DatasetConfig) -> Result<Self> {
        let categorical = config.categorical_columns.iter()
            .enumerate()
            .map(|(i, column)| {
                CategoryEncoder::fit_with_missing(
                    column,
                    records.iter().map(|r| r.categorical[i].as_deref()),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let label = CategoryEncoder::fit(
            &config.label_column,
            records.iter().map(|r| r.label.as_str()),
        )?;

        Ok(Self { categorical, label })
    }

    /// Encode one record with the fitted encoders
    pub fn transform(&self, record: &Record) -> Result<EncodedRecord> {
        let categorical = self.categorical.iter()
            .zip(&record.categorical)
            .map(|(encoder, value)| encoder.encode_optional(value.as_deref()))
            .collect::<Result<Vec<_>>>()?;

        let continuous = record.continuous.iter()
            .map(|v| v.unwrap_or(f32::NAN))
            .collect();

        Ok(EncodedRecord {
            categorical,
            continuous,
            label: self.label.encode(&record.label)?,
        })
    }

    /// Reject a schema whose label or categorical columns differ from the fitted ones
    pub fn check_schema(&self, config: &DatasetConfig) -> Result<()> {
        let fitted: Vec<&str> = self.categorical.iter().map(CategoryEncoder::column).collect();
        if fitted != config.categorical_columns.iter().map(String::as_str).collect::<Vec<_>>() {
            return Err(Error::InvalidConfig(format!(
                "categorical columns {:?} differ from the fitted columns {:?}",
                config.categorical_columns, fitted
            )));
        }
        if self.label.column() != config.label_column {
            return Err(Error::InvalidConfig(format!(
                "label column {:?} differs from the fitted column {:?}",
                config.label_column,
                self.label.column()
            )));
        }
        Ok(())
    }

    /// Cardinality of each categorical column, in column order
    pub fn category_dims(&self) -> Vec<usize> {
        self.categorical.iter().map(CategoryEncoder::len).collect()
    }

    pub fn num_classes(&self) -> usize {
        self.label.len()
    }
}
