use std::path::PathBuf;

use crate::model::Modality;

/// Errors raised by the dataset and training core
///
/// Application plumbing (file I/O, checkpoints, CLI) wraps these in
/// `anyhow::Error`; they stay reachable through `downcast_ref`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configured column is absent from the tabular header
    #[error("column `{0}` not found in tabular input")]
    MissingColumn(String),

    /// An encoder was fitted on a column without any value
    #[error("cannot fit encoder for `{column}`: column is empty")]
    EmptyColumn { column: String },

    /// A value outside the fitted domain was passed to an encoder
    #[error("value `{value}` was not seen when fitting encoder for `{column}`")]
    UnseenCategory { column: String, value: String },

    /// The configured model type needs an input the batch does not carry
    #[error("model type `{modality}` requires {field} input but the batch has none")]
    MissingModality {
        modality: Modality,
        field: &'static str,
    },

    /// An image could not be opened or decoded
    #[error("failed to load image {path:?}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// A batch loss was NaN or infinite
    #[error("non-finite loss ({loss}) in epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize, loss: f64 },

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Sample index outside the dataset
    #[error("sample index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Result alias for the dataset and training core
pub type Result<T> = std::result::Result<T, Error>;
