//! Layer pipeline errors
//!
//! Every variant is recoverable: the owning layer shows the message with a
//! retry button and the rest of the page keeps working.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayerError {
    /// Network failure, timeout, non-2xx status or unreadable body
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The document was not a GeoJSON FeatureCollection
    #[error("Invalid dataset from {url}: {reason}")]
    Parse { url: String, reason: String },

    /// Zero valid features survived classification
    #[error("Dataset for layer '{layer}' has no valid features")]
    EmptyDataset { layer: String },

    /// A required property is absent on every feature
    #[error("Required property '{field}' is missing from every feature of layer '{layer}'")]
    SchemaMismatch { layer: String, field: String },

    #[error("Unknown layer: {0}")]
    UnknownLayer(String),
}

impl LayerError {
    pub fn fetch(url: &str, reason: impl ToString) -> Self {
        LayerError::Fetch {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Errors the user can fix by retrying (the data source may come back)
    pub fn is_transient(&self) -> bool {
        matches!(self, LayerError::Fetch { .. })
    }
}
