//! Unified error handling for the import pipeline.
//!
//! Only container-level problems surface as `ImportError`. Per-host and
//! per-item extraction issues are collected into `ScanResult::errors` /
//! `ScanResult::warnings` and never fail the overall call.

use serde::Serialize;

/// Structured error payload returned to callers.
#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Error type covering every fatal outcome of a scan import.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// Malformed container structure. Aborts the whole file.
    #[error("Invalid {scanner} file '{filename}': {message}")]
    Parse {
        scanner: String,
        filename: String,
        message: String,
    },

    /// File does not match the claimed or detected format. Rejected pre-parse.
    #[error("File '{filename}' is not a valid {scanner} export")]
    Validation { scanner: String, filename: String },

    /// Content hash already imported into the same project.
    #[error("Scan file '{filename}' was already imported into this project")]
    Duplicate { filename: String },

    /// No registered adapter handles the file.
    #[error("No suitable adapter found for '{filename}'. Available adapters: {available}")]
    UnsupportedFormat { filename: String, available: String },

    /// Blob storage call failed. Already-stored bytes are not rolled back.
    #[error("Storage {operation} failed: {message}")]
    Storage { operation: String, message: String },

    /// One partition failed during batched reconciliation. Earlier batches
    /// remain committed.
    #[error("Reconciliation batch {index} failed: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<ImportError>,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl ImportError {
    /// Stable machine-readable code for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "PARSE_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Duplicate { .. } => "DUPLICATE",
            Self::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Batch { .. } => "BATCH_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// Build the structured payload surfaced to callers.
    pub fn payload(&self) -> ErrorPayload {
        let (scanner, filename) = match self {
            Self::Parse {
                scanner, filename, ..
            }
            | Self::Validation { scanner, filename } => {
                (Some(scanner.clone()), Some(filename.clone()))
            }
            Self::Duplicate { filename } | Self::UnsupportedFormat { filename, .. } => {
                (None, Some(filename.clone()))
            }
            _ => (None, None),
        };
        ErrorPayload {
            code: self.kind().to_string(),
            message: self.to_string(),
            scanner,
            filename,
        }
    }
}
