// 🚨 Error taxonomy for the ingestion pipeline
// Whole-upload rejections live here; row-level problems are RecordErrors.

use serde::Serialize;
use thiserror::Error;

/// Result alias for pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Reasons an upload is rejected or aborted as a whole
#[derive(Debug, Error)]
pub enum IngestError {
    /// Bytes are empty or not a JSON object
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// The transaction-bearing section is absent or empty
    #[error("Required key '{0}' not found in JSON file")]
    MissingRequiredSection(String),

    /// The transaction section has a shape no dialect accepts
    #[error("Unsupported document dialect: {0}")]
    UnsupportedDialect(String),

    /// Extraction finished without a single usable record
    #[error("No transaction data found in the JSON structure")]
    EmptyResult,

    /// Storage failed; `committed` rows were already durable when it did
    #[error("Database error after {committed} records committed: {message}")]
    Storage { committed: usize, message: String },

    /// Transport-level rejection (missing file, wrong extension)
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),
}

impl IngestError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedDialect(message.into())
    }

    /// Short machine-readable classification
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::MalformedInput(_) => "parse_error",
            IngestError::MissingRequiredSection(_) => "missing_section",
            IngestError::UnsupportedDialect(_) => "unsupported_dialect",
            IngestError::EmptyResult => "empty_result",
            IngestError::Storage { .. } => "storage_error",
            IngestError::InvalidUpload(_) => "invalid_upload",
        }
    }

    /// True when the caller sent something unusable (vs. a server-side failure)
    pub fn is_client_error(&self) -> bool {
        !matches!(self, IngestError::Storage { .. })
    }
}

/// Failure of a storage capability call
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage rejected the operation: {0}")]
    Rejected(String),
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        IngestError::Storage {
            committed: 0,
            message: err.to_string(),
        }
    }
}

/// A single record that could not be extracted or classified
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordError {
    /// 1-based position in extraction order
    pub position: usize,
    pub message: String,
}

impl RecordError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        RecordError {
            position,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error processing record {}: {}", self.position, self.message)
    }
}

#[cfg(feature = "server")]
mod http {
    use super::IngestError;
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    };
    use serde_json::json;

    impl IntoResponse for IngestError {
        fn into_response(self) -> Response {
            let status = if self.is_client_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };

            let body = Json(json!({
                "error": {
                    "type": self.kind(),
                    "message": self.to_string(),
                }
            }));

            (status, body).into_response()
        }
    }
}
