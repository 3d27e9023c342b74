// Statement Ingest - Core Library
// Exposes the ingestion pipeline for the CLI importer, the upload server, and tests

pub mod config;
pub mod db;
pub mod deduplication;
pub mod error;
pub mod masking;
pub mod normalizer;
pub mod parser;
pub mod persister;
pub mod pipeline;
pub mod store;

// Re-export commonly used types
pub use config::{AppConfig, IngestConfig, ServerConfig};
pub use db::{
    CanonicalTransaction, SqliteStore,
    setup_database, get_all_transactions, get_transactions_by_batch, verify_count,
};
pub use deduplication::{Classification, DeduplicationEngine, Triage, parse_transaction_date};
pub use error::{IngestError, RecordError, StoreError};
pub use masking::{MaskPolicy, mask_account};
pub use normalizer::{Normalized, normalize};
pub use parser::{Dialect, RawDocument, parse_document};
pub use persister::{PersistError, persist};
pub use pipeline::{IngestReport, UploadResponse, ingest};
pub use store::{DedupKey, ExistsQuery, TransactionLookup, TransactionSink};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
