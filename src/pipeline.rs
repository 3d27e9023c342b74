// 🚀 Ingestion Pipeline - parse → normalize → triage → persist
//
// One upload, one sequential unit of work against a single store.
// Whole-upload failures come back as IngestError; row-level ones are
// collected in the report.

use crate::config::IngestConfig;
use crate::deduplication::DeduplicationEngine;
use crate::error::{RecordError, Result};
use crate::normalizer::normalize;
use crate::parser::parse_document;
use crate::persister::persist;
use crate::store::{TransactionLookup, TransactionSink};
use serde::{Deserialize, Serialize};

// ============================================================================
// REPORTS
// ============================================================================

/// Outcome of one successful upload
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub filename: String,
    pub batch_id: Option<String>,

    /// Rows seen in the document, extracted or failed
    pub records_processed: usize,
    pub records_saved: usize,
    pub duplicates: usize,

    /// Normalizer and engine failures, in that order
    pub failures: Vec<RecordError>,

    /// The batch id was already stored, nothing was compared or saved
    pub batch_already_ingested: bool,
}

impl IngestReport {
    /// Human-readable summary line
    pub fn message(&self) -> String {
        let mut message = format!(
            "File processed successfully. {} transactions saved.",
            self.records_saved
        );
        if self.duplicates > 0 {
            message.push_str(&format!(" {} duplicates skipped.", self.duplicates));
        }
        if !self.failures.is_empty() {
            message.push_str(&format!(" {} records failed.", self.failures.len()));
        }
        message
    }

    pub fn to_upload_response(&self) -> UploadResponse {
        UploadResponse {
            filename: self.filename.clone(),
            message: self.message(),
            records_processed: self.records_processed,
            records_saved: self.records_saved,
        }
    }
}

/// Body returned to upload clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub filename: String,
    pub message: String,
    pub records_processed: usize,
    pub records_saved: usize,
}

// ============================================================================
// INGEST
// ============================================================================

/// Run one uploaded document through the whole pipeline
///
/// # Errors
/// * `MalformedInput`, `MissingRequiredSection`, `UnsupportedDialect` - from parsing
/// * `EmptyResult` - nothing extractable
/// * `Storage` - a lookup or chunk insert failed; `committed` rows stay stored
pub fn ingest<S>(
    store: &S,
    config: &IngestConfig,
    filename: &str,
    bytes: &[u8],
    client_name: Option<&str>,
) -> Result<IngestReport>
where
    S: TransactionLookup + TransactionSink + ?Sized,
{
    tracing::info!("Processing upload {} ({} bytes)", filename, bytes.len());

    let client_name = client_name.map(str::trim).filter(|name| !name.is_empty());

    let doc = parse_document(bytes, config)?;
    let normalized = normalize(&doc, client_name, config)?;
    let records_processed = normalized.attempted();
    let mut failures = normalized.failures;

    let engine = DeduplicationEngine::new(config);
    let triage = engine.triage(store, doc.batch_id.as_deref(), normalized.records)?;
    failures.extend(triage.failures);

    let records_saved = persist(store, &triage.to_persist, config)?;

    let report = IngestReport {
        filename: filename.to_string(),
        batch_id: doc.batch_id,
        records_processed,
        records_saved,
        duplicates: triage.duplicates.len(),
        failures,
        batch_already_ingested: triage.batch_already_ingested,
    };

    tracing::info!("{}: {}", report.filename, report.message());
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================
