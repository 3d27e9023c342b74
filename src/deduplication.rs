// 🔍 Deduplication Engine - mask, then decide what gets stored
//
// Each record ends in exactly one state: ToPersist, Duplicate or Failed.
//   1. Mask policy is resolved once from the first record
//   2. A batch that already has stored rows short-circuits to Duplicate
//   3. Otherwise each record is matched against storage on its present fields

use crate::config::IngestConfig;
use crate::db::CanonicalTransaction;
use crate::error::{RecordError, StoreError};
use crate::masking::MaskPolicy;
use crate::store::{DedupKey, ExistsQuery, TransactionLookup};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Outcome of a successful record-level check
///
/// A record whose check fails ends up in `Triage::failures` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// New transaction, goes to the persister
    ToPersist,

    /// Already stored (whole batch or matching row)
    Duplicate,
}

/// Records partitioned by classification, all masked and stripped
#[derive(Debug, Default)]
pub struct Triage {
    pub to_persist: Vec<CanonicalTransaction>,
    pub duplicates: Vec<CanonicalTransaction>,
    pub failures: Vec<RecordError>,

    /// True when the batch id was already stored and no record was compared
    pub batch_already_ingested: bool,

    pub policy: MaskPolicy,
}

impl Triage {
    fn push(&mut self, tx: CanonicalTransaction, outcome: Result<Classification, StoreError>) {
        match outcome {
            Ok(Classification::ToPersist) => self.to_persist.push(tx),
            Ok(Classification::Duplicate) => self.duplicates.push(tx),
            Err(e) => {
                tracing::error!("Error processing record {}: {}", tx.source_position, e);
                self.failures
                    .push(RecordError::new(tx.source_position, e.to_string()));
            }
        }
    }
}

// ============================================================================
// DATE PARSING
// ============================================================================

const NAIVE_ISO_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a statement date: ISO-8601 first (trailing `Z` = UTC), then DD/MM/YYYY
///
/// Dates with an offset are converted to UTC. Anything else yields `None`.
pub fn parse_transaction_date(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let with_offset = match s.strip_suffix('Z') {
        Some(stripped) => format!("{}+00:00", stripped),
        None => s.to_string(),
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&with_offset) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(&with_offset, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.naive_utc());
    }

    for format in NAIVE_ISO_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }

    // Bare ISO date, then the DD/MM/YYYY fallback
    ["%Y-%m-%d", "%d/%m/%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

pub struct DeduplicationEngine<'a> {
    config: &'a IngestConfig,
}

impl<'a> DeduplicationEngine<'a> {
    pub fn new(config: &'a IngestConfig) -> Self {
        DeduplicationEngine { config }
    }

    /// Mask every record and partition them against storage
    ///
    /// Lookup failures while resolving the mask policy or checking the batch
    /// abort the call; a failure on one record's lookup only fails that record.
    pub fn triage<L: TransactionLookup + ?Sized>(
        &self,
        store: &L,
        batch_id: Option<&str>,
        records: Vec<CanonicalTransaction>,
    ) -> Result<Triage, StoreError> {
        let first_account = records.first().and_then(|tx| tx.account_number.clone());
        let policy = MaskPolicy::resolve(store, first_account.as_deref(), self.config)?;

        let mut triage = Triage {
            policy,
            ..Default::default()
        };

        if let Some(batch_id) = batch_id {
            if store.exists(&ExistsQuery::Batch(batch_id))? {
                tracing::info!(
                    "Work order {} already exists in DB. Skipping all {} transactions.",
                    batch_id,
                    records.len()
                );
                triage.batch_already_ingested = true;
                for mut tx in records {
                    self.prepare(&mut tx, &policy);
                    triage.duplicates.push(tx);
                }
                return Ok(triage);
            }
        }

        for mut tx in records {
            let earlier_mask = self.prepare(&mut tx, &policy);
            let outcome = self.classify(store, &tx, earlier_mask.as_deref());
            triage.push(tx, outcome);
        }

        tracing::info!(
            "Processing complete: {} to save, {} duplicates skipped, {} errors",
            triage.to_persist.len(),
            triage.duplicates.len(),
            triage.failures.len()
        );

        Ok(triage)
    }

    /// Record-level check: does a stored row match every present field?
    ///
    /// `earlier_mask` is the standard mask of the same account, accepted too
    /// so rows stored before the extended reveal kicked in still match.
    pub fn classify<L: TransactionLookup + ?Sized>(
        &self,
        store: &L,
        tx: &CanonicalTransaction,
        earlier_mask: Option<&str>,
    ) -> Result<Classification, StoreError> {
        let mut key = DedupKey::from_transaction(tx);
        if let Some(masked) = earlier_mask {
            key = key.or_masked_as(masked);
        }
        if store.exists(&ExistsQuery::Transaction(key))? {
            Ok(Classification::Duplicate)
        } else {
            Ok(Classification::ToPersist)
        }
    }

    /// Parse the date, mask the account, drop raw identifiers
    ///
    /// Returns the standard mask when the policy revealed extra digits.
    fn prepare(&self, tx: &mut CanonicalTransaction, policy: &MaskPolicy) -> Option<String> {
        if let Some(raw) = tx.raw_date.take() {
            tx.date = parse_transaction_date(&raw);
            if tx.date.is_none() {
                tracing::debug!("Unparseable date {:?} left unset on {}", raw, tx.id);
            }
        }
        tx.masked_account_number = policy.apply(tx.account_number.as_deref(), self.config);
        let earlier_mask = if policy.reveal_extended {
            MaskPolicy::default().apply(tx.account_number.as_deref(), self.config)
        } else {
            None
        };
        tx.strip_sensitive();
        earlier_mask
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{setup_database, SqliteStore};
    use crate::store::TransactionSink;
    use rusqlite::Connection;

    fn create_test_transaction(amount: f64, description: &str, reference: &str) -> CanonicalTransaction {
        let mut tx = CanonicalTransaction::with_amount(amount);
        tx.raw_date = Some("2024-03-20".to_string());
        tx.description = Some(description.to_string());
        tx.reference = Some(reference.to_string());
        tx.direction = Some("debit".to_string());
        tx.balance = Some(5000.0);
        tx.account_number = Some("1234567890".to_string());
        tx.account_address = Some("7 Lake Rd, Town 560001".to_string());
        tx
    }

    /// Store the masked form of `records` as if a previous upload had saved them
    fn seed(conn: &Connection, batch: Option<&str>, records: Vec<CanonicalTransaction>) {
        let config = IngestConfig::default();
        let store = SqliteStore::new(conn);
        let engine = DeduplicationEngine::new(&config);
        let mut triage = engine.triage(&store, None, records).unwrap();
        for tx in &mut triage.to_persist {
            tx.work_order_id = batch.map(str::to_string);
        }
        store.insert_batch(&triage.to_persist).unwrap();
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    /// Lookup double that fails record-level queries
    struct FlakyLookup;

    impl TransactionLookup for FlakyLookup {
        fn exists(&self, query: &ExistsQuery<'_>) -> Result<bool, StoreError> {
            match query {
                ExistsQuery::Transaction(key) if key.amount == Some(13.0) => {
                    Err(StoreError::Rejected("lookup timed out".to_string()))
                }
                _ => Ok(false),
            }
        }
    }

    #[test]
    fn test_parse_iso_and_day_first_dates() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();

        assert_eq!(parse_transaction_date("2024-01-05"), Some(expected));
        assert_eq!(parse_transaction_date("05/01/2024"), Some(expected));
        assert_eq!(parse_transaction_date("2024-01-05T00:00:00"), Some(expected));
        assert_eq!(parse_transaction_date("2024-01-05T00:00:00Z"), Some(expected));
        assert_eq!(parse_transaction_date("2024-01-05 05:30:00+05:30"), Some(expected));
        assert_eq!(parse_transaction_date("2024-01-05T05:30:00+05:30"), Some(expected));
    }

    #[test]
    fn test_unparseable_dates_are_none() {
        assert_eq!(parse_transaction_date(""), None);
        assert_eq!(parse_transaction_date("01-05-2024"), None);
        assert_eq!(parse_transaction_date("yesterday"), None);
        // Month first is not accepted
        assert_eq!(parse_transaction_date("12/31/2024"), None);
    }

    #[test]
    fn test_new_records_are_masked_and_stripped() {
        let conn = test_conn();
        let store = SqliteStore::new(&conn);
        let config = IngestConfig::default();
        let engine = DeduplicationEngine::new(&config);

        let triage = engine
            .triage(&store, Some("WO-1"), vec![create_test_transaction(10.0, "A", "R1")])
            .unwrap();

        assert_eq!(triage.to_persist.len(), 1);
        assert!(!triage.policy.reveal_extended);
        let tx = &triage.to_persist[0];
        assert_eq!(tx.masked_account_number.as_deref(), Some("XXXXXX7890"));
        assert!(!tx.has_sensitive_fields());
        assert!(tx.raw_date.is_none());
        assert!(tx.date.is_some());
    }

    #[test]
    fn test_batch_short_circuit_marks_everything_duplicate() {
        let conn = test_conn();
        seed(&conn, Some("WO-1"), vec![create_test_transaction(10.0, "A", "R1")]);

        let store = SqliteStore::new(&conn);
        let config = IngestConfig::default();
        let engine = DeduplicationEngine::new(&config);

        // Different contents, same batch id
        let records = vec![
            create_test_transaction(99.0, "NEW", "R9"),
            create_test_transaction(98.0, "NEW", "R8"),
        ];
        let triage = engine.triage(&store, Some("WO-1"), records).unwrap();

        assert!(triage.batch_already_ingested);
        assert!(triage.to_persist.is_empty());
        assert_eq!(triage.duplicates.len(), 2);
        assert!(triage.duplicates.iter().all(|tx| !tx.has_sensitive_fields()));
    }

    #[test]
    fn test_record_level_duplicate_without_batch_id() {
        let conn = test_conn();
        seed(&conn, None, vec![create_test_transaction(10.0, "A", "R1")]);

        let store = SqliteStore::new(&conn);
        let config = IngestConfig::default();
        let engine = DeduplicationEngine::new(&config);

        // Stored as XXXXXX7890, re-masked as XXXXX67890 this time
        let same = create_test_transaction(10.0, "A", "R1");
        let other = create_test_transaction(11.0, "B", "R2");

        let triage = engine.triage(&store, None, vec![same, other]).unwrap();

        assert!(triage.policy.reveal_extended);
        assert!(!triage.batch_already_ingested);
        assert_eq!(triage.duplicates.len(), 1);
        assert_eq!(triage.to_persist.len(), 1);
        assert_eq!(triage.to_persist[0].description.as_deref(), Some("B"));
    }

    #[test]
    fn test_extended_reveal_applies_to_whole_upload() {
        let conn = test_conn();
        seed(&conn, None, vec![create_test_transaction(10.0, "A", "R1")]);

        let store = SqliteStore::new(&conn);
        let config = IngestConfig::default();
        let engine = DeduplicationEngine::new(&config);

        let mut second_account = create_test_transaction(21.0, "C", "R3");
        second_account.account_number = Some("5555512345".to_string());
        let records = vec![create_test_transaction(20.0, "B", "R2"), second_account];

        let triage = engine.triage(&store, None, records).unwrap();

        assert!(triage.policy.reveal_extended);
        let masks: Vec<_> = triage
            .to_persist
            .iter()
            .map(|tx| tx.masked_account_number.clone().unwrap())
            .collect();
        assert_eq!(masks, vec!["XXXXX67890".to_string(), "XXXXX12345".to_string()]);
    }

    #[test]
    fn test_lookup_failure_fails_only_that_record() {
        let config = IngestConfig::default();
        let engine = DeduplicationEngine::new(&config);

        // Extraction positions 2..=4, row 1 having failed earlier
        let mut records = vec![
            create_test_transaction(12.0, "A", "R1"),
            create_test_transaction(13.0, "B", "R2"),
            create_test_transaction(14.0, "C", "R3"),
        ];
        for (idx, tx) in records.iter_mut().enumerate() {
            tx.source_position = idx + 2;
        }
        let triage = engine.triage(&FlakyLookup, None, records).unwrap();

        assert_eq!(triage.to_persist.len(), 2);
        assert_eq!(triage.failures.len(), 1);
        assert_eq!(triage.failures[0].position, 3);
        assert!(triage.failures[0].message.contains("timed out"));
    }
}
