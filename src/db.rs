use crate::error::StoreError;
use crate::store::{DedupKey, ExistsQuery, TransactionLookup, TransactionSink};
use chrono::NaiveDateTime;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};

/// Storage text format for transaction dates
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Canonical, dialect-independent transaction record
///
/// Raw fields (`raw_date`, `account_number`, `account_address`) only exist
/// between normalization and the masking pass; they are never serialized and
/// have no storage column.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct CanonicalTransaction {
    /// Stable row identity (UUID v4)
    pub id: String,

    /// 1-based position in extraction order, 0 when not extracted from an upload
    #[serde(skip)]
    pub source_position: usize,

    pub work_order_id: Option<String>,
    pub client_name: Option<String>,

    /// Date text as found in the upload, consumed by the engine
    #[serde(skip)]
    pub raw_date: Option<String>,

    pub date: Option<NaiveDateTime>,
    pub description: Option<String>,

    /// Credit/debit indicator as supplied upstream
    #[serde(rename = "type")]
    pub direction: Option<String>,

    pub amount: f64,
    pub balance: Option<f64>,

    /// Unmasked account number - removed before persistence
    #[serde(skip)]
    pub account_number: Option<String>,

    pub reference: Option<String>,
    pub entities: Option<String>,
    pub od_limit: Option<f64>,
    pub charges: Option<f64>,
    pub bank_name: Option<String>,
    pub category: Option<String>,
    pub category_2: Option<String>,
    pub mode: Option<String>,

    pub account_name: Option<String>,
    pub account_type: Option<String>,
    pub ifsc_code: Option<String>,
    pub micr_code: Option<String>,

    /// Postal address - only used to derive `pincode`
    #[serde(skip)]
    pub account_address: Option<String>,

    /// 6-digit pincode found in the address, empty when none
    pub pincode: String,

    pub masked_account_number: Option<String>,
}

impl CanonicalTransaction {
    /// Blank record with a fresh id and the given amount
    pub fn with_amount(amount: f64) -> Self {
        CanonicalTransaction {
            id: uuid::Uuid::new_v4().to_string(),
            amount,
            ..Default::default()
        }
    }

    /// Drop the fields that must never reach storage
    pub fn strip_sensitive(&mut self) {
        self.account_number = None;
        self.account_address = None;
    }

    pub fn has_sensitive_fields(&self) -> bool {
        self.account_number.is_some() || self.account_address.is_some()
    }
}

pub fn format_date(date: &NaiveDateTime) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Transactions Table (masked account only - no raw number, no address)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_uuid TEXT UNIQUE NOT NULL,
            work_order_id TEXT,
            client_name TEXT,
            date TEXT,
            description TEXT,
            amount REAL NOT NULL,
            type TEXT,
            balance REAL,
            reference TEXT,
            od_limit REAL,
            charges REAL,
            category TEXT,
            category_2 TEXT,
            mode TEXT,
            masked_account_number TEXT,
            account_name TEXT,
            account_type TEXT,
            bank_name TEXT,
            ifsc_code TEXT,
            micr_code TEXT,
            pincode TEXT,
            entities TEXT,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_work_order_id ON transactions(work_order_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_masked_account ON transactions(masked_account_number)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_date ON transactions(date)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// SQLITE STORE
// ============================================================================

/// SQLite backend for both storage capabilities
pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteStore { conn }
    }

    fn query_exists(&self, sql: &str, values: Vec<SqlValue>) -> Result<bool, StoreError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let found = stmt.exists(params_from_iter(values))?;
        Ok(found)
    }
}

impl TransactionLookup for SqliteStore<'_> {
    fn exists(&self, query: &ExistsQuery<'_>) -> Result<bool, StoreError> {
        match query {
            ExistsQuery::MaskedAccount(masked) => self.query_exists(
                "SELECT 1 FROM transactions WHERE masked_account_number = ?1 LIMIT 1",
                vec![SqlValue::Text(masked.to_string())],
            ),
            ExistsQuery::Batch(batch_id) => self.query_exists(
                "SELECT 1 FROM transactions WHERE work_order_id = ?1 LIMIT 1",
                vec![SqlValue::Text(batch_id.to_string())],
            ),
            ExistsQuery::Transaction(key) => {
                let (sql, values) = dedup_query(key);
                self.query_exists(&sql, values)
            }
        }
    }
}

impl TransactionSink for SqliteStore<'_> {
    fn insert_batch(&self, rows: &[CanonicalTransaction]) -> Result<usize, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO transactions (
                    tx_uuid, work_order_id, client_name, date, description,
                    amount, type, balance, reference, od_limit,
                    charges, category, category_2, mode, masked_account_number,
                    account_name, account_type, bank_name, ifsc_code, micr_code,
                    pincode, entities
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
            )?;

            for row in rows {
                if row.has_sensitive_fields() {
                    return Err(StoreError::Rejected(format!(
                        "record {} still carries unmasked fields",
                        row.id
                    )));
                }

                stmt.execute(params![
                    row.id,
                    row.work_order_id,
                    row.client_name,
                    row.date.as_ref().map(format_date),
                    row.description,
                    row.amount,
                    row.direction,
                    row.balance,
                    row.reference,
                    row.od_limit,
                    row.charges,
                    row.category,
                    row.category_2,
                    row.mode,
                    row.masked_account_number,
                    row.account_name,
                    row.account_type,
                    row.bank_name,
                    row.ifsc_code,
                    row.micr_code,
                    row.pincode,
                    row.entities,
                ])?;
            }
        }
        // Dropping `tx` without commit rolls the whole chunk back
        tx.commit()?;
        Ok(rows.len())
    }
}

/// Partial-field conjunction: only the fields present in the key are compared
fn dedup_query(key: &DedupKey<'_>) -> (String, Vec<SqlValue>) {
    let mut sql = String::from("SELECT 1 FROM transactions WHERE 1 = 1");
    let mut values = Vec::new();

    let mut push = |column: &str, value: SqlValue| {
        values.push(value);
        sql.push_str(&format!(" AND {} = ?{}", column, values.len()));
    };

    if let Some(date) = &key.date {
        push("date", SqlValue::Text(format_date(date)));
    }
    if let Some(amount) = key.amount {
        push("amount", SqlValue::Real(amount));
    }
    if let Some(balance) = key.balance {
        push("balance", SqlValue::Real(balance));
    }
    if let Some(charges) = key.charges {
        push("charges", SqlValue::Real(charges));
    }
    if let Some(direction) = key.direction {
        push("type", SqlValue::Text(direction.to_string()));
    }
    if let Some(description) = key.description {
        push("description", SqlValue::Text(description.to_string()));
    }
    if let Some(reference) = key.reference {
        push("reference", SqlValue::Text(reference.to_string()));
    }

    if !key.masked_account_numbers.is_empty() {
        let mut placeholders = Vec::new();
        for masked in &key.masked_account_numbers {
            values.push(SqlValue::Text(masked.to_string()));
            placeholders.push(format!("?{}", values.len()));
        }
        sql.push_str(&format!(
            " AND masked_account_number IN ({})",
            placeholders.join(", ")
        ));
    }

    sql.push_str(" LIMIT 1");
    (sql, values)
}

// ============================================================================
// READ-BACK
// ============================================================================

const SELECT_COLUMNS: &str = "SELECT tx_uuid, work_order_id, client_name, date, description,
        amount, type, balance, reference, od_limit,
        charges, category, category_2, mode, masked_account_number,
        account_name, account_type, bank_name, ifsc_code, micr_code,
        pincode, entities
     FROM transactions";

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<CanonicalTransaction> {
    let date_str: Option<String> = row.get(3)?;
    let date = date_str.and_then(|s| NaiveDateTime::parse_from_str(&s, DATE_FORMAT).ok());

    Ok(CanonicalTransaction {
        id: row.get(0)?,
        source_position: 0,
        work_order_id: row.get(1)?,
        client_name: row.get(2)?,
        raw_date: None,
        date,
        description: row.get(4)?,
        amount: row.get(5)?,
        direction: row.get(6)?,
        balance: row.get(7)?,
        account_number: None,
        reference: row.get(8)?,
        od_limit: row.get(9)?,
        charges: row.get(10)?,
        category: row.get(11)?,
        category_2: row.get(12)?,
        mode: row.get(13)?,
        masked_account_number: row.get(14)?,
        account_name: row.get(15)?,
        account_type: row.get(16)?,
        bank_name: row.get(17)?,
        ifsc_code: row.get(18)?,
        micr_code: row.get(19)?,
        account_address: None,
        pincode: row.get::<_, Option<String>>(20)?.unwrap_or_default(),
        entities: row.get(21)?,
    })
}

pub fn get_all_transactions(conn: &Connection) -> rusqlite::Result<Vec<CanonicalTransaction>> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_COLUMNS))?;
    let transactions = stmt
        .query_map([], transaction_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(transactions)
}

/// Get transactions stored for one work order
pub fn get_transactions_by_batch(
    conn: &Connection,
    work_order_id: &str,
) -> rusqlite::Result<Vec<CanonicalTransaction>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE work_order_id = ?1 ORDER BY id",
        SELECT_COLUMNS
    ))?;
    let transactions = stmt
        .query_map([work_order_id], transaction_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(transactions)
}

pub fn verify_count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    /// Helper function to create a masked, storable transaction
    fn create_test_transaction(amount: f64, description: &str, masked: &str) -> CanonicalTransaction {
        let mut tx = CanonicalTransaction::with_amount(amount);
        tx.work_order_id = Some("WO-1".to_string());
        tx.date = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0);
        tx.description = Some(description.to_string());
        tx.direction = Some("debit".to_string());
        tx.balance = Some(1000.0);
        tx.masked_account_number = Some(masked.to_string());
        tx.pincode = "560001".to_string();
        tx
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = test_conn();
        setup_database(&conn).unwrap();
        assert_eq!(verify_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_schema_has_no_raw_identifier_columns() {
        let conn = test_conn();
        let mut stmt = conn.prepare("PRAGMA table_info(transactions)").unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get(1))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert!(columns.contains(&"masked_account_number".to_string()));
        assert!(!columns.contains(&"account_number".to_string()));
        assert!(!columns.contains(&"account_address".to_string()));
    }

    #[test]
    fn test_insert_and_read_back() {
        let conn = test_conn();
        let store = SqliteStore::new(&conn);

        let rows = vec![
            create_test_transaction(-45.99, "COFFEE", "XXXXXX7890"),
            create_test_transaction(2000.0, "SALARY", "XXXXXX7890"),
        ];

        let inserted = store.insert_batch(&rows).unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(verify_count(&conn).unwrap(), 2);

        let stored = get_all_transactions(&conn).unwrap();
        assert_eq!(stored, rows);

        let by_batch = get_transactions_by_batch(&conn, "WO-1").unwrap();
        assert_eq!(by_batch.len(), 2);
        assert!(get_transactions_by_batch(&conn, "WO-2").unwrap().is_empty());
    }

    #[test]
    fn test_insert_rejects_unmasked_rows_atomically() {
        let conn = test_conn();
        let store = SqliteStore::new(&conn);

        let clean = create_test_transaction(10.0, "OK", "XXXXXX1111");
        let mut dirty = create_test_transaction(20.0, "RAW", "XXXXXX2222");
        dirty.account_number = Some("123456782222".to_string());

        let err = store.insert_batch(&[clean, dirty]).unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        // First row of the chunk was rolled back with the rest
        assert_eq!(verify_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_exists_masked_account_and_batch() {
        let conn = test_conn();
        let store = SqliteStore::new(&conn);
        store
            .insert_batch(&[create_test_transaction(1.0, "A", "XXXXXX7890")])
            .unwrap();

        assert!(store.exists(&ExistsQuery::MaskedAccount("XXXXXX7890")).unwrap());
        assert!(!store.exists(&ExistsQuery::MaskedAccount("XXXXX67890")).unwrap());
        assert!(store.exists(&ExistsQuery::Batch("WO-1")).unwrap());
        assert!(!store.exists(&ExistsQuery::Batch("WO-9")).unwrap());
    }

    #[test]
    fn test_exists_transaction_partial_field_match() {
        let conn = test_conn();
        let store = SqliteStore::new(&conn);
        let mut stored = create_test_transaction(500.0, "RENT", "XXXXXX7890");
        stored.reference = Some("CHQ-77".to_string());
        store.insert_batch(&[stored.clone()]).unwrap();

        // Same values → match
        let mut probe = stored.clone();
        assert!(store
            .exists(&ExistsQuery::Transaction(DedupKey::from_transaction(&probe)))
            .unwrap());

        // Fields missing from the probe are ignored
        probe.reference = None;
        probe.balance = None;
        probe.date = None;
        assert!(store
            .exists(&ExistsQuery::Transaction(DedupKey::from_transaction(&probe)))
            .unwrap());

        // A differing present field breaks the match
        probe.description = Some("RENT MARCH".to_string());
        assert!(!store
            .exists(&ExistsQuery::Transaction(DedupKey::from_transaction(&probe)))
            .unwrap());
    }

    #[test]
    fn test_exists_transaction_accepts_any_listed_mask() {
        let conn = test_conn();
        let store = SqliteStore::new(&conn);
        let stored = create_test_transaction(75.0, "GYM", "XXXXXX7890");
        store.insert_batch(&[stored.clone()]).unwrap();

        let mut probe = stored.clone();
        probe.masked_account_number = Some("XXXXX67890".to_string());
        let key = DedupKey::from_transaction(&probe);
        assert!(!store.exists(&ExistsQuery::Transaction(key.clone())).unwrap());

        let key = key.or_masked_as("XXXXXX7890");
        assert!(store.exists(&ExistsQuery::Transaction(key)).unwrap());
    }

    #[test]
    fn test_serialization_hides_raw_fields() {
        let mut tx = create_test_transaction(1.0, "A", "XXXXXX7890");
        tx.account_number = Some("1234567890".to_string());
        tx.account_address = Some("1 Road 560001".to_string());

        let json = serde_json::to_value(&tx).unwrap();
        assert!(json.get("account_number").is_none());
        assert!(json.get("account_address").is_none());
        assert_eq!(json.get("type"), Some(&serde_json::json!("debit")));
    }
}
