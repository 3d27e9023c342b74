// 🔄 Record Normalizer - RawDocument → CanonicalTransaction
//
// Both dialects end up in the same flat record. Columns are parallel arrays
// read positionally; a short or missing column only fails the record it hits.

use crate::config::IngestConfig;
use crate::db::CanonicalTransaction;
use crate::error::{IngestError, RecordError, Result};
use crate::parser::{is_statement_key, json_type_name, Dialect, RawDocument};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

// ============================================================================
// OUTPUT
// ============================================================================

/// Records extracted in input order, plus the rows that could not be read
#[derive(Debug, Default)]
pub struct Normalized {
    pub records: Vec<CanonicalTransaction>,
    pub failures: Vec<RecordError>,
}

impl Normalized {
    /// Rows seen, extracted or not
    pub fn attempted(&self) -> usize {
        self.records.len() + self.failures.len()
    }
}

// ============================================================================
// COLUMN ACCESS
// ============================================================================

/// Positional view over one columnar block
struct Columns<'a> {
    map: &'a Map<String, Value>,
    label: &'a str,
}

impl<'a> Columns<'a> {
    fn new(map: &'a Map<String, Value>, label: &'a str) -> Self {
        Columns { map, label }
    }

    /// Number of records: the length of the `date` column
    fn len(&self) -> usize {
        match self.map.get("date") {
            Some(Value::Array(dates)) => dates.len(),
            _ => 0,
        }
    }

    fn cell(&self, key: &str, idx: usize) -> std::result::Result<&'a Value, String> {
        match self.map.get(key) {
            None => Err(format!("column '{}' is missing from {}", key, self.label)),
            Some(Value::Array(values)) => values.get(idx).ok_or_else(|| {
                format!(
                    "column '{}' in {} has {} entries, no index {}",
                    key,
                    self.label,
                    values.len(),
                    idx
                )
            }),
            Some(other) => Err(format!(
                "column '{}' in {} is a {}, expected array",
                key,
                self.label,
                json_type_name(other)
            )),
        }
    }

    fn text(&self, key: &str, idx: usize) -> std::result::Result<Option<String>, String> {
        Ok(scalar_text(self.cell(key, idx)?))
    }

    fn number(&self, key: &str, idx: usize) -> std::result::Result<Option<f64>, String> {
        scalar_number(self.cell(key, idx)?).map_err(|e| format!("column '{}': {}", key, e))
    }
}

/// Where account-level metadata comes from
enum MetaSource<'a> {
    /// Columnar dialect: one scalar per key, shared by every record
    Scalar(&'a Map<String, Value>),

    /// Nested-list dialect: arrays indexed by statement ordinal
    Indexed(&'a Map<String, Value>, usize),
}

impl MetaSource<'_> {
    fn text(&self, key: &str) -> std::result::Result<Option<String>, String> {
        match self {
            MetaSource::Scalar(map) => Ok(map.get(key).and_then(scalar_text)),
            MetaSource::Indexed(map, ordinal) => match map.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::Array(values)) => values
                    .get(*ordinal)
                    .map(scalar_text)
                    .ok_or_else(|| {
                        format!(
                            "MetaData '{}' has {} entries, none for statement {}",
                            key,
                            values.len(),
                            ordinal
                        )
                    }),
                Some(other) => Err(format!(
                    "MetaData '{}' is a {}, expected array",
                    key,
                    json_type_name(other)
                )),
            },
        }
    }
}

// ============================================================================
// SCALAR COERCION
// ============================================================================

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

fn scalar_number(value: &Value) -> std::result::Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("{} is out of range", n)),
        Value::String(s) => {
            let cleaned = s.trim().replace(',', "");
            if cleaned.is_empty() {
                return Ok(None);
            }
            cleaned
                .parse::<f64>()
                .map(Some)
                .map_err(|_| format!("'{}' is not numeric", s))
        }
        other => Err(format!("{} is not numeric", json_type_name(other))),
    }
}

/// Account numbers often arrive as JSON numbers; render integral floats without ".0"
fn account_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => Some(format!("{:.0}", f)),
            _ => Some(n.to_string()),
        },
        other => scalar_text(other),
    }
}

// ============================================================================
// PINCODE
// ============================================================================

fn pincode_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\d{6}\b").expect("pincode pattern is valid"))
}

/// First standalone 6-digit token in the address, or empty
pub fn derive_pincode(address: Option<&str>) -> String {
    address
        .and_then(|a| pincode_pattern().find(a))
        .map(|m| m.as_str().replace(' ', ""))
        .unwrap_or_default()
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Flatten a parsed document into canonical records
///
/// # Errors
/// * `EmptyResult` - no record could be extracted
pub fn normalize(
    doc: &RawDocument,
    client_name: Option<&str>,
    config: &IngestConfig,
) -> Result<Normalized> {
    let mut out = Normalized::default();
    let batch_id = doc.batch_id.as_deref();

    match &doc.transactions {
        Dialect::Columnar(section) => {
            tracing::debug!("Processing transactions as columnar section");
            let columns = Columns::new(section, &config.transactions_key);
            let meta = MetaSource::Scalar(&doc.metadata);

            for idx in 0..columns.len() {
                let account_name = meta.text("account_name");
                let result = build_record(&columns, idx, account_name, &meta)
                    .map(|tx| stamp(tx, batch_id, client_name));
                collect(&mut out, result);
            }
        }
        Dialect::NestedList(items) => {
            tracing::debug!("Processing transactions as list with {} items", items.len());
            let mut ordinal = 0usize;

            for item in items {
                let Some(obj) = item.as_object() else {
                    continue;
                };

                for (key, value) in obj {
                    if !is_statement_key(key, &config.statement_marker) {
                        continue;
                    }

                    match value.as_object() {
                        Some(block) => {
                            let columns = Columns::new(block, key);
                            let meta = MetaSource::Indexed(&doc.metadata, ordinal);

                            for idx in 0..columns.len() {
                                let account_name = columns.text("account_name", idx);
                                let result = build_record(&columns, idx, account_name, &meta)
                                    .map(|tx| stamp(tx, batch_id, client_name));
                                collect(&mut out, result);
                            }
                        }
                        None => tracing::warn!(
                            "Statement '{}' is a {}, skipping its rows",
                            key,
                            json_type_name(value)
                        ),
                    }

                    // Metadata arrays line up with statement keys, usable or not
                    ordinal += 1;
                }
            }
        }
    }

    tracing::debug!(
        "Extracted {} transactions ({} rows failed)",
        out.records.len(),
        out.failures.len()
    );

    if out.records.is_empty() {
        tracing::error!("No transaction data found in the JSON structure");
        return Err(IngestError::EmptyResult);
    }

    Ok(out)
}

fn collect(out: &mut Normalized, result: std::result::Result<CanonicalTransaction, String>) {
    let position = out.attempted() + 1;
    match result {
        Ok(mut tx) => {
            tx.source_position = position;
            out.records.push(tx);
        }
        Err(message) => {
            tracing::warn!("Skipping record {}: {}", position, message);
            out.failures.push(RecordError::new(position, message));
        }
    }
}

fn stamp(mut tx: CanonicalTransaction, batch_id: Option<&str>, client_name: Option<&str>) -> CanonicalTransaction {
    tx.work_order_id = batch_id.map(str::to_string);
    tx.client_name = client_name.map(str::to_string);
    tx
}

fn build_record(
    columns: &Columns<'_>,
    idx: usize,
    account_name: std::result::Result<Option<String>, String>,
    meta: &MetaSource<'_>,
) -> std::result::Result<CanonicalTransaction, String> {
    let amount = columns
        .number("amount", idx)?
        .ok_or_else(|| "amount is required".to_string())?;

    let mut tx = CanonicalTransaction::with_amount(amount);
    tx.raw_date = columns.text("date", idx)?;
    tx.description = columns.text("description", idx)?;
    tx.direction = columns.text("credit/debit", idx)?;
    tx.balance = columns.number("balance", idx)?;
    tx.account_number = account_text(columns.cell("account_number", idx)?);
    tx.reference = columns.text("reference", idx)?;
    tx.entities = columns.text("renamed_entity", idx)?;
    tx.od_limit = columns.number("od_limit", idx)?;
    tx.charges = columns.number("charges", idx)?;
    tx.bank_name = columns.text("bank_name", idx)?;
    tx.category = columns.text("category", idx)?;
    tx.category_2 = columns.text("category_2", idx)?;
    tx.mode = columns.text("mode", idx)?;

    tx.account_name = account_name?;
    tx.ifsc_code = meta.text("ifsc_code")?;
    tx.micr_code = meta.text("micr_code")?;
    tx.account_type = meta.text("account_type")?;
    tx.account_address = meta.text("account_address")?;
    tx.pincode = derive_pincode(tx.account_address.as_deref());

    Ok(tx)
}

// ============================================================================
// TESTS
// ============================================================================
