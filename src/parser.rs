// 🏗️ Document Parser - bytes → RawDocument
// Validates the upload, pulls out the three sections we care about and
// resolves which of the two known dialects the transaction section uses.

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use serde_json::{Map, Value};

// ============================================================================
// CORE TYPES
// ============================================================================

/// Shape of the transaction-bearing section, resolved once at parse time
#[derive(Debug, Clone, PartialEq)]
pub enum Dialect {
    /// `{"date": [...], "amount": [...], ...}` - one record per array index
    Columnar(Map<String, Value>),

    /// `[{"bankstatement_1": {columnar}, ...}, ...]` - one columnar block per statement key
    NestedList(Vec<Value>),
}

impl Dialect {
    /// Human-readable name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Columnar(_) => "columnar",
            Dialect::NestedList(_) => "nested-list",
        }
    }
}

/// Parsed upload, owned transiently until normalization
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Work order id; `None` when absent or blank
    pub batch_id: Option<String>,

    pub transactions: Dialect,

    /// Shared metadata; empty when the document has none
    pub metadata: Map<String, Value>,
}

// ============================================================================
// PARSING
// ============================================================================

/// Parse an uploaded buffer into a `RawDocument`
///
/// # Errors
/// * `MalformedInput` - empty buffer, invalid JSON, or a non-object top level
/// * `MissingRequiredSection` - transaction section absent or empty
/// * `UnsupportedDialect` - transaction/metadata section has an unknown shape
pub fn parse_document(bytes: &[u8], config: &IngestConfig) -> Result<RawDocument> {
    if bytes.is_empty() {
        return Err(IngestError::malformed("Uploaded file is empty"));
    }

    tracing::debug!("Parsing JSON contents ({} bytes)", bytes.len());
    let root: Value =
        serde_json::from_slice(bytes).map_err(|e| IngestError::malformed(format!("invalid JSON: {}", e)))?;

    let mut root = match root {
        Value::Object(map) => map,
        other => {
            return Err(IngestError::malformed(format!(
                "expected a JSON object at the top level, found {}",
                json_type_name(&other)
            )))
        }
    };

    let batch_id = extract_batch_id(&root, config);
    tracing::debug!("Work order ID: {:?}", batch_id);

    let section = root.remove(&config.transactions_key).unwrap_or(Value::Null);
    if is_empty_section(&section) {
        return Err(IngestError::MissingRequiredSection(
            config.transactions_key.clone(),
        ));
    }

    let transactions = detect_dialect(section, &config.statement_marker)?;

    let metadata = match root.remove(&config.metadata_key) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(IngestError::unsupported(format!(
                "'{}' must be an object, found {}",
                config.metadata_key,
                json_type_name(&other)
            )))
        }
    };

    tracing::debug!(
        "Document parsed: dialect={}, metadata keys={}",
        transactions.name(),
        metadata.len()
    );

    Ok(RawDocument {
        batch_id,
        transactions,
        metadata,
    })
}

/// Resolve the dialect from the concrete shape of the transaction section
pub fn detect_dialect(section: Value, marker: &str) -> Result<Dialect> {
    match section {
        Value::Object(map) => {
            if matches!(map.get("date"), Some(Value::Array(_))) {
                Ok(Dialect::Columnar(map))
            } else {
                Err(IngestError::unsupported(
                    "columnar transaction section has no 'date' array",
                ))
            }
        }
        Value::Array(items) => {
            if items.iter().any(|item| has_statement_block(item, marker)) {
                Ok(Dialect::NestedList(items))
            } else {
                Err(IngestError::unsupported(format!(
                    "no element of the transaction list carries a '{}*' object",
                    marker
                )))
            }
        }
        other => Err(IngestError::unsupported(format!(
            "unexpected type for transaction section: {}. Expected object or array",
            json_type_name(&other)
        ))),
    }
}

/// True when `key` names a statement block (case-insensitive prefix match)
pub fn is_statement_key(key: &str, marker: &str) -> bool {
    key.to_lowercase().starts_with(marker)
}

fn has_statement_block(item: &Value, marker: &str) -> bool {
    item.as_object().map_or(false, |obj| {
        obj.iter()
            .any(|(key, value)| is_statement_key(key, marker) && value.is_object())
    })
}

fn extract_batch_id(root: &Map<String, Value>, config: &IngestConfig) -> Option<String> {
    let value = root.get(&config.batch_section)?.get(&config.batch_id_key)?;
    let id = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

fn is_empty_section(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// TESTS
// ============================================================================
