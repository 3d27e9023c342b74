// ⚙️ Configuration - explicit structs handed to each component
// Defaults match the upstream export format; env vars override at startup.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

// ============================================================================
// INGEST CONFIG
// ============================================================================

/// Tunables for parsing, masking and persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Rows per storage transaction (default: 500)
    pub insert_chunk_size: usize,

    /// Character that replaces hidden account digits
    pub mask_char: char,

    /// Trailing characters revealed for a never-seen account
    pub reveal_digits: usize,

    /// Trailing characters revealed once the short mask is already stored
    pub extended_reveal_digits: usize,

    /// Account numbers this long or shorter are stored as-is
    pub short_account_len: usize,

    /// Top-level section holding the batch identifier
    pub batch_section: String,

    /// Key of the batch identifier inside `batch_section`
    pub batch_id_key: String,

    /// Transaction-bearing section
    pub transactions_key: String,

    /// Shared metadata section
    pub metadata_key: String,

    /// Lower-case prefix of statement keys in the nested-list dialect
    pub statement_marker: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            insert_chunk_size: 500,
            mask_char: 'X',
            reveal_digits: 4,
            extended_reveal_digits: 5,
            short_account_len: 4,
            batch_section: "A0000".to_string(),
            batch_id_key: "Workorder ID".to_string(),
            transactions_key: "Xns".to_string(),
            metadata_key: "MetaData".to_string(),
            statement_marker: "bankstatement".to_string(),
        }
    }
}

impl IngestConfig {
    /// Same config with a different chunk size
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.insert_chunk_size = size;
        self
    }
}

// ============================================================================
// SERVER CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum upload size in bytes (default: 50MB)
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ============================================================================
// APP CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub ingest: IngestConfig,
    pub server: ServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from("transactions.db"),
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `.env` (if any) and apply environment overrides to the defaults
    pub fn from_env() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!("Ignoring unreadable .env file: {}", e),
        }

        let mut config = AppConfig::default();

        if let Ok(path) = env::var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Ok(host) = env::var("HOST") {
            config.server.host = host;
        }
        if let Some(port) = parse_var("PORT") {
            config.server.port = port;
        }
        if let Some(bytes) = parse_var("MAX_UPLOAD_BYTES") {
            config.server.max_upload_bytes = bytes;
        }
        if let Some(size) = parse_var::<usize>("INSERT_BATCH_SIZE") {
            config.ingest.insert_chunk_size = size.max(1);
        }

        config
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}
