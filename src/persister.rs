// 💾 Batch Persister - bounded, all-or-nothing chunks
//
// Each chunk is one storage transaction. The first failing chunk stops the
// run; chunks committed before it stay committed and are reported.

use crate::config::IngestConfig;
use crate::db::CanonicalTransaction;
use crate::error::{IngestError, StoreError};
use crate::store::TransactionSink;
use thiserror::Error;

/// A chunk failed after `committed` rows were already durable
#[derive(Debug, Error)]
#[error("insert failed after {committed} records committed: {source}")]
pub struct PersistError {
    pub committed: usize,
    #[source]
    pub source: StoreError,
}

impl From<PersistError> for IngestError {
    fn from(err: PersistError) -> Self {
        IngestError::Storage {
            committed: err.committed,
            message: err.source.to_string(),
        }
    }
}

/// Insert `rows` in order, `insert_chunk_size` at a time
///
/// Returns the number of rows committed. A chunk size of 0 is treated as 1.
pub fn persist<S: TransactionSink + ?Sized>(
    sink: &S,
    rows: &[CanonicalTransaction],
    config: &IngestConfig,
) -> Result<usize, PersistError> {
    let chunk_size = config.insert_chunk_size.max(1);
    let mut committed = 0;

    for (idx, chunk) in rows.chunks(chunk_size).enumerate() {
        match sink.insert_batch(chunk) {
            Ok(inserted) => {
                committed += inserted;
                tracing::debug!(
                    "Inserted chunk {} ({} rows, {} total)",
                    idx + 1,
                    inserted,
                    committed
                );
            }
            Err(source) => {
                tracing::error!(
                    "Chunk {} failed after {} records committed: {}",
                    idx + 1,
                    committed,
                    source
                );
                return Err(PersistError { committed, source });
            }
        }
    }

    tracing::info!("Saved {} transactions", committed);
    Ok(committed)
}
