use thiserror::Error;

use crate::context::ConnectionIdentity;

/// Errors surfaced by the registry, the dispatch entry point and the bundled
/// providers.
///
/// Every variant is a distinct kind so callers can tell "no provider" apart
/// from "bad context" and "insert failed".
#[derive(Debug, Error)]
pub enum Error {
    /// Neither an exact nor a fallback factory is registered.
    #[error("no bulk insert provider registered for connection '{0}' and no default provider")]
    ProviderNotFound(ConnectionIdentity),

    /// The context cannot yield a usable connection for this provider.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    /// Effective options failed validation. Nothing was executed.
    #[error("invalid bulk insert options: {0}")]
    InvalidOptions(String),

    /// A batch failed. Rows from earlier batches may already be persisted.
    #[error("bulk insert failed after {rows_copied} row(s)")]
    BulkInsert {
        rows_copied: u64,
        #[source]
        source: anyhow::Error,
    },

    /// The operation ran past its timeout before all rows were copied.
    #[error("bulk insert timed out after {timeout_secs}s ({rows_copied} row(s) copied)")]
    Timeout { timeout_secs: u64, rows_copied: u64 },
}

impl Error {
    /// Rows known to be persisted when the error was raised, if applicable.
    pub fn rows_copied(&self) -> Option<u64> {
        match self {
            Error::BulkInsert { rows_copied, .. } | Error::Timeout { rows_copied, .. } => {
                Some(*rows_copied)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
