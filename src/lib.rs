//! Bulk row insertion dispatched to a provider matched to the active
//! database connection.
//!
//! ```
//! use std::sync::Arc;
//! use bulkinsert::testing::RecordingContext;
//! use bulkinsert::{BulkInsertOptions, TableMapping, Value};
//!
//! let context = Arc::new(RecordingContext::new("Foo.Bar.Connection"));
//! let mut provider = bulkinsert::get_provider(context.clone())?;
//! let mapping = TableMapping::new("users", ["name"]);
//! let mut rows = vec![vec![Value::from("ada")], vec![Value::from("bob")]].into_iter();
//! let summary = provider.bulk_insert(&mapping, &mut rows, Some(&BulkInsertOptions::new().batch_size(100)))?;
//! assert_eq!(summary.rows_copied, 2);
//! assert_eq!(context.statements().len(), 1);
//! # Ok::<(), bulkinsert::Error>(())
//! ```

pub mod config;
pub mod context;
pub mod defaults;
pub mod error;
pub mod options;
pub mod provider;
pub mod row;
pub mod testing;

use std::sync::Arc;

pub use context::{Connection, ConnectionIdentity, DbContext};
pub use defaults::{defaults, reset_defaults, set_defaults, update_defaults, ExecutionDefaults};
pub use error::{Error, Result};
pub use options::{BulkCopyOptions, BulkInsertOptions, EffectiveOptions};
pub use provider::{
    registry, BulkInsertProvider, BulkInsertSummary, ProviderFactory, ProviderRegistry,
    StatementBulkInsertProvider,
};
pub use row::{Entity, Row, TableMapping, Value};

/// Register `factory` under `key` in the process-wide registry, replacing any
/// existing entry.
pub fn register<F, P>(key: impl Into<ConnectionIdentity>, factory: F)
where
    F: Fn() -> P + Send + Sync + 'static,
    P: BulkInsertProvider + 'static,
{
    registry().register(key, factory)
}

/// Register `factory` under the identifier its providers declare. One
/// throwaway provider is built to read it.
pub fn register_self_identifying<F, P>(factory: F) -> ConnectionIdentity
where
    F: Fn() -> P + Send + Sync + 'static,
    P: BulkInsertProvider + 'static,
{
    registry().register_self_identifying(factory)
}

/// Resolve a provider for `context` from the process-wide registry and bind
/// it to the context.
///
/// Falls back to the provider under the empty key when the connection
/// identity has no exact match. Fails with [`Error::ProviderNotFound`] when
/// neither exists, and with whatever `set_context` reports otherwise.
pub fn get_provider(context: Arc<dyn DbContext>) -> Result<Box<dyn BulkInsertProvider>> {
    registry().get_provider(context)
}

/// Alias of [`get_provider`].
pub fn get(context: Arc<dyn DbContext>) -> Result<Box<dyn BulkInsertProvider>> {
    get_provider(context)
}
