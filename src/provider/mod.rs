#[cfg(feature = "postgres-backend")]
pub mod postgres;
pub mod registry;
pub mod statement;

use std::sync::Arc;
use std::time::Duration;

use crate::context::DbContext;
use crate::error::Result;
use crate::options::BulkInsertOptions;
use crate::row::{Entity, Row, TableMapping};

pub use registry::{registry, ProviderFactory, ProviderRegistry};
pub use statement::StatementBulkInsertProvider;

/// A backend-specific bulk insert implementation.
///
/// Providers are built by a registered factory, bound to one context with
/// [`set_context`](BulkInsertProvider::set_context) and then used by a single
/// caller. They are never shared between threads by the registry.
///
/// Factories may be invoked just to read [`provider_identifier`], so
/// construction must not have side effects.
///
/// [`provider_identifier`]: BulkInsertProvider::provider_identifier
pub trait BulkInsertProvider: Send {
    /// Connection identity this provider targets. The empty string marks a
    /// default provider.
    fn provider_identifier(&self) -> &str;

    /// Bind to `context`, replacing any previous binding.
    ///
    /// Fails with [`Error::InvalidContext`](crate::Error::InvalidContext) if
    /// the context cannot yield a usable connection.
    fn set_context(&mut self, context: Arc<dyn DbContext>) -> Result<&mut dyn BulkInsertProvider>;

    /// Insert `rows` in batches, honoring `options` with unset fields falling
    /// back to the execution defaults.
    ///
    /// Rows are consumed once, in order. The first failing batch aborts the
    /// operation; the error reports how many rows were copied before it.
    fn bulk_insert(
        &mut self,
        mapping: &TableMapping,
        rows: &mut dyn Iterator<Item = Row>,
        options: Option<&BulkInsertOptions>,
    ) -> Result<BulkInsertSummary>;
}

impl<'a> dyn BulkInsertProvider + 'a {
    /// Bulk insert a sequence of entities of one type.
    pub fn insert<I>(&mut self, entities: I, options: Option<&BulkInsertOptions>) -> Result<BulkInsertSummary>
    where
        I: IntoIterator,
        I::Item: Entity,
    {
        let mapping = <I::Item as Entity>::mapping();
        let mut rows = entities.into_iter().map(|e| e.to_row());
        self.bulk_insert(&mapping, &mut rows, options)
    }
}

/// Outcome of a completed bulk insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BulkInsertSummary {
    pub rows_copied: u64,
    pub batches: usize,
    pub elapsed: Duration,
}
