//! The bundled default provider: batched multi-row `INSERT` statements over
//! any context exposing a generic [`Connection`].

use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use log::{debug, info, warn};

use super::{BulkInsertProvider, BulkInsertSummary};
use crate::context::{Connection, DbContext};
use crate::error::{Error, Result};
use crate::options::{BulkCopyOptions, BulkInsertOptions, EffectiveOptions, ProgressNotifier};
use crate::row::{Row, TableMapping, Value};

/// Flags with no portable statement-level expression.
const UNSUPPORTED_FLAGS: BulkCopyOptions = BulkCopyOptions::TABLE_LOCK
    .union(BulkCopyOptions::CHECK_CONSTRAINTS)
    .union(BulkCopyOptions::FIRE_TRIGGERS);

/// Default provider, registered under the empty key.
///
/// Honors `batch_size`, `timeout_secs`, `notify_after` and the
/// `KEEP_IDENTITY`, `KEEP_NULLS` and `USE_INTERNAL_TRANSACTION` flags. The
/// timeout is checked between batches. A failed batch aborts the insert;
/// earlier batches stay committed.
#[derive(Default)]
pub struct StatementBulkInsertProvider {
    context: Option<Arc<dyn DbContext>>,
}

impl StatementBulkInsertProvider {
    pub fn new() -> Self {
        Self { context: None }
    }
}

impl BulkInsertProvider for StatementBulkInsertProvider {
    fn provider_identifier(&self) -> &str {
        ""
    }

    fn set_context(&mut self, context: Arc<dyn DbContext>) -> Result<&mut dyn BulkInsertProvider> {
        {
            let conn = context.connection().ok_or_else(|| {
                Error::InvalidContext(format!(
                    "connection '{}' does not expose statement execution",
                    context.connection_identity()
                ))
            })?;
            if !conn.is_open() {
                return Err(Error::InvalidContext(format!(
                    "connection '{}' is not open",
                    context.connection_identity()
                )));
            }
        }
        self.context = Some(context);
        Ok(self)
    }

    fn bulk_insert(
        &mut self,
        mapping: &TableMapping,
        rows: &mut dyn Iterator<Item = Row>,
        options: Option<&BulkInsertOptions>,
    ) -> Result<BulkInsertSummary> {
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| Error::InvalidContext("provider is not bound to a context".into()))?;
        let opts = EffectiveOptions::resolve(options)?;
        let columns = mapping.insert_columns(opts.has(BulkCopyOptions::KEEP_IDENTITY));
        if columns.is_empty() {
            return Err(Error::InvalidOptions(format!(
                "no insertable columns mapped for table '{}'",
                mapping.table
            )));
        }
        if opts.bulk_copy_options.intersects(UNSUPPORTED_FLAGS) {
            debug!(
                "statement provider ignores {:?}",
                opts.bulk_copy_options & UNSUPPORTED_FLAGS
            );
        }

        let mut conn = context
            .connection()
            .ok_or_else(|| Error::InvalidContext("context no longer exposes a connection".into()))?;
        if !conn.is_open() {
            return Err(Error::InvalidContext(format!(
                "connection '{}' is not open",
                context.connection_identity()
            )));
        }

        let started = Instant::now();
        let deadline = opts.deadline(started);
        let mut notifier = ProgressNotifier::new(&opts);
        let mut summary = BulkInsertSummary::default();
        let mut batch: Vec<Row> = Vec::with_capacity(opts.batch_size);

        loop {
            // Checked before pulling so rows not yet copied stay in `rows`.
            if deadline.is_some_and(|d| Instant::now() >= d) && rows.size_hint().1 != Some(0) {
                return Err(Error::Timeout {
                    timeout_secs: opts.timeout_secs(),
                    rows_copied: summary.rows_copied,
                });
            }
            batch.clear();
            batch.extend((&mut *rows).take(opts.batch_size));
            if batch.is_empty() {
                break;
            }
            insert_batch(&mut *conn, mapping, &columns, &batch, &opts).map_err(|source| {
                Error::BulkInsert {
                    rows_copied: summary.rows_copied,
                    source,
                }
            })?;
            summary.rows_copied += batch.len() as u64;
            summary.batches += 1;
            debug!(
                "-- batch {}: {} row(s) into {}",
                summary.batches,
                batch.len(),
                mapping.table
            );
            notifier.advance(summary.rows_copied);
        }

        summary.elapsed = started.elapsed();
        info!(
            "inserted {} row(s) into {} in {} batch(es) ({:?})",
            summary.rows_copied, mapping.table, summary.batches, summary.elapsed
        );
        Ok(summary)
    }
}

fn insert_batch(
    conn: &mut dyn Connection,
    mapping: &TableMapping,
    columns: &[usize],
    batch: &[Row],
    opts: &EffectiveOptions,
) -> anyhow::Result<()> {
    let (sql, params) = build_insert(conn, mapping, columns, batch, opts.has(BulkCopyOptions::KEEP_NULLS))?;
    if !opts.has(BulkCopyOptions::USE_INTERNAL_TRANSACTION) {
        conn.execute(&sql, &params)?;
        return Ok(());
    }

    conn.execute("BEGIN", &[])?;
    if let Err(e) = conn.execute(&sql, &params) {
        if let Err(rollback) = conn.execute("ROLLBACK", &[]) {
            warn!("rollback after failed batch also failed: {}", rollback);
        }
        return Err(e);
    }
    conn.execute("COMMIT", &[])?;
    Ok(())
}

/// Multi-row `INSERT` for one batch. Nulls become `DEFAULT` unless
/// `keep_nulls` is set.
fn build_insert(
    conn: &dyn Connection,
    mapping: &TableMapping,
    columns: &[usize],
    batch: &[Row],
    keep_nulls: bool,
) -> anyhow::Result<(String, Vec<Value>)> {
    let table = mapping
        .table
        .split('.')
        .map(|part| conn.quote_ident(part))
        .collect::<Vec<_>>()
        .join(".");
    let column_list = columns
        .iter()
        .map(|&i| conn.quote_ident(&mapping.columns[i]))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("INSERT INTO {} ({}) VALUES ", table, column_list);
    let mut params = Vec::with_capacity(batch.len() * columns.len());
    for (r, row) in batch.iter().enumerate() {
        if row.len() != mapping.columns.len() {
            bail!(
                "row has {} value(s) but table '{}' maps {} column(s)",
                row.len(),
                mapping.table,
                mapping.columns.len()
            );
        }
        if r > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (c, &i) in columns.iter().enumerate() {
            if c > 0 {
                sql.push_str(", ");
            }
            let value = &row[i];
            if value.is_null() && !keep_nulls {
                sql.push_str("DEFAULT");
            } else {
                params.push(value.clone());
                sql.push_str(&conn.placeholder(params.len()));
            }
        }
        sql.push(')');
    }
    Ok((sql, params))
}
