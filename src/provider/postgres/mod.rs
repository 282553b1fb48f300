//! PostgreSQL provider streaming batches through `COPY ... FROM STDIN`.

pub mod context;

use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use log::{debug, info};
use postgres::Client;

pub use context::{PgConnection, PgContext};

use super::{BulkInsertProvider, BulkInsertSummary};
use crate::context::DbContext;
use crate::error::{Error, Result};
use crate::options::{BulkCopyOptions, BulkInsertOptions, EffectiveOptions, ProgressNotifier};
use crate::row::{Row, TableMapping, Value};

/// Bulk inserts into PostgreSQL with the text `COPY` protocol.
///
/// Each batch runs in its own transaction. Inside it the provider:
/// - applies `SET LOCAL statement_timeout` when a timeout is set;
/// - takes `LOCK TABLE ... IN SHARE ROW EXCLUSIVE MODE` with `TABLE_LOCK`;
/// - leaves the identity column out unless `KEEP_IDENTITY` is set.
///
/// Nulls are always copied as NULL. PostgreSQL checks constraints and fires
/// triggers during `COPY` regardless of flags.
///
/// Binds only to a [`PgContext`]. Register it with
/// `register_self_identifying(PostgresCopyProvider::new)`.
#[derive(Default)]
pub struct PostgresCopyProvider {
    context: Option<Arc<dyn DbContext>>,
}

impl PostgresCopyProvider {
    pub fn new() -> Self {
        Self { context: None }
    }
}

fn pg_context(context: &Arc<dyn DbContext>) -> Result<&PgContext> {
    context.as_any().downcast_ref::<PgContext>().ok_or_else(|| {
        Error::InvalidContext(format!(
            "postgres provider needs a PgContext, got connection '{}'",
            context.connection_identity()
        ))
    })
}

impl BulkInsertProvider for PostgresCopyProvider {
    fn provider_identifier(&self) -> &str {
        std::any::type_name::<Client>()
    }

    fn set_context(&mut self, context: Arc<dyn DbContext>) -> Result<&mut dyn BulkInsertProvider> {
        if pg_context(&context)?.lock_client().is_closed() {
            return Err(Error::InvalidContext("postgres connection is closed".into()));
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
        let pg = pg_context(context)?;
        let opts = EffectiveOptions::resolve(options)?;
        let columns = mapping.insert_columns(opts.has(BulkCopyOptions::KEEP_IDENTITY));
        if columns.is_empty() {
            return Err(Error::InvalidOptions(format!(
                "no insertable columns mapped for table '{}'",
                mapping.table
            )));
        }
        let table = quote_table(&mapping.table);
        let copy_sql = copy_statement(&table, mapping, &columns);
        debug!("-- copy: {}", copy_sql);

        let mut client = pg.lock_client();
        if client.is_closed() {
            return Err(Error::InvalidContext("postgres connection is closed".into()));
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
            copy_batch(&mut client, &table, &copy_sql, mapping, &columns, &batch, &opts).map_err(
                |source| Error::BulkInsert {
                    rows_copied: summary.rows_copied,
                    source,
                },
            )?;
            summary.rows_copied += batch.len() as u64;
            summary.batches += 1;
            notifier.advance(summary.rows_copied);
        }

        summary.elapsed = started.elapsed();
        info!(
            "copied {} row(s) into {} in {} batch(es) ({:?})",
            summary.rows_copied, mapping.table, summary.batches, summary.elapsed
        );
        Ok(summary)
    }
}

fn copy_batch(
    client: &mut Client,
    table: &str,
    copy_sql: &str,
    mapping: &TableMapping,
    columns: &[usize],
    batch: &[Row],
    opts: &EffectiveOptions,
) -> anyhow::Result<()> {
    let mut data = String::new();
    for row in batch {
        encode_row(&mut data, mapping, columns, row)?;
    }

    let mut tx = client.transaction()?;
    if let Some(timeout) = opts.timeout {
        tx.batch_execute(&statement_timeout_sql(timeout))?;
    }
    if opts.has(BulkCopyOptions::TABLE_LOCK) {
        tx.batch_execute(&format!("LOCK TABLE {} IN SHARE ROW EXCLUSIVE MODE", table))?;
    }
    let mut writer = tx.copy_in(copy_sql)?;
    writer.write_all(data.as_bytes())?;
    writer.finish()?;
    tx.commit()?;
    Ok(())
}

/// `statement_timeout` is an `i32` of milliseconds on the server.
fn statement_timeout_sql(timeout: Duration) -> String {
    let millis = timeout.as_millis().min(i32::MAX as u128);
    format!("SET LOCAL statement_timeout = {}", millis)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_table(table: &str) -> String {
    table.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

fn copy_statement(table: &str, mapping: &TableMapping, columns: &[usize]) -> String {
    let column_list = columns
        .iter()
        .map(|&i| quote_ident(&mapping.columns[i]))
        .collect::<Vec<_>>()
        .join(", ");
    format!("COPY {} ({}) FROM STDIN", table, column_list)
}

/// Append one row in `COPY` text format.
fn encode_row(out: &mut String, mapping: &TableMapping, columns: &[usize], row: &Row) -> anyhow::Result<()> {
    if row.len() != mapping.columns.len() {
        bail!(
            "row has {} value(s) but table '{}' maps {} column(s)",
            row.len(),
            mapping.table,
            mapping.columns.len()
        );
    }
    for (c, &i) in columns.iter().enumerate() {
        if c > 0 {
            out.push('\t');
        }
        encode_value(out, &row[i]);
    }
    out.push('\n');
    Ok(())
}

fn encode_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("\\N"),
        Value::Bool(b) => out.push(if *b { 't' } else { 'f' }),
        Value::Int(i) => {
            let _ = write!(out, "{}", i);
        }
        Value::Float(f) if f.is_nan() => out.push_str("NaN"),
        Value::Float(f) if f.is_infinite() => {
            out.push_str(if *f > 0.0 { "Infinity" } else { "-Infinity" })
        }
        Value::Float(f) => {
            let _ = write!(out, "{}", f);
        }
        Value::Text(s) => escape_text(out, s),
        Value::Bytes(bytes) => {
            out.push_str("\\\\x");
            for b in bytes {
                let _ = write!(out, "{:02x}", b);
            }
        }
    }
}

fn escape_text(out: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingContext;

    fn encoded(row: Row, mapping: &TableMapping, keep_identity: bool) -> String {
        let mut out = String::new();
        encode_row(&mut out, mapping, &mapping.insert_columns(keep_identity), &row).unwrap();
        out
    }

    #[test]
    fn test_copy_statement_skips_identity() {
        let mapping = TableMapping::new("app.events", ["id", "kind", "payload"]).with_identity("id");
        let table = quote_table(&mapping.table);
        assert_eq!(
            copy_statement(&table, &mapping, &mapping.insert_columns(false)),
            r#"COPY "app"."events" ("kind", "payload") FROM STDIN"#
        );
    }

    #[test]
    fn test_encode_row_escapes_text() {
        let mapping = TableMapping::new("t", ["id", "a", "b", "c"]);
        let row = vec![
            Value::Int(7),
            Value::Text("tab\there\nback\\slash".into()),
            Value::Null,
            Value::Bool(true),
        ];
        assert_eq!(
            encoded(row, &mapping, true),
            "7\ttab\\there\\nback\\\\slash\t\\N\tt\n"
        );
    }

    #[test]
    fn test_encode_bytes_and_floats() {
        let mapping = TableMapping::new("t", ["a", "b", "c"]);
        let row = vec![
            Value::Bytes(vec![0xde, 0xad]),
            Value::Float(f64::NEG_INFINITY),
            Value::Float(1.5),
        ];
        assert_eq!(encoded(row, &mapping, true), "\\\\xdead\t-Infinity\t1.5\n");
    }

    #[test]
    fn test_statement_timeout_is_capped() {
        assert_eq!(
            statement_timeout_sql(Duration::from_secs(30)),
            "SET LOCAL statement_timeout = 30000"
        );
        assert_eq!(
            statement_timeout_sql(Duration::from_secs(u64::MAX)),
            "SET LOCAL statement_timeout = 2147483647"
        );
    }

    #[test]
    fn test_encode_rejects_short_rows() {
        let mapping = TableMapping::new("t", ["a", "b"]);
        let mut out = String::new();
        assert!(encode_row(&mut out, &mapping, &[0, 1], &vec![Value::Int(1)]).is_err());
    }

    #[test]
    fn test_rejects_non_postgres_context() {
        let mut provider = PostgresCopyProvider::new();
        let ctx = Arc::new(RecordingContext::new(PgContext::identity()));
        assert!(matches!(provider.set_context(ctx), Err(Error::InvalidContext(_))));
    }
}
