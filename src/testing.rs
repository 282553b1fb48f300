//! In-process connection and context that record every statement.
//!
//! Useful for exercising providers against the contract without a database.

use std::any::Any;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::context::{Connection, ConnectionIdentity, DbContext};
use crate::row::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Records statements instead of executing them. Affected-row counts are not
/// tracked and always reported as zero.
#[derive(Debug, Default)]
pub struct RecordingConnection {
    statements: Vec<Statement>,
    closed: bool,
    fail_on: Option<usize>,
    attempts: usize,
    delay: Option<Duration>,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`-th (1-based) statement passed to `execute`.
    pub fn fail_on_statement(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// Sleep for `delay` before each statement.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }
}

impl Connection for RecordingConnection {
    fn is_open(&self) -> bool {
        !self.closed
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        if self.closed {
            return Err(anyhow!("connection is closed"));
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.attempts += 1;
        if self.fail_on == Some(self.attempts) {
            return Err(anyhow!("statement {} rejected", self.attempts));
        }
        self.statements.push(Statement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        Ok(0)
    }
}

/// A context around a [`RecordingConnection`] that reports a chosen identity.
pub struct RecordingContext {
    identity: ConnectionIdentity,
    connection: Mutex<RecordingConnection>,
}

impl RecordingContext {
    pub fn new(identity: impl Into<ConnectionIdentity>) -> Self {
        Self::with_connection(identity, RecordingConnection::new())
    }

    pub fn with_connection(identity: impl Into<ConnectionIdentity>, connection: RecordingConnection) -> Self {
        Self {
            identity: identity.into(),
            connection: Mutex::new(connection),
        }
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.connection.lock().statements().to_vec()
    }

    pub fn close(&self) {
        self.connection.lock().close();
    }
}

impl DbContext for RecordingContext {
    fn connection_identity(&self) -> ConnectionIdentity {
        self.identity.clone()
    }

    fn connection(&self) -> Option<MappedMutexGuard<'_, dyn Connection>> {
        Some(MutexGuard::map(self.connection.lock(), |c| c as &mut dyn Connection))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_and_fails_on_request() {
        let mut conn = RecordingConnection::new().fail_on_statement(2);
        conn.execute("SELECT 1", &[]).unwrap();
        assert!(conn.execute("SELECT 2", &[Value::Int(2)]).is_err());
        conn.execute("SELECT 3", &[]).unwrap();
        let sql: Vec<_> = conn.statements().iter().map(|s| s.sql.as_str()).collect();
        assert_eq!(sql, vec!["SELECT 1", "SELECT 3"]);
    }

    #[test]
    fn test_closed_context_reports_closed_connection() {
        let ctx = RecordingContext::new("Foo.Bar.Connection");
        assert!(ctx.connection().unwrap().is_open());
        ctx.close();
        assert!(!ctx.connection().unwrap().is_open());
        assert_eq!(ctx.connection_identity().as_str(), "Foo.Bar.Connection");
    }
}
