use std::any::Any;
use std::fmt;

use anyhow::Result;
use parking_lot::MappedMutexGuard;

use crate::row::Value;

/// Key identifying the driver/type behind a database connection.
///
/// The empty identity is the default (fallback) registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ConnectionIdentity(String);

impl ConnectionIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Identity derived from the fully-qualified type name of a connection
    /// implementation, e.g. `postgres::client::Client`.
    pub fn of<T: ?Sized>() -> Self {
        Self(std::any::type_name::<T>().to_string())
    }

    /// The reserved fallback key.
    pub fn fallback() -> Self {
        Self(String::new())
    }

    pub fn is_fallback(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionIdentity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ConnectionIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Generic statement-level access to a database connection.
///
/// This is all the bundled default provider needs. Backend providers usually
/// bypass it and downcast the context to reach their native client.
pub trait Connection: Send {
    /// Whether the connection can currently execute statements.
    fn is_open(&self) -> bool;

    /// Execute one statement with positional parameters, returning the number
    /// of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Placeholder for the 1-based parameter `index`.
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// A database context as seen by the registry and providers.
pub trait DbContext: Send + Sync {
    /// Identity of the underlying connection type; the registry lookup key.
    fn connection_identity(&self) -> ConnectionIdentity;

    /// Lock and return the generic connection, if this context exposes one.
    fn connection(&self) -> Option<MappedMutexGuard<'_, dyn Connection>>;

    fn as_any(&self) -> &dyn Any;
}
