use std::any::Any;
use std::error::Error as StdError;

use anyhow::{Context, Result};
use bytes::BytesMut;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use postgres::{Client, NoTls};
use url::Url;

use crate::context::{Connection, ConnectionIdentity, DbContext};
use crate::row::Value;

/// Generic statement access over a `postgres::Client`.
pub struct PgConnection {
    client: Client,
}

impl PgConnection {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }
}

impl Connection for PgConnection {
    fn is_open(&self) -> bool {
        !self.client.is_closed()
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        if params.is_empty() {
            self.client.batch_execute(sql)?;
            return Ok(0);
        }
        let values: Vec<PgValue<'_>> = params.iter().map(PgValue).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        Ok(self.client.execute(sql, &refs)?)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }
}

/// Binds a [`Value`] to the type the server inferred for the parameter.
///
/// Numbers widen or narrow to the column's integer and float types. Bools and
/// numbers bound to a text-like parameter are sent in their text form. Any
/// other mismatch is an error rather than raw bytes.
#[derive(Debug)]
struct PgValue<'a>(&'a Value);

impl ToSql for PgValue<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) if <bool as ToSql>::accepts(ty) => b.to_sql(ty, out),
            Value::Int(i) if *ty == Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
            Value::Int(i) if *ty == Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
            Value::Int(i) if *ty == Type::INT8 => i.to_sql(ty, out),
            Value::Int(i) if *ty == Type::FLOAT8 => (*i as f64).to_sql(ty, out),
            Value::Float(f) if *ty == Type::FLOAT4 => (*f as f32).to_sql(ty, out),
            Value::Float(f) if *ty == Type::FLOAT8 => f.to_sql(ty, out),
            Value::Text(s) if <String as ToSql>::accepts(ty) => s.to_sql(ty, out),
            Value::Bytes(b) if <Vec<u8> as ToSql>::accepts(ty) => b.to_sql(ty, out),
            Value::Bool(b) if <String as ToSql>::accepts(ty) => b.to_string().to_sql(ty, out),
            Value::Int(i) if <String as ToSql>::accepts(ty) => i.to_string().to_sql(ty, out),
            Value::Float(f) if <String as ToSql>::accepts(ty) => f.to_string().to_sql(ty, out),
            other => Err(format!("cannot bind {:?} to a parameter of type {}", other, ty).into()),
        }
    }

    fn accepts(ty: &Type) -> bool {
        <bool as ToSql>::accepts(ty)
            || <String as ToSql>::accepts(ty)
            || <Vec<u8> as ToSql>::accepts(ty)
            || [Type::INT2, Type::INT4, Type::INT8, Type::FLOAT4, Type::FLOAT8].contains(ty)
    }

    to_sql_checked!();
}

/// A database context over a single PostgreSQL client.
///
/// Its identity is the `postgres::Client` type name, which is also what
/// [`PostgresCopyProvider`](super::PostgresCopyProvider) declares.
pub struct PgContext {
    connection: Mutex<PgConnection>,
}

impl PgContext {
    pub fn new(client: Client) -> Self {
        Self {
            connection: Mutex::new(PgConnection::new(client)),
        }
    }

    pub fn connect(dsn: &str) -> Result<Self> {
        let client = Client::connect(dsn, NoTls)
            .with_context(|| format!("connecting to database: {}", redacted(dsn)))?;
        Ok(Self::new(client))
    }

    pub fn identity() -> ConnectionIdentity {
        ConnectionIdentity::of::<Client>()
    }

    pub(crate) fn lock_client(&self) -> MappedMutexGuard<'_, Client> {
        MutexGuard::map(self.connection.lock(), |c| c.client())
    }
}

impl DbContext for PgContext {
    fn connection_identity(&self) -> ConnectionIdentity {
        Self::identity()
    }

    fn connection(&self) -> Option<MappedMutexGuard<'_, dyn Connection>> {
        Some(MutexGuard::map(self.connection.lock(), |c| c as &mut dyn Connection))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn redacted(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) => {
            if url.password().is_some() {
                // failing to mask is not fatal for an error message
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => dsn.to_string(),
    }
}
