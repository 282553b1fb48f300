use std::fmt;

/// A single column value handed to a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

macro_rules! value_from {
    ($variant:ident: $($ty:ty),+) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )+
    };
}

value_from!(Bool: bool);
value_from!(Int: i8, i16, i32, i64, u8, u16, u32);
value_from!(Float: f32, f64);
value_from!(Text: String, &str);
value_from!(Bytes: Vec<u8>, &[u8]);

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Values in the column order of a [`TableMapping`].
pub type Row = Vec<Value>;

/// Target table and column layout for a bulk insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    pub table: String,
    pub columns: Vec<String>,
    /// Column whose values the database normally assigns.
    pub identity_column: Option<String>,
}

impl TableMapping {
    pub fn new<I, S>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            identity_column: None,
        }
    }

    pub fn with_identity(mut self, column: impl Into<String>) -> Self {
        self.identity_column = Some(column.into());
        self
    }

    /// Indexes of the columns to write. The identity column is skipped unless
    /// `keep_identity` is set.
    pub fn insert_columns(&self, keep_identity: bool) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| keep_identity || self.identity_column.as_deref() != Some(c.as_str()))
            .map(|(i, _)| i)
            .collect()
    }
}

/// An application type that can be bulk inserted.
pub trait Entity {
    fn mapping() -> TableMapping
    where
        Self: Sized;

    /// Values in the order of [`Entity::mapping`]'s columns.
    fn to_row(&self) -> Row;
}

impl<E: Entity> Entity for &E {
    fn mapping() -> TableMapping {
        E::mapping()
    }

    fn to_row(&self) -> Row {
        (**self).to_row()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_columns_skips_identity() {
        let mapping = TableMapping::new("users", ["id", "name", "email"]).with_identity("id");
        assert_eq!(mapping.insert_columns(false), vec![1, 2]);
        assert_eq!(mapping.insert_columns(true), vec![0, 1, 2]);
    }

    #[test]
    fn test_insert_columns_without_identity() {
        let mapping = TableMapping::new("users", ["id", "name"]);
        assert_eq!(mapping.insert_columns(false), vec![0, 1]);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(3i32), Value::Int(3));
        assert_eq!(Value::from("a"), Value::Text("a".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(true)), Value::Bool(true));
        assert!(Value::Null.is_null());
    }
}
