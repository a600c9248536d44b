//! Engine-independent rows moved through the pipeline.
//!
//! A [`Row`] is an ordered mapping from column name to [`Value`]. All rows of
//! one table read share a single column list, so cloning the column names per
//! row is avoided.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use smallvec::SmallVec;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A scalar value of a database column
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Exact numeric kept as its decimal text (DECIMAL, HUGEINT, ...)
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Check if this is a NULL value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as string slice, or None for non-text values
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get as signed integer, or None for non-integer values
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// Feed this value into a hasher, tagged by variant so that `1` and `'1'`
    /// hash differently.
    pub fn hash_into<H: Hasher>(&self, hasher: &mut H) {
        match self {
            Value::Null => 0u8.hash(hasher),
            Value::Bool(b) => {
                1u8.hash(hasher);
                b.hash(hasher);
            }
            Value::Int(i) => {
                2u8.hash(hasher);
                i.hash(hasher);
            }
            Value::UInt(u) => {
                3u8.hash(hasher);
                u.hash(hasher);
            }
            Value::Float(f) => {
                4u8.hash(hasher);
                f.to_bits().hash(hasher);
            }
            Value::Decimal(d) => {
                5u8.hash(hasher);
                d.hash(hasher);
            }
            Value::Text(s) => {
                6u8.hash(hasher);
                s.hash(hasher);
            }
            Value::Bytes(b) => {
                7u8.hash(hasher);
                b.hash(hasher);
            }
            Value::Date(d) => {
                8u8.hash(hasher);
                d.hash(hasher);
            }
            Value::Time(t) => {
                9u8.hash(hasher);
                t.hash(hasher);
            }
            Value::Timestamp(ts) => {
                10u8.hash(hasher);
                ts.hash(hasher);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Float(v) => write!(f, "{}", v),
            Value::Decimal(d) => f.write_str(d),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Shared, ordered list of column names for the rows of one table read
pub type Columns = Arc<[String]>;

/// One database record in flight
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Columns,
    values: Vec<Value>,
}

impl Row {
    /// Create a row. Panics if the value count does not match the columns,
    /// which would be a bug in the reader producing it.
    pub fn new(columns: Columns, values: Vec<Value>) -> Self {
        assert_eq!(
            columns.len(),
            values.len(),
            "row value count must match its column count"
        );
        Self { columns, values }
    }

    /// Column names, in order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Shared handle to the column list
    pub fn shared_columns(&self) -> &Columns {
        &self.columns
    }

    /// Values, in column order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume the row and return its values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look a value up by column name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.position(column).map(|i| &self.values[i])
    }

    /// Index of a column
    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Iterate over `(column, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Build a new row with the same columns and the given values
    pub fn with_values(&self, values: Vec<Value>) -> Self {
        Self::new(Arc::clone(&self.columns), values)
    }

    /// Compact 64-bit identity of this row.
    ///
    /// `key` holds the column indexes that identify the row (its primary key);
    /// when empty, every value takes part.
    pub fn identity_hash(&self, key: &[usize]) -> u64 {
        let mut hasher = ahash::AHasher::default();

        if key.is_empty() {
            (self.values.len() as u32).hash(&mut hasher);
            for v in &self.values {
                v.hash_into(&mut hasher);
            }
        } else {
            // Include arity so (1) and (1, NULL) differ
            (key.len() as u32).hash(&mut hasher);
            for &i in key {
                match self.values.get(i) {
                    Some(v) => v.hash_into(&mut hasher),
                    None => Value::Null.hash_into(&mut hasher),
                }
            }
        }

        hasher.finish()
    }

    /// Resolve column names into indexes for [`Row::identity_hash`]
    pub fn key_positions(columns: &[String], key_columns: &[String]) -> SmallVec<[usize; 2]> {
        key_columns
            .iter()
            .filter_map(|k| columns.iter().position(|c| c == k))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Columns {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_row_lookup() {
        let row = Row::new(
            cols(&["id", "email"]),
            vec![Value::Int(1), Value::from("a@example.com")],
        );

        assert_eq!(row.get("id"), Some(&Value::Int(1)));
        assert_eq!(row.get("email").and_then(Value::as_str), Some("a@example.com"));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.len(), 2);
    }

    #[test]
    #[should_panic]
    fn test_row_arity_mismatch_panics() {
        Row::new(cols(&["id"]), vec![Value::Int(1), Value::Null]);
    }

    #[test]
    fn test_identity_hash_by_key() {
        let columns = cols(&["id", "name"]);
        let a = Row::new(columns.clone(), vec![Value::Int(1), Value::from("a")]);
        let b = Row::new(columns.clone(), vec![Value::Int(1), Value::from("b")]);
        let c = Row::new(columns.clone(), vec![Value::Int(2), Value::from("a")]);

        let key = Row::key_positions(&columns, &["id".to_string()]);
        assert_eq!(a.identity_hash(&key), b.identity_hash(&key));
        assert_ne!(a.identity_hash(&key), c.identity_hash(&key));

        // Without a key all values count
        assert_ne!(a.identity_hash(&[]), b.identity_hash(&[]));
    }

    #[test]
    fn test_identity_hash_distinguishes_types() {
        let columns = cols(&["v"]);
        let int = Row::new(columns.clone(), vec![Value::Int(1)]);
        let text = Row::new(columns, vec![Value::from("1")]);
        assert_ne!(int.identity_hash(&[]), text.identity_hash(&[]));
    }

    #[test]
    fn test_with_values_shares_columns() {
        let row = Row::new(cols(&["id"]), vec![Value::Int(1)]);
        let next = row.with_values(vec![Value::Int(2)]);
        assert!(Arc::ptr_eq(row.shared_columns(), next.shared_columns()));
        assert_eq!(row.get("id"), Some(&Value::Int(1)));
    }
}
