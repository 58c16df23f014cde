//! Wire value model: typed bind/result values and query results.

use serde::{Deserialize, Serialize};

/// A typed value crossing the gateway boundary, either as a bind variable
/// or as a result cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int64(_) => ValueType::Int64,
            Value::UInt64(_) => ValueType::UInt64,
            Value::Float64(_) => ValueType::Float64,
            Value::Text(_) => ValueType::Text,
            Value::Bytes(_) => ValueType::Bytes,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Declared type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Null,
    Bool,
    Int64,
    UInt64,
    Float64,
    Text,
    Bytes,
}

/// Column metadata for a result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: ValueType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// One logical result set, possibly merged from several shard partials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QueryResult {
    pub fields: Vec<Field>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: u64,
    /// First non-zero insert id observed across merged partials.
    pub insert_id: u64,
}

impl QueryResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge another partial result into this one, following standard SQL
    /// semantics for scatter-gather:
    /// - rows are concatenated preserving arrival order
    /// - `rows_affected` is summed
    /// - `insert_id` keeps the first non-zero value observed
    /// - field metadata is taken from the first non-empty partial; later
    ///   partials must be structurally compatible and are not re-validated
    ///   per row
    pub fn append_result(&mut self, other: &QueryResult) {
        if self.fields.is_empty() && !other.fields.is_empty() {
            self.fields = other.fields.clone();
        }
        self.rows_affected += other.rows_affected;
        if self.insert_id == 0 {
            self.insert_id = other.insert_id;
        }
        self.rows.extend(other.rows.iter().cloned());
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.rows.is_empty() && self.rows_affected == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_row_result() -> QueryResult {
        QueryResult {
            fields: vec![Field::new("foo", ValueType::Int64)],
            rows: vec![vec![Value::Text("abcd".into())]],
            rows_affected: 1,
            insert_id: 1,
        }
    }

    #[test]
    fn test_append_empty_then_valid() {
        let mut qr = QueryResult::new();
        let empty = QueryResult::new();
        qr.append_result(&empty);
        qr.append_result(&one_row_result());
        assert_eq!(qr.fields.len(), 1);
        assert_eq!(qr.rows_affected, 1);
        assert_eq!(qr.insert_id, 1);
        assert_eq!(qr.rows.len(), 1);
    }

    #[test]
    fn test_append_two_valid_results() {
        let mut qr = QueryResult::new();
        qr.append_result(&one_row_result());
        qr.append_result(&one_row_result());
        assert_eq!(qr.fields.len(), 1);
        assert_eq!(qr.rows_affected, 2);
        // insert_id keeps the first non-zero value
        assert_eq!(qr.insert_id, 1);
        assert_eq!(qr.rows.len(), 2);
    }

    #[test]
    fn test_append_preserves_arrival_order() {
        let mut qr = QueryResult::new();
        let mut a = one_row_result();
        a.rows = vec![vec![Value::Int64(1)], vec![Value::Int64(2)]];
        let mut b = one_row_result();
        b.rows = vec![vec![Value::Int64(3)]];
        qr.append_result(&a);
        qr.append_result(&b);
        let got: Vec<i64> = qr
            .rows
            .iter()
            .map(|r| match r[0] {
                Value::Int64(v) => v,
                _ => panic!("unexpected value"),
            })
            .collect();
        assert_eq!(got, vec![1, 2, 3]);
    }
}
