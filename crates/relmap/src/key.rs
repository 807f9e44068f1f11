//! Key descriptors.
//!
//! `PrimaryKey`, `ForeignKey` and `Junction` only name columns. They translate
//! values between the owner and related column namespaces and never fail: a
//! column missing from the input map yields `Value::Null`.

use relmap_core::{ColumnMap, Value};
use std::fmt;

/// A key value: the bare scalar of a single-column key or a column map.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Scalar(Value),
    Map(ColumnMap),
}

impl KeyValue {
    /// The scalar, if this is not a map.
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            KeyValue::Scalar(value) => Some(value),
            KeyValue::Map(_) => None,
        }
    }

    /// The column map, if this is a map.
    pub fn as_map(&self) -> Option<&ColumnMap> {
        match self {
            KeyValue::Scalar(_) => None,
            KeyValue::Map(map) => Some(map),
        }
    }

    /// Value for `column`: a scalar answers for any column.
    pub fn get(&self, column: &str) -> Value {
        match self {
            KeyValue::Scalar(value) => value.clone(),
            KeyValue::Map(map) => map.get(column).cloned().unwrap_or(Value::Null),
        }
    }

    /// Does this key contain a NULL component?
    pub fn has_null(&self) -> bool {
        match self {
            KeyValue::Scalar(value) => value.is_null(),
            KeyValue::Map(map) => map.values().any(Value::is_null),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Scalar(value) => write!(f, "{value}"),
            KeyValue::Map(map) => {
                let parts: Vec<_> = map.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

impl From<Value> for KeyValue {
    fn from(value: Value) -> Self {
        KeyValue::Scalar(value)
    }
}

impl From<ColumnMap> for KeyValue {
    fn from(map: ColumnMap) -> Self {
        KeyValue::Map(map)
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Scalar(Value::Int(value))
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        KeyValue::Scalar(Value::from(value))
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Scalar(Value::from(value))
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::Scalar(Value::Text(value))
    }
}

fn read(row: &ColumnMap, column: &str) -> Value {
    row.get(column).cloned().unwrap_or(Value::Null)
}

/// The columns forming an entity's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    columns: Vec<String>,
}

impl PrimaryKey {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_composite(&self) -> bool {
        self.columns.len() > 1
    }

    /// Key value of `row`.
    ///
    /// A composite key always yields the map form. A single-column key
    /// yields the bare scalar unless `as_map` is set.
    pub fn value(&self, row: &ColumnMap, as_map: bool) -> KeyValue {
        if !as_map && !self.is_composite() {
            if let Some(column) = self.columns.first() {
                return KeyValue::Scalar(read(row, column));
            }
        }
        KeyValue::Map(self.value_map(row))
    }

    /// `{column: row[column]}` for every key column.
    pub fn value_map(&self, row: &ColumnMap) -> ColumnMap {
        self.columns
            .iter()
            .map(|column| (column.clone(), read(row, column)))
            .collect()
    }
}

impl Default for PrimaryKey {
    fn default() -> Self {
        Self::new(["id"])
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.columns.join(", "))
    }
}

/// Column mapping between a candidate (local) column and a target column.
///
/// The three extraction modes must not be swapped:
///
/// - `value` reads `row[candidate]` and keys it by `target`
/// - `inverse_value` reads `row[target]` and keys it by `candidate`
/// - `extract_value` reads `row[target]` and keys it by `target`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    columns: Vec<(String, String)>,
}

impl ForeignKey {
    pub fn new<I, K, V>(columns: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// `(candidate, target)` pairs in declaration order.
    pub fn columns(&self) -> &[(String, String)] {
        &self.columns
    }

    pub fn is_composite(&self) -> bool {
        self.columns.len() > 1
    }

    pub fn target_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(_, target)| target.as_str())
    }

    fn shape(&self, as_map: bool, map: ColumnMap, scalar: impl FnOnce() -> Value) -> KeyValue {
        if !as_map && !self.is_composite() {
            KeyValue::Scalar(scalar())
        } else {
            KeyValue::Map(map)
        }
    }

    pub fn value(&self, row: &ColumnMap, as_map: bool) -> KeyValue {
        let map = self.value_map(row);
        self.shape(as_map, map, || {
            self.columns
                .first()
                .map_or(Value::Null, |(candidate, _)| read(row, candidate))
        })
    }

    pub fn value_map(&self, row: &ColumnMap) -> ColumnMap {
        self.columns
            .iter()
            .map(|(candidate, target)| (target.clone(), read(row, candidate)))
            .collect()
    }

    pub fn inverse_value(&self, row: &ColumnMap, as_map: bool) -> KeyValue {
        let map = self.inverse_value_map(row);
        self.shape(as_map, map, || {
            self.columns
                .first()
                .map_or(Value::Null, |(_, target)| read(row, target))
        })
    }

    pub fn inverse_value_map(&self, row: &ColumnMap) -> ColumnMap {
        self.columns
            .iter()
            .map(|(candidate, target)| (candidate.clone(), read(row, target)))
            .collect()
    }

    pub fn extract_value(&self, row: &ColumnMap, as_map: bool) -> KeyValue {
        let map = self.extract_value_map(row);
        self.shape(as_map, map, || {
            self.columns
                .first()
                .map_or(Value::Null, |(_, target)| read(row, target))
        })
    }

    pub fn extract_value_map(&self, row: &ColumnMap) -> ColumnMap {
        self.columns
            .iter()
            .map(|(_, target)| (target.clone(), read(row, target)))
            .collect()
    }
}

impl fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let targets: Vec<_> = self.target_columns().collect();
        f.write_str(&targets.join(", "))
    }
}

/// A many-to-many link table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Junction {
    table: String,
    columns: Vec<(String, String)>,
}

impl Junction {
    /// `columns` maps a related primary-key column to its junction column.
    pub fn new<I, K, V>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            table: table.into(),
            columns: columns
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Default junction table name: both tables sorted and joined with `_`.
    pub fn default_table(left: &str, right: &str) -> String {
        let mut tables = [left, right];
        tables.sort_unstable();
        tables.join("_")
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[(String, String)] {
        &self.columns
    }
}
