//! Result rows as handed back by a [`Connection`](crate::Connection).

use crate::value::{ColumnMap, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Column names of a result set plus a name lookup table.
///
/// Drivers build one per statement and share it between the rows.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let positions = names
            .iter()
            .enumerate()
            .map(|(position, name)| (name.clone(), position))
            .collect();
        Self { names, positions }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Position of `name`; for duplicated names, the last one.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }
}

/// One fetched row.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<ColumnInfo>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(names: Vec<String>, values: Vec<Value>) -> Self {
        Self::with_columns(Arc::new(ColumnInfo::new(names)), values)
    }

    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Build a row from `(name, value)` pairs, keeping their order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let (names, values) = pairs
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .unzip();
        Self::new(names, values)
    }

    pub fn columns(&self) -> &Arc<ColumnInfo> {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Value> {
        self.values.get(position)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.position(name).and_then(|i| self.values.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.names.iter().map(String::as_str).zip(&self.values)
    }

    /// Key the row by column name. A repeated name keeps its last value.
    pub fn into_column_map(self) -> ColumnMap {
        self.columns.names.iter().cloned().zip(self.values).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name_and_position() {
        let row = Row::from_pairs([("id", Value::Int(1)), ("name", Value::from("alice"))]);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&Value::Int(1)));
        assert_eq!(row.get_by_name("name"), Some(&Value::from("alice")));
        assert!(row.get_by_name("missing").is_none());
        let names: Vec<_> = row.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["id", "name"]);
    }

    #[test]
    fn test_duplicate_names_keep_last_value() {
        let row = Row::from_pairs([("id", 1_i64), ("id", 2_i64), ("a", 3_i64)]);
        assert_eq!(row.get_by_name("id"), Some(&Value::Int(2)));
        let map = row.into_column_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["id"], Value::Int(2));
    }

    #[test]
    fn test_rows_share_column_info() {
        let info = Arc::new(ColumnInfo::new(vec!["id".to_owned()]));
        let a = Row::with_columns(Arc::clone(&info), vec![Value::Int(1)]);
        let b = Row::with_columns(Arc::clone(&info), vec![Value::Int(2)]);
        assert!(Arc::ptr_eq(a.columns(), b.columns()));
    }
}
