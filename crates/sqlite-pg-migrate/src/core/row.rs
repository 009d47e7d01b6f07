//! Named rows.
//!
//! A [`Row`] keeps its columns in the order they were read, so a row read
//! from the source and the row handed to the target line up column by column
//! without positional bookkeeping.

use super::value::SqlValue;

/// Ordered mapping of column name to value for one table row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, SqlValue)>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty row with room for `n` columns.
    pub fn with_capacity(n: usize) -> Self {
        Self {
            entries: Vec::with_capacity(n),
        }
    }

    /// Build a row from parallel column and value lists.
    pub fn from_parts(columns: &[String], values: Vec<SqlValue>) -> Self {
        Self {
            entries: columns.iter().cloned().zip(values).collect(),
        }
    }

    /// Get a value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    /// Set a column, replacing an existing value in place or appending.
    pub fn set(&mut self, column: impl Into<String>, value: SqlValue) {
        let column = column.into();
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
    }

    /// Builder-style [`Row::set`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.set(column, value.into());
        self
    }

    /// Remove a column, returning its value.
    pub fn remove(&mut self, column: &str) -> Option<SqlValue> {
        let idx = self.entries.iter().position(|(name, _)| name == column)?;
        Some(self.entries.remove(idx).1)
    }

    /// Whether the row has a column with this name.
    pub fn contains(&self, column: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == column)
    }

    /// Column names in row order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Iterate over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.entries.iter().map(|(name, v)| (name.as_str(), v))
    }

    /// Values for the given columns, NULL where a column is missing.
    pub fn values_for(&self, columns: &[String]) -> Vec<SqlValue> {
        columns
            .iter()
            .map(|c| self.get(c).cloned().unwrap_or(SqlValue::Null))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.set(k, v);
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_in_place() {
        let mut row = Row::new().with("id", 1i64).with("name", "press");
        row.set("id", SqlValue::Int(2));
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(row.get("id"), Some(&SqlValue::Int(2)));
    }

    #[test]
    fn test_values_for_fills_missing_with_null() {
        let row = Row::new().with("id", 1i64);
        let values = row.values_for(&["id".to_string(), "missing".to_string()]);
        assert_eq!(values, vec![SqlValue::Int(1), SqlValue::Null]);
    }

    #[test]
    fn test_remove() {
        let mut row = Row::new().with("a", 1i64).with("b", 2i64);
        assert_eq!(row.remove("a"), Some(SqlValue::Int(1)));
        assert_eq!(row.remove("a"), None);
        assert_eq!(row.len(), 1);
    }
}
