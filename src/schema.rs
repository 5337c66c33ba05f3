use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TableError};

/// Primitive column types supported by the table engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
}

/// A single cell value. Serializes untagged so a row appears on the wire as
/// a plain JSON array of numbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Int(_) => ColumnType::Integer,
            Value::Float(_) => ColumnType::Float,
        }
    }
}

/// One table row, in schema column order
pub type Row = Vec<Value>;

/// An ordered, immutable mapping from column name to primitive type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<(String, ColumnType)>,
}

impl Schema {
    /// Build a schema from ordered (name, type) pairs.
    ///
    /// # Errors
    ///
    /// Returns `EmptySchema` if no columns are given, `DuplicateColumn` if a
    /// column name repeats.
    pub fn new(columns: Vec<(String, ColumnType)>) -> Result<Self> {
        if columns.is_empty() {
            return Err(TableError::EmptySchema);
        }
        let mut seen = HashSet::new();
        for (name, _) in &columns {
            if !seen.insert(name.as_str()) {
                return Err(TableError::DuplicateColumn(name.clone()));
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[(String, ColumnType)] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Check a row against this schema; reports the first offending column.
    pub fn check_row(&self, table: &str, row: &Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(TableError::SchemaMismatch {
                table: table.to_string(),
                reason: format!(
                    "expected {} columns, got {}",
                    self.columns.len(),
                    row.len()
                ),
            });
        }
        for (value, (name, ty)) in row.iter().zip(&self.columns) {
            if value.column_type() != *ty {
                return Err(TableError::SchemaMismatch {
                    table: table.to_string(),
                    reason: format!(
                        "column '{}' expects {:?}, got {:?}",
                        name,
                        ty,
                        value.column_type()
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_column_schema() -> Schema {
        Schema::new(vec![
            ("depth".to_string(), ColumnType::Integer),
            ("gamma".to_string(), ColumnType::Float),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_empty_schema() {
        assert!(matches!(Schema::new(vec![]), Err(TableError::EmptySchema)));
    }

    #[test]
    fn rejects_duplicate_column() {
        let result = Schema::new(vec![
            ("depth".to_string(), ColumnType::Integer),
            ("depth".to_string(), ColumnType::Float),
        ]);
        assert!(matches!(result, Err(TableError::DuplicateColumn(name)) if name == "depth"));
    }

    #[test]
    fn checks_row_shape_and_types() {
        let schema = two_column_schema();
        assert!(schema
            .check_row("t", &vec![Value::Int(1), Value::Float(2.5)])
            .is_ok());

        // Wrong column count
        assert!(matches!(
            schema.check_row("t", &vec![Value::Int(1)]),
            Err(TableError::SchemaMismatch { .. })
        ));

        // Wrong type in second column
        assert!(matches!(
            schema.check_row("t", &vec![Value::Int(1), Value::Int(2)]),
            Err(TableError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn row_serializes_as_number_array() {
        let row: Row = vec![Value::Int(2400), Value::Float(85.25)];
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, "[2400,85.25]");
    }
}
