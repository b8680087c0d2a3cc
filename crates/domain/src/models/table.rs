//! Format-neutral table produced by the builder.

use serde::Serialize;
use serde_json::{Map, Value};

/// One row keyed by column name.
pub type TableRow = Map<String, Value>;

/// Ordered columns and rows, independent of the output encoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalTable {
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
    #[serde(skip)]
    pub filename_base: String,
}

impl CanonicalTable {
    /// An empty table whose columns are the defaults narrowed by `selected`.
    pub fn new(
        default_columns: &[&str],
        selected: Option<&[String]>,
        filename_base: impl Into<String>,
    ) -> Self {
        Self {
            columns: resolve_columns(default_columns, selected),
            rows: Vec::new(),
            filename_base: filename_base.into(),
        }
    }

    /// Append a row, dropping cells for columns that are not in the table.
    pub fn push_row(&mut self, mut row: TableRow) {
        let projected = self
            .columns
            .iter()
            .map(|c| (c.clone(), row.remove(c).unwrap_or(Value::Null)))
            .collect();
        self.rows.push(projected);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cells of a row in column order.
    pub fn cells<'a>(&'a self, row: &'a TableRow) -> impl Iterator<Item = &'a Value> + 'a {
        self.columns
            .iter()
            .map(move |c| row.get(c).unwrap_or(&Value::Null))
    }
}

/// Keep only selected columns that exist in the defaults, in the caller's order.
///
/// Unknown and duplicate names are dropped silently. An empty result falls back
/// to the defaults.
pub fn resolve_columns(default_columns: &[&str], selected: Option<&[String]>) -> Vec<String> {
    let defaults = || default_columns.iter().map(|c| c.to_string()).collect();

    let Some(selected) = selected else {
        return defaults();
    };

    let mut columns: Vec<String> = Vec::with_capacity(selected.len());
    for name in selected {
        if default_columns.contains(&name.as_str()) && !columns.contains(name) {
            columns.push(name.clone());
        }
    }

    if columns.is_empty() {
        defaults()
    } else {
        columns
    }
}
