//! Typed column storage for population and peripheral tables.
//!
//! `spec.md` §3: "Both population and peripheral data live as typed columns
//! ... owned by their containing table. The core never mutates column
//! data." Grounded in the teacher's `Dataset` (`src/ml_engine/mod.rs`),
//! restructured from a dense `Vec<Vec<f64>>` feature matrix into per-kind
//! typed columns, since the condition search needs to distinguish numerical,
//! discrete, categorical, text and time-stamp columns rather than treat
//! everything as `f64`.

use std::collections::HashMap;

/// A single typed column. Categorical codes and token ids are pre-encoded
/// integers; the string ↔ code mapping lives in the (externally owned)
/// category encoder, not in the column itself.
#[derive(Debug, Clone)]
pub enum Column {
    Numerical(Vec<f64>),
    Discrete(Vec<i64>),
    Categorical(Vec<i32>),
    /// Each row holds the token ids present in that row's text field.
    Text(Vec<Vec<u32>>),
    TimeStamp(Vec<f64>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numerical(v) => v.len(),
            Column::Discrete(v) => v.len(),
            Column::Categorical(v) => v.len(),
            Column::Text(v) => v.len(),
            Column::TimeStamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_numerical(&self) -> Option<&[f64]> {
        match self {
            Column::Numerical(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_discrete(&self) -> Option<&[i64]> {
        match self {
            Column::Discrete(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_categorical(&self) -> Option<&[i32]> {
        match self {
            Column::Categorical(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_time_stamp(&self) -> Option<&[f64]> {
        match self {
            Column::TimeStamp(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&[Vec<u32>]> {
        match self {
            Column::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// An immutable table of named, typed columns. Used for both peripheral
/// tables and (via `PopulationView`) the population table.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub name: String,
    columns: HashMap<String, Column>,
    /// Preserves declaration order for deterministic column iteration
    /// (`spec.md` §5, "ordering guarantees").
    column_order: Vec<String>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: HashMap::new(),
            column_order: Vec::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, column: Column) -> Self {
        let name = name.into();
        if !self.columns.contains_key(&name) {
            self.column_order.push(name.clone());
        }
        self.columns.insert(name, column);
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.column_order.iter().map(|s| s.as_str())
    }

    pub fn num_rows(&self) -> usize {
        self.column_order
            .first()
            .and_then(|n| self.columns.get(n))
            .map(Column::len)
            .unwrap_or(0)
    }
}

/// The population table plus the target column(s) it carries. The core
/// reads the population's feature columns (for population-side split
/// candidates and same-unit differences) but never the target directly —
/// the target only enters through the externally supplied loss function
/// bound to the optimisation criterion.
#[derive(Debug, Clone)]
pub struct PopulationView {
    pub table: Table,
    pub targets: HashMap<String, Vec<f64>>,
    /// Time stamp used for `TimeStampsDiff` and lag-window conditions.
    pub time_stamp: Option<Vec<f64>>,
}

impl PopulationView {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            targets: HashMap::new(),
            time_stamp: None,
        }
    }

    pub fn with_target(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.targets.insert(name.into(), values);
        self
    }

    pub fn with_time_stamp(mut self, values: Vec<f64>) -> Self {
        self.time_stamp = Some(values);
        self
    }

    pub fn num_rows(&self) -> usize {
        self.table.num_rows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_preserves_column_order() {
        let t = Table::new("perip")
            .with_column("b", Column::Numerical(vec![1.0]))
            .with_column("a", Column::Numerical(vec![2.0]));
        let names: Vec<_> = t.column_names().collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn num_rows_from_first_column() {
        let t = Table::new("perip").with_column("x", Column::Numerical(vec![1.0, 2.0, 3.0]));
        assert_eq!(t.num_rows(), 3);
    }
}
