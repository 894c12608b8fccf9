#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tl_columnar::{Column, ColumnError};
use tl_types::{DType, KeyValue, Scalar, TypeError};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("column {column} has length {actual}, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("duplicate column name: {name}")]
    DuplicateColumn { name: String },
    #[error("column not found: {name}")]
    MissingColumn { name: String },
    #[error("tables have incompatible schemas: {detail}")]
    SchemaMismatch { detail: String },
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// An ordered sequence of equally long named columns. Rows are positional;
/// column order is declaration order and survives every transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<(String, Column)>) -> Result<Self, FrameError> {
        let mut names = Vec::with_capacity(columns.len());
        let mut cols = Vec::with_capacity(columns.len());
        let mut seen = HashSet::new();
        let expected = columns.first().map_or(0, |(_, column)| column.len());

        for (name, column) in columns {
            if !seen.insert(name.clone()) {
                return Err(FrameError::DuplicateColumn { name });
            }
            if column.len() != expected {
                return Err(FrameError::LengthMismatch {
                    column: name,
                    expected,
                    actual: column.len(),
                });
            }
            names.push(name);
            cols.push(column);
        }

        Ok(Self {
            names,
            columns: cols,
        })
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|idx| &self.columns[idx])
    }

    pub fn column_required(&self, name: &str) -> Result<&Column, FrameError> {
        self.column(name).ok_or_else(|| FrameError::MissingColumn {
            name: name.to_owned(),
        })
    }

    #[must_use]
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.columns.iter())
    }

    #[must_use]
    pub fn schema(&self) -> Vec<(String, DType)> {
        self.columns()
            .map(|(name, column)| (name.to_owned(), column.dtype().clone()))
            .collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    pub fn select(&self, names: &[&str]) -> Result<Self, FrameError> {
        let columns = names
            .iter()
            .map(|name| {
                self.column_required(name)
                    .map(|column| ((*name).to_owned(), column.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(columns)
    }

    pub fn drop_columns(&self, names: &[&str]) -> Result<Self, FrameError> {
        for name in names {
            self.column_required(name)?;
        }
        let columns = self
            .columns()
            .filter(|(name, _)| !names.contains(name))
            .map(|(name, column)| (name.to_owned(), column.clone()))
            .collect::<Vec<_>>();
        Self::new(columns)
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<Self, FrameError> {
        let idx = self.position(from).ok_or_else(|| FrameError::MissingColumn {
            name: from.to_owned(),
        })?;
        if from != to && self.position(to).is_some() {
            return Err(FrameError::DuplicateColumn {
                name: to.to_owned(),
            });
        }
        let mut out = self.clone();
        out.names[idx] = to.to_owned();
        Ok(out)
    }

    /// Insert or replace a column, keeping its position when replacing.
    pub fn with_column(&self, name: &str, column: Column) -> Result<Self, FrameError> {
        if !self.columns.is_empty() && column.len() != self.n_rows() {
            return Err(FrameError::LengthMismatch {
                column: name.to_owned(),
                expected: self.n_rows(),
                actual: column.len(),
            });
        }
        let mut out = self.clone();
        match self.position(name) {
            Some(idx) => out.columns[idx] = column,
            None => {
                out.names.push(name.to_owned());
                out.columns.push(column);
            }
        }
        Ok(out)
    }

    pub fn cast(&self, mapping: &[(&str, DType)]) -> Result<Self, FrameError> {
        let mut out = self.clone();
        for (name, dtype) in mapping {
            let idx = out.position(name).ok_or_else(|| FrameError::MissingColumn {
                name: (*name).to_owned(),
            })?;
            out.columns[idx] = out.columns[idx].cast_to(dtype)?;
        }
        Ok(out)
    }

    pub fn fill_missing(&self, mapping: &[(&str, Scalar)]) -> Result<Self, FrameError> {
        let mut out = self.clone();
        for (name, fill) in mapping {
            let idx = out.position(name).ok_or_else(|| FrameError::MissingColumn {
                name: (*name).to_owned(),
            })?;
            out.columns[idx] = out.columns[idx].fill_missing(fill)?;
        }
        Ok(out)
    }

    pub fn take(&self, positions: &[usize]) -> Result<Self, FrameError> {
        let columns = self
            .columns()
            .map(|(name, column)| Ok((name.to_owned(), column.take(positions)?)))
            .collect::<Result<Vec<_>, ColumnError>>()?;
        Self::new(columns)
    }

    /// Key tuple for one row over the given columns; the caller has
    /// already verified the columns exist.
    fn key_tuple(&self, columns: &[&Column], row: usize) -> Result<Vec<KeyValue>, FrameError> {
        columns
            .iter()
            .map(|column| {
                column.values()[row]
                    .to_key()
                    .map_err(|err| FrameError::Type(err))
            })
            .collect()
    }

    /// Drop rows whose key tuple over `subset` was seen before (keep
    /// first occurrence), preserving row order otherwise.
    pub fn drop_duplicates(&self, subset: &[&str]) -> Result<Self, FrameError> {
        let key_columns = subset
            .iter()
            .map(|name| self.column_required(name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for row in 0..self.n_rows() {
            let key = self.key_tuple(&key_columns, row)?;
            if seen.insert(key) {
                kept.push(row);
            }
        }
        self.take(&kept)
    }

    /// Positions of rows whose key tuple over `subset` is absent from
    /// `existing`, deduplicated within this table (keep first).
    pub fn rows_not_in(
        &self,
        subset: &[&str],
        existing: &HashSet<Vec<KeyValue>>,
    ) -> Result<Vec<usize>, FrameError> {
        let key_columns = subset
            .iter()
            .map(|name| self.column_required(name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = existing.clone();
        let mut kept = Vec::new();
        for row in 0..self.n_rows() {
            let key = self.key_tuple(&key_columns, row)?;
            if seen.insert(key) {
                kept.push(row);
            }
        }
        Ok(kept)
    }

    /// Key tuples over `subset` for every row.
    pub fn key_tuples(&self, subset: &[&str]) -> Result<HashSet<Vec<KeyValue>>, FrameError> {
        let key_columns = subset
            .iter()
            .map(|name| self.column_required(name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut keys = HashSet::with_capacity(self.n_rows());
        for row in 0..self.n_rows() {
            keys.insert(self.key_tuple(&key_columns, row)?);
        }
        Ok(keys)
    }

    /// Vertical concatenation. Tables must share column names in order;
    /// dtypes unify through the widening lattice.
    pub fn concat(tables: &[Self]) -> Result<Self, FrameError> {
        let Some(first) = tables.first() else {
            return Ok(Self::empty());
        };

        for table in &tables[1..] {
            if table.names != first.names {
                return Err(FrameError::SchemaMismatch {
                    detail: format!(
                        "column names {:?} do not match {:?}",
                        table.names, first.names
                    ),
                });
            }
        }

        let mut columns = Vec::with_capacity(first.n_cols());
        for (idx, name) in first.names.iter().enumerate() {
            let mut dtype = DType::Null;
            for table in tables {
                dtype = tl_types::common_dtype(&dtype, table.columns[idx].dtype())?;
            }
            let mut values = Vec::new();
            for table in tables {
                values.extend_from_slice(table.columns[idx].values());
            }
            columns.push((name.clone(), Column::new(dtype, values)?));
        }
        Self::new(columns)
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.names == other.names
            && self.n_rows() == other.n_rows()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(left, right)| left.semantic_eq(right))
    }

    /// Content equality keyed by `subset`, ignoring physical row order.
    /// Both tables must be duplicate-free over the subset.
    pub fn semantic_eq_unordered(&self, other: &Self, subset: &[&str]) -> Result<bool, FrameError> {
        if self.names != other.names || self.n_rows() != other.n_rows() {
            return Ok(false);
        }
        let key_columns = subset
            .iter()
            .map(|name| other.column_required(name))
            .collect::<Result<Vec<_>, _>>()?;
        let mut by_key = HashMap::with_capacity(other.n_rows());
        for row in 0..other.n_rows() {
            by_key.insert(other.key_tuple(&key_columns, row)?, row);
        }

        let own_key_columns = subset
            .iter()
            .map(|name| self.column_required(name))
            .collect::<Result<Vec<_>, _>>()?;
        for row in 0..self.n_rows() {
            let key = self.key_tuple(&own_key_columns, row)?;
            let Some(other_row) = by_key.get(&key) else {
                return Ok(false);
            };
            for (left, right) in self.columns.iter().zip(&other.columns) {
                let left_value = &left.values()[row];
                let right_value = &right.values()[*other_row];
                if !left_value.semantic_eq(right_value) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
