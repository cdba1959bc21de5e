#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use da_columnar::{Column, ColumnError};
use da_types::Scalar;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("column {column:?} has length {column_len}, frame has {frame_len} rows")]
    LengthMismatch {
        column: String,
        frame_len: usize,
        column_len: usize,
    },
    #[error("unknown column {0:?}")]
    UnknownColumn(String),
    #[error("duplicate column {0:?}")]
    DuplicateColumn(String),
    #[error("row {row} has {found} values, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// Column-ordered table of equal-length columns.
///
/// Every operation returns a new frame; nothing mutates in place. The row
/// count is stored explicitly so a projection onto zero columns keeps its
/// length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    len: usize,
    order: Vec<String>,
    columns: BTreeMap<String, Column>,
}

impl DataFrame {
    pub fn new(columns: Vec<(String, Column)>) -> Result<Self, FrameError> {
        let len = columns.first().map_or(0, |(_, column)| column.len());
        Self::with_row_count(len, columns)
    }

    pub fn with_row_count(len: usize, columns: Vec<(String, Column)>) -> Result<Self, FrameError> {
        let mut order = Vec::with_capacity(columns.len());
        let mut by_name = BTreeMap::new();

        for (name, column) in columns {
            if column.len() != len {
                return Err(FrameError::LengthMismatch {
                    column: name,
                    frame_len: len,
                    column_len: column.len(),
                });
            }
            if by_name.contains_key(&name) {
                return Err(FrameError::DuplicateColumn(name));
            }
            order.push(name.clone());
            by_name.insert(name, column);
        }

        Ok(Self {
            len,
            order,
            columns: by_name,
        })
    }

    /// Build a frame from row-major records; dtypes are inferred per column.
    pub fn from_records(names: &[&str], rows: Vec<Vec<Scalar>>) -> Result<Self, FrameError> {
        let mut buffers = vec![Vec::with_capacity(rows.len()); names.len()];
        let row_count = rows.len();

        for (row_idx, row) in rows.into_iter().enumerate() {
            if row.len() != names.len() {
                return Err(FrameError::RaggedRow {
                    row: row_idx,
                    expected: names.len(),
                    found: row.len(),
                });
            }
            for (buffer, value) in buffers.iter_mut().zip(row) {
                buffer.push(value);
            }
        }

        let columns = names
            .iter()
            .zip(buffers)
            .map(|(name, values)| Ok(((*name).to_owned(), Column::from_values(values)?)))
            .collect::<Result<Vec<_>, FrameError>>()?;

        Self::with_row_count(row_count, columns)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.order
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> + '_ {
        self.order
            .iter()
            .filter_map(|name| self.columns.get(name).map(|column| (name.as_str(), column)))
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn require_column(&self, name: &str) -> Result<&Column, FrameError> {
        self.column(name)
            .ok_or_else(|| FrameError::UnknownColumn(name.to_owned()))
    }

    #[must_use]
    pub fn value(&self, column: &str, row: usize) -> Option<&Scalar> {
        self.column(column).and_then(|column| column.value(row))
    }

    pub fn filter_rows(&self, mask: &[bool]) -> Result<Self, FrameError> {
        if mask.len() != self.len {
            return Err(FrameError::LengthMismatch {
                column: "<mask>".to_owned(),
                frame_len: self.len,
                column_len: mask.len(),
            });
        }

        let kept = mask.iter().filter(|keep| **keep).count();
        let columns = self
            .columns()
            .map(|(name, column)| Ok((name.to_owned(), column.filter_by_mask(mask)?)))
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::with_row_count(kept, columns)
    }

    /// Gather rows by position; `None` yields a row of missing values.
    pub fn take_rows(&self, positions: &[Option<usize>]) -> Result<Self, FrameError> {
        let columns = self
            .columns()
            .map(|(name, column)| Ok((name.to_owned(), column.reindex_by_positions(positions)?)))
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::with_row_count(positions.len(), columns)
    }

    pub fn select(&self, names: &[&str]) -> Result<Self, FrameError> {
        let columns = names
            .iter()
            .map(|name| Ok(((*name).to_owned(), self.require_column(name)?.clone())))
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::with_row_count(self.len, columns)
    }

    /// Add `column` under `name`, replacing an existing column of that name in place.
    pub fn with_column(&self, name: impl Into<String>, column: Column) -> Result<Self, FrameError> {
        let name = name.into();
        if column.len() != self.len {
            return Err(FrameError::LengthMismatch {
                column: name,
                frame_len: self.len,
                column_len: column.len(),
            });
        }

        let mut out = self.clone();
        if !out.columns.contains_key(&name) {
            out.order.push(name.clone());
        }
        out.columns.insert(name, column);
        Ok(out)
    }

    pub fn rename_column(&self, from: &str, to: &str) -> Result<Self, FrameError> {
        self.require_column(from)?;
        if from == to {
            return Ok(self.clone());
        }
        if self.has_column(to) {
            return Err(FrameError::DuplicateColumn(to.to_owned()));
        }

        let columns = self
            .columns()
            .map(|(name, column)| {
                let name = if name == from { to } else { name };
                (name.to_owned(), column.clone())
            })
            .collect();
        Self::with_row_count(self.len, columns)
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.len == other.len
            && self.order == other.order
            && self.columns().zip(other.columns()).all(|((_, a), (_, b))| a.semantic_eq(b))
    }
}
