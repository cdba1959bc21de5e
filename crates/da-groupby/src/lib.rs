#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::HashMap;

use da_columnar::{Column, ColumnError, HashKey};
use da_frame::{DataFrame, FrameError};
use da_types::{DType, NullKind, Scalar, TypeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupByOptions {
    pub dropna: bool,
}

impl Default for GroupByOptions {
    fn default() -> Self {
        Self { dropna: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Mean,
    Count,
    Sum,
    Min,
    Max,
}

impl AggFunc {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Mean => "avg",
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    #[must_use]
    pub fn requires_numeric(self) -> bool {
        !matches!(self, Self::Count)
    }
}

#[derive(Debug, Error)]
pub enum GroupByError {
    #[error("{func:?} over column {column:?} requires a numeric dtype, found {dtype:?}")]
    NonNumericAggregation {
        func: AggFunc,
        column: String,
        dtype: DType,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Group `frame` by `keys` and reduce `value_column` with `func`.
///
/// The result holds the key columns in `keys` order followed by `output`.
/// Groups appear in first-seen order. With no keys the whole frame is one
/// group, so the result always has exactly one row.
pub fn groupby_agg(
    frame: &DataFrame,
    keys: &[&str],
    value_column: &str,
    func: AggFunc,
    output: &str,
    options: GroupByOptions,
) -> Result<DataFrame, GroupByError> {
    let key_columns = keys
        .iter()
        .map(|name| frame.require_column(name))
        .collect::<Result<Vec<_>, _>>()?;
    let values = frame.require_column(value_column)?;

    if func.requires_numeric() && !matches!(values.dtype(), DType::Int64 | DType::Float64 | DType::Null)
    {
        return Err(GroupByError::NonNumericAggregation {
            func,
            column: value_column.to_owned(),
            dtype: values.dtype(),
        });
    }

    let groups = if keys.is_empty() {
        vec![(0..frame.len()).collect::<Vec<_>>()]
    } else {
        partition_rows(&key_columns, frame.len(), options.dropna)
    };

    let mut out_keys = vec![Vec::with_capacity(groups.len()); key_columns.len()];
    let mut out_values = Vec::with_capacity(groups.len());

    for rows in &groups {
        if let Some(first) = rows.first() {
            for (buffer, column) in out_keys.iter_mut().zip(&key_columns) {
                buffer.push(column.values()[*first].clone());
            }
        }
        out_values.push(reduce_rows(values, rows, func)?);
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(
        rows = frame.len(),
        groups = groups.len(),
        func = func.name(),
        "groupby_agg"
    );

    let mut columns = Vec::with_capacity(keys.len() + 1);
    for ((name, source), buffer) in keys.iter().zip(&key_columns).zip(out_keys) {
        columns.push(((*name).to_owned(), Column::new(source.dtype(), buffer)?));
    }
    let out_column = match func {
        AggFunc::Count => Column::new(DType::Int64, out_values)?,
        AggFunc::Mean => Column::new(DType::Float64, out_values)?,
        AggFunc::Sum | AggFunc::Min | AggFunc::Max => Column::from_values(out_values)?,
    };
    columns.push((output.to_owned(), out_column));

    Ok(DataFrame::with_row_count(groups.len(), columns)?)
}

/// Row positions per group, groups in first-seen order.
fn partition_rows(key_columns: &[&Column], len: usize, dropna: bool) -> Vec<Vec<usize>> {
    let mut ordering = Vec::<Vec<usize>>::new();
    let mut slot = HashMap::<Vec<HashKey<'_>>, usize>::new();

    for row in 0..len {
        let key = key_columns
            .iter()
            .map(|column| HashKey::from_scalar(&column.values()[row]))
            .collect::<Vec<_>>();

        if dropna && key.iter().any(HashKey::is_null) {
            continue;
        }

        let group = *slot.entry(key).or_insert_with(|| {
            ordering.push(Vec::new());
            ordering.len() - 1
        });
        ordering[group].push(row);
    }

    ordering
}

fn reduce_rows(values: &Column, rows: &[usize], func: AggFunc) -> Result<Scalar, GroupByError> {
    let present = rows
        .iter()
        .map(|row| &values.values()[*row])
        .filter(|value| !value.is_missing());

    let out = match func {
        AggFunc::Count => Scalar::Int64(present.count() as i64),
        AggFunc::Mean => {
            let mut total = 0.0;
            let mut count = 0_usize;
            for value in present {
                total += value.to_f64()?;
                count += 1;
            }
            if count == 0 {
                Scalar::Null(NullKind::NaN)
            } else {
                Scalar::Float64(total / count as f64)
            }
        }
        AggFunc::Sum => sum_values(present)?,
        AggFunc::Min => extreme_value(present, Ordering::Less)?,
        AggFunc::Max => extreme_value(present, Ordering::Greater)?,
    };
    Ok(out)
}

fn sum_values<'a>(values: impl Iterator<Item = &'a Scalar>) -> Result<Scalar, TypeError> {
    let mut int_total = Some(0_i64);
    let mut float_total = 0.0;
    let mut all_int = true;
    let mut seen = false;

    for value in values {
        seen = true;
        float_total += value.to_f64()?;
        match value {
            Scalar::Int64(v) => int_total = int_total.and_then(|total| total.checked_add(*v)),
            _ => all_int = false,
        }
    }

    Ok(match (seen, all_int, int_total) {
        (false, _, _) => Scalar::Null(NullKind::Null),
        (true, true, Some(total)) => Scalar::Int64(total),
        _ => Scalar::Float64(float_total),
    })
}

fn extreme_value<'a>(
    values: impl Iterator<Item = &'a Scalar>,
    wanted: Ordering,
) -> Result<Scalar, TypeError> {
    let mut best: Option<&Scalar> = None;
    for value in values {
        best = match best {
            Some(current) if value.compare(current)? != Some(wanted) => Some(current),
            _ => Some(value),
        };
    }
    Ok(best.cloned().unwrap_or(Scalar::Null(NullKind::Null)))
}
