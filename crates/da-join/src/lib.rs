#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};

use da_columnar::{Column, ColumnError, HashKey};
use da_frame::{DataFrame, FrameError};
use da_types::Scalar;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Outer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    pub left_suffix: String,
    pub right_suffix: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            left_suffix: "_left".to_owned(),
            right_suffix: "_right".to_owned(),
        }
    }
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// Row pairing produced by the probe phase; `None` marks the unmatched side.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JoinPlan {
    pub left_positions: Vec<Option<usize>>,
    pub right_positions: Vec<Option<usize>>,
}

impl JoinPlan {
    fn push(&mut self, left: Option<usize>, right: Option<usize>) {
        self.left_positions.push(left);
        self.right_positions.push(right);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.left_positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.left_positions.is_empty()
    }
}

/// Pair rows of two key columns. Missing keys never match.
#[must_use]
pub fn plan_join(left_keys: &Column, right_keys: &Column, join_type: JoinType) -> JoinPlan {
    let mut plan = JoinPlan::default();

    if matches!(join_type, JoinType::Right) {
        let left_map = build_key_map(left_keys);
        for (right_pos, key) in right_keys.values().iter().enumerate() {
            match probe(&left_map, key) {
                Some(matches) => {
                    for left_pos in matches {
                        plan.push(Some(*left_pos), Some(right_pos));
                    }
                }
                None => plan.push(None, Some(right_pos)),
            }
        }
        return plan;
    }

    let right_map = build_key_map(right_keys);
    let mut matched_right = vec![false; right_keys.len()];

    for (left_pos, key) in left_keys.values().iter().enumerate() {
        if let Some(matches) = probe(&right_map, key) {
            for right_pos in matches {
                matched_right[*right_pos] = true;
                plan.push(Some(left_pos), Some(*right_pos));
            }
            continue;
        }

        if matches!(join_type, JoinType::Left | JoinType::Outer) {
            plan.push(Some(left_pos), None);
        }
    }

    if matches!(join_type, JoinType::Outer) {
        for (right_pos, matched) in matched_right.iter().enumerate() {
            if !matched {
                plan.push(None, Some(right_pos));
            }
        }
    }

    plan
}

fn build_key_map(keys: &Column) -> HashMap<HashKey<'_>, Vec<usize>> {
    let mut map = HashMap::<HashKey<'_>, Vec<usize>>::new();
    for (pos, value) in keys.values().iter().enumerate() {
        let key = HashKey::from_scalar(value);
        if !key.is_null() {
            map.entry(key).or_default().push(pos);
        }
    }
    map
}

fn probe<'m, 'k>(
    map: &'m HashMap<HashKey<'k>, Vec<usize>>,
    value: &'k Scalar,
) -> Option<&'m Vec<usize>> {
    let key = HashKey::from_scalar(value);
    if key.is_null() {
        return None;
    }
    map.get(&key)
}

/// Relational merge of `left` and `right` on `left.left_on == right.right_on`.
///
/// Output columns are the left columns followed by the right columns. When
/// both sides use the same key name the key appears once, filled from
/// whichever side matched. Any other name present on both sides gets the
/// configured suffixes.
pub fn merge(
    left: &DataFrame,
    right: &DataFrame,
    left_on: &str,
    right_on: &str,
    join_type: JoinType,
    options: &MergeOptions,
) -> Result<DataFrame, JoinError> {
    let left_keys = left.require_column(left_on)?;
    let right_keys = right.require_column(right_on)?;
    let plan = plan_join(left_keys, right_keys, join_type);
    let shared_key = left_on == right_on;

    let left_names = left
        .column_names()
        .iter()
        .filter(|name| !(shared_key && name.as_str() == left_on))
        .map(String::as_str)
        .collect::<BTreeSet<_>>();
    let right_names = right
        .column_names()
        .iter()
        .filter(|name| !(shared_key && name.as_str() == right_on))
        .map(String::as_str)
        .collect::<BTreeSet<_>>();

    let mut columns = Vec::with_capacity(left.column_names().len() + right.column_names().len());

    for (name, column) in left.columns() {
        if shared_key && name == left_on {
            columns.push((name.to_owned(), coalesce_keys(left_keys, right_keys, &plan)?));
            continue;
        }
        let out_name = if right_names.contains(name) {
            format!("{name}{}", options.left_suffix)
        } else {
            name.to_owned()
        };
        columns.push((out_name, column.reindex_by_positions(&plan.left_positions)?));
    }

    for (name, column) in right.columns() {
        if shared_key && name == right_on {
            continue;
        }
        let out_name = if left_names.contains(name) {
            format!("{name}{}", options.right_suffix)
        } else {
            name.to_owned()
        };
        columns.push((out_name, column.reindex_by_positions(&plan.right_positions)?));
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(
        left_rows = left.len(),
        right_rows = right.len(),
        out_rows = plan.len(),
        ?join_type,
        "merge"
    );

    Ok(DataFrame::with_row_count(plan.len(), columns)?)
}

fn coalesce_keys(left: &Column, right: &Column, plan: &JoinPlan) -> Result<Column, ColumnError> {
    let values = plan
        .left_positions
        .iter()
        .zip(&plan.right_positions)
        .map(|(left_pos, right_pos)| {
            left_pos
                .and_then(|pos| left.value(pos))
                .or_else(|| right_pos.and_then(|pos| right.value(pos)))
                .cloned()
                .unwrap_or_else(|| Scalar::missing_for_dtype(left.dtype()))
        })
        .collect();
    Column::from_values(values)
}
