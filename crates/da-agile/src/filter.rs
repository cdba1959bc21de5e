//! Declarative row filters.
//!
//! Filter values arrive either from typed builders or from loosely-typed
//! JSON, where the shape of the value decides the predicate. Parsing turns
//! that shape into a [`FilterValue`] once, at the boundary, and rejects the
//! shapes that have no single reading.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{NaiveDate, TimeDelta};
use da_columnar::{Column, ComparisonOp};
use da_frame::DataFrame;
use da_types::{DType, Scalar, parse_date};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AgileError;

/// Prefix that turns a filter value into an exclusion.
pub const NEGATION_MARKER: &str = "<>";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterValue {
    Equals { value: Scalar },
    OneOf { values: Vec<Scalar> },
    Excludes { value: Scalar },
    ExcludesAnyOf { values: Vec<Scalar> },
    /// Keep rows where `column <op> (today - days)`.
    RelativeDays { op: ComparisonOp, days: i64 },
}

impl FilterValue {
    /// Read a JSON filter value.
    ///
    /// | shape                          | reading         |
    /// |--------------------------------|-----------------|
    /// | `"<>X"`                        | `Excludes(X)`   |
    /// | string, number, bool           | `Equals`        |
    /// | array of `"<>"` strings        | `ExcludesAnyOf` |
    /// | array without negated strings  | `OneOf`         |
    ///
    /// Null, objects, nested arrays, empty arrays, a bare `"<>"` and arrays
    /// mixing negated with plain values are rejected.
    pub fn parse(value: &Value) -> Result<Self, AgileError> {
        match value {
            Value::Array(items) => parse_sequence(items),
            other => match literal(other)? {
                Literal::Negated(value) => Ok(Self::Excludes { value }),
                Literal::Plain(value) => Ok(Self::Equals { value }),
            },
        }
    }

    fn mask(&self, column: &Column, today: NaiveDate) -> Result<Vec<bool>, AgileError> {
        let dtype = column.dtype();
        let mask = match self {
            Self::Equals { value } => {
                column.compare_scalar(&typed_needle(value, dtype), ComparisonOp::Eq)?
            }
            Self::Excludes { value } => {
                column.compare_scalar(&typed_needle(value, dtype), ComparisonOp::Ne)?
            }
            Self::OneOf { values } => column.is_in(&typed_needles(values, dtype))?,
            Self::ExcludesAnyOf { values } => column
                .is_in(&typed_needles(values, dtype))?
                .into_iter()
                .zip(column.validity().bits())
                .map(|(member, valid)| !member && *valid)
                .collect(),
            Self::RelativeDays { op, days } => {
                let threshold = relative_threshold(today, *days)?;
                column.compare_scalar(&Scalar::Date(threshold), *op)?
            }
        };
        Ok(mask)
    }
}

/// Read a text needle as the column's numeric or boolean type.
///
/// JSON can only spell a negated value as a string, so `"<>5"` arrives as
/// text. Needles that do not parse are left as they are.
fn typed_needle(value: &Scalar, dtype: DType) -> Scalar {
    let Scalar::Utf8(text) = value else {
        return value.clone();
    };
    let text = text.trim();
    let typed = match dtype {
        DType::Int64 | DType::Float64 => text
            .parse::<i64>()
            .map(Scalar::Int64)
            .ok()
            .or_else(|| text.parse::<f64>().ok().map(Scalar::Float64)),
        DType::Bool => text.parse::<bool>().ok().map(Scalar::Bool),
        _ => None,
    };
    typed.unwrap_or_else(|| value.clone())
}

fn typed_needles(values: &[Scalar], dtype: DType) -> Vec<Scalar> {
    values.iter().map(|value| typed_needle(value, dtype)).collect()
}

enum Literal {
    Plain(Scalar),
    Negated(Scalar),
}

fn literal(value: &Value) -> Result<Literal, AgileError> {
    let scalar = match value {
        Value::String(text) => {
            if let Some(rest) = text.strip_prefix(NEGATION_MARKER) {
                if rest.is_empty() {
                    return Err(AgileError::InvalidFilter(format!(
                        "{NEGATION_MARKER:?} needs a value to exclude"
                    )));
                }
                return Ok(Literal::Negated(Scalar::from(rest)));
            }
            Scalar::from(text.as_str())
        }
        Value::Bool(flag) => Scalar::Bool(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => Scalar::Int64(int),
            None => number.as_f64().map(Scalar::Float64).ok_or_else(|| {
                AgileError::InvalidFilter(format!("number {number} is out of range"))
            })?,
        },
        Value::Null => {
            return Err(AgileError::InvalidFilter(
                "null is not a filter value".to_owned(),
            ));
        }
        Value::Array(_) | Value::Object(_) => {
            return Err(AgileError::InvalidFilter(format!(
                "nested value {value} is not a filter value"
            )));
        }
    };
    Ok(Literal::Plain(scalar))
}

fn parse_sequence(items: &[Value]) -> Result<FilterValue, AgileError> {
    if items.is_empty() {
        return Err(AgileError::InvalidFilter(
            "an empty list matches nothing".to_owned(),
        ));
    }

    let mut plain = Vec::new();
    let mut negated = Vec::new();
    for item in items {
        match literal(item)? {
            Literal::Plain(value) => plain.push(value),
            Literal::Negated(value) => negated.push(value),
        }
    }

    match (plain.is_empty(), negated.is_empty()) {
        (false, true) => Ok(FilterValue::OneOf { values: plain }),
        (true, false) => Ok(FilterValue::ExcludesAnyOf { values: negated }),
        _ => Err(AgileError::InvalidFilter(
            "a list cannot mix negated and plain values".to_owned(),
        )),
    }
}

fn relative_threshold(today: NaiveDate, days: i64) -> Result<NaiveDate, AgileError> {
    TimeDelta::try_days(days)
        .and_then(|delta| today.checked_sub_signed(delta))
        .ok_or_else(|| AgileError::InvalidFilter(format!("{days} days is out of the calendar range")))
}

fn relative_literal_pattern() -> Result<&'static Regex, AgileError> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\s*([^<>=!]*[^<>=!\s])\s*(>=|<=|==|!=|>|<)\s*(-?\d+)\s*$"))
        .as_ref()
        .map_err(|err| AgileError::InvalidFilter(err.to_string()))
}

/// Parse a relative-date literal such as `"ClosedDate >= 90"`.
///
/// The result keeps rows whose `ClosedDate` is on or after the day 90 days
/// before the reference date.
pub fn parse_relative_literal(input: &str) -> Result<(String, FilterValue), AgileError> {
    let captures = relative_literal_pattern()?
        .captures(input)
        .ok_or_else(|| AgileError::InvalidFilter(format!("{input:?} is not `<column> <op> <days>`")))?;

    let column = captures[1].to_owned();
    let op = [
        ComparisonOp::Ge,
        ComparisonOp::Gt,
        ComparisonOp::Le,
        ComparisonOp::Lt,
        ComparisonOp::Eq,
        ComparisonOp::Ne,
    ]
    .into_iter()
    .find(|op| op.symbol() == &captures[2])
    .ok_or_else(|| AgileError::InvalidFilter(format!("{input:?} has no comparison operator")))?;
    let days = captures[3]
        .parse::<i64>()
        .map_err(|err| AgileError::InvalidFilter(format!("{input:?}: {err}")))?;

    Ok((column, FilterValue::RelativeDays { op, days }))
}

/// Ordered (column, predicate) pairs, combined with logical AND.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterSpec {
    entries: Vec<(String, FilterValue)>,
}

impl FilterSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object mapping column names to filter values.
    pub fn from_json(value: &Value) -> Result<Self, AgileError> {
        let object = value.as_object().ok_or_else(|| {
            AgileError::InvalidFilter("filters must be a JSON object".to_owned())
        })?;
        let entries = object
            .iter()
            .map(|(column, value)| Ok((column.clone(), FilterValue::parse(value)?)))
            .collect::<Result<Vec<_>, AgileError>>()?;
        Ok(Self { entries })
    }

    /// Append relative-date literals such as `"ClosedDate >= 90"`.
    pub fn with_literals(mut self, literals: &[&str]) -> Result<Self, AgileError> {
        for literal in literals {
            self.entries.push(parse_relative_literal(literal)?);
        }
        Ok(self)
    }

    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: FilterValue) -> Self {
        self.entries.push((column.into(), value));
        self
    }

    #[must_use]
    pub fn equals(self, column: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.with(column, FilterValue::Equals { value: value.into() })
    }

    #[must_use]
    pub fn one_of<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Scalar>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.with(column, FilterValue::OneOf { values })
    }

    #[must_use]
    pub fn excludes(self, column: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.with(column, FilterValue::Excludes { value: value.into() })
    }

    #[must_use]
    pub fn excludes_any_of<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Scalar>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.with(column, FilterValue::ExcludesAnyOf { values })
    }

    #[must_use]
    pub fn relative_days(self, column: impl Into<String>, op: ComparisonOp, days: i64) -> Self {
        self.with(column, FilterValue::RelativeDays { op, days })
    }

    #[must_use]
    pub fn entries(&self) -> &[(String, FilterValue)] {
        &self.entries
    }

    fn validate(&self) -> Result<(), AgileError> {
        let mut pinned = HashMap::<&str, &Scalar>::new();
        for (column, value) in &self.entries {
            match value {
                FilterValue::OneOf { values } | FilterValue::ExcludesAnyOf { values }
                    if values.is_empty() =>
                {
                    return Err(AgileError::InvalidFilter(format!(
                        "filter on {column:?} has an empty value list"
                    )));
                }
                FilterValue::Equals { value } => {
                    if let Some(previous) = pinned.insert(column.as_str(), value) {
                        if !previous.semantic_eq(value) {
                            return Err(AgileError::ContradictoryFilter(format!(
                                "{column:?} cannot equal both {previous} and {value}"
                            )));
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Closed calendar interval `[lower, upper]` on one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub column: String,
    pub lower: NaiveDate,
    pub upper: NaiveDate,
}

impl DateRange {
    pub fn new(column: impl Into<String>, lower: NaiveDate, upper: NaiveDate) -> Self {
        Self {
            column: column.into(),
            lower,
            upper,
        }
    }

    /// Bounds given as `YYYY-MM-DD` or ISO-8601 date-times.
    pub fn parse(column: impl Into<String>, lower: &str, upper: &str) -> Result<Self, AgileError> {
        let bound = |text: &str| {
            parse_date(text).map_err(|err| AgileError::InvalidFilter(err.to_string()))
        };
        Ok(Self::new(column, bound(lower)?, bound(upper)?))
    }

    fn validate(&self) -> Result<(), AgileError> {
        if self.lower > self.upper {
            return Err(AgileError::ContradictoryFilter(format!(
                "range on {:?} starts at {} after it ends at {}",
                self.column, self.lower, self.upper
            )));
        }
        Ok(())
    }

    fn mask(&self, column: &Column) -> Result<Vec<bool>, AgileError> {
        let above = column.compare_scalar(&Scalar::Date(self.lower), ComparisonOp::Ge)?;
        let below = column.compare_scalar(&Scalar::Date(self.upper), ComparisonOp::Le)?;
        Ok(above.into_iter().zip(below).map(|(a, b)| a && b).collect())
    }
}

pub(crate) fn apply(
    frame: &DataFrame,
    spec: &FilterSpec,
    ranges: &[DateRange],
    today: NaiveDate,
) -> Result<DataFrame, AgileError> {
    spec.validate()?;
    for range in ranges {
        range.validate()?;
    }

    let columns = spec
        .entries
        .iter()
        .map(|(column, _)| column)
        .chain(ranges.iter().map(|range| &range.column));
    for column in columns {
        if !frame.has_column(column) {
            return Err(AgileError::Schema {
                column: column.clone(),
            });
        }
    }

    let mut keep = vec![true; frame.len()];
    for (column, value) in &spec.entries {
        let mask = value.mask(frame.require_column(column)?, today)?;
        and_into(&mut keep, &mask);
    }
    for range in ranges {
        let mask = range.mask(frame.require_column(&range.column)?)?;
        and_into(&mut keep, &mask);
    }

    Ok(frame.filter_rows(&keep)?)
}

fn and_into(keep: &mut [bool], mask: &[bool]) {
    for (slot, pass) in keep.iter_mut().zip(mask) {
        *slot &= *pass;
    }
}
