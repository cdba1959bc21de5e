#![forbid(unsafe_code)]

//! Aggregation engine for agile metrics.
//!
//! [`Agile`] maps a declarative description of a metric (a reference
//! column, filters, grouping keys and a reduction) onto frame operations.
//! Every operation is pure: inputs are never modified and each call returns
//! freshly built frames.

mod filter;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, Utc};
use da_columnar::{ArithmeticOp, Column, ColumnError, ComparisonOp};
use da_frame::{DataFrame, FrameError};
use da_groupby::{GroupByError, GroupByOptions, groupby_agg};
use da_join::{JoinError, MergeOptions, merge};
use da_types::{DType, TypeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use da_groupby::AggFunc;
pub use da_join::JoinType;
pub use filter::{DateRange, FilterSpec, FilterValue, NEGATION_MARKER, parse_relative_literal};

#[derive(Debug, Error)]
pub enum AgileError {
    #[error("column {column:?} is not in the dataset schema")]
    Schema { column: String },
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("{func} over column {column:?} requires a numeric dtype, found {dtype:?}")]
    NonNumericReduction {
        func: &'static str,
        column: String,
        dtype: DType,
    },
    #[error("arithmetic requires numeric operands, found {left:?} and {right:?}")]
    NonNumericOperands { left: DType, right: DType },
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("contradictory filter: {0}")]
    ContradictoryFilter(String),
    #[error("nothing to join")]
    NothingToJoin,
    #[error("column name {column:?} is produced more than once")]
    NameConflict { column: String },
    #[error(transparent)]
    Frame(FrameError),
    #[error(transparent)]
    Column(ColumnError),
}

impl From<ColumnError> for AgileError {
    fn from(err: ColumnError) -> Self {
        match err {
            ColumnError::Type(inner) => Self::Type(inner),
            ColumnError::NonNumericOperands { left, right } => {
                Self::NonNumericOperands { left, right }
            }
            other => Self::Column(other),
        }
    }
}

impl From<FrameError> for AgileError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::UnknownColumn(column) => Self::Schema { column },
            FrameError::DuplicateColumn(column) => Self::NameConflict { column },
            FrameError::Column(inner) => inner.into(),
            other => Self::Frame(other),
        }
    }
}

impl From<GroupByError> for AgileError {
    fn from(err: GroupByError) -> Self {
        match err {
            GroupByError::NonNumericAggregation {
                func,
                column,
                dtype,
            } => Self::NonNumericReduction {
                func: func.name(),
                column,
                dtype,
            },
            GroupByError::Frame(inner) => inner.into(),
            GroupByError::Column(inner) => inner.into(),
            GroupByError::Type(inner) => Self::Type(inner),
        }
    }
}

impl From<JoinError> for AgileError {
    fn from(err: JoinError) -> Self {
        match err {
            JoinError::Frame(inner) => inner.into(),
            JoinError::Column(inner) => inner.into(),
        }
    }
}

/// The column a metric reduces over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reference {
    Column { name: String },
    /// Whole days `end - start`; negative when `end` precedes `start`.
    DateDiffDays { end: String, start: String },
}

impl Reference {
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column { name: name.into() }
    }

    pub fn date_diff_days(end: impl Into<String>, start: impl Into<String>) -> Self {
        Self::DateDiffDays {
            end: end.into(),
            start: start.into(),
        }
    }
}

impl From<&str> for Reference {
    fn from(name: &str) -> Self {
        Self::column(name)
    }
}

/// Rows after filtering and derived-column computation, and their aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Detail {
    pub detail: DataFrame,
    pub aggregated: DataFrame,
}

/// Everything a single metric needs besides the dataset and the reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRequest {
    pub reference: Reference,
    pub output: String,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub filters: FilterSpec,
    #[serde(default)]
    pub date_ranges: Vec<DateRange>,
}

impl MetricRequest {
    pub fn new(reference: impl Into<Reference>, output: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            output: output.into(),
            group_by: Vec::new(),
            filters: FilterSpec::default(),
            date_ranges: Vec::new(),
        }
    }

    #[must_use]
    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn filters(mut self, filters: FilterSpec) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn date_range(mut self, range: DateRange) -> Self {
        self.date_ranges.push(range);
        self
    }
}

/// Element-wise operator applied by [`Agile::combine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Power,
    Equals,
    NotEquals,
    And,
}

impl BinaryOp {
    fn apply(self, left: &Column, right: &Column) -> Result<Column, ColumnError> {
        let arithmetic = |op| left.binary_numeric(right, op);
        match self {
            Self::Add => arithmetic(ArithmeticOp::Add),
            Self::Subtract => arithmetic(ArithmeticOp::Sub),
            Self::Multiply => arithmetic(ArithmeticOp::Mul),
            Self::Divide => arithmetic(ArithmeticOp::Div),
            Self::FloorDivide => arithmetic(ArithmeticOp::FloorDiv),
            Self::Modulo => arithmetic(ArithmeticOp::Mod),
            Self::Power => arithmetic(ArithmeticOp::Pow),
            Self::Equals => left.compare(right, ComparisonOp::Eq),
            Self::NotEquals => left.compare(right, ComparisonOp::Ne),
            Self::And => left.and(right),
        }
    }
}

/// Join two frames and derive one column from an operand on each side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combine {
    pub left_key: String,
    pub right_key: String,
    pub join: JoinType,
    pub op: BinaryOp,
    pub left_ref: String,
    pub right_ref: String,
    pub output: String,
}

impl Combine {
    pub fn new(
        left_key: impl Into<String>,
        right_key: impl Into<String>,
        join: JoinType,
        op: BinaryOp,
    ) -> Self {
        let left_key = left_key.into();
        let right_key = right_key.into();
        Self {
            left_ref: left_key.clone(),
            right_ref: right_key.clone(),
            left_key,
            right_key,
            join,
            op,
            output: "output".to_owned(),
        }
    }

    #[must_use]
    pub fn operands(mut self, left_ref: impl Into<String>, right_ref: impl Into<String>) -> Self {
        self.left_ref = left_ref.into();
        self.right_ref = right_ref.into();
        self
    }

    #[must_use]
    pub fn output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Agile {
    today: NaiveDate,
}

impl Default for Agile {
    fn default() -> Self {
        Self::new()
    }
}

impl Agile {
    /// Engine whose relative-date filters count back from the current UTC date.
    #[must_use]
    pub fn new() -> Self {
        Self::with_reference_date(Utc::now().date_naive())
    }

    #[must_use]
    pub fn with_reference_date(today: NaiveDate) -> Self {
        Self { today }
    }

    /// Keep the rows satisfying every filter entry and every date range.
    ///
    /// Columns are checked before any predicate runs. Missing cells satisfy
    /// no predicate, exclusions included.
    pub fn filter(
        &self,
        frame: &DataFrame,
        filters: &FilterSpec,
        date_ranges: &[DateRange],
    ) -> Result<DataFrame, AgileError> {
        let out = filter::apply(frame, filters, date_ranges, self.today)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            rows_in = frame.len(),
            rows_out = out.len(),
            filters = filters.entries().len(),
            date_ranges = date_ranges.len(),
            "agile filter"
        );

        Ok(out)
    }

    /// Group `frame` by `group_by` and reduce `reference` into `output`.
    ///
    /// A derived reference is first written into the detail frame under
    /// `output`. Null keys form their own group.
    pub fn reduce(
        &self,
        frame: &DataFrame,
        reference: &Reference,
        group_by: &[&str],
        func: AggFunc,
        output: &str,
    ) -> Result<Detail, AgileError> {
        for key in group_by {
            frame.require_column(key)?;
        }

        let (detail, value_column) = match reference {
            Reference::Column { name } => {
                frame.require_column(name)?;
                (frame.clone(), name.as_str())
            }
            Reference::DateDiffDays { end, start } => {
                let days = Column::date_diff_days(frame.require_column(end)?, frame.require_column(start)?)?;
                (frame.with_column(output, days)?, output)
            }
        };

        let aggregated = groupby_agg(
            &detail,
            group_by,
            value_column,
            func,
            output,
            GroupByOptions { dropna: false },
        )?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            rows = detail.len(),
            groups = aggregated.len(),
            func = func.name(),
            output,
            "agile reduce"
        );

        Ok(Detail { detail, aggregated })
    }

    /// Filter, then reduce, as described by `request`.
    pub fn metric(
        &self,
        frame: &DataFrame,
        func: AggFunc,
        request: &MetricRequest,
    ) -> Result<Detail, AgileError> {
        let filtered = self.filter(frame, &request.filters, &request.date_ranges)?;
        let group_by = request
            .group_by
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>();
        self.reduce(&filtered, &request.reference, &group_by, func, &request.output)
    }

    pub fn avg(&self, frame: &DataFrame, request: &MetricRequest) -> Result<Detail, AgileError> {
        self.metric(frame, AggFunc::Mean, request)
    }

    pub fn count(&self, frame: &DataFrame, request: &MetricRequest) -> Result<Detail, AgileError> {
        self.metric(frame, AggFunc::Count, request)
    }

    pub fn sum(&self, frame: &DataFrame, request: &MetricRequest) -> Result<Detail, AgileError> {
        self.metric(frame, AggFunc::Sum, request)
    }

    pub fn min(&self, frame: &DataFrame, request: &MetricRequest) -> Result<Detail, AgileError> {
        self.metric(frame, AggFunc::Min, request)
    }

    pub fn max(&self, frame: &DataFrame, request: &MetricRequest) -> Result<Detail, AgileError> {
        self.metric(frame, AggFunc::Max, request)
    }

    /// Join `left` and `right`, then append `request.op` applied to the two
    /// operand columns as `request.output`.
    ///
    /// Operands that share a name with a column on the other side are read
    /// from their suffixed copies. A missing operand or a zero divisor
    /// yields a missing value rather than an error.
    pub fn combine(
        &self,
        left: &DataFrame,
        right: &DataFrame,
        request: &Combine,
    ) -> Result<DataFrame, AgileError> {
        left.require_column(&request.left_ref)?;
        right.require_column(&request.right_ref)?;

        let options = MergeOptions::default();
        let joined = merge(
            left,
            right,
            &request.left_key,
            &request.right_key,
            request.join,
            &options,
        )?;

        let shared_key = request.left_key == request.right_key;
        let left_name = merged_name(
            &request.left_ref,
            shared_key && request.left_ref == request.left_key,
            right.has_column(&request.left_ref),
            &options.left_suffix,
        );
        let right_name = merged_name(
            &request.right_ref,
            shared_key && request.right_ref == request.right_key,
            left.has_column(&request.right_ref),
            &options.right_suffix,
        );

        let values = request.op.apply(
            joined.require_column(&left_name)?,
            joined.require_column(&right_name)?,
        )?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            left_rows = left.len(),
            right_rows = right.len(),
            out_rows = joined.len(),
            op = ?request.op,
            "agile combine"
        );

        Ok(joined.with_column(request.output.as_str(), values)?)
    }

    /// Chain outer joins over `frames` on `key`, left to right.
    ///
    /// A non-key column name carried by more than one input is renamed to
    /// `{name}_{position}` in each input that carries it.
    pub fn multiple_join(&self, frames: &[DataFrame], key: &str) -> Result<DataFrame, AgileError> {
        let Some((first, rest)) = frames.split_first() else {
            return Err(AgileError::NothingToJoin);
        };
        for frame in frames {
            frame.require_column(key)?;
        }
        if rest.is_empty() {
            return Ok(first.clone());
        }

        let mut carriers = BTreeMap::<&str, usize>::new();
        for frame in frames {
            for name in frame.column_names() {
                if name != key {
                    *carriers.entry(name.as_str()).or_default() += 1;
                }
            }
        }

        let mut renamed = Vec::with_capacity(frames.len());
        for (position, frame) in frames.iter().enumerate() {
            let mut out = frame.clone();
            for name in frame.column_names() {
                if name != key && carriers.get(name.as_str()).is_some_and(|count| *count > 1) {
                    out = out.rename_column(name, &format!("{name}_{position}"))?;
                }
            }
            renamed.push(out);
        }

        let mut seen = BTreeSet::new();
        for frame in &renamed {
            for name in frame.column_names() {
                if name != key && !seen.insert(name.clone()) {
                    return Err(AgileError::NameConflict {
                        column: name.clone(),
                    });
                }
            }
        }

        let options = MergeOptions::default();
        let mut parts = renamed.into_iter();
        let mut out = parts.next().ok_or(AgileError::NothingToJoin)?;
        for next in parts {
            out = merge(&out, &next, key, key, JoinType::Outer, &options)?;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(inputs = frames.len(), rows = out.len(), key, "agile multiple_join");

        Ok(out)
    }
}

fn merged_name(name: &str, is_shared_key: bool, collides: bool, suffix: &str) -> String {
    if !is_shared_key && collides {
        format!("{name}{suffix}")
    } else {
        name.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use da_columnar::ComparisonOp;
    use da_frame::DataFrame;
    use da_types::{DType, NullKind, Scalar};
    use proptest::prelude::*;

    use super::{
        AggFunc, Agile, AgileError, BinaryOp, Combine, DateRange, FilterSpec, JoinType,
        MetricRequest, Reference,
    };

    fn date(y: i32, m: u32, d: u32) -> Scalar {
        Scalar::Date(NaiveDate::from_ymd_opt(y, m, d).expect("date"))
    }

    fn agile() -> Agile {
        Agile::with_reference_date(NaiveDate::from_ymd_opt(2024, 3, 31).expect("today"))
    }

    fn backlog() -> DataFrame {
        let null = || Scalar::Null(NullKind::Null);
        let row = |id: i64, path: Scalar, kind: &str, state: Scalar, created: Scalar, closed: Scalar, effort: Scalar| {
            vec![Scalar::Int64(id), path, Scalar::from(kind), state, created, closed, effort]
        };
        DataFrame::from_records(
            &["Id", "IterationPath", "WorkItemType", "State", "CreatedDate", "ClosedDate", "Effort"],
            vec![
                row(1, "S1".into(), "Bug", "Done".into(), date(2024, 1, 1), date(2024, 1, 10), Scalar::Int64(3)),
                row(2, "S1".into(), "Bug", "Removed".into(), date(2024, 1, 2), null(), Scalar::Int64(5)),
                row(3, "S2".into(), "Spike", "Active".into(), date(2024, 2, 1), null(), null()),
                row(4, "S2".into(), "Bug", "Done".into(), date(2024, 2, 1), date(2024, 3, 20), Scalar::Int64(8)),
                row(5, null(), "Bug", null(), date(2024, 3, 1), date(2024, 2, 28), Scalar::Int64(1)),
            ],
        )
        .expect("frame")
    }

    fn ids(frame: &DataFrame) -> Vec<i64> {
        frame
            .column("Id")
            .expect("Id")
            .values()
            .iter()
            .filter_map(|value| match value {
                Scalar::Int64(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn empty_filters_are_identity() {
        let frame = backlog();
        let out = agile().filter(&frame, &FilterSpec::new(), &[]).expect("filter");
        assert_eq!(out, frame);
    }

    #[test]
    fn exclusion_drops_matches_and_missing_cells() {
        let spec = FilterSpec::new().excludes("State", "Removed");
        let out = agile().filter(&backlog(), &spec, &[]).expect("filter");
        assert_eq!(ids(&out), [1, 3, 4]);

        let spec = FilterSpec::new().excludes_any_of("State", ["Removed", "Active"]);
        let out = agile().filter(&backlog(), &spec, &[]).expect("filter");
        assert_eq!(ids(&out), [1, 4]);
    }

    #[test]
    fn membership_and_equality_combine_with_and() {
        let spec = FilterSpec::new()
            .one_of("WorkItemType", ["Bug", "Spike"])
            .equals("IterationPath", "S2");
        let out = agile().filter(&backlog(), &spec, &[]).expect("filter");
        assert_eq!(ids(&out), [3, 4]);
    }

    #[test]
    fn relative_days_count_back_from_reference_date() {
        // 2024-03-31 minus 30 days is 2024-03-01
        let spec = FilterSpec::new().relative_days("ClosedDate", ComparisonOp::Ge, 30);
        let out = agile().filter(&backlog(), &spec, &[]).expect("filter");
        assert_eq!(ids(&out), [4]);

        let spec = FilterSpec::new()
            .with_literals(&["CreatedDate >= 31"])
            .expect("literal");
        let out = agile().filter(&backlog(), &spec, &[]).expect("filter");
        assert_eq!(ids(&out), [5]);
    }

    #[test]
    fn relative_days_and_date_range_on_one_column_both_apply() {
        let spec = FilterSpec::new().relative_days("ClosedDate", ComparisonOp::Ge, 90);
        let range = DateRange::parse("ClosedDate", "2024-01-01", "2024-02-29").expect("range");
        let out = agile().filter(&backlog(), &spec, &[range]).expect("filter");
        // 90 days before 2024-03-31 is 2024-01-01
        assert_eq!(ids(&out), [1, 5]);
    }

    #[test]
    fn unknown_columns_fail_before_any_predicate() {
        let spec = FilterSpec::new()
            .equals("WorkItemType", Scalar::Int64(7))
            .equals("Sprint", "S1");
        let err = agile().filter(&backlog(), &spec, &[]).expect_err("schema");
        assert!(matches!(err, AgileError::Schema { column } if column == "Sprint"));

        let range = DateRange::parse("Resolved", "2024-01-01", "2024-01-02").expect("range");
        let err = agile()
            .filter(&backlog(), &FilterSpec::new(), &[range])
            .expect_err("schema");
        assert!(matches!(err, AgileError::Schema { .. }));
    }

    #[test]
    fn inverted_range_is_contradictory() {
        let range = DateRange::parse("ClosedDate", "2024-02-01", "2024-01-01").expect("range");
        let err = agile()
            .filter(&backlog(), &FilterSpec::new(), &[range])
            .expect_err("contradiction");
        assert!(matches!(err, AgileError::ContradictoryFilter(_)));
    }

    #[test]
    fn lead_time_reduces_a_derived_day_difference() {
        let request = MetricRequest::new(Reference::date_diff_days("ClosedDate", "CreatedDate"), "LeadTime")
            .group_by(["IterationPath"])
            .filters(FilterSpec::new().equals("State", "Done"));
        let out = agile().avg(&backlog(), &request).expect("avg");

        assert_eq!(out.detail.len(), 2);
        assert_eq!(
            out.detail.column("LeadTime").expect("derived").values(),
            &[Scalar::Int64(9), Scalar::Int64(48)]
        );
        assert_eq!(
            out.aggregated.column_names(),
            &["IterationPath".to_owned(), "LeadTime".to_owned()]
        );
        assert_eq!(out.aggregated.value("LeadTime", 0), Some(&Scalar::Float64(9.0)));
        assert_eq!(out.aggregated.value("LeadTime", 1), Some(&Scalar::Float64(48.0)));
    }

    #[test]
    fn negative_day_differences_are_kept() {
        let out = agile()
            .reduce(
                &backlog(),
                &Reference::date_diff_days("ClosedDate", "CreatedDate"),
                &[],
                AggFunc::Min,
                "days",
            )
            .expect("min");
        assert_eq!(out.aggregated.len(), 1);
        assert_eq!(out.aggregated.value("days", 0), Some(&Scalar::Int64(-2)));
    }

    #[test]
    fn count_groups_null_keys_and_omits_empty_groups() {
        let request = MetricRequest::new("Id", "Items")
            .group_by(["IterationPath"])
            .filters(FilterSpec::new().equals("WorkItemType", "Bug"));
        let out = agile().count(&backlog(), &request).expect("count");

        assert_eq!(out.aggregated.len(), 3);
        assert_eq!(
            out.aggregated.column("Items").expect("count").values(),
            &[Scalar::Int64(2), Scalar::Int64(1), Scalar::Int64(1)]
        );
        assert!(out.aggregated.value("IterationPath", 2).expect("null key").is_missing());
    }

    #[test]
    fn reductions_validate_schema_and_dtype() {
        let err = agile()
            .reduce(&backlog(), &Reference::column("Id"), &["Sprint"], AggFunc::Count, "n")
            .expect_err("schema");
        assert!(matches!(err, AgileError::Schema { column } if column == "Sprint"));

        let err = agile()
            .reduce(&backlog(), &Reference::column("State"), &[], AggFunc::Sum, "n")
            .expect_err("text sum");
        assert!(matches!(
            err,
            AgileError::NonNumericReduction {
                dtype: DType::Utf8,
                ..
            }
        ));

        let request = MetricRequest::new("Effort", "Total").filters(FilterSpec::new().equals("State", "Nope"));
        let out = agile().sum(&backlog(), &request).expect("empty sum");
        assert_eq!(out.detail.len(), 0);
        assert_eq!(out.aggregated.len(), 1);
        assert!(out.aggregated.value("Total", 0).expect("sum").is_missing());
    }

    #[test]
    fn combine_divides_with_suffixed_operands() {
        let left = DataFrame::from_records(
            &["K", "V"],
            vec![vec!["A".into(), Scalar::Int64(10)], vec!["B".into(), Scalar::Int64(6)]],
        )
        .expect("left");
        let right = DataFrame::from_records(
            &["K", "V"],
            vec![vec!["A".into(), Scalar::Int64(0)], vec!["B".into(), Scalar::Int64(4)]],
        )
        .expect("right");

        let request = Combine::new("K", "K", JoinType::Left, BinaryOp::Divide)
            .operands("V", "V")
            .output("ratio");
        let out = agile().combine(&left, &right, &request).expect("combine");

        assert_eq!(
            out.column_names(),
            &["K".to_owned(), "V_left".to_owned(), "V_right".to_owned(), "ratio".to_owned()]
        );
        assert!(out.value("ratio", 0).expect("zero divisor").is_missing());
        assert_eq!(out.value("ratio", 1), Some(&Scalar::Float64(1.5)));
    }

    #[test]
    fn combine_nulls_unmatched_rows_and_compares() {
        let left = DataFrame::from_records(
            &["Sprint", "Done"],
            vec![vec!["S1".into(), Scalar::Int64(4)], vec!["S2".into(), Scalar::Int64(2)]],
        )
        .expect("left");
        let right = DataFrame::from_records(&["Iteration", "Planned"], vec![vec!["S1".into(), Scalar::Int64(4)]])
            .expect("right");

        let request = Combine::new("Sprint", "Iteration", JoinType::Left, BinaryOp::Equals)
            .operands("Done", "Planned")
            .output("OnPlan");
        let out = agile().combine(&left, &right, &request).expect("combine");
        assert_eq!(out.value("OnPlan", 0), Some(&Scalar::Bool(true)));
        assert!(out.value("OnPlan", 1).expect("unmatched").is_missing());

        let request = Combine::new("Sprint", "Iteration", JoinType::Inner, BinaryOp::Subtract)
            .operands("Done", "Missing");
        let err = agile().combine(&left, &right, &request).expect_err("schema");
        assert!(matches!(err, AgileError::Schema { column } if column == "Missing"));

        let request = Combine::new("Sprint", "Iteration", JoinType::Inner, BinaryOp::Add)
            .operands("Sprint", "Planned");
        let err = agile().combine(&left, &right, &request).expect_err("text operand");
        assert!(matches!(err, AgileError::NonNumericOperands { .. } | AgileError::Type(_)));
    }

    #[test]
    fn multiple_join_disambiguates_repeated_names() {
        let a = DataFrame::from_records(&["K", "LeadTime"], vec![vec!["S1".into(), Scalar::Float64(9.0)]])
            .expect("a");
        let b = DataFrame::from_records(
            &["K", "Items"],
            vec![vec!["S1".into(), Scalar::Int64(2)], vec!["S2".into(), Scalar::Int64(1)]],
        )
        .expect("b");

        let out = agile()
            .multiple_join(&[a.clone(), b.clone(), b.clone()], "K")
            .expect("join");
        assert_eq!(
            out.column_names(),
            &["K".to_owned(), "LeadTime".to_owned(), "Items_1".to_owned(), "Items_2".to_owned()]
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out.value("K", 1), Some(&Scalar::from("S2")));
        assert!(out.value("LeadTime", 1).expect("outer").is_missing());

        assert_eq!(agile().multiple_join(std::slice::from_ref(&a), "K").expect("single"), a);
    }

    #[test]
    fn multiple_join_rejects_empty_missing_keys_and_residual_collisions() {
        assert!(matches!(
            agile().multiple_join(&[], "K"),
            Err(AgileError::NothingToJoin)
        ));

        let a = DataFrame::from_records(&["K", "V", "V_1"], vec![vec!["S1".into(), Scalar::Int64(1), Scalar::Int64(2)]])
            .expect("a");
        let b = DataFrame::from_records(&["K", "V"], vec![vec!["S1".into(), Scalar::Int64(3)]]).expect("b");
        let err = agile().multiple_join(&[a.clone(), b], "K").expect_err("collision");
        assert!(matches!(err, AgileError::NameConflict { column } if column == "V_1"));

        let c = DataFrame::from_records(&["Key", "W"], vec![vec!["S1".into(), Scalar::Int64(3)]]).expect("c");
        let err = agile().multiple_join(&[a, c], "K").expect_err("schema");
        assert!(matches!(err, AgileError::Schema { column } if column == "K"));
    }

    fn state_strategy() -> impl Strategy<Value = Scalar> {
        prop_oneof![
            Just(Scalar::from("Done")),
            Just(Scalar::from("Active")),
            Just(Scalar::from("Removed")),
            Just(Scalar::Null(NullKind::Null)),
        ]
    }

    fn spec_strategy() -> impl Strategy<Value = FilterSpec> {
        prop_oneof![
            Just(FilterSpec::new()),
            Just(FilterSpec::new().excludes("State", "Removed")),
            Just(FilterSpec::new().one_of("State", ["Done", "Active"])),
            (0_i64..10).prop_map(|floor| FilterSpec::new()
                .equals("State", "Done")
                .relative_days("ClosedDate", ComparisonOp::Le, floor)),
        ]
    }

    proptest! {
        #[test]
        fn filter_is_a_subset_and_idempotent(
            rows in proptest::collection::vec((state_strategy(), 0_i64..20), 0..24),
            spec in spec_strategy(),
        ) {
            let frame = DataFrame::from_records(
                &["Id", "State", "ClosedDate"],
                rows.iter()
                    .enumerate()
                    .map(|(id, (state, age))| {
                        let closed = NaiveDate::from_ymd_opt(2024, 3, 1).expect("date")
                            + chrono::TimeDelta::days(*age);
                        vec![Scalar::Int64(id as i64), state.clone(), Scalar::Date(closed)]
                    })
                    .collect(),
            )
            .expect("frame");

            let engine = agile();
            let once = engine.filter(&frame, &spec, &[]).expect("once");
            let twice = engine.filter(&once, &spec, &[]).expect("twice");

            prop_assert!(once.len() <= frame.len());
            let all_ids = ids(&frame);
            for id in ids(&once) {
                prop_assert!(all_ids.contains(&id));
            }
            prop_assert_eq!(once, twice);
        }
    }
}
