#![forbid(unsafe_code)]

use std::cmp::Ordering;

use chrono::NaiveDate;
use da_types::{DType, NullKind, Scalar, TypeError, cast_scalar, common_dtype, infer_dtype};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityMask {
    bits: Vec<bool>,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        let bits = values.iter().map(|value| !value.is_missing()).collect();
        Self { bits }
    }

    #[must_use]
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
    validity: ValidityMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    #[must_use]
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("arithmetic requires numeric operands, found {left:?} and {right:?}")]
    NonNumericOperands { left: DType, right: DType },
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl Column {
    /// Construct a column, coercing values to the target dtype.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let coerced = values
            .into_iter()
            .map(|value| cast_scalar(value, dtype))
            .collect::<Result<Vec<_>, _>>()?;

        let validity = ValidityMask::from_values(&coerced);

        Ok(Self {
            dtype,
            values: coerced,
            validity,
        })
    }

    pub fn from_values(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values)?;
        Self::new(dtype, values)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    pub fn reindex_by_positions(&self, positions: &[Option<usize>]) -> Result<Self, ColumnError> {
        let values = positions
            .iter()
            .map(|slot| match slot {
                Some(idx) => self
                    .values
                    .get(*idx)
                    .cloned()
                    .unwrap_or_else(|| Scalar::missing_for_dtype(self.dtype)),
                None => Scalar::missing_for_dtype(self.dtype),
            })
            .collect::<Vec<_>>();

        Self::new(self.dtype, values)
    }

    pub fn filter_by_mask(&self, mask: &[bool]) -> Result<Self, ColumnError> {
        self.check_len(mask.len())?;
        let values = self
            .values
            .iter()
            .zip(mask)
            .filter(|(_, keep)| **keep)
            .map(|(value, _)| value.clone())
            .collect();
        Self::new(self.dtype, values)
    }

    pub fn binary_numeric(&self, right: &Self, op: ArithmeticOp) -> Result<Self, ColumnError> {
        self.check_len(right.len())?;

        let base = common_dtype(self.dtype, right.dtype)?;
        if !matches!(base, DType::Null | DType::Bool | DType::Int64 | DType::Float64) {
            return Err(ColumnError::NonNumericOperands {
                left: self.dtype,
                right: right.dtype,
            });
        }
        let integer_domain = matches!(base, DType::Bool | DType::Int64);

        let values = self
            .values
            .iter()
            .zip(&right.values)
            .map(|(left, right)| arithmetic_cell(left, right, op, integer_domain))
            .collect::<Result<Vec<_>, _>>()?;

        let out_dtype = match base {
            DType::Null => DType::Null,
            _ if matches!(op, ArithmeticOp::Div) => DType::Float64,
            _ if values.iter().any(|v| matches!(v, Scalar::Float64(_))) => DType::Float64,
            _ if integer_domain => DType::Int64,
            _ => DType::Float64,
        };

        Self::new(out_dtype, values)
    }

    /// Element-wise comparison producing a Bool column; missing operands yield missing.
    pub fn compare(&self, right: &Self, op: ComparisonOp) -> Result<Self, ColumnError> {
        self.check_len(right.len())?;
        let values = self
            .values
            .iter()
            .zip(&right.values)
            .map(|(left, right)| {
                Ok::<_, ColumnError>(match left.compare(right)? {
                    Some(ordering) => Scalar::Bool(op.holds(ordering)),
                    None => Scalar::Null(NullKind::Null),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(DType::Bool, values)
    }

    /// Element-wise conjunction of two boolean columns; missing stays missing.
    pub fn and(&self, right: &Self) -> Result<Self, ColumnError> {
        self.check_len(right.len())?;
        for dtype in [self.dtype, right.dtype] {
            if !matches!(dtype, DType::Bool | DType::Null) {
                return Err(TypeError::InvalidCast {
                    from: dtype,
                    to: DType::Bool,
                }
                .into());
            }
        }

        let values = self
            .values
            .iter()
            .zip(&right.values)
            .map(|(left, right)| match (left, right) {
                (Scalar::Bool(a), Scalar::Bool(b)) => Scalar::Bool(*a && *b),
                _ => Scalar::Null(NullKind::Null),
            })
            .collect();
        Self::new(DType::Bool, values)
    }

    /// Row mask for `value <op> needle`. Missing cells never match.
    pub fn compare_scalar(&self, needle: &Scalar, op: ComparisonOp) -> Result<Vec<bool>, ColumnError> {
        self.values
            .iter()
            .map(|value| {
                Ok(value
                    .compare(needle)?
                    .is_some_and(|ordering| op.holds(ordering)))
            })
            .collect()
    }

    /// Row mask for set membership. Missing cells are never members.
    pub fn is_in(&self, candidates: &[Scalar]) -> Result<Vec<bool>, ColumnError> {
        self.values
            .iter()
            .map(|value| {
                for candidate in candidates {
                    if value.compare(candidate)? == Some(Ordering::Equal) {
                        return Ok(true);
                    }
                }
                Ok(false)
            })
            .collect()
    }

    /// Whole days from `start` to `end` (`end - start`), negative when `end` precedes `start`.
    pub fn date_diff_days(end: &Self, start: &Self) -> Result<Self, ColumnError> {
        end.check_len(start.len())?;
        let values = end
            .values
            .iter()
            .zip(&start.values)
            .map(|(end, start)| {
                if end.is_missing() || start.is_missing() {
                    return Ok::<_, ColumnError>(Scalar::Null(NullKind::Null));
                }
                let days = (end.to_date()? - start.to_date()?).num_days();
                Ok(Scalar::Int64(days))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(DType::Int64, values)
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(left, right)| left.semantic_eq(right))
    }

    fn check_len(&self, other: usize) -> Result<(), ColumnError> {
        if self.len() != other {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: other,
            });
        }
        Ok(())
    }
}

/// Hashable view of a cell for grouping and join probes.
///
/// NaN and every null kind collapse to `Null`, so callers decide whether
/// missing keys participate. Integral floats hash as `Int64`, so `1` and
/// `1.0` land on the same key.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum HashKey<'a> {
    Bool(bool),
    Int64(i64),
    FloatBits(u64),
    Utf8(&'a str),
    Date(NaiveDate),
    Null,
}

impl<'a> HashKey<'a> {
    #[must_use]
    pub fn from_scalar(key: &'a Scalar) -> Self {
        match key {
            Scalar::Bool(v) => Self::Bool(*v),
            Scalar::Int64(v) => Self::Int64(*v),
            Scalar::Float64(v) if v.is_nan() => Self::Null,
            Scalar::Float64(v) if is_integral(*v) => Self::Int64(*v as i64),
            Scalar::Float64(v) => Self::FloatBits(v.to_bits()),
            Scalar::Utf8(v) => Self::Utf8(v.as_str()),
            Scalar::Date(v) => Self::Date(*v),
            Scalar::Null(_) => Self::Null,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

// i64::MAX is not representable, so the upper bound is exclusive at 2^63.
fn is_integral(value: f64) -> bool {
    value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64
}

fn arithmetic_cell(
    left: &Scalar,
    right: &Scalar,
    op: ArithmeticOp,
    integer_domain: bool,
) -> Result<Scalar, ColumnError> {
    if left.is_missing() || right.is_missing() {
        return Ok(Scalar::Null(NullKind::Null));
    }

    if integer_domain {
        let lhs = integer_operand(left)?;
        let rhs = integer_operand(right)?;
        if let Some(result) = integer_arithmetic(lhs, rhs, op) {
            return Ok(result);
        }
    }

    let lhs = left.to_f64()?;
    let rhs = right.to_f64()?;
    let divides = matches!(op, ArithmeticOp::Div | ArithmeticOp::FloorDiv | ArithmeticOp::Mod);
    if divides && rhs == 0.0 {
        return Ok(Scalar::Null(NullKind::Null));
    }

    let result = match op {
        ArithmeticOp::Add => lhs + rhs,
        ArithmeticOp::Sub => lhs - rhs,
        ArithmeticOp::Mul => lhs * rhs,
        ArithmeticOp::Div => lhs / rhs,
        ArithmeticOp::FloorDiv => (lhs / rhs).floor(),
        ArithmeticOp::Mod => lhs - rhs * (lhs / rhs).floor(),
        ArithmeticOp::Pow => lhs.powf(rhs),
    };
    Ok(Scalar::Float64(result))
}

fn integer_operand(value: &Scalar) -> Result<i64, TypeError> {
    match value {
        Scalar::Int64(v) => Ok(*v),
        Scalar::Bool(v) => Ok(i64::from(*v)),
        other => Err(TypeError::InvalidCast {
            from: other.dtype(),
            to: DType::Int64,
        }),
    }
}

/// Exact integer result, or `None` to fall back to float evaluation.
fn integer_arithmetic(lhs: i64, rhs: i64, op: ArithmeticOp) -> Option<Scalar> {
    let out = match op {
        ArithmeticOp::Add => lhs.checked_add(rhs)?,
        ArithmeticOp::Sub => lhs.checked_sub(rhs)?,
        ArithmeticOp::Mul => lhs.checked_mul(rhs)?,
        ArithmeticOp::Div => return None,
        ArithmeticOp::FloorDiv | ArithmeticOp::Mod if rhs == 0 => {
            return Some(Scalar::Null(NullKind::Null));
        }
        ArithmeticOp::FloorDiv => {
            let quotient = lhs.checked_div(rhs)?;
            if lhs % rhs != 0 && ((lhs < 0) != (rhs < 0)) {
                quotient - 1
            } else {
                quotient
            }
        }
        ArithmeticOp::Mod => {
            let remainder = lhs.checked_rem(rhs)?;
            if remainder != 0 && ((remainder < 0) != (rhs < 0)) {
                remainder + rhs
            } else {
                remainder
            }
        }
        ArithmeticOp::Pow => {
            let exponent = u32::try_from(rhs).ok()?;
            lhs.checked_pow(exponent)?
        }
    };
    Some(Scalar::Int64(out))
}
