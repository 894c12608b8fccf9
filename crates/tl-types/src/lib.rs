#![forbid(unsafe_code)]

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Null,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float64,
    Utf8,
    /// Low-cardinality string. Physically identical to `Utf8`; the logical
    /// schema records the distinction so stores can restore it on read.
    Categorical,
    Date,
    Timestamp,
    List(Box<DType>),
}

impl DType {
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    #[must_use]
    pub fn is_string(&self) -> bool {
        matches!(self, Self::Utf8 | Self::Categorical)
    }

    /// Position in the numeric widening lattice, or `None` for
    /// non-numeric dtypes.
    fn numeric_rank(&self) -> Option<u8> {
        match self {
            Self::Bool => Some(0),
            Self::Int8 => Some(1),
            Self::Int16 => Some(2),
            Self::Int32 => Some(3),
            Self::Int64 => Some(4),
            Self::Float64 => Some(5),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Null,
    NaN,
    NaT,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(NullKind),
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Categorical(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    List(Vec<Scalar>),
}

impl Scalar {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Null(_) => DType::Null,
            Self::Bool(_) => DType::Bool,
            Self::Int8(_) => DType::Int8,
            Self::Int16(_) => DType::Int16,
            Self::Int32(_) => DType::Int32,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
            Self::Utf8(_) => DType::Utf8,
            Self::Categorical(_) => DType::Categorical,
            Self::Date(_) => DType::Date,
            Self::Timestamp(_) => DType::Timestamp,
            Self::List(items) => DType::List(Box::new(list_elem_dtype(items))),
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null(_) => true,
            Self::Float64(v) => v.is_nan(),
            _ => false,
        }
    }

    #[must_use]
    pub fn missing_for_dtype(dtype: &DType) -> Self {
        match dtype {
            DType::Float64 => Self::Null(NullKind::NaN),
            DType::Date | DType::Timestamp => Self::Null(NullKind::NaT),
            _ => Self::Null(NullKind::Null),
        }
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float64(a), Self::Float64(b)) => (a.is_nan() && b.is_nan()) || (a == b),
            (Self::Null(NullKind::NaN), Self::Float64(v))
            | (Self::Float64(v), Self::Null(NullKind::NaN)) => v.is_nan(),
            (Self::Null(_), Self::Null(_)) => true,
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.semantic_eq(y))
            }
            _ => self == other,
        }
    }

    /// Canonical hashable form used for key-tuple comparison (merge
    /// anti-joins, duplicate dropping). List cells have no key form.
    pub fn to_key(&self) -> Result<KeyValue, TypeError> {
        match self {
            Self::Null(_) => Ok(KeyValue::Missing),
            Self::Float64(v) if v.is_nan() => Ok(KeyValue::Missing),
            Self::Bool(v) => Ok(KeyValue::Bool(*v)),
            Self::Int8(v) => Ok(KeyValue::Int(i64::from(*v))),
            Self::Int16(v) => Ok(KeyValue::Int(i64::from(*v))),
            Self::Int32(v) => Ok(KeyValue::Int(i64::from(*v))),
            Self::Int64(v) => Ok(KeyValue::Int(*v)),
            Self::Float64(v) => Ok(KeyValue::Float(v.to_bits())),
            Self::Utf8(v) | Self::Categorical(v) => Ok(KeyValue::Utf8(v.clone())),
            Self::Date(v) => Ok(KeyValue::Days(date_to_epoch_days(*v))),
            Self::Timestamp(v) => Ok(KeyValue::Micros(timestamp_to_micros(*v))),
            Self::List(_) => Err(TypeError::UnkeyableDtype {
                dtype: self.dtype(),
            }),
        }
    }
}

fn list_elem_dtype(items: &[Scalar]) -> DType {
    let mut current = DType::Null;
    for item in items {
        match common_dtype(&current, &item.dtype()) {
            Ok(next) => current = next,
            Err(_) => return items[0].dtype(),
        }
    }
    current
}

/// Hashable key form of a scalar. Temporal values collapse to their
/// epoch offsets and `Utf8`/`Categorical` share one representation, so
/// keys compare the way the merge predicate means them to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Missing,
    Bool(bool),
    Int(i64),
    Float(u64),
    Utf8(String),
    Days(i32),
    Micros(i64),
}

#[must_use]
pub fn date_to_epoch_days(date: NaiveDate) -> i32 {
    date.signed_duration_since(NaiveDate::default()).num_days() as i32
}

#[must_use]
pub fn epoch_days_to_date(days: i32) -> NaiveDate {
    NaiveDate::default() + chrono::Duration::days(i64::from(days))
}

#[must_use]
pub fn timestamp_to_micros(ts: NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_micros()
}

#[must_use]
pub fn micros_to_timestamp(micros: i64) -> Option<NaiveDateTime> {
    chrono::DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("dtype coercion from {left:?} to {right:?} has no compatible common type")]
    IncompatibleDtypes { left: DType, right: DType },
    #[error("cannot cast scalar of dtype {from:?} to {to:?}")]
    InvalidCast { from: DType, to: DType },
    #[error("cannot cast float {value} to an integer without loss")]
    LossyFloatToInt { value: f64 },
    #[error("value {value} does not fit in {to:?}")]
    OutOfRange { value: i64, to: DType },
    #[error("string {value:?} is not a valid number")]
    NonNumericString { value: String },
    #[error("string {value:?} is not a valid {to:?}")]
    UnparsableTemporal { value: String, to: DType },
    #[error("dtype {dtype:?} cannot be used as a key column")]
    UnkeyableDtype { dtype: DType },
}

pub fn common_dtype(left: &DType, right: &DType) -> Result<DType, TypeError> {
    if left == right {
        return Ok(left.clone());
    }

    match (left, right) {
        (DType::Null, other) | (other, DType::Null) => Ok(other.clone()),
        (DType::Categorical, DType::Utf8) | (DType::Utf8, DType::Categorical) => Ok(DType::Utf8),
        (DType::List(a), DType::List(b)) => Ok(DType::List(Box::new(common_dtype(a, b)?))),
        _ => match (left.numeric_rank(), right.numeric_rank()) {
            (Some(a), Some(b)) => Ok(if a >= b { left.clone() } else { right.clone() }),
            _ => Err(TypeError::IncompatibleDtypes {
                left: left.clone(),
                right: right.clone(),
            }),
        },
    }
}

pub fn infer_dtype(values: &[Scalar]) -> Result<DType, TypeError> {
    let mut current = DType::Null;
    for value in values {
        current = common_dtype(&current, &value.dtype())?;
    }
    Ok(current)
}

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

fn parse_timestamp(value: &str) -> Result<NaiveDateTime, TypeError> {
    let trimmed = value.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(ts);
        }
    }
    Err(TypeError::UnparsableTemporal {
        value: value.to_owned(),
        to: DType::Timestamp,
    })
}

fn parse_date(value: &str) -> Result<NaiveDate, TypeError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| TypeError::UnparsableTemporal {
        value: value.to_owned(),
        to: DType::Date,
    })
}

fn int_value(value: &Scalar) -> Option<i64> {
    match value {
        Scalar::Bool(v) => Some(i64::from(*v)),
        Scalar::Int8(v) => Some(i64::from(*v)),
        Scalar::Int16(v) => Some(i64::from(*v)),
        Scalar::Int32(v) => Some(i64::from(*v)),
        Scalar::Int64(v) => Some(*v),
        _ => None,
    }
}

fn int_scalar(target: &DType, value: i64) -> Result<Scalar, TypeError> {
    let out_of_range = |to: &DType| TypeError::OutOfRange {
        value,
        to: to.clone(),
    };
    match target {
        DType::Int8 => i8::try_from(value)
            .map(Scalar::Int8)
            .map_err(|_| out_of_range(target)),
        DType::Int16 => i16::try_from(value)
            .map(Scalar::Int16)
            .map_err(|_| out_of_range(target)),
        DType::Int32 => i32::try_from(value)
            .map(Scalar::Int32)
            .map_err(|_| out_of_range(target)),
        DType::Int64 => Ok(Scalar::Int64(value)),
        _ => Err(TypeError::InvalidCast {
            from: DType::Int64,
            to: target.clone(),
        }),
    }
}

pub fn cast_scalar(value: &Scalar, target: &DType) -> Result<Scalar, TypeError> {
    let from = value.dtype();
    if matches!(value, Scalar::Null(_)) {
        return Ok(Scalar::missing_for_dtype(target));
    }
    if &from == target {
        return Ok(value.clone());
    }

    let invalid = || TypeError::InvalidCast {
        from: from.clone(),
        to: target.clone(),
    };

    match target {
        DType::Null => Ok(Scalar::Null(NullKind::Null)),
        DType::Bool => match int_value(value) {
            Some(0) => Ok(Scalar::Bool(false)),
            Some(1) => Ok(Scalar::Bool(true)),
            Some(v) => Err(TypeError::OutOfRange {
                value: v,
                to: DType::Bool,
            }),
            None => Err(invalid()),
        },
        DType::Int8 | DType::Int16 | DType::Int32 | DType::Int64 => match value {
            Scalar::Float64(v) => {
                if !v.is_finite() || *v != v.trunc() {
                    return Err(TypeError::LossyFloatToInt { value: *v });
                }
                if *v < i64::MIN as f64 || *v > i64::MAX as f64 {
                    return Err(TypeError::LossyFloatToInt { value: *v });
                }
                int_scalar(target, *v as i64)
            }
            // The upstream API serializes some numeric ids as strings.
            Scalar::Utf8(v) | Scalar::Categorical(v) => {
                let parsed = v
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| TypeError::NonNumericString { value: v.clone() })?;
                int_scalar(target, parsed)
            }
            other => match int_value(other) {
                Some(v) => int_scalar(target, v),
                None => Err(invalid()),
            },
        },
        DType::Float64 => match value {
            Scalar::Utf8(v) | Scalar::Categorical(v) => v
                .trim()
                .parse::<f64>()
                .map(Scalar::Float64)
                .map_err(|_| TypeError::NonNumericString { value: v.clone() }),
            other => match int_value(other) {
                Some(v) => Ok(Scalar::Float64(v as f64)),
                None => Err(invalid()),
            },
        },
        DType::Utf8 => match value {
            Scalar::Categorical(v) => Ok(Scalar::Utf8(v.clone())),
            _ => Err(invalid()),
        },
        DType::Categorical => match value {
            Scalar::Utf8(v) => Ok(Scalar::Categorical(v.clone())),
            _ => Err(invalid()),
        },
        DType::Date => match value {
            Scalar::Utf8(v) | Scalar::Categorical(v) => parse_date(v).map(Scalar::Date),
            Scalar::Timestamp(v) => Ok(Scalar::Date(v.date())),
            _ => Err(invalid()),
        },
        DType::Timestamp => match value {
            Scalar::Utf8(v) | Scalar::Categorical(v) => parse_timestamp(v).map(Scalar::Timestamp),
            Scalar::Date(v) => Ok(Scalar::Timestamp(v.and_time(chrono::NaiveTime::default()))),
            _ => Err(invalid()),
        },
        DType::List(elem) => match value {
            Scalar::List(items) => items
                .iter()
                .map(|item| cast_scalar(item, elem))
                .collect::<Result<Vec<_>, _>>()
                .map(Scalar::List),
            _ => Err(invalid()),
        },
    }
}
