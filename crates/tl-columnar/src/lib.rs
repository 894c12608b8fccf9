#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tl_types::{DType, Scalar, TypeError, cast_scalar, infer_dtype};

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

    #[must_use]
    pub fn count_valid(&self) -> usize {
        self.bits.iter().filter(|bit| **bit).count()
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("row position {position} is out of bounds for column of length {len}")]
    PositionOutOfBounds { position: usize, len: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
    validity: ValidityMask,
}

impl Column {
    /// Construct a column, coercing values to the target dtype. Values that
    /// already match the dtype are only remapped to its missing marker.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let needs_coercion = values.iter().any(|v| {
            let d = v.dtype();
            d != dtype && d != DType::Null
        });

        let coerced = if needs_coercion {
            values
                .iter()
                .map(|value| cast_scalar(value, &dtype))
                .collect::<Result<Vec<_>, _>>()
                .map_err(ColumnError::from)?
        } else {
            values
                .into_iter()
                .map(|value| match value {
                    Scalar::Null(_) => Scalar::missing_for_dtype(&dtype),
                    other => other,
                })
                .collect()
        };

        let validity = ValidityMask::from_values(&coerced);

        Ok(Self {
            dtype,
            values: coerced,
            validity,
        })
    }

    pub fn from_values(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values).map_err(ColumnError::from)?;
        Self::new(dtype, values)
    }

    #[must_use]
    pub fn dtype(&self) -> &DType {
        &self.dtype
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

    pub fn cast_to(&self, target: &DType) -> Result<Self, ColumnError> {
        if &self.dtype == target {
            return Ok(self.clone());
        }
        let values = self
            .values
            .iter()
            .map(|value| cast_scalar(value, target))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ColumnError::from)?;
        Self::new(target.clone(), values)
    }

    /// Gather rows by position. Every position must be in bounds; row
    /// duplication is allowed (explode relies on it).
    pub fn take(&self, positions: &[usize]) -> Result<Self, ColumnError> {
        let values = positions
            .iter()
            .map(|position| {
                self.values
                    .get(*position)
                    .cloned()
                    .ok_or(ColumnError::PositionOutOfBounds {
                        position: *position,
                        len: self.values.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(self.dtype.clone(), values)
    }

    /// Replace missing cells with `fill`, widening the dtype if needed.
    pub fn fill_missing(&self, fill: &Scalar) -> Result<Self, ColumnError> {
        let dtype = tl_types::common_dtype(&self.dtype, &fill.dtype()).map_err(ColumnError::from)?;
        let values = self
            .values
            .iter()
            .map(|value| {
                if value.is_missing() {
                    fill.clone()
                } else {
                    value.clone()
                }
            })
            .collect();
        Self::new(dtype, values)
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
}
