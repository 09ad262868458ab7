//! Constant tensor payloads (graph initializers).

use serde::{Deserialize, Serialize};

use crate::types::{DataType, TensorShape};

/// Flat, row-major element storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorValues {
    Bool(Vec<bool>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
}

impl TensorValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::Bool,
            Self::I32(_) => DataType::I32,
            Self::I64(_) => DataType::I64,
            Self::F32(_) => DataType::F32,
        }
    }
}

/// A constant tensor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    pub dims: Vec<u64>,
    pub values: TensorValues,
}

impl TensorData {
    /// A rank-0 `i64` tensor.
    pub fn scalar_i64(value: i64) -> Self {
        Self {
            dims: vec![],
            values: TensorValues::I64(vec![value]),
        }
    }

    /// A rank-1 `i64` tensor.
    pub fn vector_i64(values: Vec<i64>) -> Self {
        Self {
            dims: vec![values.len() as u64],
            values: TensorValues::I64(values),
        }
    }

    pub fn dtype(&self) -> DataType {
        self.values.dtype()
    }

    pub fn shape(&self) -> TensorShape {
        TensorShape::fixed(&self.dims)
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// The single value of a rank-0 integer tensor, widened to `i64`.
    pub fn as_scalar_int(&self) -> Option<i64> {
        if !self.dims.is_empty() {
            return None;
        }
        match &self.values {
            TensorValues::I64(v) if v.len() == 1 => Some(v[0]),
            TensorValues::I32(v) if v.len() == 1 => Some(i64::from(v[0])),
            _ => None,
        }
    }
}
