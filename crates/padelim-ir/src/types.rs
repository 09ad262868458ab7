//! Element types and tensor shapes.

use serde::{Deserialize, Serialize};

/// Element type of a tensor edge.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    I32,
    I64,
    F16,
    BF16,
    F32,
    F64,
}

impl DataType {
    /// The ONNX `TensorProto.DataType` code of this element type.
    pub fn onnx_code(self) -> i64 {
        match self {
            Self::F32 => 1,
            Self::I32 => 6,
            Self::I64 => 7,
            Self::Bool => 9,
            Self::F16 => 10,
            Self::F64 => 11,
            Self::BF16 => 16,
        }
    }

    /// Returns `true` for signed integer element types.
    pub fn is_integer(self) -> bool {
        matches!(self, Self::I32 | Self::I64)
    }
}

/// A single tensor dimension.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// Statically known extent.
    Fixed(u64),
    /// Named, runtime-determined extent.
    Symbolic(String),
    /// Nothing is known about this extent.
    Unknown,
}

impl Dimension {
    /// Returns the static extent, if any.
    pub fn fixed(&self) -> Option<u64> {
        match self {
            Self::Fixed(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<u64> for Dimension {
    fn from(n: u64) -> Self {
        Self::Fixed(n)
    }
}

impl From<&str> for Dimension {
    fn from(name: &str) -> Self {
        Self::Symbolic(name.into())
    }
}

/// Ordered list of dimensions.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TensorShape {
    pub dims: Vec<Dimension>,
}

impl TensorShape {
    pub fn new(dims: impl IntoIterator<Item = Dimension>) -> Self {
        Self {
            dims: dims.into_iter().collect(),
        }
    }

    /// Shape with only static extents.
    pub fn fixed(dims: &[u64]) -> Self {
        Self::new(dims.iter().map(|&d| Dimension::Fixed(d)))
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns `true` if every dimension is [`Dimension::Fixed`].
    pub fn is_fully_static(&self) -> bool {
        self.dims.iter().all(|d| matches!(d, Dimension::Fixed(_)))
    }

    /// Static extents of `dims[from..]`, or `None` if any of them is not fixed.
    pub fn trailing_static(&self, from: usize) -> Option<Vec<u64>> {
        self.dims.iter().skip(from).map(Dimension::fixed).collect()
    }

    /// Total element count when fully static and representable.
    pub fn num_elements(&self) -> Option<u64> {
        self.dims
            .iter()
            .try_fold(1u64, |acc, d| acc.checked_mul(d.fixed()?))
    }
}
