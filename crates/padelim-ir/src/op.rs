//! Operator kinds.
//!
//! Each variant carries only the attributes that graph passes inspect.
//! Everything else (hook metadata, vendor flags) lives in the node's
//! attribute map.

use serde::{Deserialize, Serialize};

use crate::types::DataType;

/// Default ONNX operator domain.
pub const ONNX_DOMAIN: &str = "";
/// Microsoft contrib operator domain.
pub const MS_DOMAIN: &str = "com.microsoft";
/// PyTorch ATen fallback domain.
pub const ATEN_DOMAIN: &str = "org.pytorch.aten";

/// The operation a graph node performs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum OpKind {
    /// Sparse embedding lookup: `(table, tokens, padding_value, ...)`.
    Embedding,
    /// Element-wise addition.
    Add,
    /// Element-wise subtraction.
    Sub,
    /// Element-wise multiplication.
    Mul,
    /// Fused bias add + GELU.
    BiasGelu,
    /// Layer normalization over `axis..`.
    LayerNormalization { axis: i64 },
    /// RMS-style layer normalization over `axis..`.
    SimplifiedLayerNormalization { axis: i64 },
    /// Dropout producing `(value, mask)`.
    Dropout,
    /// Element type conversion.
    Cast { to: DataType },
    /// GELU activation.
    Gelu,
    /// Matrix multiplication.
    MatMul,
    /// Matrix multiplication with a 4-bit quantized right operand.
    MatMulBnb4,
    /// Host-language callback; `func_name` selects the function.
    PythonOp { func_name: Option<String> },
    /// Mean over `axes`.
    ReduceMean {
        axes: Vec<i64>,
        #[serde(default = "default_keepdims")]
        keepdims: bool,
    },
    /// Max over `axes`.
    ReduceMax {
        axes: Vec<i64>,
        #[serde(default = "default_keepdims")]
        keepdims: bool,
    },
    /// Softmax along `axis`.
    Softmax { axis: i64 },
    /// Reshape to the shape given by input 1.
    Reshape,
    /// Shape of input 0 as an `i64` vector.
    Shape,
    /// Gather along `axis`.
    Gather { axis: i64 },
    /// Concatenation along `axis`.
    Concat { axis: i64 },
    /// Broadcast input 0 to the shape given by input 1.
    Expand,
    /// Element-wise equality.
    Equal,
    /// Boolean negation.
    Not,
    /// Indices of non-zero elements, `[rank, count]`.
    NonZero,
    /// Remove size-1 `axes`.
    Squeeze { axes: Vec<i64> },
    /// `[B, S, ...]` → `[valid, ...]` via the valid-index tensor.
    FlattenAndUnpad,
    /// `[valid, ...]` → `[B, S, ...]`, zero-filling removed rows.
    PadAndUnflatten,
    /// Any operator the passes do not model.
    Custom { op_type: String, domain: String },
}

fn default_keepdims() -> bool {
    true
}

/// Input/output arity accepted by an operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schema {
    pub min_inputs: usize,
    pub max_inputs: usize,
    pub min_outputs: usize,
    pub max_outputs: usize,
}

impl Schema {
    const fn new(inputs: (usize, usize), outputs: (usize, usize)) -> Self {
        Self {
            min_inputs: inputs.0,
            max_inputs: inputs.1,
            min_outputs: outputs.0,
            max_outputs: outputs.1,
        }
    }
}

const ANY: usize = usize::MAX;

impl OpKind {
    /// Returns the ONNX operator type string.
    pub fn op_type(&self) -> &str {
        match self {
            Self::Embedding => "ATen",
            Self::Add => "Add",
            Self::Sub => "Sub",
            Self::Mul => "Mul",
            Self::BiasGelu => "BiasGelu",
            Self::LayerNormalization { .. } => "LayerNormalization",
            Self::SimplifiedLayerNormalization { .. } => "SimplifiedLayerNormalization",
            Self::Dropout => "Dropout",
            Self::Cast { .. } => "Cast",
            Self::Gelu => "Gelu",
            Self::MatMul => "MatMul",
            Self::MatMulBnb4 => "MatMulBnb4",
            Self::PythonOp { .. } => "PythonOp",
            Self::ReduceMean { .. } => "ReduceMean",
            Self::ReduceMax { .. } => "ReduceMax",
            Self::Softmax { .. } => "Softmax",
            Self::Reshape => "Reshape",
            Self::Shape => "Shape",
            Self::Gather { .. } => "Gather",
            Self::Concat { .. } => "Concat",
            Self::Expand => "Expand",
            Self::Equal => "Equal",
            Self::Not => "Not",
            Self::NonZero => "NonZero",
            Self::Squeeze { .. } => "Squeeze",
            Self::FlattenAndUnpad => "FlattenAndUnpad",
            Self::PadAndUnflatten => "PadAndUnflatten",
            Self::Custom { op_type, .. } => op_type,
        }
    }

    /// Returns the operator domain.
    pub fn domain(&self) -> &str {
        match self {
            Self::Embedding => ATEN_DOMAIN,
            Self::BiasGelu
            | Self::Gelu
            | Self::MatMulBnb4
            | Self::PythonOp { .. }
            | Self::FlattenAndUnpad
            | Self::PadAndUnflatten => MS_DOMAIN,
            Self::Custom { domain, .. } => domain,
            _ => ONNX_DOMAIN,
        }
    }

    /// Returns the accepted input/output arity.
    pub fn schema(&self) -> Schema {
        match self {
            Self::Embedding => Schema::new((2, 5), (1, 1)),
            Self::Add
            | Self::Sub
            | Self::Mul
            | Self::BiasGelu
            | Self::MatMul
            | Self::MatMulBnb4
            | Self::Reshape
            | Self::Gather { .. }
            | Self::Expand
            | Self::Equal => Schema::new((2, 2), (1, 1)),
            Self::LayerNormalization { .. } => Schema::new((2, 3), (1, 3)),
            Self::SimplifiedLayerNormalization { .. } => Schema::new((2, 2), (1, 2)),
            Self::Dropout => Schema::new((1, 3), (1, 2)),
            Self::Cast { .. }
            | Self::Gelu
            | Self::Softmax { .. }
            | Self::Shape
            | Self::Not
            | Self::NonZero => Schema::new((1, 1), (1, 1)),
            Self::ReduceMean { .. } | Self::ReduceMax { .. } | Self::Squeeze { .. } => {
                Schema::new((1, 2), (1, 1))
            }
            Self::Concat { .. } => Schema::new((1, ANY), (1, 1)),
            Self::FlattenAndUnpad => Schema::new((2, 2), (1, 2)),
            Self::PadAndUnflatten => Schema::new((3, 3), (1, 1)),
            Self::PythonOp { .. } => Schema::new((1, ANY), (1, ANY)),
            Self::Custom { .. } => Schema::new((0, ANY), (0, ANY)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_type_names() {
        assert_eq!(OpKind::Embedding.op_type(), "ATen");
        assert_eq!(OpKind::LayerNormalization { axis: -1 }.op_type(), "LayerNormalization");
        assert_eq!(
            OpKind::Custom {
                op_type: "MyOp".into(),
                domain: "my.domain".into()
            }
            .op_type(),
            "MyOp"
        );
    }

    #[test]
    fn domains() {
        assert_eq!(OpKind::Embedding.domain(), ATEN_DOMAIN);
        assert_eq!(OpKind::FlattenAndUnpad.domain(), MS_DOMAIN);
        assert_eq!(OpKind::Add.domain(), ONNX_DOMAIN);
    }

    #[test]
    fn schema_arity() {
        let schema = OpKind::PadAndUnflatten.schema();
        assert_eq!((schema.min_inputs, schema.max_inputs), (3, 3));
        let schema = OpKind::Dropout.schema();
        assert_eq!((schema.min_outputs, schema.max_outputs), (1, 2));
    }

    #[test]
    fn json_form_is_tagged() {
        let op: OpKind = serde_json::from_str(r#"{"op":"ReduceMean","axes":[-1]}"#).unwrap();
        assert_eq!(
            op,
            OpKind::ReduceMean {
                axes: vec![-1],
                keepdims: true
            }
        );
    }
}
