//! Error types for graph passes.
//!
//! Conditions under which a pass simply does not apply are not errors;
//! passes report them by returning `Ok(false)`. These variants mean the
//! input graph is malformed or a pass broke one of its own invariants.

use padelim_ir::IrError;

/// Fatal pass failures.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    /// A graph mutation was rejected.
    #[error(transparent)]
    Ir(#[from] IrError),

    /// A matrix multiply inside the region has neither operand in it.
    #[error("MatMul node '{node}' was reached with no operand inside the padded region")]
    MatMulWithoutMemberInput { node: String },

    /// A node lacks an attribute the pass depends on.
    #[error("node '{node}' is missing required attribute '{attribute}'")]
    MissingAttribute {
        node: String,
        attribute: &'static str,
    },

    /// An attribute is present but unusable.
    #[error("node '{node}' has invalid attribute '{attribute}': {reason}")]
    InvalidAttribute {
        node: String,
        attribute: &'static str,
        reason: String,
    },

    /// A region entry node is not a binary operator.
    #[error("region entry node '{node}' has {inputs} inputs, expected 2")]
    NonBinaryCandidate { node: String, inputs: usize },

    /// An edge the rewrite depends on has no usable shape.
    #[error("edge '{edge}' has no usable shape: {reason}")]
    InvalidMemberShape { edge: String, reason: String },
}
