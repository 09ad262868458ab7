//! Error types for the graph IR.

/// Errors that can occur when constructing, mutating, or validating a graph.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// A handle index is out of bounds or refers to a removed slot.
    #[error("{kind} handle {index} is out of bounds or removed (arena size: {size})")]
    BadHandle {
        kind: &'static str,
        index: usize,
        size: usize,
    },

    /// An edge is produced by more than one node.
    #[error("edge '{edge}' is already produced by node '{producer}'")]
    DuplicateProducer { edge: String, producer: String },

    /// A node's arity does not match its operator schema.
    #[error("node '{node}' ({op_type}): {reason}")]
    Schema {
        node: String,
        op_type: String,
        reason: String,
    },

    /// An input slot index past the end of a node's input list.
    #[error("node '{node}' has no input slot {slot}")]
    BadSlot { node: String, slot: usize },

    /// Removing a node whose outputs are still consumed.
    #[error("cannot remove node '{node}': output '{edge}' is still in use")]
    EdgeInUse { node: String, edge: String },

    /// Two edges share a name.
    #[error("duplicate edge name '{0}'")]
    DuplicateName(String),

    /// Graph inputs and constants must not have producers.
    #[error("graph input or constant '{0}' is produced by a node")]
    ProducedGraphInput(String),

    /// The node/edge structure is not acyclic.
    #[error("graph contains a cycle ({visited} of {total} nodes ordered)")]
    Cycle { visited: usize, total: usize },
}
