//! Dataflow graph IR for padelim.
//!
//! An arena-based operator graph: nodes and tensor edges are addressed by
//! typed handles so graph passes can splice operators in place without
//! invalidating the handles they hold.

pub mod arena;
mod attr;
mod display;
mod error;
pub mod graph;
mod op;
mod tensor;
mod types;

pub use arena::{Arena, Handle};
pub use attr::{Attribute, Attributes};
pub use display::{dump_graph, format_edge};
pub use error::IrError;
pub use graph::{Edge, EdgeId, Graph, Node, NodeId, NodeSpec};
pub use op::{ATEN_DOMAIN, MS_DOMAIN, ONNX_DOMAIN, OpKind, Schema};
pub use tensor::{TensorData, TensorValues};
pub use types::{DataType, Dimension, TensorShape};

impl Graph {
    /// Parse a graph from its JSON form and check its structural invariants.
    pub fn from_json(source: &str) -> Result<Self, LoadError> {
        let graph: Graph = serde_json::from_str(source)?;
        graph.validate()?;
        Ok(graph)
    }

    /// Serialize the graph to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Errors from [`Graph::from_json`].
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("malformed graph JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid graph: {0}")]
    Invalid(#[from] IrError),
}
