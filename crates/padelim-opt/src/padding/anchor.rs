//! Locating the sparse embedding that seeds the padded region.

use log::debug;
use padelim_ir::{DataType, EdgeId, Graph, NodeId, OpKind, TensorShape};

use crate::config::PaddingEliminationConfig;

/// Input slot of the token ids on an embedding node.
pub const TOKENS_SLOT: usize = 1;
/// Input slot of the padding value on an embedding node.
pub const PADDING_SLOT: usize = 2;

/// The embedding node whose padded token input is eliminated.
#[derive(Clone, Debug, PartialEq)]
pub struct Anchor {
    pub node: NodeId,
    /// Graph input holding the `[B, S, ...]` token ids.
    pub tokens: EdgeId,
    /// Rank-0 constant holding the padding token id.
    pub padding: EdgeId,
    pub padding_value: i64,
    /// Shape of `tokens` at the time the anchor was found.
    pub tokens_shape: TensorShape,
}

impl Anchor {
    /// Static extents of the token dims after `[B, S]`.
    pub fn trailing_dims(&self) -> Option<Vec<u64>> {
        self.tokens_shape.trailing_static(2)
    }
}

/// Finds the first embedding (in topological order) eligible as anchor.
///
/// Returns `None` when no node qualifies, or when the chosen anchor's
/// token trailing dims are not all static.
pub fn find_anchor(graph: &Graph, config: &PaddingEliminationConfig) -> Option<Anchor> {
    let anchor = graph
        .topological_order()
        .into_iter()
        .find_map(|id| check_candidate(graph, id, config))?;

    if anchor.trailing_dims().is_none() {
        debug!(
            "padding elimination: tokens '{}' have non-static trailing dims, skipping",
            graph.edge(anchor.tokens).name
        );
        return None;
    }
    Some(anchor)
}

fn check_candidate(graph: &Graph, id: NodeId, config: &PaddingEliminationConfig) -> Option<Anchor> {
    let node = graph.node(id);
    if node.op != OpKind::Embedding || !config.accepts_target(node.target.as_deref()) {
        return None;
    }
    if node.inputs.len() <= PADDING_SLOT {
        return None;
    }

    let padding = node.input(PADDING_SLOT)?;
    let data = graph.constant(padding)?;
    if !matches!(data.dtype(), DataType::I32 | DataType::I64) {
        return None;
    }
    let padding_value = data.as_scalar_int()?;
    if padding_value < 0 {
        debug!(
            "padding elimination: embedding '{}' has negative padding value {padding_value}",
            node.name
        );
        return None;
    }

    let tokens = node.input(TOKENS_SLOT)?;
    let edge = graph.edge(tokens);
    if !graph.is_graph_input(tokens) {
        return None;
    }
    let tokens_shape = edge.shape.clone().filter(|s| s.rank() >= 2)?;
    if !config.sparse_embedding_inputs.contains(&edge.name) {
        debug!(
            "padding elimination: embedding '{}' input '{}' is not a sparse input",
            node.name, edge.name
        );
        return None;
    }

    Some(Anchor {
        node: id,
        tokens,
        padding,
        padding_value,
        tokens_shape,
    })
}
