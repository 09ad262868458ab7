//! Graph validation pass.
//!
//! Checks structural invariants of the graph and logs warnings for
//! problems found. This pass never modifies the graph.

use padelim_ir::{Graph, OpKind};

use crate::GraphPass;
use crate::error::PassError;

/// Validates graph structural invariants. Returns `false` (never modifies the graph).
#[derive(Debug)]
pub struct GraphValidation;

impl GraphPass for GraphValidation {
    fn name(&self) -> &str {
        "graph-validation"
    }

    fn run(&self, graph: &mut Graph) -> Result<bool, PassError> {
        validate_graph(graph);
        Ok(false)
    }
}

/// Number of problems found; each one is logged at warn level.
pub fn validate_graph(graph: &Graph) -> usize {
    let mut problems = 0;

    if let Err(err) = graph.validate() {
        log::warn!("graph failed structural validation: {err}");
        // Later checks assume live handles.
        return 1;
    }

    // Every consumed value must come from somewhere.
    for (_, node) in graph.nodes.iter() {
        for (slot, edge) in node.inputs.iter().enumerate() {
            let Some(edge) = *edge else { continue };
            if graph.producer(edge).is_none() && !graph.is_graph_input(edge) && !graph.is_constant(edge) {
                log::warn!(
                    "node '{}' input {} reads '{}', which has no producer",
                    node.name,
                    slot,
                    graph.edge(edge).name
                );
                problems += 1;
            }
        }
    }

    for &out in &graph.outputs {
        if graph.producer(out).is_none() && !graph.is_graph_input(out) && !graph.is_constant(out) {
            log::warn!("graph output '{}' has no producer", graph.edge(out).name);
            problems += 1;
        }
    }

    // Filters and restores must share an index that is a rank-1 integer tensor.
    for (_, node) in graph.nodes.iter() {
        if !matches!(node.op, OpKind::FlattenAndUnpad | OpKind::PadAndUnflatten) {
            continue;
        }
        let Some(index) = node.input(1) else { continue };
        let edge = graph.edge(index);
        let integer = edge.dtype.is_none_or(|t| t.is_integer());
        let rank_one = edge.rank().is_none_or(|r| r == 1);
        if !integer || !rank_one {
            log::warn!(
                "node '{}' ({}) uses '{}' as index, expected a rank-1 integer tensor",
                node.name,
                node.op.op_type(),
                edge.name
            );
            problems += 1;
        }
    }

    problems
}
