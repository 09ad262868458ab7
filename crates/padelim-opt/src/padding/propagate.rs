//! Breadth-first growth of the padded region from the anchor.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use log::debug;
use padelim_ir::{EdgeId, Graph, NodeId};

use super::anchor::Anchor;
use super::classify::{HookSite, Mode, Verdict, classify};
use crate::error::PassError;

/// The padded region: every edge whose leading dims are `[B, S]` padding
/// and the nodes where it starts, ends, or must be re-wrapped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Region {
    pub anchor: Option<NodeId>,
    pub members: BTreeSet<EdgeId>,
    /// Nodes whose outside operands are filtered on entry.
    pub candidate_inputs: BTreeSet<NodeId>,
    /// Nodes where member values are restored before use.
    pub candidate_outputs: BTreeSet<NodeId>,
    /// Nodes whose output 0 is restored and re-filtered.
    pub pass_through: BTreeSet<NodeId>,
    pub hooks: BTreeMap<NodeId, HookSite>,
}

impl Region {
    pub fn is_member(&self, edge: EdgeId) -> bool {
        self.members.contains(&edge)
    }

    /// Inspect-activation hooks and the rank of their output 0.
    pub fn inspect_ranks(&self) -> impl Iterator<Item = (NodeId, usize)> + '_ {
        self.hooks
            .iter()
            .filter_map(|(&node, site)| site.inspect_rank.map(|rank| (node, rank)))
    }
}

/// Grow the region from `anchor` without touching the graph.
///
/// Each node is classified once, the first time it is dequeued. Fatal
/// classification errors abort before any mutation has happened.
pub fn propagate(graph: &Graph, anchor: &Anchor, mode: Mode) -> Result<Region, PassError> {
    let mut region = Region {
        anchor: Some(anchor.node),
        members: graph.node(anchor.node).outputs.iter().copied().collect(),
        ..Region::default()
    };

    let mut visited = HashSet::from([anchor.node]);
    let mut queue: VecDeque<NodeId> = graph.downstream_nodes(anchor.node).into();

    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        match classify(graph, current, &region.members, mode)? {
            Verdict::Propagate(p) => {
                region.members.extend(p.members);
                if p.entry {
                    region.candidate_inputs.insert(current);
                }
                if p.pass_through {
                    region.pass_through.insert(current);
                }
                if let Some(site) = p.hook {
                    region.hooks.insert(current, site);
                }
                queue.extend(
                    graph
                        .downstream_nodes(current)
                        .into_iter()
                        .filter(|next| !visited.contains(next)),
                );
            }
            Verdict::Boundary(reason) => {
                let node = graph.node(current);
                debug!(
                    "padding elimination: region ends at '{}' ({}): {reason}",
                    node.name,
                    node.op.op_type()
                );
                region.candidate_outputs.insert(current);
            }
        }
    }

    debug!(
        "padding elimination: region has {} edges, {} entries, {} exits",
        region.members.len(),
        region.candidate_inputs.len(),
        region.candidate_outputs.len()
    );
    Ok(region)
}
