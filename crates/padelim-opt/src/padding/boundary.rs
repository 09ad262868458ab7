//! Filters and restores at the edges of the padded region.
//!
//! A filter (`FlattenAndUnpad`) drops padding rows from a `[B, S, ...]`
//! value; a restore (`PadAndUnflatten`) scatters `[valid, ...]` rows back
//! into a zero-filled `[B, S, ...]` tensor. Every rewrite here reads the
//! pre-rewrite shapes of region members.

use padelim_ir::{DataType, Dimension, EdgeId, Graph, NodeId, NodeSpec, OpKind, TensorData, TensorShape};

use super::anchor::{Anchor, TOKENS_SLOT};
use super::propagate::Region;
use super::shapes::{broadcast, unpadded};
use super::valid_index::ValidIndex;
use crate::error::PassError;

/// Diagnostic counts of inserted boundary nodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundaryCounters {
    pub handled_inputs: usize,
    pub handled_outputs: usize,
    pub expanded_inputs: usize,
}

/// Inserts boundary nodes for one region.
pub struct BoundaryRewriter<'a> {
    graph: &'a mut Graph,
    index: EdgeId,
    first_two_dims: EdgeId,
    valid: Dimension,
    counters: BoundaryCounters,
}

impl<'a> BoundaryRewriter<'a> {
    pub fn new(graph: &'a mut Graph, index: &ValidIndex) -> Result<Self, PassError> {
        let first_two_dims = index.first_two_dims.ok_or_else(|| PassError::InvalidMemberShape {
            edge: graph.edge(index.index).name.clone(),
            reason: "leading dims of the tokens were not materialized".into(),
        })?;
        Ok(Self {
            graph,
            index: index.index,
            first_two_dims,
            valid: index.valid_dim(),
            counters: BoundaryCounters::default(),
        })
    }

    pub fn counters(&self) -> BoundaryCounters {
        self.counters
    }

    /// Filter the anchor's tokens so the embedding only sees valid ones.
    pub fn filter_anchor(&mut self, anchor: &Anchor) -> Result<(), PassError> {
        self.insert_filter(anchor.node, TOKENS_SLOT)?;
        self.counters.handled_inputs += 1;
        Ok(())
    }

    /// Align and filter the outside operands of a region entry node.
    pub fn filter_entry(&mut self, region: &Region, node: NodeId) -> Result<(), PassError> {
        let n = self.graph.node(node);
        if n.inputs.len() != 2 {
            return Err(PassError::NonBinaryCandidate {
                node: n.name.clone(),
                inputs: n.inputs.len(),
            });
        }

        for slot in 0..2 {
            let Some(operand) = self.graph.node(node).input(slot) else {
                continue;
            };
            if region.is_member(operand) {
                continue;
            }
            let Some(member) = self.graph.node(node).input(1 - slot) else {
                continue;
            };
            let operand_shape = self.known_shape(operand)?;
            let member_shape = self.known_shape(member)?;
            if operand_shape.rank() + 2 <= member_shape.rank() {
                continue;
            }

            if needs_expand(&operand_shape, &member_shape) {
                self.insert_expand(node, slot, &operand_shape, member_shape.rank())?;
                self.counters.expanded_inputs += 1;
            }
            self.insert_filter(node, slot)?;
            self.counters.handled_inputs += 1;
        }
        Ok(())
    }

    /// Restore every member operand of a region exit node.
    pub fn restore_exit(&mut self, region: &Region, node: NodeId) -> Result<(), PassError> {
        let target = self.graph.node(node).target.clone();
        for slot in 0..self.graph.node(node).inputs.len() {
            if let Some(edge) = self.graph.node(node).input(slot)
                && region.is_member(edge)
            {
                let restored = self.restore(edge, target.clone())?;
                self.graph.set_input(node, slot, restored)?;
                self.counters.handled_outputs += 1;
            }
        }
        Ok(())
    }

    /// Restore output 0 of `node`, then re-filter it for each consumer.
    pub fn wrap_pass_through(&mut self, node: NodeId) -> Result<(), PassError> {
        let Some(output) = self.graph.node(node).output(0) else {
            return Ok(());
        };
        let consumers = self.graph.consumers(output);
        let target = self.graph.node(node).target.clone();
        let restored = self.restore(output, target)?;
        for (consumer, slot) in consumers {
            self.graph.set_input(consumer, slot, restored)?;
            self.insert_filter(consumer, slot)?;
        }
        Ok(())
    }

    /// Keep a member graph output at its padded shape.
    ///
    /// The producer is moved to a fresh edge carrying the unpadded value and
    /// a restore writes the original edge. Returns the fresh edge.
    pub fn restore_graph_output(&mut self, edge: EdgeId) -> Result<Option<EdgeId>, PassError> {
        let Some(producer) = self.graph.producer(edge) else {
            return Ok(None);
        };
        let Some(slot) = self.graph.node(producer).outputs.iter().position(|&e| e == edge) else {
            return Ok(None);
        };
        let original = self.graph.edge(edge).clone();
        let inner = self.graph.add_edge(
            &format!("{}_unpadded", original.name),
            original.dtype,
            original.shape.as_ref().map(|s| unpadded(s, &self.valid)),
        );
        self.graph.set_output(producer, slot, inner)?;
        for (consumer, input) in self.graph.consumers(edge) {
            self.graph.set_input(consumer, input, inner)?;
        }
        let target = self.graph.node(producer).target.clone();
        self.graph.add_node(
            NodeSpec::new(OpKind::PadAndUnflatten, "PaddingRecover")
                .inputs([inner, self.index, self.first_two_dims])
                .outputs([edge])
                .target(target),
        )?;
        self.counters.handled_outputs += 1;
        Ok(Some(inner))
    }

    fn known_shape(&self, edge: EdgeId) -> Result<TensorShape, PassError> {
        let e = self.graph.edge(edge);
        e.shape.clone().ok_or_else(|| PassError::InvalidMemberShape {
            edge: e.name.clone(),
            reason: "shape unknown at region entry".into(),
        })
    }

    /// Splice a filter onto input `slot` of `node`.
    fn insert_filter(&mut self, node: NodeId, slot: usize) -> Result<(), PassError> {
        let Some(input) = self.graph.node(node).input(slot) else {
            return Ok(());
        };
        let source = self.graph.edge(input).clone();
        let filtered = self.graph.add_edge(
            "padding_filter_result",
            source.dtype,
            source.shape.as_ref().map(|s| unpadded(s, &self.valid)),
        );
        let leading = self.graph.add_edge(
            "d1_d2_shape",
            Some(DataType::I64),
            Some(TensorShape::fixed(&[2])),
        );
        let target = self.graph.node(node).target.clone();
        self.graph.insert_on_input(
            node,
            slot,
            NodeSpec::new(OpKind::FlattenAndUnpad, "PaddingFilter")
                .inputs([self.index])
                .outputs([filtered, leading])
                .target(target),
        )?;
        Ok(())
    }

    /// Emit a restore of `edge` and return the restored edge.
    fn restore(&mut self, edge: EdgeId, target: Option<String>) -> Result<EdgeId, PassError> {
        let source = self.graph.edge(edge).clone();
        let restored = self.graph.add_edge("padded_result", source.dtype, source.shape);
        self.graph.add_node(
            NodeSpec::new(OpKind::PadAndUnflatten, "PaddingRecover")
                .inputs([edge, self.index, self.first_two_dims])
                .outputs([restored])
                .target(target),
        )?;
        Ok(restored)
    }

    /// Broadcast input `slot` of `node` to `[B, S, 1, ...]` of the given rank.
    fn insert_expand(
        &mut self,
        node: NodeId,
        slot: usize,
        operand: &TensorShape,
        rank: usize,
    ) -> Result<(), PassError> {
        let target = self.graph.node(node).target.clone();
        let shape = if rank <= 2 {
            self.first_two_dims
        } else {
            let ones = self
                .graph
                .add_initializer("other_shape", TensorData::vector_i64(vec![1; rank - 2]));
            let concat = self.graph.add_edge(
                "concat_shape_result",
                Some(DataType::I64),
                Some(TensorShape::fixed(&[rank as u64])),
            );
            self.graph.add_node(
                NodeSpec::new(OpKind::Concat { axis: 0 }, "Concat")
                    .inputs([self.first_two_dims, ones])
                    .outputs([concat])
                    .target(target.clone()),
            )?;
            concat
        };

        let member_leading = self.leading_of(node, 1 - slot);
        let padded = TensorShape::new(
            member_leading
                .into_iter()
                .chain(std::iter::repeat_n(Dimension::Fixed(1), rank.saturating_sub(2))),
        );
        let dtype = self
            .graph
            .node(node)
            .input(slot)
            .and_then(|e| self.graph.edge(e).dtype);
        let expanded = self
            .graph
            .add_edge("inputs_expand_result", dtype, Some(broadcast(operand, &padded)));
        self.graph.insert_on_input(
            node,
            slot,
            NodeSpec::new(OpKind::Expand, "ExpandPaddingShape")
                .inputs([shape])
                .outputs([expanded])
                .target(target),
        )?;
        Ok(())
    }

    /// The two leading dims of input `slot` of `node`.
    fn leading_of(&self, node: NodeId, slot: usize) -> Vec<Dimension> {
        self.graph
            .node(node)
            .input(slot)
            .and_then(|e| self.graph.edge(e).shape.as_ref())
            .map(|s| s.dims.iter().take(2).cloned().collect())
            .unwrap_or_else(|| vec![Dimension::Unknown; 2])
    }
}

/// An outside operand must be expanded unless it already has the member's
/// rank and leading `[B, S]` dims.
fn needs_expand(operand: &TensorShape, member: &TensorShape) -> bool {
    operand.rank() != member.rank() || operand.dims.iter().take(2).ne(member.dims.iter().take(2))
}
