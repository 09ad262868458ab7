//! Construction of the valid-token index.
//!
//! The index lists, in row-major order, the flattened `[B * S]` positions
//! whose token differs from the padding value. It is the single source of
//! truth for every filter and restore the pass inserts.

use padelim_ir::{DataType, Dimension, EdgeId, Graph, NodeSpec, OpKind, TensorData, TensorShape};

use super::anchor::Anchor;
use crate::error::PassError;

/// Edges produced while building the index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidIndex {
    /// `[valid]` `I64` positions of non-padding tokens.
    pub index: EdgeId,
    /// `[2]` `I64` runtime extents of `[B, S]`; only built when rewriting.
    pub first_two_dims: Option<EdgeId>,
    /// Name of the symbolic dim standing for the valid token count.
    pub dim: String,
}

impl ValidIndex {
    pub fn valid_dim(&self) -> Dimension {
        Dimension::Symbolic(self.dim.clone())
    }
}

/// Symbolic dim name for the region seeded by `anchor`.
pub fn valid_dim_name(anchor: &Anchor) -> String {
    format!("valid_token_count_{}", anchor.node.index())
}

/// Emit the nodes computing the valid-token index from the anchor's tokens.
pub fn build(graph: &mut Graph, anchor: &Anchor, with_dims: bool) -> Result<ValidIndex, PassError> {
    let trailing = anchor.trailing_dims().ok_or_else(|| PassError::InvalidMemberShape {
        edge: graph.edge(anchor.tokens).name.clone(),
        reason: "trailing dims are not static".into(),
    })?;
    let reshape_dims = std::iter::once(Ok(-1))
        .chain(trailing.iter().map(|&d| i64::try_from(d)))
        .collect::<Result<Vec<i64>, _>>()
        .map_err(|_| PassError::InvalidMemberShape {
            edge: graph.edge(anchor.tokens).name.clone(),
            reason: "trailing dim does not fit in i64".into(),
        })?;
    let dim = valid_dim_name(anchor);
    let target = graph.node(anchor.node).target.clone();
    let token_dtype = graph.edge(anchor.tokens).dtype;

    let merged = merge_leading(&anchor.tokens_shape.dims[0], &anchor.tokens_shape.dims[1]);
    let flat_shape = TensorShape::new(
        std::iter::once(merged).chain(trailing.iter().map(|&d| Dimension::Fixed(d))),
    );

    // 1. Flatten [B, S, ...] to [B*S, ...].
    let shape_const = graph.add_initializer(
        "flattened_shape",
        TensorData::vector_i64(reshape_dims),
    );
    let flat_tokens = graph.add_edge("flattened_input_ids", token_dtype, Some(flat_shape.clone()));
    graph.add_node(
        NodeSpec::new(OpKind::Reshape, "inputs_reshape")
            .inputs([anchor.tokens, shape_const])
            .outputs([flat_tokens])
            .target(target.clone()),
    )?;

    // 2. Mask of elements that differ from the padding value.
    let padding_dtype = graph.edge(anchor.padding).dtype;
    let padding = match token_dtype {
        Some(to) if padding_dtype != Some(to) => {
            let cast = graph.add_edge("padding_value", Some(to), Some(TensorShape::default()));
            graph.add_node(
                NodeSpec::new(OpKind::Cast { to }, "padding_value_cast")
                    .inputs([anchor.padding])
                    .outputs([cast])
                    .target(target.clone()),
            )?;
            cast
        }
        _ => anchor.padding,
    };
    let matches = graph.add_edge("padding_match", Some(DataType::Bool), Some(flat_shape.clone()));
    graph.add_node(
        NodeSpec::new(OpKind::Equal, "padding_equal")
            .inputs([flat_tokens, padding])
            .outputs([matches])
            .target(target.clone()),
    )?;
    let mut mask = graph.add_edge("padding_mask", Some(DataType::Bool), Some(flat_shape.clone()));
    graph.add_node(
        NodeSpec::new(OpKind::Not, "padding_not")
            .inputs([matches])
            .outputs([mask])
            .target(target.clone()),
    )?;

    // 3. One flag per token: valid if any trailing element is not padding.
    if !trailing.is_empty() {
        let mut int_shape = flat_shape;
        let as_int = graph.add_edge("padding_mask_int", Some(DataType::I32), Some(int_shape.clone()));
        graph.add_node(
            NodeSpec::new(OpKind::Cast { to: DataType::I32 }, "padding_mask_cast")
                .inputs([mask])
                .outputs([as_int])
                .target(target.clone()),
        )?;
        int_shape.dims.truncate(1);
        let any = graph.add_edge("token_mask", Some(DataType::I32), Some(int_shape));
        let axes = (1..=trailing.len() as i64).collect();
        graph.add_node(
            NodeSpec::new(OpKind::ReduceMax { axes, keepdims: false }, "token_mask_reduce")
                .inputs([as_int])
                .outputs([any])
                .target(target.clone()),
        )?;
        mask = any;
    }

    // 4. Positions of valid tokens.
    let valid = Dimension::Symbolic(dim.clone());
    let nonzero = graph.add_edge(
        "valid_token_positions",
        Some(DataType::I64),
        Some(TensorShape::new([Dimension::Fixed(1), valid.clone()])),
    );
    graph.add_node(
        NodeSpec::new(OpKind::NonZero, "valid_token_nonzero")
            .inputs([mask])
            .outputs([nonzero])
            .target(target.clone()),
    )?;
    let index = graph.add_edge(
        "valid_token_index",
        Some(DataType::I64),
        Some(TensorShape::new([valid])),
    );
    graph.add_node(
        NodeSpec::new(OpKind::Squeeze { axes: vec![0] }, "valid_token_squeeze")
            .inputs([nonzero])
            .outputs([index])
            .target(target.clone()),
    )?;

    let first_two_dims = if with_dims {
        let rank = anchor.tokens_shape.rank() as u64;
        let full = graph.add_edge("input_ids_shape", Some(DataType::I64), Some(TensorShape::fixed(&[rank])));
        graph.add_node(
            NodeSpec::new(OpKind::Shape, "input_ids_shape")
                .inputs([anchor.tokens])
                .outputs([full])
                .target(target.clone()),
        )?;
        let positions = graph.add_initializer("leading_dim_indices", TensorData::vector_i64(vec![0, 1]));
        let dims = graph.add_edge("first_two_dims", Some(DataType::I64), Some(TensorShape::fixed(&[2])));
        graph.add_node(
            NodeSpec::new(OpKind::Gather { axis: 0 }, "first_two_dims_gather")
                .inputs([full, positions])
                .outputs([dims])
                .target(target),
        )?;
        Some(dims)
    } else {
        None
    };

    Ok(ValidIndex {
        index,
        first_two_dims,
        dim,
    })
}

/// Extent of the flattened `[B * S]` dim.
fn merge_leading(batch: &Dimension, seq: &Dimension) -> Dimension {
    match (batch, seq) {
        (Dimension::Fixed(b), Dimension::Fixed(s)) => b
            .checked_mul(*s)
            .map_or_else(|| Dimension::Symbolic(format!("{batch}*{seq}")), Dimension::Fixed),
        _ => Dimension::Symbolic(format!("{batch}*{seq}")),
    }
}
