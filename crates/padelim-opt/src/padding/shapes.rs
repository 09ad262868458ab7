//! Shape bookkeeping for region members.

use padelim_ir::{Dimension, EdgeId, Graph, TensorShape};

use super::propagate::Region;

/// A member edge whose shape cannot be rewritten to `[valid, ...]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsupportedShape {
    pub edge: EdgeId,
    pub shape: TensorShape,
}

/// Find the first shaped member with rank below 2 or a non-static trailing dim.
pub fn check_member_shapes(graph: &Graph, region: &Region) -> Result<(), UnsupportedShape> {
    for &edge in &region.members {
        let Some(shape) = &graph.edge(edge).shape else {
            continue;
        };
        if shape.rank() < 2 || shape.trailing_static(2).is_none() {
            return Err(UnsupportedShape {
                edge,
                shape: shape.clone(),
            });
        }
    }
    Ok(())
}

/// `[B, S, rest...]` → `[valid, rest...]`. Shapes of rank below 2 are kept.
pub fn unpadded(shape: &TensorShape, valid: &Dimension) -> TensorShape {
    if shape.rank() < 2 {
        return shape.clone();
    }
    TensorShape::new(std::iter::once(valid.clone()).chain(shape.dims[2..].iter().cloned()))
}

/// Replace the two leading dims of every shaped member with `valid`.
///
/// Returns the number of edges rewritten.
pub fn rewrite_member_shapes(
    graph: &mut Graph,
    members: impl IntoIterator<Item = EdgeId>,
    valid: &Dimension,
) -> usize {
    let mut rewritten = 0;
    for edge in members {
        if let Some(shape) = graph.edge_mut(edge).shape.as_mut() {
            *shape = unpadded(shape, valid);
            rewritten += 1;
        }
    }
    rewritten
}

/// Numpy-style broadcast of two shapes.
pub fn broadcast(a: &TensorShape, b: &TensorShape) -> TensorShape {
    let rank = a.rank().max(b.rank());
    let dim_at = |shape: &TensorShape, i: usize| -> Dimension {
        let offset = rank - shape.rank();
        if i < offset {
            Dimension::Fixed(1)
        } else {
            shape.dims[i - offset].clone()
        }
    };
    TensorShape::new((0..rank).map(|i| match (dim_at(a, i), dim_at(b, i)) {
        (Dimension::Fixed(1), other) | (other, Dimension::Fixed(1)) => other,
        (x, y) if x == y => x,
        _ => Dimension::Unknown,
    }))
}
