//! Instrumentation hooks that run host-language callbacks on activations.
//!
//! Two hook functions travel with the values they observe and are
//! therefore transparent to the region. In inspect-only mode, activation
//! inspectors are replaced with a variant that also receives the valid
//! index so it can report statistics on unpadded tokens only.

use padelim_ir::{Attribute, Attributes, EdgeId, Graph, IrError, NodeId, NodeSpec, OpKind};

use super::classify::single_rank;
use super::propagate::Region;
use super::valid_index::ValidIndex;
use crate::error::PassError;

/// Hook that records activation statistics.
pub const INSPECT_ACTIVATION_FUNC: &str =
    "onnxruntime.training.utils.hooks._statistics_subscriber._InspectActivation";
/// Hook that advances the subscriber step counter.
pub const INCREMENT_STEP_FUNC: &str =
    "onnxruntime.training.utils.hooks._subscriber_manager._IncrementStep";
/// Inspector variant taking the valid index as an extra input.
pub const INSPECT_UNPAD_ACTIVATION_FUNC: &str =
    "onnxruntime.training.utils.hooks._statistics_subscriber._InspectUnpadActivation";

const RANK_ATTRIBUTES: [&str; 2] = ["input_tensor_ranks", "output_tensor_ranks"];

/// Decrement the rank attributes of every hook recorded for adjustment.
///
/// Returns the number of hooks updated.
pub fn decrement_hook_ranks(graph: &mut Graph, region: &Region) -> Result<usize, PassError> {
    let mut updated = 0;
    for (&node, site) in &region.hooks {
        if !site.adjust_ranks {
            continue;
        }
        for attribute in RANK_ATTRIBUTES {
            let rank = single_rank(graph.node(node), attribute)?;
            graph
                .node_mut(node)
                .attributes
                .insert(attribute.into(), Attribute::Ints(vec![rank - 1]));
        }
        updated += 1;
    }
    Ok(updated)
}

/// Attributes of a patched inspector, computed before any mutation.
struct Patch {
    node: NodeId,
    attributes: Attributes,
}

/// Replace every recorded activation inspector with its unpad variant.
///
/// All hooks are checked first so a missing attribute leaves the graph
/// untouched. Returns the number of hooks replaced.
pub fn patch_inspectors(graph: &mut Graph, region: &Region, index: &ValidIndex) -> Result<usize, PassError> {
    let index_edge = graph.edge(index.index);
    let index_type = index_edge.dtype.map(|t| t.onnx_code()).unwrap_or(0);
    let index_rank = index_edge.rank().unwrap_or(1) as i64;

    let patches = region
        .inspect_ranks()
        .map(|(node, _)| patched_attributes(graph, node, index_type, index_rank))
        .collect::<Result<Vec<_>, _>>()?;

    for patch in &patches {
        replace_inspector(graph, patch, index.index)?;
    }
    Ok(patches.len())
}

fn patched_attributes(
    graph: &Graph,
    node: NodeId,
    index_type: i64,
    index_rank: i64,
) -> Result<Patch, PassError> {
    let n = graph.node(node);
    hook_slots(graph, node).map_err(|slot| IrError::BadSlot {
        node: n.name.clone(),
        slot,
    })?;
    let mut attributes = n.attributes.clone();

    let convention = required(graph, node, "input_convention")?
        .as_str()
        .ok_or_else(|| invalid(graph, node, "input_convention", "expected a string"))?;
    attributes.insert("input_convention".into(), Attribute::String(format!("{convention}d")));

    if let Some(grads) = n.attribute("input_requires_grads") {
        let grads = grads
            .as_ints()
            .ok_or_else(|| invalid(graph, node, "input_requires_grads", "expected an integer list"))?;
        attributes.insert("input_requires_grads".into(), Attribute::Ints(appended(grads, 0)));
    }

    for (attribute, value) in [("input_tensor_types", index_type), ("input_tensor_ranks", index_rank)] {
        let values = required(graph, node, attribute)?
            .as_ints()
            .ok_or_else(|| invalid(graph, node, attribute, "expected an integer list"))?;
        attributes.insert(attribute.into(), Attribute::Ints(appended(values, value)));
    }

    Ok(Patch { node, attributes })
}

fn replace_inspector(graph: &mut Graph, patch: &Patch, index: EdgeId) -> Result<(), PassError> {
    let old = graph.node(patch.node).clone();
    let (input, ctx, value) = hook_slots(graph, patch.node).map_err(|slot| IrError::BadSlot {
        node: old.name.clone(),
        slot,
    })?;

    let ctx_type = graph.edge(ctx).clone();
    let value_type = graph.edge(input).clone();
    let new_ctx = graph.add_edge("python_op_ctx", ctx_type.dtype, ctx_type.shape);
    let new_value = graph.add_edge("python_op_out", value_type.dtype, value_type.shape);

    let mut spec = NodeSpec::new(
        OpKind::PythonOp {
            func_name: Some(INSPECT_UNPAD_ACTIVATION_FUNC.into()),
        },
        "inspect_unpad_activation",
    )
    .inputs([input, index])
    .outputs([new_ctx, new_value])
    .target(old.target.clone());
    spec.attributes = patch.attributes.clone();
    graph.add_node(spec)?;

    graph.replace_uses(ctx, new_ctx);
    graph.replace_uses(value, new_value);
    graph.remove_node(patch.node)?;
    Ok(())
}

/// Input 0 and outputs 0 and 1 of a hook, or the first missing slot.
fn hook_slots(graph: &Graph, node: NodeId) -> Result<(EdgeId, EdgeId, EdgeId), usize> {
    let n = graph.node(node);
    let input = n.input(0).ok_or(0usize)?;
    let ctx = n.output(0).ok_or(0usize)?;
    let value = n.output(1).ok_or(1usize)?;
    Ok((input, ctx, value))
}

fn appended(values: &[i64], extra: i64) -> Vec<i64> {
    values.iter().copied().chain(std::iter::once(extra)).collect()
}

fn required<'g>(graph: &'g Graph, node: NodeId, attribute: &'static str) -> Result<&'g Attribute, PassError> {
    let n = graph.node(node);
    n.attribute(attribute).ok_or_else(|| PassError::MissingAttribute {
        node: n.name.clone(),
        attribute,
    })
}

fn invalid(graph: &Graph, node: NodeId, attribute: &'static str, reason: &str) -> PassError {
    PassError::InvalidAttribute {
        node: graph.node(node).name.clone(),
        attribute,
        reason: reason.into(),
    }
}
