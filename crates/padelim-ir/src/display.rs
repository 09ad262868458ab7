//! Display implementations and text dump for debugging.

use std::fmt;

use crate::attr::Attribute;
use crate::graph::{Edge, Graph, Node};
use crate::types::{DataType, Dimension, TensorShape};

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "bool",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
            Self::F32 => "f32",
            Self::F64 => "f64",
        })
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "{n}"),
            Self::Symbolic(name) => f.write_str(name),
            Self::Unknown => f.write_str("?"),
        }
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        write!(f, "[{}]", dims.join(", "))
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Ints(v) => write!(f, "{v:?}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Strings(v) => write!(f, "{v:?}"),
        }
    }
}

/// Formats an edge as `name: dtype[dims]`.
pub fn format_edge(edge: &Edge) -> String {
    let dtype = edge
        .dtype
        .map(|d| d.to_string())
        .unwrap_or_else(|| "?".into());
    match &edge.shape {
        Some(shape) => format!("{}: {dtype}{shape}", edge.name),
        None => format!("{}: {dtype}", edge.name),
    }
}

fn format_node(graph: &Graph, node: &Node) -> String {
    let inputs: Vec<&str> = node
        .inputs
        .iter()
        .map(|i| match i {
            Some(e) => graph.edges.try_get(*e).map_or("<dangling>", |e| e.name.as_str()),
            None => "_",
        })
        .collect();
    let outputs: Vec<&str> = node
        .outputs
        .iter()
        .map(|e| graph.edges.try_get(*e).map_or("<dangling>", |e| e.name.as_str()))
        .collect();
    let mut line = format!(
        "{} = {}({})  [{}]",
        outputs.join(", "),
        node.op.op_type(),
        inputs.join(", "),
        node.name
    );
    if !node.attributes.is_empty() {
        let attrs: Vec<String> = node
            .attributes
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        line.push_str(&format!(" {{{}}}", attrs.join(", ")));
    }
    if let Some(target) = &node.target {
        line.push_str(&format!(" @{target}"));
    }
    line
}

/// Produces a human-readable text dump of a [`Graph`] for debugging.
///
/// Nodes are listed in topological order when the graph is acyclic.
pub fn dump_graph(graph: &Graph) -> String {
    let mut out = String::new();

    out.push_str("Inputs:\n");
    for &input in &graph.inputs {
        if let Some(edge) = graph.edges.try_get(input) {
            out.push_str(&format!("  {input:?} {}\n", format_edge(edge)));
        }
    }

    if !graph.initializers.is_empty() {
        out.push_str("\nInitializers:\n");
        for (id, data) in &graph.initializers {
            let name = graph.edges.try_get(*id).map_or("<dangling>", |e| e.name.as_str());
            out.push_str(&format!("  {id:?} {name}: {}{:?}\n", data.dtype(), data.dims));
        }
    }

    out.push_str("\nNodes:\n");
    let order: Vec<_> = if graph.validate().is_ok() {
        graph.topological_order()
    } else {
        graph.nodes.iter().map(|(id, _)| id).collect()
    };
    for id in order {
        out.push_str(&format!("  {id:?} {}\n", format_node(graph, graph.node(id))));
    }

    out.push_str("\nValues:\n");
    for (id, edge) in graph.edges.iter() {
        out.push_str(&format!("  {id:?} {}\n", format_edge(edge)));
    }

    out.push_str("\nOutputs:\n");
    for &output in &graph.outputs {
        if let Some(edge) = graph.edges.try_get(output) {
            out.push_str(&format!("  {output:?} {}\n", edge.name));
        }
    }

    out
}
