//! Dataflow graph of operators and tensor edges.
//!
//! Nodes and edges live in arenas and refer to each other by handle, so
//! splicing operators into the graph never invalidates handles held by a
//! pass. An edge is produced by at most one node (or is a graph input or an
//! initializer) and may be consumed by any number of nodes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::arena::{Arena, Handle};
use crate::attr::{Attribute, Attributes};
use crate::error::IrError;
use crate::op::OpKind;
use crate::tensor::TensorData;
use crate::types::{DataType, TensorShape};

/// Handle of a node in a [`Graph`].
pub type NodeId = Handle<Node>;

/// Handle of an edge (tensor value) in a [`Graph`].
pub type EdgeId = Handle<Edge>;

/// A tensor value flowing between nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique name.
    pub name: String,
    /// Element type, if known.
    #[serde(default)]
    pub dtype: Option<DataType>,
    /// Shape, if known.
    #[serde(default)]
    pub shape: Option<TensorShape>,
}

impl Edge {
    /// Rank of the edge, if its shape is known.
    pub fn rank(&self) -> Option<usize> {
        self.shape.as_ref().map(TensorShape::rank)
    }
}

/// An operator in the graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique name.
    pub name: String,
    /// The operation this node performs.
    #[serde(flatten)]
    pub op: OpKind,
    /// Ordered input edges; `None` marks an omitted optional input.
    pub inputs: Vec<Option<EdgeId>>,
    /// Ordered output edges.
    pub outputs: Vec<EdgeId>,
    /// Free-form attributes not modeled by [`OpKind`].
    #[serde(default)]
    pub attributes: Attributes,
    /// Execution target the node is assigned to.
    #[serde(default)]
    pub target: Option<String>,
}

impl Node {
    /// The edge on input `slot`, if the slot exists and is populated.
    pub fn input(&self, slot: usize) -> Option<EdgeId> {
        self.inputs.get(slot).copied().flatten()
    }

    /// The edge on output `slot`.
    pub fn output(&self, slot: usize) -> Option<EdgeId> {
        self.outputs.get(slot).copied()
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }
}

/// Everything needed to create a node.
#[derive(Clone, Debug)]
pub struct NodeSpec {
    pub op: OpKind,
    /// Name hint; the graph makes it unique.
    pub name: String,
    pub inputs: Vec<Option<EdgeId>>,
    pub outputs: Vec<EdgeId>,
    pub attributes: Attributes,
    pub target: Option<String>,
}

impl NodeSpec {
    pub fn new(op: OpKind, name: impl Into<String>) -> Self {
        Self {
            op,
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: Attributes::new(),
            target: None,
        }
    }

    pub fn inputs(mut self, inputs: impl IntoIterator<Item = EdgeId>) -> Self {
        self.inputs = inputs.into_iter().map(Some).collect();
        self
    }

    pub fn outputs(mut self, outputs: impl IntoIterator<Item = EdgeId>) -> Self {
        self.outputs = outputs.into_iter().collect();
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: Attribute) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn target(mut self, target: Option<String>) -> Self {
        self.target = target;
        self
    }
}

/// A computation graph.
///
/// This is a DAG where nodes are operations and edges are tensors
/// flowing between operations.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Arena<Node>,
    pub edges: Arena<Edge>,
    /// Graph-level input edges (model inputs).
    #[serde(default)]
    pub inputs: Vec<EdgeId>,
    /// Graph-level output edges (model outputs).
    #[serde(default)]
    pub outputs: Vec<EdgeId>,
    /// Constant tensors, keyed by the edge that carries them.
    #[serde(default)]
    pub initializers: BTreeMap<EdgeId, TensorData>,
    /// Next suffix to try per name hint.
    #[serde(skip)]
    name_counters: HashMap<String, u32>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id]
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        &mut self.edges[id]
    }

    pub fn edge_by_name(&self, name: &str) -> Option<EdgeId> {
        self.edges
            .iter()
            .find(|(_, e)| e.name == name)
            .map(|(id, _)| id)
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, n)| n.name == name)
            .map(|(id, _)| id)
    }

    // ---------------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------------

    /// Add an edge under a generated unique name derived from `hint`.
    pub fn add_edge(
        &mut self,
        hint: &str,
        dtype: Option<DataType>,
        shape: Option<TensorShape>,
    ) -> EdgeId {
        let name = self.generate_edge_name(hint);
        self.edges.append(Edge { name, dtype, shape })
    }

    /// Add an edge with exactly the given name.
    pub fn add_named_edge(
        &mut self,
        name: &str,
        dtype: Option<DataType>,
        shape: Option<TensorShape>,
    ) -> Result<EdgeId, IrError> {
        if self.edge_by_name(name).is_some() {
            return Err(IrError::DuplicateName(name.into()));
        }
        Ok(self.edges.append(Edge {
            name: name.into(),
            dtype,
            shape,
        }))
    }

    /// Add a named graph input.
    pub fn add_input(
        &mut self,
        name: &str,
        dtype: DataType,
        shape: TensorShape,
    ) -> Result<EdgeId, IrError> {
        let id = self.add_named_edge(name, Some(dtype), Some(shape))?;
        self.inputs.push(id);
        Ok(id)
    }

    /// Add a constant tensor carried by a fresh edge.
    pub fn add_initializer(&mut self, hint: &str, data: TensorData) -> EdgeId {
        let id = self.add_edge(hint, Some(data.dtype()), Some(data.shape()));
        self.initializers.insert(id, data);
        id
    }

    /// Add a node and return its id.
    ///
    /// Fails if any referenced edge does not exist, if an output edge
    /// already has a producer or is a graph input, or if the arity does not
    /// fit the operator schema.
    pub fn add_node(&mut self, spec: NodeSpec) -> Result<NodeId, IrError> {
        for &e in spec.inputs.iter().flatten().chain(spec.outputs.iter()) {
            self.check_edge(e)?;
        }
        self.check_schema(&spec.name, &spec.op, spec.inputs.len(), spec.outputs.len())?;

        for &out in &spec.outputs {
            if let Some(producer) = self.producer(out) {
                return Err(IrError::DuplicateProducer {
                    edge: self.edges[out].name.clone(),
                    producer: self.nodes[producer].name.clone(),
                });
            }
            if self.is_graph_input(out) || self.is_constant(out) {
                return Err(IrError::ProducedGraphInput(self.edges[out].name.clone()));
            }
        }

        let name = self.generate_node_name(&spec.name);
        Ok(self.nodes.append(Node {
            name,
            op: spec.op,
            inputs: spec.inputs,
            outputs: spec.outputs,
            attributes: spec.attributes,
            target: spec.target,
        }))
    }

    /// Splice a new node onto input `slot` of `consumer`.
    ///
    /// The edge currently on that slot is prepended to `spec.inputs`, and the
    /// new node's first output takes its place on the slot. All other
    /// connections are left untouched.
    pub fn insert_on_input(
        &mut self,
        consumer: NodeId,
        slot: usize,
        mut spec: NodeSpec,
    ) -> Result<NodeId, IrError> {
        self.check_node(consumer)?;
        let current = self.nodes[consumer]
            .input(slot)
            .ok_or_else(|| IrError::BadSlot {
                node: self.nodes[consumer].name.clone(),
                slot,
            })?;
        spec.inputs.insert(0, Some(current));
        let new_node = self.add_node(spec)?;
        let replacement = self.nodes[new_node]
            .output(0)
            .ok_or_else(|| IrError::Schema {
                node: self.nodes[new_node].name.clone(),
                op_type: self.nodes[new_node].op.op_type().into(),
                reason: "spliced node has no output".into(),
            })?;
        self.nodes[consumer].inputs[slot] = Some(replacement);
        Ok(new_node)
    }

    /// Point input `slot` of `node` at `edge`.
    pub fn set_input(&mut self, node: NodeId, slot: usize, edge: EdgeId) -> Result<(), IrError> {
        self.check_node(node)?;
        self.check_edge(edge)?;
        let n = &mut self.nodes[node];
        match n.inputs.get_mut(slot) {
            Some(entry) => {
                *entry = Some(edge);
                Ok(())
            }
            None => Err(IrError::BadSlot {
                node: n.name.clone(),
                slot,
            }),
        }
    }

    /// Point output `slot` of `node` at `edge`, which must be unproduced.
    pub fn set_output(&mut self, node: NodeId, slot: usize, edge: EdgeId) -> Result<(), IrError> {
        self.check_node(node)?;
        self.check_edge(edge)?;
        if let Some(producer) = self.producer(edge) {
            return Err(IrError::DuplicateProducer {
                edge: self.edges[edge].name.clone(),
                producer: self.nodes[producer].name.clone(),
            });
        }
        let n = &mut self.nodes[node];
        match n.outputs.get_mut(slot) {
            Some(entry) => {
                *entry = edge;
                Ok(())
            }
            None => Err(IrError::BadSlot {
                node: n.name.clone(),
                slot,
            }),
        }
    }

    /// Redirect every consumer slot and graph output from `from` to `to`.
    pub fn replace_uses(&mut self, from: EdgeId, to: EdgeId) {
        for (_, node) in self.nodes.iter_mut() {
            for input in node.inputs.iter_mut().flatten() {
                if *input == from {
                    *input = to;
                }
            }
        }
        for output in &mut self.outputs {
            if *output == from {
                *output = to;
            }
        }
    }

    /// Remove a node together with its output edges.
    ///
    /// Every output must be unused: no consumer and not a graph output.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, IrError> {
        self.check_node(id)?;
        for &out in &self.nodes[id].outputs {
            if !self.consumers(out).is_empty() || self.outputs.contains(&out) {
                return Err(IrError::EdgeInUse {
                    node: self.nodes[id].name.clone(),
                    edge: self.edges[out].name.clone(),
                });
            }
        }
        let node = self.nodes.remove(id).ok_or(IrError::BadHandle {
            kind: "node",
            index: id.index(),
            size: self.nodes.capacity_used(),
        })?;
        for &out in &node.outputs {
            self.edges.remove(out);
        }
        Ok(node)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Returns `true` if `edge` is a graph-level input.
    pub fn is_graph_input(&self, edge: EdgeId) -> bool {
        self.inputs.contains(&edge)
    }

    /// Returns `true` if `edge` carries a constant initializer.
    pub fn is_constant(&self, edge: EdgeId) -> bool {
        self.initializers.contains_key(&edge)
    }

    /// The constant payload of `edge`, if it is an initializer.
    pub fn constant(&self, edge: EdgeId) -> Option<&TensorData> {
        self.initializers.get(&edge)
    }

    /// Find the node that produces the given edge, if any.
    pub fn producer(&self, edge: EdgeId) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, n)| n.outputs.contains(&edge))
            .map(|(id, _)| id)
    }

    /// All `(node, input slot)` pairs that consume `edge`, in node order.
    pub fn consumers(&self, edge: EdgeId) -> Vec<(NodeId, usize)> {
        let mut result = Vec::new();
        for (id, node) in self.nodes.iter() {
            for (slot, input) in node.inputs.iter().enumerate() {
                if *input == Some(edge) {
                    result.push((id, slot));
                }
            }
        }
        result
    }

    /// Distinct nodes consuming any output of `node`, in first-use order.
    pub fn downstream_nodes(&self, node: NodeId) -> Vec<NodeId> {
        let mut seen = BTreeSet::new();
        let mut result = Vec::new();
        for &out in &self.nodes[node].outputs {
            for (consumer, _) in self.consumers(out) {
                if seen.insert(consumer) {
                    result.push(consumer);
                }
            }
        }
        result
    }

    /// Returns nodes in topological order.
    ///
    /// The ordering is deterministic: among ready nodes, the one with the
    /// smaller [`NodeId`] is emitted first.
    ///
    /// # Panics
    ///
    /// Panics if the graph contains a cycle.
    pub fn topological_order(&self) -> Vec<NodeId> {
        match self.try_topological_order() {
            Ok(order) => order,
            Err(visited) => panic!(
                "topological_order: graph contains a cycle ({} of {} nodes visited)",
                visited,
                self.nodes.len(),
            ),
        }
    }

    /// Kahn's algorithm; on a cycle returns how many nodes were ordered.
    fn try_topological_order(&self) -> Result<Vec<NodeId>, usize> {
        let mut edge_producer: HashMap<EdgeId, NodeId> = HashMap::new();
        for (id, node) in self.nodes.iter() {
            for &out in &node.outputs {
                edge_producer.insert(out, id);
            }
        }

        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut consumers: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (id, node) in self.nodes.iter() {
            in_degree.entry(id).or_insert(0);
            for inp in node.inputs.iter().flatten() {
                if let Some(&producer) = edge_producer.get(inp) {
                    *in_degree.entry(id).or_insert(0) += 1;
                    consumers.entry(producer).or_default().push(id);
                }
            }
        }

        let mut ready: BTreeSet<NodeId> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut result = Vec::with_capacity(in_degree.len());

        while let Some(id) = ready.pop_first() {
            result.push(id);
            for next in consumers.get(&id).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(next) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(*next);
                    }
                }
            }
        }

        if result.len() == in_degree.len() {
            Ok(result)
        } else {
            Err(result.len())
        }
    }

    /// Check structural invariants: live handles, unique edge names, single
    /// producer per edge, unproduced graph inputs and constants, acyclicity.
    pub fn validate(&self) -> Result<(), IrError> {
        let mut names = BTreeSet::new();
        for (_, edge) in self.edges.iter() {
            if !names.insert(edge.name.as_str()) {
                return Err(IrError::DuplicateName(edge.name.clone()));
            }
        }
        for &e in self
            .inputs
            .iter()
            .chain(self.outputs.iter())
            .chain(self.initializers.keys())
        {
            self.check_edge(e)?;
        }

        let mut produced: HashMap<EdgeId, NodeId> = HashMap::new();
        for (id, node) in self.nodes.iter() {
            for &e in node.inputs.iter().flatten().chain(node.outputs.iter()) {
                self.check_edge(e)?;
            }
            self.check_schema(&node.name, &node.op, node.inputs.len(), node.outputs.len())?;
            for &out in &node.outputs {
                if let Some(previous) = produced.insert(out, id) {
                    return Err(IrError::DuplicateProducer {
                        edge: self.edges[out].name.clone(),
                        producer: self.nodes[previous].name.clone(),
                    });
                }
                if self.is_graph_input(out) || self.is_constant(out) {
                    return Err(IrError::ProducedGraphInput(self.edges[out].name.clone()));
                }
            }
        }

        self.try_topological_order()
            .map(|_| ())
            .map_err(|visited| IrError::Cycle {
                visited,
                total: self.nodes.len(),
            })
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn check_edge(&self, e: EdgeId) -> Result<(), IrError> {
        if self.edges.contains(e) {
            Ok(())
        } else {
            Err(IrError::BadHandle {
                kind: "edge",
                index: e.index(),
                size: self.edges.capacity_used(),
            })
        }
    }

    fn check_node(&self, n: NodeId) -> Result<(), IrError> {
        if self.nodes.contains(n) {
            Ok(())
        } else {
            Err(IrError::BadHandle {
                kind: "node",
                index: n.index(),
                size: self.nodes.capacity_used(),
            })
        }
    }

    fn check_schema(
        &self,
        name: &str,
        op: &OpKind,
        inputs: usize,
        outputs: usize,
    ) -> Result<(), IrError> {
        let schema = op.schema();
        let reason = if inputs < schema.min_inputs || inputs > schema.max_inputs {
            format!(
                "expected {}..={} inputs, got {inputs}",
                schema.min_inputs, schema.max_inputs
            )
        } else if outputs < schema.min_outputs || outputs > schema.max_outputs {
            format!(
                "expected {}..={} outputs, got {outputs}",
                schema.min_outputs, schema.max_outputs
            )
        } else {
            return Ok(());
        };
        Err(IrError::Schema {
            node: name.into(),
            op_type: op.op_type().into(),
            reason,
        })
    }

    fn generate_edge_name(&mut self, hint: &str) -> String {
        let mut counter = self.name_counters.get(hint).copied().unwrap_or(0);
        loop {
            let candidate = if counter == 0 {
                hint.to_string()
            } else {
                format!("{hint}_{counter}")
            };
            counter += 1;
            if !self.edges.iter().any(|(_, e)| e.name == candidate) {
                self.name_counters.insert(hint.to_string(), counter);
                return candidate;
            }
        }
    }

    fn generate_node_name(&mut self, hint: &str) -> String {
        let key = format!("node:{hint}");
        let mut counter = self.name_counters.get(&key).copied().unwrap_or(0);
        loop {
            let candidate = if counter == 0 {
                hint.to_string()
            } else {
                format!("{hint}_{counter}")
            };
            counter += 1;
            if !self.nodes.iter().any(|(_, n)| n.name == candidate) {
                self.name_counters.insert(key, counter);
                return candidate;
            }
        }
    }
}
