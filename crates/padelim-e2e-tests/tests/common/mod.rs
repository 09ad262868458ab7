//! Shared helpers: graph builders and an ndarray reference interpreter.
//!
//! The interpreter evaluates every operator the padding pass emits or
//! classifies, so original and rewritten graphs can be run on the same
//! inputs and compared.

use std::collections::HashMap;

use ndarray::{ArrayD, Axis, Dimension as _, Ix2, IxDyn, Zip};
use padelim_ir::{
    DataType, Dimension, EdgeId, Graph, NodeSpec, OpKind, TensorData, TensorShape, TensorValues,
};
use padelim_opt::{PaddingElimination, PaddingEliminationConfig};

/// A runtime tensor.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    F32(ArrayD<f32>),
    I64(ArrayD<i64>),
    I32(ArrayD<i32>),
    Bool(ArrayD<bool>),
}

macro_rules! each {
    ($value:expr, $a:ident => $body:expr) => {
        match $value {
            Value::F32($a) => Value::F32($body),
            Value::I64($a) => Value::I64($body),
            Value::I32($a) => Value::I32($body),
            Value::Bool($a) => Value::Bool($body),
        }
    };
}

#[allow(dead_code)]
impl Value {
    pub fn dims(&self) -> Vec<usize> {
        match self {
            Value::F32(a) => a.shape().to_vec(),
            Value::I64(a) => a.shape().to_vec(),
            Value::I32(a) => a.shape().to_vec(),
            Value::Bool(a) => a.shape().to_vec(),
        }
    }

    pub fn f32(&self) -> &ArrayD<f32> {
        match self {
            Value::F32(a) => a,
            other => panic!("expected f32 tensor, got {other:?}"),
        }
    }

    pub fn i64(&self) -> &ArrayD<i64> {
        match self {
            Value::I64(a) => a,
            other => panic!("expected i64 tensor, got {other:?}"),
        }
    }

    fn to_f64(&self) -> ArrayD<f64> {
        match self {
            Value::F32(a) => a.mapv(f64::from),
            Value::I64(a) => a.mapv(|x| x as f64),
            Value::I32(a) => a.mapv(f64::from),
            Value::Bool(a) => a.mapv(|x| if x { 1.0 } else { 0.0 }),
        }
    }

    fn from_f64(a: ArrayD<f64>, to: DataType) -> Value {
        match to {
            DataType::F32 | DataType::F16 | DataType::BF16 | DataType::F64 => {
                Value::F32(a.mapv(|x| x as f32))
            }
            DataType::I64 => Value::I64(a.mapv(|x| x as i64)),
            DataType::I32 => Value::I32(a.mapv(|x| x as i32)),
            DataType::Bool => Value::Bool(a.mapv(|x| x != 0.0)),
        }
    }

    fn from_constant(data: &TensorData) -> Value {
        let shape: Vec<usize> = data.dims.iter().map(|&d| d as usize).collect();
        let shape = IxDyn(&shape);
        let built = match &data.values {
            TensorValues::F32(v) => ArrayD::from_shape_vec(shape, v.clone()).map(Value::F32),
            TensorValues::I64(v) => ArrayD::from_shape_vec(shape, v.clone()).map(Value::I64),
            TensorValues::I32(v) => ArrayD::from_shape_vec(shape, v.clone()).map(Value::I32),
            TensorValues::Bool(v) => ArrayD::from_shape_vec(shape, v.clone()).map(Value::Bool),
        };
        built.expect("initializer payload does not match its dims")
    }
}

fn reshape<T: Clone>(a: &ArrayD<T>, shape: &[usize]) -> ArrayD<T> {
    ArrayD::from_shape_vec(IxDyn(shape), a.iter().cloned().collect()).expect("reshape size mismatch")
}

fn broadcast_dims(a: &[usize], b: &[usize]) -> Vec<usize> {
    let rank = a.len().max(b.len());
    (0..rank)
        .map(|i| {
            let x = if i + a.len() >= rank { a[i + a.len() - rank] } else { 1 };
            let y = if i + b.len() >= rank { b[i + b.len() - rank] } else { 1 };
            match (x, y) {
                (1, y) => y,
                (x, 1) => x,
                (x, y) if x == y => x,
                _ => panic!("shapes {a:?} and {b:?} do not broadcast"),
            }
        })
        .collect()
}

fn expand<T: Clone>(a: &ArrayD<T>, target: &[usize]) -> ArrayD<T> {
    let shape = broadcast_dims(a.shape(), target);
    a.broadcast(IxDyn(&shape)).expect("expand").to_owned()
}

fn unpad<T: Clone>(a: &ArrayD<T>, index: &ArrayD<i64>) -> ArrayD<T> {
    let dims = a.shape();
    let mut flat = vec![dims[0] * dims[1]];
    flat.extend_from_slice(&dims[2..]);
    let rows: Vec<usize> = index.iter().map(|&i| i as usize).collect();
    reshape(a, &flat).select(Axis(0), &rows)
}

fn pad<T: Clone + Default>(a: &ArrayD<T>, index: &ArrayD<i64>, leading: &ArrayD<i64>) -> ArrayD<T> {
    let (batch, seq) = (leading[[0]] as usize, leading[[1]] as usize);
    let rest = &a.shape()[1..];
    let mut flat_dims = vec![batch * seq];
    flat_dims.extend_from_slice(rest);
    let mut out = ArrayD::from_elem(IxDyn(&flat_dims), T::default());
    for (row, &position) in index.iter().enumerate() {
        out.index_axis_mut(Axis(0), position as usize)
            .assign(&a.index_axis(Axis(0), row));
    }
    let mut dims = vec![batch, seq];
    dims.extend_from_slice(rest);
    reshape(&out, &dims)
}

fn normalize_axis(axis: i64, rank: usize) -> usize {
    if axis < 0 { (axis + rank as i64) as usize } else { axis as usize }
}

fn gelu(x: f32) -> f32 {
    0.5 * x * (1.0 + (0.797_884_6 * (x + 0.044_715 * x * x * x)).tanh())
}

/// Normalize over `dims[axis..]`; `rms` skips mean centering.
fn normalize(x: &ArrayD<f32>, axis: i64, gamma: &ArrayD<f32>, beta: Option<&ArrayD<f32>>, rms: bool) -> ArrayD<f32> {
    let dims = x.shape().to_vec();
    let axis = normalize_axis(axis, dims.len());
    let inner: usize = dims[axis..].iter().product();
    let outer = x.len() / inner;
    let rows = reshape(x, &[outer, inner]).into_dimensionality::<Ix2>().expect("2-D");
    let gamma: Vec<f32> = gamma.iter().copied().collect();
    let beta: Vec<f32> = beta.map(|b| b.iter().copied().collect()).unwrap_or_else(|| vec![0.0; inner]);

    let mut out = Vec::with_capacity(x.len());
    for row in rows.outer_iter() {
        let mean = if rms { 0.0 } else { row.sum() / inner as f32 };
        let var = row.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / inner as f32;
        let denom = (var + 1e-5).sqrt();
        for (j, v) in row.iter().enumerate() {
            out.push((v - mean) / denom * gamma[j % gamma.len()] + beta[j % beta.len()]);
        }
    }
    ArrayD::from_shape_vec(IxDyn(&dims), out).expect("normalize shape")
}

fn softmax(x: &ArrayD<f32>, axis: i64) -> ArrayD<f32> {
    let axis = normalize_axis(axis, x.ndim());
    let mut out = x.clone();
    for mut lane in out.lanes_mut(Axis(axis)) {
        let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
    out
}

fn matmul(a: &ArrayD<f32>, b: &ArrayD<f32>) -> ArrayD<f32> {
    let dims = a.shape().to_vec();
    let k = *dims.last().expect("matmul lhs rank");
    let rhs = b.clone().into_dimensionality::<Ix2>().expect("matmul rhs must be 2-D");
    let lhs = reshape(a, &[a.len() / k, k]).into_dimensionality::<Ix2>().expect("2-D");
    let product = lhs.dot(&rhs);
    let mut out_dims = dims[..dims.len() - 1].to_vec();
    out_dims.push(rhs.ncols());
    reshape(&product.into_dyn(), &out_dims)
}

fn reduce<T: Clone>(a: &ArrayD<T>, axes: &[i64], keepdims: bool, f: impl Fn(ndarray::ArrayViewD<'_, T>) -> T) -> ArrayD<T> {
    let mut axes: Vec<usize> = axes.iter().map(|&x| normalize_axis(x, a.ndim())).collect();
    axes.sort_unstable_by(|x, y| y.cmp(x));
    let mut out = a.clone();
    for axis in axes {
        out = out.map_axis(Axis(axis), |lane| f(lane.into_dyn()));
        if keepdims {
            out = out.insert_axis(Axis(axis));
        }
    }
    out
}

fn nonzero(mask: &ArrayD<f64>) -> ArrayD<i64> {
    let rank = mask.ndim();
    let hits: Vec<Vec<usize>> = mask
        .indexed_iter()
        .filter(|(_, v)| **v != 0.0)
        .map(|(ix, _)| ix.slice().to_vec())
        .collect();
    let mut out = ArrayD::zeros(IxDyn(&[rank, hits.len()]));
    for (col, ix) in hits.iter().enumerate() {
        for (row, &i) in ix.iter().enumerate() {
            out[[row, col]] = i as i64;
        }
    }
    out
}

fn i64_vec(value: &Value) -> Vec<i64> {
    value.i64().iter().copied().collect()
}

fn eval_node(op: &OpKind, inputs: &[Option<&Value>], outputs: usize) -> Vec<Value> {
    let arg = |i: usize| inputs[i].unwrap_or_else(|| panic!("{} input {i} missing", op.op_type()));
    let single = |v: Value| vec![v];
    match op {
        OpKind::Embedding => {
            let table = arg(0).f32();
            let tokens = arg(1).i64();
            let hidden = table.shape()[1];
            let mut data = Vec::with_capacity(tokens.len() * hidden);
            for &t in tokens.iter() {
                data.extend(table.index_axis(Axis(0), t as usize).iter().copied());
            }
            let mut dims = tokens.shape().to_vec();
            dims.push(hidden);
            single(Value::F32(ArrayD::from_shape_vec(IxDyn(&dims), data).expect("embedding")))
        }
        OpKind::Add => single(Value::F32(arg(0).f32() + arg(1).f32())),
        OpKind::Sub => single(Value::F32(arg(0).f32() - arg(1).f32())),
        OpKind::Mul => single(Value::F32(arg(0).f32() * arg(1).f32())),
        OpKind::BiasGelu => single(Value::F32((arg(0).f32() + arg(1).f32()).mapv(gelu))),
        OpKind::Gelu => single(Value::F32(arg(0).f32().mapv(gelu))),
        OpKind::LayerNormalization { axis } => single(Value::F32(normalize(
            arg(0).f32(),
            *axis,
            arg(1).f32(),
            inputs.get(2).copied().flatten().map(Value::f32),
            false,
        ))),
        OpKind::SimplifiedLayerNormalization { axis } => {
            single(Value::F32(normalize(arg(0).f32(), *axis, arg(1).f32(), None, true)))
        }
        OpKind::Dropout => {
            let x = arg(0).clone();
            let mask = Value::Bool(ArrayD::from_elem(IxDyn(&x.dims()), true));
            vec![x, mask].into_iter().take(outputs).collect()
        }
        OpKind::Cast { to } => single(Value::from_f64(arg(0).to_f64(), *to)),
        OpKind::MatMul => single(Value::F32(matmul(arg(0).f32(), arg(1).f32()))),
        OpKind::Softmax { axis } => single(Value::F32(softmax(arg(0).f32(), *axis))),
        OpKind::ReduceMean { axes, keepdims } => single(Value::F32(reduce(
            arg(0).f32(),
            axes,
            *keepdims,
            |lane| lane.mean().unwrap_or(0.0),
        ))),
        OpKind::ReduceMax { axes, keepdims } => single(match arg(0) {
            Value::I32(a) => Value::I32(reduce(a, axes, *keepdims, |lane| {
                lane.iter().copied().max().unwrap_or(i32::MIN)
            })),
            Value::F32(a) => Value::F32(reduce(a, axes, *keepdims, |lane| {
                lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v))
            })),
            other => panic!("ReduceMax on {other:?}"),
        }),
        OpKind::Reshape => {
            let x = arg(0);
            let requested = i64_vec(arg(1));
            let total: usize = x.dims().iter().product();
            let known: usize = requested.iter().filter(|&&d| d >= 0).map(|&d| d as usize).product();
            let dims: Vec<usize> = requested
                .iter()
                .map(|&d| if d < 0 { total / known.max(1) } else { d as usize })
                .collect();
            single(each!(x, a => reshape(a, &dims)))
        }
        OpKind::Shape => {
            let dims: Vec<i64> = arg(0).dims().iter().map(|&d| d as i64).collect();
            single(Value::I64(ArrayD::from_shape_vec(IxDyn(&[dims.len()]), dims).expect("shape")))
        }
        OpKind::Gather { axis } => {
            let x = arg(0);
            let axis = normalize_axis(*axis, x.dims().len());
            let rows: Vec<usize> = arg(1).i64().iter().map(|&i| i as usize).collect();
            single(each!(x, a => a.select(Axis(axis), &rows)))
        }
        OpKind::Concat { axis } => {
            let parts: Vec<_> = (0..inputs.len()).map(|i| arg(i).i64().view()).collect();
            let axis = normalize_axis(*axis, parts[0].ndim());
            single(Value::I64(ndarray::concatenate(Axis(axis), &parts).expect("concat")))
        }
        OpKind::Expand => {
            let target: Vec<usize> = i64_vec(arg(1)).iter().map(|&d| d as usize).collect();
            single(each!(arg(0), a => expand(a, &target)))
        }
        OpKind::Equal => {
            let (a, b) = (arg(0).to_f64(), arg(1).to_f64());
            let shape = broadcast_dims(a.shape(), b.shape());
            let a = a.broadcast(IxDyn(&shape)).expect("equal lhs");
            let b = b.broadcast(IxDyn(&shape)).expect("equal rhs");
            single(Value::Bool(Zip::from(&a).and(&b).map_collect(|x, y| x == y)))
        }
        OpKind::Not => match arg(0) {
            Value::Bool(a) => single(Value::Bool(a.mapv(|x| !x))),
            other => panic!("Not on {other:?}"),
        },
        OpKind::NonZero => single(Value::I64(nonzero(&arg(0).to_f64()))),
        OpKind::Squeeze { axes } => {
            let x = arg(0);
            let rank = x.dims().len();
            let mut axes: Vec<usize> = axes.iter().map(|&a| normalize_axis(a, rank)).collect();
            axes.sort_unstable_by(|x, y| y.cmp(x));
            single(each!(x, a => {
                let mut out = a.clone();
                for &axis in &axes {
                    out = out.index_axis_move(Axis(axis), 0);
                }
                out
            }))
        }
        OpKind::FlattenAndUnpad => {
            let x = arg(0);
            let index = arg(1).i64();
            let dims = x.dims();
            let leading = Value::I64(
                ArrayD::from_shape_vec(IxDyn(&[2]), vec![dims[0] as i64, dims[1] as i64]).expect("leading"),
            );
            vec![each!(x, a => unpad(a, index)), leading].into_iter().take(outputs).collect()
        }
        OpKind::PadAndUnflatten => {
            let (index, leading) = (arg(1).i64(), arg(2).i64());
            single(each!(arg(0), a => pad(a, index, leading)))
        }
        other => panic!("reference interpreter does not support {}", other.op_type()),
    }
}

/// Run `graph` on `feeds` (by graph input name); returns every computed
/// value by edge name.
#[allow(dead_code)]
pub fn evaluate(graph: &Graph, feeds: &[(&str, Value)]) -> HashMap<String, Value> {
    let mut values: HashMap<EdgeId, Value> = graph
        .initializers
        .iter()
        .map(|(&id, data)| (id, Value::from_constant(data)))
        .collect();
    for (name, value) in feeds {
        let id = graph
            .edge_by_name(name)
            .unwrap_or_else(|| panic!("no graph input named '{name}'"));
        values.insert(id, value.clone());
    }

    for id in graph.topological_order() {
        let node = graph.node(id);
        let inputs: Vec<Option<&Value>> = node
            .inputs
            .iter()
            .map(|slot| slot.map(|e| values.get(&e).unwrap_or_else(|| panic!("'{}' not computed", graph.edge(e).name))))
            .collect();
        let outputs = eval_node(&node.op, &inputs, node.outputs.len());
        for (&edge, value) in node.outputs.iter().zip(outputs) {
            values.insert(edge, value);
        }
    }

    values
        .into_iter()
        .map(|(id, value)| (graph.edge(id).name.clone(), value))
        .collect()
}

/// Token ids `[batch, seq]` where row `b` has `lengths[b]` leading
/// non-padding tokens and zero padding after them.
#[allow(dead_code)]
pub fn padded_tokens(seq: usize, lengths: &[usize], vocab: usize) -> ArrayD<i64> {
    let mut tokens = ArrayD::zeros(IxDyn(&[lengths.len(), seq]));
    for (b, &len) in lengths.iter().enumerate() {
        for s in 0..len.min(seq) {
            tokens[[b, s]] = 1 + ((b * 7 + s * 3) % (vocab - 1)) as i64;
        }
    }
    tokens
}

/// Deterministic `f32` tensor with values in `[-1, 1]`.
#[allow(dead_code)]
pub fn pattern(dims: &[usize], seed: usize) -> ArrayD<f32> {
    let len: usize = dims.iter().product();
    let data = (0..len)
        .map(|i| (((i * 31 + seed * 17) % 23) as f32 - 11.0) / 11.0)
        .collect();
    ArrayD::from_shape_vec(IxDyn(dims), data).expect("pattern")
}

/// Add an `f32` initializer holding [`pattern`] data.
#[allow(dead_code)]
pub fn f32_const(graph: &mut Graph, name: &str, dims: &[usize], seed: usize) -> EdgeId {
    let data = pattern(dims, seed);
    graph.add_initializer(
        name,
        TensorData {
            dims: dims.iter().map(|&d| d as u64).collect(),
            values: TensorValues::F32(data.iter().copied().collect()),
        },
    )
}

/// Append a single-output node and return its output edge.
#[allow(dead_code)]
pub fn op(graph: &mut Graph, op: OpKind, inputs: &[EdgeId], out: &str, shape: Option<TensorShape>) -> EdgeId {
    let edge = graph.add_edge(out, Some(DataType::F32), shape);
    graph
        .add_node(NodeSpec::new(op, out).inputs(inputs.iter().copied()).outputs([edge]))
        .expect("node should be valid");
    edge
}

/// A graph seeded by an embedding over `input_ids`.
#[allow(dead_code)]
pub struct Model {
    pub graph: Graph,
    pub ids: EdgeId,
    pub embedded: EdgeId,
    pub hidden: TensorShape,
}

/// `input_ids` → embedding over a `[vocab, hidden]` table with padding 0.
#[allow(dead_code)]
pub fn embedding_model(tokens: TensorShape, vocab: usize, hidden: usize) -> Model {
    let mut graph = Graph::new();
    let ids = graph
        .add_input("input_ids", DataType::I64, tokens.clone())
        .expect("fresh graph");
    let table = f32_const(&mut graph, "embedding_table", &[vocab, hidden], 1);
    let pad = graph.add_initializer("padding_idx", TensorData::scalar_i64(0));
    let hidden_shape = TensorShape::new(
        tokens
            .dims
            .iter()
            .cloned()
            .chain([Dimension::Fixed(hidden as u64)]),
    );
    let embedded = graph.add_edge("embedded", Some(DataType::F32), Some(hidden_shape.clone()));
    graph
        .add_node(
            NodeSpec::new(OpKind::Embedding, "embedding")
                .inputs([table, ids, pad])
                .outputs([embedded]),
        )
        .expect("embedding node");
    Model {
        graph,
        ids,
        embedded,
        hidden: hidden_shape,
    }
}

/// The elimination pass configured for `input_ids`.
#[allow(dead_code)]
pub fn padding_pass() -> PaddingElimination {
    PaddingElimination::new(PaddingEliminationConfig::default().with_sparse_input("input_ids"))
}

/// Assert two float tensors agree elementwise within `tol`.
#[allow(dead_code)]
pub fn assert_close(actual: &ArrayD<f32>, expected: &ArrayD<f32>, tol: f32) {
    assert_eq!(actual.shape(), expected.shape(), "shape mismatch");
    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!((a - e).abs() <= tol, "element {i}: {a} vs {e}");
    }
}
