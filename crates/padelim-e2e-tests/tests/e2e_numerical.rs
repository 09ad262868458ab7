//! Numerical equivalence of rewritten graphs.
//!
//! Original and rewritten graphs run on the reference interpreter. Padded
//! positions are zero-filled by restores, so outputs are compared against
//! the original with padded tokens masked out.

mod common;

use common::Value;
use ndarray::{ArrayD, Axis, IxDyn};
use padelim_ir::{DataType, Graph, OpKind, TensorShape};

const SEQ: usize = 8;
const HIDDEN: usize = 4;
const VOCAB: usize = 11;

/// `embedded + other`, with `sum` as the graph output.
fn add_graph(other_dims: &[u64]) -> Graph {
    let mut model = common::embedding_model(TensorShape::fixed(&[2, SEQ as u64]), VOCAB, HIDDEN);
    let graph = &mut model.graph;
    let other = graph
        .add_input("other", DataType::F32, TensorShape::fixed(other_dims))
        .unwrap();
    let sum = common::op(graph, OpKind::Add, &[model.embedded, other], "sum", Some(model.hidden.clone()));
    graph.outputs.push(sum);
    model.graph
}

/// `[B, S, H]` copy of `values` with rows of padding tokens zeroed.
fn masked(values: &ArrayD<f32>, tokens: &ArrayD<i64>) -> ArrayD<f32> {
    let mut out = values.clone();
    for ((b, s), &token) in tokens.clone().into_dimensionality::<ndarray::Ix2>().unwrap().indexed_iter() {
        if token == 0 {
            out.index_axis_mut(Axis(0), b).index_axis_mut(Axis(0), s).fill(0.0);
        }
    }
    out
}

fn rewritten(graph: &Graph) -> Graph {
    let mut graph = graph.clone();
    let report = common::padding_pass().run_with_report(&mut graph).unwrap();
    assert!(report.modified);
    graph
}

fn run_pair(graph: &Graph, other: &ArrayD<f32>, lengths: &[usize], output: &str) -> (ArrayD<f32>, ArrayD<f32>, ArrayD<i64>) {
    let tokens = common::padded_tokens(SEQ, lengths, VOCAB);
    let feeds = [
        ("input_ids", Value::I64(tokens.clone())),
        ("other", Value::F32(other.clone())),
    ];
    let expected = common::evaluate(graph, &feeds)[output].f32().clone();
    let actual = common::evaluate(&rewritten(graph), &feeds)[output].f32().clone();
    (actual, expected, tokens)
}

#[test]
fn add_round_trip_over_padding_patterns() {
    let graph = add_graph(&[2, SEQ as u64, HIDDEN as u64]);
    let other = common::pattern(&[2, SEQ, HIDDEN], 3);

    for lengths in [[8, 8], [5, 3], [1, 7], [0, 4], [0, 0]] {
        let (actual, expected, tokens) = run_pair(&graph, &other, &lengths, "sum");
        common::assert_close(&actual, &masked(&expected, &tokens), 1e-6);
    }
}

#[test]
fn broadcast_operand_is_expanded_before_filtering() {
    let graph = add_graph(&[1, SEQ as u64, HIDDEN as u64]);
    let mut pass_graph = graph.clone();
    let report = common::padding_pass().run_with_report(&mut pass_graph).unwrap();
    assert_eq!(report.counters.expanded_inputs, 1);

    let other = common::pattern(&[1, SEQ, HIDDEN], 5);
    for lengths in [[6, 2], [8, 0]] {
        let (actual, expected, tokens) = run_pair(&graph, &other, &lengths, "sum");
        common::assert_close(&actual, &masked(&expected, &tokens), 1e-6);
    }
}

#[test]
fn exit_node_sees_original_values_at_valid_positions() {
    let mut graph = add_graph(&[2, SEQ as u64, HIDDEN as u64]);
    let sum = graph.outputs.pop().unwrap();
    let shape = graph.edge(sum).shape.clone();
    let probs = common::op(&mut graph, OpKind::Softmax { axis: -1 }, &[sum], "probs", shape);
    graph.outputs.push(probs);

    let other = common::pattern(&[2, SEQ, HIDDEN], 7);
    let lengths = [3, 6];
    let (actual, expected, tokens) = run_pair(&graph, &other, &lengths, "probs");
    for b in 0..2 {
        for s in 0..lengths[b] {
            assert_ne!(tokens[[b, s]], 0);
            let got = actual.index_axis(Axis(0), b).index_axis(Axis(0), s).to_owned();
            let want = expected.index_axis(Axis(0), b).index_axis(Axis(0), s).to_owned();
            common::assert_close(&got.into_dyn(), &want.into_dyn(), 1e-6);
        }
    }
}

#[test]
fn valid_index_lists_flattened_token_positions() {
    let graph = rewritten(&add_graph(&[2, SEQ as u64, HIDDEN as u64]));
    let tokens = common::padded_tokens(SEQ, &[2, 3], VOCAB);
    let values = common::evaluate(
        &graph,
        &[
            ("input_ids", Value::I64(tokens)),
            ("other", Value::F32(ArrayD::zeros(IxDyn(&[2, SEQ, HIDDEN])))),
        ],
    );
    let index: Vec<i64> = values["valid_token_index"].i64().iter().copied().collect();
    assert_eq!(index, vec![0, 1, 8, 9, 10]);
}
