//! Per-node classification rules for region propagation.
//!
//! Each node reached from the anchor is either absorbed into the padded
//! region ([`Verdict::Propagate`]) or marks where the region ends
//! ([`Verdict::Boundary`]). Classification never mutates the graph.

use std::collections::BTreeSet;
use std::fmt;

use padelim_ir::{EdgeId, Graph, Node, NodeId, OpKind};

use super::instrument::{INCREMENT_STEP_FUNC, INSPECT_ACTIVATION_FUNC};
use crate::error::PassError;

/// Whether the pass rewrites the region or only patches inspection hooks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Eliminate,
    Inspect,
}

/// What the pass must remember about an instrumentation hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HookSite {
    /// Rank of output 0 for inspect-activation hooks.
    pub inspect_rank: Option<usize>,
    /// Rank attributes are decremented during the rewrite.
    pub adjust_ranks: bool,
}

/// Effects of absorbing a node into the region.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Propagation {
    /// Outputs that become members.
    pub members: Vec<EdgeId>,
    /// Output 0 is restored and re-filtered around the node.
    pub pass_through: bool,
    /// Non-member operands must be filtered on entry.
    pub entry: bool,
    pub hook: Option<HookSite>,
}

/// Why a node ends the region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoundaryReason {
    NoMemberInput,
    MissingOperand,
    UnknownOperandShape,
    OperandRankMismatch { member: usize, other: usize },
    FirstInputNotMember,
    UnknownInputShape,
    NormalizationAxis(i64),
    ReduceAxes(Vec<i64>),
    MatMulLeftRank(Option<usize>),
    MatMulRightOperand,
    UnrecognizedHook(String),
    MissingHookOutput,
    UnsupportedOp(String),
}

impl fmt::Display for BoundaryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMemberInput => write!(f, "no operand in region"),
            Self::MissingOperand => write!(f, "operand slot is empty"),
            Self::UnknownOperandShape => write!(f, "operand shape unknown"),
            Self::OperandRankMismatch { member, other } => {
                write!(f, "outside operand rank {other} exceeds region operand rank {member}")
            }
            Self::FirstInputNotMember => write!(f, "first input not in region"),
            Self::UnknownInputShape => write!(f, "first input shape unknown"),
            Self::NormalizationAxis(axis) => write!(f, "normalizes over axis {axis}"),
            Self::ReduceAxes(axes) => write!(f, "reduces over axes {axes:?}"),
            Self::MatMulLeftRank(Some(rank)) => write!(f, "left operand rank {rank} too small"),
            Self::MatMulLeftRank(None) => write!(f, "left operand rank unknown"),
            Self::MatMulRightOperand => write!(f, "only right operand in region"),
            Self::UnrecognizedHook(name) => write!(f, "unrecognized hook '{name}'"),
            Self::MissingHookOutput => write!(f, "hook has no value output"),
            Self::UnsupportedOp(op) => write!(f, "{op} is not supported"),
        }
    }
}

/// Result of classifying one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Propagate(Propagation),
    Boundary(BoundaryReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Rule {
    ElementwiseBinary,
    Normalization,
    Dropout,
    Unary,
    MatMul,
    Hook,
    ReduceMean,
    Unsupported,
}

fn rule_for(op: &OpKind) -> Rule {
    match op {
        OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::BiasGelu => Rule::ElementwiseBinary,
        OpKind::LayerNormalization { .. } | OpKind::SimplifiedLayerNormalization { .. } => {
            Rule::Normalization
        }
        OpKind::Dropout => Rule::Dropout,
        OpKind::Cast { .. } | OpKind::Gelu => Rule::Unary,
        OpKind::MatMul | OpKind::MatMulBnb4 => Rule::MatMul,
        OpKind::PythonOp { .. } => Rule::Hook,
        OpKind::ReduceMean { .. } => Rule::ReduceMean,
        _ => Rule::Unsupported,
    }
}

/// Classify `node` against the current member set.
pub fn classify(
    graph: &Graph,
    node: NodeId,
    members: &BTreeSet<EdgeId>,
    mode: Mode,
) -> Result<Verdict, PassError> {
    let ctx = Context {
        graph,
        node: graph.node(node),
        members,
    };
    match rule_for(&ctx.node.op) {
        Rule::ElementwiseBinary => Ok(ctx.elementwise()),
        Rule::Normalization => Ok(ctx.normalization()),
        Rule::Dropout => Ok(ctx.dropout()),
        Rule::Unary => Ok(ctx.unary()),
        Rule::MatMul => ctx.matmul(),
        Rule::Hook => ctx.hook(mode),
        Rule::ReduceMean => Ok(ctx.reduce_mean()),
        Rule::Unsupported => Ok(Verdict::Boundary(BoundaryReason::UnsupportedOp(
            ctx.node.op.op_type().to_string(),
        ))),
    }
}

struct Context<'a> {
    graph: &'a Graph,
    node: &'a Node,
    members: &'a BTreeSet<EdgeId>,
}

impl Context<'_> {
    fn is_member(&self, edge: Option<EdgeId>) -> bool {
        edge.is_some_and(|e| self.members.contains(&e))
    }

    fn rank(&self, edge: EdgeId) -> Option<usize> {
        self.graph.edge(edge).rank()
    }

    fn first_output(&self, pass_through: bool, entry: bool) -> Verdict {
        Verdict::Propagate(Propagation {
            members: self.node.output(0).into_iter().collect(),
            pass_through,
            entry,
            hook: None,
        })
    }

    fn elementwise(&self) -> Verdict {
        let (Some(lhs), Some(rhs)) = (self.node.input(0), self.node.input(1)) else {
            return Verdict::Boundary(BoundaryReason::MissingOperand);
        };
        let (lhs_member, rhs_member) = (self.is_member(Some(lhs)), self.is_member(Some(rhs)));
        if !lhs_member && !rhs_member {
            return Verdict::Boundary(BoundaryReason::NoMemberInput);
        }
        let (Some(lhs_rank), Some(rhs_rank)) = (self.rank(lhs), self.rank(rhs)) else {
            return Verdict::Boundary(BoundaryReason::UnknownOperandShape);
        };
        if !lhs_member && lhs_rank > rhs_rank {
            return Verdict::Boundary(BoundaryReason::OperandRankMismatch {
                member: rhs_rank,
                other: lhs_rank,
            });
        }
        if !rhs_member && rhs_rank > lhs_rank {
            return Verdict::Boundary(BoundaryReason::OperandRankMismatch {
                member: lhs_rank,
                other: rhs_rank,
            });
        }
        self.first_output(true, true)
    }

    fn normalization(&self) -> Verdict {
        let axis = match self.node.op {
            OpKind::LayerNormalization { axis } | OpKind::SimplifiedLayerNormalization { axis } => {
                axis
            }
            _ => unreachable!("normalization rule applied to {}", self.node.op.op_type()),
        };
        let input = self.node.input(0);
        if !self.is_member(input) {
            return Verdict::Boundary(BoundaryReason::FirstInputNotMember);
        }
        let Some(rank) = input.and_then(|e| self.rank(e)) else {
            return Verdict::Boundary(BoundaryReason::UnknownInputShape);
        };
        if normalize_axis(axis, rank) < 2 {
            return Verdict::Boundary(BoundaryReason::NormalizationAxis(axis));
        }
        self.first_output(true, false)
    }

    fn dropout(&self) -> Verdict {
        if !self.is_member(self.node.input(0)) {
            return Verdict::Boundary(BoundaryReason::FirstInputNotMember);
        }
        Verdict::Propagate(Propagation {
            members: self.node.outputs.clone(),
            ..Propagation::default()
        })
    }

    fn unary(&self) -> Verdict {
        if !self.is_member(self.node.input(0)) {
            return Verdict::Boundary(BoundaryReason::FirstInputNotMember);
        }
        self.first_output(true, false)
    }

    fn matmul(&self) -> Result<Verdict, PassError> {
        let lhs = self.node.input(0);
        if self.is_member(lhs) {
            return Ok(match lhs.and_then(|e| self.rank(e)) {
                Some(rank) if rank > 2 => self.first_output(true, false),
                rank => Verdict::Boundary(BoundaryReason::MatMulLeftRank(rank)),
            });
        }
        if self.is_member(self.node.input(1)) {
            return Ok(Verdict::Boundary(BoundaryReason::MatMulRightOperand));
        }
        Err(PassError::MatMulWithoutMemberInput {
            node: self.node.name.clone(),
        })
    }

    fn hook(&self, mode: Mode) -> Result<Verdict, PassError> {
        if !self.is_member(self.node.input(0)) {
            return Ok(Verdict::Boundary(BoundaryReason::FirstInputNotMember));
        }
        let OpKind::PythonOp { func_name } = &self.node.op else {
            unreachable!("hook rule applied to {}", self.node.op.op_type());
        };
        let func_name = func_name
            .as_deref()
            .ok_or_else(|| PassError::MissingAttribute {
                node: self.node.name.clone(),
                attribute: "func_name",
            })?;

        let inspect = func_name == INSPECT_ACTIVATION_FUNC;
        if !inspect && func_name != INCREMENT_STEP_FUNC {
            return Ok(Verdict::Boundary(BoundaryReason::UnrecognizedHook(
                func_name.to_string(),
            )));
        }
        let Some(value) = self.node.output(1) else {
            return Ok(Verdict::Boundary(BoundaryReason::MissingHookOutput));
        };

        let inspect_rank = if inspect {
            self.node.output(0).and_then(|e| self.rank(e))
        } else {
            None
        };
        if mode == Mode::Eliminate {
            for attribute in ["input_tensor_ranks", "output_tensor_ranks"] {
                single_rank(self.node, attribute)?;
            }
        }

        Ok(Verdict::Propagate(Propagation {
            members: vec![value],
            hook: Some(HookSite {
                inspect_rank,
                adjust_ranks: mode == Mode::Eliminate,
            }),
            ..Propagation::default()
        }))
    }

    fn reduce_mean(&self) -> Verdict {
        let OpKind::ReduceMean { axes, .. } = &self.node.op else {
            unreachable!("reduce rule applied to {}", self.node.op.op_type());
        };
        let input = self.node.input(0);
        if !self.is_member(input) {
            return Verdict::Boundary(BoundaryReason::FirstInputNotMember);
        }
        let Some(rank) = input.and_then(|e| self.rank(e)) else {
            return Verdict::Boundary(BoundaryReason::UnknownInputShape);
        };
        if axes.is_empty() || axes.iter().any(|&axis| normalize_axis(axis, rank) < 2) {
            return Verdict::Boundary(BoundaryReason::ReduceAxes(axes.clone()));
        }
        self.first_output(false, false)
    }
}

/// Map a possibly negative axis into `0..rank` space.
pub(crate) fn normalize_axis(axis: i64, rank: usize) -> i64 {
    if axis < 0 { axis + rank as i64 } else { axis }
}

/// Read a rank attribute that must hold exactly one value of at least 2.
pub(crate) fn single_rank(node: &Node, attribute: &'static str) -> Result<i64, PassError> {
    let values = node
        .attribute(attribute)
        .ok_or_else(|| PassError::MissingAttribute {
            node: node.name.clone(),
            attribute,
        })?
        .as_ints()
        .ok_or_else(|| PassError::InvalidAttribute {
            node: node.name.clone(),
            attribute,
            reason: "expected an integer list".into(),
        })?;
    match values {
        [rank] if *rank >= 2 => Ok(*rank),
        _ => Err(PassError::InvalidAttribute {
            node: node.name.clone(),
            attribute,
            reason: format!("expected a single rank of at least 2, got {values:?}"),
        }),
    }
}
