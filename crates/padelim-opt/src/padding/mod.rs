//! Padding elimination.
//!
//! Transformer inputs are padded to a common `[batch, sequence]` size, so a
//! large share of the work downstream of the token embedding is spent on
//! padding tokens. This pass finds the embedding, grows the region of
//! operators that treat every token independently, and rewrites that
//! region to operate on `[valid_tokens, ...]` tensors instead. Values are
//! filtered on entry and scattered back to their padded layout wherever
//! they leave the region.
//!
//! The pass runs in two phases. Classification is read-only and every
//! fatal condition is detected there; only then is the graph mutated.

mod anchor;
mod boundary;
mod classify;
mod instrument;
mod propagate;
mod shapes;
mod valid_index;

use std::collections::BTreeSet;

use log::{debug, info};
use padelim_ir::{EdgeId, Graph, NodeId};

pub use anchor::{Anchor, find_anchor};
pub use boundary::{BoundaryCounters, BoundaryRewriter};
pub use classify::{BoundaryReason, HookSite, Mode, Propagation, Verdict, classify};
pub use instrument::{INCREMENT_STEP_FUNC, INSPECT_ACTIVATION_FUNC, INSPECT_UNPAD_ACTIVATION_FUNC};
pub use propagate::{Region, propagate};
pub use valid_index::{ValidIndex, valid_dim_name};

use crate::GraphPass;
use crate::config::PaddingEliminationConfig;
use crate::error::PassError;

/// What a run of [`PaddingElimination`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EliminationReport {
    pub modified: bool,
    pub anchor: Option<NodeId>,
    /// Symbolic dim standing for the valid token count.
    pub valid_dim: Option<String>,
    /// Edges now carrying `[valid, ...]` values.
    pub members: BTreeSet<EdgeId>,
    pub counters: BoundaryCounters,
    /// Inspectors replaced in inspect-only mode.
    pub patched_hooks: usize,
    /// Hooks whose rank attributes were decremented.
    pub adjusted_hooks: usize,
}

/// Removes padding tokens from the embedding-rooted region of a graph.
#[derive(Debug, Clone)]
pub struct PaddingElimination {
    config: PaddingEliminationConfig,
}

impl PaddingElimination {
    pub fn new(config: PaddingEliminationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PaddingEliminationConfig {
        &self.config
    }

    /// Run the pass and describe what changed.
    ///
    /// Returns an unmodified report when the pass does not apply. On error
    /// the graph has not been touched unless the error is an [`IrError`]
    /// raised mid-rewrite.
    ///
    /// [`IrError`]: padelim_ir::IrError
    pub fn run_with_report(&self, graph: &mut Graph) -> Result<EliminationReport, PassError> {
        if self.config.sparse_embedding_inputs.is_empty() {
            debug!("padding elimination: no sparse embedding inputs configured");
            return Ok(EliminationReport::default());
        }
        let Some(anchor) = find_anchor(graph, &self.config) else {
            debug!("padding elimination: no eligible embedding found");
            return Ok(EliminationReport::default());
        };

        let mode = if self.config.enable_elimination {
            Mode::Eliminate
        } else {
            Mode::Inspect
        };
        let region = propagate(graph, &anchor, mode)?;

        match mode {
            Mode::Inspect => inspect(graph, &anchor, &region),
            Mode::Eliminate => eliminate(graph, &anchor, &region),
        }
    }
}

fn inspect(graph: &mut Graph, anchor: &Anchor, region: &Region) -> Result<EliminationReport, PassError> {
    if region.inspect_ranks().next().is_none() {
        debug!("padding elimination: no activation inspectors in region");
        return Ok(EliminationReport::default());
    }
    let index = valid_index::build(graph, anchor, false)?;
    let patched = instrument::patch_inspectors(graph, region, &index)?;
    info!("padding elimination: patched {patched} activation inspectors");
    Ok(EliminationReport {
        modified: true,
        anchor: Some(anchor.node),
        valid_dim: Some(index.dim),
        patched_hooks: patched,
        ..EliminationReport::default()
    })
}

fn eliminate(graph: &mut Graph, anchor: &Anchor, region: &Region) -> Result<EliminationReport, PassError> {
    if let Err(bad) = shapes::check_member_shapes(graph, region) {
        debug!(
            "padding elimination: member '{}' has unsupported shape {}, skipping",
            graph.edge(bad.edge).name,
            bad.shape
        );
        return Ok(EliminationReport::default());
    }

    let index = valid_index::build(graph, anchor, true)?;
    let valid = index.valid_dim();
    let graph_outputs: Vec<EdgeId> = graph
        .outputs
        .iter()
        .copied()
        .filter(|&e| region.is_member(e))
        .collect();

    let mut members = region.members.clone();
    let counters = {
        let mut rewriter = BoundaryRewriter::new(graph, &index)?;
        rewriter.filter_anchor(anchor)?;
        for &node in &region.candidate_inputs {
            rewriter.filter_entry(region, node)?;
        }
        for &node in &region.candidate_outputs {
            rewriter.restore_exit(region, node)?;
        }
        for &node in &region.pass_through {
            rewriter.wrap_pass_through(node)?;
        }
        for &edge in &graph_outputs {
            if let Some(inner) = rewriter.restore_graph_output(edge)? {
                members.remove(&edge);
                members.insert(inner);
            }
        }
        rewriter.counters()
    };

    let rewritten = shapes::rewrite_member_shapes(
        graph,
        region
            .members
            .iter()
            .copied()
            .filter(|e| !graph_outputs.contains(e)),
        &valid,
    );
    let adjusted = instrument::decrement_hook_ranks(graph, region)?;

    info!(
        "padding elimination: handled {} inputs, {} outputs, expanded {} inputs",
        counters.handled_inputs, counters.handled_outputs, counters.expanded_inputs
    );
    debug!("padding elimination: rewrote {rewritten} member shapes to leading dim '{valid}'");

    Ok(EliminationReport {
        modified: true,
        anchor: Some(anchor.node),
        valid_dim: Some(index.dim),
        members,
        counters,
        patched_hooks: 0,
        adjusted_hooks: adjusted,
    })
}

impl GraphPass for PaddingElimination {
    fn name(&self) -> &str {
        "padding-elimination"
    }

    fn run(&self, graph: &mut Graph) -> Result<bool, PassError> {
        self.run_with_report(graph).map(|report| report.modified)
    }
}
