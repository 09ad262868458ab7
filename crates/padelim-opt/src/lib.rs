//! Graph optimization passes for padelim.
//!
//! Provides a [`GraphPass`] trait, a [`PassManager`] with fixed-point
//! iteration, the [`PaddingElimination`] pass, and a read-only
//! [`GraphValidation`] pass.

mod config;
mod error;
pub mod padding;
mod validation;

pub use config::PaddingEliminationConfig;
pub use error::PassError;
pub use padding::{EliminationReport, PaddingElimination};
pub use validation::{GraphValidation, validate_graph};

use std::fmt::Debug;

use padelim_ir::Graph;

/// An optimization pass that transforms a graph in place.
pub trait GraphPass: Debug {
    /// Human-readable name of the pass.
    fn name(&self) -> &str;

    /// Run the pass on a graph. Returns `true` if anything was modified.
    fn run(&self, graph: &mut Graph) -> Result<bool, PassError>;
}

/// Maximum number of fixed-point iterations before giving up.
const MAX_ITERATIONS: usize = 10;

/// Runs passes in sequence with fixed-point iteration.
#[derive(Debug)]
pub struct PassManager {
    passes: Vec<Box<dyn GraphPass>>,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    /// Creates an empty pass manager with no passes.
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Padding elimination followed by structural validation.
    pub fn padding_elimination(config: PaddingEliminationConfig) -> Self {
        let mut pm = Self::new();
        pm.add_pass(Box::new(PaddingElimination::new(config)));
        pm.add_pass(Box::new(GraphValidation));
        pm
    }

    /// Adds a pass to the pipeline.
    pub fn add_pass(&mut self, pass: Box<dyn GraphPass>) {
        self.passes.push(pass);
    }

    /// Names of the registered passes, in run order.
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs all passes until a fixed point is reached or the iteration limit.
    ///
    /// Returns `true` if any pass modified the graph. The first pass error
    /// aborts the run; the graph keeps whatever earlier passes did.
    pub fn run(&self, graph: &mut Graph) -> Result<bool, PassError> {
        let mut modified = false;
        for iteration in 0..MAX_ITERATIONS {
            let mut changed = false;
            for pass in &self.passes {
                let pass_changed = pass.run(graph)?;
                if pass_changed {
                    log::debug!("pass '{}' changed the graph (iteration {iteration})", pass.name());
                }
                changed |= pass_changed;
            }
            if !changed {
                break;
            }
            modified = true;
        }
        Ok(modified)
    }
}
