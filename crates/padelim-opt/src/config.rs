//! Padding elimination configuration.

use std::collections::BTreeSet;

use serde::Deserialize;

/// Settings for [`PaddingElimination`](crate::PaddingElimination).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PaddingEliminationConfig {
    /// Graph input names that may be treated as sparse embedding tokens.
    pub sparse_embedding_inputs: BTreeSet<String>,
    /// `true` rewrites the region; `false` only patches inspection hooks.
    pub enable_elimination: bool,
    /// Execution targets the embedding may be assigned to. Empty accepts any.
    pub compatible_targets: BTreeSet<String>,
}

impl Default for PaddingEliminationConfig {
    fn default() -> Self {
        Self {
            sparse_embedding_inputs: BTreeSet::new(),
            enable_elimination: true,
            compatible_targets: BTreeSet::new(),
        }
    }
}

impl PaddingEliminationConfig {
    pub fn with_sparse_input(mut self, name: impl Into<String>) -> Self {
        self.sparse_embedding_inputs.insert(name.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.compatible_targets.insert(target.into());
        self
    }

    /// Switch to inspect-only mode.
    pub fn inspect_only(mut self) -> Self {
        self.enable_elimination = false;
        self
    }

    /// Returns `true` if a node assigned to `target` may be rewritten.
    pub fn accepts_target(&self, target: Option<&str>) -> bool {
        if self.compatible_targets.is_empty() {
            return true;
        }
        target.is_some_and(|t| self.compatible_targets.contains(t))
    }
}
