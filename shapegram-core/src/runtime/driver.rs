//! Regeneration lifecycle over a compiled grammar.
//!
//! A [`Generator`] owns a compiled grammar and the instance handles of its
//! last run. `regenerate` tears the previous placements down, derives a
//! fresh tree, and executes it — the edit/regenerate loop a hosting scene
//! system drives when grammar source or bounds change.

use shapegram_geom::Scope;

use crate::ast::Root;
use crate::error::RunError;

use super::derive::{derive, DeriveParams};
use super::execute::{execute, Host, InstanceHandle};

/// Drives repeated derive/execute runs of one grammar, destroying the
/// previous run's placements first.
#[derive(Debug)]
pub struct Generator {
    root: Root,
    params: DeriveParams,
    placed: Vec<InstanceHandle>,
}

impl Generator {
    /// Wrap a compiled grammar, taking bounds from its `#define` preamble.
    #[must_use]
    pub fn new(root: Root) -> Self {
        let params = DeriveParams::from_defines(&root.defines);
        Self {
            root,
            params,
            placed: Vec::new(),
        }
    }

    /// Override the derivation bounds for subsequent runs.
    pub fn set_params(&mut self, params: DeriveParams) {
        self.params = params;
    }

    /// The compiled grammar.
    #[must_use]
    pub const fn compiled(&self) -> &Root {
        &self.root
    }

    /// Instances placed by the most recent run.
    #[must_use]
    pub fn placed(&self) -> &[InstanceHandle] {
        &self.placed
    }

    /// Destroy the previous run's placements, then derive and execute
    /// afresh from `root_scope`.
    pub fn regenerate(
        &mut self,
        host: &mut dyn Host,
        root_scope: Scope,
    ) -> Result<&[InstanceHandle], RunError> {
        self.clear(host);
        let mut tree = derive(&self.root, &self.params)?;
        let report = execute(&mut tree, root_scope, host)?;
        self.placed = report.placed;
        Ok(&self.placed)
    }

    /// Destroy everything the last run placed.
    pub fn clear(&mut self, host: &mut dyn Host) {
        for instance in self.placed.drain(..) {
            host.destroy(instance);
        }
    }
}
