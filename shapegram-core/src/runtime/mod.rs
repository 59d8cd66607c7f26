//! The two-phase runtime: derivation and execution.
//!
//! [`derive`] expands a compiled grammar into a concrete
//! [`DerivationTree`] — a bounded, seeded stochastic process. [`execute`]
//! walks that tree depth-first, composing scopes and invoking
//! [`Host`] capabilities for placement. [`Generator`] wraps both phases in
//! a regeneration lifecycle that tears down the previous run's placements.
//!
//! The two phases are deliberately separate: a tree can be derived once
//! and inspected, or executed against different hosts and root scopes.
//! A tree is rebuilt on every `derive` call — it is not reusable across
//! seeds or bounds.

mod derive;
mod driver;
mod execute;


pub use derive::{
    derive, DerivationNode, DerivationTree, DeriveParams, ExpandState, NodeId, NodeKind,
};
pub use driver::Generator;
pub use execute::{execute, ExecutionReport, Host, InstanceHandle, ShapeHandle};
