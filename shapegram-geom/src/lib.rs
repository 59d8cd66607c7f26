//! Geometry support for the shapegram grammar runtime.
//!
//! The central type is [`Scope`]: the composable position/rotation/scale
//! state that the execution engine propagates down a derivation tree.

pub mod scope;

pub use scope::{Axis, Scope};

/// Scalar type used throughout the geometry crate.
pub type Scalar = f64;

/// Tolerance for floating-point comparisons in tests and invariant checks.
pub const EPSILON: Scalar = 1e-9;

/// Threshold below which a vector is considered degenerate.
pub const NEAR_ZERO: Scalar = 1e-12;
