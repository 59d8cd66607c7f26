//! Shape-grammar compiler and runtime.
//!
//! A small domain-specific grammar language for procedurally deriving
//! placement instructions. The pipeline has three phases, each a single
//! blocking call:
//!
//! 1. [`compile`] — source text → scanner → table parser → grammar AST
//! 2. [`derive`] — bounded, seeded stochastic expansion of the AST into a
//!    concrete [`DerivationTree`](runtime::DerivationTree)
//! 3. [`execute`] — depth-first walk of the tree, composing scopes and
//!    invoking host capabilities ([`Host`](runtime::Host)) for placement
//!
//! The scanner and the SLR(1) parser generator ([`grammar`], [`parser`])
//! are grammar-agnostic and reusable; [`syntax`] instantiates them for the
//! shape language.

pub mod ast;
pub mod error;
pub mod expr;
pub mod grammar;
pub mod parser;
pub mod runtime;
pub mod scanner;
pub mod syntax;
pub mod token;

pub use ast::{GlobalDefines, Producer, Root, RuleTemplate};
pub use error::{
    DeriveError, EvalError, ExecError, GrammarError, LexError, ParseError, RunError,
};
pub use expr::{Expr, Value};
pub use runtime::{
    derive, execute, DerivationTree, DeriveParams, ExecutionReport, Generator, Host,
    InstanceHandle, ShapeHandle,
};
pub use shapegram_geom::{Axis, Scope};
pub use syntax::compile;
