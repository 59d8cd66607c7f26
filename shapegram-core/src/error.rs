//! Error types for the shape-grammar compiler and runtime.
//!
//! The taxonomy splits by phase:
//! - scanning: [`LexError`] (fatal at the first unmatched byte)
//! - parser construction: [`GrammarError`] (ambiguous or unreachable table,
//!   reported as a list so several issues surface at once)
//! - compilation: [`ParseError`] (syntax errors, name collisions)
//! - evaluation: [`EvalError`] (unresolved names, type mismatches)
//! - derivation: [`DeriveError`] (arity mismatches, operation budget)
//! - execution: [`ExecError`]
//!
//! Missing shapes and empty scope-stack pops are recoverable and logged,
//! never returned as errors.

use thiserror::Error;

use crate::token::Span;

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// No registered pattern matched at a byte offset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: unrecognized character")]
pub struct LexError {
    /// The offending span (one byte).
    pub span: Span,
    /// 1-based source line.
    pub line: usize,
}

/// A pattern in the scanner table failed to compile.
#[derive(Debug, Clone, Error)]
#[error("invalid token pattern `{name}`: {message}")]
pub struct LexBuildError {
    /// Name of the offending terminal.
    pub name: String,
    /// Underlying regex error text.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Parser construction
// ---------------------------------------------------------------------------

/// A defect in a grammar table discovered while compiling the parser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    /// Two actions compete for the same (state, lookahead) cell.
    #[error("conflict in state {state} on `{terminal}`: {existing} vs {incoming}")]
    Conflict {
        state: usize,
        terminal: String,
        existing: String,
        incoming: String,
    },

    /// A nonterminal is never reachable from the start symbol.
    #[error("unreachable nonterminal `{name}`")]
    Unreachable { name: String },

    /// A nonterminal has no productions.
    #[error("nonterminal `{name}` has no productions")]
    NoProductions { name: String },
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// A compile-time error with a source line, as surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based source line.
    pub line: usize,
    /// Human-readable description.
    pub message: String,
}

impl ParseError {
    /// Create a new parse error.
    #[must_use]
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Failure inside a semantic action during a reduction.
///
/// The parse driver attaches the current line and converts this into a
/// [`ParseError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ActionError {
    /// Human-readable description.
    pub message: String,
}

impl ActionError {
    /// Create a new action error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Categories of expression-evaluation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    /// A variable reference resolved nowhere along the lexical chain.
    NameNotFound,
    /// A value had the wrong type for an operation or parameter.
    TypeMismatch,
    /// Global definitions reference each other in a cycle.
    CircularReference,
}

/// An expression-evaluation failure. Fatal to the enclosing derivation or
/// execution call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EvalError {
    /// What went wrong.
    pub kind: EvalErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl EvalError {
    /// Create a new evaluation error.
    #[must_use]
    pub fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Convenience constructor for unresolved names.
    #[must_use]
    pub fn name_not_found(name: &str) -> Self {
        Self::new(EvalErrorKind::NameNotFound, format!("name not found: {name}"))
    }

    /// Convenience constructor for type mismatches.
    #[must_use]
    pub fn type_mismatch(expected: &str, found: &str) -> Self {
        Self::new(
            EvalErrorKind::TypeMismatch,
            format!("expected {expected}, found {found}"),
        )
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// A fatal derivation failure. Aborts the whole `derive` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeriveError {
    /// A production reference passed the wrong number of arguments.
    #[error("`{producer}` takes {expected} argument(s), {found} given")]
    ArityMismatch {
        producer: String,
        expected: usize,
        found: usize,
    },

    /// A production reference names no known producer.
    #[error("no producer named `{name}`")]
    UnknownProducer { name: String },

    /// The operation budget was exhausted; distinguishes runaway branching
    /// from silent depth pruning.
    #[error("operation budget exceeded ({limit} nodes)")]
    OperationBudget { limit: usize },

    /// A guard, weight, or argument expression failed to evaluate.
    #[error(transparent)]
    Eval(#[from] EvalError),
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// A fatal execution failure. Aborts the whole `execute` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// An action parameter failed to evaluate.
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Failure of a combined derive-and-execute run (see
/// [`Generator`](crate::runtime::Generator)).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error(transparent)]
    Derive(#[from] DeriveError),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display() {
        let e = ParseError::new(7, "unexpected token `}`");
        assert_eq!(format!("{e}"), "line 7: unexpected token `}`");
    }

    #[test]
    fn eval_error_constructors() {
        let e = EvalError::name_not_found("size");
        assert_eq!(e.kind, EvalErrorKind::NameNotFound);
        assert!(format!("{e}").contains("size"));

        let e = EvalError::type_mismatch("number", "string");
        assert_eq!(e.kind, EvalErrorKind::TypeMismatch);
    }

    #[test]
    fn derive_error_from_eval() {
        let e: DeriveError = EvalError::name_not_found("x").into();
        assert!(matches!(e, DeriveError::Eval(_)));
    }

    #[test]
    fn grammar_error_display() {
        let e = GrammarError::Conflict {
            state: 3,
            terminal: "Name".into(),
            existing: "shift(4)".into(),
            incoming: "reduce(2)".into(),
        };
        let s = format!("{e}");
        assert!(s.contains("state 3"));
        assert!(s.contains("Name"));
    }
}
