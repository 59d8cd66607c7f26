//! Expressions: values, operators, and the lazy memoized evaluator.
//!
//! Expressions are a closed tagged enum — literals, variable references,
//! and binary operators — evaluated against an [`Env`] that resolves names
//! along the lexical chain of the derivation tree.
//!
//! Evaluation is memoized per node *instance*: the first result is cached
//! in an interior cell so repeated reads of the same bound expression stay
//! consistent (important once random state is involved). Cloning an
//! expression deep-copies the structure and clears the cache, so templates
//! copied into a derivation never alias each other's values.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use crate::error::EvalError;
use crate::token::Span;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A runtime value: number, string, or boolean.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    /// The value's type name, for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Bool(_) => "bool",
        }
    }

    /// The value as a number.
    pub fn as_number(&self) -> Result<f64, EvalError> {
        match self {
            Self::Number(n) => Ok(*n),
            other => Err(EvalError::type_mismatch("number", other.type_name())),
        }
    }

    /// The value as a string slice.
    pub fn as_str(&self) -> Result<&str, EvalError> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(EvalError::type_mismatch("string", other.type_name())),
        }
    }

    /// The value as a boolean.
    pub fn as_bool(&self) -> Result<bool, EvalError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(EvalError::type_mismatch("bool", other.type_name())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// A binary operator. Grouped by precedence tier, lowest first:
/// comparisons, additive, multiplicative, power.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    /// Parse an operator from its source spelling.
    #[must_use]
    pub fn from_symbol(sym: &str) -> Option<Self> {
        Some(match sym {
            "==" => Self::Eq,
            "!=" => Self::Ne,
            "<=" => Self::Le,
            ">=" => Self::Ge,
            "<" => Self::Lt,
            ">" => Self::Gt,
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "**" => Self::Pow,
            _ => return None,
        })
    }

    /// The operator's source spelling.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "**",
        }
    }

    /// Apply the operator to two values.
    ///
    /// Ordering and arithmetic require numbers (`+` also concatenates two
    /// strings); equality requires matching types. Division and `**`
    /// follow IEEE semantics — no zero guard.
    fn apply(self, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
        match self {
            Self::Eq => Self::equality(lhs, rhs).map(Value::Bool),
            Self::Ne => Self::equality(lhs, rhs).map(|b| Value::Bool(!b)),
            Self::Le => Ok(Value::Bool(lhs.as_number()? <= rhs.as_number()?)),
            Self::Ge => Ok(Value::Bool(lhs.as_number()? >= rhs.as_number()?)),
            Self::Lt => Ok(Value::Bool(lhs.as_number()? < rhs.as_number()?)),
            Self::Gt => Ok(Value::Bool(lhs.as_number()? > rhs.as_number()?)),
            Self::Add => match (lhs, rhs) {
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
                _ => Ok(Value::Number(lhs.as_number()? + rhs.as_number()?)),
            },
            Self::Sub => Ok(Value::Number(lhs.as_number()? - rhs.as_number()?)),
            Self::Mul => Ok(Value::Number(lhs.as_number()? * rhs.as_number()?)),
            Self::Div => Ok(Value::Number(lhs.as_number()? / rhs.as_number()?)),
            Self::Pow => Ok(Value::Number(lhs.as_number()?.powf(rhs.as_number()?))),
        }
    }

    fn equality(lhs: &Value, rhs: &Value) -> Result<bool, EvalError> {
        match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(a == b),
            (Value::Str(a), Value::Str(b)) => Ok(a == b),
            (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
            _ => Err(EvalError::type_mismatch(lhs.type_name(), rhs.type_name())),
        }
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// The expression node variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    Str(String),
    Bool(bool),
    /// A named variable reference, resolved through the environment.
    Var(String),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// An expression node with a source span and a per-instance memo cell.
#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    cache: RefCell<Option<Value>>,
}

impl Clone for Expr {
    /// Deep copy with an empty memo cell.
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            span: self.span,
            cache: RefCell::new(None),
        }
    }
}

impl PartialEq for Expr {
    /// Structural equality; memo state is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Expr {
    /// Create an expression node.
    #[must_use]
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            cache: RefCell::new(None),
        }
    }

    /// A number literal (zero span; used by tests and defaults).
    #[must_use]
    pub fn number(n: f64) -> Self {
        Self::new(ExprKind::Number(n), Span::at(0))
    }

    /// A string literal.
    #[must_use]
    pub fn str(s: impl Into<String>) -> Self {
        Self::new(ExprKind::Str(s.into()), Span::at(0))
    }

    /// A boolean literal.
    #[must_use]
    pub fn bool(b: bool) -> Self {
        Self::new(ExprKind::Bool(b), Span::at(0))
    }

    /// A variable reference.
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Var(name.into()), Span::at(0))
    }

    /// A binary operation.
    #[must_use]
    pub fn binary(op: BinOp, lhs: Self, rhs: Self) -> Self {
        let span = Span::new(lhs.span.start, rhs.span.end);
        Self::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            span,
        )
    }

    /// Evaluate, caching the result on this instance.
    pub fn eval(&self, env: &dyn Env) -> Result<Value, EvalError> {
        if let Some(v) = self.cache.borrow().as_ref() {
            return Ok(v.clone());
        }
        let v = self.compute(env)?;
        *self.cache.borrow_mut() = Some(v.clone());
        Ok(v)
    }

    fn compute(&self, env: &dyn Env) -> Result<Value, EvalError> {
        match &self.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Var(name) => env.lookup(name),
            ExprKind::Binary { op, lhs, rhs } => {
                let l = lhs.eval(env)?;
                let r = rhs.eval(env)?;
                op.apply(&l, &r)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Environments
// ---------------------------------------------------------------------------

/// Name resolution for expression evaluation.
///
/// Implementations walk the lexical chain: a node's bound arguments first,
/// then its parent, ending at the root's global definitions.
pub trait Env {
    /// Resolve `name` to a value.
    fn lookup(&self, name: &str) -> Result<Value, EvalError>;
}

/// The empty environment: every lookup fails.
impl Env for () {
    fn lookup(&self, name: &str) -> Result<Value, EvalError> {
        Err(EvalError::name_not_found(name))
    }
}

/// A flat map environment, used for tests and standalone evaluation.
impl Env for HashMap<String, Value> {
    fn lookup(&self, name: &str) -> Result<Value, EvalError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| EvalError::name_not_found(name))
    }
}

/// Resolution depth bound for [`VarsEnv`]; a chain this deep is treated as
/// circular.
const MAX_LOOKUP_DEPTH: usize = 64;

/// Environment over a table of lazily-evaluated expressions — the `#var`
/// globals at the end of every lookup chain.
///
/// Definitions may reference each other; a recursion bound turns circular
/// chains into an [`EvalError`] instead of unbounded recursion.
pub struct VarsEnv<'a> {
    vars: &'a HashMap<String, Expr>,
    depth: std::cell::Cell<usize>,
}

impl<'a> VarsEnv<'a> {
    /// Wrap a variable table.
    #[must_use]
    pub fn new(vars: &'a HashMap<String, Expr>) -> Self {
        Self {
            vars,
            depth: std::cell::Cell::new(0),
        }
    }
}

impl Env for VarsEnv<'_> {
    fn lookup(&self, name: &str) -> Result<Value, EvalError> {
        let Some(expr) = self.vars.get(name) else {
            return Err(EvalError::name_not_found(name));
        };
        if self.depth.get() >= MAX_LOOKUP_DEPTH {
            return Err(EvalError::new(
                crate::error::EvalErrorKind::CircularReference,
                format!("circular definition involving `{name}`"),
            ));
        }
        self.depth.set(self.depth.get() + 1);
        let result = expr.eval(self);
        self.depth.set(self.depth.get() - 1);
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
