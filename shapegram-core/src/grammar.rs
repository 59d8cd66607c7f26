//! Grammar tables for the parser generator.
//!
//! A [`Grammar`] is a set of named productions over a terminal alphabet
//! (the scanner's terminal ids) and a nonterminal alphabet allocated by the
//! [`GrammarBuilder`]. Each production carries a semantic action that
//! receives the already-reduced values of its right-hand side positionally
//! (shifted tokens included) and produces exactly one value for the reduced
//! nonterminal. Actions may mutate a shared compile context.
//!
//! This module knows nothing about the shape language; the language
//! definition lives in [`crate::syntax`].

use crate::error::ActionError;
use crate::token::{TermId, Token};

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

/// Index of a nonterminal allocated by a [`GrammarBuilder`].
pub type NonTermId = usize;

/// A grammar symbol: terminal (token kind) or nonterminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sym {
    /// A terminal, identified by its scanner terminal id.
    Term(TermId),
    /// A nonterminal, identified by its builder id.
    NonTerm(NonTermId),
}

// ---------------------------------------------------------------------------
// Productions
// ---------------------------------------------------------------------------

/// A semantic action: consumes the reduced right-hand-side values (in
/// order) and produces the value of the left-hand side.
///
/// Actions are `Send + Sync` so a compiled parser can be shared as a
/// process-wide singleton.
pub type SemAction<V, C> = Box<dyn Fn(&mut C, Vec<V>) -> Result<V, ActionError> + Send + Sync>;

/// One production of the grammar.
pub struct Production<V, C> {
    /// The nonterminal being defined.
    pub lhs: NonTermId,
    /// The sequence of symbols to match.
    pub rhs: Vec<Sym>,
    /// The reduction action.
    pub action: SemAction<V, C>,
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

/// A complete grammar: alphabets, productions, and the token-to-value
/// conversion used when a terminal is shifted.
pub struct Grammar<V, C> {
    pub(crate) terminals: Vec<String>,
    pub(crate) nonterminals: Vec<String>,
    pub(crate) start: NonTermId,
    pub(crate) productions: Vec<Production<V, C>>,
    pub(crate) token_value: Box<dyn Fn(&Token) -> V + Send + Sync>,
}

impl<V, C> Grammar<V, C> {
    /// Name of a terminal, for diagnostics.
    #[must_use]
    pub fn terminal_name(&self, id: TermId) -> &str {
        self.terminals.get(id).map_or("<eof>", String::as_str)
    }

    /// Name of a nonterminal, for diagnostics.
    #[must_use]
    pub fn nonterminal_name(&self, id: NonTermId) -> &str {
        self.nonterminals.get(id).map_or("<start>", String::as_str)
    }

    /// Number of productions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.productions.len()
    }

    /// Whether the grammar has no productions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.productions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Incrementally builds a [`Grammar`].
pub struct GrammarBuilder<V, C> {
    terminals: Vec<String>,
    nonterminals: Vec<String>,
    productions: Vec<Production<V, C>>,
    token_value: Box<dyn Fn(&Token) -> V + Send + Sync>,
}

impl<V, C> GrammarBuilder<V, C> {
    /// Create a builder over the given terminal alphabet.
    ///
    /// `token_value` converts a shifted token into a semantic value.
    #[must_use]
    pub fn new(
        terminal_names: &[&str],
        token_value: impl Fn(&Token) -> V + Send + Sync + 'static,
    ) -> Self {
        Self {
            terminals: terminal_names.iter().map(|&s| s.to_owned()).collect(),
            nonterminals: Vec::new(),
            productions: Vec::new(),
            token_value: Box::new(token_value),
        }
    }

    /// Allocate a nonterminal.
    pub fn nonterminal(&mut self, name: &str) -> NonTermId {
        self.nonterminals.push(name.to_owned());
        self.nonterminals.len() - 1
    }

    /// Add a production `lhs → rhs` with its semantic action.
    pub fn production(
        &mut self,
        lhs: NonTermId,
        rhs: Vec<Sym>,
        action: impl Fn(&mut C, Vec<V>) -> Result<V, ActionError> + Send + Sync + 'static,
    ) {
        self.productions.push(Production {
            lhs,
            rhs,
            action: Box::new(action),
        });
    }

    /// Finish the grammar with `start` as the start symbol.
    #[must_use]
    pub fn build(self, start: NonTermId) -> Grammar<V, C> {
        Grammar {
            terminals: self.terminals,
            nonterminals: self.nonterminals,
            start,
            productions: self.productions,
            token_value: self.token_value,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
