//! The shape-language AST: producers, rule templates, and global defines.
//!
//! A compiled grammar is a [`Root`]: an ordered list of [`Producer`]s (the
//! first one is the entry point), the `#var` globals, and the
//! [`GlobalDefines`] that bound derivation. Rule bodies are sequences of
//! [`RuleTemplate`]s — either a builtin action invocation or a reference to
//! another producer. Templates are never mutated; the derivation engine
//! deep-copies their expressions on every expansion.

use std::collections::HashMap;

use crate::expr::Expr;

// ---------------------------------------------------------------------------
// Global defines
// ---------------------------------------------------------------------------

/// Derivation bounds and seeding, overridable from the grammar preamble
/// with `#define`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalDefines {
    /// Maximum derivation depth.
    pub max_depth: u32,
    /// Ceiling on total nodes created by one derivation.
    pub max_oper: usize,
    /// Random seed; negative means non-deterministic.
    pub seed: i64,
}

impl Default for GlobalDefines {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_oper: 10_000,
            seed: -1,
        }
    }
}

impl GlobalDefines {
    /// Set a define by its grammar-level name.
    ///
    /// Returns `false` for an unknown name (the caller logs a warning,
    /// matching the permissive preamble semantics).
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        match name {
            "MAX_DEPTH" => {
                self.max_depth = value as u32;
                true
            }
            "MAX_OPER" => {
                self.max_oper = value as usize;
                true
            }
            "SEED" => {
                self.seed = value as i64;
                true
            }
            _ => false,
        }
    }

    /// Whether `name` is one of the known defines.
    #[must_use]
    pub fn is_known(name: &str) -> bool {
        matches!(name, "MAX_DEPTH" | "MAX_OPER" | "SEED")
    }
}

// ---------------------------------------------------------------------------
// Builtin actions
// ---------------------------------------------------------------------------

/// The closed set of side-effecting operations a rule body may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinAction {
    /// `PlaceShape(name)` — place a named shape at the current scope.
    PlaceShape,
    /// `T(x, y, z)` — translate along the scope's local, scaled axes.
    Translate,
    /// `TW(x, y, z)` — translate along the world axes.
    TranslateWorld,
    /// `R(x, y, z)` — rotate by Euler degrees, scale-corrected.
    Rotate,
    /// `S(x, y, z)` — relative scale.
    Scale,
    /// `SS(x, y, z)` — absolute scale.
    SetScale,
    /// `Push()` — save the current scope.
    Push,
    /// `Pop()` — restore the most recently saved scope.
    Pop,
}

impl BuiltinAction {
    /// Number of parameters the action takes.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::PlaceShape => 1,
            Self::Push | Self::Pop => 0,
            _ => 3,
        }
    }
}

/// Maps registered action names to builtin variants.
///
/// The parser consults the registry to classify a rule-body call: a
/// registered name becomes an action template, anything else a producer
/// reference.
#[derive(Debug, Clone)]
pub struct ActionRegistry {
    entries: HashMap<&'static str, BuiltinAction>,
}

impl ActionRegistry {
    /// The standard builtin registry.
    #[must_use]
    pub fn builtin() -> Self {
        let entries = HashMap::from([
            ("PlaceShape", BuiltinAction::PlaceShape),
            ("T", BuiltinAction::Translate),
            ("TW", BuiltinAction::TranslateWorld),
            ("R", BuiltinAction::Rotate),
            ("S", BuiltinAction::Scale),
            ("SS", BuiltinAction::SetScale),
            ("Push", BuiltinAction::Push),
            ("Pop", BuiltinAction::Pop),
        ]);
        Self { entries }
    }

    /// Look up a registered action by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<BuiltinAction> {
        self.entries.get(name).copied()
    }
}

// ---------------------------------------------------------------------------
// Rule templates
// ---------------------------------------------------------------------------

/// One entry of a rule body.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleTemplate {
    /// A builtin action invocation.
    Action {
        action: BuiltinAction,
        /// The registered spelling, kept for diagnostics.
        name: String,
        params: Vec<Expr>,
    },
    /// An invocation of another producer by name. Names resolve lazily at
    /// derivation time, so forward references are legal.
    ProdRef { name: String, args: Vec<Expr> },
}

/// One weighted alternative of a producer.
#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    /// Selection weight; `None` in the single-body form.
    pub weight: Option<Expr>,
    /// The rule body, in execution order.
    pub body: Vec<RuleTemplate>,
}

// ---------------------------------------------------------------------------
// Producers
// ---------------------------------------------------------------------------

/// A named grammar rule: parameters, an optional guard, and one or more
/// weighted alternatives.
#[derive(Debug, Clone, PartialEq)]
pub struct Producer {
    pub name: String,
    /// Declared parameter names, position-indexed.
    pub params: Vec<String>,
    /// Guard condition; `None` means always true.
    pub guard: Option<Expr>,
    pub alternatives: Vec<Alternative>,
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

/// A compiled grammar: producers, `#var` globals, and defines.
///
/// Immutable after compilation; derivation works on expression clones.
#[derive(Debug, Clone)]
pub struct Root {
    producers: Vec<Producer>,
    index: HashMap<String, usize>,
    /// `#var` globals, resolved lazily at the end of every lookup chain.
    pub variables: HashMap<String, Expr>,
    pub defines: GlobalDefines,
}

impl Root {
    /// Assemble and validate a root.
    ///
    /// Fails on duplicate producer names, an empty producer list, or an
    /// entry producer that declares parameters.
    pub fn build(
        producers: Vec<Producer>,
        variables: HashMap<String, Expr>,
        defines: GlobalDefines,
    ) -> Result<Self, String> {
        let mut index = HashMap::with_capacity(producers.len());
        for (i, p) in producers.iter().enumerate() {
            if index.insert(p.name.clone(), i).is_some() {
                return Err(format!("name already defined: {}", p.name));
            }
        }

        let Some(entry) = producers.first() else {
            return Err("grammar defines no rules".to_owned());
        };
        if !entry.params.is_empty() {
            return Err(format!(
                "entry rule `{}` must not declare parameters",
                entry.name
            ));
        }

        Ok(Self {
            producers,
            index,
            variables,
            defines,
        })
    }

    /// The entry-point producer (the first one declared).
    #[must_use]
    pub fn entry(&self) -> &Producer {
        // build() rejects empty producer lists
        &self.producers[0]
    }

    /// Look up a producer by name.
    #[must_use]
    pub fn producer(&self, name: &str) -> Option<&Producer> {
        self.index.get(name).map(|&i| &self.producers[i])
    }

    /// All producers in declaration order.
    #[must_use]
    pub fn producers(&self) -> &[Producer] {
        &self.producers
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn producer(name: &str, params: &[&str]) -> Producer {
        Producer {
            name: name.to_owned(),
            params: params.iter().map(|&s| s.to_owned()).collect(),
            guard: None,
            alternatives: vec![Alternative {
                weight: None,
                body: Vec::new(),
            }],
        }
    }

    // -- defines --

    #[test]
    fn defines_defaults() {
        let d = GlobalDefines::default();
        assert_eq!(d.max_depth, 10);
        assert_eq!(d.max_oper, 10_000);
        assert_eq!(d.seed, -1);
    }

    #[test]
    fn defines_set_known() {
        let mut d = GlobalDefines::default();
        assert!(d.set("MAX_DEPTH", 3.0));
        assert!(d.set("SEED", 42.0));
        assert_eq!(d.max_depth, 3);
        assert_eq!(d.seed, 42);
        assert!(!d.set("MAX_WIDGETS", 1.0));
    }

    // -- registry --

    #[test]
    fn registry_lookups() {
        let reg = ActionRegistry::builtin();
        assert_eq!(reg.get("PlaceShape"), Some(BuiltinAction::PlaceShape));
        assert_eq!(reg.get("T"), Some(BuiltinAction::Translate));
        assert_eq!(reg.get("Pop"), Some(BuiltinAction::Pop));
        assert_eq!(reg.get("House"), None);
    }

    #[test]
    fn arities() {
        assert_eq!(BuiltinAction::PlaceShape.arity(), 1);
        assert_eq!(BuiltinAction::Rotate.arity(), 3);
        assert_eq!(BuiltinAction::Push.arity(), 0);
    }

    // -- root validation --

    #[test]
    fn build_rejects_duplicates() {
        let err = Root::build(
            vec![producer("A", &[]), producer("A", &[])],
            HashMap::new(),
            GlobalDefines::default(),
        )
        .unwrap_err();
        assert!(err.contains("already defined"));
    }

    #[test]
    fn build_rejects_empty() {
        assert!(Root::build(Vec::new(), HashMap::new(), GlobalDefines::default()).is_err());
    }

    #[test]
    fn build_rejects_entry_with_params() {
        let err = Root::build(
            vec![producer("A", &["x"])],
            HashMap::new(),
            GlobalDefines::default(),
        )
        .unwrap_err();
        assert!(err.contains("entry rule"));
    }

    #[test]
    fn lookup_by_name() {
        let root = Root::build(
            vec![producer("A", &[]), producer("B", &["n"])],
            HashMap::new(),
            GlobalDefines::default(),
        )
        .unwrap();
        assert_eq!(root.entry().name, "A");
        assert_eq!(root.producer("B").unwrap().params, vec!["n"]);
        assert!(root.producer("C").is_none());
    }
}
