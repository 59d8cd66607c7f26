//! The derivation engine: bounded stochastic expansion of a grammar.
//!
//! Derivation turns the immutable AST into an arena-backed
//! [`DerivationTree`] of depth-stamped nodes. Expanding a producer
//! reference:
//!
//! 1. resolves the producer by name (lazily, so forward references work)
//! 2. checks argument arity against the declared parameters
//! 3. prunes silently at the depth bound
//! 4. evaluates the guard, freshly cloned per expansion
//! 5. draws one weighted alternative from the derivation's own seeded
//!    generator
//! 6. deep-copies the chosen body's templates into child nodes and recurses
//!
//! Every created node counts against the operation budget; exhausting it
//! aborts the derivation, which distinguishes runaway branching from the
//! silent depth pruning.
//!
//! Parent links are weak back-references (arena indices) used only for
//! upward variable lookup, never for ownership.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ast::{BuiltinAction, GlobalDefines, Producer, Root, RuleTemplate};
use crate::error::{DeriveError, EvalError};
use crate::expr::{Env, Expr, Value, VarsEnv};
use shapegram_geom::Scope;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Bounds and seeding for one derivation, defaulted from the grammar's
/// `#define` preamble and overridable by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeriveParams {
    /// No node is created deeper than this.
    pub max_depth: u32,
    /// Ceiling on total nodes created.
    pub max_oper: usize,
    /// Seed for the derivation's generator; negative seeds from entropy.
    pub seed: i64,
}

impl DeriveParams {
    /// Take the bounds from a grammar's global defines.
    #[must_use]
    pub const fn from_defines(defines: &GlobalDefines) -> Self {
        Self {
            max_depth: defines.max_depth,
            max_oper: defines.max_oper,
            seed: defines.seed,
        }
    }

    /// Override the seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// Index of a node in a [`DerivationTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// The arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Expansion progress of a producer-reference node. Action nodes are
/// terminal and carry no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandState {
    Unexpanded,
    Expanding,
    Expanded,
}

/// What a derivation node is: a bound action or a bound producer
/// reference.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A builtin action with per-node copies of its parameter expressions.
    Action {
        action: BuiltinAction,
        name: String,
        params: Vec<Expr>,
    },
    /// A producer reference with bound arguments. `params` holds the
    /// referenced producer's declared parameter names once expanded.
    ProdRef {
        name: String,
        args: Vec<Expr>,
        params: Vec<String>,
        state: ExpandState,
    },
}

/// One node of a derivation tree.
#[derive(Debug, Clone)]
pub struct DerivationNode {
    pub kind: NodeKind,
    /// Distance from the root (root is 0).
    pub depth: u32,
    /// Weak back-link for upward lookup.
    pub parent: Option<NodeId>,
    /// Expansion children, in body order (producer references only).
    pub children: Vec<NodeId>,
    /// Whether execution starts this node from a copy of its parent's
    /// current scope. Cleared for nodes pre-seeded with a specific scope
    /// (e.g. a subdivision slice).
    pub adopt_parent_scope: bool,
    /// The owning scope, filled in during execution.
    pub scope: Option<Scope>,
}

/// A derivation: an arena of nodes (root at index 0) plus the
/// per-derivation copy of the `#var` globals, kept so memoized values stay
/// consistent between derivation and execution.
#[derive(Debug, Clone)]
pub struct DerivationTree {
    nodes: Vec<DerivationNode>,
    pub(crate) variables: HashMap<String, Expr>,
}

impl DerivationTree {
    /// The root node id.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Borrow a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &DerivationNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut DerivationNode {
        &mut self.nodes[id.index()]
    }

    /// Total number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree is empty (never true for a derived tree).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The deepest node's depth.
    #[must_use]
    pub fn deepest(&self) -> u32 {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Iterate over all nodes with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &DerivationNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }
}

// ---------------------------------------------------------------------------
// Lexical environment over the tree
// ---------------------------------------------------------------------------

/// Name resolution along a node's lexical chain: the node's bound
/// arguments first, then its ancestors, ending at the `#var` globals.
///
/// A bound argument evaluates in the context of the node's *parent* — the
/// frame that supplied it — so the chain strictly shortens and lookup
/// always terminates.
pub(crate) struct NodeEnv<'a> {
    tree: &'a DerivationTree,
    node: Option<NodeId>,
}

impl<'a> NodeEnv<'a> {
    pub(crate) const fn new(tree: &'a DerivationTree, node: Option<NodeId>) -> Self {
        Self { tree, node }
    }
}

impl Env for NodeEnv<'_> {
    fn lookup(&self, name: &str) -> Result<Value, EvalError> {
        let mut cur = self.node;
        while let Some(id) = cur {
            let node = self.tree.node(id);
            if let NodeKind::ProdRef { params, args, .. } = &node.kind {
                if let Some(pos) = params.iter().position(|p| p == name) {
                    let outer = NodeEnv::new(self.tree, node.parent);
                    return args[pos].eval(&outer);
                }
            }
            cur = node.parent;
        }
        VarsEnv::new(&self.tree.variables).lookup(name)
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Derive a tree from a compiled grammar.
///
/// Each call owns a freshly seeded generator: a non-negative seed gives a
/// reproducible tree, a negative seed draws from entropy. Concurrent
/// derivations are independent.
pub fn derive(ast: &Root, params: &DeriveParams) -> Result<DerivationTree, DeriveError> {
    let rng = if params.seed >= 0 {
        StdRng::seed_from_u64(params.seed as u64)
    } else {
        StdRng::from_entropy()
    };

    let root_node = DerivationNode {
        kind: NodeKind::ProdRef {
            name: ast.entry().name.clone(),
            args: Vec::new(),
            params: Vec::new(),
            state: ExpandState::Unexpanded,
        },
        depth: 0,
        parent: None,
        children: Vec::new(),
        adopt_parent_scope: true,
        scope: None,
    };

    let mut deriver = Deriver {
        ast,
        tree: DerivationTree {
            nodes: vec![root_node],
            variables: ast.variables.clone(),
        },
        rng,
        max_depth: params.max_depth,
        max_oper: params.max_oper,
        created: 1,
    };

    let root = deriver.tree.root();
    deriver.expand(root)?;

    log::debug!(
        "derived {} node(s), deepest {}",
        deriver.tree.len(),
        deriver.tree.deepest()
    );
    Ok(deriver.tree)
}

struct Deriver<'a> {
    ast: &'a Root,
    tree: DerivationTree,
    rng: StdRng,
    max_depth: u32,
    max_oper: usize,
    created: usize,
}

impl Deriver<'_> {
    /// Expand the producer-reference node `id`.
    fn expand(&mut self, id: NodeId) -> Result<(), DeriveError> {
        let (name, arg_count, depth) = {
            let node = self.tree.node(id);
            let NodeKind::ProdRef { name, args, .. } = &node.kind else {
                return Ok(()); // actions are terminal
            };
            (name.clone(), args.len(), node.depth)
        };

        // copy the AST reference out so `producer` does not pin `self`
        let ast = self.ast;
        let producer = ast
            .producer(&name)
            .ok_or(DeriveError::UnknownProducer { name: name.clone() })?;

        if arg_count != producer.params.len() {
            return Err(DeriveError::ArityMismatch {
                producer: name,
                expected: producer.params.len(),
                found: arg_count,
            });
        }

        // Bind the declared parameter names; argument lookup needs them
        if let NodeKind::ProdRef { params, state, .. } = &mut self.tree.node_mut(id).kind {
            *params = producer.params.clone();
            *state = ExpandState::Expanding;
        }

        // Depth pruning is silent: the branch just ends here
        if depth >= self.max_depth {
            self.finish(id);
            return Ok(());
        }

        // Guard, evaluated on a fresh copy in this node's context
        if let Some(guard) = &producer.guard {
            let guard = guard.clone();
            let passed = {
                let env = NodeEnv::new(&self.tree, Some(id));
                guard.eval(&env)?.as_bool()?
            };
            if !passed {
                self.finish(id);
                return Ok(());
            }
        }

        let alt = self.select_alternative(id, producer)?;
        let body: Vec<RuleTemplate> = producer.alternatives[alt].body.clone();

        let mut child_refs = Vec::new();
        for template in &body {
            let child = self.create_child(id, depth + 1, template)?;
            if matches!(self.tree.node(child).kind, NodeKind::ProdRef { .. }) {
                child_refs.push(child);
            }
        }
        for child in child_refs {
            self.expand(child)?;
        }

        self.finish(id);
        Ok(())
    }

    fn finish(&mut self, id: NodeId) {
        if let NodeKind::ProdRef { state, .. } = &mut self.tree.node_mut(id).kind {
            *state = ExpandState::Expanded;
        }
    }

    /// Pick an alternative index by cumulative weighted draw.
    ///
    /// Weights are evaluated fresh per expansion (they may reference the
    /// node's arguments). With no weights, or a non-positive total, the
    /// first alternative is chosen.
    fn select_alternative(&mut self, id: NodeId, producer: &Producer) -> Result<usize, DeriveError> {
        if producer.alternatives.len() <= 1 {
            return Ok(0);
        }

        let mut weights = Vec::with_capacity(producer.alternatives.len());
        {
            let env = NodeEnv::new(&self.tree, Some(id));
            for alt in &producer.alternatives {
                let w = match &alt.weight {
                    Some(expr) => expr.clone().eval(&env)?.as_number()?,
                    None => 0.0,
                };
                weights.push(w);
            }
        }

        let total: f64 = weights.iter().sum();
        if !(total > 0.0) {
            return Ok(0);
        }

        let draw: f64 = self.rng.gen();
        let mut cumulative = 0.0;
        for (i, w) in weights.iter().enumerate() {
            cumulative += w / total;
            if cumulative >= draw {
                return Ok(i);
            }
        }
        // floating rounding left the last bucket short
        Ok(weights.len() - 1)
    }

    /// Deep-copy a body template into a fresh child node.
    fn create_child(
        &mut self,
        parent: NodeId,
        depth: u32,
        template: &RuleTemplate,
    ) -> Result<NodeId, DeriveError> {
        let kind = match template {
            RuleTemplate::Action {
                action,
                name,
                params,
            } => {
                if params.len() != action.arity() {
                    return Err(DeriveError::ArityMismatch {
                        producer: name.clone(),
                        expected: action.arity(),
                        found: params.len(),
                    });
                }
                NodeKind::Action {
                    action: *action,
                    name: name.clone(),
                    // Expr::clone resets the memo cell, so repeated
                    // invocations of one template never alias values
                    params: params.clone(),
                }
            }
            RuleTemplate::ProdRef { name, args } => NodeKind::ProdRef {
                name: name.clone(),
                args: args.clone(),
                params: Vec::new(),
                state: ExpandState::Unexpanded,
            },
        };

        self.created += 1;
        if self.created > self.max_oper {
            return Err(DeriveError::OperationBudget {
                limit: self.max_oper,
            });
        }

        let id = NodeId(self.tree.nodes.len() as u32);
        self.tree.nodes.push(DerivationNode {
            kind,
            depth,
            parent: Some(parent),
            children: Vec::new(),
            adopt_parent_scope: true,
            scope: None,
        });
        self.tree.node_mut(parent).children.push(id);
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::compile;

    fn derive_seeded(source: &str, seed: i64) -> Result<DerivationTree, DeriveError> {
        let root = compile(source).expect("grammar must compile");
        let params = DeriveParams::from_defines(&root.defines).with_seed(seed);
        derive(&root, &params)
    }

    // -- structure --

    #[test]
    fn linear_chain() {
        let tree = derive_seeded(
            r#"A() [] : { T(1, 0, 0) B() } B() [] : { PlaceShape("box") }"#,
            1,
        )
        .unwrap();
        // root + T + B + PlaceShape
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.deepest(), 2);

        let root = tree.node(tree.root());
        assert_eq!(root.depth, 0);
        assert_eq!(root.children.len(), 2);
    }

    #[test]
    fn depth_stamps_increase_by_one() {
        let tree = derive_seeded(r#"A() [] : { B() } B() [] : { Push() }"#, 1).unwrap();
        for (_, node) in tree.iter() {
            if let Some(pid) = node.parent {
                assert_eq!(node.depth, tree.node(pid).depth + 1);
            }
        }
    }

    #[test]
    fn expanded_states() {
        let tree = derive_seeded(r#"A() [] : { B() } B() [] : { Push() }"#, 1).unwrap();
        for (_, node) in tree.iter() {
            if let NodeKind::ProdRef { state, .. } = &node.kind {
                assert_eq!(*state, ExpandState::Expanded);
            }
        }
    }

    // -- bounds --

    #[test]
    fn recursion_is_depth_bounded() {
        let tree = derive_seeded("#define MAX_DEPTH 4\n%%\nA() [] : { A() }", 1).unwrap();
        assert!(tree.deepest() <= 4);
        // the chain reaches the bound exactly
        assert_eq!(tree.deepest(), 4);
    }

    #[test]
    fn guarded_recursion_stops_early() {
        // F counts down and stops at zero regardless of MAX_DEPTH
        let tree = derive_seeded(
            "#define MAX_DEPTH 50\n%%\nA() [] : { F(3) } F(n) [n > 0] : { F(n - 1) }",
            1,
        )
        .unwrap();
        // A, F(3), F(2), F(1), F(0 — guard fails, childless)
        assert_eq!(tree.deepest(), 4);
    }

    #[test]
    fn operation_budget_aborts() {
        // binary branching explodes past any reasonable budget
        let err = derive_seeded(
            "#define MAX_DEPTH 30\n#define MAX_OPER 100\n%%\nA() [] : { A() A() }",
            1,
        )
        .unwrap_err();
        assert!(matches!(err, DeriveError::OperationBudget { limit: 100 }));
    }

    #[test]
    fn depth_pruning_is_not_an_error() {
        let result = derive_seeded("#define MAX_DEPTH 2\n%%\nA() [] : { A() }", 1);
        assert!(result.is_ok());
    }

    // -- guards --

    #[test]
    fn false_guard_leaves_root_childless() {
        let tree = derive_seeded(r#"A() [False] : { PlaceShape("x") }"#, 1).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.node(tree.root()).children.is_empty());
    }

    #[test]
    fn guard_sees_arguments() {
        let tree = derive_seeded(
            r#"A() [] : { B(0) } B(n) [n > 0] : { PlaceShape("x") }"#,
            1,
        )
        .unwrap();
        // B's guard is false, so no PlaceShape node exists
        assert!(!tree
            .iter()
            .any(|(_, n)| matches!(&n.kind, NodeKind::Action { name, .. } if name == "PlaceShape")));
    }

    #[test]
    fn non_bool_guard_is_fatal() {
        let err = derive_seeded(r#"A() [1 + 2] : { Push() }"#, 1).unwrap_err();
        assert!(matches!(err, DeriveError::Eval(_)));
    }

    // -- arity --

    #[test]
    fn producer_arity_mismatch() {
        let err = derive_seeded(r#"A() [] : { B(1, 2) } B(n) [] : { Push() }"#, 1).unwrap_err();
        assert_eq!(
            err,
            DeriveError::ArityMismatch {
                producer: "B".into(),
                expected: 1,
                found: 2,
            }
        );
    }

    #[test]
    fn action_arity_mismatch() {
        let err = derive_seeded(r#"A() [] : { T(1, 2) }"#, 1).unwrap_err();
        assert!(matches!(
            err,
            DeriveError::ArityMismatch { expected: 3, found: 2, .. }
        ));
    }

    #[test]
    fn unknown_producer() {
        let err = derive_seeded(r#"A() [] : { Ghost() }"#, 1).unwrap_err();
        assert_eq!(err, DeriveError::UnknownProducer { name: "Ghost".into() });
    }

    // -- determinism --

    #[test]
    fn same_seed_same_tree() {
        let source = r#"
            #define MAX_DEPTH 8
            %%
            A() [] : (1) { A() A() } (1) { PlaceShape("leaf") } (1) { T(1, 0, 0) A() }
        "#;
        let a = derive_seeded(source, 42).unwrap();
        let b = derive_seeded(source, 42).unwrap();
        assert_eq!(a.len(), b.len());
        for ((_, na), (_, nb)) in a.iter().zip(b.iter()) {
            assert_eq!(na.depth, nb.depth);
            match (&na.kind, &nb.kind) {
                (NodeKind::Action { name: x, .. }, NodeKind::Action { name: y, .. })
                | (NodeKind::ProdRef { name: x, .. }, NodeKind::ProdRef { name: y, .. }) => {
                    assert_eq!(x, y);
                }
                _ => panic!("node kinds diverged"),
            }
        }
    }

    #[test]
    fn different_seeds_usually_differ() {
        let source = r#"
            #define MAX_DEPTH 10
            %%
            A() [] : (1) { A() A() } (1) { PlaceShape("leaf") }
        "#;
        let sizes: Vec<usize> = (0..8)
            .map(|seed| derive_seeded(source, seed).unwrap().len())
            .collect();
        assert!(sizes.iter().any(|&s| s != sizes[0]));
    }

    // -- weighted selection --

    #[test]
    fn zero_weight_never_selected() {
        for seed in 0..50 {
            let tree = derive_seeded(
                r#"A() [] : (1) { PlaceShape("a") } (0) { PlaceShape("b") }"#,
                seed,
            )
            .unwrap();
            let placed: Vec<&str> = tree
                .iter()
                .filter_map(|(_, n)| match &n.kind {
                    NodeKind::Action { name, params, .. } if name == "PlaceShape" => {
                        match &params[0].kind {
                            crate::expr::ExprKind::Str(s) => Some(s.as_str()),
                            _ => None,
                        }
                    }
                    _ => None,
                })
                .collect();
            assert_eq!(placed, vec!["a"], "seed {seed} selected the zero-weight arm");
        }
    }

    #[test]
    fn weights_may_reference_arguments() {
        // with n = 0 the first arm's weight is 0, so the second always wins
        let tree = derive_seeded(
            r#"A() [] : { B(0) } B(n) [] : (n) { PlaceShape("w") } (1 - n) { Push() }"#,
            7,
        )
        .unwrap();
        assert!(tree
            .iter()
            .any(|(_, n)| matches!(&n.kind, NodeKind::Action { name, .. } if name == "Push")));
    }

    // -- variables --

    #[test]
    fn derivation_clones_globals() {
        let root = compile("#var N 3\n%%\nA() [] : { T(N, 0, 0) }").unwrap();
        let params = DeriveParams::from_defines(&root.defines).with_seed(1);
        let tree = derive(&root, &params).unwrap();
        // the tree owns its own copies of the #var table
        assert!(tree.variables.contains_key("N"));
        assert_eq!(root.variables.len(), tree.variables.len());
    }

    #[test]
    fn argument_lookup_walks_to_caller_frame() {
        // B passes its own argument through to C; C's guard sees the value
        // bound two frames up
        let tree = derive_seeded(
            r#"
            A() [] : { B(2) }
            B(n) [] : { C(n * 3) }
            C(m) [m == 6] : { PlaceShape("ok") }
            "#,
            1,
        )
        .unwrap();
        assert!(tree
            .iter()
            .any(|(_, n)| matches!(&n.kind, NodeKind::Action { name, .. } if name == "PlaceShape")));
    }
}
