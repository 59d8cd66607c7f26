//! The execution engine: walking a derivation tree against a host.
//!
//! Execution is a depth-first pre-order walk. Every producer-reference
//! node starts from a copy of its parent's *current* scope (the root from
//! the caller-supplied scope), unless the node was pre-seeded with a
//! specific scope and had adoption disabled. Action nodes evaluate their
//! parameters in declared order and mutate the scope of their enclosing
//! producer reference, so transforms accumulate left to right through a
//! rule body and flow into every reference that follows.
//!
//! Two conditions are recoverable and merely logged: a shape name the host
//! cannot resolve (the placement is skipped), and a `Pop()` on an empty
//! scope stack (a no-op). Everything else — in practice, parameter
//! evaluation failures — aborts the walk.

use glam::DVec3;

use crate::ast::BuiltinAction;
use crate::error::ExecError;
use crate::expr::Value;
use shapegram_geom::Scope;

use super::derive::{DerivationTree, NodeEnv, NodeId, NodeKind};

// ---------------------------------------------------------------------------
// Host capabilities
// ---------------------------------------------------------------------------

/// An opaque handle to a visual asset owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeHandle(u64);

impl ShapeHandle {
    /// Wrap a host-defined id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The host-defined id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// An opaque handle to an instance the host placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle(u64);

impl InstanceHandle {
    /// Wrap a host-defined id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The host-defined id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// The capabilities the runtime consumes from its host: shape lookup,
/// placement, and teardown of placed instances.
pub trait Host {
    /// Resolve a shape name to an asset handle.
    fn lookup_shape(&mut self, name: &str) -> Option<ShapeHandle>;

    /// Instantiate a shape at the given scope, parented under `parent`
    /// (or the host's root when `None`).
    fn place(
        &mut self,
        shape: ShapeHandle,
        scope: &Scope,
        parent: Option<InstanceHandle>,
    ) -> InstanceHandle;

    /// Remove a previously placed instance.
    fn destroy(&mut self, instance: InstanceHandle);
}

/// What an execution produced.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Every instance placed, in placement order.
    pub placed: Vec<InstanceHandle>,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Execute a derivation tree: compose scopes down the tree and invoke the
/// host for placements, starting from `root_scope`.
pub fn execute(
    tree: &mut DerivationTree,
    root_scope: Scope,
    host: &mut dyn Host,
) -> Result<ExecutionReport, ExecError> {
    let root = tree.root();
    {
        let node = tree.node_mut(root);
        if node.adopt_parent_scope || node.scope.is_none() {
            node.scope = Some(root_scope);
        }
    }

    let mut walker = Walker {
        host,
        scope_stack: Vec::new(),
        report: ExecutionReport::default(),
    };
    walker.visit(tree, root)?;

    log::debug!("executed: {} placement(s)", walker.report.placed.len());
    Ok(walker.report)
}

struct Walker<'h> {
    host: &'h mut dyn Host,
    /// Saved scopes for `Push`/`Pop`. One stack per walk: pre-order makes
    /// it shared along the lineage, independent of tree structure.
    scope_stack: Vec<Scope>,
    report: ExecutionReport,
}

impl Walker<'_> {
    /// Visit a producer-reference node: settle its scope, then run its
    /// children in body order.
    fn visit(&mut self, tree: &mut DerivationTree, id: NodeId) -> Result<(), ExecError> {
        let starting = {
            let node = tree.node(id);
            if node.adopt_parent_scope {
                match node.parent {
                    Some(pid) => tree.node(pid).scope.clone().unwrap_or_default(),
                    // the root's scope was settled by execute()
                    None => node.scope.clone().unwrap_or_default(),
                }
            } else {
                // pre-seeded (e.g. a subdivision slice)
                node.scope.clone().unwrap_or_default()
            }
        };
        tree.node_mut(id).scope = Some(starting);

        let children = tree.node(id).children.clone();
        for child in children {
            match &tree.node(child).kind {
                NodeKind::Action { .. } => self.apply_action(tree, child, id)?,
                NodeKind::ProdRef { .. } => self.visit(tree, child)?,
            }
        }
        Ok(())
    }

    /// Run one action node against the scope of its enclosing reference.
    fn apply_action(
        &mut self,
        tree: &mut DerivationTree,
        id: NodeId,
        owner: NodeId,
    ) -> Result<(), ExecError> {
        let (action, values) = {
            let NodeKind::Action { action, params, .. } = &tree.node(id).kind else {
                return Ok(());
            };
            let env = NodeEnv::new(tree, Some(id));
            let values = params
                .iter()
                .map(|p| p.eval(&env))
                .collect::<Result<Vec<Value>, _>>()?;
            (*action, values)
        };

        match action {
            BuiltinAction::PlaceShape => {
                let name = values[0].as_str()?;
                match self.host.lookup_shape(name) {
                    Some(shape) => {
                        let scope = owner_scope(tree, owner).clone();
                        let instance = self.host.place(shape, &scope, None);
                        self.report.placed.push(instance);
                    }
                    None => log::warn!("shape not found: {name}"),
                }
            }
            BuiltinAction::Translate => {
                owner_scope(tree, owner).translate(vec3(&values)?);
            }
            BuiltinAction::TranslateWorld => {
                owner_scope(tree, owner).translate_world(vec3(&values)?);
            }
            BuiltinAction::Rotate => {
                owner_scope(tree, owner).rotate_euler(vec3(&values)?);
            }
            BuiltinAction::Scale => {
                owner_scope(tree, owner).scale_by(vec3(&values)?);
            }
            BuiltinAction::SetScale => {
                owner_scope(tree, owner).set_scale(vec3(&values)?);
            }
            BuiltinAction::Push => {
                let scope = owner_scope(tree, owner).clone();
                self.scope_stack.push(scope);
            }
            BuiltinAction::Pop => match self.scope_stack.pop() {
                Some(saved) => *owner_scope(tree, owner) = saved,
                None => log::warn!("Pop() on an empty scope stack"),
            },
        }
        Ok(())
    }
}

/// The owning scope of a reference node (settled before its children run).
fn owner_scope(tree: &mut DerivationTree, owner: NodeId) -> &mut Scope {
    tree.node_mut(owner).scope.get_or_insert_with(Scope::default)
}

/// Interpret three numeric parameters as a vector.
fn vec3(values: &[Value]) -> Result<DVec3, ExecError> {
    Ok(DVec3::new(
        values[0].as_number()?,
        values[1].as_number()?,
        values[2].as_number()?,
    ))
}
