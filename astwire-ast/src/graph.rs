//! The linked graph produced by the loader.

use serde::Serialize;

use crate::handle::{cap, NodeId, NodeRef, ScopeId};
use crate::node::{Node, NodeData, Program};

/// A lexical region: a link in the prev/next chain plus the declarations
/// visible in it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scope {
    pub prev: Option<ScopeId>,
    pub next: Option<ScopeId>,
    /// Scope of a conditional branch opened from this one.
    pub branch: Option<ScopeId>,
    pub objects: Vec<NodeRef<cap::Object>>,
}

/// Arena owning every node and scope of one document.
///
/// Node 0 is always a [`Program`]. Nodes and scopes keep the positions they
/// had in the interchange document, so a [`NodeId`] is also the original
/// index.
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    pub(crate) nodes: Vec<Node>,
    pub(crate) scopes: Vec<Scope>,
}

impl Ast {
    pub fn program(&self) -> &Program {
        match self.nodes.first() {
            Some(Node::Program(program)) => program,
            _ => unreachable!("loader guarantees a program at node 0"),
        }
    }

    pub fn root(&self) -> NodeRef<Program> {
        NodeRef::new_unchecked(NodeId(0))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// Id of the node at `index`, if it exists.
    pub fn node_id(&self, index: usize) -> Option<NodeId> {
        (index < self.nodes.len()).then_some(NodeId(index))
    }

    pub fn scope_id(&self, index: usize) -> Option<ScopeId> {
        (index < self.scopes.len()).then_some(ScopeId(index))
    }

    pub fn node(&self, id: impl Into<NodeId>) -> Option<&Node> {
        self.nodes.get(id.into().0)
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.0)
    }

    /// Resolve a reference to an exact node kind.
    ///
    /// `None` only when `r` was minted by a different graph.
    pub fn get<T: NodeData>(&self, r: NodeRef<T>) -> Option<&T> {
        self.node(r).and_then(T::from_node)
    }

    /// Iterate node ids with their nodes in document order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// The declared name of an object: an identifier's text, or the name of
    /// the identifier a declaration binds. Anonymous fields have none.
    pub fn identifier(&self, object: NodeRef<cap::Object>) -> Option<&str> {
        let ident = match self.node(object)? {
            Node::Ident(ident) => return Some(&ident.ident),
            Node::Format(format) => format.ident,
            Node::Function(function) => function.ident,
            Node::Field(field) => field.ident?,
            _ => return None,
        };
        self.get(ident).map(|ident| ident.ident.as_str())
    }

    /// The chain of enclosing scopes, starting at `scope` itself.
    pub fn scope_chain(&self, scope: ScopeId) -> impl Iterator<Item = (ScopeId, &Scope)> {
        let mut next = Some(scope);
        let mut seen = vec![false; self.scopes.len()];
        std::iter::from_fn(move || {
            let id = next?;
            let current = self.scope(id)?;
            if std::mem::replace(seen.get_mut(id.0)?, true) {
                return None;
            }
            next = current.prev;
            Some((id, current))
        })
    }

    /// Find the nearest declaration of `name` visible from `scope`.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<NodeRef<cap::Object>> {
        self.scope_chain(scope).find_map(|(_, s)| {
            s.objects
                .iter()
                .rev()
                .copied()
                .find(|object| self.identifier(*object) == Some(name))
        })
    }

    /// Preorder walk over everything reachable from `start`, each node once.
    ///
    /// Returning `false` from `visit` skips that node's children.
    pub fn walk<F>(&self, start: impl Into<NodeId>, mut visit: F)
    where
        F: FnMut(NodeId, &Node) -> bool,
    {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![start.into()];
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            if std::mem::replace(&mut seen[id.0], true) {
                continue;
            }
            if visit(id, node) {
                stack.extend(node.children().into_iter().rev());
            }
        }
    }

    /// Ids of every node reachable from `start`, in walk order.
    pub fn reachable_from(&self, start: impl Into<NodeId>) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.walk(start, |id, _| {
            out.push(id);
            true
        });
        out
    }
}
