//! Stable handles into an [`Ast`](crate::Ast) arena.
//!
//! A [`NodeRef<C>`] is a node index whose target is known to satisfy the
//! capability `C`. Only the loader can mint them, so holding one means the
//! kind check already happened.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::{Serialize, Serializer};

use crate::kind::NodeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub(crate) usize);

impl ScopeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0 as u64)
    }
}

impl Serialize for ScopeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0 as u64)
    }
}

/// A set of node kinds a reference field may point at.
pub trait Capability {
    /// Name used in link errors, e.g. `expr` or `indent_scope`.
    const NAME: &'static str;

    fn admits(kind: NodeKind) -> bool;
}

/// Capability classes spanning several node kinds.
pub mod cap {
    use super::Capability;
    use crate::kind::NodeKind;

    macro_rules! capability {
        ($(#[$meta:meta])* $name:ident, $label:literal, |$kind:ident| $admits:expr) => {
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum $name {}

            impl Capability for $name {
                const NAME: &'static str = $label;

                fn admits($kind: NodeKind) -> bool {
                    $admits
                }
            }
        };
    }

    capability!(
        /// Any node at all.
        AnyNode, "node", |_kind| true
    );
    capability!(Expr, "expr", |kind| kind.is_expr());
    capability!(Literal, "literal", |kind| kind.is_literal());
    capability!(Stmt, "stmt", |kind| kind.is_stmt());
    capability!(Member, "member", |kind| kind.is_member());
    capability!(Type, "type", |kind| kind.is_type());
    capability!(
        /// Named declarations that can be bound in a scope.
        Object, "object", |kind| kind.is_object()
    );
}

/// A checked reference to a node admitted by `C`.
pub struct NodeRef<C> {
    id: NodeId,
    _capability: PhantomData<fn() -> C>,
}

impl<C> NodeRef<C> {
    pub(crate) fn new_unchecked(id: NodeId) -> Self {
        Self {
            id,
            _capability: PhantomData,
        }
    }

    pub fn id(self) -> NodeId {
        self.id
    }

    pub fn index(self) -> usize {
        self.id.0
    }

    /// Forget the capability, keeping the target.
    pub fn erase(self) -> NodeRef<cap::AnyNode> {
        NodeRef::new_unchecked(self.id)
    }
}

impl<C> Clone for NodeRef<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for NodeRef<C> {}

impl<C> PartialEq for NodeRef<C> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<C> Eq for NodeRef<C> {}

impl<C> Hash for NodeRef<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<C: Capability> fmt::Debug for NodeRef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRef<{}>({})", C::NAME, self.id.0)
    }
}

impl<C> Serialize for NodeRef<C> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}

impl<C> From<NodeRef<C>> for NodeId {
    fn from(r: NodeRef<C>) -> Self {
        r.id
    }
}

pub type AnyRef = NodeRef<cap::AnyNode>;
pub type ExprRef = NodeRef<cap::Expr>;
pub type TypeRef = NodeRef<cap::Type>;
