//! Typed node records, one per [`NodeKind`].
//!
//! Every reference field is a [`NodeRef`] (or [`ScopeId`]) that the linker
//! has already checked against the field's capability. Records serialize to
//! the same body shape they were loaded from, with references written back
//! as indices; the location lives outside the body and is skipped here.

use serde::Serialize;

use crate::handle::{cap, AnyRef, Capability, ExprRef, NodeId, NodeRef, ScopeId, TypeRef};
use crate::kind::NodeKind;
use crate::loc::Loc;
use crate::ops::{BinaryOp, IdentUsage, UnaryOp};

/// Implemented by every node record; ties the record to its kind.
pub trait NodeData: Capability + Sized {
    const KIND: NodeKind;

    fn from_node(node: &Node) -> Option<&Self>;
}

macro_rules! nodes {
    ($($variant:ident),+ $(,)?) => {
        /// A node of any kind.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Node {
            $($variant($variant),)+
        }

        impl Node {
            pub fn kind(&self) -> NodeKind {
                match self {
                    $(Node::$variant(_) => NodeKind::$variant,)+
                }
            }

            pub fn loc(&self) -> Loc {
                match self {
                    $(Node::$variant(n) => n.loc,)+
                }
            }

            pub(crate) fn body(&self) -> Result<serde_json::Value, serde_json::Error> {
                match self {
                    $(Node::$variant(n) => serde_json::to_value(n),)+
                }
            }
        }

        $(
            impl Capability for $variant {
                const NAME: &'static str = NodeKind::$variant.as_str();

                fn admits(kind: NodeKind) -> bool {
                    kind == NodeKind::$variant
                }
            }

            impl NodeData for $variant {
                const KIND: NodeKind = NodeKind::$variant;

                fn from_node(node: &Node) -> Option<&Self> {
                    match node {
                        Node::$variant(n) => Some(n),
                        _ => None,
                    }
                }
            }

            impl From<$variant> for Node {
                fn from(n: $variant) -> Self {
                    Node::$variant(n)
                }
            }
        )+
    };
}

nodes! {
    Program, Ident, Call, Paren, If, Unary, Binary, Range, MemberAccess, Cond,
    Index, Match, TmpVar, BlockExpr, Import, IntLiteral, BoolLiteral, StrLiteral,
    Input, Output, Config, Loop, IndentScope, MatchBranch, Return, Break,
    Continue, Assert, ImplicitYield, Field, Format, Function, IntType, IdentType,
    IntLiteralType, StrLiteralType, VoidType, BoolType, ArrayType, FunctionType,
    StructType, UnionType,
}

/// Root of a document. Always node 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Program {
    #[serde(skip)]
    pub loc: Loc,
    pub struct_type: Option<NodeRef<StructType>>,
    pub elements: Vec<AnyRef>,
    pub global_scope: ScopeId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ident {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub ident: String,
    pub usage: IdentUsage,
    /// The defining identifier, for references.
    pub base: Option<NodeRef<Ident>>,
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Call {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub callee: ExprRef,
    pub raw_arguments: Option<ExprRef>,
    pub arguments: Vec<ExprRef>,
    pub end_loc: Option<Loc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paren {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub expr: ExprRef,
    pub end_loc: Option<Loc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct If {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub cond: ExprRef,
    pub then: NodeRef<IndentScope>,
    /// Either another `if` or an `indent_scope`.
    pub els: Option<AnyRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Unary {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub op: UnaryOp,
    pub expr: ExprRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binary {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub op: BinaryOp,
    pub left: ExprRef,
    pub right: ExprRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Range {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub op: BinaryOp,
    pub start: Option<ExprRef>,
    pub end: Option<ExprRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberAccess {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub target: ExprRef,
    pub member: String,
    pub member_loc: Option<Loc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cond {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub cond: ExprRef,
    pub then: ExprRef,
    pub els_loc: Option<Loc>,
    pub els: ExprRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Index {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub expr: ExprRef,
    pub index: ExprRef,
    pub end_loc: Option<Loc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub cond: Option<ExprRef>,
    pub branch: Vec<NodeRef<MatchBranch>>,
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TmpVar {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub tmp_var: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockExpr {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub calls: Vec<AnyRef>,
    pub expr: ExprRef,
}

/// `input.import("path")`: the call that triggered the import plus the
/// imported module's own program.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Import {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub path: String,
    pub base: NodeRef<Call>,
    pub import_desc: NodeRef<Program>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntLiteral {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    /// Literal text as written, e.g. `0x10`.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoolLiteral {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrLiteral {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Input {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Output {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    #[serde(skip)]
    pub loc: Loc,
    pub expr_type: Option<TypeRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Loop {
    #[serde(skip)]
    pub loc: Loc,
    pub init: Option<ExprRef>,
    pub cond: Option<ExprRef>,
    pub step: Option<ExprRef>,
    pub body: NodeRef<IndentScope>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndentScope {
    #[serde(skip)]
    pub loc: Loc,
    pub elements: Vec<AnyRef>,
    pub scope: ScopeId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchBranch {
    #[serde(skip)]
    pub loc: Loc,
    pub cond: ExprRef,
    pub sym_loc: Option<Loc>,
    pub then: AnyRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Return {
    #[serde(skip)]
    pub loc: Loc,
    pub expr: Option<ExprRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Break {
    #[serde(skip)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Continue {
    #[serde(skip)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assert {
    #[serde(skip)]
    pub loc: Loc,
    pub cond: NodeRef<Binary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImplicitYield {
    #[serde(skip)]
    pub loc: Loc,
    pub expr: ExprRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    #[serde(skip)]
    pub loc: Loc,
    /// Absent for anonymous fields.
    pub ident: Option<NodeRef<Ident>>,
    pub colon_loc: Option<Loc>,
    pub field_type: TypeRef,
    pub raw_arguments: Option<ExprRef>,
    pub arguments: Vec<ExprRef>,
    pub belong: Option<NodeRef<Format>>,
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Format {
    #[serde(skip)]
    pub loc: Loc,
    pub is_enum: bool,
    pub ident: NodeRef<Ident>,
    pub body: NodeRef<IndentScope>,
    /// Enclosing format, for nested definitions.
    pub belong: Option<NodeRef<Format>>,
    pub struct_type: Option<NodeRef<StructType>>,
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Function {
    #[serde(skip)]
    pub loc: Loc,
    pub ident: NodeRef<Ident>,
    pub parameters: Vec<NodeRef<Field>>,
    pub return_type: Option<TypeRef>,
    pub belong: Option<NodeRef<Format>>,
    pub body: NodeRef<IndentScope>,
    pub func_type: Option<NodeRef<FunctionType>>,
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntType {
    #[serde(skip)]
    pub loc: Loc,
    pub raw: String,
    pub bit_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentType {
    #[serde(skip)]
    pub loc: Loc,
    pub ident: NodeRef<Ident>,
    /// The referenced format once resolved.
    pub base: Option<NodeRef<Format>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntLiteralType {
    #[serde(skip)]
    pub loc: Loc,
    pub base: NodeRef<IntLiteral>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrLiteralType {
    #[serde(skip)]
    pub loc: Loc,
    pub base: NodeRef<StrLiteral>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoidType {
    #[serde(skip)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoolType {
    #[serde(skip)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArrayType {
    #[serde(skip)]
    pub loc: Loc,
    pub end_loc: Option<Loc>,
    pub base_type: TypeRef,
    /// Absent for arrays sized at runtime.
    pub length: Option<ExprRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionType {
    #[serde(skip)]
    pub loc: Loc,
    pub return_type: Option<TypeRef>,
    pub parameters: Vec<TypeRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructType {
    #[serde(skip)]
    pub loc: Loc,
    pub fields: Vec<NodeRef<cap::Member>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnionType {
    #[serde(skip)]
    pub loc: Loc,
    pub fields: Vec<NodeRef<StructType>>,
}

impl Node {
    /// The resolved type of an expression node, if it has been type-checked.
    pub fn expr_type(&self) -> Option<TypeRef> {
        match self {
            Node::Ident(n) => n.expr_type,
            Node::Call(n) => n.expr_type,
            Node::Paren(n) => n.expr_type,
            Node::If(n) => n.expr_type,
            Node::Unary(n) => n.expr_type,
            Node::Binary(n) => n.expr_type,
            Node::Range(n) => n.expr_type,
            Node::MemberAccess(n) => n.expr_type,
            Node::Cond(n) => n.expr_type,
            Node::Index(n) => n.expr_type,
            Node::Match(n) => n.expr_type,
            Node::TmpVar(n) => n.expr_type,
            Node::BlockExpr(n) => n.expr_type,
            Node::Import(n) => n.expr_type,
            Node::IntLiteral(n) => n.expr_type,
            Node::BoolLiteral(n) => n.expr_type,
            Node::StrLiteral(n) => n.expr_type,
            Node::Input(n) => n.expr_type,
            Node::Output(n) => n.expr_type,
            Node::Config(n) => n.expr_type,
            _ => None,
        }
    }

    /// Outgoing structural references in traversal order.
    ///
    /// Resolved `expr_type` links are not children; back references such as
    /// `Ident::base` and `Format::belong` are, so walks must track visits.
    pub fn children(&self) -> Vec<NodeId> {
        let mut out = Children::default();
        match self {
            Node::Program(n) => {
                out.opt(n.struct_type);
                out.all(&n.elements);
            }
            Node::Ident(n) => out.opt(n.base),
            Node::Call(n) => {
                out.one(n.callee);
                out.all(&n.arguments);
            }
            Node::Paren(n) => out.one(n.expr),
            Node::If(n) => {
                out.one(n.cond);
                out.one(n.then);
                out.opt(n.els);
            }
            Node::Unary(n) => out.one(n.expr),
            Node::Binary(n) => {
                out.one(n.left);
                out.one(n.right);
            }
            Node::Range(n) => {
                out.opt(n.start);
                out.opt(n.end);
            }
            Node::MemberAccess(n) => out.one(n.target),
            Node::Cond(n) => {
                out.one(n.cond);
                out.one(n.then);
                out.one(n.els);
            }
            Node::Index(n) => {
                out.one(n.expr);
                out.one(n.index);
            }
            Node::Match(n) => {
                out.opt(n.cond);
                out.all(&n.branch);
            }
            Node::TmpVar(_) => {}
            Node::BlockExpr(n) => {
                out.all(&n.calls);
                out.one(n.expr);
            }
            Node::Import(n) => {
                out.one(n.base);
                out.one(n.import_desc);
            }
            Node::IntLiteral(_)
            | Node::BoolLiteral(_)
            | Node::StrLiteral(_)
            | Node::Input(_)
            | Node::Output(_)
            | Node::Config(_) => {}
            Node::Loop(n) => {
                out.opt(n.init);
                out.opt(n.cond);
                out.opt(n.step);
                out.one(n.body);
            }
            Node::IndentScope(n) => out.all(&n.elements),
            Node::MatchBranch(n) => {
                out.one(n.cond);
                out.one(n.then);
            }
            Node::Return(n) => out.opt(n.expr),
            Node::Break(_) | Node::Continue(_) => {}
            Node::Assert(n) => out.one(n.cond),
            Node::ImplicitYield(n) => out.one(n.expr),
            Node::Field(n) => {
                out.opt(n.ident);
                out.one(n.field_type);
                out.all(&n.arguments);
                out.opt(n.belong);
            }
            Node::Format(n) => {
                out.one(n.ident);
                out.one(n.body);
                out.opt(n.belong);
            }
            Node::Function(n) => {
                out.one(n.ident);
                out.all(&n.parameters);
                out.opt(n.return_type);
                out.one(n.body);
                out.opt(n.belong);
            }
            Node::IntType(_) => {}
            Node::IdentType(n) => {
                out.one(n.ident);
                out.opt(n.base);
            }
            Node::IntLiteralType(n) => out.one(n.base),
            Node::StrLiteralType(n) => out.one(n.base),
            Node::VoidType(_) | Node::BoolType(_) => {}
            Node::ArrayType(n) => {
                out.one(n.base_type);
                out.opt(n.length);
            }
            Node::FunctionType(n) => {
                out.opt(n.return_type);
                out.all(&n.parameters);
            }
            Node::StructType(n) => out.all(&n.fields),
            Node::UnionType(n) => out.all(&n.fields),
        }
        out.0
    }
}

#[derive(Default)]
struct Children(Vec<NodeId>);

impl Children {
    fn one<C>(&mut self, r: NodeRef<C>) {
        self.0.push(r.id());
    }

    fn opt<C>(&mut self, r: Option<NodeRef<C>>) {
        if let Some(r) = r {
            self.one(r);
        }
    }

    fn all<C>(&mut self, refs: &[NodeRef<C>]) {
        self.0.extend(refs.iter().map(|r| r.id()));
    }
}
