//! Two-pass construction of an [`Ast`] from an interchange [`Document`].
//!
//! Pass one reads every node tag and fixes the kind table. Pass two decodes
//! each body against its kind's schema and resolves every index through
//! [`Linker`], which checks range and capability in one place. Problems are
//! collected across the whole document and reported together; a graph is
//! only returned when there are none.

use std::io::Read;
use std::panic::{self, AssertUnwindSafe};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Collection, LinkError, LoadError, Owner};
use crate::graph::{Ast, Scope};
use crate::handle::{cap, Capability, NodeId, NodeRef, ScopeId};
use crate::kind::NodeKind;
use crate::loc::Loc;
use crate::node::{self, Node};

/// The flat, index-addressed form of a parsed program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "node")]
    pub nodes: Vec<RawNode>,
    #[serde(rename = "scope", default)]
    pub scopes: Vec<RawScope>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    pub node_type: String,
    #[serde(default)]
    pub loc: Loc,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawScope {
    #[serde(default)]
    pub prev: Option<u64>,
    #[serde(default)]
    pub next: Option<u64>,
    #[serde(default)]
    pub branch: Option<u64>,
    #[serde(default)]
    pub objects: Vec<u64>,
}

pub fn from_str(json: &str) -> Result<Ast, LoadError> {
    load(serde_json::from_str(json)?)
}

pub fn from_slice(json: &[u8]) -> Result<Ast, LoadError> {
    load(serde_json::from_slice(json)?)
}

pub fn from_reader<R: Read>(reader: R) -> Result<Ast, LoadError> {
    load(serde_json::from_reader(reader)?)
}

pub fn from_value(value: Value) -> Result<Ast, LoadError> {
    load(serde_json::from_value(value)?)
}

/// Build the typed graph for `document`, all or nothing.
pub fn load(document: Document) -> Result<Ast, LoadError> {
    match panic::catch_unwind(AssertUnwindSafe(|| build(&document))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic while linking".to_string());
            Err(LoadError::Internal(message))
        }
    }
}

fn build(document: &Document) -> Result<Ast, LoadError> {
    if document.nodes.is_empty() {
        return Err(LoadError::Empty);
    }

    let mut errors = Vec::new();
    let mut kinds = Vec::with_capacity(document.nodes.len());
    for (index, raw) in document.nodes.iter().enumerate() {
        match raw.node_type.parse::<NodeKind>() {
            Ok(kind) => kinds.push(kind),
            Err(_) => errors.push(LinkError::UnknownKind {
                index,
                tag: raw.node_type.clone(),
                suggestion: NodeKind::suggest(&raw.node_type),
            }),
        }
    }
    if !errors.is_empty() {
        return Err(LoadError::Link(errors));
    }
    if kinds[0] != NodeKind::Program {
        return Err(LoadError::RootNotProgram(kinds[0]));
    }

    let mut nodes = Vec::with_capacity(kinds.len());
    for (index, (raw, kind)) in document.nodes.iter().zip(&kinds).enumerate() {
        let mut linker = Linker {
            kinds: &kinds,
            scope_count: document.scopes.len(),
            owner: Owner::Node { index, kind: *kind },
            errors: &mut errors,
        };
        if let Some(node) = link_node(&mut linker, *kind, raw) {
            nodes.push(node);
        }
    }

    let mut scopes = Vec::with_capacity(document.scopes.len());
    for (index, raw) in document.scopes.iter().enumerate() {
        let mut linker = Linker {
            kinds: &kinds,
            scope_count: document.scopes.len(),
            owner: Owner::Scope { index },
            errors: &mut errors,
        };
        if let Some(scope) = link_scope(&mut linker, raw) {
            scopes.push(scope);
        }
    }

    if !errors.is_empty() {
        return Err(LoadError::Link(errors));
    }
    debug!(
        nodes = nodes.len(),
        scopes = scopes.len(),
        "linked interchange document"
    );
    Ok(Ast { nodes, scopes })
}

/// Resolves raw indices on behalf of one owner, recording every failure.
struct Linker<'a> {
    kinds: &'a [NodeKind],
    scope_count: usize,
    owner: Owner,
    errors: &'a mut Vec<LinkError>,
}

impl Linker<'_> {
    fn body<T: DeserializeOwned>(&mut self, body: &Value) -> Option<T> {
        let parsed = if body.is_null() {
            T::deserialize(&Value::Object(Default::default()))
        } else {
            T::deserialize(body)
        };
        match parsed {
            Ok(body) => Some(body),
            Err(err) => {
                self.errors.push(LinkError::Body {
                    owner: self.owner,
                    message: err.to_string(),
                });
                None
            }
        }
    }

    fn node<C: Capability>(&mut self, field: &'static str, index: u64) -> Option<NodeRef<C>> {
        let Some(found) = usize::try_from(index)
            .ok()
            .and_then(|i| self.kinds.get(i).copied())
        else {
            self.errors.push(LinkError::OutOfRange {
                owner: self.owner,
                field,
                collection: Collection::Nodes,
                target: index,
                len: self.kinds.len(),
            });
            return None;
        };
        let target = index as usize;
        if !C::admits(found) {
            self.errors.push(LinkError::KindMismatch {
                owner: self.owner,
                field,
                expected: C::NAME,
                found,
                target,
            });
            return None;
        }
        Some(NodeRef::new_unchecked(NodeId(target)))
    }

    /// Outer `None` means a failure was recorded.
    fn opt<C: Capability>(
        &mut self,
        field: &'static str,
        index: Option<u64>,
    ) -> Option<Option<NodeRef<C>>> {
        match index {
            Some(index) => self.node(field, index).map(Some),
            None => Some(None),
        }
    }

    fn list<C: Capability>(
        &mut self,
        field: &'static str,
        indices: &[u64],
    ) -> Option<Vec<NodeRef<C>>> {
        let mut ok = true;
        let mut out = Vec::with_capacity(indices.len());
        for &index in indices {
            match self.node(field, index) {
                Some(r) => out.push(r),
                None => ok = false,
            }
        }
        ok.then_some(out)
    }

    fn scope(&mut self, field: &'static str, index: u64) -> Option<ScopeId> {
        match usize::try_from(index) {
            Ok(i) if i < self.scope_count => Some(ScopeId(i)),
            _ => {
                self.errors.push(LinkError::OutOfRange {
                    owner: self.owner,
                    field,
                    collection: Collection::Scopes,
                    target: index,
                    len: self.scope_count,
                });
                None
            }
        }
    }

    fn opt_scope(&mut self, field: &'static str, index: Option<u64>) -> Option<Option<ScopeId>> {
        match index {
            Some(index) => self.scope(field, index).map(Some),
            None => Some(None),
        }
    }
}

fn link_scope(l: &mut Linker<'_>, raw: &RawScope) -> Option<Scope> {
    let prev = l.opt_scope("prev", raw.prev);
    let next = l.opt_scope("next", raw.next);
    let branch = l.opt_scope("branch", raw.branch);
    let objects = l.list::<cap::Object>("objects", &raw.objects);
    Some(Scope {
        prev: prev?,
        next: next?,
        branch: branch?,
        objects: objects?,
    })
}

/// Each arm resolves every field before combining them, so one pass over a
/// body reports all of its bad references rather than only the first.
fn link_node(l: &mut Linker<'_>, kind: NodeKind, source: &RawNode) -> Option<Node> {
    let loc = source.loc;
    let node = match kind {
        NodeKind::Program => {
            let b: raw::Program = l.body(&source.body)?;
            let struct_type = l.opt("struct_type", b.struct_type);
            let elements = l.list("elements", &b.elements);
            let global_scope = l.scope("global_scope", b.global_scope);
            Node::Program(node::Program {
                loc,
                struct_type: struct_type?,
                elements: elements?,
                global_scope: global_scope?,
            })
        }
        NodeKind::Ident => {
            let b: raw::Ident = l.body(&source.body)?;
            let expr_type = l.opt("expr_type", b.expr_type);
            let base = l.opt("base", b.base);
            let scope = l.opt_scope("scope", b.scope);
            Node::Ident(node::Ident {
                loc,
                expr_type: expr_type?,
                ident: b.ident,
                usage: b.usage,
                base: base?,
                scope: scope?,
            })
        }
        NodeKind::Call => {
            let b: raw::Call = l.body(&source.body)?;
            let expr_type = l.opt("expr_type", b.expr_type);
            let callee = l.node("callee", b.callee);
            let raw_arguments = l.opt("raw_arguments", b.raw_arguments);
            let arguments = l.list("arguments", &b.arguments);
            Node::Call(node::Call {
                loc,
                expr_type: expr_type?,
                callee: callee?,
                raw_arguments: raw_arguments?,
                arguments: arguments?,
                end_loc: b.end_loc,
            })
        }
        NodeKind::Paren => {
            let b: raw::Paren = l.body(&source.body)?;
            let expr_type = l.opt("expr_type", b.expr_type);
            let expr = l.node("expr", b.expr);
            Node::Paren(node::Paren {
                loc,
                expr_type: expr_type?,
                expr: expr?,
                end_loc: b.end_loc,
            })
        }
        NodeKind::If => {
            let b: raw::If = l.body(&source.body)?;
            let expr_type = l.opt("expr_type", b.expr_type);
            let cond = l.node("cond", b.cond);
            let then = l.node("then", b.then);
            let els = l.opt("els", b.els);
            Node::If(node::If {
                loc,
                expr_type: expr_type?,
                cond: cond?,
                then: then?,
                els: els?,
            })
        }
        NodeKind::Unary => {
            let b: raw::Unary = l.body(&source.body)?;
            let expr_type = l.opt("expr_type", b.expr_type);
            let expr = l.node("expr", b.expr);
            Node::Unary(node::Unary {
                loc,
                expr_type: expr_type?,
                op: b.op,
                expr: expr?,
            })
        }
        NodeKind::Binary => {
            let b: raw::Binary = l.body(&source.body)?;
            let expr_type = l.opt("expr_type", b.expr_type);
            let left = l.node("left", b.left);
            let right = l.node("right", b.right);
            Node::Binary(node::Binary {
                loc,
                expr_type: expr_type?,
                op: b.op,
                left: left?,
                right: right?,
            })
        }
        NodeKind::Range => {
            let b: raw::Range = l.body(&source.body)?;
            let expr_type = l.opt("expr_type", b.expr_type);
            let start = l.opt("start", b.start);
            let end = l.opt("end", b.end);
            Node::Range(node::Range {
                loc,
                expr_type: expr_type?,
                op: b.op,
                start: start?,
                end: end?,
            })
        }
        NodeKind::MemberAccess => {
            let b: raw::MemberAccess = l.body(&source.body)?;
            let expr_type = l.opt("expr_type", b.expr_type);
            let target = l.node("target", b.target);
            Node::MemberAccess(node::MemberAccess {
                loc,
                expr_type: expr_type?,
                target: target?,
                member: b.member,
                member_loc: b.member_loc,
            })
        }
        NodeKind::Cond => {
            let b: raw::Cond = l.body(&source.body)?;
            let expr_type = l.opt("expr_type", b.expr_type);
            let cond = l.node("cond", b.cond);
            let then = l.node("then", b.then);
            let els = l.node("els", b.els);
            Node::Cond(node::Cond {
                loc,
                expr_type: expr_type?,
                cond: cond?,
                then: then?,
                els_loc: b.els_loc,
                els: els?,
            })
        }
        NodeKind::Index => {
            let b: raw::Index = l.body(&source.body)?;
            let expr_type = l.opt("expr_type", b.expr_type);
            let expr = l.node("expr", b.expr);
            let index = l.node("index", b.index);
            Node::Index(node::Index {
                loc,
                expr_type: expr_type?,
                expr: expr?,
                index: index?,
                end_loc: b.end_loc,
            })
        }
        NodeKind::Match => {
            let b: raw::Match = l.body(&source.body)?;
            let expr_type = l.opt("expr_type", b.expr_type);
            let cond = l.opt("cond", b.cond);
            let branch = l.list("branch", &b.branch);
            let scope = l.opt_scope("scope", b.scope);
            Node::Match(node::Match {
                loc,
                expr_type: expr_type?,
                cond: cond?,
                branch: branch?,
                scope: scope?,
            })
        }
        NodeKind::TmpVar => {
            let b: raw::TmpVar = l.body(&source.body)?;
            let expr_type = l.opt("expr_type", b.expr_type);
            Node::TmpVar(node::TmpVar {
                loc,
                expr_type: expr_type?,
                tmp_var: b.tmp_var,
            })
        }
        NodeKind::BlockExpr => {
            let b: raw::BlockExpr = l.body(&source.body)?;
            let expr_type = l.opt("expr_type", b.expr_type);
            let calls = l.list("calls", &b.calls);
            let expr = l.node("expr", b.expr);
            Node::BlockExpr(node::BlockExpr {
                loc,
                expr_type: expr_type?,
                calls: calls?,
                expr: expr?,
            })
        }
        NodeKind::Import => {
            let b: raw::Import = l.body(&source.body)?;
            let expr_type = l.opt("expr_type", b.expr_type);
            let base = l.node("base", b.base);
            let import_desc = l.node("import_desc", b.import_desc);
            Node::Import(node::Import {
                loc,
                expr_type: expr_type?,
                path: b.path,
                base: base?,
                import_desc: import_desc?,
            })
        }
        NodeKind::IntLiteral => {
            let b: raw::Literal<String> = l.body(&source.body)?;
            Node::IntLiteral(node::IntLiteral {
                loc,
                expr_type: l.opt("expr_type", b.expr_type)?,
                value: b.value,
            })
        }
        NodeKind::BoolLiteral => {
            let b: raw::Literal<bool> = l.body(&source.body)?;
            Node::BoolLiteral(node::BoolLiteral {
                loc,
                expr_type: l.opt("expr_type", b.expr_type)?,
                value: b.value,
            })
        }
        NodeKind::StrLiteral => {
            let b: raw::Literal<String> = l.body(&source.body)?;
            Node::StrLiteral(node::StrLiteral {
                loc,
                expr_type: l.opt("expr_type", b.expr_type)?,
                value: b.value,
            })
        }
        NodeKind::Input => {
            let b: raw::Typed = l.body(&source.body)?;
            Node::Input(node::Input {
                loc,
                expr_type: l.opt("expr_type", b.expr_type)?,
            })
        }
        NodeKind::Output => {
            let b: raw::Typed = l.body(&source.body)?;
            Node::Output(node::Output {
                loc,
                expr_type: l.opt("expr_type", b.expr_type)?,
            })
        }
        NodeKind::Config => {
            let b: raw::Typed = l.body(&source.body)?;
            Node::Config(node::Config {
                loc,
                expr_type: l.opt("expr_type", b.expr_type)?,
            })
        }
        NodeKind::Loop => {
            let b: raw::Loop = l.body(&source.body)?;
            let init = l.opt("init", b.init);
            let cond = l.opt("cond", b.cond);
            let step = l.opt("step", b.step);
            let body = l.node("body", b.body);
            Node::Loop(node::Loop {
                loc,
                init: init?,
                cond: cond?,
                step: step?,
                body: body?,
            })
        }
        NodeKind::IndentScope => {
            let b: raw::IndentScope = l.body(&source.body)?;
            let elements = l.list("elements", &b.elements);
            let scope = l.scope("scope", b.scope);
            Node::IndentScope(node::IndentScope {
                loc,
                elements: elements?,
                scope: scope?,
            })
        }
        NodeKind::MatchBranch => {
            let b: raw::MatchBranch = l.body(&source.body)?;
            let cond = l.node("cond", b.cond);
            let then = l.node("then", b.then);
            Node::MatchBranch(node::MatchBranch {
                loc,
                cond: cond?,
                sym_loc: b.sym_loc,
                then: then?,
            })
        }
        NodeKind::Return => {
            let b: raw::Return = l.body(&source.body)?;
            Node::Return(node::Return {
                loc,
                expr: l.opt("expr", b.expr)?,
            })
        }
        NodeKind::Break => {
            let raw::Empty {} = l.body(&source.body)?;
            Node::Break(node::Break { loc })
        }
        NodeKind::Continue => {
            let raw::Empty {} = l.body(&source.body)?;
            Node::Continue(node::Continue { loc })
        }
        NodeKind::Assert => {
            let b: raw::Assert = l.body(&source.body)?;
            Node::Assert(node::Assert {
                loc,
                cond: l.node("cond", b.cond)?,
            })
        }
        NodeKind::ImplicitYield => {
            let b: raw::ImplicitYield = l.body(&source.body)?;
            Node::ImplicitYield(node::ImplicitYield {
                loc,
                expr: l.node("expr", b.expr)?,
            })
        }
        NodeKind::Field => {
            let b: raw::Field = l.body(&source.body)?;
            let ident = l.opt("ident", b.ident);
            let field_type = l.node("field_type", b.field_type);
            let raw_arguments = l.opt("raw_arguments", b.raw_arguments);
            let arguments = l.list("arguments", &b.arguments);
            let belong = l.opt("belong", b.belong);
            let scope = l.opt_scope("scope", b.scope);
            Node::Field(node::Field {
                loc,
                ident: ident?,
                colon_loc: b.colon_loc,
                field_type: field_type?,
                raw_arguments: raw_arguments?,
                arguments: arguments?,
                belong: belong?,
                scope: scope?,
            })
        }
        NodeKind::Format => {
            let b: raw::Format = l.body(&source.body)?;
            let ident = l.node("ident", b.ident);
            let body = l.node("body", b.body);
            let belong = l.opt("belong", b.belong);
            let struct_type = l.opt("struct_type", b.struct_type);
            let scope = l.opt_scope("scope", b.scope);
            Node::Format(node::Format {
                loc,
                is_enum: b.is_enum,
                ident: ident?,
                body: body?,
                belong: belong?,
                struct_type: struct_type?,
                scope: scope?,
            })
        }
        NodeKind::Function => {
            let b: raw::Function = l.body(&source.body)?;
            let ident = l.node("ident", b.ident);
            let parameters = l.list("parameters", &b.parameters);
            let return_type = l.opt("return_type", b.return_type);
            let belong = l.opt("belong", b.belong);
            let body = l.node("body", b.body);
            let func_type = l.opt("func_type", b.func_type);
            let scope = l.opt_scope("scope", b.scope);
            Node::Function(node::Function {
                loc,
                ident: ident?,
                parameters: parameters?,
                return_type: return_type?,
                belong: belong?,
                body: body?,
                func_type: func_type?,
                scope: scope?,
            })
        }
        NodeKind::IntType => {
            let b: raw::IntType = l.body(&source.body)?;
            Node::IntType(node::IntType {
                loc,
                raw: b.raw,
                bit_size: b.bit_size,
            })
        }
        NodeKind::IdentType => {
            let b: raw::IdentType = l.body(&source.body)?;
            let ident = l.node("ident", b.ident);
            let base = l.opt("base", b.base);
            Node::IdentType(node::IdentType {
                loc,
                ident: ident?,
                base: base?,
            })
        }
        NodeKind::IntLiteralType => {
            let b: raw::LiteralType = l.body(&source.body)?;
            Node::IntLiteralType(node::IntLiteralType {
                loc,
                base: l.node("base", b.base)?,
            })
        }
        NodeKind::StrLiteralType => {
            let b: raw::LiteralType = l.body(&source.body)?;
            Node::StrLiteralType(node::StrLiteralType {
                loc,
                base: l.node("base", b.base)?,
            })
        }
        NodeKind::VoidType => {
            let raw::Empty {} = l.body(&source.body)?;
            Node::VoidType(node::VoidType { loc })
        }
        NodeKind::BoolType => {
            let raw::Empty {} = l.body(&source.body)?;
            Node::BoolType(node::BoolType { loc })
        }
        NodeKind::ArrayType => {
            let b: raw::ArrayType = l.body(&source.body)?;
            let base_type = l.node("base_type", b.base_type);
            let length = l.opt("length", b.length);
            Node::ArrayType(node::ArrayType {
                loc,
                end_loc: b.end_loc,
                base_type: base_type?,
                length: length?,
            })
        }
        NodeKind::FunctionType => {
            let b: raw::FunctionType = l.body(&source.body)?;
            let return_type = l.opt("return_type", b.return_type);
            let parameters = l.list("parameters", &b.parameters);
            Node::FunctionType(node::FunctionType {
                loc,
                return_type: return_type?,
                parameters: parameters?,
            })
        }
        NodeKind::StructType => {
            let b: raw::Fields = l.body(&source.body)?;
            Node::StructType(node::StructType {
                loc,
                fields: l.list("fields", &b.fields)?,
            })
        }
        NodeKind::UnionType => {
            let b: raw::Fields = l.body(&source.body)?;
            Node::UnionType(node::UnionType {
                loc,
                fields: l.list("fields", &b.fields)?,
            })
        }
    };
    Some(node)
}

/// Body schemas as they appear on the wire, references still as indices.
mod raw {
    use serde::Deserialize;

    use crate::loc::Loc;
    use crate::ops::{BinaryOp, IdentUsage, UnaryOp};

    #[derive(Deserialize)]
    pub struct Empty {}

    #[derive(Deserialize)]
    pub struct Typed {
        #[serde(default)]
        pub expr_type: Option<u64>,
    }

    #[derive(Deserialize)]
    pub struct Literal<T> {
        #[serde(default)]
        pub expr_type: Option<u64>,
        pub value: T,
    }

    #[derive(Deserialize)]
    pub struct Program {
        #[serde(default)]
        pub struct_type: Option<u64>,
        #[serde(default)]
        pub elements: Vec<u64>,
        pub global_scope: u64,
    }

    #[derive(Deserialize)]
    pub struct Ident {
        #[serde(default)]
        pub expr_type: Option<u64>,
        pub ident: String,
        #[serde(default)]
        pub usage: IdentUsage,
        #[serde(default)]
        pub base: Option<u64>,
        #[serde(default)]
        pub scope: Option<u64>,
    }

    #[derive(Deserialize)]
    pub struct Call {
        #[serde(default)]
        pub expr_type: Option<u64>,
        pub callee: u64,
        #[serde(default)]
        pub raw_arguments: Option<u64>,
        #[serde(default)]
        pub arguments: Vec<u64>,
        #[serde(default)]
        pub end_loc: Option<Loc>,
    }

    #[derive(Deserialize)]
    pub struct Paren {
        #[serde(default)]
        pub expr_type: Option<u64>,
        pub expr: u64,
        #[serde(default)]
        pub end_loc: Option<Loc>,
    }

    #[derive(Deserialize)]
    pub struct If {
        #[serde(default)]
        pub expr_type: Option<u64>,
        pub cond: u64,
        pub then: u64,
        #[serde(default)]
        pub els: Option<u64>,
    }

    #[derive(Deserialize)]
    pub struct Unary {
        #[serde(default)]
        pub expr_type: Option<u64>,
        pub op: UnaryOp,
        pub expr: u64,
    }

    #[derive(Deserialize)]
    pub struct Binary {
        #[serde(default)]
        pub expr_type: Option<u64>,
        pub op: BinaryOp,
        pub left: u64,
        pub right: u64,
    }

    #[derive(Deserialize)]
    pub struct Range {
        #[serde(default)]
        pub expr_type: Option<u64>,
        pub op: BinaryOp,
        #[serde(default, alias = "begin")]
        pub start: Option<u64>,
        #[serde(default)]
        pub end: Option<u64>,
    }

    #[derive(Deserialize)]
    pub struct MemberAccess {
        #[serde(default)]
        pub expr_type: Option<u64>,
        pub target: u64,
        pub member: String,
        #[serde(default)]
        pub member_loc: Option<Loc>,
    }

    #[derive(Deserialize)]
    pub struct Cond {
        #[serde(default)]
        pub expr_type: Option<u64>,
        pub cond: u64,
        pub then: u64,
        #[serde(default)]
        pub els_loc: Option<Loc>,
        pub els: u64,
    }

    #[derive(Deserialize)]
    pub struct Index {
        #[serde(default)]
        pub expr_type: Option<u64>,
        pub expr: u64,
        pub index: u64,
        #[serde(default)]
        pub end_loc: Option<Loc>,
    }

    #[derive(Deserialize)]
    pub struct Match {
        #[serde(default)]
        pub expr_type: Option<u64>,
        #[serde(default)]
        pub cond: Option<u64>,
        #[serde(default)]
        pub branch: Vec<u64>,
        #[serde(default)]
        pub scope: Option<u64>,
    }

    #[derive(Deserialize)]
    pub struct TmpVar {
        #[serde(default)]
        pub expr_type: Option<u64>,
        pub tmp_var: u64,
    }

    #[derive(Deserialize)]
    pub struct BlockExpr {
        #[serde(default)]
        pub expr_type: Option<u64>,
        #[serde(default)]
        pub calls: Vec<u64>,
        pub expr: u64,
    }

    #[derive(Deserialize)]
    pub struct Import {
        #[serde(default)]
        pub expr_type: Option<u64>,
        pub path: String,
        pub base: u64,
        pub import_desc: u64,
    }

    #[derive(Deserialize)]
    pub struct Loop {
        #[serde(default)]
        pub init: Option<u64>,
        #[serde(default)]
        pub cond: Option<u64>,
        #[serde(default)]
        pub step: Option<u64>,
        pub body: u64,
    }

    #[derive(Deserialize)]
    pub struct IndentScope {
        #[serde(default)]
        pub elements: Vec<u64>,
        pub scope: u64,
    }

    #[derive(Deserialize)]
    pub struct MatchBranch {
        pub cond: u64,
        #[serde(default)]
        pub sym_loc: Option<Loc>,
        pub then: u64,
    }

    #[derive(Deserialize)]
    pub struct Return {
        #[serde(default)]
        pub expr: Option<u64>,
    }

    #[derive(Deserialize)]
    pub struct Assert {
        pub cond: u64,
    }

    #[derive(Deserialize)]
    pub struct ImplicitYield {
        pub expr: u64,
    }

    #[derive(Deserialize)]
    pub struct Field {
        #[serde(default)]
        pub ident: Option<u64>,
        #[serde(default)]
        pub colon_loc: Option<Loc>,
        pub field_type: u64,
        #[serde(default)]
        pub raw_arguments: Option<u64>,
        #[serde(default)]
        pub arguments: Vec<u64>,
        #[serde(default)]
        pub belong: Option<u64>,
        #[serde(default)]
        pub scope: Option<u64>,
    }

    #[derive(Deserialize)]
    pub struct Format {
        #[serde(default)]
        pub is_enum: bool,
        pub ident: u64,
        pub body: u64,
        #[serde(default)]
        pub belong: Option<u64>,
        #[serde(default)]
        pub struct_type: Option<u64>,
        #[serde(default)]
        pub scope: Option<u64>,
    }

    #[derive(Deserialize)]
    pub struct Function {
        pub ident: u64,
        #[serde(default)]
        pub parameters: Vec<u64>,
        #[serde(default)]
        pub return_type: Option<u64>,
        #[serde(default)]
        pub belong: Option<u64>,
        pub body: u64,
        #[serde(default)]
        pub func_type: Option<u64>,
        #[serde(default)]
        pub scope: Option<u64>,
    }

    #[derive(Deserialize)]
    pub struct IntType {
        #[serde(default)]
        pub raw: String,
        pub bit_size: u64,
    }

    #[derive(Deserialize)]
    pub struct IdentType {
        pub ident: u64,
        #[serde(default)]
        pub base: Option<u64>,
    }

    #[derive(Deserialize)]
    pub struct LiteralType {
        pub base: u64,
    }

    #[derive(Deserialize)]
    pub struct ArrayType {
        #[serde(default)]
        pub end_loc: Option<Loc>,
        pub base_type: u64,
        #[serde(default)]
        pub length: Option<u64>,
    }

    #[derive(Deserialize)]
    pub struct FunctionType {
        #[serde(default)]
        pub return_type: Option<u64>,
        #[serde(default)]
        pub parameters: Vec<u64>,
    }

    #[derive(Deserialize)]
    pub struct Fields {
        #[serde(default)]
        pub fields: Vec<u64>,
    }
}

impl Ast {
    /// Re-derive the flat interchange form of this graph.
    ///
    /// Loading the result yields a graph equal to `self`.
    pub fn to_document(&self) -> Result<Document, serde_json::Error> {
        let nodes = self
            .nodes
            .iter()
            .map(|node| -> Result<RawNode, serde_json::Error> {
                Ok(RawNode {
                    node_type: node.kind().as_str().to_string(),
                    loc: node.loc(),
                    body: node.body()?,
                })
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()?;
        let scopes = self
            .scopes
            .iter()
            .map(|scope| RawScope {
                prev: scope.prev.map(|s| s.index() as u64),
                next: scope.next.map(|s| s.index() as u64),
                branch: scope.branch.map(|s| s.index() as u64),
                objects: scope.objects.iter().map(|o| o.index() as u64).collect(),
            })
            .collect();
        Ok(Document { nodes, scopes })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_document()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "node": [
                {"node_type": "program", "loc": {"begin": 0, "end": 10, "file": 1},
                 "body": {"struct_type": null, "elements": [1], "global_scope": 0}},
                {"node_type": "binary", "loc": {"begin": 0, "end": 5, "file": 1},
                 "body": {"op": "+", "left": 2, "right": 2, "expr_type": null}},
                {"node_type": "int_literal", "loc": {"begin": 0, "end": 1, "file": 1},
                 "body": {"value": "1", "expr_type": null}}
            ],
            "scope": [{"prev": null, "next": null, "branch": null, "objects": []}]
        })
    }

    #[test]
    fn test_minimal_document_links() {
        let ast = from_value(minimal()).unwrap();
        assert_eq!(ast.nodes().len(), 3);
        assert_eq!(ast.scopes().len(), 1);
        let program = ast.program();
        assert_eq!(program.elements[0].index(), 1);
        match ast.node(program.elements[0]).unwrap() {
            Node::Binary(b) => {
                assert_eq!(b.left, b.right);
                assert_eq!(b.left.index(), 2);
                assert!(b.expr_type.is_none());
            }
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    #[test]
    fn test_unknown_tag_fails_whole_load() {
        let mut doc = minimal();
        doc["node"][2]["node_type"] = json!("int_literall");
        let err = from_value(doc).unwrap_err();
        assert!(err
            .to_string()
            .contains("unknown node kind: `int_literall`"));
        assert!(err.to_string().contains("did you mean `int_literal`"));
    }

    #[test]
    fn test_errors_are_collected_across_nodes() {
        let mut doc = minimal();
        doc["node"][1]["body"]["left"] = json!(7);
        doc["node"][1]["body"]["right"] = json!(0);
        let err = from_value(doc).unwrap_err();
        let errors = err.link_errors();
        assert_eq!(errors.len(), 2);
        assert!(matches!(
            errors[0],
            LinkError::OutOfRange {
                field: "left",
                collection: Collection::Nodes,
                target: 7,
                len: 3,
                ..
            }
        ));
        assert!(matches!(
            errors[1],
            LinkError::KindMismatch {
                field: "right",
                expected: "expr",
                found: NodeKind::Program,
                ..
            }
        ));
    }

    #[test]
    fn test_scope_reference_out_of_range() {
        let mut doc = minimal();
        doc["node"][0]["body"]["global_scope"] = json!(3);
        let err = from_value(doc).unwrap_err();
        assert!(matches!(
            err.link_errors(),
            [LinkError::OutOfRange {
                collection: Collection::Scopes,
                field: "global_scope",
                ..
            }]
        ));
    }

    #[test]
    fn test_scope_objects_must_be_declarations() {
        let mut doc = minimal();
        doc["scope"][0]["objects"] = json!([2]);
        let err = from_value(doc).unwrap_err();
        assert_eq!(
            err.to_string(),
            "scope 0: field `objects` expects object, found int_literal at node 2"
        );
    }

    #[test]
    fn test_bad_operator_is_body_error() {
        let mut doc = minimal();
        doc["node"][1]["body"]["op"] = json!("<=>");
        let err = from_value(doc).unwrap_err();
        assert!(matches!(
            err.link_errors(),
            [LinkError::Body {
                owner: Owner::Node {
                    index: 1,
                    kind: NodeKind::Binary
                },
                ..
            }]
        ));
    }

    #[test]
    fn test_root_must_be_program() {
        let mut doc = minimal();
        doc["node"][0]["node_type"] = json!("break");
        assert!(matches!(
            from_value(doc),
            Err(LoadError::RootNotProgram(NodeKind::Break))
        ));
        assert!(matches!(
            from_str(r#"{"node": [], "scope": []}"#),
            Err(LoadError::Empty)
        ));
    }

    #[test]
    fn test_nested_loc_and_missing_body_are_accepted() {
        let ast = from_value(json!({
            "node": [
                {"node_type": "program", "loc": {"pos": {"begin": 2, "end": 8}, "file": 1},
                 "body": {"elements": [1], "global_scope": 0}},
                {"node_type": "void_type", "loc": {"begin": 0, "end": 0, "file": 1}}
            ],
            "scope": [{}]
        }))
        .unwrap();
        assert_eq!(ast.program().loc, Loc::new(2, 8, 1));
        assert_eq!(ast.nodes()[1].kind(), NodeKind::VoidType);
    }
}
