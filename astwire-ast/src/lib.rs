//! Typed graph loader for flat AST interchange documents.
//!
//! A parsed program is exchanged as two arrays, `node` and `scope`, whose
//! entries reference each other by index. [`load`] turns such a
//! [`Document`] into an [`Ast`]: an arena of typed [`Node`]s and [`Scope`]s
//! in which every reference has been range- and kind-checked.
//!
//! ```rust,ignore
//! use astwire_ast::Node;
//!
//! let ast = astwire_ast::from_str(&json)?;
//! ast.walk(ast.root(), |_, node| {
//!     if let Node::Format(format) = node {
//!         let name = ast.get(format.ident).map(|ident| ident.ident.as_str());
//!         println!("format {}", name.unwrap_or("?"));
//!     }
//!     true
//! });
//! ```

pub mod error;
pub mod file;
pub mod graph;
pub mod handle;
pub mod kind;
pub mod load;
pub mod loc;
pub mod node;
pub mod ops;

pub use error::{LinkError, LoadError};
pub use file::AstFile;
pub use graph::{Ast, Scope};
pub use handle::{cap, AnyRef, Capability, ExprRef, NodeId, NodeRef, ScopeId, TypeRef};
pub use kind::NodeKind;
pub use load::{from_reader, from_slice, from_str, from_value, load, Document, RawNode, RawScope};
pub use loc::Loc;
pub use node::{Node, NodeData};
pub use ops::{BinaryOp, IdentUsage, UnaryOp};
