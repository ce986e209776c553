//! Error types for document loading.

use std::fmt;

use thiserror::Error;

use crate::kind::NodeKind;

/// The raw element whose body or references failed to link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Node { index: usize, kind: NodeKind },
    Scope { index: usize },
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Node { index, kind } => write!(f, "node {} ({})", index, kind),
            Owner::Scope { index } => write!(f, "scope {}", index),
        }
    }
}

/// Which top-level array an index points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Nodes,
    Scopes,
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Collection::Nodes => "node",
            Collection::Scopes => "scope",
        })
    }
}

/// One problem found while allocating or linking a document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("node {index}: unknown node kind: `{tag}`{}", did_you_mean(.suggestion))]
    UnknownKind {
        index: usize,
        tag: String,
        suggestion: Option<&'static str>,
    },

    #[error("{owner}: invalid body: {message}")]
    Body { owner: Owner, message: String },

    #[error("{owner}: field `{field}` references {collection} {target}, but only {len} exist")]
    OutOfRange {
        owner: Owner,
        field: &'static str,
        collection: Collection,
        target: u64,
        len: usize,
    },

    #[error("{owner}: field `{field}` expects {expected}, found {found} at node {target}")]
    KindMismatch {
        owner: Owner,
        field: &'static str,
        expected: &'static str,
        found: NodeKind,
        target: usize,
    },
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("malformed document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("document contains no nodes")]
    Empty,

    #[error("node 0 must be a program, found {0}")]
    RootNotProgram(NodeKind),

    #[error("{}", render_link_errors(.0))]
    Link(Vec<LinkError>),

    #[error("internal loader error: {0}")]
    Internal(String),
}

impl LoadError {
    /// Individual link problems, empty for other variants.
    pub fn link_errors(&self) -> &[LinkError] {
        match self {
            LoadError::Link(errors) => errors,
            _ => &[],
        }
    }
}

fn did_you_mean(suggestion: &Option<&'static str>) -> String {
    suggestion
        .map(|s| format!(" (did you mean `{}`?)", s))
        .unwrap_or_default()
}

fn render_link_errors(errors: &[LinkError]) -> String {
    match errors {
        [] => "link failed".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (and {} more link errors)", first, rest.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_messages_name_field_and_kinds() {
        let err = LinkError::KindMismatch {
            owner: Owner::Node {
                index: 4,
                kind: NodeKind::If,
            },
            field: "then",
            expected: "indent_scope",
            found: NodeKind::IntLiteral,
            target: 2,
        };
        assert_eq!(
            err.to_string(),
            "node 4 (if): field `then` expects indent_scope, found int_literal at node 2"
        );
    }

    #[test]
    fn test_aggregate_renders_first_and_count() {
        let unknown = |index| LinkError::UnknownKind {
            index,
            tag: "bogus".into(),
            suggestion: None,
        };
        assert_eq!(
            LoadError::Link(vec![unknown(1)]).to_string(),
            "node 1: unknown node kind: `bogus`"
        );
        assert_eq!(
            LoadError::Link(vec![unknown(1), unknown(2), unknown(3)]).to_string(),
            "node 1: unknown node kind: `bogus` (and 2 more link errors)"
        );
    }
}
