//! The parser's output wrapper around an interchange document.

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::graph::Ast;
use crate::load::{self, Document};

/// Source file list, document, and parser diagnostics for one input.
///
/// `Loc::file` values are 1-based positions in `files`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AstFile {
    #[serde(rename = "file", default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub ast: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AstFile {
    pub fn parse(json: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_slice(json: &[u8]) -> Result<Self, LoadError> {
        Ok(serde_json::from_slice(json)?)
    }

    /// Name of the source file a location's `file` index refers to.
    pub fn file_name(&self, file: u64) -> Option<&str> {
        let index = usize::try_from(file).ok()?.checked_sub(1)?;
        self.files.get(index).map(String::as_str)
    }

    /// Load the contained document.
    ///
    /// Fails with [`LoadError::Empty`] when the parser produced no document.
    pub fn into_ast(self) -> Result<Ast, LoadError> {
        match self.ast {
            Some(document) => load::load(document),
            None => Err(LoadError::Empty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_error_without_document() {
        let file = AstFile::parse(r#"{"file":["a.bgn"],"ast":null,"error":"unexpected token"}"#)
            .unwrap();
        assert_eq!(file.error.as_deref(), Some("unexpected token"));
        assert_eq!(file.file_name(1), Some("a.bgn"));
        assert_eq!(file.file_name(0), None);
        assert!(matches!(file.into_ast(), Err(LoadError::Empty)));
    }
}
