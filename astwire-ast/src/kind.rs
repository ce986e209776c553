//! The closed enumeration of node kinds and their capability classes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strsim::levenshtein;

macro_rules! node_kinds {
    ($($variant:ident => $tag:literal,)+) => {
        /// Discriminant of a raw node, as written in the `node_type` field.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum NodeKind {
            $($variant,)+
        }

        impl NodeKind {
            /// Every kind, in declaration order.
            pub const ALL: &'static [NodeKind] = &[$(NodeKind::$variant,)+];

            /// The canonical tag of this kind.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(NodeKind::$variant => $tag,)+
                }
            }

            fn from_tag(tag: &str) -> Option<Self> {
                match tag {
                    $($tag => Some(NodeKind::$variant),)+
                    "string_literal" => Some(NodeKind::StrLiteral),
                    "string_literal_type" => Some(NodeKind::StrLiteralType),
                    _ => None,
                }
            }
        }
    };
}

node_kinds! {
    Program => "program",
    Ident => "ident",
    Call => "call",
    Paren => "paren",
    If => "if",
    Unary => "unary",
    Binary => "binary",
    Range => "range",
    MemberAccess => "member_access",
    Cond => "cond",
    Index => "index",
    Match => "match",
    TmpVar => "tmp_var",
    BlockExpr => "block_expr",
    Import => "import",
    IntLiteral => "int_literal",
    BoolLiteral => "bool_literal",
    StrLiteral => "str_literal",
    Input => "input",
    Output => "output",
    Config => "config",
    Loop => "loop",
    IndentScope => "indent_scope",
    MatchBranch => "match_branch",
    Return => "return",
    Break => "break",
    Continue => "continue",
    Assert => "assert",
    ImplicitYield => "implicit_yield",
    Field => "field",
    Format => "format",
    Function => "function",
    IntType => "int_type",
    IdentType => "ident_type",
    IntLiteralType => "int_literal_type",
    StrLiteralType => "str_literal_type",
    VoidType => "void_type",
    BoolType => "bool_type",
    ArrayType => "array_type",
    FunctionType => "function_type",
    StructType => "struct_type",
    UnionType => "union_type",
}

impl NodeKind {
    /// Kinds that produce a value and may carry a resolved `expr_type`.
    pub const fn is_expr(self) -> bool {
        use NodeKind::*;
        matches!(
            self,
            Ident
                | Call
                | Paren
                | If
                | Unary
                | Binary
                | Range
                | MemberAccess
                | Cond
                | Index
                | Match
                | TmpVar
                | BlockExpr
                | Import
        ) || self.is_literal()
    }

    pub const fn is_literal(self) -> bool {
        use NodeKind::*;
        matches!(
            self,
            IntLiteral | BoolLiteral | StrLiteral | Input | Output | Config
        )
    }

    pub const fn is_stmt(self) -> bool {
        use NodeKind::*;
        matches!(
            self,
            Loop | IndentScope
                | MatchBranch
                | Return
                | Break
                | Continue
                | Assert
                | ImplicitYield
        )
    }

    /// Declarations that may appear inside a format body or struct type.
    pub const fn is_member(self) -> bool {
        matches!(self, NodeKind::Field | NodeKind::Format | NodeKind::Function)
    }

    pub const fn is_type(self) -> bool {
        use NodeKind::*;
        matches!(
            self,
            IntType
                | IdentType
                | IntLiteralType
                | StrLiteralType
                | VoidType
                | BoolType
                | ArrayType
                | FunctionType
                | StructType
                | UnionType
        )
    }

    /// Kinds that expose a stable name and may be listed in `Scope::objects`.
    pub const fn is_object(self) -> bool {
        self.is_member() || matches!(self, NodeKind::Ident)
    }

    /// The closest known tag to `tag`, if any is reasonably close.
    pub fn suggest(tag: &str) -> Option<&'static str> {
        let lowered = tag.to_lowercase();
        if let Some(kind) = Self::from_tag(&lowered) {
            return Some(kind.as_str());
        }
        Self::ALL
            .iter()
            .map(|kind| (kind.as_str(), levenshtein(&lowered, kind.as_str())))
            .filter(|(_, distance)| *distance <= 3)
            .min_by_key(|(_, distance)| *distance)
            .map(|(candidate, _)| candidate)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownNodeKind(pub String);

impl fmt::Display for UnknownNodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown node kind: `{}`", self.0)
    }
}

impl std::error::Error for UnknownNodeKind {}

impl FromStr for NodeKind {
    type Err = UnknownNodeKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s).ok_or_else(|| UnknownNodeKind(s.to_string()))
    }
}

impl Serialize for NodeKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NodeKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        tag.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_round_trips_through_its_tag() {
        assert_eq!(NodeKind::ALL.len(), 42);
        for kind in NodeKind::ALL {
            assert_eq!(kind.as_str().parse::<NodeKind>(), Ok(*kind));
        }
    }

    #[test]
    fn test_long_form_literal_aliases() {
        assert_eq!("string_literal".parse::<NodeKind>(), Ok(NodeKind::StrLiteral));
        assert_eq!(
            "string_literal_type".parse::<NodeKind>(),
            Ok(NodeKind::StrLiteralType)
        );
    }

    #[test]
    fn test_capability_classes_do_not_overlap() {
        for kind in NodeKind::ALL {
            let classes = [kind.is_expr(), kind.is_stmt(), kind.is_member(), kind.is_type()];
            let count = classes.iter().filter(|c| **c).count();
            if *kind == NodeKind::Program {
                assert_eq!(count, 0, "program belongs to no class");
            } else {
                assert_eq!(count, 1, "{} belongs to {} classes", kind, count);
            }
        }
    }

    #[test]
    fn test_unknown_kind_message_and_suggestion() {
        let err = "identt".parse::<NodeKind>().unwrap_err();
        assert_eq!(err.to_string(), "unknown node kind: `identt`");
        assert_eq!(NodeKind::suggest("identt"), Some("ident"));
        assert_eq!(NodeKind::suggest("Format"), Some("format"));
        assert_eq!(NodeKind::suggest("completely_unrelated_tag"), None);
    }
}
