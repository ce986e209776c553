//! Operator and identifier-usage enumerations carried in node bodies.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    #[serde(rename = "!")]
    Not,
    #[serde(rename = "-")]
    MinusSign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Mod,
    #[serde(rename = "<<")]
    LeftArithmeticShift,
    #[serde(rename = ">>")]
    RightArithmeticShift,
    #[serde(rename = "<<<")]
    LeftLogicalShift,
    #[serde(rename = ">>>")]
    RightLogicalShift,
    #[serde(rename = "&")]
    BitAnd,
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "|")]
    BitOr,
    #[serde(rename = "^")]
    BitXor,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessOrEq,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEq,
    #[serde(rename = "&&")]
    LogicalAnd,
    #[serde(rename = "||")]
    LogicalOr,
    #[serde(rename = "if")]
    CondIf,
    #[serde(rename = "else")]
    CondElse,
    #[serde(rename = "..")]
    RangeExclusive,
    #[serde(rename = "..=")]
    RangeInclusive,
    #[serde(rename = "=")]
    Assign,
    #[serde(rename = ":=")]
    DefineAssign,
    #[serde(rename = "::=")]
    ConstAssign,
    #[serde(rename = "+=")]
    AddAssign,
    #[serde(rename = "-=")]
    SubAssign,
    #[serde(rename = "*=")]
    MulAssign,
    #[serde(rename = "/=")]
    DivAssign,
    #[serde(rename = "%=")]
    ModAssign,
    #[serde(rename = "<<=")]
    LeftShiftAssign,
    #[serde(rename = ">>=")]
    RightShiftAssign,
    #[serde(rename = "&=")]
    BitAndAssign,
    #[serde(rename = "|=")]
    BitOrAssign,
    #[serde(rename = "^=")]
    BitXorAssign,
    #[serde(rename = ",")]
    Comma,
}

impl BinaryOp {
    pub fn is_assignment(self) -> bool {
        use BinaryOp::*;
        matches!(
            self,
            Assign
                | DefineAssign
                | ConstAssign
                | AddAssign
                | SubAssign
                | MulAssign
                | DivAssign
                | ModAssign
                | LeftShiftAssign
                | RightShiftAssign
                | BitAndAssign
                | BitOrAssign
                | BitXorAssign
        )
    }

    pub fn is_range(self) -> bool {
        matches!(self, BinaryOp::RangeExclusive | BinaryOp::RangeInclusive)
    }
}

/// What an identifier occurrence does at its position in the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentUsage {
    #[default]
    Unknown,
    Reference,
    DefineVariable,
    DefineConst,
    DefineField,
    DefineFormat,
    #[serde(rename = "define_fn")]
    DefineFunction,
    ReferenceType,
}

impl IdentUsage {
    pub fn is_definition(self) -> bool {
        use IdentUsage::*;
        matches!(
            self,
            DefineVariable | DefineConst | DefineField | DefineFormat | DefineFunction
        )
    }
}
