//! Abstract syntax tree for policy expressions.
//!
//! The tree is a closed set of node kinds; the compiler matches on it
//! exhaustively, so adding a node kind is checked at compile time.

use crate::error::Position;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `=~`, pattern or regex match.
    Match,
    /// `!~`
    NotMatch,
    In,
    NotIn,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Match => "=~",
            CompareOp::NotMatch => "!~",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
        }
    }

    /// Operators whose result is the negation of a positive operator.
    pub fn positive(self) -> (CompareOp, bool) {
        match self {
            CompareOp::Ne => (CompareOp::Eq, true),
            CompareOp::NotMatch => (CompareOp::Match, true),
            CompareOp::NotIn => (CompareOp::In, true),
            op => (op, false),
        }
    }

    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge
        )
    }
}

/// Leaf nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Primary {
    /// A field name or a macro ID; resolved by the compiler.
    Ident { name: String, pos: Position },
    Str(String),
    /// `~"..."` glob pattern literal.
    Pattern(String),
    /// `r"..."` regex literal.
    Regex(String),
    Int(i64),
    Bool(bool),
}

/// Array literal items.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayItem {
    Str(String),
    Pattern(String),
    Regex(String),
    Int(i64),
}

/// An array literal, or an identifier standing for a macro list.
#[derive(Debug, Clone, PartialEq)]
pub enum Array {
    Items(Vec<ArrayItem>),
    Ident { name: String, pos: Position },
}

/// Expression nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        lhs: Box<Expr>,
        op: CompareOp,
        rhs: Box<Expr>,
        pos: Position,
    },
    Array(Array),
    Primary(Primary),
}

impl Expr {
    pub fn and(lhs: Expr, rhs: Expr) -> Self {
        Expr::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: Expr, rhs: Expr) -> Self {
        Expr::Or(Box::new(lhs), Box::new(rhs))
    }

    pub fn not(operand: Expr) -> Self {
        Expr::Not(Box::new(operand))
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Primary(Primary::Ident {
            name: name.into(),
            pos: Position::default(),
        })
    }

    pub fn compare(lhs: Expr, op: CompareOp, rhs: Expr) -> Self {
        Expr::Compare {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
            pos: Position::default(),
        }
    }
}

/// Top-level node of a macro source: an expression or a bare list.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroAst {
    Expression(Expr),
    Array(Array),
    Primary(Primary),
}

/// Top-level node of a rule source.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleAst {
    pub expr: Expr,
    pub source: String,
}
