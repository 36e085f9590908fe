//! Intermediate representation for intents and their expressions.
//!
//! `Expr` is a closed, statically typed enum: every variant corresponds to a
//! whitelisted node kind (§3.2). There is no variant under which a bitwise
//! op, a call, a subscript, or a comprehension could be represented — the
//! type system is the enforcement mechanism, not a runtime check. A parser
//! that encounters a disallowed token never constructs an `Expr`; it returns
//! `KernelError::UnsupportedConstraint` naming the `NodeKind` it saw instead.

use serde::{Deserialize, Serialize};

/// Declared type of an intent parameter or state variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TypeTag {
    Int,
    UInt,
    Address,
    Bool,
    /// Fixed-point decimal with the given number of fractional digits.
    Decimal { scale: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub type_tag: TypeTag,
}

impl Param {
    pub fn new(name: impl Into<String>, type_tag: TypeTag) -> Self {
        Self { name: name.into(), type_tag }
    }
}

/// Every expression-node kind the grammar can produce a *token* for,
/// whitelisted or not. Used purely for diagnostics: naming the offending
/// kind in an `UnsupportedConstraint` rejection (§3.2, §7, scenario 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    IntLiteral,
    DecimalLiteral,
    Identifier,
    UnaryPlus,
    UnaryMinus,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Paren,
    // disallowed: every one of these is recognized by the lexer/parser
    // solely so it can be named in a rejection message.
    BitOr,
    BitAnd,
    BitXor,
    BitNot,
    Pow,
    FloorDiv,
    LShift,
    RShift,
    BoolAnd,
    BoolOr,
    Call,
    Attribute,
    Subscript,
    Comprehension,
}

impl NodeKind {
    pub fn is_supported(self) -> bool {
        SUPPORTED_NODES.contains(&self)
    }

    /// Category used to group the recovery hint enumerating the whitelist
    /// (§4.6: "arithmetic, comparison, unary, grouping").
    pub fn category(self) -> &'static str {
        use NodeKind::*;
        match self {
            IntLiteral | DecimalLiteral | Identifier => "literal",
            UnaryPlus | UnaryMinus => "unary",
            Add | Sub | Mul | Div | Mod => "arithmetic",
            Eq | Ne | Lt | Le | Gt | Ge => "comparison",
            Paren => "grouping",
            _ => "unsupported",
        }
    }

    pub fn as_str(self) -> &'static str {
        use NodeKind::*;
        match self {
            IntLiteral => "IntLiteral",
            DecimalLiteral => "DecimalLiteral",
            Identifier => "Identifier",
            UnaryPlus => "UnaryPlus",
            UnaryMinus => "UnaryMinus",
            Add => "Add",
            Sub => "Sub",
            Mul => "Mul",
            Div => "Div",
            Mod => "Mod",
            Eq => "Eq",
            Ne => "Ne",
            Lt => "Lt",
            Le => "Le",
            Gt => "Gt",
            Ge => "Ge",
            Paren => "Paren",
            BitOr => "BitOr",
            BitAnd => "BitAnd",
            BitXor => "BitXor",
            BitNot => "BitNot",
            Pow => "Pow",
            FloorDiv => "FloorDiv",
            LShift => "LShift",
            RShift => "RShift",
            BoolAnd => "BoolAnd",
            BoolOr => "BoolOr",
            Call => "Call",
            Attribute => "Attribute",
            Subscript => "Subscript",
            Comprehension => "Comprehension",
        }
    }
}

/// The hard whitelist from §3.2/§4.6. Grouped by category for recovery hints.
pub const SUPPORTED_NODES: &[NodeKind] = &[
    NodeKind::IntLiteral,
    NodeKind::DecimalLiteral,
    NodeKind::Identifier,
    NodeKind::UnaryPlus,
    NodeKind::UnaryMinus,
    NodeKind::Add,
    NodeKind::Sub,
    NodeKind::Mul,
    NodeKind::Div,
    NodeKind::Mod,
    NodeKind::Eq,
    NodeKind::Ne,
    NodeKind::Lt,
    NodeKind::Le,
    NodeKind::Gt,
    NodeKind::Ge,
    NodeKind::Paren,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A whitelisted expression node. Constructible only for the kinds in
/// `SUPPORTED_NODES` — there is deliberately no escape hatch variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    IntLiteral(i128),
    /// Decimal literal stored as (unscaled integer, scale) to avoid float
    /// reasoning anywhere in the IR (§1 Non-goals: unbounded float reasoning).
    DecimalLiteral { unscaled: i128, scale: u32 },
    Identifier(String),
    Unary { op: UnOp, expr: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Compare { op: CmpOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// Explicit parenthesization, kept as a distinct node so lowering can
    /// preserve source-visible grouping in diagnostics.
    Paren(Box<Expr>),
}

impl Expr {
    pub fn node_kind(&self) -> NodeKind {
        match self {
            Expr::IntLiteral(_) => NodeKind::IntLiteral,
            Expr::DecimalLiteral { .. } => NodeKind::DecimalLiteral,
            Expr::Identifier(_) => NodeKind::Identifier,
            Expr::Unary { op: UnOp::Plus, .. } => NodeKind::UnaryPlus,
            Expr::Unary { op: UnOp::Minus, .. } => NodeKind::UnaryMinus,
            Expr::Binary { op, .. } => match op {
                BinOp::Add => NodeKind::Add,
                BinOp::Sub => NodeKind::Sub,
                BinOp::Mul => NodeKind::Mul,
                BinOp::Div => NodeKind::Div,
                BinOp::Mod => NodeKind::Mod,
            },
            Expr::Compare { op, .. } => match op {
                CmpOp::Eq => NodeKind::Eq,
                CmpOp::Ne => NodeKind::Ne,
                CmpOp::Lt => NodeKind::Lt,
                CmpOp::Le => NodeKind::Le,
                CmpOp::Gt => NodeKind::Gt,
                CmpOp::Ge => NodeKind::Ge,
            },
            Expr::Paren(_) => NodeKind::Paren,
        }
    }

    /// Count of this node plus every descendant; used against `NODE_LIMIT`.
    pub fn node_count(&self) -> usize {
        1 + match self {
            Expr::IntLiteral(_) | Expr::DecimalLiteral { .. } | Expr::Identifier(_) => 0,
            Expr::Unary { expr, .. } => expr.node_count(),
            Expr::Binary { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } => {
                lhs.node_count() + rhs.node_count()
            }
            Expr::Paren(inner) => inner.node_count(),
        }
    }

    /// True iff the identifier names a prior-state variable (§3.1, §4.6:
    /// "identifiers prefixed `old_` become free variables for prior state").
    pub fn is_old_prefixed_identifier(&self) -> bool {
        matches!(self, Expr::Identifier(name) if name.starts_with("old_"))
    }

    /// Every free identifier referenced transitively by this expression.
    pub fn identifiers(&self, out: &mut Vec<String>) {
        match self {
            Expr::Identifier(name) => out.push(name.clone()),
            Expr::Unary { expr, .. } | Expr::Paren(expr) => expr.identifiers(out),
            Expr::Binary { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } => {
                lhs.identifiers(out);
                rhs.identifiers(out);
            }
            Expr::IntLiteral(_) | Expr::DecimalLiteral { .. } => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    pub fn multiplier(self) -> i128 {
        match self {
            Sign::Plus => 1,
            Sign::Minus => -1,
        }
    }
}

/// A balance change derived from a post-condition of the form
/// `X == old_X ± E` (§3.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceChange {
    pub variable: String,
    pub amount: Expr,
    pub sign: Sign,
    pub line: usize,
    pub is_oracle_influenced: bool,
    pub oracle_variable: Option<String>,
}

impl BalanceChange {
    /// The amount expressed with its sign folded in, when the amount is a
    /// purely numeric literal; `None` for symbolic amounts.
    pub fn to_signed_amount(&self) -> Option<i128> {
        match &self.amount {
            Expr::IntLiteral(v) => Some(v * self.sign.multiplier()),
            Expr::DecimalLiteral { unscaled, .. } => Some(unscaled * self.sign.multiplier()),
            _ => None,
        }
    }
}

/// A parsed, immutable intent: a named pre/post-condition pair over typed
/// parameters (§3.1). Intents are parsed once and never mutated afterward
/// (§3.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    pub params: Vec<Param>,
    pub constraints: Vec<Expr>,
    pub post_conditions: Vec<Expr>,
}

impl Intent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), params: Vec::new(), constraints: Vec::new(), post_conditions: Vec::new() }
    }

    pub fn total_node_count(&self) -> usize {
        self.constraints.iter().map(Expr::node_count).sum::<usize>()
            + self.post_conditions.iter().map(Expr::node_count).sum::<usize>()
    }

    pub fn distinct_identifiers(&self) -> std::collections::BTreeSet<String> {
        let mut out = Vec::new();
        for e in self.constraints.iter().chain(self.post_conditions.iter()) {
            e.identifiers(&mut out);
        }
        out.into_iter().collect()
    }

    pub fn total_condition_count(&self) -> usize {
        self.constraints.len() + self.post_conditions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_count_counts_self_and_descendants() {
        let e = Expr::Binary {
            op: BinOp::Add,
            lhs: Box::new(Expr::Identifier("old_x".into())),
            rhs: Box::new(Expr::IntLiteral(1)),
        };
        assert_eq!(e.node_count(), 3);
    }

    #[test]
    fn whitelist_excludes_bitwise_and_call_kinds() {
        assert!(!NodeKind::BitOr.is_supported());
        assert!(!NodeKind::Call.is_supported());
        assert!(NodeKind::Add.is_supported());
        assert!(NodeKind::Paren.is_supported());
    }

    #[test]
    fn signed_amount_folds_sign_for_numeric_literals() {
        let change = BalanceChange {
            variable: "sender_balance".into(),
            amount: Expr::IntLiteral(100),
            sign: Sign::Minus,
            line: 1,
            is_oracle_influenced: false,
            oracle_variable: None,
        };
        assert_eq!(change.to_signed_amount(), Some(-100));
    }

    #[test]
    fn old_prefixed_identifier_detection() {
        assert!(Expr::Identifier("old_balance".into()).is_old_prefixed_identifier());
        assert!(!Expr::Identifier("balance".into()).is_old_prefixed_identifier());
    }
}
