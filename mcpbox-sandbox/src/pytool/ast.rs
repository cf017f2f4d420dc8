//! Abstract syntax tree for the tool language

use std::sync::Arc;

/// A statement with its source line, for error reporting.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    /// `a = b = value`; targets are names, attributes, subscripts or
    /// tuples.
    Assign { targets: Vec<Expr>, value: Expr },
    AugAssign { target: Expr, op: BinOp, value: Expr },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        orelse: Vec<Stmt>,
    },
    While { test: Expr, body: Vec<Stmt> },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
    },
    FunctionDef(Arc<FunctionDef>),
    Return(Option<Expr>),
    Break,
    Continue,
    Pass,
    Import {
        module: String,
        alias: Option<String>,
    },
    Raise(Option<Expr>),
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        finally: Vec<Stmt>,
    },
}

#[derive(Debug, Clone)]
pub struct ExceptHandler {
    /// `except ValueError`; `None` catches everything.
    pub exc_type: Option<String>,
    /// `except ValueError as e`.
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub is_async: bool,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    /// Annotation expression, kept for schema derivation.
    pub annotation: Option<Expr>,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum Expr {
    None_,
    True_,
    False_,
    Int(i64),
    Float(f64),
    Str(String),
    /// f-string: literal and interpolated parts in order.
    FString(Vec<FStringPart>),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Set(Vec<Expr>),
    ListComp {
        elt: Box<Expr>,
        target: Box<Expr>,
        iter: Box<Expr>,
        cond: Option<Box<Expr>>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        target: Box<Expr>,
        iter: Box<Expr>,
        cond: Option<Box<Expr>>,
    },
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOpKind,
        values: Vec<Expr>,
    },
    /// Chained comparison: `a < b <= c`.
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    /// Only valid inside a subscript.
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Await(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum FStringPart {
    Literal(String),
    /// Raw source of the interpolated expression, parsed lazily.
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitOr,
    BitAnd,
    BitXor,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::BitOr => "|",
            BinOp::BitAnd => "&",
            BinOp::BitXor => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

/// Render an annotation expression back to source-ish text for schema
/// derivation (`Optional[int]`, `str | None`, `List[str]`, …).
pub fn annotation_to_string(expr: &Expr) -> String {
    match expr {
        Expr::Name(name) => name.clone(),
        Expr::None_ => "None".to_string(),
        Expr::Str(s) => s.clone(),
        Expr::Attribute { value, attr } => {
            format!("{}.{}", annotation_to_string(value), attr)
        }
        Expr::Subscript { value, index } => {
            format!(
                "{}[{}]",
                annotation_to_string(value),
                annotation_to_string(index)
            )
        }
        Expr::Tuple(items) => items
            .iter()
            .map(annotation_to_string)
            .collect::<Vec<_>>()
            .join(", "),
        Expr::BinOp {
            left,
            op: BinOp::BitOr,
            right,
        } => format!(
            "{} | {}",
            annotation_to_string(left),
            annotation_to_string(right)
        ),
        _ => "object".to_string(),
    }
}
