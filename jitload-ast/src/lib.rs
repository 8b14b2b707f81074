#![forbid(unsafe_code)]

use miette::SourceSpan;

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

/// Smallest span covering both `a` and `b`.
pub fn join(a: Span, b: Span) -> Span {
    let a0: usize = a.offset();
    let b0: usize = b.offset();
    let a1 = a0 + a.len();
    let b1 = b0 + b.len();
    span_between(a0.min(b0), a1.max(b1))
}

pub type Ident = Spanned<String>;

/// A `def` block. Methods carry `self` as their first parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct Def {
    pub span: Span,
    pub name: Ident,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub body: Vec<Stmt>,
}

impl Def {
    /// True when some `return` in the body carries a value.
    pub fn returns_value(&self) -> bool {
        fn any_value_return(stmts: &[Stmt]) -> bool {
            stmts.iter().any(|s| match s {
                Stmt::Return(r) => r.expr.is_some(),
                Stmt::If(i) => any_value_return(&i.then_body) || any_value_return(&i.else_body),
                _ => false,
            })
        }
        any_value_return(&self.body)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassDef {
    pub span: Span,
    pub name: Ident,
    pub attributes: Vec<AttributeDecl>,
    pub defs: Vec<Def>,
}

/// `name : Type` inside a class body.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeDecl {
    pub span: Span,
    pub name: Ident,
    pub ty: TypeExpr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub span: Span,
    pub name: Ident,
    pub ty: Option<TypeExpr>,
}

/// A type annotation such as `Tensor`, `List[int]` or `__torch__.foo.Bar`.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeExpr {
    pub span: Span,
    pub path: Vec<Ident>,
    pub args: Vec<TypeExpr>,
}

impl TypeExpr {
    /// The dotted name without type arguments.
    pub fn dotted(&self) -> String {
        self.path
            .iter()
            .map(|p| p.node.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Assign(AssignStmt),
    Return(ReturnStmt),
    If(IfStmt),
    Pass(Span),
    Expr(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssignStmt {
    pub span: Span,
    pub target: Ident,
    pub ty: Option<TypeExpr>,
    pub expr: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReturnStmt {
    pub span: Span,
    pub expr: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfStmt {
    pub span: Span,
    pub cond: Expr,
    pub then_body: Vec<Stmt>,
    pub else_body: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Ident(Ident),
    IntLit(u64),
    FloatLit(f64),
    StringLit(String),
    BoolLit(bool),
    NoneLit,
    Tuple(Vec<Expr>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        member: Ident,
    },
    Subscript {
        base: Box<Expr>,
        index: Vec<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<CallArg>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum CallArg {
    Positional(Expr),
    Named { name: Ident, value: Expr },
}

impl CallArg {
    pub fn value(&self) -> &Expr {
        match self {
            CallArg::Positional(e) => e,
            CallArg::Named { value, .. } => value,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    And,
    Or,
}
