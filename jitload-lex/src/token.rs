#![forbid(unsafe_code)]

use std::fmt;

use jitload_ast::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    // Keywords
    KwImport,
    KwDef,
    KwClass,
    KwReturn,
    KwIf,
    KwElif,
    KwElse,
    KwPass,
    KwAnd,
    KwOr,
    KwNot,
    KwTrue,
    KwFalse,
    KwNone,

    // Operators / punctuation
    Arrow,
    Colon,
    Eq,
    EqEq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,

    Plus,
    Minus,
    Star,
    Slash,

    Dot,
    Comma,

    LParen,
    RParen,
    LBracket,
    RBracket,

    Newline,
    Indent,
    Dedent,
    Eof,

    // Literals / identifiers
    Ident(String),
    Int(u64),
    Float(f64),
    String(String),
}

/// Renders the token the way it reads in source. Layout tokens render empty.
impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::KwImport => "import",
            TokenKind::KwDef => "def",
            TokenKind::KwClass => "class",
            TokenKind::KwReturn => "return",
            TokenKind::KwIf => "if",
            TokenKind::KwElif => "elif",
            TokenKind::KwElse => "else",
            TokenKind::KwPass => "pass",
            TokenKind::KwAnd => "and",
            TokenKind::KwOr => "or",
            TokenKind::KwNot => "not",
            TokenKind::KwTrue => "True",
            TokenKind::KwFalse => "False",
            TokenKind::KwNone => "None",
            TokenKind::Arrow => "->",
            TokenKind::Colon => ":",
            TokenKind::Eq => "=",
            TokenKind::EqEq => "==",
            TokenKind::Neq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Le => "<=",
            TokenKind::Ge => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Dot => ".",
            TokenKind::Comma => ",",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent | TokenKind::Eof => "",
            TokenKind::Ident(name) => return f.write_str(name),
            TokenKind::Int(n) => return write!(f, "{n}"),
            TokenKind::Float(x) => return write!(f, "{x:?}"),
            TokenKind::String(s) => return write!(f, "{s:?}"),
        };
        f.write_str(s)
    }
}

impl TokenKind {
    /// Short human-readable name used in "expected ..." diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Indent => "indented block".to_string(),
            TokenKind::Dedent => "end of block".to_string(),
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Ident(_) => "identifier".to_string(),
            TokenKind::Int(_) | TokenKind::Float(_) => "number".to_string(),
            TokenKind::String(_) => "string literal".to_string(),
            other => format!("`{other}`"),
        }
    }
}
