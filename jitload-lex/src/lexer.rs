#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use jitload_ast::{span_between, Span};
use logos::Logos;
use miette::Diagnostic;
use thiserror::Error;

use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Diagnostic)]
#[error("lex error: {message}")]
#[diagnostic(code(jitload::lex))]
#[allow(unused_assignments)]
pub struct LexError {
    pub message: String,
    #[label]
    pub span: Span,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \f\r]+")]
enum RawToken {
    #[token("import")]
    KwImport,
    #[token("def")]
    KwDef,
    #[token("class")]
    KwClass,
    #[token("return")]
    KwReturn,
    #[token("if")]
    KwIf,
    #[token("elif")]
    KwElif,
    #[token("else")]
    KwElse,
    #[token("pass")]
    KwPass,
    #[token("and")]
    KwAnd,
    #[token("or")]
    KwOr,
    #[token("not")]
    KwNot,
    #[token("True")]
    KwTrue,
    #[token("False")]
    KwFalse,
    #[token("None")]
    KwNone,

    #[token("->")]
    Arrow,

    #[token("==")]
    EqEq,
    #[token("!=")]
    Neq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token("=")]
    Eq,
    #[token(",")]
    Comma,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    #[regex(r"0x[0-9a-fA-F_]+", |lex| parse_int_prefixed(lex.slice(), 16, 2))]
    #[regex(r"[0-9][0-9_]*", |lex| parse_int_decimal(lex.slice()))]
    Int(Option<u64>),

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(Option<f64>),

    // String literals: "..." with a limited, strict set of escapes.
    // Supported: \n, \t, \r, \", \\, and \u{HEX} (1-6 hex digits)
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    String(Option<String>),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn parse_int_decimal(s: &str) -> Option<u64> {
    let digits = strip_underscores(s)?;
    digits.parse::<u64>().ok()
}

fn parse_int_prefixed(s: &str, radix: u32, prefix_len: usize) -> Option<u64> {
    let rest = s.get(prefix_len..)?;
    let digits = strip_underscores(rest)?;
    u64::from_str_radix(&digits, radix).ok()
}

fn strip_underscores(s: &str) -> Option<String> {
    if s.is_empty() {
        return None;
    }
    if s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return None;
    }
    Some(s.replace('_', ""))
}

fn parse_string(lex: &mut logos::Lexer<RawToken>) -> Option<String> {
    let s = lex.slice();
    let inner = &s[1..s.len().saturating_sub(1)];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        let esc = chars.next()?;

        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            'u' => {
                if chars.next() != Some('{') {
                    return None;
                }
                let mut hex = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        break;
                    }
                    hex.push(ch);
                    chars.next();
                    if hex.len() > 6 {
                        return None;
                    }
                }
                if chars.next() != Some('}') || hex.is_empty() {
                    return None;
                }
                let cp = u32::from_str_radix(&hex, 16).ok()?;
                out.push(char::from_u32(cp)?);
            }
            _ => return None,
        }
    }

    Some(out)
}

/// Byte offset of the first `#` that is not inside a string literal.
fn comment_start(code: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    for (idx, b) in code.bytes().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'#' => return Some(idx),
            _ => {}
        }
    }
    None
}

fn convert(raw: RawToken) -> Result<TokenKind, &'static str> {
    Ok(match raw {
        RawToken::KwImport => TokenKind::KwImport,
        RawToken::KwDef => TokenKind::KwDef,
        RawToken::KwClass => TokenKind::KwClass,
        RawToken::KwReturn => TokenKind::KwReturn,
        RawToken::KwIf => TokenKind::KwIf,
        RawToken::KwElif => TokenKind::KwElif,
        RawToken::KwElse => TokenKind::KwElse,
        RawToken::KwPass => TokenKind::KwPass,
        RawToken::KwAnd => TokenKind::KwAnd,
        RawToken::KwOr => TokenKind::KwOr,
        RawToken::KwNot => TokenKind::KwNot,
        RawToken::KwTrue => TokenKind::KwTrue,
        RawToken::KwFalse => TokenKind::KwFalse,
        RawToken::KwNone => TokenKind::KwNone,

        RawToken::Arrow => TokenKind::Arrow,

        RawToken::EqEq => TokenKind::EqEq,
        RawToken::Neq => TokenKind::Neq,
        RawToken::Le => TokenKind::Le,
        RawToken::Ge => TokenKind::Ge,
        RawToken::Lt => TokenKind::Lt,
        RawToken::Gt => TokenKind::Gt,

        RawToken::Plus => TokenKind::Plus,
        RawToken::Minus => TokenKind::Minus,
        RawToken::Star => TokenKind::Star,
        RawToken::Slash => TokenKind::Slash,

        RawToken::Dot => TokenKind::Dot,
        RawToken::Colon => TokenKind::Colon,
        RawToken::Eq => TokenKind::Eq,
        RawToken::Comma => TokenKind::Comma,

        RawToken::LParen => TokenKind::LParen,
        RawToken::RParen => TokenKind::RParen,
        RawToken::LBracket => TokenKind::LBracket,
        RawToken::RBracket => TokenKind::RBracket,

        RawToken::Ident(s) => TokenKind::Ident(s),
        RawToken::Int(Some(n)) => TokenKind::Int(n),
        RawToken::Int(None) => return Err("invalid integer literal"),
        RawToken::Float(Some(x)) => TokenKind::Float(x),
        RawToken::Float(None) => return Err("invalid float literal"),
        RawToken::String(Some(s)) => TokenKind::String(s),
        RawToken::String(None) => return Err("invalid string literal"),
    })
}

pub struct Lexer<'a> {
    src: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src }
    }

    pub fn lex(&self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        let mut indent_stack: Vec<usize> = vec![0];

        // Track absolute byte offsets.
        let mut line_start = 0usize;

        for line in self.src.split_inclusive('\n') {
            let line_len = line.len();
            let line_end = line_start + line_len;

            let content = line.strip_suffix('\n').unwrap_or(line);

            if content.trim().is_empty() {
                line_start = line_end;
                continue;
            }

            if content.as_bytes().contains(&b'\t') {
                return Err(LexError {
                    message: "tabs are not allowed; use spaces".to_string(),
                    span: span_between(line_start, line_end),
                });
            }

            let leading_spaces = content
                .as_bytes()
                .iter()
                .take_while(|b| **b == b' ')
                .count();

            let mut code = &content[leading_spaces..];
            if let Some(idx) = comment_start(code) {
                code = &code[..idx];
            }
            if code.trim().is_empty() {
                // Comment-only lines do not affect indentation.
                line_start = line_end;
                continue;
            }

            let current_indent = *indent_stack.last().unwrap_or(&0);
            if leading_spaces > current_indent {
                indent_stack.push(leading_spaces);
                tokens.push(Token {
                    kind: TokenKind::Indent,
                    span: span_between(line_start, line_start + leading_spaces),
                });
            } else if leading_spaces < current_indent {
                while let Some(&top) = indent_stack.last() {
                    if leading_spaces >= top {
                        break;
                    }
                    indent_stack.pop();
                    tokens.push(Token {
                        kind: TokenKind::Dedent,
                        span: span_between(line_start, line_start + leading_spaces),
                    });
                }
                if *indent_stack.last().unwrap_or(&usize::MAX) != leading_spaces {
                    return Err(LexError {
                        message: "inconsistent indentation".to_string(),
                        span: span_between(line_start, line_end),
                    });
                }
            }

            let mut lex = RawToken::lexer(code);
            while let Some(raw) = lex.next() {
                let span_in_line = lex.span();
                let abs_start = line_start + leading_spaces + span_in_line.start;
                let abs_end = line_start + leading_spaces + span_in_line.end;
                let span = span_between(abs_start, abs_end);

                let kind = match raw {
                    Ok(raw) => convert(raw).map_err(|message| LexError {
                        message: message.to_string(),
                        span,
                    })?,
                    Err(_) => {
                        return Err(LexError {
                            message: "unexpected token".to_string(),
                            span,
                        });
                    }
                };

                tokens.push(Token { kind, span });
            }

            // End of logical line.
            let eol = line_start + content.len();
            tokens.push(Token {
                kind: TokenKind::Newline,
                span: span_between(eol, eol),
            });

            line_start = line_end;
        }

        // Close open indents.
        while indent_stack.len() > 1 {
            indent_stack.pop();
            tokens.push(Token {
                kind: TokenKind::Dedent,
                span: span_between(self.src.len(), self.src.len()),
            });
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            span: span_between(self.src.len(), self.src.len()),
        });

        Ok(tokens)
    }
}
