#![forbid(unsafe_code)]

mod error;
mod parser;

use jitload_lex::Lexer;
use miette::IntoDiagnostic;

pub use error::ParseError;
pub use parser::Parser;

/// Parse a sequence of top-level `def`s (methods when `is_method`).
pub fn parse_functions(src: &str, is_method: bool) -> miette::Result<Vec<jitload_ast::Def>> {
    let tokens = Lexer::new(src).lex().into_diagnostic()?;
    let mut parser = Parser::new(&tokens);
    let mut defs = Vec::new();
    while !parser.at_eof() {
        defs.push(parser.parse_function(is_method).into_diagnostic()?);
    }
    Ok(defs)
}

pub fn parse_class(src: &str) -> miette::Result<jitload_ast::ClassDef> {
    let tokens = Lexer::new(src).lex().into_diagnostic()?;
    let mut parser = Parser::new(&tokens);
    parser.parse_class().into_diagnostic()
}

pub fn parse_expr(src: &str) -> miette::Result<jitload_ast::Expr> {
    let tokens = Lexer::new(src).lex().into_diagnostic()?;
    let mut parser = Parser::new(&tokens);
    let expr = parser.parse_expr().into_diagnostic()?;
    // Allow the trailing newline the lexer emits.
    parser.next_if(jitload_lex::TokenKind::Newline);
    if !parser.at_eof() {
        return Err(ParseError {
            message: "expected end of input".to_string(),
            span: parser.peek_span(),
        })
        .into_diagnostic();
    }
    Ok(expr)
}
