#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use jitload_ast::Span;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("compile error: {message}")]
#[diagnostic(code(jitload::compile))]
#[allow(unused_assignments)]
pub struct CompileError {
    pub message: String,
    #[label]
    pub span: Span,
}

impl CompileError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}
