#![forbid(unsafe_code)]

//! Line-oriented header of a source unit: the version assignment and the
//! `import` lines that follow it.

use std::collections::BTreeSet;

use jitload_lex::TokenKind;
use jitload_parse::{ParseError, Parser};

use crate::config::ImportConfig;

/// Parse `<marker> = <integer>` and the end of its line.
pub fn parse_version_number(parser: &mut Parser<'_>, config: &ImportConfig) -> Result<u64, ParseError> {
    let marker = &config.version_marker;
    let is_marker = matches!(parser.peek_kind(), Some(TokenKind::Ident(name)) if name == marker);
    if !is_marker {
        return Err(ParseError {
            message: format!("expected an assignment to {marker}"),
            span: parser.peek_span(),
        });
    }
    parser.next();
    parser.expect(TokenKind::Eq)?;

    let span = parser.peek_span();
    let version = match parser.next().map(|t| t.kind) {
        Some(TokenKind::Int(n)) => n,
        Some(TokenKind::Float(x)) => {
            return Err(ParseError {
                message: format!("expected an integral version but found {x:?}"),
                span,
            });
        }
        other => {
            let found = other.map_or_else(|| "end of input".to_string(), |k| k.describe());
            return Err(ParseError {
                message: format!("expected an integral version but found {found}"),
                span,
            });
        }
    };
    parser.expect_newline()?;

    if let Some(max) = config.max_supported_version {
        if version > max {
            return Err(ParseError {
                message: format!(
                    "unsupported operator set version {version} (newest supported is {max})"
                ),
                span,
            });
        }
    }
    Ok(version)
}

/// Consume consecutive `import a.b.c` lines. Paths are the concatenated
/// source text of the tokens on each line, deduplicated and sorted.
pub fn parse_imports(parser: &mut Parser<'_>) -> Result<BTreeSet<String>, ParseError> {
    let mut imports = BTreeSet::new();
    while parser.at(TokenKind::KwImport) {
        let keyword = parser.expect(TokenKind::KwImport)?;
        let mut path = String::new();
        while !parser.at(TokenKind::Newline) && !parser.at_eof() {
            if let Some(tok) = parser.next() {
                path.push_str(&tok.kind.to_string());
            }
        }
        if path.is_empty() {
            return Err(ParseError {
                message: "empty import statement".to_string(),
                span: keyword.span,
            });
        }
        parser.expect_newline()?;
        imports.insert(path);
    }
    Ok(imports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitload_lex::Lexer;

    fn version_of(src: &str, config: &ImportConfig) -> Result<u64, ParseError> {
        let tokens = Lexer::new(src).lex().unwrap();
        parse_version_number(&mut Parser::new(&tokens), config)
    }

    #[test]
    fn header_errors() {
        let config = ImportConfig::default();
        assert_eq!(
            version_of("version = 2\n", &config).unwrap_err().message,
            "expected an assignment to op_version_set"
        );
        assert_eq!(
            version_of("op_version_set = 1.5\n", &config).unwrap_err().message,
            "expected an integral version but found 1.5"
        );
        assert_eq!(
            version_of("op_version_set = x\n", &config).unwrap_err().message,
            "expected an integral version but found identifier"
        );
        assert!(version_of("op_version_set = 2 3\n", &config).is_err());
        assert!(version_of("", &config).is_err());
    }

    #[test]
    fn configured_marker_and_bound() {
        let config = ImportConfig {
            version_marker: "format".to_string(),
            max_supported_version: Some(3),
            ..ImportConfig::default()
        };
        assert_eq!(version_of("format = 3\n", &config).unwrap(), 3);
        let err = version_of("format = 4\n", &config).unwrap_err();
        assert!(err.message.starts_with("unsupported operator set version 4"), "{}", err.message);
        assert!(version_of("op_version_set = 1\n", &config).is_err());
    }

    #[test]
    fn imports_stop_at_first_other_line() {
        let tokens = Lexer::new("import b.c\nimport a\nimport b.c\nclass A:\n    pass\n")
            .lex()
            .unwrap();
        let mut parser = Parser::new(&tokens);
        let imports = parse_imports(&mut parser).unwrap();
        assert_eq!(imports.into_iter().collect::<Vec<_>>(), ["a", "b.c"]);
        assert!(parser.at(TokenKind::KwClass));
    }

    #[test]
    fn empty_import_is_an_error() {
        let tokens = Lexer::new("import\nimport a\n").lex().unwrap();
        let err = parse_imports(&mut Parser::new(&tokens)).unwrap_err();
        assert_eq!(err.message, "empty import statement");
    }
}
