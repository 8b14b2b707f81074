use std::collections::BTreeSet;

use jitload_import::{parse_imports, parse_version_number, ImportConfig};
use jitload_lex::{Lexer, TokenKind};
use jitload_parse::Parser;
use miette::{IntoDiagnostic, Result};
use proptest::{
    prelude::{any, prop},
    prop_assert, prop_assert_eq,
    test_runner::{Config, TestCaseError, TestRunner},
};

fn runner() -> TestRunner {
    TestRunner::new(Config {
        cases: 128,
        ..Config::default()
    })
}

fn fail(e: impl std::fmt::Display) -> TestCaseError {
    TestCaseError::fail(e.to_string())
}

#[test]
fn version_header_returns_the_assigned_integer() -> Result<()> {
    let strat = any::<u32>();
    runner()
        .run(&strat, |n| {
            let src = format!("op_version_set = {n}\nimport a.b\n");
            let tokens = Lexer::new(&src).lex().map_err(fail)?;
            let mut parser = Parser::new(&tokens);
            let version = parse_version_number(&mut parser, &ImportConfig::default()).map_err(fail)?;
            prop_assert_eq!(version, u64::from(n));
            prop_assert!(parser.at(TokenKind::KwImport));
            Ok(())
        })
        .into_diagnostic()
}

#[test]
fn version_header_rejects_other_names_and_fractions() -> Result<()> {
    let strat = ("[a-z_][a-z0-9_]{0,10}", any::<u16>(), 1u8..10);
    runner()
        .run(&strat, |(name, whole, tenths)| {
            let config = ImportConfig::default();

            if name != config.version_marker {
                let src = format!("{name} = {whole}\n");
                let tokens = Lexer::new(&src).lex().map_err(fail)?;
                let err = parse_version_number(&mut Parser::new(&tokens), &config)
                    .err()
                    .ok_or_else(|| fail(format!("{src:?} was accepted")))?;
                prop_assert_eq!(err.message, "expected an assignment to op_version_set");
            }

            let src = format!("op_version_set = {whole}.{tenths}\n");
            let tokens = Lexer::new(&src).lex().map_err(fail)?;
            let err = parse_version_number(&mut Parser::new(&tokens), &config)
                .err()
                .ok_or_else(|| fail(format!("{src:?} was accepted")))?;
            prop_assert!(err.message.starts_with("expected an integral version"));
            Ok(())
        })
        .into_diagnostic()
}

#[test]
fn import_set_is_the_distinct_paths() -> Result<()> {
    let path = "[a-z][a-z0-9_]{0,5}(\\.[a-z][a-z0-9_]{0,5}){0,3}";
    let strat = (
        prop::collection::vec(path, 1..8),
        prop::collection::vec(any::<prop::sample::Index>(), 0..6),
    );
    runner()
        .run(&strat, |(paths, repeats)| {
            let mut lines: Vec<&String> = paths.iter().collect();
            for r in &repeats {
                lines.push(r.get(&paths));
            }
            lines.reverse();

            let mut src = String::from("op_version_set = 1\n");
            for line in &lines {
                src.push_str(&format!("import {line}\n"));
            }
            src.push_str("class A:\n    pass\n");

            let tokens = Lexer::new(&src).lex().map_err(fail)?;
            let mut parser = Parser::new(&tokens);
            parse_version_number(&mut parser, &ImportConfig::default()).map_err(fail)?;
            let imports = parse_imports(&mut parser).map_err(fail)?;

            let expected: BTreeSet<String> = paths.iter().cloned().collect();
            prop_assert_eq!(imports, expected);
            prop_assert!(parser.at(TokenKind::KwClass));
            Ok(())
        })
        .into_diagnostic()
}
