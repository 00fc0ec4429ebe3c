//! Lexer tests: keywords, literals, operators and error reporting

use pel::diagnostics::{CompileError, ErrorKind};
use pel::lexer::{TokenKind, lex};
use pretty_assertions::assert_eq;

fn kinds(source: &str) -> Vec<TokenKind> {
    lex(source)
        .expect("should lex")
        .into_iter()
        .map(|t| t.kind)
        .collect()
}

#[test]
fn test_lex_declaration_keywords() {
    assert_eq!(
        kinds("model param rate var constraint policy when"),
        vec![
            TokenKind::Model,
            TokenKind::Param,
            TokenKind::Rate,
            TokenKind::Var,
            TokenKind::Constraint,
            TokenKind::Policy,
            TokenKind::When,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_lex_keywords_are_not_identifier_prefixes() {
    assert_eq!(
        kinds("params rated whenever"),
        vec![
            TokenKind::Ident,
            TokenKind::Ident,
            TokenKind::Ident,
            TokenKind::Eof
        ]
    );
}

#[test]
fn test_lex_numbers_with_units() {
    let tokens = lex("1_000 USD 5% 2.5e3 mo").expect("should lex");
    let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, vec!["1_000", "USD", "5", "%", "2.5e3", "mo", ""]);
    assert_eq!(tokens[0].kind, TokenKind::IntLit);
    assert_eq!(tokens[4].kind, TokenKind::FloatLit);
}

#[test]
fn test_lex_compound_operators() {
    assert_eq!(
        kinds("== != <= >= && || < > ~ !"),
        vec![
            TokenKind::EqEq,
            TokenKind::Ne,
            TokenKind::Le,
            TokenKind::Ge,
            TokenKind::AmpAmp,
            TokenKind::PipePipe,
            TokenKind::Lt,
            TokenKind::Gt,
            TokenKind::Tilde,
            TokenKind::Bang,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_lex_skips_comments() {
    let source = "param // trailing\n/* block\ncomment */ rate";
    assert_eq!(
        kinds(source),
        vec![TokenKind::Param, TokenKind::Rate, TokenKind::Eof]
    );
}

#[test]
fn test_lex_string_literal_with_escape() {
    let tokens = lex(r#""survey \"Q3\"""#).expect("should lex");
    assert_eq!(tokens[0].kind, TokenKind::StringLit);
    assert_eq!(tokens.len(), 2);
}

#[test]
fn test_lex_spans_point_into_source() {
    let source = "param price";
    let tokens = lex(source).expect("should lex");
    let span = tokens[1].span;
    assert_eq!(&source[span.start..span.end], "price");
}

#[test]
fn test_lex_invalid_character() {
    let err = lex("param $x").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    match err {
        CompileError::InvalidToken { text, .. } => assert_eq!(text, "$"),
        other => panic!("expected InvalidToken, got {:?}", other),
    }
}
