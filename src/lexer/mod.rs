//! Lexer for PEL source text
//!
//! Tokenization is generated by `logos`; this module only converts its output
//! into [`Token`]s and reports unrecognized input as a syntax error.

mod tokens;

pub use tokens::{Token, TokenKind};

use crate::common::Span;
use crate::diagnostics::{CompileError, SourceFile};
use logos::Logos;

/// Lex an anonymous source string
pub fn lex(source: &str) -> Result<Vec<Token>, CompileError> {
    lex_file(&SourceFile::anonymous(source))
}

/// Lex a source file. The returned stream always ends with an `Eof` token.
pub fn lex_file(file: &SourceFile) -> Result<Vec<Token>, CompileError> {
    let source: &str = &file.content;
    let mut lexer = TokenKind::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let span = Span::new(range.start, range.end);
        match result {
            Ok(kind) => tokens.push(Token {
                kind,
                span,
                text: lexer.slice().to_string(),
            }),
            Err(()) => {
                return Err(CompileError::InvalidToken {
                    text: lexer.slice().to_string(),
                    span: span.into(),
                    src: file.to_named_source(),
                });
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span::new(source.len(), source.len()),
        text: String::new(),
    });

    tracing::trace!(count = tokens.len(), "lexed source");
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_duration_literal_splits_into_number_and_unit() {
        assert_eq!(
            kinds("4mo"),
            vec![TokenKind::IntLit, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn test_rate_literal() {
        assert_eq!(
            kinds("5%/mo"),
            vec![
                TokenKind::IntLit,
                TokenKind::Percent,
                TokenKind::Slash,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_invalid_character() {
        let err = lex("param x: Count = 1 $").unwrap_err();
        assert_eq!(err.kind(), crate::diagnostics::ErrorKind::Syntax);
        assert_eq!(err.span().start, 19);
    }
}
