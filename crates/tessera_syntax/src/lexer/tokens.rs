//! Token types for the signature lexer.
//!
//! Keyword and punctuation tokens carry registry IDs from `tessera_core::lang`, so the parser
//! never matches on spellings.

use crate::ast::Span;
use tessera_core::lang::keywords::{self, KeywordId};
use tessera_core::lang::punctuation::PunctuationId;

/// Kind of token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(KeywordId),
    Punctuation(PunctuationId),
    Ident(String),
    /// Any character the signature surface has no use for (string quotes, digits, operators).
    /// The parser decides whether it is an error; past the parameter list it never looks.
    Other(char),
    Eof,
}

/// A token with its kind and source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn is_punct(&self, id: PunctuationId) -> bool {
        matches!(self.kind, TokenKind::Punctuation(p) if p == id)
    }

    pub fn is_keyword(&self, id: KeywordId) -> bool {
        matches!(self.kind, TokenKind::Keyword(k) if k == id)
    }

    /// Human-readable description for "expected X, found Y" messages.
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Keyword(id) => format!("keyword `{}`", keywords::as_str(*id)),
            TokenKind::Punctuation(id) => {
                format!("`{}`", tessera_core::lang::punctuation::as_str(*id))
            }
            TokenKind::Ident(name) => format!("identifier `{name}`"),
            TokenKind::Other(c) => format!("`{c}`"),
            TokenKind::Eof => "end of signature".to_string(),
        }
    }
}

/// Resolve an identifier spelling to a keyword id, if reserved.
pub fn keyword_id(name: &str) -> Option<KeywordId> {
    keywords::from_str(name)
}
