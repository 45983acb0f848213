//! Parser for fixture and test signatures.
//!
//! Accepted heads:
//!
//! ```text
//! signature := 'async'? head
//! head      := 'function' '*'? IDENT? '(' params ')'
//!            | '(' params ')'            (arrow function)
//!            | IDENT                     (single-parameter arrow function)
//!            | pattern                   (bare pattern, no function head)
//! params    := (param (',' param)* ','?)?
//! param     := pattern | IDENT
//! pattern   := '{' (field (',' field)* ','?)? '}'
//! field     := IDENT (':' IDENT)?
//! ```
//!
//! Parsing stops at the end of the parameter list; the rest of the text is never inspected.

use crate::ast::{FieldBinding, FunctionKind, Param, Signature, Span, Spanned};
use crate::diagnostics::ExtractError;
use crate::lexer::{Lexer, Token, TokenKind};
use tessera_core::lang::keywords::{self, KeywordId};
use tessera_core::lang::punctuation::PunctuationId;

/// Longest excerpt of a non-function value quoted back in diagnostics.
const MAX_EXCERPT: usize = 40;

/// Parser state: a pull-based lexer plus one token of lookahead.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        Self { lexer, current }
    }

    /// Parse the signature head.
    ///
    /// ## Errors
    /// - [`ExtractError::DestructuringRequired`] when the text is not a function signature.
    /// - [`ExtractError::Syntax`] for malformed or unsupported parameter syntax.
    pub fn parse_signature(mut self) -> Result<Signature, ExtractError> {
        let start = self.peek().span;
        let is_async = self.eat_keyword(KeywordId::Async);

        let (kind, name, params) = match self.peek().kind.clone() {
            TokenKind::Keyword(KeywordId::Function) => {
                self.advance();
                let kind = if self.eat_punct(PunctuationId::Star) {
                    FunctionKind::Generator
                } else {
                    FunctionKind::Function
                };
                let name = match &self.peek().kind {
                    TokenKind::Ident(name) => {
                        let name = name.clone();
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                self.expect_punct(PunctuationId::LParen, "`(` after function head")?;
                (kind, name, self.param_list()?)
            }
            TokenKind::Punctuation(PunctuationId::LParen) => {
                self.advance();
                (FunctionKind::Arrow, None, self.param_list()?)
            }
            TokenKind::Punctuation(PunctuationId::LBrace) => (FunctionKind::Pattern, None, vec![self.pattern()?]),
            TokenKind::Ident(name) => {
                let token = self.advance();
                let param = Spanned::new(Param::Identifier(name), token.span);
                (FunctionKind::Arrow, None, vec![param])
            }
            _ => return Err(self.not_a_function()),
        };

        let end = params.last().map(|p| p.span).unwrap_or(start);
        Ok(Signature {
            is_async,
            kind,
            name,
            params,
            span: start.merge(end),
        })
    }

    // ========================================================================
    // Parameter lists
    // ========================================================================

    /// Parse parameters up to and including the closing `)`.
    fn param_list(&mut self) -> Result<Vec<Spanned<Param>>, ExtractError> {
        let mut params = Vec::new();
        loop {
            if self.eat_punct(PunctuationId::RParen) {
                break;
            }
            params.push(self.param()?);
            if self.eat_punct(PunctuationId::Comma) {
                continue;
            }
            self.expect_punct(PunctuationId::RParen, "`,` or `)`")?;
            break;
        }
        Ok(params)
    }

    fn param(&mut self) -> Result<Spanned<Param>, ExtractError> {
        let param = match self.peek().kind.clone() {
            TokenKind::Punctuation(PunctuationId::LBrace) => self.pattern()?,
            TokenKind::Ident(name) => {
                let token = self.advance();
                Spanned::new(Param::Identifier(name), token.span)
            }
            TokenKind::Punctuation(PunctuationId::Ellipsis) => {
                return Err(self.syntax("rest parameters are not supported"));
            }
            TokenKind::Punctuation(PunctuationId::LBracket) => {
                return Err(self.syntax("array patterns are not supported"));
            }
            TokenKind::Eof => return Err(self.syntax("unterminated parameter list")),
            _ => {
                let found = self.peek().describe();
                return Err(self.syntax(&format!("expected a parameter, found {found}")));
            }
        };
        if self.peek().is_punct(PunctuationId::Eq) {
            return Err(self.syntax("default values are not supported"));
        }
        Ok(param)
    }

    /// Parse `{ a, b: c }`.
    fn pattern(&mut self) -> Result<Spanned<Param>, ExtractError> {
        let open = self.expect_punct(PunctuationId::LBrace, "`{`")?;
        let mut fields = Vec::new();
        let close = loop {
            if self.peek().is_punct(PunctuationId::RBrace) {
                break self.advance().span;
            }
            fields.push(self.field()?);
            if self.eat_punct(PunctuationId::Comma) {
                continue;
            }
            break self.expect_punct(PunctuationId::RBrace, "`,` or `}`")?;
        };
        Ok(Spanned::new(Param::Destructured(fields), open.merge(close)))
    }

    fn field(&mut self) -> Result<Spanned<FieldBinding>, ExtractError> {
        let (key, key_span) = match self.peek().kind.clone() {
            TokenKind::Ident(key) => (key, self.advance().span),
            // `async` is contextual, so it is a valid binding name.
            TokenKind::Keyword(KeywordId::Async) => (keywords::as_str(KeywordId::Async).to_string(), self.advance().span),
            TokenKind::Punctuation(PunctuationId::Ellipsis) => {
                return Err(self.syntax("rest elements are not supported in fixture requests"));
            }
            TokenKind::Eof => return Err(self.syntax("unterminated pattern")),
            _ => {
                let found = self.peek().describe();
                return Err(self.syntax(&format!("expected a fixture name, found {found}")));
            }
        };

        let mut span = key_span;
        let mut alias = None;
        if self.eat_punct(PunctuationId::Colon) {
            match self.peek().kind.clone() {
                TokenKind::Ident(local) => {
                    span = span.merge(self.advance().span);
                    alias = Some(local);
                }
                TokenKind::Keyword(KeywordId::Async) => {
                    span = span.merge(self.advance().span);
                    alias = Some(keywords::as_str(KeywordId::Async).to_string());
                }
                TokenKind::Punctuation(PunctuationId::LBrace | PunctuationId::LBracket) => {
                    return Err(self.syntax("nested patterns are not supported"));
                }
                _ => {
                    let found = self.peek().describe();
                    return Err(self.syntax(&format!("expected a local name after `:`, found {found}")));
                }
            }
        }
        if self.peek().is_punct(PunctuationId::Eq) {
            return Err(self.syntax("default values are not supported in fixture requests"));
        }

        Ok(Spanned::new(FieldBinding { key, alias }, span))
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn peek(&self) -> &Token {
        &self.current
    }

    fn advance(&mut self) -> Token {
        let next = self.lexer.next_token();
        std::mem::replace(&mut self.current, next)
    }

    fn eat_punct(&mut self, id: PunctuationId) -> bool {
        if self.peek().is_punct(id) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, id: KeywordId) -> bool {
        if self.peek().is_keyword(id) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, id: PunctuationId, expected: &str) -> Result<Span, ExtractError> {
        if self.peek().is_punct(id) {
            Ok(self.advance().span)
        } else {
            let found = self.peek().describe();
            Err(self.syntax(&format!("expected {expected}, found {found}")))
        }
    }

    fn syntax(&self, message: &str) -> ExtractError {
        ExtractError::Syntax {
            message: message.to_string(),
            signature: self.lexer.source().to_string(),
            span: self.peek().span.into(),
        }
    }

    fn not_a_function(&self) -> ExtractError {
        let source = self.lexer.source();
        let trimmed = source.trim();
        let excerpt: String = if trimmed.chars().count() > MAX_EXCERPT {
            let head: String = trimmed.chars().take(MAX_EXCERPT).collect();
            format!("{head}...")
        } else {
            trimmed.to_string()
        };
        let offset = source.len() - source.trim_start().len();
        ExtractError::DestructuringRequired {
            param: excerpt,
            signature: source.to_string(),
            span: Span::new(offset, offset + trimmed.len()).into(),
        }
    }
}

/// Parse a signature string into its [`Signature`] head.
///
/// ## Errors
/// See [`Parser::parse_signature`].
#[tracing::instrument(skip_all, fields(source_len = source.len()))]
pub fn parse(source: &str) -> Result<Signature, ExtractError> {
    Parser::new(source).parse_signature()
}
