//! Lexer for fixture and test signatures.
//!
//! Unlike a whole-file lexer, this one is **pull-based**: the parser asks for one token at a
//! time and stops as soon as the parameter list closes. Whatever follows (`=> { ... }`, a
//! function body with string literals, template text) is never scanned.
//!
//! Handles:
//! - Keywords (`async`, `function`) and identifiers
//! - Punctuation (`( ) { } [ ] , : * = => ...`)
//! - Whitespace, `// line` and `/* block */` comments

pub mod tokens;

pub use tokens::{Token, TokenKind, keyword_id};

use crate::ast::Span;
use tessera_core::lang::punctuation::PunctuationId;

/// Pull-based lexer over a signature string.
pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
        }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Scan the next token. Returns `Eof` forever once the input is exhausted.
    pub fn next_token(&mut self) -> Token {
        self.skip_trivia();

        let start = self.current_pos;
        let Some(c) = self.advance() else {
            return Token::new(TokenKind::Eof, Span::new(start, start));
        };

        let kind = match c {
            '(' => TokenKind::Punctuation(PunctuationId::LParen),
            ')' => TokenKind::Punctuation(PunctuationId::RParen),
            '{' => TokenKind::Punctuation(PunctuationId::LBrace),
            '}' => TokenKind::Punctuation(PunctuationId::RBrace),
            '[' => TokenKind::Punctuation(PunctuationId::LBracket),
            ']' => TokenKind::Punctuation(PunctuationId::RBracket),
            ',' => TokenKind::Punctuation(PunctuationId::Comma),
            ':' => TokenKind::Punctuation(PunctuationId::Colon),
            '*' => TokenKind::Punctuation(PunctuationId::Star),
            '=' => {
                if self.match_char('>') {
                    TokenKind::Punctuation(PunctuationId::FatArrow)
                } else {
                    TokenKind::Punctuation(PunctuationId::Eq)
                }
            }
            '.' if self.source[self.current_pos..].starts_with("..") => {
                self.advance();
                self.advance();
                TokenKind::Punctuation(PunctuationId::Ellipsis)
            }
            _ if is_ident_start(c) => self.scan_identifier(start),
            other => TokenKind::Other(other),
        };

        Token::new(kind, Span::new(start, self.current_pos))
    }

    // ========================================================================
    // Core character handling
    // ========================================================================

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn peek_next(&self) -> Option<char> {
        let mut iter = self.source[self.current_pos..].chars();
        iter.next();
        iter.next()
    }

    fn advance(&mut self) -> Option<char> {
        if let Some((pos, c)) = self.chars.next() {
            self.current_pos = pos + c.len_utf8();
            Some(c)
        } else {
            None
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_next() == Some('*') => {
                    self.advance();
                    self.advance();
                    // An unterminated block comment swallows the rest of the input.
                    while let Some(c) = self.advance() {
                        if c == '*' && self.match_char('/') {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    // ========================================================================
    // Identifier scanning
    // ========================================================================

    fn scan_identifier(&mut self, start: usize) -> TokenKind {
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                self.advance();
            } else {
                break;
            }
        }
        let text = &self.source[start..self.current_pos];
        match keyword_id(text) {
            Some(id) => TokenKind::Keyword(id),
            None => TokenKind::Ident(text.to_string()),
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        let token = self.next_token();
        if matches!(token.kind, TokenKind::Eof) {
            None
        } else {
            Some(token)
        }
    }
}

/// Check if a character can start an identifier.
fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

/// Check if a character can continue an identifier.
fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Convenience function to lex a whole signature string.
///
/// The parser does not use this (it pulls lazily); it exists for tooling and tests.
#[tracing::instrument(skip_all, fields(source_len = source.len()))]
pub fn lex(source: &str) -> Vec<Token> {
    Lexer::new(source).collect()
}

// ============================================================================
// TESTS
// ============================================================================
