//! Vocabulary accepted in fixture and test signatures.
//!
//! Signatures are a small, JavaScript-flavoured surface (`async function*({ a, b: c })`,
//! `({ a }) => ...`). These tables are the single source of truth for its reserved words and
//! punctuation; the lexer in `tessera_syntax` looks spellings up here.

pub mod keywords;
pub mod punctuation;
