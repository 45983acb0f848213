//! Reserved words of the signature surface.
//!
//! ## Examples
//! ```rust
//! use tessera_core::lang::keywords::{self, KeywordId};
//!
//! assert_eq!(keywords::from_str("async"), Some(KeywordId::Async));
//! assert_eq!(keywords::as_str(KeywordId::Function), "function");
//! ```

/// Stable identifier for every reserved word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeywordId {
    Async,
    Function,
}

/// Metadata for a reserved word.
#[derive(Debug, Clone, Copy)]
pub struct KeywordInfo {
    pub id: KeywordId,
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
}

/// Registry of all reserved words.
pub const KEYWORDS: &[KeywordInfo] = &[
    KeywordInfo {
        id: KeywordId::Async,
        canonical: "async",
        aliases: &[],
        description: "marks a suspending test body or factory",
    },
    KeywordInfo {
        id: KeywordId::Function,
        canonical: "function",
        aliases: &[],
        description: "introduces a named or anonymous function head",
    },
];

/// Return the canonical spelling for a keyword.
pub fn as_str(id: KeywordId) -> &'static str {
    info_for(id).canonical
}

/// Return the metadata entry for a keyword.
pub fn info_for(id: KeywordId) -> &'static KeywordInfo {
    // Every KeywordId has exactly one entry; the guardrail tests enforce it.
    match KEYWORDS.iter().find(|k| k.id == id) {
        Some(info) => info,
        None => &KEYWORDS[0],
    }
}

/// Resolve a spelling (canonical or alias) to its identifier.
///
/// ## Notes
/// - Matching is **case-sensitive**.
pub fn from_str(s: &str) -> Option<KeywordId> {
    KEYWORDS
        .iter()
        .find(|k| k.canonical == s || k.aliases.contains(&s))
        .map(|k| k.id)
}
