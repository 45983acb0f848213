//! Signature frontend for tessera: lexer, parser, AST and parameter extraction.
//!
//! Tests and fixture factories declare the fixtures they want through a signature such as
//! `async ({ page, server: srv })`. This crate analyses that text statically and returns the
//! ordered `(requested name, local alias)` pairs, or a diagnostic explaining why the signature is
//! not an object-destructuring pattern.
//!
//! ## Notes
//! - This crate is "syntax-only": it never looks at a registry, so it cannot tell whether a
//!   requested fixture exists. That is the resolver's job.
//! - Vocabulary identity (keywords/punctuation) comes from `tessera_core::lang`.
//!
//! ## Examples
//! ```rust
//! use tessera_syntax::extract_params;
//!
//! let params = extract_params("async ({ asdf: renamed, other })").unwrap();
//! assert_eq!(params[0].name, "asdf");
//! assert_eq!(params[0].alias, "renamed");
//! assert_eq!(params[1].alias, "other");
//! ```

pub mod ast;
pub mod diagnostics;
pub mod extract;
pub mod lexer;
pub mod parser;

pub use diagnostics::ExtractError;
pub use extract::{IntoParams, ParamRequest, Params, extract_params};
