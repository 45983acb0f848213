//! Diagnostics produced while extracting fixture requests from a signature.
//!
//! Every variant carries the signature text and a labelled span, so `miette` can render the
//! offending part of the declaration:
//!
//! ```text
//!   × First argument must use the object destructuring pattern: abc
//!    ╭────
//!  1 │ function (abc)
//!    ·           ─┬─
//!    ·            ╰── declare fixtures as `{ abc }` instead
//!    ╰────
//! ```

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

#[derive(Debug, Clone, Error, Diagnostic, PartialEq)]
pub enum ExtractError {
    /// The sole parameter is not `{ ... }`, there are several parameters, or the text is not a
    /// function signature at all. The message matches
    /// [`tessera_core::errors::destructuring_required`].
    #[error("First argument must use the object destructuring pattern: {param}")]
    #[diagnostic(code(tessera::destructuring_required))]
    DestructuringRequired {
        param: String,
        #[source_code]
        signature: String,
        #[label("declare fixtures as `{{ {param} }}` instead")]
        span: SourceSpan,
    },

    /// Two fields of one pattern bind the same local name.
    #[error("Duplicate binding \"{alias}\" in fixture pattern")]
    #[diagnostic(code(tessera::duplicate_binding))]
    DuplicateBinding {
        alias: String,
        #[source_code]
        signature: String,
        #[label("bound again here")]
        span: SourceSpan,
    },

    /// Malformed or unsupported syntax inside the parameter list.
    #[error("Invalid fixture signature: {message}")]
    #[diagnostic(code(tessera::signature_syntax))]
    Syntax {
        message: String,
        #[source_code]
        signature: String,
        #[label("here")]
        span: SourceSpan,
    },
}

impl ExtractError {
    /// Offending parameter text for destructuring errors.
    pub fn param(&self) -> Option<&str> {
        match self {
            ExtractError::DestructuringRequired { param, .. } => Some(param),
            _ => None,
        }
    }

    pub fn span(&self) -> SourceSpan {
        match self {
            ExtractError::DestructuringRequired { span, .. }
            | ExtractError::DuplicateBinding { span, .. }
            | ExtractError::Syntax { span, .. } => *span,
        }
    }

    pub fn is_destructuring_required(&self) -> bool {
        matches!(self, ExtractError::DestructuringRequired { .. })
    }
}
