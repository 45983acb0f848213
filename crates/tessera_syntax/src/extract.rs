//! Parameter extraction: turn a signature into the fixtures it requests.
//!
//! A declaration requests nothing (`()`), or exactly one object-destructuring pattern whose
//! fields are fixture names, optionally renamed (`{ asdf: renamed }` requests `asdf` and binds it
//! locally as `renamed`). Anything else is rejected with
//! [`ExtractError::DestructuringRequired`].
//!
//! The same request list can also be built explicitly with [`Params`], which is what Rust callers
//! usually want when no signature text is at hand.

use std::collections::HashSet;

use crate::ast::{Param, Span};
use crate::diagnostics::ExtractError;
use crate::parser;

/// One requested fixture: the registry name and the local alias the value is exposed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamRequest {
    pub name: String,
    pub alias: String,
    /// Position in the signature text; `None` for requests built with [`Params`].
    pub span: Option<Span>,
}

impl ParamRequest {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            alias: name.clone(),
            name,
            span: None,
        }
    }

    pub fn renamed(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
            span: None,
        }
    }

    pub fn is_renamed(&self) -> bool {
        self.name != self.alias
    }
}

/// Explicit request list, the structured alternative to signature text.
///
/// ## Examples
/// ```rust
/// use tessera_syntax::Params;
///
/// let params = Params::new().request("page").request_as("server", "srv");
/// let requests = params.into_requests().unwrap();
/// assert_eq!(requests[1].alias, "srv");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    requests: Vec<ParamRequest>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(mut self, name: impl Into<String>) -> Self {
        self.requests.push(ParamRequest::new(name));
        self
    }

    pub fn request_as(mut self, name: impl Into<String>, alias: impl Into<String>) -> Self {
        self.requests.push(ParamRequest::renamed(name, alias));
        self
    }

    /// Validate and return the requests.
    ///
    /// ## Errors
    /// [`ExtractError::DuplicateBinding`] when two requests share a local alias.
    pub fn into_requests(self) -> Result<Vec<ParamRequest>, ExtractError> {
        check_unique_aliases(&self.requests, "")?;
        Ok(self.requests)
    }
}

impl<S: Into<String>> FromIterator<S> for Params {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            requests: iter.into_iter().map(ParamRequest::new).collect(),
        }
    }
}

/// Anything a declaration can state its requests with: signature text or an explicit [`Params`].
pub trait IntoParams {
    /// ## Errors
    /// Whatever [`extract_params`] or [`Params::into_requests`] reports.
    fn into_params(self) -> Result<Vec<ParamRequest>, ExtractError>;
}

impl IntoParams for &str {
    fn into_params(self) -> Result<Vec<ParamRequest>, ExtractError> {
        extract_params(self)
    }
}

impl IntoParams for String {
    fn into_params(self) -> Result<Vec<ParamRequest>, ExtractError> {
        extract_params(&self)
    }
}

impl IntoParams for Params {
    fn into_params(self) -> Result<Vec<ParamRequest>, ExtractError> {
        self.into_requests()
    }
}

/// Extract the ordered fixture requests declared by `source`.
///
/// ## Errors
/// - [`ExtractError::DestructuringRequired`]: a single positional parameter, several parameters,
///   or text that is not a function signature.
/// - [`ExtractError::DuplicateBinding`]: two fields share a local name.
/// - [`ExtractError::Syntax`]: malformed or unsupported parameter syntax.
#[tracing::instrument(skip_all, fields(source_len = source.len()))]
pub fn extract_params(source: &str) -> Result<Vec<ParamRequest>, ExtractError> {
    let signature = parser::parse(source)?;

    match signature.params.as_slice() {
        [] => Ok(Vec::new()),
        [single] => match &single.node {
            Param::Destructured(fields) => {
                let requests: Vec<ParamRequest> = fields
                    .iter()
                    .map(|field| ParamRequest {
                        name: field.node.key.clone(),
                        alias: field.node.local_name().to_string(),
                        span: Some(field.span),
                    })
                    .collect();
                check_unique_aliases(&requests, source)?;
                Ok(requests)
            }
            Param::Identifier(name) => Err(ExtractError::DestructuringRequired {
                param: name.clone(),
                signature: source.to_string(),
                span: single.span.into(),
            }),
        },
        [first, .., last] => {
            let names: Vec<String> = signature.params.iter().map(|p| p.node.display_name()).collect();
            Err(ExtractError::DestructuringRequired {
                param: names.join(", "),
                signature: source.to_string(),
                span: first.span.merge(last.span).into(),
            })
        }
    }
}

fn check_unique_aliases(requests: &[ParamRequest], source: &str) -> Result<(), ExtractError> {
    let mut seen = HashSet::new();
    for request in requests {
        if !seen.insert(request.alias.as_str()) {
            return Err(ExtractError::DuplicateBinding {
                alias: request.alias.clone(),
                signature: source.to_string(),
                span: request.span.unwrap_or_default().into(),
            });
        }
    }
    Ok(())
}
