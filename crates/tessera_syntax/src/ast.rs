//! AST for fixture and test signatures.

/// Byte range in the signature source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Span> for miette::SourceSpan {
    fn from(span: Span) -> Self {
        (span.start, span.len()).into()
    }
}

/// A node with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// How the signature introduced its parameter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// `(...) => body` or `ident => body`
    Arrow,
    /// `function name(...)`
    Function,
    /// `function* name(...)`
    Generator,
    /// A bare `{ ... }` pattern with no function head.
    Pattern,
}

/// A parsed signature head. Everything after the parameter list is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub is_async: bool,
    pub kind: FunctionKind,
    pub name: Option<String>,
    pub params: Vec<Spanned<Param>>,
    pub span: Span,
}

/// One formal parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// `{ a, b: c }`
    Destructured(Vec<Spanned<FieldBinding>>),
    /// `abc`
    Identifier(String),
}

impl Param {
    /// Short rendering used in diagnostics.
    pub fn display_name(&self) -> String {
        match self {
            Param::Identifier(name) => name.clone(),
            Param::Destructured(fields) => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|f| match &f.node.alias {
                        Some(alias) => format!("{}: {}", f.node.key, alias),
                        None => f.node.key.clone(),
                    })
                    .collect();
                format!("{{ {} }}", inner.join(", "))
            }
        }
    }
}

/// A field of a destructuring pattern: `key` or `key: alias`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBinding {
    pub key: String,
    pub alias: Option<String>,
}

impl FieldBinding {
    /// Name the value is bound to inside the function.
    pub fn local_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.key)
    }
}
