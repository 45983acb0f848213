//! Fixture values and the argument map handed to factories and test bodies.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use miette::Diagnostic;
use thiserror::Error;

/// Runtime value yielded by a fixture factory.
pub type FixtureValue = Arc<dyn Any + Send + Sync>;

/// Errors raised when a body reads an argument it did not request, or reads it as the wrong type.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum ArgError {
    #[error("Fixture \"{0}\" was not requested by this declaration")]
    #[diagnostic(code(tessera::arg_missing), help("add `{0}` to the destructuring pattern"))]
    Missing(String),

    #[error("Fixture \"{alias}\" does not hold a value of type `{expected}`")]
    #[diagnostic(code(tessera::arg_type))]
    TypeMismatch { alias: String, expected: &'static str },
}

/// Resolved fixture values keyed by the local alias the declaration asked for.
///
/// ## Examples
/// ```rust
/// use std::sync::Arc;
/// use tessera::FixtureArgs;
///
/// let mut args = FixtureArgs::default();
/// args.insert("renamed", Arc::new(123_i32));
/// assert_eq!(*args.get::<i32>("renamed").unwrap(), 123);
/// assert!(args.get::<i32>("asdf").is_err());
/// ```
#[derive(Clone, Default)]
pub struct FixtureArgs {
    values: IndexMap<String, FixtureValue>,
}

impl FixtureArgs {
    pub fn insert(&mut self, alias: impl Into<String>, value: FixtureValue) {
        self.values.insert(alias.into(), value);
    }

    /// Borrow the value bound to `alias`.
    ///
    /// ## Errors
    /// [`ArgError::Missing`] if `alias` was not requested, [`ArgError::TypeMismatch`] if the value is
    /// not a `T`.
    pub fn get<T: Any>(&self, alias: &str) -> Result<&T, ArgError> {
        let value = self.raw(alias)?;
        value.downcast_ref::<T>().ok_or_else(|| ArgError::TypeMismatch {
            alias: alias.to_string(),
            expected: type_name::<T>(),
        })
    }

    /// Clone the value bound to `alias`.
    ///
    /// ## Errors
    /// Same as [`FixtureArgs::get`].
    pub fn cloned<T: Any + Clone>(&self, alias: &str) -> Result<T, ArgError> {
        self.get::<T>(alias).cloned()
    }

    /// Share the value bound to `alias` without cloning it.
    ///
    /// ## Errors
    /// Same as [`FixtureArgs::get`].
    pub fn shared<T: Any + Send + Sync>(&self, alias: &str) -> Result<Arc<T>, ArgError> {
        let value = self.raw(alias)?.clone();
        value.downcast::<T>().map_err(|_| ArgError::TypeMismatch {
            alias: alias.to_string(),
            expected: type_name::<T>(),
        })
    }

    /// The untyped value bound to `alias`.
    ///
    /// ## Errors
    /// [`ArgError::Missing`] if `alias` was not requested.
    pub fn raw(&self, alias: &str) -> Result<&FixtureValue, ArgError> {
        self.values
            .get(alias)
            .ok_or_else(|| ArgError::Missing(alias.to_string()))
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.values.contains_key(alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for FixtureArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_access() {
        let mut args = FixtureArgs::default();
        args.insert("name", Arc::new("worker-a".to_string()));
        assert_eq!(args.get::<String>("name").unwrap(), "worker-a");
        assert_eq!(args.cloned::<String>("name").unwrap(), "worker-a");
        assert_eq!(*args.shared::<String>("name").unwrap(), "worker-a");
    }

    #[test]
    fn wrong_type_names_expected_type() {
        let mut args = FixtureArgs::default();
        args.insert("n", Arc::new(1_u8));
        let err = args.get::<String>("n").unwrap_err();
        assert!(matches!(err, ArgError::TypeMismatch { expected, .. } if expected.contains("String")));
        assert!(args.shared::<String>("n").is_err());
    }

    #[test]
    fn missing_alias() {
        let args = FixtureArgs::default();
        assert_eq!(args.get::<u8>("x").unwrap_err(), ArgError::Missing("x".to_string()));
        assert!(args.is_empty());
    }

    #[test]
    fn debug_lists_aliases_in_order() {
        let mut args = FixtureArgs::default();
        args.insert("b", Arc::new(()));
        args.insert("a", Arc::new(()));
        assert_eq!(format!("{args:?}"), "{\"b\", \"a\"}");
        assert_eq!(args.aliases().collect::<Vec<_>>(), vec!["b", "a"]);
    }
}
