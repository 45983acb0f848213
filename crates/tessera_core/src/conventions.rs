//! Well-known fixture names and naming conventions.

use crate::Scope;

/// Fixtures whose name starts with this prefix are automatic: the resolver includes them in
/// every plan of their scope without an explicit request.
pub const AUTOMATIC_PREFIX: &str = "auto_";

/// Built-in test fixture describing the running test.
pub const TEST_INFO: &str = "test_info";

/// Built-in worker fixture describing the worker executing the test.
pub const WORKER_INFO: &str = "worker_info";

/// Built-in fixture names with their scopes, in registration order.
pub const BUILTIN_FIXTURES: &[(&str, Scope)] = &[(TEST_INFO, Scope::Test), (WORKER_INFO, Scope::Worker)];

/// Whether `name` follows the automatic-fixture naming convention.
pub fn is_automatic_name(name: &str) -> bool {
    name.len() > AUTOMATIC_PREFIX.len() && name.starts_with(AUTOMATIC_PREFIX)
}

/// Whether `name` is reserved for a built-in fixture.
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_FIXTURES.iter().any(|(builtin, _)| *builtin == name)
}
