//! Shared user-facing error messages.
//!
//! The signature frontend and the engine both format these, so diagnostics stay identical no
//! matter which layer detects the problem.

/// Prefix of the destructuring diagnostic; the offending parameter text follows.
pub const DESTRUCTURING_REQUIRED_MSG: &str = "First argument must use the object destructuring pattern";

/// Format the destructuring diagnostic for `param`.
pub fn destructuring_required(param: &str) -> String {
    format!("{DESTRUCTURING_REQUIRED_MSG}: {param}")
}

/// Format the unknown-parameter diagnostic. `subject` is `Test` or `Fixture "<name>"`.
pub fn unknown_parameter(subject: &str, name: &str) -> String {
    format!("{subject} has unknown parameter \"{name}\".")
}
