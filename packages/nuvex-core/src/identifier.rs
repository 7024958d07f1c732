//! Identifier validation for anything interpolated into L3 DDL/DML.
//!
//! `sqlx` bind parameters cover values, never table/column identifiers, so
//! this regex check is the only injection defense for schema identifiers
//! (invariant I6) and must run before any identifier is formatted into a
//! SQL string.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::EngineError;

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

/// Validates a single identifier against `^[A-Za-z_][A-Za-z0-9_]*$`.
///
/// # Errors
/// Returns [`EngineError::SchemaInvalidIdentifier`] if `name` does not match.
pub fn validate_identifier(name: &str) -> Result<(), EngineError> {
    if identifier_pattern().is_match(name) {
        Ok(())
    } else {
        Err(EngineError::SchemaInvalidIdentifier(name.to_string()))
    }
}

/// Validates a set of identifiers, short-circuiting on the first invalid one.
///
/// # Errors
/// Returns [`EngineError::SchemaInvalidIdentifier`] naming the first
/// offending identifier.
pub fn validate_identifiers(names: &[&str]) -> Result<(), EngineError> {
    for name in names {
        validate_identifier(name)?;
    }
    Ok(())
}
