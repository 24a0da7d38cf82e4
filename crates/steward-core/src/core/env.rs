// steward-core/src/core/env.rs
// ============================================================================
// Module: Environment Expansion
// Description: Environment-variable interpolation for document bytes.
// Purpose: Expand `$VAR` / `${VAR}` references before YAML decoding.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Document files may reference environment variables with `$VAR` or
//! `${VAR}`. Expansion happens on the raw bytes, before any YAML parsing, so
//! interpolation works in every position. References with the
//! `STEWARD_SECRET_` prefix are deliberately left unexpanded in the document
//! text: their values are collected separately and submitted to the server,
//! which performs the substitution at delivery time so secret material never
//! lands in locally rendered profiles or scripts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Environment expansion errors.
#[derive(Debug, Error)]
pub enum EnvError {
    /// A referenced variable is not set in the environment.
    #[error("environment variable \"{0}\" is not set")]
    Unresolved(String),
    /// Input is not valid UTF-8.
    #[error("file contents must be utf-8")]
    NotUtf8,
}

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefix for server-side secret variables, which are never expanded locally.
pub const SECRET_ENV_PREFIX: &str = "STEWARD_SECRET_";

// ============================================================================
// SECTION: Expansion
// ============================================================================

/// Expands `$VAR` and `${VAR}` references in `bytes` from the process
/// environment.
///
/// `STEWARD_SECRET_*` references are preserved verbatim. A reference to an
/// unset variable is a hard error naming the variable.
///
/// # Errors
///
/// Returns [`EnvError::Unresolved`] for an unset variable and
/// [`EnvError::NotUtf8`] for non-UTF-8 input.
pub fn expand_env_bytes(bytes: &[u8]) -> Result<Vec<u8>, EnvError> {
    expand_env_bytes_with(bytes, |name| env::var(name).ok())
}

/// Expands `$VAR` and `${VAR}` references in `bytes` using `lookup`.
///
/// This is the injectable form of [`expand_env_bytes`]; the runtime always
/// resolves against the process environment, while tests may supply a fixed
/// map.
///
/// # Errors
///
/// Returns [`EnvError::Unresolved`] for a variable `lookup` does not resolve
/// and [`EnvError::NotUtf8`] for non-UTF-8 input.
pub fn expand_env_bytes_with<F>(bytes: &[u8], lookup: F) -> Result<Vec<u8>, EnvError>
where
    F: Fn(&str) -> Option<String>,
{
    let text = std::str::from_utf8(bytes).map_err(|_| EnvError::NotUtf8)?;
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let braced = matches!(chars.peek(), Some('{'));
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&nc) = chars.peek() {
            let part_of_name =
                if braced { nc != '}' } else { nc.is_ascii_alphanumeric() || nc == '_' };
            if !part_of_name {
                break;
            }
            name.push(nc);
            chars.next();
        }
        if braced {
            // A missing closing brace leaves the text untouched.
            if matches!(chars.peek(), Some('}')) {
                chars.next();
            } else {
                out.push('$');
                out.push('{');
                out.push_str(&name);
                continue;
            }
        }
        if name.is_empty() {
            out.push('$');
            if braced {
                out.push_str("{}");
            }
            continue;
        }
        if name.starts_with(SECRET_ENV_PREFIX) {
            if braced {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            } else {
                out.push('$');
                out.push_str(&name);
            }
            continue;
        }
        match lookup(&name) {
            Some(value) => out.push_str(&value),
            None => return Err(EnvError::Unresolved(name)),
        }
    }
    Ok(out.into_bytes())
}

/// Scans `content` for `STEWARD_SECRET_*` references and records their values
/// from the process environment.
///
/// # Errors
///
/// Returns [`EnvError::Unresolved`] when a referenced secret variable is not
/// set.
pub fn lookup_env_secrets(
    content: &str,
    secrets: &mut BTreeMap<String, String>,
) -> Result<(), EnvError> {
    lookup_env_secrets_with(content, secrets, |name| env::var(name).ok())
}

/// Injectable form of [`lookup_env_secrets`].
///
/// # Errors
///
/// Returns [`EnvError::Unresolved`] when a referenced secret variable does
/// not resolve through `lookup`.
pub fn lookup_env_secrets_with<F>(
    content: &str,
    secrets: &mut BTreeMap<String, String>,
    lookup: F,
) -> Result<(), EnvError>
where
    F: Fn(&str) -> Option<String>,
{
    for name in secret_references(content) {
        let value = lookup(&name).ok_or_else(|| EnvError::Unresolved(name.clone()))?;
        secrets.insert(name, value);
    }
    Ok(())
}

/// Extracts the distinct `STEWARD_SECRET_*` variable names referenced in
/// `content`.
fn secret_references(content: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = content;
    while let Some(pos) = rest.find('$') {
        rest = &rest[pos + 1..];
        let (body, after_brace) = match rest.strip_prefix('{') {
            Some(inner) => (inner, true),
            None => (rest, false),
        };
        let end = body
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(body.len());
        let name = &body[..end];
        let closed = !after_brace || body[end..].starts_with('}');
        if closed && name.starts_with(SECRET_ENV_PREFIX) && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

// ============================================================================
// SECTION: Tests
// ============================================================================
