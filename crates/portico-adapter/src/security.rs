//! Security utilities for identifier handling in portico-adapter.
//!
//! Tenant identifiers are free-form strings supplied by clients, yet they end
//! up in DDL/identifier positions (schema names, database names, file names).
//! Every engine that interpolates a tenant id must run it through
//! [`sanitize_tenant_id`] first.

use crate::error::{Error, Result};

/// Rewrite a tenant identifier so it only contains `[A-Za-z0-9_-]`.
///
/// Characters outside the allowed set are replaced with `_`, preventing
/// injection through tenant ids used as schema/database/file names.
///
/// # Examples
///
/// ```
/// use portico_adapter::security::sanitize_tenant_id;
///
/// assert_eq!(sanitize_tenant_id("tenant-1"), "tenant-1");
/// assert_eq!(sanitize_tenant_id("tenant!@#"), "tenant___");
/// assert_eq!(sanitize_tenant_id("a.b/c"), "a_b_c");
/// ```
pub fn sanitize_tenant_id(tenant_id: &str) -> String {
    tenant_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Validate a SQL identifier (table names on the admin introspection surface).
///
/// Prevents SQL injection by enforcing strict character rules:
/// - Must not be empty
/// - Maximum 255 characters
/// - Must start with an ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters and underscores
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > 255 {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max 255)",
            name.len()
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::config(format!(
                "invalid SQL identifier '{}': contains invalid character '{}'",
                name, c
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_passthrough() {
        assert_eq!(sanitize_tenant_id("tenant-1"), "tenant-1");
        assert_eq!(sanitize_tenant_id("Tenant_ABC"), "Tenant_ABC");
        assert_eq!(sanitize_tenant_id("t"), "t");
    }

    #[test]
    fn test_sanitize_rewrites_specials() {
        assert_eq!(sanitize_tenant_id("tenant!@#"), "tenant___");
        assert_eq!(sanitize_tenant_id("user@example.com"), "user_example_com");
        assert_eq!(sanitize_tenant_id("a b\tc"), "a_b_c");
        assert_eq!(sanitize_tenant_id("x'; DROP SCHEMA--"), "x___DROP_SCHEMA--");
    }

    #[test]
    fn test_sanitize_unicode() {
        // Non-ASCII characters are rewritten even when alphanumeric
        assert_eq!(sanitize_tenant_id("tabl\u{0435}"), "tabl_");
    }

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("my_table_123").is_ok());
        assert!(validate_identifier("_private").is_ok());
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("123abc").is_err());
        assert!(validate_identifier("x; DROP TABLE users--").is_err());
        assert!(validate_identifier("schema.table").is_err());
        assert!(validate_identifier(&"a".repeat(256)).is_err());
    }
}
