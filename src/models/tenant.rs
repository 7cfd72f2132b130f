//! Tenant routing data models.

use crate::error::{DbError, DbResult};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Longest identifier accepted for databases, tables and columns.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// One row of the tenant registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDescriptor {
    pub tenant_id: String,
    /// Physical database holding this tenant's data
    pub database_name: String,
    pub last_updated: DateTime<Utc>,
}

impl TenantDescriptor {
    /// Build a descriptor from the registry's stored epoch milliseconds.
    pub fn from_stored(
        tenant_id: impl Into<String>,
        database_name: impl Into<String>,
        last_updated_ms: i64,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            database_name: database_name.into(),
            last_updated: Utc
                .timestamp_millis_opt(last_updated_ms)
                .single()
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}

/// Check that `name` is safe to splice into SQL text and file paths.
///
/// Only ASCII alphanumerics and `_` are accepted, 1 to 64 characters.
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_IDENTIFIER_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Validate an identifier, naming `what` it is in the error.
pub fn validate_identifier(what: &str, name: &str) -> DbResult<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(DbError::invalid_input(format!(
            "Invalid {} '{}': use 1-{} ASCII letters, digits or underscores",
            what, name, MAX_IDENTIFIER_LEN
        )))
    }
}

/// Validate a tenant identifier.
///
/// Tenant ids are opaque but must be non-empty and fit the registry column.
pub fn validate_tenant_id(tenant_id: &str) -> DbResult<()> {
    if tenant_id.trim().is_empty() {
        return Err(DbError::invalid_input("Tenant id cannot be empty"));
    }
    if tenant_id.len() > 255 {
        return Err(DbError::invalid_input(
            "Tenant id cannot exceed 255 bytes",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(is_valid_identifier("tenant_1"));
        assert!(is_valid_identifier("Master"));
        assert!(is_valid_identifier(&"a".repeat(64)));
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("tenant-1"));
        assert!(!is_valid_identifier("db; DROP TABLE x"));
        assert!(!is_valid_identifier("../etc"));
        assert!(!is_valid_identifier("tenänt"));
        assert!(!is_valid_identifier(&"a".repeat(65)));
    }

    #[test]
    fn test_validate_identifier_names_the_kind() {
        let err = validate_identifier("database name", "bad name").unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(err.to_string().contains("database name"));
    }

    #[test]
    fn test_validate_tenant_id() {
        assert!(validate_tenant_id("acme-corp:eu").is_ok());
        assert!(validate_tenant_id("  ").is_err());
        assert!(validate_tenant_id(&"t".repeat(256)).is_err());
    }

    #[test]
    fn test_descriptor_from_stored_millis() {
        let desc = TenantDescriptor::from_stored("t1", "tenant_1", 1_700_000_000_123);
        assert_eq!(desc.last_updated.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(desc.database_name, "tenant_1");
    }
}
