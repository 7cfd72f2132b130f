//! Tenant registry backed by a table in the master database.
//!
//! The table maps each tenant id to the physical database holding its data.
//! Writes rely on the store's native upsert, so concurrent provisioning of the
//! same tenant serializes inside the database and the last write wins.

use crate::config::DEFAULT_REGISTRY_TABLE;
use crate::db::{ConnectionHandle, ConnectionManager};
use crate::error::{DbError, DbResult, ErrorKind};
use crate::models::{
    DatabaseType, QueryParam, Row, TenantDescriptor, validate_identifier, validate_tenant_id,
};
use chrono::Utc;
use tracing::{debug, info};

/// Lookup and upsert of tenant to database mappings.
///
/// Cheap to clone; clones share the connection manager.
#[derive(Debug, Clone)]
pub struct TenantRegistry {
    manager: ConnectionManager,
    table: String,
}

impl TenantRegistry {
    /// Registry stored in the default `tenant_databases` table.
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            table: DEFAULT_REGISTRY_TABLE.to_string(),
        }
    }

    /// Registry stored in `table`, which must be a plain identifier.
    pub fn with_table(manager: ConnectionManager, table: impl Into<String>) -> DbResult<Self> {
        let table = table.into();
        validate_identifier("registry table", &table)?;
        Ok(Self { manager, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the registry table if it does not exist.
    pub async fn ensure_schema(&self) -> DbResult<()> {
        let mut conn = self.master("ensure_schema").await?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             tenant_id VARCHAR(255) NOT NULL PRIMARY KEY, \
             database_name VARCHAR(64) NOT NULL, \
             last_updated BIGINT NOT NULL)",
            self.table
        );
        let result = conn.query(&ddl, &[]).await;
        conn.release().await;
        result?;
        debug!(table = %self.table, "Tenant registry schema ready");
        Ok(())
    }

    /// Map `tenant_id` to `database_name`, replacing any previous mapping.
    ///
    /// Registering the same pair twice is a no-op apart from the timestamp.
    pub async fn register(
        &self,
        tenant_id: &str,
        database_name: &str,
    ) -> DbResult<TenantDescriptor> {
        validate_tenant_id(tenant_id)?;
        validate_identifier("database name", database_name)?;

        let mut conn = self.master("register").await?;
        let sql = upsert_sql(conn.db_type(), &self.table);
        let now_ms = Utc::now().timestamp_millis();
        let params = [
            QueryParam::from(tenant_id),
            QueryParam::from(database_name),
            QueryParam::Int(now_ms),
        ];

        let result = conn.query(&sql, &params).await;
        conn.release().await;
        result?;

        info!(tenant = %tenant_id, database = %database_name, "Tenant registered");
        Ok(TenantDescriptor::from_stored(tenant_id, database_name, now_ms))
    }

    /// Physical database for `tenant_id`, or `TenantNotFound`.
    pub async fn resolve(&self, tenant_id: &str) -> DbResult<String> {
        Ok(self.describe(tenant_id).await?.database_name)
    }

    /// Full registry row for `tenant_id`, or `TenantNotFound`.
    pub async fn describe(&self, tenant_id: &str) -> DbResult<TenantDescriptor> {
        validate_tenant_id(tenant_id)?;

        let mut conn = self.master("resolve").await?;
        let sql = format!(
            "SELECT tenant_id, database_name, last_updated FROM {} WHERE tenant_id = {}",
            self.table,
            conn.db_type().placeholder(1)
        );
        let result = conn.query(&sql, &[QueryParam::from(tenant_id)]).await;
        conn.release().await;

        let result = result?;
        match result.first() {
            Some(row) => descriptor_from_row(row),
            None => Err(DbError::tenant_not_found(tenant_id)),
        }
    }

    /// Every registered tenant, ordered by tenant id.
    pub async fn list(&self) -> DbResult<Vec<TenantDescriptor>> {
        let mut conn = self.master("list").await?;
        let sql = format!(
            "SELECT tenant_id, database_name, last_updated FROM {} ORDER BY tenant_id",
            self.table
        );
        let result = conn.query(&sql, &[]).await;
        conn.release().await;

        result?.rows.iter().map(descriptor_from_row).collect()
    }

    async fn master(&self, operation: &str) -> DbResult<ConnectionHandle> {
        let database = self.manager.master_database().await.map_err(|e| match e {
            DbError::NotInitialized { .. } => {
                DbError::not_initialized(format!("registry {}", operation))
            }
            other => other,
        })?;
        self.manager.get_connection(&database).await
    }
}

fn upsert_sql(db_type: DatabaseType, table: &str) -> String {
    match db_type {
        DatabaseType::MySQL => format!(
            "INSERT INTO {} (tenant_id, database_name, last_updated) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE database_name = VALUES(database_name), \
             last_updated = VALUES(last_updated)",
            table
        ),
        DatabaseType::PostgreSQL | DatabaseType::SQLite => {
            let p = |n| db_type.placeholder(n);
            format!(
                "INSERT INTO {} (tenant_id, database_name, last_updated) VALUES ({}, {}, {}) \
                 ON CONFLICT (tenant_id) DO UPDATE SET database_name = excluded.database_name, \
                 last_updated = excluded.last_updated",
                table,
                p(1),
                p(2),
                p(3)
            )
        }
    }
}

fn descriptor_from_row(row: &Row) -> DbResult<TenantDescriptor> {
    let text = |column: &str| {
        row.get(column)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| malformed(column))
    };
    let last_updated = row
        .get("last_updated")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| malformed("last_updated"))?;

    Ok(TenantDescriptor::from_stored(
        text("tenant_id")?,
        text("database_name")?,
        last_updated,
    ))
}

fn malformed(column: &str) -> DbError {
    DbError::query(
        format!("Tenant registry row has a missing or malformed '{}' column", column),
        ErrorKind::Other,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_table_rejects_bad_identifier() {
        let manager = ConnectionManager::new();
        assert!(TenantRegistry::with_table(manager.clone(), "tenants").is_ok());
        let result = TenantRegistry::with_table(manager, "tenants; DROP TABLE x");
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    }

    #[test]
    fn test_upsert_sql_per_backend() {
        let mysql = upsert_sql(DatabaseType::MySQL, "reg");
        assert!(mysql.contains("ON DUPLICATE KEY UPDATE"));
        assert!(mysql.contains("VALUES (?, ?, ?)"));

        let pg = upsert_sql(DatabaseType::PostgreSQL, "reg");
        assert!(pg.contains("VALUES ($1, $2, $3)"));
        assert!(pg.contains("ON CONFLICT (tenant_id) DO UPDATE"));

        let sqlite = upsert_sql(DatabaseType::SQLite, "reg");
        assert!(sqlite.contains("VALUES (?, ?, ?)"));
        assert!(sqlite.contains("ON CONFLICT (tenant_id)"));
    }

    #[test]
    fn test_descriptor_from_row() {
        let row = json!({"tenant_id": "t1", "database_name": "tenant_1", "last_updated": 1_000})
            .as_object()
            .cloned()
            .unwrap();
        let desc = descriptor_from_row(&row).unwrap();
        assert_eq!(desc.tenant_id, "t1");
        assert_eq!(desc.last_updated.timestamp_millis(), 1_000);

        let mut broken = row.clone();
        broken.remove("database_name");
        assert!(matches!(
            descriptor_from_row(&broken),
            Err(DbError::Query { .. })
        ));
    }

    #[tokio::test]
    async fn test_uninitialized_registry() {
        let registry = TenantRegistry::new(ConnectionManager::new());
        let result = registry.resolve("t1").await;
        assert!(matches!(result, Err(DbError::NotInitialized { .. })));
    }

    #[tokio::test]
    async fn test_register_and_resolve_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConnectionManager::new();
        manager
            .init_pool(&crate::config::DatabaseConfig::sqlite(dir.path()))
            .await
            .unwrap();
        let registry = TenantRegistry::new(manager.clone());
        registry.ensure_schema().await.unwrap();
        // Idempotent
        registry.ensure_schema().await.unwrap();

        assert!(matches!(
            registry.resolve("t1").await,
            Err(DbError::TenantNotFound { .. })
        ));

        registry.register("t1", "tenant_1").await.unwrap();
        registry.register("t1", "tenant_1").await.unwrap();
        assert_eq!(registry.resolve("t1").await.unwrap(), "tenant_1");
        assert_eq!(registry.list().await.unwrap().len(), 1);

        registry.register("t1", "tenant_1b").await.unwrap();
        assert_eq!(registry.resolve("t1").await.unwrap(), "tenant_1b");
        assert_eq!(registry.list().await.unwrap().len(), 1);

        assert!(matches!(
            registry.register("t2", "bad-name").await,
            Err(DbError::InvalidInput { .. })
        ));

        manager.close_pool().await;
    }
}
