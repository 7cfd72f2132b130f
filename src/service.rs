//! The narrow interface the application layer consumes.
//!
//! [`TenantDb`] owns the connection manager and wires the registry, scoped
//! executor and transaction manager to it. It is cheap to clone; clones share
//! the same pools. Tenant scoping itself is entered with the free functions
//! [`with_tenant`](crate::with_tenant) and [`current_tenant`](crate::current_tenant).

use crate::config::{Config, DatabaseConfig, RetryConfig, RewriteConfig};
use crate::db::ConnectionManager;
use crate::error::DbResult;
use crate::models::{HealthReport, PoolStats, QueryParam, QueryResult, TenantDescriptor};
use crate::tenant::{ScopedExecutor, TenantRegistry, TenantTransaction, TransactionManager};
use futures_util::future::BoxFuture;
use std::time::Duration;
use tracing::info;

/// Handle to the multi-tenant database layer.
#[derive(Debug, Clone)]
pub struct TenantDb {
    manager: ConnectionManager,
    registry: TenantRegistry,
    executor: ScopedExecutor,
    transactions: TransactionManager,
}

/// Pieces of [`Config`] that shape the layer above the pools.
#[derive(Debug, Clone)]
pub struct TenantDbOptions {
    pub query_timeout: Duration,
    pub retry: RetryConfig,
    pub rewrite: RewriteConfig,
    pub registry_table: String,
}

impl Default for TenantDbOptions {
    fn default() -> Self {
        let defaults = Config::for_url("");
        Self::from(&defaults)
    }
}

impl From<&Config> for TenantDbOptions {
    fn from(config: &Config) -> Self {
        Self {
            query_timeout: config.query_timeout_duration(),
            retry: config.retry_config(),
            rewrite: config.rewrite_config(),
            registry_table: config.registry_table.clone(),
        }
    }
}

impl TenantDb {
    /// Initialize pools from `config` and make sure the registry table exists.
    pub async fn init(config: &Config) -> DbResult<Self> {
        let database = config.database_config()?;
        Self::init_with(&database, TenantDbOptions::from(config)).await
    }

    /// Initialize from a database URL with every other setting at its default.
    pub async fn connect(database_url: &str) -> DbResult<Self> {
        Self::init(&Config::for_url(database_url)).await
    }

    /// Initialize from already-built settings.
    pub async fn init_with(database: &DatabaseConfig, options: TenantDbOptions) -> DbResult<Self> {
        let manager = ConnectionManager::with_query_timeout(options.query_timeout);
        manager.init_pool(database).await?;

        match Self::assemble(manager.clone(), options).await {
            Ok(db) => {
                info!(backend = %database.backend, "Tenant database layer ready");
                Ok(db)
            }
            Err(e) => {
                manager.close_pool().await;
                Err(e)
            }
        }
    }

    async fn assemble(manager: ConnectionManager, options: TenantDbOptions) -> DbResult<Self> {
        let registry = TenantRegistry::with_table(manager.clone(), options.registry_table)?;
        registry.ensure_schema().await?;
        let executor = ScopedExecutor::new(manager.clone(), registry.clone(), options.rewrite)?;
        let transactions = TransactionManager::new(executor.clone(), options.retry);
        Ok(Self {
            manager,
            registry,
            executor,
            transactions,
        })
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &ScopedExecutor {
        &self.executor
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    /// Create the tenant's physical database if needed and register it.
    pub async fn provision(
        &self,
        tenant_id: &str,
        database_name: &str,
    ) -> DbResult<TenantDescriptor> {
        crate::models::validate_tenant_id(tenant_id)?;
        self.manager.ensure_database(database_name).await?;
        self.registry.register(tenant_id, database_name).await
    }

    /// Run one statement against the current tenant's database.
    pub async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        self.executor.query(sql, params).await
    }

    /// See [`TransactionManager::with_transaction`].
    pub async fn with_transaction<T, F>(&self, work: F) -> DbResult<T>
    where
        F: for<'t> FnOnce(&'t mut TenantTransaction) -> BoxFuture<'t, DbResult<T>> + Send,
        T: Send,
    {
        self.transactions.with_transaction(work).await
    }

    /// See [`TransactionManager::with_retry`].
    pub async fn with_retry<T, F>(&self, work: F, max_attempts: u32) -> DbResult<T>
    where
        F: for<'t> FnMut(&'t mut TenantTransaction) -> BoxFuture<'t, DbResult<T>> + Send,
        T: Send,
    {
        self.transactions.with_retry(work, max_attempts).await
    }

    pub async fn with_default_retry<T, F>(&self, work: F) -> DbResult<T>
    where
        F: for<'t> FnMut(&'t mut TenantTransaction) -> BoxFuture<'t, DbResult<T>> + Send,
        T: Send,
    {
        self.transactions.with_default_retry(work).await
    }

    /// True only if `database` answers the liveness probe. Never fails.
    pub async fn health_check(&self, database: &str) -> bool {
        self.manager.health_check(database).await
    }

    pub async fn probe(&self, database: &str) -> HealthReport {
        self.manager.probe(database).await
    }

    pub async fn stats(&self) -> Vec<PoolStats> {
        self.manager.stats().await
    }

    /// Close every pool. Later operations fail with `NotInitialized`.
    pub async fn close(&self) {
        self.manager.close_pool().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::tenant::with_tenant;

    #[test]
    fn test_default_options() {
        let options = TenantDbOptions::default();
        assert_eq!(options.query_timeout, Duration::from_secs(30));
        assert_eq!(options.retry, RetryConfig::default());
        assert_eq!(options.registry_table, "tenant_databases");
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let result = TenantDb::connect("redis://localhost").await;
        assert!(matches!(result, Err(DbError::Config { .. })));
    }

    #[tokio::test]
    async fn test_bad_registry_table_closes_pool() {
        let dir = tempfile::tempdir().unwrap();
        let options = TenantDbOptions {
            registry_table: "no good".to_string(),
            ..TenantDbOptions::default()
        };
        let result = TenantDb::init_with(&DatabaseConfig::sqlite(dir.path()), options).await;
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_provision_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let db = TenantDb::init_with(&DatabaseConfig::sqlite(dir.path()), TenantDbOptions::default())
            .await
            .unwrap();

        let desc = db.provision("acme", "tenant_acme").await.unwrap();
        assert_eq!(desc.database_name, "tenant_acme");
        assert!(dir.path().join("tenant_acme.db").exists());
        assert!(db.health_check("tenant_acme").await);

        let result = with_tenant("acme", db.query("SELECT 41 + 1 AS answer", &[]))
            .await
            .unwrap();
        assert_eq!(result.scalar("answer"), Some(&serde_json::json!(42)));

        db.close().await;
        assert!(!db.health_check("tenant_acme").await);
    }
}
