//! Connection pool management.
//!
//! [`ConnectionManager`] is the explicitly owned entry point to the database
//! server: it is initialized once with a [`DatabaseConfig`], hands out
//! [`ConnectionHandle`]s bound to one physical database, and closes every
//! pool on shutdown. Database-specific pools (MySqlPool, PgPool, SqlitePool)
//! are used instead of `AnyPool` to keep full type support.

use crate::config::{DEFAULT_QUERY_TIMEOUT_SECS, DatabaseConfig};
use crate::db::connection::{ConnectionHandle, PooledConnection};
use crate::db::database_pool::DatabasePoolManager;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, PoolStats, validate_identifier};
use sqlx::{MySqlPool, PgPool, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        db_dispatch!(self, DbPool, |pool| pool.close().await)
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Open connections, idle or in use.
    pub fn size(&self) -> u32 {
        db_dispatch!(self, DbPool, |pool| pool.size())
    }

    pub fn num_idle(&self) -> usize {
        db_dispatch!(self, DbPool, |pool| pool.num_idle())
    }

    /// Acquire a connection, waiting at most the pool's acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConnection, sqlx::Error> {
        Ok(match self {
            DbPool::MySql(pool) => PooledConnection::MySql(pool.acquire().await?),
            DbPool::Postgres(pool) => PooledConnection::Postgres(pool.acquire().await?),
            DbPool::SQLite(pool) => PooledConnection::SQLite(pool.acquire().await?),
        })
    }
}

/// Owner of all pools for one database server.
///
/// Cheap to clone; clones share the same pools.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    pools: Arc<RwLock<Option<Arc<DatabasePoolManager>>>>,
    query_timeout: Duration,
}

impl ConnectionManager {
    /// Create an uninitialized connection manager.
    pub fn new() -> Self {
        Self::with_query_timeout(Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS))
    }

    /// Create an uninitialized manager whose handles time out statements after `query_timeout`.
    pub fn with_query_timeout(query_timeout: Duration) -> Self {
        Self {
            pools: Arc::new(RwLock::new(None)),
            query_timeout,
        }
    }

    /// Initialize the pools for `config`.
    ///
    /// Fails with `Config` on missing credentials, invalid options or a zero
    /// query timeout. Calling it again while initialized is a no-op. For
    /// SQLite the data directory and the master database file are created if
    /// missing.
    pub async fn init_pool(&self, config: &DatabaseConfig) -> DbResult<()> {
        config.validate()?;
        if self.query_timeout.is_zero() {
            return Err(DbError::config("query_timeout must be greater than 0"));
        }

        let mut pools = self.pools.write().await;
        if pools.is_some() {
            debug!("Connection pool already initialized");
            return Ok(());
        }

        let manager = DatabasePoolManager::new(config.clone());
        if config.backend == DatabaseType::SQLite {
            if let Err(e) = manager.ensure_database(&config.database).await {
                manager.close_all().await;
                return Err(e);
            }
        }

        info!(
            backend = %config.backend,
            host = %config.host,
            master = %config.database,
            "Connection pool initialized"
        );
        *pools = Some(manager);
        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        self.pools.read().await.is_some()
    }

    /// Backend of the initialized pool.
    pub async fn db_type(&self) -> Option<DatabaseType> {
        self.pools.read().await.as_ref().map(|m| m.db_type())
    }

    /// Name of the master database holding the tenant registry.
    pub async fn master_database(&self) -> DbResult<String> {
        Ok(self.manager("master_database").await?.config().database.clone())
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Acquire a live connection to `database`.
    ///
    /// The connection is opened directly against that database and checked
    /// with a trivial probe before it is returned.
    pub async fn get_connection(&self, database: &str) -> DbResult<ConnectionHandle> {
        validate_identifier("database name", database)?;
        let manager = self.manager("get_connection").await?;

        let lease = manager.get_or_create_pool(database).await?;
        let conn = lease.pool().acquire().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => {
                warn!(database = %database, "Timed out acquiring connection");
                DbError::connection(
                    format!("Timed out acquiring a connection to '{}'", database),
                    "Increase max_connections or acquire_timeout, or reduce concurrent load",
                )
            }
            other => {
                warn!(database = %database, error = %other, "Failed to acquire connection");
                DbError::connection(
                    format!("Failed to acquire a connection to '{}': {}", database, other),
                    connection_suggestion(manager.db_type(), &other),
                )
            }
        })?;

        let mut handle = ConnectionHandle::new(conn, lease, self.query_timeout);
        if let Err(e) = handle.probe().await {
            warn!(database = %database, error = %e, "Connection failed liveness probe");
            return Err(DbError::connection(
                format!("Connection to '{}' failed liveness probe: {}", database, e),
                "Check that the database server is reachable",
            ));
        }
        Ok(handle)
    }

    /// Create the physical database if it does not exist.
    pub async fn ensure_database(&self, database: &str) -> DbResult<()> {
        validate_identifier("database name", database)?;
        self.manager("ensure_database")
            .await?
            .ensure_database(database)
            .await
    }

    /// Snapshot of every open per-database pool.
    pub async fn stats(&self) -> Vec<PoolStats> {
        match self.pools.read().await.as_ref() {
            Some(manager) => manager.stats().await,
            None => Vec::new(),
        }
    }

    /// Close every pool. Later calls fail with `NotInitialized` until re-initialized.
    pub async fn close_pool(&self) {
        let manager = self.pools.write().await.take();
        if let Some(manager) = manager {
            manager.close_all().await;
            info!("Connection pool closed");
        }
    }

    async fn manager(&self, operation: &str) -> DbResult<Arc<DatabasePoolManager>> {
        self.pools
            .read()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| DbError::not_initialized(operation))
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a helpful suggestion for connection errors.
pub(crate) fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }
    if error_str.contains("authentication")
        || error_str.contains("password")
        || error_str.contains("access denied")
    {
        return "Verify the database user and password".to_string();
    }
    if error_str.contains("does not exist")
        || error_str.contains("unknown database")
        || error_str.contains("unable to open")
    {
        return "Check that the database has been provisioned".to_string();
    }
    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match db_type {
        DatabaseType::SQLite => "Check that the data directory exists and is writable".to_string(),
        _ => format!("Verify the {} host, port and credentials", db_type),
    }
}
