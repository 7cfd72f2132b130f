//! Exclusive handles on pooled connections.

use crate::db::database_pool::PoolLease;
use crate::db::executor;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam, QueryResult};
use serde_json::Value as JsonValue;
use sqlx::MySql;
use sqlx::pool::PoolConnection;
use sqlx::{Postgres, Sqlite};
use std::time::Duration;
use tracing::{debug, warn};

/// A connection checked out of one backend's pool.
#[derive(Debug)]
pub enum PooledConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl PooledConnection {
    /// Take the connection out of the pool for good; it is closed when dropped.
    fn discard(self) {
        match self {
            Self::MySql(conn) => drop(conn.detach()),
            Self::Postgres(conn) => drop(conn.detach()),
            Self::SQLite(conn) => drop(conn.detach()),
        }
    }
}

/// A live connection to one physical database, owned by one unit of work.
///
/// Dropping the handle returns the connection to its pool. A handle dropped
/// while a transaction is open, or after a statement was cut off by a
/// timeout, closes the connection instead so no dirty session is reused.
/// [`release`](Self::release) rolls back an open transaction first.
#[derive(Debug)]
pub struct ConnectionHandle {
    conn: Option<PooledConnection>,
    lease: PoolLease,
    query_timeout: Duration,
    in_transaction: bool,
    /// Session state unknown (statement interrupted or rollback failed)
    broken: bool,
}

impl ConnectionHandle {
    pub(crate) fn new(conn: PooledConnection, lease: PoolLease, query_timeout: Duration) -> Self {
        Self {
            conn: Some(conn),
            lease,
            query_timeout,
            in_transaction: false,
            broken: false,
        }
    }

    /// Physical database this handle is bound to.
    pub fn database(&self) -> &str {
        self.lease.database()
    }

    pub fn db_type(&self) -> DatabaseType {
        self.lease.pool().db_type()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Run one statement and return its normalized result.
    ///
    /// Driver failures come back as `Query` errors carrying the driver
    /// message and an [`ErrorKind`](crate::error::ErrorKind).
    pub async fn query(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        let query_timeout = self.query_timeout;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| DbError::not_initialized("query on a released connection"))?;

        let result = executor::run(conn, sql, params, query_timeout).await;
        if matches!(result, Err(DbError::Timeout { .. })) {
            self.broken = true;
        }
        result
    }

    /// Issue BEGIN (START TRANSACTION on MySQL).
    pub async fn begin(&mut self) -> DbResult<()> {
        if self.in_transaction {
            return Err(DbError::invalid_input(
                "A transaction is already open on this connection",
            ));
        }
        let statement = self.db_type().begin_statement();
        self.query(statement, &[]).await?;
        self.in_transaction = true;
        debug!(database = %self.database(), "BEGIN");
        Ok(())
    }

    /// Issue COMMIT. On failure the transaction is still considered open.
    pub async fn commit(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DbError::invalid_input("No open transaction to commit"));
        }
        self.query("COMMIT", &[]).await?;
        self.in_transaction = false;
        debug!(database = %self.database(), "COMMIT");
        Ok(())
    }

    /// Issue ROLLBACK. If it fails the connection is closed on release.
    pub async fn rollback(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DbError::invalid_input("No open transaction to roll back"));
        }
        match self.query("ROLLBACK", &[]).await {
            Ok(_) => {
                self.in_transaction = false;
                debug!(database = %self.database(), "ROLLBACK");
                Ok(())
            }
            Err(e) => {
                self.broken = true;
                Err(e)
            }
        }
    }

    /// Run `SELECT 1` and check that the sentinel value comes back.
    pub async fn probe(&mut self) -> DbResult<()> {
        let result = self.query("SELECT 1 AS ok", &[]).await?;
        let sentinel = result.scalar("ok").and_then(JsonValue::as_i64);
        if result.rows.len() == 1 && sentinel == Some(1) {
            Ok(())
        } else {
            Err(DbError::query(
                format!("Unexpected probe result: {:?}", result.rows),
                crate::error::ErrorKind::Other,
            ))
        }
    }

    /// Return the connection to its pool.
    ///
    /// An open transaction is rolled back first.
    pub async fn release(mut self) {
        if self.in_transaction && !self.broken {
            if let Err(e) = self.rollback().await {
                warn!(database = %self.database(), error = %e, "Rollback on release failed");
            }
        }
        // Drop does the rest
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.in_transaction || self.broken {
            warn!(
                database = %self.lease.database(),
                in_transaction = self.in_transaction,
                "Discarding connection with unknown session state"
            );
            conn.discard();
        }
        // Otherwise the PoolConnection returns itself to the pool when dropped
    }
}
