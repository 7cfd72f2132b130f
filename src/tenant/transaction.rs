//! Tenant-scoped transactions with deadlock retry.
//!
//! # State machine
//!
//! Each attempt runs `BEGIN → work → COMMIT`, or `BEGIN → work fails →
//! ROLLBACK → propagate`. Only the retry loop in
//! [`TransactionManager::with_retry`] re-enters `BEGIN` after a rollback, and
//! only for deadlock-classified failures.
//!
//! # Design Decisions
//!
//! - **Connection owned by the attempt**: the unit of work borrows a
//!   [`TenantTransaction`] and cannot keep the connection past the attempt
//! - **Release consumes the handle**: a connection cannot be released twice
//! - **Dropped mid-attempt**: a connection still inside a transaction is closed
//!   rather than returned to the pool

use crate::config::RetryConfig;
use crate::db::ConnectionHandle;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam, QueryResult, TransactionState};
use crate::tenant::context::{TenantContext, require_tenant};
use crate::tenant::rewrite::QueryRewriter;
use crate::tenant::scoped::ScopedExecutor;
use futures_util::future::BoxFuture;
use tracing::{debug, info, warn};

/// One open transaction on a tenant's database.
#[derive(Debug)]
pub struct TenantTransaction {
    conn: ConnectionHandle,
    tenant_id: String,
    transaction_id: String,
    rewriter: QueryRewriter,
    state: TransactionState,
}

impl TenantTransaction {
    fn new(conn: ConnectionHandle, context: &TenantContext, rewriter: QueryRewriter) -> Self {
        Self {
            conn,
            tenant_id: context.tenant_id.clone(),
            transaction_id: format!("tx_{}", uuid::Uuid::new_v4().simple()),
            rewriter,
            state: TransactionState::Active,
        }
    }

    /// Run one statement inside the transaction, with tenant scoping applied.
    pub async fn query(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        if !self.state.is_active() {
            return Err(DbError::invalid_input(format!(
                "Transaction {} is no longer active",
                self.transaction_id
            )));
        }
        let scoped = self
            .rewriter
            .apply(self.conn.db_type(), sql, params, &self.tenant_id)?;
        self.conn.query(&scoped.sql, &scoped.params).await
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn database(&self) -> &str {
        self.conn.database()
    }

    pub fn db_type(&self) -> DatabaseType {
        self.conn.db_type()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.conn.commit().await?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Roll back, logging instead of failing; the connection is closed on
    /// release if the rollback did not go through.
    async fn rollback(&mut self) {
        if let Err(e) = self.conn.rollback().await {
            warn!(
                tx = %self.transaction_id,
                database = %self.conn.database(),
                error = %e,
                "Rollback failed, connection will be discarded"
            );
        }
        self.state = TransactionState::RolledBack;
    }

    async fn finish(self) {
        self.conn.release().await;
    }
}

/// Runs units of work inside transactions on the current tenant's database.
#[derive(Debug, Clone)]
pub struct TransactionManager {
    executor: ScopedExecutor,
    retry: RetryConfig,
}

impl TransactionManager {
    pub fn new(executor: ScopedExecutor, retry: RetryConfig) -> Self {
        Self { executor, retry }
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry
    }

    /// Run `work` inside one transaction for the current tenant.
    ///
    /// Commits when `work` succeeds and rolls back when it fails; the error
    /// from `work` (or from COMMIT) is returned unchanged after the rollback.
    ///
    /// ```ignore
    /// let id = tx_manager
    ///     .with_transaction(|tx| {
    ///         Box::pin(async move {
    ///             let res = tx.query("INSERT INTO notes (body) VALUES (?)", &["hi".into()]).await?;
    ///             Ok(res.insert_id)
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_transaction<T, F>(&self, work: F) -> DbResult<T>
    where
        F: for<'t> FnOnce(&'t mut TenantTransaction) -> BoxFuture<'t, DbResult<T>> + Send,
        T: Send,
    {
        let context = require_tenant("with_transaction")?;
        let conn = self.executor.connect(&context).await?;
        let mut tx = TenantTransaction::new(conn, &context, self.executor.rewriter().clone());

        if let Err(e) = tx.conn.begin().await {
            tx.finish().await;
            return Err(e);
        }
        info!(
            tx = %tx.transaction_id,
            tenant = %tx.tenant_id,
            database = %tx.database(),
            "Transaction started"
        );

        let outcome = match work(&mut tx).await {
            Ok(value) => match tx.commit().await {
                Ok(()) => {
                    debug!(tx = %tx.transaction_id, "Transaction committed");
                    Ok(value)
                }
                Err(e) => {
                    warn!(tx = %tx.transaction_id, error = %e, "Commit failed, rolling back");
                    tx.rollback().await;
                    Err(e)
                }
            },
            Err(e) => {
                debug!(tx = %tx.transaction_id, error = %e, "Transaction rolled back");
                tx.rollback().await;
                Err(e)
            }
        };

        tx.finish().await;
        outcome
    }

    /// Run `work` in a transaction, retrying deadlocks up to `max_attempts` times.
    ///
    /// The delay before retry `n` is `base_delay * n`. Any failure that is not
    /// retried, including the last deadlock, comes back as `Transaction`
    /// carrying the attempt count and the underlying error.
    pub async fn with_retry<T, F>(&self, work: F, max_attempts: u32) -> DbResult<T>
    where
        F: for<'t> FnMut(&'t mut TenantTransaction) -> BoxFuture<'t, DbResult<T>> + Send,
        T: Send,
    {
        let policy = RetryConfig::new(max_attempts, self.retry.base_delay);
        self.retry_with(policy, work).await
    }

    /// [`with_retry`](Self::with_retry) with the configured attempt limit.
    pub async fn with_default_retry<T, F>(&self, work: F) -> DbResult<T>
    where
        F: for<'t> FnMut(&'t mut TenantTransaction) -> BoxFuture<'t, DbResult<T>> + Send,
        T: Send,
    {
        self.retry_with(self.retry, work).await
    }

    async fn retry_with<T, F>(&self, policy: RetryConfig, mut work: F) -> DbResult<T>
    where
        F: for<'t> FnMut(&'t mut TenantTransaction) -> BoxFuture<'t, DbResult<T>> + Send,
        T: Send,
    {
        if policy.max_attempts == 0 {
            return Err(DbError::invalid_input("max_attempts must be at least 1"));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.with_transaction(&mut work).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempts = attempt, "Transaction succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_deadlock() && attempt < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        attempt = attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Deadlock detected, retrying transaction"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_deadlock() {
                        warn!(attempts = attempt, "Deadlock retries exhausted");
                    }
                    return Err(DbError::transaction(attempt, e));
                }
            }
        }
    }
}
