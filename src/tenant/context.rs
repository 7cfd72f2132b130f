//! Ambient tenant context.
//!
//! The active tenant is carried in a tokio task-local, so concurrently running
//! operations for different tenants never observe each other's tenant id.
//! Scopes nest: leaving an inner [`with_tenant`] restores the outer value, on
//! success, on error and when the future is dropped early.
//!
//! Spawned tasks start without a context. Enter one explicitly inside the
//! spawned future when it needs tenant scoping.

use crate::error::{DbError, DbResult};
use std::future::Future;

tokio::task_local! {
    static CURRENT: TenantContext;
}

/// The tenant a logical operation runs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: String,
    /// Physical database, when the caller already resolved it
    pub database: Option<String>,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            database: None,
        }
    }

    /// Pin the physical database so the registry lookup is skipped.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

/// Run `fut` with `tenant_id` as the ambient tenant.
pub async fn with_tenant<F>(tenant_id: impl Into<String>, fut: F) -> F::Output
where
    F: Future,
{
    with_context(TenantContext::new(tenant_id), fut).await
}

/// Run `fut` with `context` as the ambient tenant context.
pub async fn with_context<F>(context: TenantContext, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(context, fut).await
}

/// The ambient tenant id, if a scope is active on this task.
pub fn current_tenant() -> Option<String> {
    CURRENT.try_with(|ctx| ctx.tenant_id.clone()).ok()
}

pub fn current_context() -> Option<TenantContext> {
    CURRENT.try_with(TenantContext::clone).ok()
}

/// The ambient context, or `NoTenantContext` naming `operation`.
pub fn require_tenant(operation: &str) -> DbResult<TenantContext> {
    current_context().ok_or_else(|| DbError::no_tenant_context(operation))
}
