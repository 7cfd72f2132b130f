//! Query execution scoped to the ambient tenant.

use crate::config::RewriteConfig;
use crate::db::{ConnectionHandle, ConnectionManager};
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryResult};
use crate::tenant::context::{TenantContext, require_tenant};
use crate::tenant::registry::TenantRegistry;
use crate::tenant::rewrite::QueryRewriter;
use tracing::debug;

/// Routes statements to the current tenant's database.
///
/// Cheap to clone; clones share the connection manager.
#[derive(Debug, Clone)]
pub struct ScopedExecutor {
    manager: ConnectionManager,
    registry: TenantRegistry,
    rewriter: QueryRewriter,
}

impl ScopedExecutor {
    pub fn new(
        manager: ConnectionManager,
        registry: TenantRegistry,
        rewrite: RewriteConfig,
    ) -> DbResult<Self> {
        Ok(Self {
            manager,
            registry,
            rewriter: QueryRewriter::new(rewrite)?,
        })
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    pub fn rewriter(&self) -> &QueryRewriter {
        &self.rewriter
    }

    /// Run one statement against the current tenant's database.
    ///
    /// Fails with `NoTenantContext` outside [`with_tenant`](crate::with_tenant)
    /// and with `TenantNotFound` when the tenant is not registered. The
    /// connection is released on every path.
    pub async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        let context = require_tenant("query")?;
        let mut conn = self.connect(&context).await?;

        let result = match self
            .rewriter
            .apply(conn.db_type(), sql, params, &context.tenant_id)
        {
            Ok(scoped) => conn.query(&scoped.sql, &scoped.params).await,
            Err(e) => Err(e),
        };
        conn.release().await;
        result
    }

    /// Physical database for `context`: the pinned one, else the registry's.
    pub async fn resolve_database(&self, context: &TenantContext) -> DbResult<String> {
        match &context.database {
            Some(database) => Ok(database.clone()),
            None => self.registry.resolve(&context.tenant_id).await,
        }
    }

    /// Acquire a connection to the database serving `context`.
    pub(crate) async fn connect(&self, context: &TenantContext) -> DbResult<ConnectionHandle> {
        if !self.manager.is_initialized().await {
            return Err(DbError::not_initialized("scoped query"));
        }
        let database = self.resolve_database(context).await?;
        debug!(tenant = %context.tenant_id, database = %database, "Routing to tenant database");
        self.manager.get_connection(&database).await
    }
}
