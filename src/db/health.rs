//! Liveness probes for physical databases.

use crate::db::pool::ConnectionManager;
use crate::error::DbResult;
use crate::models::HealthReport;
use std::time::Instant;
use tracing::warn;

impl ConnectionManager {
    /// Check that `database` is reachable and answers `SELECT 1`.
    ///
    /// Returns false on any error or unexpected result; never fails.
    pub async fn health_check(&self, database: &str) -> bool {
        self.probe(database).await.healthy
    }

    /// Probe `database` and report latency and the failure reason, if any.
    pub async fn probe(&self, database: &str) -> HealthReport {
        let start = Instant::now();
        let outcome = self.probe_once(database).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => HealthReport {
                database: database.to_string(),
                healthy: true,
                latency_ms,
                error: None,
            },
            Err(e) => {
                warn!(database = %database, error = %e, "Health probe failed");
                HealthReport {
                    database: database.to_string(),
                    healthy: false,
                    latency_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn probe_once(&self, database: &str) -> DbResult<()> {
        // get_connection already runs the probe query once
        let mut handle = self.get_connection(database).await?;
        let result = handle.probe().await;
        handle.release().await;
        result
    }
}
