//! Statement execution on a single pooled connection.
//!
//! Every statement runs through [`Executor::fetch_many`], so one code path
//! yields both rows and affected-row counts whatever the statement kind. Rows
//! are materialized into JSON maps before the result is returned.
//!
//! # Architecture
//!
//! Each backend gets a submodule with the same shape:
//! - `mysql`: binds MySQL params and reports `last_insert_id`
//! - `postgres`: binds PostgreSQL params; keys come back through `RETURNING`
//! - `sqlite`: binds SQLite params and reports `last_insert_rowid`

use crate::db::connection::PooledConnection;
use crate::db::params;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryResult, Row};
use futures_util::TryStreamExt;
use sqlx::{Either, Executor};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// Raw outcome of one statement before normalization.
#[derive(Default)]
struct Outcome {
    rows: Vec<Row>,
    rows_affected: u64,
    insert_id: Option<u64>,
}

/// Execute `sql` on `conn`, binding `params` in order.
///
/// Without params the statement is sent as plain text, which also allows
/// statements that cannot be prepared (e.g. some DDL on MySQL).
pub(crate) async fn run(
    conn: &mut PooledConnection,
    sql: &str,
    params: &[QueryParam],
    query_timeout: Duration,
) -> DbResult<QueryResult> {
    let start = Instant::now();
    let wants_insert_id = is_insert(sql);

    debug!(
        sql = %sql,
        params = params.len(),
        timeout_ms = query_timeout.as_millis() as u64,
        "Executing statement"
    );

    let outcome = match conn {
        PooledConnection::MySql(c) => {
            timeout(query_timeout, mysql::run(c, sql, params, wants_insert_id)).await
        }
        PooledConnection::Postgres(c) => timeout(query_timeout, postgres::run(c, sql, params)).await,
        PooledConnection::SQLite(c) => {
            timeout(query_timeout, sqlite::run(c, sql, params, wants_insert_id)).await
        }
    };

    let outcome = match outcome {
        Ok(result) => result.map_err(DbError::from_execution)?,
        Err(_) => {
            return Err(DbError::timeout(
                "query execution",
                query_timeout.as_millis() as u64,
            ));
        }
    };

    let execution_time_ms = start.elapsed().as_millis() as u64;
    Ok(QueryResult::new(
        outcome.rows,
        outcome.rows_affected,
        outcome.insert_id,
        execution_time_ms,
    ))
}

/// Whether the statement can produce a store-assigned key.
fn is_insert(sql: &str) -> bool {
    let keyword: String = sql
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    keyword.eq_ignore_ascii_case("insert") || keyword.eq_ignore_ascii_case("replace")
}

mod mysql {
    use super::*;
    use sqlx::MySqlConnection;

    pub async fn run(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        wants_insert_id: bool,
    ) -> Result<Outcome, sqlx::Error> {
        let mut stream = if params.is_empty() {
            Executor::fetch_many(&mut *conn, sql)
        } else {
            Executor::fetch_many(&mut *conn, params::bind_mysql(sql, params))
        };

        let mut outcome = Outcome::default();
        while let Some(step) = stream.try_next().await? {
            match step {
                Either::Left(done) => {
                    outcome.rows_affected += done.rows_affected();
                    if wants_insert_id && done.rows_affected() > 0 && done.last_insert_id() > 0 {
                        outcome.insert_id = Some(done.last_insert_id());
                    }
                }
                Either::Right(row) => outcome.rows.push(row.to_json_map()),
            }
        }
        Ok(outcome)
    }
}

mod postgres {
    use super::*;
    use sqlx::PgConnection;

    pub async fn run(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Outcome, sqlx::Error> {
        let mut stream = if params.is_empty() {
            Executor::fetch_many(&mut *conn, sql)
        } else {
            Executor::fetch_many(&mut *conn, params::bind_postgres(sql, params))
        };

        let mut outcome = Outcome::default();
        while let Some(step) = stream.try_next().await? {
            match step {
                Either::Left(done) => outcome.rows_affected += done.rows_affected(),
                Either::Right(row) => outcome.rows.push(row.to_json_map()),
            }
        }
        Ok(outcome)
    }
}

mod sqlite {
    use super::*;
    use sqlx::SqliteConnection;

    pub async fn run(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
        wants_insert_id: bool,
    ) -> Result<Outcome, sqlx::Error> {
        let mut stream = if params.is_empty() {
            Executor::fetch_many(&mut *conn, sql)
        } else {
            Executor::fetch_many(&mut *conn, params::bind_sqlite(sql, params))
        };

        let mut outcome = Outcome::default();
        while let Some(step) = stream.try_next().await? {
            match step {
                Either::Left(done) => {
                    outcome.rows_affected += done.rows_affected();
                    if wants_insert_id && done.rows_affected() > 0 {
                        outcome.insert_id = u64::try_from(done.last_insert_rowid()).ok();
                    }
                }
                Either::Right(row) => outcome.rows.push(row.to_json_map()),
            }
        }
        Ok(outcome)
    }
}
