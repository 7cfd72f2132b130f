//! Error types for the tenant database layer.
//!
//! All failures surface as [`DbError`]. Driver errors are classified into a
//! small closed [`ErrorKind`] at the adapter boundary so that retry logic can
//! dispatch on the kind instead of on driver message text.

use sqlx::error::{DatabaseError, ErrorKind as SqlxErrorKind};
use thiserror::Error;

/// Classification of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Deadlock or serialization conflict; the unit of work can be retried.
    Deadlock,
    /// Lock wait exceeded the server's lock timeout.
    LockTimeout,
    UniqueViolation,
    /// Foreign key, NOT NULL or CHECK violation.
    ConstraintViolation,
    Syntax,
    /// Unknown table, column or database.
    UndefinedObject,
    /// Socket, TLS or protocol failure while talking to the server.
    Connection,
    Other,
}

impl ErrorKind {
    /// Whether the condition is expected to clear on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Deadlock | Self::LockTimeout | Self::Connection)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Deadlock => "deadlock",
            Self::LockTimeout => "lock timeout",
            Self::UniqueViolation => "unique violation",
            Self::ConstraintViolation => "constraint violation",
            Self::Syntax => "syntax error",
            Self::UndefinedObject => "undefined object",
            Self::Connection => "connection failure",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Connection pool is not initialized: {operation}")]
    NotInitialized { operation: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Unknown tenant: {tenant_id}")]
    TenantNotFound { tenant_id: String },

    #[error("No tenant context is active for {operation}")]
    NoTenantContext { operation: String },

    #[error("Query failed ({kind}): {message}")]
    Query {
        message: String,
        kind: ErrorKind,
        /// SQLSTATE for MySQL/PostgreSQL, result code for SQLite
        code: Option<String>,
    },

    #[error("Transaction failed after {attempts} attempt(s): {source}")]
    Transaction {
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl DbError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn not_initialized(operation: impl Into<String>) -> Self {
        Self::NotInitialized {
            operation: operation.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn tenant_not_found(tenant_id: impl Into<String>) -> Self {
        Self::TenantNotFound {
            tenant_id: tenant_id.into(),
        }
    }

    pub fn no_tenant_context(operation: impl Into<String>) -> Self {
        Self::NoTenantContext {
            operation: operation.into(),
        }
    }

    /// Create a query error of a known kind.
    ///
    /// Useful for units of work that detect a conflict themselves and want
    /// the transaction manager to treat it like the driver-reported one.
    pub fn query(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self::Query {
            message: message.into(),
            kind,
            code: None,
        }
    }

    pub fn transaction(attempts: u32, source: DbError) -> Self {
        Self::Transaction {
            attempts,
            source: Box::new(source),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Wrap a driver error raised while executing a statement.
    ///
    /// Unlike the `From` conversion, every variant becomes `Query` so the
    /// caller always sees the original message next to its classification.
    pub fn from_execution(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let (kind, code) = classify_database_error(db_err.as_ref());
                Self::Query {
                    message: db_err.message().to_string(),
                    kind,
                    code,
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Query {
                message: err.to_string(),
                kind: ErrorKind::Connection,
                code: None,
            },
            other => Self::Query {
                message: other.to_string(),
                kind: ErrorKind::Other,
                code: None,
            },
        }
    }

    /// Classification of the failure, when it came from the driver.
    ///
    /// A `Transaction` error reports the kind of the error that ended it.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Query { kind, .. } => Some(*kind),
            Self::Connection { .. } => Some(ErrorKind::Connection),
            Self::Transaction { source, .. } => source.kind(),
            _ => None,
        }
    }

    /// Check if this error is a deadlock that warrants re-running the unit of work.
    pub fn is_deadlock(&self) -> bool {
        self.kind() == Some(ErrorKind::Deadlock)
    }

    /// Check if this error is likely to clear if the caller tries again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. }) || self.kind().is_some_and(|k| k.is_transient())
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }
}

/// Convert sqlx errors raised outside statement execution (pool setup, acquire).
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::config(msg.to_string()),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out waiting for a pooled connection",
                "Increase max_connections or acquire_timeout, or reduce concurrent load",
            ),
            sqlx::Error::PoolClosed => DbError::connection(
                "Connection pool is closed",
                "Re-initialize the pool before issuing queries",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            other => DbError::from_execution(other),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Map a driver-reported database error to an [`ErrorKind`] and its code.
pub(crate) fn classify_database_error(
    err: &(dyn DatabaseError + 'static),
) -> (ErrorKind, Option<String>) {
    if let Some(mysql) = err.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
        let kind = classify_mysql(mysql.number());
        let code = mysql
            .code()
            .map(String::from)
            .or_else(|| Some(mysql.number().to_string()));
        return (kind, code);
    }

    let code = err.code().map(|c| c.into_owned());

    if err.try_downcast_ref::<sqlx::postgres::PgDatabaseError>().is_some() {
        let kind = code
            .as_deref()
            .map(classify_sqlstate)
            .unwrap_or_else(|| from_sqlx_kind(err.kind()));
        return (kind, code);
    }

    if err.try_downcast_ref::<sqlx::sqlite::SqliteError>().is_some() {
        let kind = code
            .as_deref()
            .and_then(|c| c.parse::<i32>().ok())
            .map(classify_sqlite)
            .unwrap_or_else(|| from_sqlx_kind(err.kind()));
        return (kind, code);
    }

    (from_sqlx_kind(err.kind()), code)
}

/// MySQL server error numbers.
fn classify_mysql(number: u16) -> ErrorKind {
    match number {
        1213 => ErrorKind::Deadlock,
        1205 => ErrorKind::LockTimeout,
        1062 | 1586 => ErrorKind::UniqueViolation,
        1048 | 1216 | 1217 | 1451 | 1452 | 3819 => ErrorKind::ConstraintViolation,
        1064 | 1149 => ErrorKind::Syntax,
        1049 | 1054 | 1146 => ErrorKind::UndefinedObject,
        2002 | 2003 | 2006 | 2013 => ErrorKind::Connection,
        _ => ErrorKind::Other,
    }
}

/// PostgreSQL SQLSTATE codes.
fn classify_sqlstate(code: &str) -> ErrorKind {
    match code {
        "40P01" | "40001" => ErrorKind::Deadlock,
        "55P03" => ErrorKind::LockTimeout,
        "23505" => ErrorKind::UniqueViolation,
        "42601" => ErrorKind::Syntax,
        "42P01" | "42703" | "3D000" | "42883" => ErrorKind::UndefinedObject,
        c if c.starts_with("23") => ErrorKind::ConstraintViolation,
        c if c.starts_with("08") => ErrorKind::Connection,
        _ => ErrorKind::Other,
    }
}

/// SQLite (extended) result codes. The primary code is the low byte.
fn classify_sqlite(code: i32) -> ErrorKind {
    match code {
        2067 | 1555 => ErrorKind::UniqueViolation,
        c => match c & 0xff {
            5 => ErrorKind::Deadlock,
            6 => ErrorKind::LockTimeout,
            19 => ErrorKind::ConstraintViolation,
            _ => ErrorKind::Other,
        },
    }
}

fn from_sqlx_kind(kind: SqlxErrorKind) -> ErrorKind {
    match kind {
        SqlxErrorKind::UniqueViolation => ErrorKind::UniqueViolation,
        SqlxErrorKind::ForeignKeyViolation
        | SqlxErrorKind::NotNullViolation
        | SqlxErrorKind::CheckViolation => ErrorKind::ConstraintViolation,
        _ => ErrorKind::Other,
    }
}
