//! Backend dispatch macro.
//!
//! Pools and pooled connections are enums with one variant per backend. When
//! the code for each arm is the same text, [`db_dispatch!`] writes the match
//! once; each arm is still type-checked against its own backend type.

/// Run the same expression against whichever backend variant `$value` holds.
///
/// `$enum` must be in scope and have `MySql`, `Postgres` and `SQLite`
/// single-field variants.
///
/// # Example
///
/// ```ignore
/// let idle = db_dispatch!(pool, DbPool, |p| p.num_idle());
/// ```
macro_rules! db_dispatch {
    ($value:expr, $enum:ident, |$inner:ident| $body:expr) => {
        match $value {
            $enum::MySql($inner) => $body,
            $enum::Postgres($inner) => $body,
            $enum::SQLite($inner) => $body,
        }
    };
}

pub(crate) use db_dispatch;
