//! Tenant predicate injection for scoped SELECTs.
//!
//! Shape detection uses sqlparser with the backend's dialect; the predicate
//! itself is spliced into the original text so everything else the caller
//! wrote reaches the driver untouched.
//!
//! A statement is rewritten only when it is a single plain `SELECT` reading
//! exactly one table, with no joins and no `WHERE` clause. A statement that
//! already filters on the tenant column has a `WHERE` and is left alone;
//! naming the column only in the projection does not count. The predicate
//! `WHERE <tenant_column> = <placeholder>` goes right after the top-level
//! `FROM <table> [alias]`. Anything else is left alone, or rejected under
//! [`RewritePolicy::Strict`] when it reads tables without mentioning the
//! tenant column at all.
//!
//! The lexical scan skips quoted literals and identifiers, comments, and on
//! PostgreSQL `E'...'` escape strings and `$tag$...$tag$` bodies.

use crate::config::{RewriteConfig, RewritePolicy};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam, validate_identifier};
use sqlparser::ast::{SetExpr, Statement, TableFactor};
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use tracing::trace;

/// Statement text and parameters after scoping.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
    /// Whether a tenant predicate was injected
    pub rewritten: bool,
}

impl ScopedQuery {
    fn unchanged(sql: &str, params: &[QueryParam]) -> Self {
        Self {
            sql: sql.to_string(),
            params: params.to_vec(),
            rewritten: false,
        }
    }
}

/// What the parser tells us about a statement.
#[derive(Debug, PartialEq, Eq)]
enum Shape {
    /// Not a query, or not parseable
    Other,
    /// A query that reads no table (`SELECT 1`)
    NoTable,
    /// Single table, no joins, no WHERE
    Simple,
    /// Reads tables but does not fit the simple pattern
    Complex,
}

#[derive(Debug, Clone)]
pub struct QueryRewriter {
    config: RewriteConfig,
}

impl QueryRewriter {
    /// Fails with `InvalidInput` if the tenant column is not a plain identifier.
    pub fn new(config: RewriteConfig) -> DbResult<Self> {
        validate_identifier("tenant column", &config.tenant_column)?;
        Ok(Self { config })
    }

    pub fn policy(&self) -> RewritePolicy {
        self.config.policy
    }

    pub fn tenant_column(&self) -> &str {
        &self.config.tenant_column
    }

    /// Scope `sql` to `tenant_id` according to the configured policy.
    pub fn apply(
        &self,
        db_type: DatabaseType,
        sql: &str,
        params: &[QueryParam],
        tenant_id: &str,
    ) -> DbResult<ScopedQuery> {
        if self.config.policy == RewritePolicy::Disabled {
            return Ok(ScopedQuery::unchanged(sql, params));
        }

        let shape = classify(db_type, sql);
        let scanned = Scan::new(sql, db_type);

        if shape == Shape::Simple {
            if let Some(scoped) = self.inject(db_type, sql, params, tenant_id, &scanned) {
                trace!(tenant = %tenant_id, "Injected tenant predicate");
                return Ok(scoped);
            }
        }

        let reads_tables = matches!(shape, Shape::Simple | Shape::Complex);
        if reads_tables
            && self.config.policy == RewritePolicy::Strict
            && !scanned.mentions(&self.config.tenant_column)
        {
            return Err(DbError::invalid_input(format!(
                "Query reads tables without a '{}' predicate and cannot be scoped automatically",
                self.config.tenant_column
            )));
        }

        trace!(tenant = %tenant_id, shape = ?shape, "Query left unscoped");
        Ok(ScopedQuery::unchanged(sql, params))
    }

    fn inject(
        &self,
        db_type: DatabaseType,
        sql: &str,
        params: &[QueryParam],
        tenant_id: &str,
        scanned: &Scan,
    ) -> Option<ScopedQuery> {
        let insert_at = scanned.insert_at?;

        let (placeholder, param_index) = match db_type {
            DatabaseType::PostgreSQL => (db_type.placeholder(params.len() + 1), params.len()),
            // Numbered `?NNN` placeholders cannot be shifted safely
            DatabaseType::MySQL | DatabaseType::SQLite if scanned.numbered_placeholders => {
                return None;
            }
            DatabaseType::MySQL | DatabaseType::SQLite => {
                ("?".to_string(), scanned.placeholders_before(insert_at))
            }
        };
        if param_index > params.len() {
            return None;
        }

        let head = sql[..insert_at].trim_end();
        let tail = sql[insert_at..].trim_start();
        let tail = tail.trim_end().trim_end_matches(';').trim_end();
        let predicate = format!("WHERE {} = {}", self.config.tenant_column, placeholder);
        let sql = if tail.is_empty() {
            format!("{} {}", head, predicate)
        } else {
            format!("{} {} {}", head, predicate, tail)
        };

        let mut params = params.to_vec();
        params.insert(param_index, QueryParam::from(tenant_id));
        Some(ScopedQuery {
            sql,
            params,
            rewritten: true,
        })
    }
}

fn dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySQL => Box::new(MySqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

fn classify(db_type: DatabaseType, sql: &str) -> Shape {
    let dialect = dialect(db_type);
    let Ok(statements) = Parser::parse_sql(dialect.as_ref(), sql) else {
        return Shape::Other;
    };

    if statements.len() != 1 {
        let any_query = statements.iter().any(|s| matches!(s, Statement::Query(_)));
        return if any_query { Shape::Complex } else { Shape::Other };
    }

    let Statement::Query(query) = &statements[0] else {
        return Shape::Other;
    };
    if query.with.is_some() {
        return Shape::Complex;
    }
    let SetExpr::Select(select) = query.body.as_ref() else {
        return Shape::Complex;
    };

    match select.from.as_slice() {
        [] => Shape::NoTable,
        [from] if is_dual(&from.relation) && from.joins.is_empty() => Shape::NoTable,
        [from] if from.joins.is_empty()
            && matches!(from.relation, TableFactor::Table { .. })
            && select.selection.is_none() =>
        {
            Shape::Simple
        }
        _ => Shape::Complex,
    }
}

/// MySQL's `DUAL` placeholder table reads no rows of its own.
fn is_dual(relation: &TableFactor) -> bool {
    matches!(relation, TableFactor::Table { name, .. } if name.to_string().eq_ignore_ascii_case("dual"))
}

/// Lexical facts about a statement, ignoring string literals and comments.
#[derive(Debug, Default)]
struct Scan {
    /// Lowercased identifiers and keywords
    words: Vec<String>,
    /// Byte offsets of bare `?` placeholders
    placeholders: Vec<usize>,
    numbered_placeholders: bool,
    /// Where the tenant predicate goes, if a top-level FROM was found
    insert_at: Option<usize>,
}

/// Keywords that end a FROM clause at the top level.
const CLAUSE_KEYWORDS: &[&str] = &[
    "where", "group", "having", "window", "qualify", "order", "limit", "offset", "fetch", "for",
    "lock", "union", "intersect", "except",
];

impl Scan {
    fn new(sql: &str, db_type: DatabaseType) -> Self {
        let bytes = sql.as_bytes();
        let mut scan = Scan::default();
        let mut depth = 0usize;
        let mut after_from = false;
        // End of the last byte that is neither whitespace nor comment
        let mut significant_end = 0;
        let mut i = 0;
        let pg = db_type == DatabaseType::PostgreSQL;

        while i < bytes.len() {
            let b = bytes[i];
            match b {
                b'\'' | b'"' | b'`' => {
                    i = skip_quoted(bytes, i, db_type == DatabaseType::MySQL && b == b'\'');
                    significant_end = i;
                    continue;
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => {
                    i = skip_until(bytes, i, b"\n");
                    continue;
                }
                b'#' if db_type == DatabaseType::MySQL => {
                    i = skip_until(bytes, i, b"\n");
                    continue;
                }
                b'E' | b'e' if pg && bytes.get(i + 1) == Some(&b'\'') && !follows_word(bytes, i) => {
                    i = skip_quoted(bytes, i + 1, true);
                    significant_end = i;
                    continue;
                }
                b'$' if pg && !follows_word(bytes, i) => {
                    if let Some(tag_end) = dollar_tag_end(bytes, i) {
                        i = skip_until(bytes, tag_end, &bytes[i..tag_end]);
                        significant_end = i;
                        continue;
                    }
                    significant_end = i + 1;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i = skip_until(bytes, i + 2, b"*/");
                    continue;
                }
                b';' => {
                    if depth == 0 && after_from && scan.insert_at.is_none() {
                        scan.insert_at = Some(significant_end);
                    }
                }
                b'?' => {
                    if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
                        scan.numbered_placeholders = true;
                    } else {
                        scan.placeholders.push(i);
                    }
                    significant_end = i + 1;
                }
                _ if b.is_ascii_alphabetic() || b == b'_' => {
                    let start = i;
                    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                    {
                        i += 1;
                    }
                    let word = sql[start..i].to_ascii_lowercase();
                    if depth == 0 {
                        if word == "from" && !after_from {
                            after_from = true;
                        } else if after_from
                            && scan.insert_at.is_none()
                            && CLAUSE_KEYWORDS.contains(&word.as_str())
                        {
                            scan.insert_at = Some(significant_end);
                        }
                    }
                    scan.words.push(word);
                    significant_end = i;
                    continue;
                }
                _ if b.is_ascii_whitespace() => {}
                _ => {
                    match b {
                        b'(' => depth += 1,
                        b')' => depth = depth.saturating_sub(1),
                        _ => {}
                    }
                    significant_end = i + 1;
                }
            }
            i += 1;
        }

        if after_from && scan.insert_at.is_none() {
            scan.insert_at = Some(significant_end);
        }
        scan
    }

    /// Whether `column` appears as an unquoted word anywhere in the statement.
    fn mentions(&self, column: &str) -> bool {
        self.words.iter().any(|w| w.eq_ignore_ascii_case(column))
    }

    fn placeholders_before(&self, offset: usize) -> usize {
        self.placeholders.iter().filter(|&&p| p < offset).count()
    }
}

/// Skip a quoted literal or identifier starting at `start`; returns the offset after it.
fn skip_quoted(bytes: &[u8], start: usize, backslash_escapes: bool) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' {
            i += 2;
            continue;
        }
        if b == quote {
            // Doubled quote is an escaped quote
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Whether the byte before `i` continues an identifier.
fn follows_word(bytes: &[u8], i: usize) -> bool {
    i > 0 && (bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_' || bytes[i - 1] == b'$')
}

/// If a dollar-quote opening tag (`$$` or `$name$`) starts at `start`, the offset after it.
fn dollar_tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    if bytes.get(i).is_some_and(u8::is_ascii_digit) {
        return None;
    }
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    (bytes.get(i) == Some(&b'$')).then_some(i + 1)
}

fn skip_until(bytes: &[u8], start: usize, end: &[u8]) -> usize {
    bytes[start.min(bytes.len())..]
        .windows(end.len())
        .position(|w| w == end)
        .map(|p| start + p + end.len())
        .unwrap_or(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter(policy: RewritePolicy) -> QueryRewriter {
        QueryRewriter::new(RewriteConfig {
            policy,
            tenant_column: "tenant_id".to_string(),
        })
        .unwrap()
    }

    fn apply(policy: RewritePolicy, db: DatabaseType, sql: &str, params: &[QueryParam]) -> ScopedQuery {
        rewriter(policy).apply(db, sql, params, "t1").unwrap()
    }

    #[test]
    fn test_bare_select_is_scoped() {
        let q = apply(RewritePolicy::BestEffort, DatabaseType::MySQL, "SELECT * FROM users", &[]);
        assert!(q.rewritten);
        assert_eq!(q.sql, "SELECT * FROM users WHERE tenant_id = ?");
        assert_eq!(q.params, vec![QueryParam::from("t1")]);
    }

    #[test]
    fn test_predicate_goes_before_trailing_clauses() {
        let q = apply(
            RewritePolicy::BestEffort,
            DatabaseType::SQLite,
            "SELECT name FROM users u ORDER BY name LIMIT ?;",
            &[QueryParam::Int(10)],
        );
        assert_eq!(
            q.sql,
            "SELECT name FROM users u WHERE tenant_id = ? ORDER BY name LIMIT ?"
        );
        assert_eq!(q.params, vec![QueryParam::from("t1"), QueryParam::Int(10)]);
    }

    #[test]
    fn test_placeholders_in_projection_keep_their_position() {
        let q = apply(
            RewritePolicy::BestEffort,
            DatabaseType::MySQL,
            "SELECT ? AS label, id FROM items",
            &[QueryParam::from("x")],
        );
        assert_eq!(q.sql, "SELECT ? AS label, id FROM items WHERE tenant_id = ?");
        assert_eq!(q.params, vec![QueryParam::from("x"), QueryParam::from("t1")]);
    }

    #[test]
    fn test_postgres_appends_numbered_placeholder() {
        let q = apply(
            RewritePolicy::BestEffort,
            DatabaseType::PostgreSQL,
            "SELECT id FROM items LIMIT $1",
            &[QueryParam::Int(5)],
        );
        assert_eq!(q.sql, "SELECT id FROM items WHERE tenant_id = $2 LIMIT $1");
        assert_eq!(q.params, vec![QueryParam::Int(5), QueryParam::from("t1")]);
    }

    #[test]
    fn test_subquery_in_projection_is_not_the_top_level_from() {
        let q = apply(
            RewritePolicy::BestEffort,
            DatabaseType::SQLite,
            "SELECT (SELECT count(*) FROM other) AS n FROM items",
            &[],
        );
        assert!(q.rewritten);
        assert_eq!(
            q.sql,
            "SELECT (SELECT count(*) FROM other) AS n FROM items WHERE tenant_id = ?"
        );
    }

    #[test]
    fn test_filtered_and_joined_selects_are_left_alone() {
        for sql in [
            "SELECT * FROM users WHERE tenant_id = ?",
            "SELECT * FROM users WHERE id = 1",
            "SELECT * FROM a JOIN b ON a.id = b.a_id",
            "SELECT * FROM a, b",
            "SELECT * FROM (SELECT * FROM a) s",
            "SELECT * FROM a UNION SELECT * FROM b",
        ] {
            let q = apply(RewritePolicy::BestEffort, DatabaseType::MySQL, sql, &[]);
            assert!(!q.rewritten, "{sql}");
            assert_eq!(q.sql, sql);
        }
    }

    #[test]
    fn test_writes_and_tableless_selects_are_never_rewritten() {
        for sql in [
            "INSERT INTO users (name) VALUES ('a')",
            "UPDATE users SET name = 'b'",
            "DELETE FROM users",
            "SELECT 1",
            "not even sql",
        ] {
            let q = apply(RewritePolicy::Strict, DatabaseType::SQLite, sql, &[]);
            assert!(!q.rewritten, "{sql}");
        }
    }

    #[test]
    fn test_strict_rejects_unscoped_complex_select() {
        let result = rewriter(RewritePolicy::Strict).apply(
            DatabaseType::MySQL,
            "SELECT * FROM a JOIN b ON a.id = b.a_id",
            &[],
            "t1",
        );
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));

        let ok = rewriter(RewritePolicy::Strict).apply(
            DatabaseType::MySQL,
            "SELECT * FROM a JOIN b ON a.id = b.a_id WHERE a.tenant_id = ?",
            &[QueryParam::from("t1")],
            "t1",
        );
        assert!(!ok.unwrap().rewritten);
    }

    #[test]
    fn test_disabled_never_rewrites() {
        let q = apply(RewritePolicy::Disabled, DatabaseType::MySQL, "SELECT * FROM users", &[]);
        assert!(!q.rewritten);
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_string_literals_and_comments_are_ignored() {
        let q = apply(
            RewritePolicy::BestEffort,
            DatabaseType::SQLite,
            "SELECT 'from ? where' AS s FROM notes -- order by\n",
            &[],
        );
        assert_eq!(
            q.sql,
            "SELECT 'from ? where' AS s FROM notes WHERE tenant_id = ? -- order by"
        );
        assert_eq!(q.params, vec![QueryParam::from("t1")]);
    }

    #[test]
    fn test_projected_tenant_column_is_still_scoped() {
        let q = apply(
            RewritePolicy::BestEffort,
            DatabaseType::MySQL,
            "SELECT tenant_id, name FROM items",
            &[],
        );
        assert!(q.rewritten);
        assert_eq!(q.sql, "SELECT tenant_id, name FROM items WHERE tenant_id = ?");

        let filtered = apply(
            RewritePolicy::BestEffort,
            DatabaseType::MySQL,
            "SELECT tenant_id, name FROM items WHERE tenant_id = ?",
            &[QueryParam::from("t1")],
        );
        assert!(!filtered.rewritten);
        assert_eq!(filtered.params.len(), 1);
    }

    #[test]
    fn test_dual_is_not_a_tenant_table() {
        for policy in [RewritePolicy::BestEffort, RewritePolicy::Strict] {
            let q = apply(policy, DatabaseType::MySQL, "SELECT * FROM DUAL", &[]);
            assert!(!q.rewritten);
            assert_eq!(q.sql, "SELECT * FROM DUAL");

            let q = apply(policy, DatabaseType::MySQL, "SELECT 1 + 1 AS two FROM dual", &[]);
            assert!(!q.rewritten);
        }
    }

    #[test]
    fn test_postgres_dollar_quoted_literals_are_ignored() {
        let q = apply(
            RewritePolicy::BestEffort,
            DatabaseType::PostgreSQL,
            "SELECT $$ from x order by $$ AS s FROM notes",
            &[],
        );
        assert_eq!(
            q.sql,
            "SELECT $$ from x order by $$ AS s FROM notes WHERE tenant_id = $1"
        );

        let q = apply(
            RewritePolicy::BestEffort,
            DatabaseType::PostgreSQL,
            "SELECT $body$ where $$ limit $body$ AS s FROM notes LIMIT $1",
            &[QueryParam::Int(3)],
        );
        assert_eq!(
            q.sql,
            "SELECT $body$ where $$ limit $body$ AS s FROM notes WHERE tenant_id = $2 LIMIT $1"
        );
    }

    #[test]
    fn test_postgres_escape_strings_are_ignored() {
        let q = apply(
            RewritePolicy::BestEffort,
            DatabaseType::PostgreSQL,
            "SELECT E'it\\'s from y order by' AS s FROM notes ORDER BY s",
            &[],
        );
        assert!(q.rewritten);
        assert_eq!(
            q.sql,
            "SELECT E'it\\'s from y order by' AS s FROM notes WHERE tenant_id = $1 ORDER BY s"
        );
    }

    #[test]
    fn test_invalid_tenant_column_rejected() {
        let result = QueryRewriter::new(RewriteConfig {
            policy: RewritePolicy::BestEffort,
            tenant_column: "tenant id".to_string(),
        });
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    }
}
