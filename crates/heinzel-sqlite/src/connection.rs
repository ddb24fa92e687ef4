//! SQLite connection implementing [`BackingStore`].
//!
//! Data-modifying statements open a transaction implicitly; it stays open
//! until [`BackingStore::commit`] or [`BackingStore::rollback`]. Queries
//! and raw DDL run in whatever state the connection is in.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::borrow_as_ptr)]

use crate::ffi;
use crate::types;
use heinzel_core::{
    BackingStore, ColumnInfo, ConnectionError, Error, ExecuteResult, QueryError, QueryErrorKind,
    Result, Row, Value,
};
use regex::Regex;
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:"
    pub path: String,
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds
    pub busy_timeout_ms: u32,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read_only: bool,
    pub read_write: bool,
    /// Create the database if it doesn't exist
    pub create: bool,
    /// Interpret the path as a URI
    pub uri: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;
        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }
        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn memory() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

struct SqliteInner {
    db: *mut ffi::sqlite3,
    in_transaction: bool,
}

// SAFETY: the handle is only touched while holding the mutex.
unsafe impl Send for SqliteInner {}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

impl SqliteConnection {
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str())
            .map_err(|_| connection_error("invalid path: contains null byte".to_string()))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        // SAFETY: valid pointers; the return code is checked
        let rc = unsafe {
            ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, config.flags.to_sqlite_flags(), ptr::null())
        };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is valid even on failure and must be closed
                unsafe {
                    let msg = CStr::from_ptr(ffi::sqlite3_errmsg(db)).to_string_lossy().into_owned();
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(connection_error(format!("failed to open database: {}", msg)));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms as c_int);
            }
        }

        tracing::debug!(path = %config.path, "Opened SQLite database");
        Ok(Self {
            inner: Mutex::new(SqliteInner {
                db,
                in_transaction: false,
            }),
            path: config.path.clone(),
        })
    }

    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, SqliteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }

    /// Run one or more statements without parameters (DDL, pragmas).
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        let inner = self.lock();
        exec(inner.db, sql)
    }

    /// Open a transaction explicitly. Statements up to the next commit or
    /// rollback are grouped.
    pub fn begin(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.in_transaction {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: None,
                params: Vec::new(),
                message: "already in a transaction".to_string(),
                source: None,
            }));
        }
        exec(inner.db, "BEGIN")?;
        inner.in_transaction = true;
        Ok(())
    }

    fn run(&self, inner: &mut SqliteInner, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        if !inner.in_transaction && is_dml(sql) {
            exec(inner.db, "BEGIN")?;
            inner.in_transaction = true;
        }
        let stmt = Statement::prepare(inner.db, sql)?;
        stmt.bind(sql, params)?;
        // SAFETY: stmt is valid
        let rc = unsafe { ffi::sqlite3_step(stmt.raw) };
        match rc {
            ffi::SQLITE_DONE | ffi::SQLITE_ROW => {
                // SAFETY: db is valid
                let (changes, rowid) = unsafe {
                    (ffi::sqlite3_changes(inner.db), ffi::sqlite3_last_insert_rowid(inner.db))
                };
                Ok(ExecuteResult {
                    rows_affected: changes as u64,
                    last_insert_id: rowid,
                })
            }
            _ => Err(statement_error(inner.db, sql, params)),
        }
    }
}

impl BackingStore for SqliteConnection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::trace!(sql, params = ?params, "Query");
        let inner = self.lock();
        let stmt = Statement::prepare(inner.db, sql)?;
        stmt.bind(sql, params)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.raw) };
        let names = (0..col_count)
            // SAFETY: stmt is valid and i is in range
            .map(|i| unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{}", i)))
            .collect();
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt.raw) } {
                ffi::SQLITE_ROW => {
                    let values = (0..col_count)
                        // SAFETY: positioned on a row, i is in range
                        .map(|i| unsafe { types::read_column(stmt.raw, i) })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(statement_error(inner.db, sql, params)),
            }
        }
        Ok(rows)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        tracing::trace!(sql, params = ?params, "Execute");
        let mut inner = self.lock();
        self.run(&mut inner, sql, params)
    }

    fn execute_many(&self, sql: &str, param_sets: &[Vec<Value>]) -> Result<u64> {
        tracing::trace!(sql, sets = param_sets.len(), "Execute many");
        let mut inner = self.lock();
        let mut total = 0;
        for params in param_sets {
            total += self.run(&mut inner, sql, params)?.rows_affected;
        }
        Ok(total)
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.in_transaction {
            exec(inner.db, "COMMIT")?;
            inner.in_transaction = false;
            tracing::trace!(path = %self.path, "Committed");
        }
        Ok(())
    }

    /// The transaction counts as closed even if ROLLBACK fails; SQLite
    /// may already have ended it after the failing statement.
    fn rollback(&self) -> Result<()> {
        let mut inner = self.lock();
        if !inner.in_transaction {
            return Ok(());
        }
        inner.in_transaction = false;
        exec(inner.db, "ROLLBACK")?;
        tracing::debug!(path = %self.path, "Rolled back transaction");
        Ok(())
    }

    fn table_columns(&self, table: &str) -> Result<Option<Vec<String>>> {
        let rows = self.query(&format!("PRAGMA table_info(\"{}\")", table.replace('"', "\"\"")), &[])?;
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            rows.iter()
                .filter_map(|row| row.get_by_name("name").and_then(Value::as_str).map(String::from))
                .collect(),
        ))
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        let inner = self.lock();
        if !inner.db.is_null() {
            // SAFETY: db is valid and no statements outlive the connection
            unsafe {
                ffi::sqlite3_close(inner.db);
            }
        }
    }
}

/// Prepared statement finalized on drop.
struct Statement {
    raw: *mut ffi::sqlite3_stmt,
    db: *mut ffi::sqlite3,
}

impl Statement {
    fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<Self> {
        let c_sql = CString::new(sql).map_err(|_| {
            Error::Query(QueryError {
                kind: QueryErrorKind::Syntax,
                sql: Some(sql.to_string()),
                params: Vec::new(),
                message: "SQL contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();
        // SAFETY: all pointers are valid
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                db,
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut raw,
                ptr::null_mut(),
            )
        };
        if rc != ffi::SQLITE_OK {
            // SAFETY: a failed prepare leaves raw null or finalizable
            unsafe { ffi::sqlite3_finalize(raw) };
            return Err(statement_error(db, sql, &[]));
        }
        Ok(Self { raw, db })
    }

    fn bind(&self, sql: &str, params: &[Value]) -> Result<()> {
        for (i, param) in params.iter().enumerate() {
            // SAFETY: stmt is valid, index is 1-based
            let rc = unsafe { types::bind_value(self.raw, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                let mut err = statement_error(self.db, sql, params);
                if let Error::Query(q) = &mut err {
                    q.message = format!("failed to bind parameter {}: {}", i + 1, q.message);
                }
                return Err(err);
            }
        }
        Ok(())
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: raw came from sqlite3_prepare_v2 and is finalized once
        unsafe { ffi::sqlite3_finalize(self.raw) };
    }
}

fn exec(db: *mut ffi::sqlite3, sql: &str) -> Result<()> {
    let c_sql = CString::new(sql).map_err(|_| {
        Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some(sql.to_string()),
            params: Vec::new(),
            message: "SQL contains null byte".to_string(),
            source: None,
        })
    })?;

    let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();
    // SAFETY: all pointers are valid
    let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };
    if rc == ffi::SQLITE_OK {
        return Ok(());
    }

    let message = if errmsg.is_null() {
        ffi::error_string(rc).to_string()
    } else {
        // SAFETY: errmsg was allocated by sqlite and is freed once
        unsafe {
            let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
            ffi::sqlite3_free(errmsg.cast());
            msg
        }
    };
    Err(Error::Query(QueryError {
        kind: classify(rc, &message),
        sql: Some(sql.to_string()),
        params: Vec::new(),
        message,
        source: None,
    }))
}

fn statement_error(db: *mut ffi::sqlite3, sql: &str, params: &[Value]) -> Error {
    // SAFETY: db is valid
    let (message, code) = unsafe {
        let msg = CStr::from_ptr(ffi::sqlite3_errmsg(db)).to_string_lossy().into_owned();
        (msg, ffi::sqlite3_errcode(db))
    };
    let kind = classify(code, &message);
    tracing::debug!(kind = kind.as_str(), error = %message, sql, "Statement failed");
    Error::Query(QueryError {
        kind,
        sql: Some(sql.to_string()),
        params: params.to_vec(),
        message,
        source: None,
    })
}

static SANITY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)foreign key constraint|is not unique|UNIQUE constraint failed|constraint failed")
        .ok()
});
static SYNTAX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)syntax error|incomplete input").ok());

fn is_match(regex: &LazyLock<Option<Regex>>, message: &str) -> bool {
    regex.as_ref().is_some_and(|r| r.is_match(message))
}

/// Map an SQLite result code and message to an error kind.
pub fn classify(code: c_int, message: &str) -> QueryErrorKind {
    if code & 0xff == ffi::SQLITE_CONSTRAINT || is_match(&SANITY, message) {
        QueryErrorKind::Sanity
    } else if is_match(&SYNTAX, message) {
        QueryErrorKind::Syntax
    } else if matches!(code & 0xff, ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED)
        || message.contains("database is locked")
    {
        QueryErrorKind::Locked
    } else {
        QueryErrorKind::Database
    }
}

fn is_dml(sql: &str) -> bool {
    let head = sql.trim_start().split_whitespace().next().unwrap_or("");
    ["INSERT", "UPDATE", "DELETE", "REPLACE"]
        .iter()
        .any(|kw| head.eq_ignore_ascii_case(kw))
}

fn connection_error(message: String) -> Error {
    Error::Connection(ConnectionError {
        message,
        source: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> SqliteConnection {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT UNIQUE, age INTEGER)")
            .unwrap();
        conn
    }

    #[test]
    fn test_open_memory() {
        let conn = SqliteConnection::open_memory().unwrap();
        assert_eq!(conn.path(), ":memory:");
        assert!(!conn.in_transaction());
    }

    #[test]
    fn test_execute_and_query() {
        let conn = conn();
        let result = conn
            .execute(
                "INSERT INTO test (name, age) VALUES (?, ?)",
                &[Value::Text("Alice".to_string()), Value::Int(30)],
            )
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.last_insert_id, 1);
        assert!(conn.in_transaction());
        conn.commit().unwrap();
        assert!(!conn.in_transaction());

        let rows = conn.query("SELECT name, age FROM test WHERE age > ?", &[Value::Int(18)]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_named::<String>("name").unwrap(), "Alice");
        assert_eq!(rows[0].get(1), Some(&Value::Int(30)));
    }

    #[test]
    fn test_big_integers_and_nulls() {
        let conn = conn();
        conn.execute("INSERT INTO test (name, age) VALUES (?, ?)", &[Value::Null, Value::BigInt(1 << 40)])
            .unwrap();
        let rows = conn.query("SELECT name, age FROM test", &[]).unwrap();
        assert_eq!(rows[0].get(0), Some(&Value::Null));
        assert_eq!(rows[0].get(1), Some(&Value::BigInt(1 << 40)));
    }

    #[test]
    fn test_rollback() {
        let conn = conn();
        conn.execute("INSERT INTO test (name) VALUES (?)", &[Value::from("Bob")])
            .unwrap();
        conn.rollback().unwrap();
        assert!(conn.query("SELECT * FROM test", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_rollback_after_failed_statement() {
        let conn = conn();
        conn.execute("INSERT INTO test (name) VALUES (?)", &[Value::from("a")])
            .unwrap();
        assert!(conn.execute("INSERT INTO test (name) VALUES (?)", &[Value::from("a")]).is_err());
        assert!(conn.in_transaction());
        conn.rollback().unwrap();
        assert!(!conn.in_transaction());
        assert!(conn.query("SELECT * FROM test", &[]).unwrap().is_empty());
        // Nothing open any more.
        conn.rollback().unwrap();
    }

    #[test]
    fn test_explicit_begin() {
        let conn = conn();
        conn.begin().unwrap();
        assert!(conn.begin().is_err());
        conn.execute("INSERT INTO test (name) VALUES (?)", &[Value::from("a")])
            .unwrap();
        conn.execute("INSERT INTO test (name) VALUES (?)", &[Value::from("b")])
            .unwrap();
        conn.rollback().unwrap();
        assert!(conn.query("SELECT * FROM test", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_execute_many() {
        let conn = conn();
        let sets = vec![vec![Value::from("a")], vec![Value::from("b")], vec![Value::from("c")]];
        let n = conn.execute_many("INSERT INTO test (name) VALUES (?)", &sets).unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn test_unique_violation_is_sanity() {
        let conn = conn();
        conn.execute("INSERT INTO test (name) VALUES (?)", &[Value::from("x")])
            .unwrap();
        let err = conn
            .execute("INSERT INTO test (name) VALUES (?)", &[Value::from("x")])
            .unwrap_err();
        assert!(err.is_sanity());
        assert!(err.sql().unwrap().starts_with("INSERT"));
    }

    #[test]
    fn test_syntax_error() {
        let conn = conn();
        let err = conn.query("SELEC * FROM test", &[]).unwrap_err();
        assert!(err.is_syntax());
    }

    #[test]
    fn test_classify_messages() {
        assert_eq!(classify(1, "column name is not unique"), QueryErrorKind::Sanity);
        assert_eq!(classify(1, "near \"x\": syntax error"), QueryErrorKind::Syntax);
        assert_eq!(classify(ffi::SQLITE_BUSY, "database is locked"), QueryErrorKind::Locked);
        assert_eq!(classify(1, "no such table: nope"), QueryErrorKind::Database);
    }

    #[test]
    fn test_table_columns() {
        let conn = conn();
        assert_eq!(
            conn.table_columns("test").unwrap(),
            Some(vec!["id".to_string(), "name".to_string(), "age".to_string()])
        );
        assert_eq!(conn.table_columns("missing").unwrap(), None);
    }

    #[test]
    fn test_file_database_shared_between_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db").to_str().unwrap().to_string();
        let writer = SqliteConnection::open_file(path.clone()).unwrap();
        writer
            .execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        let other = SqliteConnection::open(&SqliteConfig::file(path).busy_timeout(0)).unwrap();

        writer
            .execute("INSERT INTO test (name) VALUES (?)", &[Value::from("a")])
            .unwrap();
        let err = other
            .execute("INSERT INTO test (name) VALUES (?)", &[Value::from("b")])
            .unwrap_err();
        assert!(matches!(&err, Error::Query(e) if e.kind == QueryErrorKind::Locked));
        other.rollback().unwrap();

        writer.commit().unwrap();
        let rows = other.query("SELECT name FROM test", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_named::<String>("name").unwrap(), "a");
    }

    #[test]
    fn test_is_dml() {
        assert!(is_dml("  insert into t values (1)"));
        assert!(is_dml("DELETE FROM t"));
        assert!(!is_dml("SELECT 1"));
        assert!(!is_dml("PRAGMA table_info(t)"));
    }
}
