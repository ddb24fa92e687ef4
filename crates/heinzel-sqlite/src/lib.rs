//! SQLite backing store for heinzel.
// FFI bindings require unsafe code
#![allow(unsafe_code)]
//!
//! [`SqliteConnection`] implements [`heinzel_core::BackingStore`] on top of
//! libsqlite3 (bundled through `libsqlite3-sys`).
//!
//! # Example
//!
//! ```rust,ignore
//! use heinzel_sqlite::SqliteConnection;
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE brand (id INTEGER PRIMARY KEY, name TEXT)")?;
//! ```
//!
//! # Errors
//!
//! Engine failures surface as `Error::Query` with a kind derived from the
//! result code and message: constraint violations are `Sanity`, parse
//! failures `Syntax`, busy or locked databases `Locked`.

pub mod connection;
pub mod ffi;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection, classify};

pub fn sqlite_version() -> &'static str {
    ffi::version()
}
