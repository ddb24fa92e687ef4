//! heinzel - an identity-mapped ORM core.
//!
//! heinzel keeps at most one in-memory instance per stored row, bounded by an
//! entry cache, and compiles Django-style filter paths into SQL with outer
//! joins:
//!
//! - Model schemas described with a builder and resolved in a [`Registry`]
//! - Foreign-key, many-to-many and one-to-one relations, reachable from both
//!   sides through [`RelatedManager`]
//! - Lazy [`QuerySet`]s with `Q` predicate trees, ordering, limits,
//!   aggregates and annotations
//! - MRU or timestamp eviction for saved instances
//! - A synchronous SQLite backing store
//!
//! # Quick Start
//!
//! ```ignore
//! use heinzel::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = Registry::builder()
//!     .register(ModelSchema::builder("Brand").field(FieldInfo::text("name")).build()?)
//!     .register(
//!         ModelSchema::builder("Car")
//!             .field(FieldInfo::text("name"))
//!             .relation(RelationField::foreign_key("brand", "Brand").related_name("cars"))
//!             .build()?,
//!     )
//!     .build(&Config::default())?;
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw(
//!     "CREATE TABLE brands (id INTEGER PRIMARY KEY, name TEXT);
//!      CREATE TABLE cars (id INTEGER PRIMARY KEY, name TEXT, brand_id INTEGER);",
//! )?;
//! let mut ctx = Context::new(conn, Arc::new(registry))?;
//!
//! let cars = ctx.objects("Car")?;
//! let bmw = ctx.objects("Brand")?.create(&mut ctx, [("name", "BMW".into())])?;
//! let bmw_id = ctx.get_field(bmw, "id")?;
//! let three = cars.create(&mut ctx, [("name", "3er".into()), ("brand", bmw_id)])?;
//!
//! let found = cars.get(&mut ctx, Q::new("brand__name", "BMW"))?;
//! assert_eq!(found, three);
//! ```
//!
//! # Logging
//!
//! Everything logs through `tracing`: lifecycle transitions at `debug`,
//! rendered SQL and cache decisions at `trace`. No subscriber is installed.

pub use heinzel_core::{
    BackingStore, CachePolicy, ColumnInfo, Config, ConfigError, ConnectionError, Error,
    ExecuteResult, FieldInfo, FieldKind, LookupError, ModelInfo, ModelSchema, QueryError,
    QueryErrorKind, ReferentialAction, Registry, RegistryBuilder, Relation, RelationField,
    RelationMode, Result, Row, TypeError, UsageError, UsageErrorKind, ValidationError,
    ValidationErrorKind, Value,
};
pub use heinzel_query::{Aggregate, Lookup, Operand, Q, SelectQuery, Selector};
pub use heinzel_session::{
    Context, EntryCache, EvictionPolicy, InstanceId, Instances, Manager, Meta, ModelEvent,
    MruPolicy, Observer, Phase, QuerySet, RelatedManager, RelationAction, RelationEvent,
    TimestampPolicy,
};
pub use heinzel_sqlite::{SqliteConfig, SqliteConnection};

/// Context over a SQLite connection.
pub type SqliteContext = Context<SqliteConnection>;

/// Build a registry from `schemas` and open a context over `conn`.
pub fn open<S: BackingStore>(
    conn: S,
    config: &Config,
    schemas: impl IntoIterator<Item = ModelSchema>,
) -> Result<Context<S>> {
    let registry = schemas
        .into_iter()
        .fold(Registry::builder(), RegistryBuilder::register)
        .build(config)?;
    Context::new(conn, std::sync::Arc::new(registry))
}

/// Commonly used items.
pub mod prelude {
    pub use crate::{
        Aggregate, BackingStore, CachePolicy, Config, Context, Error, FieldInfo, InstanceId,
        Manager, ModelSchema, Q, QuerySet, ReferentialAction, Registry, RelatedManager,
        RelationField, Result, Row, Selector, SqliteConnection, SqliteContext, UsageErrorKind,
        Value,
    };
}
