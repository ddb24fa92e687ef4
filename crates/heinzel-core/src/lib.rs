//! Core types for heinzel.
//!
//! This crate provides the data shared by every layer of the ORM:
//!
//! - [`Value`] and [`Row`] for dynamically-typed storage values
//! - [`FieldInfo`] and [`ModelSchema`] describing models at registration time
//! - [`Relation`] and the [`Registry`] that resolves them
//! - [`BackingStore`], the narrow interface to the SQL engine
//! - [`Config`] and the [`Error`] taxonomy

pub mod config;
pub mod connection;
pub mod error;
pub mod field;
pub mod model;
pub mod registry;
pub mod relationship;
pub mod row;
pub mod value;

pub use config::{CachePolicy, Config};
pub use connection::{BackingStore, ExecuteResult};
pub use error::{
    ConfigError, ConnectionError, Error, LookupError, QueryError, QueryErrorKind, Result, TypeError,
    UsageError, UsageErrorKind, ValidationError, ValidationErrorKind,
};
pub use field::{FieldInfo, FieldKind, ReferentialAction};
pub use model::{ModelInfo, ModelSchema, ModelSchemaBuilder, RelationField};
pub use registry::{Registry, RegistryBuilder};
pub use relationship::{Relation, RelationMode};
pub use row::{ColumnInfo, Row};
pub use value::Value;
