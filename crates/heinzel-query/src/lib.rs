//! Query construction for heinzel.
//!
//! `heinzel-query` turns filter expressions into SQL text plus positional
//! parameters. It knows the registered models and relations but never talks
//! to a backing store.
//!
//! - [`Q`] predicate trees combined with `&`, `|` and `!`
//! - [`Lookup`] suffixes (`__gt`, `__in`, `__between`, ...)
//! - [`JoinList`] resolving `__`-separated relation paths to outer joins
//! - [`SelectQuery`], a value-type SELECT builder
//! - [`Insert`], [`Update`] and [`Delete`] statements

pub mod dml;
pub mod join;
pub mod lookup;
pub mod q;
pub mod select;

pub use dml::{Delete, Insert, Update};
pub use join::{ForeignKeySide, Join, JoinList, ResolvedPath};
pub use lookup::{Lookup, lex, placeholders};
pub use q::{Child, Condition, Connector, Node, Operand, Q};
pub use select::{Aggregate, Limit, Predicate, SelectQuery, Selector, require_selectors};
