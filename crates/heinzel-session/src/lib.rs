//! Identity map and unit of work for heinzel.
//!
//! A [`Context`] guarantees that one database row is represented by at most
//! one live instance. Instances are addressed through [`InstanceId`] handles;
//! their state lives in the context's [`Storage`], next to a bounded
//! [`EntryCache`] that decides which saved instances stay resident.
//!
//! Reads go through [`Manager`] and [`QuerySet`]; relations through
//! [`RelatedManager`]. Every read first saves dirty instances so queries see
//! pending changes.

pub mod arena;
pub mod cache;
pub mod context;
pub mod hooks;
pub mod info;
pub mod manager;
pub mod queryset;
pub mod relations;
pub mod storage;

pub use arena::InstanceId;
pub use cache::{EntryCache, EvictionPolicy, MruPolicy, TimestampPolicy};
pub use context::Context;
pub use hooks::{ModelEvent, Observer, Phase, RelationAction, RelationEvent};
pub use info::{InstanceInfo, Meta};
pub use manager::Manager;
pub use queryset::{Instances, QuerySet};
pub use relations::RelatedManager;
pub use storage::{PkKey, Storage};
