//! Lifecycle events and observers.
//!
//! The identity map reacts to every [`ModelEvent`] itself; observers
//! registered with [`Context::observe`](crate::Context::observe) see the same
//! events afterwards, plus [`RelationEvent`]s from relation managers.

use crate::arena::InstanceId;
use std::fmt;

/// Instance lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    PreInit,
    PostInit,
    PreSave,
    PostSave { created: bool },
    PreDelete,
    PostDelete { deleted: bool },
    PreUpdate { field: String },
    PostUpdate { field: String },
    DoCache,
    DoNotCache,
}

impl ModelEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ModelEvent::PreInit => "model-pre-init",
            ModelEvent::PostInit => "model-post-init",
            ModelEvent::PreSave => "model-pre-save",
            ModelEvent::PostSave { .. } => "model-post-save",
            ModelEvent::PreDelete => "model-pre-delete",
            ModelEvent::PostDelete { .. } => "model-post-delete",
            ModelEvent::PreUpdate { .. } => "model-pre-update",
            ModelEvent::PostUpdate { .. } => "model-post-update",
            ModelEvent::DoCache => "model-do-cache",
            ModelEvent::DoNotCache => "model-do-not-cache",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationAction {
    Get,
    Set,
    Add,
    Remove,
    Delete,
}

impl fmt::Display for RelationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelationAction::Get => "get",
            RelationAction::Set => "set",
            RelationAction::Add => "add",
            RelationAction::Remove => "remove",
            RelationAction::Delete => "delete",
        })
    }
}

/// A relation manager call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationEvent {
    pub phase: Phase,
    pub action: RelationAction,
    /// Model of the owning instance
    pub model: String,
    pub identifier: String,
    pub owner: InstanceId,
    pub values: Vec<InstanceId>,
}

/// Receives lifecycle events from a context.
pub trait Observer {
    fn on_model_event(&mut self, _model: &str, _instance: InstanceId, _event: &ModelEvent) {}

    fn on_relation_event(&mut self, _event: &RelationEvent) {}
}
