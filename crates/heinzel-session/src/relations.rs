//! Managers for the instances on the other side of a relation.
//!
//! A [`RelatedManager`] is bound to one owner instance and one relation
//! identifier. Mutations go straight to the store and are committed at
//! once; they never mark the owner or the targets dirty. A failed mutation
//! is rolled back as a whole. Foreign-key values of instances held in the
//! context are updated in place once the change is committed.

use crate::arena::InstanceId;
use crate::context::Context;
use crate::hooks::{Phase, RelationAction, RelationEvent};
use crate::queryset::QuerySet;
use heinzel_core::{BackingStore, Error, Registry, Relation, RelationMode, Result, UsageErrorKind, Value};
use heinzel_query::{Delete, Insert, Q, Update};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RelatedManager {
    registry: Arc<Registry>,
    owner: InstanceId,
    model: String,
    identifier: String,
    relation: Relation,
}

impl RelatedManager {
    pub(crate) fn new(registry: Arc<Registry>, owner: InstanceId, model: &str, identifier: &str) -> Result<Self> {
        let relation = registry
            .relation_by_identity(model, identifier)
            .map(|(_, r)| r.clone())
            .ok_or_else(|| {
                Error::usage(
                    UsageErrorKind::UnknownName,
                    format!("model '{}' has no relation '{}'", model, identifier),
                )
            })?;
        Ok(Self {
            registry,
            owner,
            model: model.to_string(),
            identifier: identifier.to_string(),
            relation,
        })
    }

    pub fn owner(&self) -> InstanceId {
        self.owner
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn mode(&self) -> RelationMode {
        self.relation.mode
    }

    /// Model of the instances this manager yields.
    pub fn target(&self) -> &str {
        self.relation.target_model(&self.identifier)
    }

    fn is_reverse(&self) -> bool {
        self.relation.is_reverse_by_identifier(&self.identifier)
    }

    fn is_forward_fk(&self) -> bool {
        self.relation.mode == RelationMode::ForeignKey && !self.is_reverse()
    }

    /// Does this side hold at most one instance?
    pub fn is_single(&self) -> bool {
        self.is_forward_fk() || self.relation.mode == RelationMode::OneToOne
    }

    /// Linker column holding the owner's id.
    fn owner_column(&self) -> String {
        self.relation
            .link_column(self.relation.other_identifier(&self.identifier))
    }

    /// Linker column holding the target's id.
    fn target_column(&self) -> String {
        self.relation.link_column(&self.identifier)
    }

    fn link_table(&self) -> Result<String> {
        self.relation.link_table().ok_or_else(|| self.unsupported("linking"))
    }

    fn unsupported(&self, action: &str) -> Error {
        Error::usage(
            UsageErrorKind::Unsupported,
            format!(
                "{} is not supported on {} relation '{}' of {}",
                action,
                self.relation.mode.as_str(),
                self.identifier,
                self.model
            ),
        )
    }

    fn owner_id<S: BackingStore>(&self, ctx: &Context<S>) -> Result<Value> {
        let info = ctx.info(self.owner)?;
        if !info.is_saved() {
            return Err(Error::usage(
                UsageErrorKind::Unsaved,
                format!(
                    "{} must be saved before using relation '{}'",
                    self.model, self.identifier
                ),
            ));
        }
        Ok(info.row_id())
    }

    /// Row ids of `values` after checking model, saved state and count.
    fn target_ids<S: BackingStore>(&self, ctx: &Context<S>, values: &[InstanceId]) -> Result<Vec<Value>> {
        if self.is_single() && values.len() > 1 {
            return Err(Error::usage(
                UsageErrorKind::Cardinality,
                format!(
                    "relation '{}' of {} holds a single {}, got {}",
                    self.identifier,
                    self.model,
                    self.target(),
                    values.len()
                ),
            ));
        }
        values
            .iter()
            .map(|id| {
                let info = ctx.info(*id)?;
                if info.model != self.target() {
                    return Err(Error::usage(
                        UsageErrorKind::WrongModel,
                        format!("need an instance of {}, got {}", self.target(), info.model),
                    ));
                }
                if !info.is_saved() {
                    return Err(Error::usage(
                        UsageErrorKind::Unsaved,
                        format!("{} {} must be saved before linking", info.model, id),
                    ));
                }
                Ok(info.row_id())
            })
            .collect()
    }

    fn emit<S: BackingStore>(&self, ctx: &mut Context<S>, phase: Phase, action: RelationAction, values: &[InstanceId]) {
        ctx.fire_relation(&RelationEvent {
            phase,
            action,
            model: self.model.clone(),
            identifier: self.identifier.clone(),
            owner: self.owner,
            values: values.to_vec(),
        });
    }

    /// Query set over the related instances.
    pub fn query_set<S: BackingStore>(&self, ctx: &Context<S>) -> Result<QuerySet> {
        let qs = QuerySet::new(Arc::clone(&self.registry), self.target())?;
        if self.is_forward_fk() {
            let fk = ctx.info(self.owner)?.get(&self.relation.fk_column());
            return qs.filter(Q::new("id", fk));
        }
        let owner = self.owner_id(ctx)?;
        match self.relation.mode {
            RelationMode::ForeignKey => qs.filter(Q::new(self.relation.identifier.clone(), owner)),
            RelationMode::ManyToMany | RelationMode::OneToOne => {
                let path = format!("{}__id", self.relation.other_identifier(&self.identifier));
                qs.filter(Q::new(path, owner))
            }
        }
    }

    /// The related instance of a single-valued side.
    pub fn get<S: BackingStore>(&self, ctx: &mut Context<S>) -> Result<Option<InstanceId>> {
        if !self.is_single() {
            return Err(Error::usage(
                UsageErrorKind::Cardinality,
                format!("relation '{}' of {} holds many instances", self.identifier, self.model),
            ));
        }
        self.emit(ctx, Phase::Pre, RelationAction::Get, &[]);
        let found = self.query_set(ctx)?.first(ctx)?;
        self.emit(ctx, Phase::Post, RelationAction::Get, found.as_slice());
        Ok(found)
    }

    /// Every related instance.
    pub fn all<S: BackingStore>(&self, ctx: &mut Context<S>) -> Result<Vec<InstanceId>> {
        self.emit(ctx, Phase::Pre, RelationAction::Get, &[]);
        let found = self.query_set(ctx)?.eval(ctx)?;
        self.emit(ctx, Phase::Post, RelationAction::Get, &found);
        Ok(found)
    }

    /// Replace the related instances with `values`.
    #[tracing::instrument(level = "debug", skip(self, ctx), fields(relation = %self.identifier))]
    pub fn set<S: BackingStore>(&self, ctx: &mut Context<S>, values: &[InstanceId]) -> Result<()> {
        let ids = self.target_ids(ctx, values)?;
        let owner = self.owner_id(ctx)?;
        self.emit(ctx, Phase::Pre, RelationAction::Set, values);

        let column = self.relation.fk_column();
        match self.relation.mode {
            RelationMode::ForeignKey if !self.is_reverse() => {
                let target = ids.into_iter().next().unwrap_or(Value::Null);
                ctx.atomically(|ctx| {
                    self.write_fk(ctx, &owner, &target)?;
                    ctx.commit()
                })?;
                ctx.write_silently(self.owner, &column, target)?;
            }
            RelationMode::ForeignKey => {
                ctx.atomically(|ctx| {
                    self.detach_all(ctx, &owner)?;
                    self.attach(ctx, &owner, ids)?;
                    ctx.commit()
                })?;
                ctx.null_references(&self.relation.model, &column, &owner);
                for id in values {
                    ctx.write_silently(*id, &column, owner.clone())?;
                }
            }
            RelationMode::ManyToMany => ctx.atomically(|ctx| {
                self.unlink_all(ctx, &owner)?;
                self.link(ctx, &owner, ids)?;
                ctx.commit()
            })?,
            RelationMode::OneToOne => ctx.atomically(|ctx| {
                self.unlink_all(ctx, &owner)?;
                if !ids.is_empty() {
                    let (sql, params) = Delete::new(self.link_table()?)
                        .filter(self.target_column(), ids.clone())
                        .build();
                    ctx.execute(&sql, &params)?;
                }
                self.link(ctx, &owner, ids)?;
                ctx.commit()
            })?,
        }

        self.emit(ctx, Phase::Post, RelationAction::Set, values);
        tracing::debug!(model = %self.model, count = values.len(), "Set related instances");
        Ok(())
    }

    /// Relate `values` in addition to the current ones. Single-valued
    /// sides replace instead.
    #[tracing::instrument(level = "debug", skip(self, ctx), fields(relation = %self.identifier))]
    pub fn add<S: BackingStore>(&self, ctx: &mut Context<S>, values: &[InstanceId]) -> Result<()> {
        if self.is_single() {
            return self.set(ctx, values);
        }
        let ids = self.target_ids(ctx, values)?;
        let owner = self.owner_id(ctx)?;
        self.emit(ctx, Phase::Pre, RelationAction::Add, values);

        if self.relation.mode == RelationMode::ForeignKey {
            ctx.atomically(|ctx| {
                self.attach(ctx, &owner, ids)?;
                ctx.commit()
            })?;
            let column = self.relation.fk_column();
            for id in values {
                ctx.write_silently(*id, &column, owner.clone())?;
            }
        } else {
            ctx.atomically(|ctx| {
                self.link(ctx, &owner, ids)?;
                ctx.commit()
            })?;
        }

        self.emit(ctx, Phase::Post, RelationAction::Add, values);
        Ok(())
    }

    /// Unrelate `values`. Only multi-valued sides support this.
    #[tracing::instrument(level = "debug", skip(self, ctx), fields(relation = %self.identifier))]
    pub fn remove<S: BackingStore>(&self, ctx: &mut Context<S>, values: &[InstanceId]) -> Result<()> {
        if self.is_single() {
            return Err(self.unsupported("remove"));
        }
        let ids = self.target_ids(ctx, values)?;
        let owner = self.owner_id(ctx)?;
        if ids.is_empty() {
            return Ok(());
        }
        self.emit(ctx, Phase::Pre, RelationAction::Remove, values);

        if self.relation.mode == RelationMode::ForeignKey {
            let column = self.relation.fk_column();
            let (sql, params) = Update::new(&self.relation.model_table)
                .set(&column, Value::Null)
                .filter("id", ids)
                .filter(&column, vec![owner.clone()])
                .build();
            ctx.atomically(|ctx| {
                ctx.execute(&sql, &params)?;
                ctx.commit()
            })?;
            for id in values {
                if ctx.info(*id)?.get(&column).same_as(&owner) {
                    ctx.write_silently(*id, &column, Value::Null)?;
                }
            }
        } else {
            let (sql, params) = Delete::new(self.link_table()?)
                .filter(self.owner_column(), vec![owner])
                .filter(self.target_column(), ids)
                .build();
            ctx.atomically(|ctx| {
                ctx.execute(&sql, &params)?;
                ctx.commit()
            })?;
        }

        self.emit(ctx, Phase::Post, RelationAction::Remove, values);
        Ok(())
    }

    /// Unrelate everything. Related rows themselves are kept.
    #[tracing::instrument(level = "debug", skip(self, ctx), fields(relation = %self.identifier))]
    pub fn delete<S: BackingStore>(&self, ctx: &mut Context<S>) -> Result<()> {
        let owner = self.owner_id(ctx)?;
        self.emit(ctx, Phase::Pre, RelationAction::Delete, &[]);

        let column = self.relation.fk_column();
        match self.relation.mode {
            RelationMode::ForeignKey if !self.is_reverse() => {
                ctx.atomically(|ctx| {
                    self.write_fk(ctx, &owner, &Value::Null)?;
                    ctx.commit()
                })?;
                ctx.write_silently(self.owner, &column, Value::Null)?;
            }
            RelationMode::ForeignKey => {
                ctx.atomically(|ctx| {
                    self.detach_all(ctx, &owner)?;
                    ctx.commit()
                })?;
                ctx.null_references(&self.relation.model, &column, &owner);
            }
            RelationMode::ManyToMany | RelationMode::OneToOne => ctx.atomically(|ctx| {
                self.unlink_all(ctx, &owner)?;
                ctx.commit()
            })?,
        }

        self.emit(ctx, Phase::Post, RelationAction::Delete, &[]);
        Ok(())
    }

    /// Point the owner's foreign key at `target`.
    fn write_fk<S: BackingStore>(&self, ctx: &mut Context<S>, owner: &Value, target: &Value) -> Result<()> {
        let (sql, params) = Update::new(&self.relation.model_table)
            .set(&self.relation.fk_column(), target.clone())
            .filter("id", vec![owner.clone()])
            .build();
        ctx.execute(&sql, &params)?;
        Ok(())
    }

    /// Point the foreign keys of the rows `ids` at the owner.
    fn attach<S: BackingStore>(&self, ctx: &mut Context<S>, owner: &Value, ids: Vec<Value>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let (sql, params) = Update::new(&self.relation.model_table)
            .set(&self.relation.fk_column(), owner.clone())
            .filter("id", ids)
            .build();
        ctx.execute(&sql, &params)?;
        Ok(())
    }

    /// Null every foreign key pointing at the owner.
    fn detach_all<S: BackingStore>(&self, ctx: &mut Context<S>, owner: &Value) -> Result<()> {
        let column = self.relation.fk_column();
        let (sql, params) = Update::new(&self.relation.model_table)
            .set(&column, Value::Null)
            .filter(&column, vec![owner.clone()])
            .build();
        ctx.execute(&sql, &params)?;
        Ok(())
    }
    fn unlink_all<S: BackingStore>(&self, ctx: &mut Context<S>, owner: &Value) -> Result<()> {
        let (sql, params) = Delete::new(self.link_table()?)
            .filter(self.owner_column(), vec![owner.clone()])
            .build();
        ctx.execute(&sql, &params)?;
        Ok(())
    }

    /// Insert linker rows for `ids` that are not linked yet.
    fn link<S: BackingStore>(&self, ctx: &mut Context<S>, owner: &Value, ids: Vec<Value>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let table = self.link_table()?;
        let owner_column = self.owner_column();
        let target_column = self.target_column();

        let existing: Vec<Value> = ctx
            .query_rows(
                &format!("SELECT {} FROM {} WHERE {} = ?", target_column, table, owner_column),
                std::slice::from_ref(owner),
            )?
            .into_iter()
            .filter_map(|row| row.into_values().into_iter().next())
            .collect();

        let mut fresh: Vec<Value> = Vec::with_capacity(ids.len());
        for id in ids {
            if !existing.iter().chain(fresh.iter()).any(|e| e.same_as(&id)) {
                fresh.push(id);
            }
        }
        if fresh.is_empty() {
            return Ok(());
        }

        let (sql, _) = Insert::new(&table)
            .value(&owner_column, Value::Null)
            .value(&target_column, Value::Null)
            .build();
        let param_sets: Vec<Vec<Value>> = fresh.into_iter().map(|id| vec![owner.clone(), id]).collect();
        let inserted = ctx.execute_many(&sql, &param_sets)?;
        tracing::trace!(table = %table, inserted, "Inserted linker rows");
        Ok(())
    }
}
