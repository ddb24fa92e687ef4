//! The context owning the identity map.
//!
//! A [`Context`] ties together one backing store, the shared model
//! [`Registry`] and a [`Storage`]. Every instance operation goes through
//! it, so a context is the unit of identity: the same primary key
//! materializes as the same [`InstanceId`] within one context.
//!
//! # Example
//!
//! ```ignore
//! let mut ctx = Context::new(conn, registry)?;
//! let vw = ctx.objects("Brand")?.create(&mut ctx, [("name", "VW".into())])?;
//! let golf = ctx.instantiate("Car", [("name", "Golf".into())])?;
//! ctx.related(golf, "brand")?.set(&mut ctx, &[vw])?;
//! ```

use crate::arena::InstanceId;
use crate::hooks::{ModelEvent, Observer, RelationEvent};
use crate::info::{InstanceInfo, Meta};
use crate::manager::Manager;
use crate::queryset::QuerySet;
use crate::relations::RelatedManager;
use crate::storage::Storage;
use heinzel_core::{
    BackingStore, ColumnInfo, Error, ModelSchema, QueryError, QueryErrorKind, ReferentialAction,
    Registry, RelationMode, Result, Row, UsageErrorKind, Value,
};
use heinzel_query::{Delete, Insert, Q, SelectQuery, Update};
use std::sync::Arc;

pub struct Context<S: BackingStore> {
    store: S,
    registry: Arc<Registry>,
    storage: Storage,
    observers: Vec<Box<dyn Observer>>,
}

impl<S: BackingStore + std::fmt::Debug> std::fmt::Debug for Context<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("store", &self.store)
            .field("storage", &self.storage)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl<S: BackingStore> Context<S> {
    /// Create a context, checking that every model table, column and
    /// linker table exists in `store`.
    pub fn new(store: S, registry: Arc<Registry>) -> Result<Self> {
        for schema in registry.models() {
            let Some(columns) = store.table_columns(&schema.table)? else {
                return Err(Error::config(format!(
                    "table '{}' of model '{}' does not exist",
                    schema.table, schema.name
                )));
            };
            check_columns(&schema.table, &columns, schema.columns().iter().map(String::as_str))?;
        }

        for relation in registry.relations() {
            let Some(table) = relation.link_table() else {
                continue;
            };
            let Some(columns) = store.table_columns(&table)? else {
                return Err(Error::config(format!(
                    "linker table '{}' for relation '{}' of model '{}' does not exist",
                    table, relation.identifier, relation.model
                )));
            };
            let expected = [
                relation.link_column(&relation.identifier),
                relation.link_column(&relation.reverse_identifier),
            ];
            check_columns(&table, &columns, expected.iter().map(String::as_str))?;
        }

        tracing::debug!(
            models = registry.models().count(),
            max_cache = registry.config().max_cache,
            "Created context"
        );

        Ok(Self {
            storage: Storage::new(registry.config()),
            store,
            registry,
            observers: Vec::new(),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Register an observer for model and relation events.
    pub fn observe(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Manager for `model`.
    pub fn objects(&self, model: &str) -> Result<Manager> {
        Manager::new(Arc::clone(&self.registry), model)
    }

    /// Unfiltered query set over `model`.
    pub fn query(&self, model: &str) -> Result<QuerySet> {
        QuerySet::new(Arc::clone(&self.registry), model)
    }

    /// Manager for the relation `identifier` of instance `id`.
    pub fn related(&self, id: InstanceId, identifier: &str) -> Result<RelatedManager> {
        let model = &self.storage.get(id)?.model;
        RelatedManager::new(Arc::clone(&self.registry), id, model, identifier)
    }

    pub(crate) fn fire(&mut self, id: InstanceId, event: ModelEvent) -> Result<()> {
        self.storage.handle(id, &event)?;
        if !self.observers.is_empty() {
            let model = self.storage.get(id)?.model.clone();
            for observer in &mut self.observers {
                observer.on_model_event(&model, id, &event);
            }
        }
        Ok(())
    }

    pub(crate) fn fire_relation(&mut self, event: &RelationEvent) {
        tracing::trace!(
            model = %event.model,
            identifier = %event.identifier,
            action = %event.action,
            phase = ?event.phase,
            "Relation event"
        );
        for observer in &mut self.observers {
            observer.on_relation_event(event);
        }
    }

    /// Create a new unsaved instance of `model` with the given field values.
    #[tracing::instrument(level = "debug", skip(self, values))]
    pub fn instantiate<'a, I>(&mut self, model: &str, values: I) -> Result<InstanceId>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let registry = Arc::clone(&self.registry);
        let schema = registry.model(model)?;
        let mut info = InstanceInfo::new(schema, registry.config().force_sync);
        for (name, value) in values {
            let field = schema.field(name).ok_or_else(|| unknown_field(schema, name))?;
            info.values.insert(field.column_name.clone(), field.to_python(value)?);
        }

        let pk = info.pk();
        if !pk.is_null() {
            self.storage.check_identity(model, &pk)?;
        }

        let id = self.storage.insert(info);
        self.fire(id, ModelEvent::PreInit)?;
        self.fire(id, ModelEvent::PostInit)?;
        Ok(id)
    }

    pub fn model_of(&self, id: InstanceId) -> Result<&str> {
        Ok(&self.storage.get(id)?.model)
    }

    /// Value of a field (by field name, column name or `"pk"`) or of an
    /// annotation.
    pub fn get_field(&self, id: InstanceId, name: &str) -> Result<Value> {
        let info = self.storage.get(id)?;
        let schema = self.registry.model(&info.model)?;
        if let Some(field) = schema.field(name) {
            return Ok(info.get(&field.column_name));
        }
        info.extra
            .get(name)
            .cloned()
            .ok_or_else(|| unknown_field(schema, name))
    }

    /// Validate and assign a field value. Marks the instance dirty.
    #[tracing::instrument(level = "trace", skip(self, value))]
    pub fn set_field(&mut self, id: InstanceId, name: &str, value: impl Into<Value>) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let info = self.storage.get(id)?;
        let schema = registry.model(&info.model)?;
        let field = schema.field(name).ok_or_else(|| unknown_field(schema, name))?;
        let value = field.to_python(value.into())?;
        let column = field.column_name.clone();

        self.fire(id, ModelEvent::PreUpdate { field: field.name.clone() })?;

        let info = self.storage.get_mut(id)?;
        let old = info.values.insert(column.clone(), value).unwrap_or(Value::Null);
        if column == schema.pk_column() {
            if let Err(e) = self.storage.rekey(id, &old) {
                self.storage.get_mut(id)?.values.insert(column, old);
                return Err(e);
            }
        }

        self.fire(id, ModelEvent::PostUpdate { field: field.name.clone() })
    }

    pub fn pk(&self, id: InstanceId) -> Result<Value> {
        Ok(self.storage.get(id)?.pk())
    }

    pub fn meta(&self, id: InstanceId) -> Result<Meta> {
        Ok(self.storage.get(id)?.meta)
    }

    /// Whether re-queries overwrite this instance's values.
    pub fn set_force_sync(&mut self, id: InstanceId, on: bool) -> Result<()> {
        self.storage.get_mut(id)?.meta.force_sync = on;
        Ok(())
    }

    /// INSERT or UPDATE the instance and commit. On failure the
    /// transaction is rolled back and the instance keeps its state.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn save(&mut self, id: InstanceId) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let info = self.storage.get(id)?.clone();
        let schema = registry.model(&info.model)?;

        self.fire(id, ModelEvent::PreSave)?;

        let created = !info.is_saved();
        let inserted = self.atomically(|ctx| {
            let inserted = ctx.write_row(schema, &info)?;
            ctx.store.commit()?;
            Ok(inserted)
        })?;
        if let Some(row_id) = inserted {
            self.storage
                .get_mut(id)?
                .values
                .insert("id".to_string(), Value::BigInt(row_id));
        }

        tracing::debug!(model = %info.model, instance = %id, created, "Saved instance");
        self.fire(id, ModelEvent::PostSave { created })
    }

    /// INSERT an unsaved row, returning its new id, or UPDATE a saved one.
    fn write_row(&mut self, schema: &ModelSchema, info: &InstanceInfo) -> Result<Option<i64>> {
        if !info.is_saved() {
            let mut insert = Insert::new(&schema.table);
            for field in &schema.fields {
                let value = info.get(&field.column_name);
                if field.auto_increment && value.is_null() {
                    continue;
                }
                insert = insert.value(&field.column_name, value);
            }
            let (sql, params) = insert.build();
            let result = self.store.execute(&sql, &params)?;
            return Ok(Some(result.last_insert_id));
        }

        let mut update = Update::new(&schema.table);
        let mut any = false;
        for field in schema.fields.iter().filter(|f| f.column_name != "id") {
            update = update.set(&field.column_name, info.get(&field.column_name));
            any = true;
        }
        if any {
            let (sql, params) = update.filter("id", vec![info.row_id()]).build();
            self.store.execute(&sql, &params)?;
        }
        Ok(None)
    }

    /// Save every dirty instance, oldest first.
    pub fn flush(&mut self) -> Result<()> {
        let dirty = self.storage.dirty();
        if !dirty.is_empty() {
            tracing::debug!(count = dirty.len(), "Flushing dirty instances");
        }
        for id in dirty {
            if self.storage.contains(id) && self.storage.is_dirty(id) {
                self.save(id)?;
            }
        }
        Ok(())
    }

    /// DELETE the instance, applying the delete policy of every relation
    /// that points at it, and commit.
    ///
    /// Cascades run in the same transaction. If any statement fails,
    /// everything is rolled back and no held instance changes.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn delete(&mut self, id: InstanceId) -> Result<()> {
        let info = self.storage.get(id)?;
        if !info.is_saved() {
            return Err(Error::usage(
                UsageErrorKind::Unsaved,
                format!("cannot delete an unsaved {}", info.model),
            ));
        }
        self.flush()?;

        let mut deletion = Deletion::default();
        let result = self
            .delete_rows(id, &mut deletion)
            .and_then(|()| self.store.commit());
        if let Err(e) = result {
            self.rollback();
            for (touched, tracked) in deletion.touched {
                if let Ok(info) = self.storage.get_mut(touched) {
                    info.meta.track_changes = tracked;
                }
            }
            return Err(e);
        }

        for (model, column, target) in &deletion.nulled {
            self.null_references(model, column, target);
        }
        for (deleted_id, deleted) in deletion.deleted {
            self.fire(deleted_id, ModelEvent::PostDelete { deleted })?;
        }
        Ok(())
    }

    /// Issue the statements deleting `id` and whatever its relations
    /// require, recording the effects on held instances in `deletion`.
    fn delete_rows(&mut self, id: InstanceId, deletion: &mut Deletion) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let info = self.storage.get(id)?;
        let schema = registry.model(&info.model)?;
        let row_id = info.row_id();
        let tracked = info.meta.track_changes;

        self.fire(id, ModelEvent::PreDelete)?;
        deletion.touched.push((id, tracked));

        // Refuse before touching anything.
        for (identifier, relation) in registry.relations_for(&schema.name) {
            let restricted = matches!(
                relation.on_delete,
                ReferentialAction::Restrict | ReferentialAction::NoAction
            );
            if relation.mode == RelationMode::ForeignKey
                && relation.is_reverse_by_identifier(identifier)
                && restricted
            {
                let count = self
                    .query(&relation.model)?
                    .filter(Q::new(relation.identifier.clone(), row_id.clone()))?
                    .count(self)?;
                if count > 0 {
                    return Err(Error::Query(QueryError {
                        kind: QueryErrorKind::Sanity,
                        sql: None,
                        params: vec![row_id],
                        message: format!(
                            "cannot delete {} while {} {} row(s) reference it through '{}'",
                            schema.name, count, relation.model, relation.identifier
                        ),
                        source: None,
                    }));
                }
            }
        }

        for (identifier, relation) in registry.relations_for(&schema.name) {
            match relation.mode {
                RelationMode::ForeignKey if relation.is_reverse_by_identifier(identifier) => {
                    match relation.on_delete {
                        ReferentialAction::Cascade => {
                            let children = self
                                .query(&relation.model)?
                                .filter(Q::new(relation.identifier.clone(), row_id.clone()))?
                                .eval(self)?;
                            for child in children {
                                self.delete_rows(child, deletion)?;
                            }
                        }
                        ReferentialAction::SetNull => {
                            let column = relation.fk_column();
                            let (sql, params) = Update::new(&relation.model_table)
                                .set(&column, Value::Null)
                                .filter(&column, vec![row_id.clone()])
                                .build();
                            self.store.execute(&sql, &params)?;
                            deletion.nulled.push((relation.model.clone(), column, row_id.clone()));
                        }
                        ReferentialAction::Restrict | ReferentialAction::NoAction => {}
                    }
                }
                RelationMode::ForeignKey => {}
                RelationMode::ManyToMany | RelationMode::OneToOne => {
                    let Some(table) = relation.link_table() else {
                        continue;
                    };
                    let column = relation.link_column(relation.other_identifier(identifier));
                    let (sql, params) = Delete::new(table).filter(column, vec![row_id.clone()]).build();
                    self.store.execute(&sql, &params)?;
                }
            }
        }

        let (sql, params) = Delete::new(&schema.table)
            .filter("id", vec![row_id])
            .build();
        let result = self.store.execute(&sql, &params)?;

        let deleted = result.rows_affected > 0;
        tracing::debug!(model = %schema.name, instance = %id, deleted, "Deleted row");
        deletion.deleted.push((id, deleted));
        Ok(())
    }

    /// Put the instance back under cache management.
    pub fn do_cache(&mut self, id: InstanceId) -> Result<()> {
        self.fire(id, ModelEvent::DoCache)
    }

    /// Take the instance out of the identity map and the cache. It stays
    /// usable through its handle until released.
    pub fn do_not_cache(&mut self, id: InstanceId) -> Result<()> {
        self.fire(id, ModelEvent::DoNotCache)
    }

    /// Exempt the instance from `release_evicted` and from reloading while
    /// it is out of the cache.
    pub fn pin(&mut self, id: InstanceId) -> Result<()> {
        self.storage.pin(id)
    }

    pub fn unpin(&mut self, id: InstanceId) -> Result<()> {
        self.storage.unpin(id)
    }

    /// Free the instance's slot; `id` becomes stale.
    pub fn release(&mut self, id: InstanceId) -> Result<()> {
        self.storage.release(id)
    }

    /// Free the slots of instances the cache evicted that are neither dirty
    /// nor pinned. Handles to them become stale; their rows materialize as
    /// new instances next time. Returns how many were freed.
    pub fn release_evicted(&mut self) -> usize {
        self.storage.release_evicted()
    }

    pub fn is_alive(&self, id: InstanceId) -> bool {
        self.storage.is_alive(id)
    }

    pub fn is_cached(&self, id: InstanceId) -> bool {
        self.storage.is_cached(id)
    }

    pub fn is_dirty(&self, id: InstanceId) -> bool {
        self.storage.is_dirty(id)
    }

    /// Change the cache bound of this context.
    pub fn set_max_cache(&mut self, max: usize) {
        self.storage.set_max_cache(max);
    }

    /// Save dirty instances, then run `query`. Rows are keyed by the
    /// query's output names.
    pub(crate) fn fetch(&mut self, query: &SelectQuery) -> Result<Vec<Row>> {
        self.flush()?;
        let (sql, params) = query.build();
        let columns = Arc::new(ColumnInfo::new(query.output_names()));
        let rows = self.store.query(&sql, &params)?;
        Ok(rows
            .into_iter()
            .map(|row| Row::with_columns(Arc::clone(&columns), row.into_values()))
            .collect())
    }

    /// Save dirty instances, then run a hand-written statement.
    pub(crate) fn fetch_raw(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.flush()?;
        self.store.query(sql, params)
    }

    /// Reconcile one row of `model` with the identity map.
    pub(crate) fn materialize(&mut self, model: &str, row: &Row, annotations: &[String]) -> Result<InstanceId> {
        let registry = Arc::clone(&self.registry);
        let schema = registry.model(model)?;
        let pk_field = schema.pk_field();
        let pk = match row.get_by_name(&pk_field.column_name) {
            Some(value) => pk_field.coerce(value)?,
            None => return Err(missing_column(schema, &pk_field.column_name)),
        };
        if row.get_by_name("id").is_none() {
            return Err(missing_column(schema, "id"));
        }

        if let Some(id) = self.storage.lookup(model, &pk) {
            let reloaded = self.storage.take_evicted(id);
            let info = self.storage.get_mut(id)?;
            if reloaded {
                info.meta.was_reloaded = true;
            }
            let meta = info.meta;
            if meta.force_sync || meta.was_reloaded {
                read_row(schema, row, info)?;
                tracing::trace!(model, instance = %id, reloaded, "Synced live instance from row");
            }
            read_annotations(row, annotations, info);
            if meta.do_cache && !self.storage.is_cached(id) {
                self.storage.cache(id)?;
            } else {
                self.storage.touch(id);
            }
            return Ok(id);
        }

        let mut info = InstanceInfo::new(schema, registry.config().force_sync);
        read_row(schema, row, &mut info)?;
        read_annotations(row, annotations, &mut info);

        let id = self.storage.insert(info);
        self.fire(id, ModelEvent::PreInit)?;
        self.fire(id, ModelEvent::PostInit)?;
        if self.storage.get(id)?.meta.do_cache {
            self.storage.cache(id)?;
        }
        tracing::trace!(model, instance = %id, "Materialized instance");
        Ok(id)
    }

    pub(crate) fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(self.store.execute(sql, params)?.rows_affected)
    }

    pub(crate) fn execute_many(&mut self, sql: &str, param_sets: &[Vec<Value>]) -> Result<u64> {
        self.store.execute_many(sql, param_sets)
    }

    pub(crate) fn query_rows(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.store.query(sql, params)
    }

    pub(crate) fn commit(&mut self) -> Result<()> {
        self.store.commit()
    }

    fn rollback(&mut self) {
        match self.store.rollback() {
            Ok(()) => tracing::debug!("Rolled back failed write"),
            Err(e) => tracing::warn!(error = %e, "Rollback after failed write failed"),
        }
    }

    /// Run `op`, rolling the store back if it fails. The error of `op` is
    /// returned either way.
    pub(crate) fn atomically<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = op(self);
        if result.is_err() {
            self.rollback();
        }
        result
    }

    pub(crate) fn info(&self, id: InstanceId) -> Result<&InstanceInfo> {
        self.storage.get(id)
    }

    /// Write a column without firing update events.
    pub(crate) fn write_silently(&mut self, id: InstanceId, column: &str, value: Value) -> Result<()> {
        self.storage.get_mut(id)?.values.insert(column.to_string(), value);
        Ok(())
    }

    /// Null `column` on held instances of `model` whose value is `target`.
    pub(crate) fn null_references(&mut self, model: &str, column: &str, target: &Value) {
        for id in self.storage.instances_of(model) {
            if let Ok(info) = self.storage.get_mut(id) {
                if info.values.get(column).is_some_and(|v| v.same_as(target)) {
                    info.values.insert(column.to_string(), Value::Null);
                }
            }
        }
    }
}

/// Effects of one `delete` on held instances, applied after commit.
#[derive(Debug, Default)]
struct Deletion {
    /// Instances that saw `PreDelete`, with their previous `track_changes`
    touched: Vec<(InstanceId, bool)>,
    /// Deleted instances and whether their row was found
    deleted: Vec<(InstanceId, bool)>,
    /// (model, column, row id) of foreign keys set to NULL
    nulled: Vec<(String, String, Value)>,
}

fn check_columns<'a>(table: &str, present: &[String], expected: impl Iterator<Item = &'a str>) -> Result<()> {
    for column in expected {
        if !present.iter().any(|c| c == column) {
            return Err(Error::config(format!(
                "table '{}' has no column '{}'",
                table, column
            )));
        }
    }
    Ok(())
}

fn read_row(schema: &ModelSchema, row: &Row, info: &mut InstanceInfo) -> Result<()> {
    for field in &schema.fields {
        if let Some(value) = row.get_by_name(&field.column_name) {
            info.values.insert(field.column_name.clone(), field.coerce(value)?);
        }
    }
    Ok(())
}

fn read_annotations(row: &Row, annotations: &[String], info: &mut InstanceInfo) {
    for name in annotations {
        if let Some(value) = row.get_by_name(name) {
            info.extra.insert(name.clone(), value.clone());
        }
    }
}

fn unknown_field(schema: &ModelSchema, name: &str) -> Error {
    Error::usage(
        UsageErrorKind::UnknownName,
        format!("model '{}' has no field '{}'", schema.name, name),
    )
}

fn missing_column(schema: &ModelSchema, column: &str) -> Error {
    Error::usage(
        UsageErrorKind::UnknownName,
        format!(
            "rows of model '{}' must include column '{}'",
            schema.name, column
        ),
    )
}
