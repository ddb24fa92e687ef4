//! Lazy, immutable query sets.
//!
//! A [`QuerySet`] only describes a SELECT; nothing touches the store until
//! one of the executing methods gets a [`Context`]. Builder methods return
//! a new query set and leave the receiver alone, so a base query can be
//! branched freely.

use crate::arena::InstanceId;
use crate::context::Context;
use heinzel_core::{BackingStore, Registry, Result, Row, Value};
use heinzel_query::{Q, SelectQuery, Selector, require_selectors};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct QuerySet {
    registry: Arc<Registry>,
    query: SelectQuery,
}

impl PartialEq for QuerySet {
    fn eq(&self, other: &Self) -> bool {
        self.query == other.query
    }
}

impl QuerySet {
    /// Unfiltered query over `model`.
    pub fn new(registry: Arc<Registry>, model: &str) -> Result<Self> {
        let query = SelectQuery::new(registry.model(model)?);
        Ok(Self { registry, query })
    }

    pub fn model(&self) -> &str {
        self.query.model()
    }

    pub fn query(&self) -> &SelectQuery {
        &self.query
    }

    /// The statement this query set would run.
    pub fn sql(&self) -> (String, Vec<Value>) {
        self.query.build()
    }

    fn with(&self, query: SelectQuery) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            query,
        }
    }

    /// Keep rows matching every given `Q`.
    pub fn filter(&self, qs: impl IntoIterator<Item = Q>) -> Result<Self> {
        Ok(self.with(self.query.clone().filter(&self.registry, qs)?))
    }

    /// Drop rows matching any given `Q`.
    pub fn exclude(&self, qs: impl IntoIterator<Item = Q>) -> Result<Self> {
        Ok(self.with(self.query.clone().exclude(&self.registry, qs)?))
    }

    /// Order by field paths; a leading `-` sorts descending. Naming a path
    /// that is already ordered flips its direction.
    pub fn order_by(&self, fields: &[&str]) -> Result<Self> {
        Ok(self.with(self.query.clone().order_by(&self.registry, fields)?))
    }

    pub fn limit(&self, count: Option<u64>, offset: Option<u64>) -> Self {
        self.with(self.query.clone().limit(count, offset))
    }

    pub fn distinct(&self, on: bool) -> Self {
        self.with(self.query.clone().distinct(on))
    }

    /// Add computed values that end up in each instance's extra values.
    pub fn annotate(&self, selectors: &[Selector]) -> Result<Self> {
        require_selectors(selectors)?;
        Ok(self.with(self.query.clone().annotate(&self.registry, selectors)?))
    }

    /// Run the query and stream materialized instances.
    pub fn iter<'c, S: BackingStore>(&self, ctx: &'c mut Context<S>) -> Result<Instances<'c, S>> {
        let rows = ctx.fetch(&self.query)?;
        Ok(Instances {
            ctx,
            model: self.query.model().to_string(),
            annotations: self.query.annotation_names(),
            rows: rows.into_iter(),
        })
    }

    /// Run the query and materialize every row.
    pub fn eval<S: BackingStore>(&self, ctx: &mut Context<S>) -> Result<Vec<InstanceId>> {
        self.iter(ctx)?.collect()
    }

    pub fn first<S: BackingStore>(&self, ctx: &mut Context<S>) -> Result<Option<InstanceId>> {
        self.limit(Some(1), None).iter(ctx)?.next().transpose()
    }

    /// `SELECT COUNT(pk)` under this query's filters.
    pub fn count<S: BackingStore>(&self, ctx: &mut Context<S>) -> Result<i64> {
        let query = self.query.clone().count(&self.registry, None)?;
        let rows = ctx.fetch(&query)?;
        Ok(rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(heinzel_core::Value::as_i64)
            .unwrap_or(0))
    }

    /// One row of aggregate values, keyed by each selector's output name.
    pub fn aggregate<S: BackingStore>(&self, ctx: &mut Context<S>, selectors: &[Selector]) -> Result<Row> {
        require_selectors(selectors)?;
        let query = self.query.clone().select(&self.registry, selectors)?;
        let names = query.output_names();
        let mut rows = ctx.fetch(&query)?;
        if rows.is_empty() {
            return Ok(Row::new(names.clone(), vec![Value::Null; names.len()]));
        }
        Ok(rows.swap_remove(0))
    }

    /// Plain rows of the selected values.
    pub fn select<S: BackingStore>(&self, ctx: &mut Context<S>, selectors: &[Selector]) -> Result<Vec<Row>> {
        require_selectors(selectors)?;
        let query = self.query.clone().select(&self.registry, selectors)?;
        ctx.fetch(&query)
    }

    /// Plain rows of every column (and annotation) instead of instances.
    pub fn as_dicts<S: BackingStore>(&self, ctx: &mut Context<S>) -> Result<Vec<Row>> {
        ctx.fetch(&self.query)
    }

    /// Run a hand-written SELECT and materialize its rows as instances of
    /// this query set's model. Rows must carry the primary key and `id`.
    pub fn raw<S: BackingStore>(&self, ctx: &mut Context<S>, sql: &str, params: &[Value]) -> Result<Vec<InstanceId>> {
        let rows = ctx.fetch_raw(sql, params)?;
        let model = self.query.model();
        rows.iter()
            .map(|row| ctx.materialize(model, row, &[]))
            .collect()
    }
}

/// Instances materialized one row at a time.
pub struct Instances<'c, S: BackingStore> {
    ctx: &'c mut Context<S>,
    model: String,
    annotations: Vec<String>,
    rows: std::vec::IntoIter<Row>,
}

impl<S: BackingStore> Iterator for Instances<'_, S> {
    type Item = Result<InstanceId>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(self.ctx.materialize(&self.model, &row, &self.annotations))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}
