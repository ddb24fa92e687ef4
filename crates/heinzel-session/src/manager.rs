//! Per-model entry point for queries and creation.

use crate::arena::InstanceId;
use crate::context::Context;
use crate::queryset::QuerySet;
use heinzel_core::{BackingStore, Error, LookupError, Registry, Result, Value};
use heinzel_query::Q;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Manager {
    model: String,
    base: QuerySet,
}

impl Manager {
    pub fn new(registry: Arc<Registry>, model: &str) -> Result<Self> {
        let base = QuerySet::new(registry, model)?;
        Ok(Self {
            model: base.model().to_string(),
            base,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn all(&self) -> QuerySet {
        self.base.clone()
    }

    pub fn filter(&self, qs: impl IntoIterator<Item = Q>) -> Result<QuerySet> {
        self.base.filter(qs)
    }

    pub fn exclude(&self, qs: impl IntoIterator<Item = Q>) -> Result<QuerySet> {
        self.base.exclude(qs)
    }

    /// The single instance matching `qs`.
    ///
    /// # Errors
    ///
    /// `DoesNotExist` when nothing matches and `MultipleEntries` when more
    /// than one row does. Both carry the rendered filter.
    pub fn get<S: BackingStore>(&self, ctx: &mut Context<S>, qs: impl IntoIterator<Item = Q>) -> Result<InstanceId> {
        let query = self.base.filter(qs)?.limit(Some(2), None);
        let found = query.eval(ctx)?;
        match found.as_slice() {
            [id] => Ok(*id),
            [] => Err(Error::DoesNotExist(self.lookup_error(&query))),
            _ => Err(Error::MultipleEntries(self.lookup_error(&query))),
        }
    }

    fn lookup_error(&self, query: &QuerySet) -> LookupError {
        let (filters, params) = query.query().where_sql();
        LookupError {
            model: self.model.clone(),
            filters,
            params,
        }
    }

    /// Instantiate and save.
    pub fn create<'a, S, I>(&self, ctx: &mut Context<S>, values: I) -> Result<InstanceId>
    where
        S: BackingStore,
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let id = ctx.instantiate(&self.model, values)?;
        ctx.save(id)?;
        Ok(id)
    }

    /// Fetch the instance with exactly these field values, creating it when
    /// absent. The flag is true when a new instance was created.
    pub fn get_or_create<S: BackingStore>(&self, ctx: &mut Context<S>, values: &[(&str, Value)]) -> Result<(InstanceId, bool)> {
        let q = values
            .iter()
            .map(|(name, value)| Q::new(*name, value.clone()))
            .fold(Q::default(), |acc, q| acc & q);
        match self.get(ctx, q) {
            Ok(id) => Ok((id, false)),
            Err(e) if e.is_does_not_exist() => {
                let id = self.create(ctx, values.iter().map(|(n, v)| (*n, v.clone())))?;
                tracing::debug!(model = %self.model, instance = %id, "Created missing instance");
                Ok((id, true))
            }
            Err(e) => Err(e),
        }
    }

    pub fn count<S: BackingStore>(&self, ctx: &mut Context<S>) -> Result<i64> {
        self.base.count(ctx)
    }
}
