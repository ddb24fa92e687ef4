//! SELECT query.
//!
//! [`SelectQuery`] is a plain value: every builder method consumes the query
//! and returns the modified one, so branching a query is a `clone()`.
//! Filter values and paths are validated when they are added, not when the
//! query runs.

use crate::join::JoinList;
use crate::lookup::{Lookup, lex};
use crate::q::{Condition, Node, Q};
use heinzel_core::{Error, ModelSchema, Registry, Result, UsageErrorKind, Value};
use std::fmt;

/// A resolved filter leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub lookup: Lookup,
    pub values: Vec<Value>,
}

impl Predicate {
    fn render(&self, params: &mut Vec<Value>) -> String {
        if self.lookup == Lookup::Exact && self.values.first().is_some_and(Value::is_null) {
            return format!("{} IS NULL", self.column);
        }
        params.extend(self.values.iter().cloned());
        self.lookup.render(&self.column, self.values.len())
    }
}

/// SQL aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    Max,
    Min,
    Count,
    Avg,
    Sum,
}

impl Aggregate {
    pub const fn sql_name(&self) -> &'static str {
        match self {
            Aggregate::Max => "MAX",
            Aggregate::Min => "MIN",
            Aggregate::Count => "COUNT",
            Aggregate::Avg => "AVG",
            Aggregate::Sum => "SUM",
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Aggregate::Max => "Max",
            Aggregate::Min => "Min",
            Aggregate::Count => "Count",
            Aggregate::Avg => "Avg",
            Aggregate::Sum => "Sum",
        };
        f.write_str(name)
    }
}

/// A requested output column: a field path, optionally aggregated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub path: String,
    pub function: Option<Aggregate>,
    pub alias: Option<String>,
}

impl Selector {
    pub fn field(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            function: None,
            alias: None,
        }
    }

    pub fn aggregate(function: Aggregate, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            function: Some(function),
            alias: None,
        }
    }

    pub fn max(path: impl Into<String>) -> Self {
        Self::aggregate(Aggregate::Max, path)
    }

    pub fn min(path: impl Into<String>) -> Self {
        Self::aggregate(Aggregate::Min, path)
    }

    pub fn count(path: impl Into<String>) -> Self {
        Self::aggregate(Aggregate::Count, path)
    }

    pub fn avg(path: impl Into<String>) -> Self {
        Self::aggregate(Aggregate::Avg, path)
    }

    pub fn sum(path: impl Into<String>) -> Self {
        Self::aggregate(Aggregate::Sum, path)
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Output name: the explicit alias, `{Func}__{path}` or the path.
    pub fn output_name(&self) -> String {
        match (&self.alias, self.function) {
            (Some(alias), _) => alias.clone(),
            (None, Some(func)) => format!("{}__{}", func, self.path),
            (None, None) => self.path.clone(),
        }
    }
}

impl From<&str> for Selector {
    fn from(path: &str) -> Self {
        Selector::field(path)
    }
}

/// Selector bound to a column.
#[derive(Debug, Clone, PartialEq)]
struct Selected {
    expr: String,
    /// Bare column name, when `expr` is a plain column
    column: Option<String>,
    alias: String,
    aggregate: bool,
}

impl Selected {
    fn to_sql(&self) -> String {
        if self.column.as_deref() == Some(self.alias.as_str()) {
            self.expr.clone()
        } else {
            format!("{} AS \"{}\"", self.expr, self.alias)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OrderTerm {
    column: String,
    descending: bool,
}

/// LIMIT/OFFSET. A missing count means no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limit {
    pub count: Option<u64>,
    pub offset: u64,
}

/// SELECT over one model.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    model: String,
    table: String,
    pk_column: String,
    columns: Vec<String>,
    selection: Vec<Selected>,
    annotations: Vec<Selected>,
    where_clause: Node<Predicate>,
    order_by: Vec<OrderTerm>,
    limit: Option<Limit>,
    joins: JoinList,
    distinct: bool,
}

impl SelectQuery {
    /// Unfiltered query over every storage column of `schema`.
    pub fn new(schema: &ModelSchema) -> Self {
        Self {
            model: schema.name.clone(),
            table: schema.table.clone(),
            pk_column: schema.pk_column().to_string(),
            columns: schema.columns().to_vec(),
            selection: Vec::new(),
            annotations: Vec::new(),
            where_clause: Node::default(),
            order_by: Vec::new(),
            limit: None,
            joins: JoinList::new(),
            distinct: false,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn schema<'r>(&self, registry: &'r Registry) -> Result<&'r ModelSchema> {
        registry.model(&self.model)
    }

    fn resolve_condition(&mut self, registry: &Registry, condition: Condition) -> Result<Predicate> {
        let schema = self.schema(registry)?;
        let (tokens, lookup) = lex(&condition.path);
        let path = self.joins.resolve(registry, schema, &tokens)?;
        let values = lookup.prepare(&condition.path, path.field, condition.values)?;
        Ok(Predicate {
            column: path.column,
            lookup,
            values,
        })
    }

    fn add_filter(mut self, registry: &Registry, qs: impl IntoIterator<Item = Q>, negate: bool) -> Result<Self> {
        for q in qs {
            let q = if negate { !q } else { q };
            let resolved = q.try_map(&mut |c| self.resolve_condition(registry, c))?;
            self.where_clause = std::mem::take(&mut self.where_clause) & resolved;
        }
        Ok(self)
    }

    /// AND the given predicates onto the WHERE clause.
    pub fn filter(self, registry: &Registry, qs: impl IntoIterator<Item = Q>) -> Result<Self> {
        self.add_filter(registry, qs, false)
    }

    /// AND the negation of each predicate onto the WHERE clause.
    pub fn exclude(self, registry: &Registry, qs: impl IntoIterator<Item = Q>) -> Result<Self> {
        self.add_filter(registry, qs, true)
    }

    /// Order by field paths; `-` prefixes descending.
    ///
    /// Naming a column that is already ordered toggles its direction. An
    /// empty list clears the ordering.
    pub fn order_by(mut self, registry: &Registry, fields: &[&str]) -> Result<Self> {
        if fields.is_empty() {
            self.order_by.clear();
            return Ok(self);
        }
        let schema = self.schema(registry)?;
        for token in fields {
            let (descending, path) = match token.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, *token),
            };
            let tokens: Vec<&str> = path.split("__").collect();
            let column = self.joins.resolve(registry, schema, &tokens)?.column;
            if let Some(term) = self.order_by.iter_mut().find(|t| t.column == column) {
                term.descending = !term.descending;
            } else {
                self.order_by.push(OrderTerm { column, descending });
            }
        }
        Ok(self)
    }

    /// Set LIMIT and OFFSET, replacing earlier values.
    pub fn limit(mut self, count: Option<u64>, offset: Option<u64>) -> Self {
        self.limit = Some(Limit {
            count,
            offset: offset.unwrap_or(0),
        });
        self
    }

    pub fn distinct(mut self, on: bool) -> Self {
        self.distinct = on;
        self
    }

    fn resolve_selector(&mut self, registry: &Registry, selector: &Selector) -> Result<Selected> {
        let schema = self.schema(registry)?;
        let tokens: Vec<&str> = selector.path.split("__").collect();
        let path = self.joins.resolve(registry, schema, &tokens)?;
        let alias = selector.output_name();
        Ok(match selector.function {
            Some(func) => Selected {
                expr: format!("{}({})", func.sql_name(), path.column),
                column: None,
                alias,
                aggregate: true,
            },
            None => Selected {
                column: Some(path.field.column_name.clone()),
                expr: path.column,
                alias,
                aggregate: false,
            },
        })
    }

    /// Select these columns instead of the model's storage columns.
    pub fn select(mut self, registry: &Registry, selectors: &[Selector]) -> Result<Self> {
        let mut selection = Vec::with_capacity(selectors.len());
        for selector in selectors {
            selection.push(self.resolve_selector(registry, selector)?);
        }
        self.selection = selection;
        Ok(self)
    }

    /// Add output columns after the selection. Aggregates group by the
    /// primary key.
    pub fn annotate(mut self, registry: &Registry, selectors: &[Selector]) -> Result<Self> {
        for selector in selectors {
            let selected = self.resolve_selector(registry, selector)?;
            self.annotations.push(selected);
        }
        Ok(self)
    }

    /// `SELECT COUNT(column)` with this query's filters, ordering and
    /// limit dropped.
    ///
    /// Counting rows through a to-many join counts each base row once.
    pub fn count(mut self, registry: &Registry, column: Option<&str>) -> Result<Self> {
        self.selection.clear();
        self.annotations.clear();
        self.order_by.clear();
        self.limit = None;
        let selector = Selector::count(column.unwrap_or("pk")).alias("count");
        let mut query = self.select(registry, &[selector])?;
        if column.is_none() && query.joins.fans_out() {
            let pk = format!("{}.{}", query.table, query.pk_column);
            if let Some(selected) = query.selection.first_mut() {
                selected.expr = format!("COUNT(DISTINCT {})", pk);
            }
        }
        Ok(query)
    }

    /// Does this query return model instances (no explicit selection)?
    pub fn selects_instances(&self) -> bool {
        self.selection.is_empty()
    }

    /// Output column names in order.
    pub fn output_names(&self) -> Vec<String> {
        let base = if self.selection.is_empty() {
            self.columns.clone()
        } else {
            self.selection.iter().map(|s| s.alias.clone()).collect()
        };
        base.into_iter()
            .chain(self.annotations.iter().map(|s| s.alias.clone()))
            .collect()
    }

    /// Names of the annotation columns.
    pub fn annotation_names(&self) -> Vec<String> {
        self.annotations.iter().map(|s| s.alias.clone()).collect()
    }

    /// Rendered WHERE condition without the keyword, and its parameters.
    pub fn where_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.where_clause.render(&mut |p: &Predicate| p.render(&mut params));
        (sql, params)
    }

    /// Build the statement and its parameters.
    pub fn build(&self) -> (String, Vec<Value>) {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }

        let mut columns: Vec<String> = if self.selection.is_empty() {
            self.columns
                .iter()
                .map(|c| format!("{}.{}", self.table, c))
                .collect()
        } else {
            self.selection.iter().map(Selected::to_sql).collect()
        };
        columns.extend(self.annotations.iter().map(Selected::to_sql));
        sql.push_str(&columns.join(", "));

        sql.push_str(" FROM ");
        sql.push_str(&self.table);

        if !self.joins.is_empty() {
            sql.push(' ');
            sql.push_str(&self.joins.to_sql());
        }

        let (where_sql, params) = self.where_sql();
        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        let pk = format!("{}.{}", self.table, self.pk_column);
        let fanned_instances = self.selection.is_empty() && self.joins.fans_out();
        if fanned_instances || self.annotations.iter().any(|a| a.aggregate) {
            sql.push_str(" GROUP BY ");
            sql.push_str(&pk);
        }

        let only_aggregates =
            !self.selection.is_empty() && self.selection.iter().all(|s| s.aggregate);
        if !self.order_by.is_empty() {
            let terms: Vec<String> = self
                .order_by
                .iter()
                .map(|t| format!("{} {}", t.column, if t.descending { "DESC" } else { "ASC" }))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        } else if !only_aggregates {
            sql.push_str(" ORDER BY ");
            sql.push_str(&pk);
            sql.push_str(" ASC");
        }

        if let Some(limit) = self.limit {
            let count = limit.count.map_or(-1, |c| i64::try_from(c).unwrap_or(i64::MAX));
            sql.push_str(&format!(" LIMIT {} OFFSET {}", count, limit.offset));
        }

        tracing::trace!(sql = %sql, params = params.len(), "Built SELECT");
        (sql, params)
    }
}

/// Reject an empty selector list early.
pub fn require_selectors(selectors: &[Selector]) -> Result<()> {
    if selectors.is_empty() {
        return Err(Error::usage(
            UsageErrorKind::Cardinality,
            "at least one selector is required",
        ));
    }
    Ok(())
}
