//! Join-path resolution.
//!
//! A filter or selector path such as `brand__manufacturer__name` walks the
//! relation graph one token at a time. Every relation step adds a join
//! (deduplicated by its full path); the terminal token names a field.

use crate::lookup::Lookup;
use heinzel_core::{
    Error, FieldInfo, ModelSchema, Registry, Relation, RelationMode, Result, UsageErrorKind,
};

/// One relation step, rendered as one or two `LEFT OUTER JOIN`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    /// Join this step starts from, `None` for the base table
    pub parent: Option<usize>,
    /// Index of the relation in the registry
    pub relation: usize,
    /// Identifier followed from the source model
    pub identifier: String,
    /// Alias of the source table
    pub source_alias: String,
    /// Alias of the reached table
    pub alias: String,
    pub table: String,
    /// Alias of the linker table for M2M and O2O steps
    pub link_alias: Option<String>,
    pub link_table: Option<String>,
    /// Identifier of the opposite direction
    pub other_identifier: String,
    /// FK column when the step crosses a foreign key, owned by whichever
    /// side declares it
    pub fk: Option<ForeignKeySide>,
    /// One source row may match several reached rows
    pub to_many: bool,
}

/// Which side of a foreign-key step holds the column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForeignKeySide {
    /// `source.{column} = reached.id`
    Source(String),
    /// `reached.{column} = source.id`
    Target(String),
}

impl Join {
    fn new(parent: Option<usize>, relation_idx: usize, relation: &Relation, identifier: &str, source_alias: &str, n: usize) -> Self {
        let table = relation.target_table(identifier).to_string();
        let alias = format!("{}_{}", table, n);
        let other_identifier = relation.other_identifier(identifier).to_string();

        let to_many = match relation.mode {
            RelationMode::ForeignKey => relation.is_reverse_by_identifier(identifier),
            RelationMode::ManyToMany => true,
            RelationMode::OneToOne => false,
        };
        let (link_alias, link_table, fk) = match relation.mode {
            RelationMode::ForeignKey => {
                let fk = if relation.is_reverse_by_identifier(identifier) {
                    ForeignKeySide::Target(relation.fk_column())
                } else {
                    ForeignKeySide::Source(relation.fk_column())
                };
                (None, None, Some(fk))
            }
            RelationMode::ManyToMany | RelationMode::OneToOne => {
                (Some(format!("link_{}", n)), relation.link_table(), None)
            }
        };

        Self {
            parent,
            relation: relation_idx,
            identifier: identifier.to_string(),
            source_alias: source_alias.to_string(),
            alias,
            table,
            link_alias,
            link_table,
            other_identifier,
            fk,
            to_many,
        }
    }

    /// SQL for this step.
    pub fn to_sql(&self) -> String {
        if let Some(fk) = &self.fk {
            let on = match fk {
                ForeignKeySide::Source(col) => {
                    format!("{}.{} = {}.id", self.source_alias, col, self.alias)
                }
                ForeignKeySide::Target(col) => {
                    format!("{}.{} = {}.id", self.alias, col, self.source_alias)
                }
            };
            return format!("LEFT OUTER JOIN {} AS {} ON {}", self.table, self.alias, on);
        }

        let link = self.link_alias.as_deref().unwrap_or("link");
        let link_table = self.link_table.as_deref().unwrap_or_default();
        format!(
            "LEFT OUTER JOIN {lt} AS {l} ON {l}.{other}_id = {src}.id \
             LEFT OUTER JOIN {t} AS {a} ON {l}.{ident}_id = {a}.id",
            lt = link_table,
            l = link,
            other = self.other_identifier,
            src = self.source_alias,
            t = self.table,
            a = self.alias,
            ident = self.identifier,
        )
    }
}

/// Joins of one query, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinList {
    joins: Vec<Join>,
}

/// Where a path ends.
#[derive(Debug, Clone)]
pub struct ResolvedPath<'r> {
    /// Qualified column, `alias.column`
    pub column: String,
    pub field: &'r FieldInfo,
    pub model: &'r ModelSchema,
}

impl JoinList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Join> {
        self.joins.iter()
    }

    /// Can a base row appear more than once in the joined result?
    pub fn fans_out(&self) -> bool {
        self.joins.iter().any(|j| j.to_many)
    }

    /// Index of the join for this step, adding it if new.
    fn ensure(&mut self, parent: Option<usize>, relation_idx: usize, relation: &Relation, identifier: &str, source_alias: &str) -> usize {
        if let Some(idx) = self.joins.iter().position(|j| {
            j.parent == parent && j.relation == relation_idx && j.identifier == identifier
        }) {
            return idx;
        }
        let join = Join::new(parent, relation_idx, relation, identifier, source_alias, self.joins.len() + 1);
        tracing::trace!(
            table = %join.table,
            alias = %join.alias,
            identifier = %identifier,
            "Added join"
        );
        self.joins.push(join);
        self.joins.len() - 1
    }

    /// Walk `tokens` from `base`, adding joins for relation steps.
    ///
    /// A token that is both a relation and a field (a forward FK) is
    /// followed as a relation unless it is the last token, in which case
    /// its column is used directly. A path made only of relations ends at
    /// the last model's primary key.
    pub fn resolve<'r>(&mut self, registry: &'r Registry, base: &'r ModelSchema, tokens: &[&str]) -> Result<ResolvedPath<'r>> {
        let mut model = base;
        let mut alias = base.table.clone();
        let mut parent = None;

        for (i, token) in tokens.iter().enumerate() {
            let last = i + 1 == tokens.len();
            let relation = registry.relation_by_identity(&model.name, token);

            if let Some(field) = model.field(token) {
                if last {
                    return Ok(ResolvedPath {
                        column: format!("{}.{}", alias, field.column_name),
                        field,
                        model,
                    });
                }
                if relation.is_none() {
                    return Err(Error::usage(
                        UsageErrorKind::UnknownName,
                        format!(
                            "'{}' is a field of model '{}' and cannot be followed by '{}'",
                            token,
                            model.name,
                            tokens[i + 1..].join("__")
                        ),
                    ));
                }
            }

            let Some((idx, rel)) = relation else {
                return Err(unknown_name(model, token));
            };
            let join = self.ensure(parent, idx, rel, token, &alias);
            model = registry.model(rel.target_model(token))?;
            alias = self.joins[join].alias.clone();
            parent = Some(join);
        }

        if tokens.is_empty() {
            return Err(unknown_name(model, ""));
        }

        let field = model.pk_field();
        Ok(ResolvedPath {
            column: format!("{}.{}", alias, field.column_name),
            field,
            model,
        })
    }

    /// Render all joins.
    pub fn to_sql(&self) -> String {
        self.joins
            .iter()
            .map(Join::to_sql)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn unknown_name(model: &ModelSchema, token: &str) -> Error {
    let hint = if Lookup::parse(token).is_some() {
        " (lookups must come last)"
    } else {
        ""
    };
    Error::usage(
        UsageErrorKind::UnknownName,
        format!(
            "'{}' is neither a field nor a relation of model '{}'{}",
            token, model.name, hint
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::registry;

    #[test]
    fn test_plain_field() {
        let reg = registry();
        let car = reg.model("Car").unwrap();
        let mut joins = JoinList::new();
        let path = joins.resolve(&reg, car, &["name"]).unwrap();
        assert_eq!(path.column, "cars.name");
        assert!(joins.is_empty());
    }

    #[test]
    fn test_fk_field_without_join() {
        let reg = registry();
        let car = reg.model("Car").unwrap();
        let mut joins = JoinList::new();
        let path = joins.resolve(&reg, car, &["brand"]).unwrap();
        assert_eq!(path.column, "cars.brand_id");
        assert!(joins.is_empty());
    }

    #[test]
    fn test_forward_chain_dedups() {
        let reg = registry();
        let car = reg.model("Car").unwrap();
        let mut joins = JoinList::new();
        let a = joins.resolve(&reg, car, &["brand", "manufacturer", "name"]).unwrap();
        let b = joins.resolve(&reg, car, &["brand", "name"]).unwrap();
        assert_eq!(a.column, "manufacturers_2.name");
        assert_eq!(b.column, "brands_1.name");
        assert_eq!(joins.len(), 2);
        assert_eq!(
            joins.to_sql(),
            "LEFT OUTER JOIN brands AS brands_1 ON cars.brand_id = brands_1.id \
             LEFT OUTER JOIN manufacturers AS manufacturers_2 ON brands_1.manufacturer_id = manufacturers_2.id"
        );
    }

    #[test]
    fn test_reverse_fk_ends_at_pk() {
        let reg = registry();
        let brand = reg.model("Brand").unwrap();
        let mut joins = JoinList::new();
        let path = joins.resolve(&reg, brand, &["car_set"]).unwrap();
        assert_eq!(path.column, "cars_1.id");
        assert_eq!(
            joins.to_sql(),
            "LEFT OUTER JOIN cars AS cars_1 ON cars_1.brand_id = brands.id"
        );
    }

    #[test]
    fn test_m2m_goes_through_linker() {
        let reg = registry();
        let car = reg.model("Car").unwrap();
        let mut joins = JoinList::new();
        let path = joins.resolve(&reg, car, &["actor_set", "name"]).unwrap();
        assert_eq!(path.column, "actors_1.name");
        assert_eq!(
            joins.to_sql(),
            "LEFT OUTER JOIN m2m__actors__acted_in__cars AS link_1 ON link_1.acted_in_id = cars.id \
             LEFT OUTER JOIN actors AS actors_1 ON link_1.actor_set_id = actors_1.id"
        );
    }

    #[test]
    fn test_unknown_token() {
        let reg = registry();
        let car = reg.model("Car").unwrap();
        let mut joins = JoinList::new();
        let err = joins.resolve(&reg, car, &["colour"]).unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::UnknownName));
        let err = joins.resolve(&reg, car, &["name", "brand"]).unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::UnknownName));
    }
}
