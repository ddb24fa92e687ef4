//! Model and relation registry.
//!
//! Schemas are collected in a [`RegistryBuilder`] and resolved together, so
//! relations may name models registered after them.

use crate::Result;
use crate::config::Config;
use crate::error::{Error, UsageErrorKind};
use crate::model::ModelSchema;
use crate::relationship::{Relation, RelationMode};
use std::collections::HashMap;

/// Collects model schemas before resolution.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    schemas: Vec<ModelSchema>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, schema: ModelSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Resolve relation targets and build the registry.
    pub fn build(self, config: &Config) -> Result<Registry> {
        config.validate()?;

        let mut by_name = HashMap::with_capacity(self.schemas.len());
        for (idx, schema) in self.schemas.iter().enumerate() {
            if by_name.insert(schema.name.clone(), idx).is_some() {
                return Err(Error::config(format!(
                    "model '{}' registered twice",
                    schema.name
                )));
            }
            if self.schemas[..idx].iter().any(|s| s.table == schema.table) {
                return Err(Error::config(format!(
                    "table '{}' of model '{}' is already used by another model",
                    schema.table, schema.name
                )));
            }
        }

        let mut relations: Vec<Relation> = Vec::new();
        for schema in &self.schemas {
            for field in &schema.relations {
                if field.related_model == schema.name {
                    return Err(Error::config(format!(
                        "Recursive relations not supported: model='{}', identifier='{}'",
                        schema.name, field.identifier
                    )));
                }
                let Some(&target_idx) = by_name.get(&field.related_model) else {
                    return Err(Error::config(format!(
                        "relation '{}' on model '{}' refers to unregistered model '{}'",
                        field.identifier, schema.name, field.related_model
                    )));
                };
                let target = &self.schemas[target_idx];

                let reverse_identifier = match (&field.related_name, field.mode) {
                    (Some(name), _) => name.clone(),
                    (None, RelationMode::OneToOne) => schema.name.to_lowercase(),
                    (None, _) => config.default_related_name(&schema.name),
                };

                let relation = Relation {
                    model: schema.name.clone(),
                    related_model: target.name.clone(),
                    identifier: field.identifier.clone(),
                    reverse_identifier,
                    mode: field.mode,
                    on_delete: field.on_delete,
                    model_table: schema.table.clone(),
                    related_table: target.table.clone(),
                };

                if target.info.field_to_column.contains_key(&relation.reverse_identifier) {
                    return Err(Error::config(format!(
                        "reverse relation '{}' clashes with a field of model '{}'",
                        relation.reverse_identifier, target.name
                    )));
                }
                let clash = relations.iter().any(|r| {
                    r.has_identity(&relation.model, &relation.identifier)
                        || r.has_identity(&relation.related_model, &relation.reverse_identifier)
                });
                if clash {
                    return Err(Error::config(format!(
                        "relation '{}' between '{}' and '{}' is already registered",
                        relation.identifier, relation.model, relation.related_model
                    )));
                }

                tracing::debug!(
                    model = %relation.model,
                    identifier = %relation.identifier,
                    related = %relation.related_model,
                    reverse = %relation.reverse_identifier,
                    mode = relation.mode.as_str(),
                    "Registered relation"
                );
                relations.push(relation);
            }
        }

        tracing::debug!(
            models = self.schemas.len(),
            relations = relations.len(),
            "Built model registry"
        );

        Ok(Registry {
            schemas: self.schemas,
            by_name,
            relations,
            config: config.clone(),
        })
    }
}

/// Resolved models and relations.
#[derive(Debug)]
pub struct Registry {
    schemas: Vec<ModelSchema>,
    by_name: HashMap<String, usize>,
    relations: Vec<Relation>,
    config: Config,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn get_model(&self, name: &str) -> Option<&ModelSchema> {
        self.by_name.get(name).map(|&idx| &self.schemas[idx])
    }

    /// Like [`Registry::get_model`], failing for unknown names.
    pub fn model(&self, name: &str) -> Result<&ModelSchema> {
        self.get_model(name).ok_or_else(|| {
            Error::usage(
                UsageErrorKind::UnknownName,
                format!("model '{}' is not registered", name),
            )
        })
    }

    /// Models in registration order.
    pub fn models(&self) -> impl Iterator<Item = &ModelSchema> {
        self.schemas.iter()
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// The relation reached through `identifier` on `model`, with its index.
    pub fn relation_by_identity(&self, model: &str, identifier: &str) -> Option<(usize, &Relation)> {
        self.relations
            .iter()
            .enumerate()
            .find(|(_, r)| r.has_identity(model, identifier))
    }

    pub fn relation(&self, index: usize) -> Option<&Relation> {
        self.relations.get(index)
    }

    /// Every relation touching `model`, paired with the identifier `model`
    /// uses for it.
    pub fn relations_for<'a>(&'a self, model: &'a str) -> impl Iterator<Item = (&'a str, &'a Relation)> + 'a {
        self.relations.iter().filter_map(move |r| {
            if r.model == model {
                Some((r.identifier.as_str(), r))
            } else if r.related_model == model {
                Some((r.reverse_identifier.as_str(), r))
            } else {
                None
            }
        })
    }
}
