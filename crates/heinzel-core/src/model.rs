//! Model schema descriptions.
//!
//! Models are described at registration time with [`ModelSchema::builder`]
//! instead of being derived from Rust types: the identity map works with
//! dynamically-typed instances, so the schema is plain data.
//!
//! ```ignore
//! let car = ModelSchema::builder("Car")
//!     .field(FieldInfo::text("name").max_length(100))
//!     .relation(RelationField::foreign_key("brand", "Brand"))
//!     .build()?;
//! ```

use crate::Result;
use crate::error::Error;
use crate::field::{FieldInfo, ReferentialAction};
use crate::relationship::RelationMode;
use std::collections::{HashMap, HashSet};

/// Declaration of a relation on the owning model.
#[derive(Debug, Clone)]
pub struct RelationField {
    /// Name of the relation on the owning model
    pub identifier: String,
    /// Name of the related model; resolved when the registry is built
    pub related_model: String,
    /// Name of the reverse relation on the related model
    pub related_name: Option<String>,
    pub mode: RelationMode,
    pub on_delete: ReferentialAction,
}

impl RelationField {
    fn new(identifier: impl Into<String>, related_model: impl Into<String>, mode: RelationMode) -> Self {
        Self {
            identifier: identifier.into(),
            related_model: related_model.into(),
            related_name: None,
            mode,
            on_delete: ReferentialAction::default(),
        }
    }

    /// Many-to-one relation stored as `{identifier}_id` on the owning table.
    pub fn foreign_key(identifier: impl Into<String>, related_model: impl Into<String>) -> Self {
        Self::new(identifier, related_model, RelationMode::ForeignKey)
    }

    pub fn many_to_many(identifier: impl Into<String>, related_model: impl Into<String>) -> Self {
        Self::new(identifier, related_model, RelationMode::ManyToMany)
    }

    pub fn one_to_one(identifier: impl Into<String>, related_model: impl Into<String>) -> Self {
        Self::new(identifier, related_model, RelationMode::OneToOne)
    }

    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        self.related_name = Some(name.into());
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }
}

/// Per-model column metadata, computed once at build time.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Name of the primary-key field
    pub pk_name: String,
    /// Column of the primary-key field
    pub pk_column: String,
    /// Logical field name to column, including the `"pk"` alias
    pub field_to_column: HashMap<String, String>,
    /// Storage columns in declaration order
    pub columns: Vec<String>,
}

impl ModelInfo {
    /// Resolve a field name, column name or `"pk"` to a storage column.
    pub fn column_for(&self, name: &str) -> Option<&str> {
        if let Some(col) = self.field_to_column.get(name) {
            return Some(col);
        }
        self.columns.iter().find(|c| *c == name).map(String::as_str)
    }
}

/// Complete description of one model.
#[derive(Debug, Clone)]
pub struct ModelSchema {
    pub name: String,
    pub table: String,
    pub fields: Vec<FieldInfo>,
    pub relations: Vec<RelationField>,
    pub info: ModelInfo,
}

impl ModelSchema {
    pub fn builder(name: impl Into<String>) -> ModelSchemaBuilder {
        ModelSchemaBuilder {
            name: name.into(),
            table: None,
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Look up a field by logical name, `"pk"` or column name.
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        let column = self.info.column_for(name)?;
        self.field_by_column(column)
    }

    pub fn field_by_column(&self, column: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.column_name == column)
    }

    pub fn pk_field(&self) -> &FieldInfo {
        self.field_by_column(&self.info.pk_column)
            .unwrap_or(&self.fields[0])
    }

    pub fn pk_column(&self) -> &str {
        &self.info.pk_column
    }

    pub fn columns(&self) -> &[String] {
        &self.info.columns
    }

    /// Declared relation with the given identifier.
    pub fn relation(&self, identifier: &str) -> Option<&RelationField> {
        self.relations.iter().find(|r| r.identifier == identifier)
    }
}

#[derive(Debug)]
pub struct ModelSchemaBuilder {
    name: String,
    table: Option<String>,
    fields: Vec<FieldInfo>,
    relations: Vec<RelationField>,
}

impl ModelSchemaBuilder {
    /// Override the table name (default: lowercase model name plus `s`).
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relation(mut self, relation: RelationField) -> Self {
        self.relations.push(relation);
        self
    }

    /// Validate the declaration and compute [`ModelInfo`].
    ///
    /// Adds an implicit auto-increment `id` column when the model lacks one
    /// and a `{identifier}_id` column per foreign key.
    pub fn build(self) -> Result<ModelSchema> {
        let ModelSchemaBuilder {
            name,
            table,
            mut fields,
            relations,
        } = self;

        let pk_count = fields.iter().filter(|f| f.primary_key).count();
        if pk_count > 1 {
            return Err(Error::config(format!(
                "model '{}' declares {} primary keys, expected at most one",
                name, pk_count
            )));
        }

        if !fields.iter().any(|f| f.column_name == "id") {
            let mut id = FieldInfo::integer("id").auto_increment();
            if pk_count == 0 {
                id = id.primary_key();
            }
            fields.insert(0, id);
        }

        for rel in &relations {
            if rel.identifier.is_empty() {
                return Err(Error::config(format!(
                    "model '{}' declares a relation without identifier",
                    name
                )));
            }
            if rel.mode == RelationMode::ForeignKey {
                fields.push(FieldInfo::integer(&rel.identifier).column(format!("{}_id", rel.identifier)));
            }
        }

        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        for f in &fields {
            if !names.insert(f.name.as_str()) || !columns.insert(f.column_name.as_str()) {
                return Err(Error::config(format!(
                    "model '{}' declares field '{}' twice",
                    name, f.name
                )));
            }
        }
        for rel in &relations {
            if rel.mode != RelationMode::ForeignKey && names.contains(rel.identifier.as_str()) {
                return Err(Error::config(format!(
                    "relation '{}' on model '{}' clashes with a field",
                    rel.identifier, name
                )));
            }
        }

        let Some(pk) = fields.iter().find(|f| f.primary_key) else {
            return Err(Error::config(format!("model '{}' has no primary key", name)));
        };
        let pk_name = pk.name.clone();
        let pk_column = pk.column_name.clone();

        let mut field_to_column: HashMap<String, String> = fields
            .iter()
            .map(|f| (f.name.clone(), f.column_name.clone()))
            .collect();
        field_to_column.insert("pk".to_string(), pk_column.clone());

        let info = ModelInfo {
            pk_name,
            pk_column,
            field_to_column,
            columns: fields.iter().map(|f| f.column_name.clone()).collect(),
        };

        let table = table.unwrap_or_else(|| format!("{}s", name.to_lowercase()));

        Ok(ModelSchema {
            name,
            table,
            fields,
            relations,
            info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implicit_id() {
        let schema = ModelSchema::builder("Brand")
            .field(FieldInfo::text("name").unique())
            .build()
            .unwrap();
        assert_eq!(schema.table, "brands");
        assert_eq!(schema.info.pk_name, "id");
        assert_eq!(schema.columns(), &["id".to_string(), "name".to_string()]);
        assert_eq!(schema.info.column_for("pk"), Some("id"));
    }

    #[test]
    fn test_foreign_key_column() {
        let schema = ModelSchema::builder("Car")
            .field(FieldInfo::text("name"))
            .relation(RelationField::foreign_key("brand", "Brand"))
            .build()
            .unwrap();
        assert_eq!(schema.info.column_for("brand"), Some("brand_id"));
        assert_eq!(schema.info.column_for("brand_id"), Some("brand_id"));
        assert_eq!(schema.columns().last().map(String::as_str), Some("brand_id"));
    }

    #[test]
    fn test_custom_pk_keeps_id() {
        let schema = ModelSchema::builder("Key")
            .field(FieldInfo::text("serial").primary_key())
            .build()
            .unwrap();
        assert_eq!(schema.info.pk_column, "serial");
        assert_eq!(schema.info.column_for("pk"), Some("serial"));
        assert!(schema.field("id").is_some_and(|f| f.auto_increment && !f.primary_key));
    }

    #[test]
    fn test_two_primary_keys_rejected() {
        let err = ModelSchema::builder("Bad")
            .field(FieldInfo::integer("a").primary_key())
            .field(FieldInfo::integer("b").primary_key())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = ModelSchema::builder("Bad")
            .field(FieldInfo::text("name"))
            .field(FieldInfo::text("name"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
