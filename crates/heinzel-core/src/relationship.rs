//! Relation metadata.
//!
//! A [`Relation`] is registered once per declared relation field and is
//! reachable from both of its models: by `identifier` from the owning model
//! and by `reverse_identifier` from the related model.

use crate::field::ReferentialAction;

/// Cardinality of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationMode {
    /// Many-to-one, stored as a column on the owning table.
    ForeignKey,
    /// Many-to-many through a linker table.
    ManyToMany,
    /// One-to-one through a linker table with unique columns on both sides.
    OneToOne,
}

impl RelationMode {
    /// Short name used in linker table names.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RelationMode::ForeignKey => "fk",
            RelationMode::ManyToMany => "m2m",
            RelationMode::OneToOne => "o2o",
        }
    }

    /// Does this mode keep its links in a separate table?
    pub const fn uses_linker(&self) -> bool {
        matches!(self, RelationMode::ManyToMany | RelationMode::OneToOne)
    }
}

/// A named bidirectional association between two models.
#[derive(Debug, Clone)]
pub struct Relation {
    /// Model that declares the relation
    pub model: String,
    pub related_model: String,
    /// Relation name on `model`
    pub identifier: String,
    /// Relation name on `related_model`
    pub reverse_identifier: String,
    pub mode: RelationMode,
    pub on_delete: ReferentialAction,
    pub model_table: String,
    pub related_table: String,
}

impl Relation {
    /// Is this the relation reached through `identifier` on `model`?
    pub fn has_identity(&self, model: &str, identifier: &str) -> bool {
        (self.model == model && self.identifier == identifier)
            || (self.related_model == model && self.reverse_identifier == identifier)
    }

    pub fn is_reverse_by_identifier(&self, identifier: &str) -> bool {
        identifier == self.reverse_identifier
    }

    /// The identifier naming the opposite direction.
    pub fn other_identifier(&self, identifier: &str) -> &str {
        if self.is_reverse_by_identifier(identifier) {
            &self.identifier
        } else {
            &self.reverse_identifier
        }
    }

    /// Model reached by following `identifier`.
    pub fn target_model(&self, identifier: &str) -> &str {
        if self.is_reverse_by_identifier(identifier) {
            &self.model
        } else {
            &self.related_model
        }
    }

    /// Table reached by following `identifier`.
    pub fn target_table(&self, identifier: &str) -> &str {
        if self.is_reverse_by_identifier(identifier) {
            &self.model_table
        } else {
            &self.related_table
        }
    }

    /// Table that `identifier` is followed from.
    pub fn source_table(&self, identifier: &str) -> &str {
        if self.is_reverse_by_identifier(identifier) {
            &self.related_table
        } else {
            &self.model_table
        }
    }

    /// Foreign-key column on the owning table.
    pub fn fk_column(&self) -> String {
        format!("{}_id", self.identifier)
    }

    /// Column in the linker table that points at the row reached via
    /// `identifier`.
    pub fn link_column(&self, identifier: &str) -> String {
        format!("{}_id", identifier)
    }

    /// Linker table name, for modes that use one.
    pub fn link_table(&self) -> Option<String> {
        self.mode.uses_linker().then(|| {
            format!(
                "{}__{}__{}__{}",
                self.mode.as_str(),
                self.model_table,
                self.identifier,
                self.related_table
            )
        })
    }
}

impl PartialEq for Relation {
    /// Equal when describing the same association from either side.
    fn eq(&self, other: &Self) -> bool {
        if self.mode != other.mode {
            return false;
        }
        let forward = self.model == other.model
            && self.related_model == other.related_model
            && self.identifier == other.identifier
            && self.reverse_identifier == other.reverse_identifier;
        let swapped = self.model == other.related_model
            && self.related_model == other.model
            && self.identifier == other.reverse_identifier
            && self.reverse_identifier == other.identifier;
        forward || swapped
    }
}

impl Eq for Relation {}

#[cfg(test)]
mod tests {
    use super::*;

    fn car_brand() -> Relation {
        Relation {
            model: "Car".into(),
            related_model: "Brand".into(),
            identifier: "brand".into(),
            reverse_identifier: "car_set".into(),
            mode: RelationMode::ForeignKey,
            on_delete: ReferentialAction::Cascade,
            model_table: "cars".into(),
            related_table: "brands".into(),
        }
    }

    #[test]
    fn test_identity() {
        let rel = car_brand();
        assert!(rel.has_identity("Car", "brand"));
        assert!(rel.has_identity("Brand", "car_set"));
        assert!(!rel.has_identity("Car", "car_set"));
        assert_eq!(rel.other_identifier("brand"), "car_set");
        assert_eq!(rel.target_model("car_set"), "Car");
        assert_eq!(rel.target_table("brand"), "brands");
        assert_eq!(rel.fk_column(), "brand_id");
        assert_eq!(rel.link_table(), None);
    }

    #[test]
    fn test_symmetric_equality() {
        let rel = car_brand();
        let swapped = Relation {
            model: "Brand".into(),
            related_model: "Car".into(),
            identifier: "car_set".into(),
            reverse_identifier: "brand".into(),
            model_table: "brands".into(),
            related_table: "cars".into(),
            ..car_brand()
        };
        assert_eq!(rel, swapped);
        assert_eq!(swapped, rel);
        let other = Relation {
            identifier: "maker".into(),
            ..car_brand()
        };
        assert_ne!(rel, other);
    }

    #[test]
    fn test_link_table_name() {
        let rel = Relation {
            model: "Actor".into(),
            related_model: "Movie".into(),
            identifier: "acted_in".into(),
            reverse_identifier: "actor_set".into(),
            mode: RelationMode::ManyToMany,
            on_delete: ReferentialAction::Cascade,
            model_table: "actors".into(),
            related_table: "movies".into(),
        };
        assert_eq!(
            rel.link_table().as_deref(),
            Some("m2m__actors__acted_in__movies")
        );
        assert_eq!(rel.link_column("actor_set"), "actor_set_id");
    }
}
