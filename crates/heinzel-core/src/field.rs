//! Field and column definitions.
//!
//! A [`FieldInfo`] describes one storage column of a model: its column name,
//! value kind and constraints. [`FieldInfo::to_python`] validates values
//! assigned to instances; [`FieldInfo::coerce`] only converts the value kind
//! and is what filter binding uses.

use crate::Result;
use crate::error::ValidationError;
use crate::value::Value;
use regex::Regex;

/// Referential action applied to referencing rows when a foreign-key target
/// is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    /// Refuse the delete while references exist.
    NoAction,
    /// Same as `NoAction`.
    Restrict,
    /// Delete referencing rows as well.
    #[default]
    Cascade,
    /// Set referencing columns to NULL.
    SetNull,
}

impl ReferentialAction {
    /// Get the SQL representation of this action.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
        }
    }

    /// Parse a referential action from a string (case-insensitive).
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NO ACTION" | "NOACTION" | "NO_ACTION" => Some(ReferentialAction::NoAction),
            "RESTRICT" => Some(ReferentialAction::Restrict),
            "CASCADE" => Some(ReferentialAction::Cascade),
            "SET NULL" | "SETNULL" | "SET_NULL" => Some(ReferentialAction::SetNull),
            _ => None,
        }
    }
}

/// Value kind stored in a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Boolean,
    Float,
    Text,
    Bytes,
}

impl FieldKind {
    pub const fn name(&self) -> &'static str {
        match self {
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Float => "float",
            FieldKind::Text => "text",
            FieldKind::Bytes => "bytes",
        }
    }
}

/// Metadata about a model field/column.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Logical field name
    pub name: String,
    /// Database column name (defaults to the field name)
    pub column_name: String,
    pub kind: FieldKind,
    /// Whether this field accepts NULL
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
    /// Maximum length in characters (text) or bytes (blob)
    pub max_length: Option<usize>,
    /// Value a fresh instance starts with
    pub initial: Value,
    pub pattern: Option<Regex>,
}

impl FieldInfo {
    /// Create a new nullable field of the given kind.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            column_name: name.clone(),
            name,
            kind,
            nullable: true,
            primary_key: false,
            auto_increment: false,
            unique: false,
            max_length: None,
            initial: Value::Null,
            pattern: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn bytes(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bytes)
    }

    /// Set the database column name.
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column_name = name.into();
        self
    }

    /// Mark as primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark as auto-incrementing.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Reject NULL on assignment.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Initial value for new instances.
    pub fn initial(mut self, value: impl Into<Value>) -> Self {
        self.initial = value.into();
        self
    }

    /// Require text values to match `regex`.
    pub fn pattern(mut self, regex: Regex) -> Self {
        self.pattern = Some(regex);
        self
    }

    /// Convert `value` to this field's value kind.
    ///
    /// NULL passes through unchanged.
    pub fn coerce(&self, value: &Value) -> Result<Value> {
        let converted = match (self.kind, value) {
            (_, Value::Null) => Some(Value::Null),

            (FieldKind::Integer, Value::Int(v)) => Some(Value::BigInt(i64::from(*v))),
            (FieldKind::Integer, Value::BigInt(v)) => Some(Value::BigInt(*v)),
            (FieldKind::Integer, Value::Bool(v)) => Some(Value::BigInt(i64::from(*v))),
            (FieldKind::Integer, Value::Double(v)) if v.is_finite() => {
                Some(Value::BigInt(v.trunc() as i64))
            }
            (FieldKind::Integer, Value::Text(s)) => s.trim().parse().ok().map(Value::BigInt),

            (FieldKind::Boolean, Value::Bool(v)) => Some(Value::Bool(*v)),
            (FieldKind::Boolean, Value::Int(_) | Value::BigInt(_)) => value.as_bool().map(Value::Bool),
            (FieldKind::Boolean, Value::Text(s)) => match s.trim() {
                "1" | "true" | "True" => Some(Value::Bool(true)),
                "0" | "false" | "False" => Some(Value::Bool(false)),
                _ => None,
            },

            (FieldKind::Float, Value::Double(_) | Value::Int(_) | Value::BigInt(_)) => {
                value.as_f64().map(Value::Double)
            }
            (FieldKind::Float, Value::Text(s)) => s.trim().parse().ok().map(Value::Double),

            (FieldKind::Text, Value::Text(s)) => Some(Value::Text(s.clone())),
            (FieldKind::Text, Value::Int(_) | Value::BigInt(_) | Value::Double(_) | Value::Bool(_)) => {
                Some(Value::Text(value.to_string()))
            }

            (FieldKind::Bytes, Value::Bytes(b)) => Some(Value::Bytes(b.clone())),
            (FieldKind::Bytes, Value::Text(s)) => Some(Value::Bytes(s.clone().into_bytes())),

            _ => None,
        };

        converted.ok_or_else(|| {
            ValidationError::wrong_type(&self.name, self.kind.name(), value.type_name()).into()
        })
    }

    /// Validate a value assigned to this field and return its stored form.
    pub fn to_python(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            if !self.nullable && !self.primary_key {
                return Err(ValidationError::required(&self.name).into());
            }
            return Ok(Value::Null);
        }

        let value = self.coerce(&value)?;

        if let Some(max) = self.max_length {
            let len = match &value {
                Value::Text(s) => s.chars().count(),
                Value::Bytes(b) => b.len(),
                _ => 0,
            };
            if len > max {
                return Err(ValidationError::max_length(&self.name, max, len).into());
            }
        }

        if let (Some(regex), Value::Text(s)) = (&self.pattern, &value) {
            if !regex.is_match(s) {
                return Err(ValidationError::pattern(&self.name, regex.as_str()).into());
            }
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ValidationErrorKind};

    fn kind_of(err: Error) -> ValidationErrorKind {
        match err {
            Error::Validation(v) => v.kind,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_integer_coercion() {
        let f = FieldInfo::integer("age");
        assert_eq!(f.to_python(Value::Int(3)).unwrap(), Value::BigInt(3));
        assert_eq!(f.to_python(Value::from("42")).unwrap(), Value::BigInt(42));
        assert_eq!(f.to_python(Value::Double(3.9)).unwrap(), Value::BigInt(3));
        let err = f.to_python(Value::from("abc")).unwrap_err();
        assert_eq!(kind_of(err), ValidationErrorKind::Type);
    }

    #[test]
    fn test_text_max_length() {
        let f = FieldInfo::text("name").max_length(3);
        assert_eq!(f.to_python(Value::from("abc")).unwrap(), Value::from("abc"));
        let err = f.to_python(Value::from("abcd")).unwrap_err();
        assert_eq!(kind_of(err), ValidationErrorKind::MaxLength);
    }

    #[test]
    fn test_pattern() {
        let f = FieldInfo::text("code").pattern(Regex::new(r"^[A-Z]{3}$").unwrap());
        assert!(f.to_python(Value::from("ABC")).is_ok());
        let err = f.to_python(Value::from("abc")).unwrap_err();
        assert_eq!(kind_of(err), ValidationErrorKind::Pattern);
    }

    #[test]
    fn test_not_null() {
        let f = FieldInfo::text("name").not_null();
        let err = f.to_python(Value::Null).unwrap_err();
        assert_eq!(kind_of(err), ValidationErrorKind::Required);
        assert_eq!(
            FieldInfo::integer("id").primary_key().not_null().to_python(Value::Null).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_coerce_skips_constraints() {
        let f = FieldInfo::text("name").max_length(2);
        assert_eq!(f.coerce(&Value::from("long")).unwrap(), Value::from("long"));
        assert_eq!(
            FieldInfo::boolean("flag").coerce(&Value::Int(1)).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_referential_action_parse() {
        assert_eq!(
            ReferentialAction::from_str("set null"),
            Some(ReferentialAction::SetNull)
        );
        assert_eq!(ReferentialAction::default(), ReferentialAction::Cascade);
        assert_eq!(ReferentialAction::Restrict.as_sql(), "RESTRICT");
    }
}
