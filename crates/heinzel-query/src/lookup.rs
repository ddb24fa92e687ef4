//! Named lookups (`name__endswith`, `id__in`, ...) and their SQL shapes.

use heinzel_core::{Error, FieldInfo, Result, UsageErrorKind, Value};
use std::cmp::Ordering;

/// Comparison applied by a filter leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    Exact,
    Gt,
    Gte,
    Lt,
    Lte,
    StartsWith,
    EndsWith,
    Contains,
    In,
    Between,
}

impl Lookup {
    /// Parse a lookup suffix. `beginswith` is accepted for `startswith`.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "exact" => Lookup::Exact,
            "gt" => Lookup::Gt,
            "gte" => Lookup::Gte,
            "lt" => Lookup::Lt,
            "lte" => Lookup::Lte,
            "startswith" | "beginswith" => Lookup::StartsWith,
            "endswith" => Lookup::EndsWith,
            "contains" => Lookup::Contains,
            "in" => Lookup::In,
            "between" => Lookup::Between,
            _ => return None,
        })
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Lookup::Exact => "exact",
            Lookup::Gt => "gt",
            Lookup::Gte => "gte",
            Lookup::Lt => "lt",
            Lookup::Lte => "lte",
            Lookup::StartsWith => "startswith",
            Lookup::EndsWith => "endswith",
            Lookup::Contains => "contains",
            Lookup::In => "in",
            Lookup::Between => "between",
        }
    }

    const fn is_like(&self) -> bool {
        matches!(self, Lookup::StartsWith | Lookup::EndsWith | Lookup::Contains)
    }

    fn check_arity(&self, path: &str, count: usize) -> Result<()> {
        let ok = match self {
            Lookup::In => count >= 1,
            Lookup::Between => count == 2,
            _ => count == 1,
        };
        if ok {
            return Ok(());
        }
        let expected = match self {
            Lookup::In => "at least one value",
            Lookup::Between => "exactly two values",
            _ => "exactly one value",
        };
        Err(Error::usage(
            UsageErrorKind::Cardinality,
            format!(
                "lookup '{}' on '{}' needs {}, got {}",
                self.as_str(),
                path,
                expected,
                count
            ),
        ))
    }

    /// Validate and convert filter values for binding.
    ///
    /// Values go through the field's `to_python` except for substring
    /// lookups, which bind text with `%` affixed. NULL passes unchanged.
    /// Reversed `between` bounds are swapped.
    pub fn prepare(&self, path: &str, field: &FieldInfo, values: Vec<Value>) -> Result<Vec<Value>> {
        self.check_arity(path, values.len())?;

        if self.is_like() {
            let text = match &values[0] {
                Value::Text(s) => s.clone(),
                Value::Null => {
                    return Err(Error::usage(
                        UsageErrorKind::Cardinality,
                        format!("lookup '{}' on '{}' needs a non-NULL value", self.as_str(), path),
                    ));
                }
                Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
                other => other.to_string(),
            };
            let pattern = match self {
                Lookup::StartsWith => format!("{}%", text),
                Lookup::EndsWith => format!("%{}", text),
                _ => format!("%{}%", text),
            };
            return Ok(vec![Value::Text(pattern)]);
        }

        let mut values = values
            .into_iter()
            .map(|v| if v.is_null() { Ok(v) } else { field.to_python(v) })
            .collect::<Result<Vec<_>>>()?;

        if *self == Lookup::Between && values[0].compare(&values[1]) == Some(Ordering::Greater) {
            values.swap(0, 1);
        }

        Ok(values)
    }

    /// Render `column {op} ?` for `count` bound values.
    pub fn render(&self, column: &str, count: usize) -> String {
        match self {
            Lookup::Exact => format!("{} = ?", column),
            Lookup::Gt => format!("{} > ?", column),
            Lookup::Gte => format!("{} >= ?", column),
            Lookup::Lt => format!("{} < ?", column),
            Lookup::Lte => format!("{} <= ?", column),
            Lookup::StartsWith | Lookup::EndsWith | Lookup::Contains => {
                format!("{} LIKE ?", column)
            }
            Lookup::In => format!("{} IN ({})", column, placeholders(count)),
            Lookup::Between => format!("{} BETWEEN ? AND ?", column),
        }
    }
}

/// `?, ?, ?` with `count` placeholders.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Split a filter path into field tokens and its lookup.
///
/// The last `__`-separated token is the lookup when it names one, otherwise
/// the lookup is [`Lookup::Exact`].
pub fn lex(path: &str) -> (Vec<&str>, Lookup) {
    let mut tokens: Vec<&str> = path.split("__").collect();
    if tokens.len() > 1 {
        if let Some(lookup) = tokens.last().and_then(|t| Lookup::parse(t)) {
            tokens.pop();
            return (tokens, lookup);
        }
    }
    (tokens, Lookup::Exact)
}
