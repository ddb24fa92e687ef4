//! INSERT, UPDATE and DELETE statements.

use crate::lookup::placeholders;
use heinzel_core::Value;

/// `column = ?` or `column IN (?, ...)`, depending on the value count.
fn condition(column: &str, count: usize) -> String {
    if count == 1 {
        format!("{} = ?", column)
    } else {
        format!("{} IN ({})", column, placeholders(count))
    }
}

/// INSERT of one row.
#[derive(Debug, Clone, Default)]
pub struct Insert {
    table: String,
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Insert {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn value(mut self, column: impl Into<String>, value: Value) -> Self {
        self.columns.push(column.into());
        self.values.push(value);
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        if self.columns.is_empty() {
            return (format!("INSERT INTO {} DEFAULT VALUES", self.table), Vec::new());
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            self.columns.join(", "),
            placeholders(self.values.len())
        );
        (sql, self.values.clone())
    }
}

/// UPDATE of the rows matching every condition.
#[derive(Debug, Clone, Default)]
pub struct Update {
    table: String,
    set: Vec<(String, Value)>,
    conditions: Vec<(String, Vec<Value>)>,
}

impl Update {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: Value) -> Self {
        self.set.push((column.into(), value));
        self
    }

    /// Restrict to rows whose `column` is one of `values`.
    pub fn filter(mut self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.conditions.push((column.into(), values));
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        let assignments: Vec<String> = self.set.iter().map(|(c, _)| format!("{} = ?", c)).collect();
        let mut params: Vec<Value> = self.set.iter().map(|(_, v)| v.clone()).collect();
        let mut sql = format!("UPDATE {} SET {}", self.table, assignments.join(", "));
        push_conditions(&mut sql, &mut params, &self.conditions);
        (sql, params)
    }
}

/// DELETE of the rows matching every condition.
#[derive(Debug, Clone, Default)]
pub struct Delete {
    table: String,
    conditions: Vec<(String, Vec<Value>)>,
}

impl Delete {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            conditions: Vec::new(),
        }
    }

    pub fn filter(mut self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.conditions.push((column.into(), values));
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        let mut sql = format!("DELETE FROM {}", self.table);
        let mut params = Vec::new();
        push_conditions(&mut sql, &mut params, &self.conditions);
        (sql, params)
    }
}

fn push_conditions(sql: &mut String, params: &mut Vec<Value>, conditions: &[(String, Vec<Value>)]) {
    let parts: Vec<String> = conditions
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(column, values)| {
            params.extend(values.iter().cloned());
            condition(column, values.len())
        })
        .collect();
    if !parts.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&parts.join(" AND "));
    }
}
