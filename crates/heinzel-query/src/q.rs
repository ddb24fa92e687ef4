//! Predicate trees.
//!
//! [`Q`] is a tree of filter conditions joined by AND/OR with optional
//! negation. Conditions are stored unresolved (`path`, values) and are
//! validated against the model only when a query applies them.
//!
//! Rust's operator precedence matches boolean precedence, so
//! `a | b & c` builds `a OR (b AND c)`:
//!
//! ```ignore
//! let q = Q::new("name", "Golf") | Q::new("year__gt", 2000) & !Q::new("brand", None::<i64>);
//! ```

use heinzel_core::{Result, Value};
use std::ops::{BitAnd, BitOr, Not};

/// How the children of a [`Node`] combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Connector {
    #[default]
    And,
    Or,
}

impl Connector {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Connector::And => " AND ",
            Connector::Or => " OR ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Child<L> {
    Leaf(L),
    Node(Node<L>),
}

/// A boolean expression tree over leaves of type `L`.
#[derive(Debug, Clone, PartialEq)]
pub struct Node<L> {
    pub connector: Connector,
    pub negated: bool,
    pub children: Vec<Child<L>>,
}

impl<L> Default for Node<L> {
    fn default() -> Self {
        Self {
            connector: Connector::And,
            negated: false,
            children: Vec::new(),
        }
    }
}

impl<L> Node<L> {
    pub fn leaf(leaf: L) -> Self {
        Self {
            connector: Connector::And,
            negated: false,
            children: vec![Child::Leaf(leaf)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// Combine two trees. An empty side is the identity.
    pub fn combine(self, other: Self, connector: Connector) -> Self {
        if other.is_empty() {
            return self;
        }
        if self.is_empty() {
            return other;
        }
        let mut node = Node {
            connector,
            negated: false,
            children: Vec::with_capacity(2),
        };
        node.push(self);
        node.push(other);
        node
    }

    /// Add `child` to this node, flattening it when that keeps the meaning.
    fn push(&mut self, child: Node<L>) {
        if !child.negated && (child.connector == self.connector || child.children.len() == 1) {
            self.children.extend(child.children);
        } else {
            self.children.push(Child::Node(child));
        }
    }

    /// Convert every leaf, keeping the tree shape.
    pub fn try_map<M, F>(self, f: &mut F) -> Result<Node<M>>
    where
        F: FnMut(L) -> Result<M>,
    {
        let children = self
            .children
            .into_iter()
            .map(|child| match child {
                Child::Leaf(leaf) => f(leaf).map(Child::Leaf),
                Child::Node(node) => node.try_map(f).map(Child::Node),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Node {
            connector: self.connector,
            negated: self.negated,
            children,
        })
    }

    /// Render the tree with `leaf` rendering each leaf.
    ///
    /// The root is parenthesized only when negated; inner nodes are
    /// parenthesized when they have more than one child or are negated.
    pub fn render<F>(&self, leaf: &mut F) -> String
    where
        F: FnMut(&L) -> String,
    {
        self.render_inner(leaf, true)
    }

    fn render_inner<F>(&self, leaf: &mut F, root: bool) -> String
    where
        F: FnMut(&L) -> String,
    {
        let parts: Vec<String> = self
            .children
            .iter()
            .map(|child| match child {
                Child::Leaf(l) => leaf(l),
                Child::Node(n) => n.render_inner(leaf, false),
            })
            .filter(|s| !s.is_empty())
            .collect();

        if parts.is_empty() {
            return String::new();
        }

        let body = parts.join(self.connector.as_sql());
        match (self.negated, root, parts.len() > 1) {
            (true, _, _) => format!("NOT ({})", body),
            (false, false, true) => format!("({})", body),
            _ => body,
        }
    }

    /// Visit leaves in rendering order.
    pub fn leaves(&self) -> Vec<&L> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a L>) {
        for child in &self.children {
            match child {
                Child::Leaf(l) => out.push(l),
                Child::Node(n) => n.collect_leaves(out),
            }
        }
    }
}

/// Unresolved filter condition: a `__`-separated path and its values.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub path: String,
    pub values: Vec<Value>,
}

/// Filter expression built from [`Condition`]s.
pub type Q = Node<Condition>;

impl Node<Condition> {
    /// A single condition, e.g. `Q::new("name__endswith", "er")`.
    pub fn new(path: impl Into<String>, operand: impl Into<Operand>) -> Self {
        Node::leaf(Condition {
            path: path.into(),
            values: operand.into().0,
        })
    }
}

impl IntoIterator for Node<Condition> {
    type Item = Q;
    type IntoIter = std::iter::Once<Q>;

    fn into_iter(self) -> Self::IntoIter {
        std::iter::once(self)
    }
}

impl<L> BitAnd for Node<L> {
    type Output = Node<L>;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.combine(rhs, Connector::And)
    }
}

impl<L> BitOr for Node<L> {
    type Output = Node<L>;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.combine(rhs, Connector::Or)
    }
}

impl<L> Not for Node<L> {
    type Output = Node<L>;

    fn not(self) -> Self::Output {
        self.negate()
    }
}

/// Right-hand side of a condition: one value, a pair or a list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Operand(pub Vec<Value>);

macro_rules! scalar_operand {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(v: $ty) -> Self {
                    Operand(vec![Value::from(v)])
                }
            }
        )*
    };
}

scalar_operand!(bool, i32, i64, f64, String, &str, Value);

impl<T: Into<Value>> From<Option<T>> for Operand {
    fn from(v: Option<T>) -> Self {
        Operand(vec![v.map_or(Value::Null, Into::into)])
    }
}

impl<A: Into<Value>, B: Into<Value>> From<(A, B)> for Operand {
    fn from((a, b): (A, B)) -> Self {
        Operand(vec![a.into(), b.into()])
    }
}

impl<T: Into<Value>> From<Vec<T>> for Operand {
    fn from(values: Vec<T>) -> Self {
        Operand(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Operand {
    fn from(values: [T; N]) -> Self {
        Operand(values.into_iter().map(Into::into).collect())
    }
}
