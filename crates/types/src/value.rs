//! The value model produced by expression evaluation.

use crate::event::{EventKind, EventRef};
use std::fmt;
use std::rc::Rc;

/// A reference to an input node together with its depth on the event stack
/// at the time the reference was taken.
#[derive(Debug, Clone)]
pub struct NodeRef {
    pub event: EventRef,
    pub depth: usize,
}

impl NodeRef {
    pub fn new(event: EventRef, depth: usize) -> Self {
        Self { event, depth }
    }

    pub fn string_value(&self) -> String {
        match self.event.kind() {
            EventKind::Root => String::new(),
            _ => self.event.value().to_string(),
        }
    }

    pub fn same_node(&self, other: &NodeRef) -> bool {
        Rc::ptr_eq(&self.event, &other.event)
    }
}

#[derive(Debug, Clone)]
pub enum Item {
    Node(NodeRef),
    Boolean(bool),
    Number(f64),
    String(String),
}

impl Item {
    pub fn string_value(&self) -> String {
        match self {
            Item::Node(node) => node.string_value(),
            Item::Boolean(b) => b.to_string(),
            Item::Number(n) => format_number(*n),
            Item::String(s) => s.clone(),
        }
    }

    pub fn number_value(&self) -> f64 {
        match self {
            Item::Number(n) => *n,
            Item::Boolean(true) => 1.0,
            Item::Boolean(false) => 0.0,
            other => parse_number(&other.string_value()),
        }
    }

    pub fn as_node(&self) -> Option<&NodeRef> {
        match self {
            Item::Node(node) => Some(node),
            _ => None,
        }
    }
}

/// An ordered sequence of items. The empty sequence is the empty value; a
/// sequence never contains a nested empty value.
#[derive(Debug, Clone, Default)]
pub struct Value {
    items: Vec<Item>,
}

impl Value {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<Item>) -> Self {
        Self { items }
    }

    pub fn node(node: NodeRef) -> Self {
        Self::from_items(vec![Item::Node(node)])
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Item> {
        self.items
    }

    pub fn first(&self) -> Option<&Item> {
        self.items.first()
    }

    /// Appends another sequence. Sequences are flat, so this is concatenation.
    pub fn append(&mut self, other: Value) {
        self.items.extend(other.items);
    }

    pub fn to_boolean(&self) -> bool {
        match self.items.as_slice() {
            [] => false,
            [Item::Boolean(b)] => *b,
            [Item::Number(n)] => *n != 0.0 && !n.is_nan(),
            [Item::String(s)] => !s.is_empty(),
            _ => true,
        }
    }

    /// Numeric value of the first item, `NaN` for the empty sequence.
    pub fn to_number(&self) -> f64 {
        self.items.first().map(Item::number_value).unwrap_or(f64::NAN)
    }

    /// String value of the first item, empty for the empty sequence.
    pub fn to_string_value(&self) -> String {
        self.items.first().map(Item::string_value).unwrap_or_default()
    }

    /// String values of all items joined with `separator`.
    pub fn to_string_joined(&self, separator: &str) -> String {
        self.items
            .iter()
            .map(Item::string_value)
            .collect::<Vec<_>>()
            .join(separator)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::from_items(vec![Item::Boolean(b)])
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::from_items(vec![Item::Number(n)])
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::from_items(vec![Item::String(s)])
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::from(s.to_string())
    }
}

impl From<Item> for Value {
    fn from(item: Item) -> Self {
        Value::from_items(vec![item])
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_value())
    }
}

fn parse_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

/// Formats a number the way the expression language prints it: integral
/// values without a fraction, `NaN` and the infinities spelled out.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
