//! Snapshots of input nodes.
//!
//! An [`Event`] is created once when the driver delivers a node and is then
//! shared by reference counting between the event stack, suspended
//! continuation frames and buffers. Its attributes and string value are frozen
//! when it is built; the only state that changes afterwards is the table of
//! child position counters used to answer `position()` for the node's children.

use crate::name::{Attribute, QualifiedName};
use crate::namespace::NamespaceScope;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type EventRef = Rc<Event>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Root,
    Element,
    Text,
    Cdata,
    Pi,
    Comment,
    Attribute,
}

/// A node test whose matches are counted per parent, so that the position of
/// a node relative to a test is a table lookup instead of a rescan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PositionKey {
    /// `node()`
    Node,
    /// `text()`, matching text and CDATA nodes
    Text,
    Cdata,
    Comment,
    Pi,
    PiTarget(String),
    /// `*`
    AnyElement,
    /// `p:*`
    ElementNs(String),
    /// `*:local`
    ElementLocal(String),
    Element(String, String),
    AnyAttribute,
    AttributeNs(String),
    Attribute(String, String),
}

#[derive(Debug)]
pub struct Event {
    kind: EventKind,
    name: Option<QualifiedName>,
    value: String,
    attributes: Vec<Attribute>,
    namespaces: Rc<NamespaceScope>,
    has_child_nodes: bool,
    counters: RefCell<HashMap<PositionKey, u64>>,
}

impl Event {
    /// The document node. Its children always arrive as separate events.
    pub fn root() -> EventRef {
        EventBuilder::new(EventKind::Root).has_child_nodes(true).build()
    }

    pub fn text(value: impl Into<String>) -> EventRef {
        EventBuilder::new(EventKind::Text).value(value).build()
    }

    pub fn cdata(value: impl Into<String>) -> EventRef {
        EventBuilder::new(EventKind::Cdata).value(value).build()
    }

    pub fn comment(value: impl Into<String>) -> EventRef {
        EventBuilder::new(EventKind::Comment).value(value).build()
    }

    pub fn processing_instruction(target: &str, data: impl Into<String>) -> EventRef {
        EventBuilder::new(EventKind::Pi)
            .name(QualifiedName::local(target))
            .value(data)
            .build()
    }

    pub fn attribute(attribute: &Attribute, namespaces: Rc<NamespaceScope>) -> EventRef {
        EventBuilder::new(EventKind::Attribute)
            .name(attribute.name.clone())
            .value(attribute.value.clone())
            .namespaces(namespaces)
            .build()
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn name(&self) -> Option<&QualifiedName> {
        self.name.as_ref()
    }

    /// The text of a text, CDATA, comment or attribute node, the data of a
    /// processing instruction, or the look-ahead text content of an element.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn namespaces(&self) -> &Rc<NamespaceScope> {
        &self.namespaces
    }

    pub fn has_child_nodes(&self) -> bool {
        self.has_child_nodes
    }

    pub fn is_element(&self) -> bool {
        self.kind == EventKind::Element
    }

    /// Can this node have children that arrive as separate events?
    pub fn is_container(&self) -> bool {
        matches!(self.kind, EventKind::Element | EventKind::Root)
    }

    /// Records `child` as the next child of this node. Every key the child
    /// satisfies is advanced, so its position under any test can be read back
    /// with [`Event::position`] while it is the most recent child.
    pub fn count_child(&self, child: &Event) {
        let mut counters = self.counters.borrow_mut();
        for key in child.position_keys() {
            *counters.entry(key).or_insert(0) += 1;
        }
    }

    /// Forgets the attribute positions counted so far, before the attributes
    /// of this element are visited again.
    pub fn clear_attribute_counters(&self) {
        self.counters.borrow_mut().retain(|key, _| {
            !matches!(
                key,
                PositionKey::AnyAttribute | PositionKey::AttributeNs(_) | PositionKey::Attribute(..)
            )
        });
    }

    pub fn position(&self, key: &PositionKey) -> u64 {
        self.counters.borrow().get(key).copied().unwrap_or(0)
    }

    /// A copy with identical content and fresh counters, for replaying a node
    /// in a new context.
    pub fn fresh_copy(&self) -> EventRef {
        Rc::new(Event {
            kind: self.kind,
            name: self.name.clone(),
            value: self.value.clone(),
            attributes: self.attributes.clone(),
            namespaces: Rc::clone(&self.namespaces),
            has_child_nodes: self.has_child_nodes,
            counters: RefCell::new(HashMap::new()),
        })
    }

    fn position_keys(&self) -> Vec<PositionKey> {
        match self.kind {
            EventKind::Root => vec![],
            EventKind::Element => {
                let mut keys = vec![PositionKey::Node, PositionKey::AnyElement];
                if let Some(name) = &self.name {
                    keys.push(PositionKey::ElementNs(name.uri.clone()));
                    keys.push(PositionKey::ElementLocal(name.local.clone()));
                    keys.push(PositionKey::Element(name.uri.clone(), name.local.clone()));
                }
                keys
            }
            EventKind::Text => vec![PositionKey::Node, PositionKey::Text],
            EventKind::Cdata => vec![PositionKey::Node, PositionKey::Text, PositionKey::Cdata],
            EventKind::Comment => vec![PositionKey::Node, PositionKey::Comment],
            EventKind::Pi => {
                let mut keys = vec![PositionKey::Node, PositionKey::Pi];
                if let Some(name) = &self.name {
                    keys.push(PositionKey::PiTarget(name.local.clone()));
                }
                keys
            }
            EventKind::Attribute => {
                let mut keys = vec![PositionKey::AnyAttribute];
                if let Some(name) = &self.name {
                    keys.push(PositionKey::AttributeNs(name.uri.clone()));
                    keys.push(PositionKey::Attribute(name.uri.clone(), name.local.clone()));
                }
                keys
            }
        }
    }
}

/// Assembles an event before it is shared. Look-ahead decisions such as
/// `has_child_nodes` must be made here.
#[derive(Debug)]
pub struct EventBuilder {
    kind: EventKind,
    name: Option<QualifiedName>,
    value: String,
    attributes: Vec<Attribute>,
    namespaces: Option<Rc<NamespaceScope>>,
    has_child_nodes: bool,
}

impl EventBuilder {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            name: None,
            value: String::new(),
            attributes: Vec::new(),
            namespaces: None,
            has_child_nodes: false,
        }
    }

    pub fn element(name: QualifiedName, attributes: Vec<Attribute>, namespaces: Rc<NamespaceScope>) -> Self {
        Self::new(EventKind::Element)
            .name(name)
            .attributes(attributes)
            .namespaces(namespaces)
    }

    pub fn name(mut self, name: QualifiedName) -> Self {
        self.name = Some(name);
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn attributes(mut self, attributes: Vec<Attribute>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn namespaces(mut self, namespaces: Rc<NamespaceScope>) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    pub fn has_child_nodes(mut self, has_child_nodes: bool) -> Self {
        self.has_child_nodes = has_child_nodes;
        self
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }

    pub fn set_has_child_nodes(&mut self, has_child_nodes: bool) {
        self.has_child_nodes = has_child_nodes;
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn name_ref(&self) -> Option<&QualifiedName> {
        self.name.as_ref()
    }

    pub fn build(self) -> EventRef {
        Rc::new(Event {
            kind: self.kind,
            name: self.name,
            value: self.value,
            attributes: self.attributes,
            namespaces: self.namespaces.unwrap_or_else(NamespaceScope::root),
            has_child_nodes: self.has_child_nodes,
            counters: RefCell::new(HashMap::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(local: &str) -> EventRef {
        EventBuilder::element(QualifiedName::local(local), vec![], NamespaceScope::root()).build()
    }

    #[test]
    fn counters_track_each_key() {
        let parent = element("list");
        parent.count_child(&element("item"));
        parent.count_child(&Event::text("x"));
        parent.count_child(&element("item"));
        parent.count_child(&element("other"));

        assert_eq!(parent.position(&PositionKey::Node), 4);
        assert_eq!(parent.position(&PositionKey::AnyElement), 3);
        assert_eq!(parent.position(&PositionKey::Element(String::new(), "item".into())), 2);
        assert_eq!(parent.position(&PositionKey::Text), 1);
        assert_eq!(parent.position(&PositionKey::Comment), 0);
    }

    #[test]
    fn cdata_counts_as_text() {
        let parent = element("p");
        parent.count_child(&Event::cdata("x"));
        assert_eq!(parent.position(&PositionKey::Text), 1);
        assert_eq!(parent.position(&PositionKey::Cdata), 1);
    }

    #[test]
    fn fresh_copy_resets_counters() {
        let parent = element("p");
        parent.count_child(&element("c"));
        let copy = parent.fresh_copy();
        assert_eq!(copy.position(&PositionKey::Node), 0);
        assert_eq!(copy.name(), parent.name());
    }
}
