//! Foundation types shared by the sluice crates.
//!
//! Everything here is plain data: source locations, expanded names and the
//! symbol interner, namespace scopes, input events and the value model that
//! expression evaluation produces and instructions consume.

pub mod event;
pub mod location;
pub mod name;
pub mod namespace;
pub mod value;

pub use event::{Event, EventBuilder, EventKind, EventRef, PositionKey};
pub use location::Location;
pub use name::{Attribute, ExpandedName, Interner, QualifiedName, Sym};
pub use namespace::{NamespaceDecl, NamespaceScope, XML_NAMESPACE};
pub use value::{Item, NodeRef, Value, format_number};
