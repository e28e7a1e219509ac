//! Names: lexical qualified names, expanded names and interned symbols.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A `{uri}local` pair. Equality ignores the prefix a name was spelled with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpandedName {
    pub uri: String,
    pub local: String,
}

impl ExpandedName {
    pub fn new(uri: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            local: local.into(),
        }
    }

    pub fn local(local: impl Into<String>) -> Self {
        Self::new("", local)
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.uri.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.uri, self.local)
        }
    }
}

/// A name as it appears in a document: optional prefix, local part and the
/// namespace URI the prefix is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QualifiedName {
    pub prefix: Option<String>,
    pub local: String,
    pub uri: String,
}

impl QualifiedName {
    pub fn new(prefix: Option<&str>, local: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
            local: local.into(),
            uri: uri.into(),
        }
    }

    /// An unprefixed name in no namespace.
    pub fn local(local: impl Into<String>) -> Self {
        Self::new(None, local, "")
    }

    /// Splits `p:local` into its prefix and local part without resolving it.
    pub fn split(qname: &str) -> (Option<&str>, &str) {
        match qname.split_once(':') {
            Some((prefix, local)) => (Some(prefix), local),
            None => (None, qname),
        }
    }

    /// Returns true if `s` is a syntactically valid QName.
    pub fn is_valid(s: &str) -> bool {
        let (prefix, local) = Self::split(s);
        prefix.is_none_or(is_ncname) && is_ncname(local)
    }

    pub fn qname(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.local),
            None => self.local.clone(),
        }
    }

    pub fn expanded(&self) -> ExpandedName {
        ExpandedName::new(self.uri.clone(), self.local.clone())
    }

    pub fn matches(&self, other: &QualifiedName) -> bool {
        self.uri == other.uri && self.local == other.local
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}:{}", prefix, self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

fn is_ncname(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: QualifiedName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: QualifiedName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// An interned expanded name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sym(u32);

impl Sym {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Maps expanded names to dense symbols. Filled once while a sheet is compiled,
/// read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Interner {
    map: HashMap<ExpandedName, Sym>,
    names: Vec<ExpandedName>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &ExpandedName) -> Sym {
        if let Some(sym) = self.map.get(name) {
            return *sym;
        }
        let sym = Sym(self.names.len() as u32);
        self.names.push(name.clone());
        self.map.insert(name.clone(), sym);
        sym
    }

    pub fn get(&self, name: &ExpandedName) -> Option<Sym> {
        self.map.get(name).copied()
    }

    pub fn resolve(&self, sym: Sym) -> &ExpandedName {
        &self.names[sym.index()]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
