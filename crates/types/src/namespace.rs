use std::collections::BTreeMap;
use std::rc::Rc;

pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// One `xmlns[:prefix]="uri"` declaration. The default namespace has an empty prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceDecl {
    pub prefix: String,
    pub uri: String,
}

impl NamespaceDecl {
    pub fn new(prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            uri: uri.into(),
        }
    }
}

/// The in-scope namespaces of an input node. Scopes are immutable and shared
/// between an element and all descendants that declare nothing new.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceScope {
    bindings: BTreeMap<String, String>,
}

impl Default for NamespaceScope {
    fn default() -> Self {
        let mut bindings = BTreeMap::new();
        bindings.insert("xml".to_string(), XML_NAMESPACE.to_string());
        Self { bindings }
    }
}

impl NamespaceScope {
    pub fn root() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Derives a child scope. Returns the parent unchanged when nothing is declared.
    pub fn extend(parent: &Rc<Self>, decls: &[NamespaceDecl]) -> Rc<Self> {
        if decls.is_empty() {
            return Rc::clone(parent);
        }
        let mut bindings = parent.bindings.clone();
        for decl in decls {
            if decl.uri.is_empty() && !decl.prefix.is_empty() {
                bindings.remove(&decl.prefix);
            } else {
                bindings.insert(decl.prefix.clone(), decl.uri.clone());
            }
        }
        Rc::new(Self { bindings })
    }

    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.bindings.get(prefix).map(String::as_str)
    }

    pub fn default_namespace(&self) -> &str {
        self.resolve("").unwrap_or("")
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// All bindings except the implicit `xml` one, as declarations.
    pub fn declarations(&self) -> Vec<NamespaceDecl> {
        self.bindings
            .iter()
            .filter(|(prefix, uri)| prefix.as_str() != "xml" && !uri.is_empty())
            .map(|(prefix, uri)| NamespaceDecl::new(prefix.clone(), uri.clone()))
            .collect()
    }
}
