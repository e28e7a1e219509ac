//! The emitter sits between instructions and the result handler. It keeps the
//! output well formed, declares namespaces where they are needed, merges
//! attributes into the start tag that is still open, and redirects output into
//! captures (text for variables and attributes, event lists for buffers,
//! secondary documents).

use crate::error::StxError;
use crate::output::{OutputEvent, ResultHandler};
use sluice_types::{Attribute, NamespaceDecl, QualifiedName, XML_NAMESPACE};

/// Where captured output goes.
pub enum Sink {
    /// Only character data is kept.
    Text(String),
    Events(Vec<OutputEvent>),
    Document(Box<dyn ResultHandler>),
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sink::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Sink::Events(events) => f.debug_tuple("Events").field(&events.len()).finish(),
            Sink::Document(_) => f.write_str("Document"),
        }
    }
}

/// Open elements and namespace declarations of one output target.
#[derive(Debug)]
struct Target {
    open: Vec<QualifiedName>,
    scopes: Vec<Vec<NamespaceDecl>>,
}

impl Target {
    fn new() -> Self {
        Self {
            open: Vec::new(),
            scopes: Vec::new(),
        }
    }

    fn lookup(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE);
        }
        self.scopes
            .iter()
            .rev()
            .flat_map(|decls| decls.iter())
            .find(|d| d.prefix == prefix)
            .map(|d| d.uri.as_str())
    }
}

#[derive(Debug)]
struct PendingTag {
    name: QualifiedName,
    attributes: Vec<Attribute>,
    declared: Vec<NamespaceDecl>,
}

impl PendingTag {
    /// The URI `prefix` will have inside this element.
    fn binding<'a>(&'a self, target: &'a Target, prefix: &str) -> Option<&'a str> {
        match self.declared.iter().find(|d| d.prefix == prefix) {
            Some(decl) => Some(decl.uri.as_str()),
            None => target.lookup(prefix),
        }
    }

    fn is_declared_here(&self, prefix: &str) -> bool {
        self.declared.iter().any(|d| d.prefix == prefix)
    }

    /// Declares `prefix` unless it already resolves to `uri`.
    fn declare(&mut self, target: &Target, prefix: &str, uri: &str) {
        if prefix == "xml" {
            return;
        }
        let current = self.binding(target, prefix).unwrap_or("");
        if current != uri {
            self.declared.retain(|d| d.prefix != prefix);
            self.declared.push(NamespaceDecl::new(prefix, uri));
        }
    }
}

/// An open capture. `held` is the start tag that was still open when the
/// capture began; it is restored when the capture ends so attributes can
/// still be added to it.
#[derive(Debug)]
struct Capture {
    sink: Sink,
    target: Target,
    held: Option<PendingTag>,
    attribute: bool,
}

pub struct Emitter<H: ResultHandler> {
    handler: H,
    target: Target,
    captures: Vec<Capture>,
    pending: Option<PendingTag>,
    generated: usize,
}

impl<H: ResultHandler> Emitter<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            target: Target::new(),
            captures: Vec::new(),
            pending: None,
            generated: 0,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    pub fn capture_depth(&self) -> usize {
        self.captures.len()
    }

    pub fn start_document(&mut self) -> Result<(), StxError> {
        self.handler.start_document()
    }

    pub fn end_document(&mut self) -> Result<(), StxError> {
        self.flush()?;
        if !self.captures.is_empty() {
            return Err(StxError::fatal("output capture still open at end of document"));
        }
        if let Some(open) = self.target.open.last() {
            return Err(StxError::fatal(format!("missing end tag for <{}>", open)));
        }
        self.handler.end_document()
    }

    fn current_target(&self) -> &Target {
        match self.captures.last() {
            Some(capture) => &capture.target,
            None => &self.target,
        }
    }

    fn current_target_mut(&mut self) -> &mut Target {
        match self.captures.last_mut() {
            Some(capture) => &mut capture.target,
            None => &mut self.target,
        }
    }

    /// Opens an element. `in_scope` are declarations the element should carry
    /// (the namespaces of a copied node or of a literal result element); only
    /// those not already in effect are written.
    pub fn start_element(
        &mut self,
        name: QualifiedName,
        attributes: Vec<Attribute>,
        in_scope: &[NamespaceDecl],
    ) -> Result<(), StxError> {
        self.flush()?;
        let mut tag = PendingTag {
            name,
            attributes: Vec::new(),
            declared: Vec::new(),
        };
        let target = self.current_target();
        let prefix = tag.name.prefix.clone().unwrap_or_default();
        let uri = tag.name.uri.clone();
        if uri.is_empty() {
            tag.name.prefix = None;
            tag.declare(target, "", "");
        } else {
            tag.declare(target, &prefix, &uri);
        }
        for decl in in_scope {
            if !tag.is_declared_here(&decl.prefix) && !(decl.prefix.is_empty() && uri.is_empty()) {
                tag.declare(target, &decl.prefix, &decl.uri);
            }
        }
        let mut generated = self.generated;
        for attr in attributes {
            let attr = fix_attribute(&mut tag, target, attr, &mut generated);
            merge_attribute(&mut tag.attributes, attr);
        }
        self.generated = generated;

        let declared = tag.declared.clone();
        let name = tag.name.clone();
        let target = self.current_target_mut();
        target.scopes.push(declared);
        target.open.push(name);
        self.pending = Some(tag);
        Ok(())
    }

    /// Adds an attribute to the start tag that has not been written yet. A
    /// same-named attribute is replaced.
    pub fn add_attribute(&mut self, name: QualifiedName, value: String) -> Result<(), StxError> {
        let Some(mut tag) = self.pending.take() else {
            return Err(StxError::runtime(format!(
                "attribute '{}' created outside of an element start tag",
                name
            )));
        };
        let mut generated = self.generated;
        let attr = fix_attribute(&mut tag, self.current_target(), Attribute::new(name, value), &mut generated);
        self.generated = generated;
        merge_attribute(&mut tag.attributes, attr);
        let declared = tag.declared.clone();
        if let Some(scope) = self.current_target_mut().scopes.last_mut() {
            *scope = declared;
        }
        self.pending = Some(tag);
        Ok(())
    }

    pub fn end_element(&mut self, name: &QualifiedName) -> Result<(), StxError> {
        self.flush()?;
        let target = self.current_target_mut();
        let open = match target.open.last() {
            Some(open) if open.matches(name) => open.clone(),
            Some(open) => {
                return Err(StxError::fatal(format!(
                    "end tag </{}> does not match open element <{}>",
                    name, open
                )));
            }
            None => {
                return Err(StxError::fatal(format!("end tag </{}> without a start tag", name)));
            }
        };
        target.open.pop();
        target.scopes.pop();
        self.deliver(OutputEvent::EndElement(open))
    }

    pub fn characters(&mut self, text: &str) -> Result<(), StxError> {
        if text.is_empty() {
            return Ok(());
        }
        self.flush()?;
        self.deliver(OutputEvent::Characters(text.to_string()))
    }

    pub fn start_cdata(&mut self) -> Result<(), StxError> {
        self.flush()?;
        self.deliver(OutputEvent::StartCdata)
    }

    pub fn end_cdata(&mut self) -> Result<(), StxError> {
        self.flush()?;
        self.deliver(OutputEvent::EndCdata)
    }

    pub fn comment(&mut self, text: &str) -> Result<(), StxError> {
        self.flush()?;
        self.deliver(OutputEvent::Comment(text.to_string()))
    }

    pub fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError> {
        self.flush()?;
        self.deliver(OutputEvent::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        })
    }

    /// Redirects output into `sink` until the matching [`Emitter::pop_sink`].
    /// A start tag that is still open stays open across the capture.
    pub fn push_sink(&mut self, sink: Sink) -> Result<(), StxError> {
        let held = self.pending.take();
        self.captures.push(Capture {
            sink,
            target: Target::new(),
            held,
            attribute: false,
        });
        Ok(())
    }

    /// Starts capturing the value of an attribute. Fails while output is
    /// already flowing into another attribute value, whichever template
    /// produced it.
    pub fn begin_attribute(&mut self) -> Result<(), StxError> {
        if self.in_attribute() {
            return Err(StxError::fatal("can't create nested attribute"));
        }
        self.push_sink(Sink::Text(String::new()))?;
        if let Some(capture) = self.captures.last_mut() {
            capture.attribute = true;
        }
        Ok(())
    }

    /// True when the innermost capture is an attribute value.
    pub fn in_attribute(&self) -> bool {
        self.captures.last().is_some_and(|capture| capture.attribute)
    }

    pub fn pop_sink(&mut self) -> Result<Sink, StxError> {
        self.flush()?;
        let capture = self
            .captures
            .pop()
            .ok_or_else(|| StxError::fatal("no output capture to end"))?;
        if let Some(open) = capture.target.open.last() {
            return Err(StxError::fatal(format!(
                "missing end tag for <{}> in captured output",
                open
            )));
        }
        self.pending = capture.held;
        Ok(capture.sink)
    }

    fn flush(&mut self) -> Result<(), StxError> {
        match self.pending.take() {
            Some(tag) => self.deliver(OutputEvent::StartElement {
                name: tag.name,
                attributes: tag.attributes,
                namespaces: tag.declared,
            }),
            None => Ok(()),
        }
    }

    fn deliver(&mut self, event: OutputEvent) -> Result<(), StxError> {
        match self.captures.last_mut().map(|capture| &mut capture.sink) {
            Some(Sink::Text(text)) => {
                if let OutputEvent::Characters(chunk) = event {
                    text.push_str(&chunk);
                }
                Ok(())
            }
            Some(Sink::Events(events)) => {
                events.push(event);
                Ok(())
            }
            Some(Sink::Document(handler)) => event.replay(handler.as_mut()),
            None => event.replay(&mut self.handler),
        }
    }
}

/// Gives a namespaced attribute a prefix bound to its URI on this element.
fn fix_attribute(tag: &mut PendingTag, target: &Target, mut attr: Attribute, generated: &mut usize) -> Attribute {
    if attr.name.uri.is_empty() {
        attr.name.prefix = None;
        return attr;
    }
    if attr.name.uri == XML_NAMESPACE {
        attr.name.prefix = Some("xml".to_string());
        return attr;
    }
    let usable = |tag: &PendingTag, prefix: &str| match tag.binding(target, prefix) {
        Some(uri) => uri == attr.name.uri,
        None => true,
    };
    let prefix = match attr.name.prefix.as_deref() {
        Some(p) if !p.is_empty() && usable(tag, p) => p.to_string(),
        _ => loop {
            let candidate = format!("ns{}", *generated);
            *generated += 1;
            if tag.binding(target, &candidate).is_none() {
                break candidate;
            }
        },
    };
    tag.declare(target, &prefix, &attr.name.uri.clone());
    attr.name.prefix = Some(prefix);
    attr
}

fn merge_attribute(attributes: &mut Vec<Attribute>, attr: Attribute) {
    match attributes.iter_mut().find(|a| a.name.matches(&attr.name)) {
        Some(existing) => *existing = attr,
        None => attributes.push(attr),
    }
}

/// Lets filters write their output through the emitter.
impl<H: ResultHandler> ResultHandler for Emitter<H> {
    fn start_element(
        &mut self,
        name: &QualifiedName,
        attributes: &[Attribute],
        namespaces: &[NamespaceDecl],
    ) -> Result<(), StxError> {
        Emitter::start_element(self, name.clone(), attributes.to_vec(), namespaces)
    }

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), StxError> {
        Emitter::end_element(self, name)
    }

    fn characters(&mut self, text: &str) -> Result<(), StxError> {
        Emitter::characters(self, text)
    }

    fn start_cdata(&mut self) -> Result<(), StxError> {
        Emitter::start_cdata(self)
    }

    fn end_cdata(&mut self) -> Result<(), StxError> {
        Emitter::end_cdata(self)
    }

    fn comment(&mut self, text: &str) -> Result<(), StxError> {
        Emitter::comment(self, text)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError> {
        Emitter::processing_instruction(self, target, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RecordingHandler;

    fn start_decls(events: &[OutputEvent]) -> Vec<Vec<NamespaceDecl>> {
        events
            .iter()
            .filter_map(|e| match e {
                OutputEvent::StartElement { namespaces, .. } => Some(namespaces.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn namespaces_are_declared_once() {
        let mut em = Emitter::new(RecordingHandler::new());
        let outer = QualifiedName::new(Some("p"), "a", "urn:p");
        let inner = QualifiedName::new(Some("p"), "b", "urn:p");
        let decls = [NamespaceDecl::new("p", "urn:p")];
        em.start_element(outer.clone(), vec![], &decls).unwrap();
        em.start_element(inner.clone(), vec![], &decls).unwrap();
        em.end_element(&inner).unwrap();
        em.end_element(&outer).unwrap();
        em.end_document().unwrap();
        let decls = start_decls(em.handler().events());
        assert_eq!(decls[0], vec![NamespaceDecl::new("p", "urn:p")]);
        assert!(decls[1].is_empty());
    }

    #[test]
    fn default_namespace_is_undeclared_for_unqualified_child() {
        let mut em = Emitter::new(RecordingHandler::new());
        let outer = QualifiedName::new(None, "a", "urn:d");
        let inner = QualifiedName::local("b");
        em.start_element(outer.clone(), vec![], &[]).unwrap();
        em.start_element(inner.clone(), vec![], &[]).unwrap();
        em.end_element(&inner).unwrap();
        em.end_element(&outer).unwrap();
        let decls = start_decls(em.handler().events());
        assert_eq!(decls[0], vec![NamespaceDecl::new("", "urn:d")]);
        assert_eq!(decls[1], vec![NamespaceDecl::new("", "")]);
    }

    #[test]
    fn attributes_merge_into_open_tag() {
        let mut em = Emitter::new(RecordingHandler::new());
        let a = QualifiedName::local("a");
        em.start_element(a.clone(), vec![Attribute::new(QualifiedName::local("x"), "1")], &[])
            .unwrap();
        em.add_attribute(QualifiedName::local("x"), "2".into()).unwrap();
        em.add_attribute(QualifiedName::new(None, "y", "urn:y"), "3".into()).unwrap();
        em.characters("t").unwrap();
        let err = em.add_attribute(QualifiedName::local("z"), "late".into()).unwrap_err();
        assert!(err.is_recoverable());
        em.end_element(&a).unwrap();

        match &em.handler().events()[0] {
            OutputEvent::StartElement {
                attributes, namespaces, ..
            } => {
                assert_eq!(attributes.len(), 2);
                assert_eq!(attributes[0].value, "2");
                assert_eq!(attributes[1].name.prefix.as_deref(), Some("ns0"));
                assert_eq!(namespaces, &vec![NamespaceDecl::new("ns0", "urn:y")]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn mismatched_and_unclosed_elements_are_fatal() {
        let mut em = Emitter::new(RecordingHandler::new());
        em.start_element(QualifiedName::local("a"), vec![], &[]).unwrap();
        let err = em.end_element(&QualifiedName::local("b")).unwrap_err();
        assert!(matches!(err, StxError::Fatal { .. }));
        let err = em.end_document().unwrap_err();
        assert!(err.to_string().contains("missing end tag for <a>"));

        let mut em = Emitter::new(RecordingHandler::new());
        assert!(em.end_element(&QualifiedName::local("a")).is_err());
    }

    #[test]
    fn captures_redirect_output() {
        let mut em = Emitter::new(RecordingHandler::new());
        em.push_sink(Sink::Text(String::new())).unwrap();
        em.characters("a").unwrap();
        em.comment("ignored").unwrap();
        em.characters("b").unwrap();
        match em.pop_sink().unwrap() {
            Sink::Text(text) => assert_eq!(text, "ab"),
            other => panic!("unexpected {:?}", other),
        }

        em.push_sink(Sink::Events(Vec::new())).unwrap();
        em.start_element(QualifiedName::local("e"), vec![], &[]).unwrap();
        assert!(em.pop_sink().is_err());
        assert!(em.handler().events().is_empty());
    }

    #[test]
    fn captured_value_becomes_attribute_of_open_tag() {
        let mut em = Emitter::new(RecordingHandler::new());
        let c = QualifiedName::local("c");
        em.start_element(c.clone(), vec![], &[]).unwrap();
        em.push_sink(Sink::Text(String::new())).unwrap();
        em.characters("3").unwrap();
        let value = match em.pop_sink().unwrap() {
            Sink::Text(text) => text,
            other => panic!("unexpected {:?}", other),
        };
        assert!(em.handler().events().is_empty());
        em.add_attribute(QualifiedName::local("size"), value).unwrap();
        em.characters("t").unwrap();
        em.end_element(&c).unwrap();

        let events = em.handler().events();
        match &events[0] {
            OutputEvent::StartElement { name, attributes, .. } => {
                assert_eq!(name.local, "c");
                assert_eq!(attributes.len(), 1);
                assert_eq!(attributes[0].name.local, "size");
                assert_eq!(attributes[0].value, "3");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&events[1], OutputEvent::Characters(t) if t == "t"));
    }

    #[test]
    fn tag_held_across_capture_rejects_attributes_inside_it() {
        let mut em = Emitter::new(RecordingHandler::new());
        let c = QualifiedName::local("c");
        em.start_element(c.clone(), vec![], &[]).unwrap();
        em.push_sink(Sink::Events(Vec::new())).unwrap();
        let err = em.add_attribute(QualifiedName::local("k"), "v".into()).unwrap_err();
        assert!(err.is_recoverable());
        em.pop_sink().unwrap();
        em.add_attribute(QualifiedName::local("k"), "v".into()).unwrap();
        em.end_element(&c).unwrap();
        match &em.handler().events()[0] {
            OutputEvent::StartElement { attributes, .. } => assert_eq!(attributes[0].value, "v"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn attribute_values_do_not_nest() {
        let mut em = Emitter::new(RecordingHandler::new());
        let c = QualifiedName::local("c");
        em.start_element(c.clone(), vec![], &[]).unwrap();
        em.begin_attribute().unwrap();
        assert!(em.in_attribute());
        let err = em.begin_attribute().unwrap_err();
        assert!(matches!(err, StxError::Fatal { .. }));

        // A buffer inside the value holds its own elements and attributes.
        em.push_sink(Sink::Events(Vec::new())).unwrap();
        assert!(!em.in_attribute());
        let e = QualifiedName::local("e");
        em.start_element(e.clone(), vec![], &[]).unwrap();
        em.begin_attribute().unwrap();
        em.characters("1").unwrap();
        let value = match em.pop_sink().unwrap() {
            Sink::Text(value) => value,
            other => panic!("unexpected {:?}", other),
        };
        em.add_attribute(QualifiedName::local("n"), value).unwrap();
        em.end_element(&e).unwrap();
        match em.pop_sink().unwrap() {
            Sink::Events(events) => assert_eq!(events.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(em.in_attribute());
        em.pop_sink().unwrap();
        assert!(!em.in_attribute());
        em.end_element(&c).unwrap();
    }
}
