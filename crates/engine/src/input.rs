//! The input side: the [`ContentHandler`] trait a processor implements, a
//! quick-xml driver that feeds it from XML text, and a replayer feeding it
//! from recorded output events.

use crate::error::StxError;
use crate::output::OutputEvent;
use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event as XmlEvent};
use sluice_types::{Attribute, NamespaceDecl, NamespaceScope, QualifiedName};
use std::rc::Rc;

/// Receives a document as a stream of parse events.
pub trait ContentHandler {
    fn start_document(&mut self) -> Result<(), StxError>;
    fn end_document(&mut self) -> Result<(), StxError>;

    fn start_prefix_mapping(&mut self, _prefix: &str, _uri: &str) -> Result<(), StxError> {
        Ok(())
    }

    fn end_prefix_mapping(&mut self, _prefix: &str) -> Result<(), StxError> {
        Ok(())
    }

    /// `namespaces` are the bindings in scope at this element, including its
    /// own declarations.
    fn start_element(
        &mut self,
        name: QualifiedName,
        attributes: Vec<Attribute>,
        namespaces: Rc<NamespaceScope>,
    ) -> Result<(), StxError>;

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), StxError>;
    fn characters(&mut self, text: &str) -> Result<(), StxError>;
    fn start_cdata(&mut self) -> Result<(), StxError>;
    fn end_cdata(&mut self) -> Result<(), StxError>;
    fn comment(&mut self, text: &str) -> Result<(), StxError>;
    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError>;
}

/// Parses `source` and reports it to `handler`. Adjacent character data,
/// including resolved entity references, arrives as one `characters` call.
pub fn parse_str(source: &str, handler: &mut dyn ContentHandler) -> Result<(), StxError> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut scopes: Vec<(Rc<NamespaceScope>, Vec<NamespaceDecl>)> = Vec::new();
    let root = NamespaceScope::root();

    handler.start_document()?;
    loop {
        match reader.read_event_into(&mut buf)? {
            XmlEvent::Start(e) => {
                flush_text(&mut text, handler)?;
                let parent = scopes.last().map(|(s, _)| Rc::clone(s)).unwrap_or_else(|| Rc::clone(&root));
                let (name, attributes, scope, decls) = read_start(&e, &parent)?;
                for decl in &decls {
                    handler.start_prefix_mapping(&decl.prefix, &decl.uri)?;
                }
                handler.start_element(name, attributes, Rc::clone(&scope))?;
                scopes.push((scope, decls));
            }
            XmlEvent::Empty(e) => {
                flush_text(&mut text, handler)?;
                let parent = scopes.last().map(|(s, _)| Rc::clone(s)).unwrap_or_else(|| Rc::clone(&root));
                let (name, attributes, scope, decls) = read_start(&e, &parent)?;
                for decl in &decls {
                    handler.start_prefix_mapping(&decl.prefix, &decl.uri)?;
                }
                handler.start_element(name.clone(), attributes, scope)?;
                handler.end_element(&name)?;
                for decl in decls.iter().rev() {
                    handler.end_prefix_mapping(&decl.prefix)?;
                }
            }
            XmlEvent::End(e) => {
                flush_text(&mut text, handler)?;
                let (scope, decls) = scopes
                    .pop()
                    .ok_or_else(|| StxError::input("end tag without start tag"))?;
                let raw = std::str::from_utf8(e.name().as_ref())
                    .map_err(|e| StxError::input(e.to_string()))?
                    .to_string();
                let name = resolve_name(&raw, &scope, true)?;
                handler.end_element(&name)?;
                for decl in decls.iter().rev() {
                    handler.end_prefix_mapping(&decl.prefix)?;
                }
            }
            XmlEvent::Text(e) => {
                let raw = std::str::from_utf8(e.as_ref()).map_err(|e| StxError::input(e.to_string()))?;
                let unescaped = unescape(raw).map_err(|e| StxError::input(e.to_string()))?;
                text.push_str(&unescaped);
            }
            XmlEvent::GeneralRef(e) => {
                let raw = std::str::from_utf8(e.as_ref()).map_err(|e| StxError::input(e.to_string()))?;
                text.push_str(&resolve_reference(raw)?);
            }
            XmlEvent::CData(e) => {
                flush_text(&mut text, handler)?;
                let raw = std::str::from_utf8(e.as_ref()).map_err(|e| StxError::input(e.to_string()))?;
                handler.start_cdata()?;
                handler.characters(raw)?;
                handler.end_cdata()?;
            }
            XmlEvent::Comment(e) => {
                flush_text(&mut text, handler)?;
                let raw = std::str::from_utf8(e.as_ref()).map_err(|e| StxError::input(e.to_string()))?;
                handler.comment(raw)?;
            }
            XmlEvent::PI(e) => {
                flush_text(&mut text, handler)?;
                let raw = std::str::from_utf8(e.as_ref()).map_err(|e| StxError::input(e.to_string()))?;
                let (target, data) = match raw.split_once(char::is_whitespace) {
                    Some((target, data)) => (target, data.trim_start()),
                    None => (raw, ""),
                };
                handler.processing_instruction(target, data)?;
            }
            XmlEvent::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    if !scopes.is_empty() {
        return Err(StxError::input("unexpected end of input inside an element"));
    }
    flush_text(&mut text, handler)?;
    handler.end_document()
}

fn flush_text(text: &mut String, handler: &mut dyn ContentHandler) -> Result<(), StxError> {
    if !text.is_empty() {
        handler.characters(text)?;
        text.clear();
    }
    Ok(())
}

type StartTag = (QualifiedName, Vec<Attribute>, Rc<NamespaceScope>, Vec<NamespaceDecl>);

fn read_start(e: &BytesStart<'_>, parent: &Rc<NamespaceScope>) -> Result<StartTag, StxError> {
    let mut decls = Vec::new();
    let mut raw_attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| StxError::input(e.to_string()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| StxError::input(e.to_string()))?
            .to_string();
        let raw = std::str::from_utf8(&attr.value).map_err(|e| StxError::input(e.to_string()))?;
        let value = unescape(raw).map_err(|e| StxError::input(e.to_string()))?.into_owned();
        if key == "xmlns" {
            decls.push(NamespaceDecl::new("", value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            decls.push(NamespaceDecl::new(prefix, value));
        } else {
            raw_attributes.push((key, value));
        }
    }
    let scope = NamespaceScope::extend(parent, &decls);
    let raw_name = std::str::from_utf8(e.name().as_ref())
        .map_err(|e| StxError::input(e.to_string()))?
        .to_string();
    let name = resolve_name(&raw_name, &scope, true)?;
    let attributes = raw_attributes
        .into_iter()
        .map(|(key, value)| Ok(Attribute::new(resolve_name(&key, &scope, false)?, value)))
        .collect::<Result<Vec<_>, StxError>>()?;
    Ok((name, attributes, scope, decls))
}

fn resolve_name(raw: &str, scope: &NamespaceScope, use_default: bool) -> Result<QualifiedName, StxError> {
    match QualifiedName::split(raw) {
        (Some(prefix), local) => {
            let uri = scope
                .resolve(prefix)
                .ok_or_else(|| StxError::input(format!("undeclared namespace prefix '{}'", prefix)))?;
            Ok(QualifiedName::new(Some(prefix), local, uri))
        }
        (None, local) => {
            let uri = if use_default { scope.default_namespace() } else { "" };
            Ok(QualifiedName::new(None, local, uri))
        }
    }
}

fn resolve_reference(name: &str) -> Result<String, StxError> {
    let resolved = match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok()
            } else {
                None
            };
            code.and_then(char::from_u32)
        }
    };
    resolved
        .map(String::from)
        .ok_or_else(|| StxError::input(format!("unknown entity reference '&{};'", name)))
}

/// Feeds recorded output back into a [`ContentHandler`] as if it had been
/// parsed, one event at a time. Document events are skipped; the caller
/// brackets the replay.
#[derive(Debug, Default)]
pub struct Replayer {
    scopes: Vec<Rc<NamespaceScope>>,
    declared: Vec<Vec<NamespaceDecl>>,
}

impl Replayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, event: &OutputEvent, handler: &mut dyn ContentHandler) -> Result<(), StxError> {
        match event {
            OutputEvent::StartDocument | OutputEvent::EndDocument => Ok(()),
            OutputEvent::StartElement {
                name,
                attributes,
                namespaces,
            } => {
                let parent = self.scopes.last().cloned().unwrap_or_else(NamespaceScope::root);
                let scope = NamespaceScope::extend(&parent, namespaces);
                for decl in namespaces {
                    handler.start_prefix_mapping(&decl.prefix, &decl.uri)?;
                }
                handler.start_element(name.clone(), attributes.clone(), Rc::clone(&scope))?;
                self.scopes.push(scope);
                self.declared.push(namespaces.clone());
                Ok(())
            }
            OutputEvent::EndElement(name) => {
                handler.end_element(name)?;
                self.scopes.pop();
                for decl in self.declared.pop().unwrap_or_default().iter().rev() {
                    handler.end_prefix_mapping(&decl.prefix)?;
                }
                Ok(())
            }
            OutputEvent::Characters(text) => handler.characters(text),
            OutputEvent::StartCdata => handler.start_cdata(),
            OutputEvent::EndCdata => handler.end_cdata(),
            OutputEvent::Comment(text) => handler.comment(text),
            OutputEvent::ProcessingInstruction { target, data } => handler.processing_instruction(target, data),
        }
    }
}

/// Replays a whole recorded sequence.
pub fn replay(events: &[OutputEvent], handler: &mut dyn ContentHandler) -> Result<(), StxError> {
    let mut replayer = Replayer::new();
    for event in events {
        replayer.feed(event, handler)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Trace(Vec<String>);

    impl ContentHandler for Trace {
        fn start_document(&mut self) -> Result<(), StxError> {
            self.0.push("doc".into());
            Ok(())
        }
        fn end_document(&mut self) -> Result<(), StxError> {
            self.0.push("/doc".into());
            Ok(())
        }
        fn start_element(
            &mut self,
            name: QualifiedName,
            attributes: Vec<Attribute>,
            namespaces: Rc<NamespaceScope>,
        ) -> Result<(), StxError> {
            let attrs: Vec<String> = attributes
                .iter()
                .map(|a| format!("{}={}", a.name.expanded(), a.value))
                .collect();
            let default = namespaces.default_namespace().to_string();
            self.0
                .push(format!("<{} [{}] default={}", name.expanded(), attrs.join(","), default));
            Ok(())
        }
        fn end_element(&mut self, name: &QualifiedName) -> Result<(), StxError> {
            self.0.push(format!("</{}", name.local));
            Ok(())
        }
        fn characters(&mut self, text: &str) -> Result<(), StxError> {
            self.0.push(format!("'{}'", text));
            Ok(())
        }
        fn start_cdata(&mut self) -> Result<(), StxError> {
            self.0.push("cdata".into());
            Ok(())
        }
        fn end_cdata(&mut self) -> Result<(), StxError> {
            self.0.push("/cdata".into());
            Ok(())
        }
        fn comment(&mut self, text: &str) -> Result<(), StxError> {
            self.0.push(format!("!{}", text));
            Ok(())
        }
        fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError> {
            self.0.push(format!("?{}|{}", target, data));
            Ok(())
        }
    }

    #[test]
    fn parses_namespaces_entities_and_markup() {
        let mut trace = Trace::default();
        parse_str(
            r#"<r xmlns="urn:d" xmlns:p="urn:p" p:a="1&amp;2" b="x"><p:c/>a &lt; b&#65;<![CDATA[<raw>]]><!--note--><?go now?></r>"#,
            &mut trace,
        )
        .unwrap();
        assert_eq!(
            trace.0,
            vec![
                "doc",
                "<{urn:d}r [{urn:p}a=1&2,b=x] default=urn:d",
                "<{urn:p}c [] default=urn:d",
                "</c",
                "'a < bA'",
                "cdata",
                "'<raw>'",
                "/cdata",
                "!note",
                "?go|now",
                "</r",
                "/doc",
            ]
        );
    }

    #[test]
    fn undeclared_prefix_is_an_error() {
        let mut trace = Trace::default();
        assert!(parse_str("<p:a/>", &mut trace).is_err());
    }

    #[test]
    fn replay_rebuilds_scopes() {
        let events = vec![
            OutputEvent::StartElement {
                name: QualifiedName::new(None, "a", "urn:d"),
                attributes: vec![],
                namespaces: vec![NamespaceDecl::new("", "urn:d")],
            },
            OutputEvent::Characters("t".into()),
            OutputEvent::EndElement(QualifiedName::new(None, "a", "urn:d")),
        ];
        let mut trace = Trace::default();
        replay(&events, &mut trace).unwrap();
        assert_eq!(trace.0, vec!["<{urn:d}a [] default=urn:d", "'t'", "</a"]);
    }
}
