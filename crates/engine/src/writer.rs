//! Serializes result events to XML text with quick-xml.

use crate::config::OutputConfig;
use crate::error::StxError;
use crate::output::ResultHandler;
use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use sluice_types::{Attribute, NamespaceDecl, QualifiedName};
use std::io::Write;

/// A [`ResultHandler`] writing markup to `W`. Start tags are held back until
/// the next event so that empty elements serialize as `<a/>`.
pub struct XmlWriter<W: Write> {
    writer: Writer<W>,
    pending: Option<BytesStart<'static>>,
    in_cdata: bool,
    declaration: Option<String>,
}

impl<W: Write> XmlWriter<W> {
    pub fn new(inner: W, config: &OutputConfig) -> Self {
        let writer = match config.indent {
            Some(width) if width > 0 => Writer::new_with_indent(inner, b' ', width),
            _ => Writer::new(inner),
        };
        Self {
            writer,
            pending: None,
            in_cdata: false,
            declaration: (!config.omit_xml_declaration).then(|| config.encoding.clone()),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }

    fn flush_pending(&mut self) -> Result<(), StxError> {
        if let Some(start) = self.pending.take() {
            self.writer.write_event(Event::Start(start))?;
        }
        Ok(())
    }
}

impl XmlWriter<Vec<u8>> {
    /// Writes into memory; see [`XmlWriter::into_string`].
    pub fn in_memory(config: &OutputConfig) -> Self {
        Self::new(Vec::new(), config)
    }

    pub fn into_string(self) -> Result<String, StxError> {
        String::from_utf8(self.into_inner()).map_err(|e| StxError::input(e.to_string()))
    }
}

impl<W: Write> ResultHandler for XmlWriter<W> {
    fn start_document(&mut self) -> Result<(), StxError> {
        if let Some(encoding) = self.declaration.take() {
            self.writer
                .write_event(Event::Decl(BytesDecl::new("1.0", Some(&encoding), None)))?;
        }
        Ok(())
    }

    fn end_document(&mut self) -> Result<(), StxError> {
        self.flush_pending()?;
        self.writer.get_mut().flush()?;
        Ok(())
    }

    fn start_element(
        &mut self,
        name: &QualifiedName,
        attributes: &[Attribute],
        namespaces: &[NamespaceDecl],
    ) -> Result<(), StxError> {
        self.flush_pending()?;
        let mut start = BytesStart::new(name.qname());
        for decl in namespaces {
            let key = if decl.prefix.is_empty() {
                "xmlns".to_string()
            } else {
                format!("xmlns:{}", decl.prefix)
            };
            start.push_attribute((key.as_str(), decl.uri.as_str()));
        }
        for attr in attributes {
            let key = attr.name.qname();
            start.push_attribute((key.as_str(), attr.value.as_str()));
        }
        self.pending = Some(start);
        Ok(())
    }

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), StxError> {
        match self.pending.take() {
            Some(start) => self.writer.write_event(Event::Empty(start))?,
            None => self.writer.write_event(Event::End(BytesEnd::new(name.qname())))?,
        }
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<(), StxError> {
        self.flush_pending()?;
        if self.in_cdata {
            // `]]>` can't appear inside a section; it is split across two.
            let mut rest = text;
            while let Some(end) = rest.find("]]>") {
                self.writer.write_event(Event::CData(BytesCData::new(&rest[..end + 2])))?;
                rest = &rest[end + 2..];
            }
            self.writer.write_event(Event::CData(BytesCData::new(rest)))?;
        } else {
            self.writer.write_event(Event::Text(BytesText::new(text)))?;
        }
        Ok(())
    }

    fn start_cdata(&mut self) -> Result<(), StxError> {
        self.flush_pending()?;
        self.in_cdata = true;
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<(), StxError> {
        self.in_cdata = false;
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), StxError> {
        if text.contains("--") || text.ends_with('-') {
            return Err(StxError::runtime(format!("comment text '{}' can't be serialized", text)));
        }
        self.flush_pending()?;
        self.writer.write_event(Event::Comment(BytesText::from_escaped(text)))?;
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError> {
        self.flush_pending()?;
        let content = if data.is_empty() {
            target.to_string()
        } else {
            format!("{} {}", target, data)
        };
        self.writer.write_event(Event::PI(BytesPI::new(content)))?;
        Ok(())
    }
}
