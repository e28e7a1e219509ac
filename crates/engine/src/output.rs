//! The result side: the [`ResultHandler`] trait that receives transformation
//! output, and recorded output events.

use crate::error::StxError;
use sluice_types::{Attribute, NamespaceDecl, QualifiedName};

/// Receives the result of a transformation as a stream of calls.
///
/// `namespaces` on `start_element` lists only the declarations that are new
/// at that element.
pub trait ResultHandler {
    fn start_document(&mut self) -> Result<(), StxError> {
        Ok(())
    }

    fn end_document(&mut self) -> Result<(), StxError> {
        Ok(())
    }

    fn start_element(
        &mut self,
        name: &QualifiedName,
        attributes: &[Attribute],
        namespaces: &[NamespaceDecl],
    ) -> Result<(), StxError>;

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), StxError>;

    fn characters(&mut self, text: &str) -> Result<(), StxError>;

    fn start_cdata(&mut self) -> Result<(), StxError> {
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<(), StxError> {
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), StxError>;

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError>;
}

impl<H: ResultHandler + ?Sized> ResultHandler for Box<H> {
    fn start_document(&mut self) -> Result<(), StxError> {
        (**self).start_document()
    }

    fn end_document(&mut self) -> Result<(), StxError> {
        (**self).end_document()
    }

    fn start_element(
        &mut self,
        name: &QualifiedName,
        attributes: &[Attribute],
        namespaces: &[NamespaceDecl],
    ) -> Result<(), StxError> {
        (**self).start_element(name, attributes, namespaces)
    }

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), StxError> {
        (**self).end_element(name)
    }

    fn characters(&mut self, text: &str) -> Result<(), StxError> {
        (**self).characters(text)
    }

    fn start_cdata(&mut self) -> Result<(), StxError> {
        (**self).start_cdata()
    }

    fn end_cdata(&mut self) -> Result<(), StxError> {
        (**self).end_cdata()
    }

    fn comment(&mut self, text: &str) -> Result<(), StxError> {
        (**self).comment(text)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError> {
        (**self).processing_instruction(target, data)
    }
}

/// One recorded [`ResultHandler`] call. Buffers store their content as a
/// sequence of these.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    StartDocument,
    EndDocument,
    StartElement {
        name: QualifiedName,
        attributes: Vec<Attribute>,
        namespaces: Vec<NamespaceDecl>,
    },
    EndElement(QualifiedName),
    Characters(String),
    StartCdata,
    EndCdata,
    Comment(String),
    ProcessingInstruction { target: String, data: String },
}

impl OutputEvent {
    pub fn replay(&self, handler: &mut dyn ResultHandler) -> Result<(), StxError> {
        match self {
            OutputEvent::StartDocument => handler.start_document(),
            OutputEvent::EndDocument => handler.end_document(),
            OutputEvent::StartElement {
                name,
                attributes,
                namespaces,
            } => handler.start_element(name, attributes, namespaces),
            OutputEvent::EndElement(name) => handler.end_element(name),
            OutputEvent::Characters(text) => handler.characters(text),
            OutputEvent::StartCdata => handler.start_cdata(),
            OutputEvent::EndCdata => handler.end_cdata(),
            OutputEvent::Comment(text) => handler.comment(text),
            OutputEvent::ProcessingInstruction { target, data } => handler.processing_instruction(target, data),
        }
    }
}

/// Collects output as [`OutputEvent`]s. Adjacent character chunks are merged.
#[derive(Debug, Default, Clone)]
pub struct RecordingHandler {
    events: Vec<OutputEvent>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[OutputEvent] {
        &self.events
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&mut self) -> Vec<OutputEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn into_events(self) -> Vec<OutputEvent> {
        self.events
    }

    pub fn push(&mut self, event: OutputEvent) {
        match (&event, self.events.last_mut()) {
            (OutputEvent::Characters(text), Some(OutputEvent::Characters(last))) => last.push_str(text),
            _ => self.events.push(event),
        }
    }

    /// Concatenated character data, ignoring markup.
    pub fn text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Characters(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl ResultHandler for RecordingHandler {
    fn start_document(&mut self) -> Result<(), StxError> {
        self.push(OutputEvent::StartDocument);
        Ok(())
    }

    fn end_document(&mut self) -> Result<(), StxError> {
        self.push(OutputEvent::EndDocument);
        Ok(())
    }

    fn start_element(
        &mut self,
        name: &QualifiedName,
        attributes: &[Attribute],
        namespaces: &[NamespaceDecl],
    ) -> Result<(), StxError> {
        self.push(OutputEvent::StartElement {
            name: name.clone(),
            attributes: attributes.to_vec(),
            namespaces: namespaces.to_vec(),
        });
        Ok(())
    }

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), StxError> {
        self.push(OutputEvent::EndElement(name.clone()));
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<(), StxError> {
        if !text.is_empty() {
            self.push(OutputEvent::Characters(text.to_string()));
        }
        Ok(())
    }

    fn start_cdata(&mut self) -> Result<(), StxError> {
        self.push(OutputEvent::StartCdata);
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<(), StxError> {
        self.push(OutputEvent::EndCdata);
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), StxError> {
        self.push(OutputEvent::Comment(text.to_string()));
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError> {
        self.push(OutputEvent::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_merges_text_and_replays() {
        let mut rec = RecordingHandler::new();
        let a = QualifiedName::local("a");
        rec.start_element(&a, &[], &[]).unwrap();
        rec.characters("x").unwrap();
        rec.characters("").unwrap();
        rec.characters("y").unwrap();
        rec.end_element(&a).unwrap();
        assert_eq!(rec.events().len(), 3);
        assert_eq!(rec.text(), "xy");

        let mut copy = RecordingHandler::new();
        for event in rec.events() {
            event.replay(&mut copy).unwrap();
        }
        assert_eq!(copy.events(), rec.events());
    }
}
