//! External filters for `process-*` instructions that name a filter method.
//!
//! A filter receives the selected content as [`OutputEvent`]s and writes its
//! result back into the output of the calling template.

use crate::config::ProcessorConfig;
use crate::error::StxError;
use crate::input::{ContentHandler, Replayer};
use crate::output::{OutputEvent, RecordingHandler, ResultHandler};
use crate::processor::Processor;
use crate::sheet::Sheet;
use sluice_types::{Attribute, Event, EventKind, ExpandedName, NamespaceDecl, NamespaceScope, QualifiedName, Value};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Passes events through unchanged.
pub const IDENTITY_METHOD: &str = "urn:sluice:identity";

/// Runs a registered sheet over the events; `src` names the sheet.
pub const SHEET_METHOD: &str = "urn:sluice:sheet";

pub trait Filter {
    fn event(&mut self, event: &OutputEvent, out: &mut dyn ResultHandler) -> Result<(), StxError>;

    /// Called once after the last event.
    fn finish(&mut self, out: &mut dyn ResultHandler) -> Result<(), StxError>;
}

/// Creates filters by method URI.
pub trait FilterResolver {
    fn resolve(
        &mut self,
        method: &str,
        src: Option<&str>,
        params: &HashMap<ExpandedName, Value>,
    ) -> Result<Box<dyn Filter>, StxError>;
}

#[derive(Debug, Default)]
pub struct IdentityFilter;

impl Filter for IdentityFilter {
    fn event(&mut self, event: &OutputEvent, out: &mut dyn ResultHandler) -> Result<(), StxError> {
        match event {
            OutputEvent::StartDocument | OutputEvent::EndDocument => Ok(()),
            event => event.replay(out),
        }
    }

    fn finish(&mut self, _out: &mut dyn ResultHandler) -> Result<(), StxError> {
        Ok(())
    }
}

/// The default resolver: the identity filter, and sheets registered by name.
#[derive(Debug, Default, Clone)]
pub struct BuiltinFilters {
    sheets: HashMap<String, Arc<Sheet>>,
}

impl BuiltinFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `sheet` available to [`SHEET_METHOD`] filters as `src="name"`.
    pub fn register(&mut self, name: impl Into<String>, sheet: Arc<Sheet>) {
        self.sheets.insert(name.into(), sheet);
    }
}

impl FilterResolver for BuiltinFilters {
    fn resolve(
        &mut self,
        method: &str,
        src: Option<&str>,
        params: &HashMap<ExpandedName, Value>,
    ) -> Result<Box<dyn Filter>, StxError> {
        match method {
            IDENTITY_METHOD => Ok(Box::new(IdentityFilter)),
            SHEET_METHOD => {
                let name = src.ok_or_else(|| StxError::fatal("the sheet filter needs a 'src'"))?;
                let sheet = self
                    .sheets
                    .get(name)
                    .ok_or_else(|| StxError::fatal(format!("no sheet registered as '{}'", name)))?;
                let mut filter = SheetFilter::new(Arc::clone(sheet));
                for (name, value) in params {
                    filter.processor.set_parameter_value(name.clone(), value.clone());
                }
                Ok(Box::new(filter))
            }
            other => Err(StxError::fatal(format!("unknown filter method '{}'", other))),
        }
    }
}

/// Transforms the filtered events with another sheet.
pub struct SheetFilter {
    processor: Processor<RecordingHandler>,
    replayer: Replayer,
    started: bool,
}

impl SheetFilter {
    pub fn new(sheet: Arc<Sheet>) -> Self {
        Self {
            processor: Processor::new(sheet, ProcessorConfig::default(), RecordingHandler::new()),
            replayer: Replayer::new(),
            started: false,
        }
    }

    fn drain(&mut self, out: &mut dyn ResultHandler) -> Result<(), StxError> {
        for event in self.processor.handler_mut().take() {
            match event {
                OutputEvent::StartDocument | OutputEvent::EndDocument => {}
                event => event.replay(out)?,
            }
        }
        Ok(())
    }
}

impl Filter for SheetFilter {
    fn event(&mut self, event: &OutputEvent, out: &mut dyn ResultHandler) -> Result<(), StxError> {
        if !self.started {
            self.started = true;
            self.processor.start_document()?;
        }
        self.replayer.feed(event, &mut self.processor)?;
        self.drain(out)
    }

    fn finish(&mut self, out: &mut dyn ResultHandler) -> Result<(), StxError> {
        if !self.started {
            self.started = true;
            self.processor.start_document()?;
        }
        self.processor.end_document()?;
        self.drain(out)
    }
}

/// The events that reproduce a single input node, without its children.
pub(crate) fn node_events(event: &Event) -> Vec<OutputEvent> {
    match event.kind() {
        EventKind::Root | EventKind::Attribute => Vec::new(),
        EventKind::Element => match event.name() {
            Some(name) => vec![OutputEvent::StartElement {
                name: name.clone(),
                attributes: event.attributes().to_vec(),
                namespaces: event.namespaces().declarations(),
            }],
            None => Vec::new(),
        },
        EventKind::Text => vec![OutputEvent::Characters(event.value().to_string())],
        EventKind::Cdata => vec![
            OutputEvent::StartCdata,
            OutputEvent::Characters(event.value().to_string()),
            OutputEvent::EndCdata,
        ],
        EventKind::Comment => vec![OutputEvent::Comment(event.value().to_string())],
        EventKind::Pi => vec![OutputEvent::ProcessingInstruction {
            target: event.name().map(|n| n.local.to_string()).unwrap_or_default(),
            data: event.value().to_string(),
        }],
    }
}

/// Records a parsed document as output events, for filtering documents
/// read by `process-document`.
#[derive(Debug, Default)]
pub(crate) struct Collector {
    pub events: Vec<OutputEvent>,
    declared: Vec<NamespaceDecl>,
}

impl ContentHandler for Collector {
    fn start_document(&mut self) -> Result<(), StxError> {
        Ok(())
    }

    fn end_document(&mut self) -> Result<(), StxError> {
        Ok(())
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<(), StxError> {
        self.declared.push(NamespaceDecl::new(prefix, uri));
        Ok(())
    }

    fn start_element(
        &mut self,
        name: QualifiedName,
        attributes: Vec<Attribute>,
        _namespaces: Rc<NamespaceScope>,
    ) -> Result<(), StxError> {
        self.events.push(OutputEvent::StartElement {
            name,
            attributes,
            namespaces: std::mem::take(&mut self.declared),
        });
        Ok(())
    }

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), StxError> {
        self.events.push(OutputEvent::EndElement(name.clone()));
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<(), StxError> {
        self.events.push(OutputEvent::Characters(text.to_string()));
        Ok(())
    }

    fn start_cdata(&mut self) -> Result<(), StxError> {
        self.events.push(OutputEvent::StartCdata);
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<(), StxError> {
        self.events.push(OutputEvent::EndCdata);
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), StxError> {
        self.events.push(OutputEvent::Comment(text.to_string()));
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError> {
        self.events.push(OutputEvent::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        });
        Ok(())
    }
}
