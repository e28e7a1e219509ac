//! The streaming processor.
//!
//! A [`Processor`] receives the input document as [`ContentHandler`] calls and
//! runs the compiled sheet against it, one node at a time. Only the ancestors
//! of the current node are kept. A template that asks for the children or
//! following siblings of its node is suspended on the frame stack and resumed
//! once that content has been processed.

mod dispatch;
mod exec;
mod frame;
mod inner;
mod scope;

use crate::config::{GroupConfig, ProcessorConfig};
use crate::emitter::Emitter;
use crate::error::{DefaultErrorHandler, ErrorHandler, StxError};
use crate::filter::{BuiltinFilters, FilterResolver};
use crate::input::ContentHandler;
use crate::output::ResultHandler;
use crate::resolve::{DocumentResolver, FileResolver, MemoryOutputResolver, OutputResolver};
use crate::sheet::{Sheet, TOP_GROUP};
use frame::Frame;
use scope::GroupScopes;
use sluice_types::{Attribute, EventBuilder, EventRef, ExpandedName, NamespaceScope, QualifiedName, Value};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

pub struct Processor<H: ResultHandler> {
    sheet: Arc<Sheet>,
    config: ProcessorConfig,
    emitter: Emitter<H>,
    /// Ancestors of the current node; index 0 is the document node.
    events: Vec<EventRef>,
    /// Depth of the innermost open element.
    open_depth: usize,
    frames: Vec<Frame>,
    scopes: GroupScopes,
    /// An element start held back until its first child or its end, so that
    /// its text content is known when it is matched.
    pending: Option<EventBuilder>,
    text: String,
    cdata: Option<String>,
    parameters: HashMap<ExpandedName, Value>,
    error_handler: Box<dyn ErrorHandler>,
    documents: Box<dyn DocumentResolver>,
    outputs: Box<dyn OutputResolver>,
    filters: Box<dyn FilterResolver>,
    messages: Vec<String>,
    aborted: bool,
}

impl<H: ResultHandler> Processor<H> {
    pub fn new(sheet: Arc<Sheet>, config: ProcessorConfig, handler: H) -> Self {
        let output = sheet.output().cloned().unwrap_or_else(|| config.output.clone());
        Self {
            error_handler: Box::new(DefaultErrorHandler::new(config.strict)),
            outputs: Box::new(MemoryOutputResolver::new(output)),
            sheet,
            config,
            emitter: Emitter::new(handler),
            events: Vec::new(),
            open_depth: 0,
            frames: Vec::new(),
            scopes: GroupScopes::default(),
            pending: None,
            text: String::new(),
            cdata: None,
            parameters: HashMap::new(),
            documents: Box::new(FileResolver),
            filters: Box::new(BuiltinFilters::new()),
            messages: Vec::new(),
            aborted: false,
        }
    }

    pub fn sheet(&self) -> &Arc<Sheet> {
        &self.sheet
    }

    /// Sets a global parameter by lexical name. A prefix is resolved with the
    /// namespaces declared in the sheet.
    pub fn set_parameter(&mut self, name: &str, value: impl Into<Value>) -> Result<(), StxError> {
        let (prefix, local) = QualifiedName::split(name);
        let uri = match prefix {
            Some(prefix) => self
                .sheet
                .namespaces
                .get(prefix)
                .cloned()
                .ok_or_else(|| StxError::fatal(format!("undeclared namespace prefix in parameter '{}'", name)))?,
            None => String::new(),
        };
        self.parameters.insert(ExpandedName::new(uri, local), value.into());
        Ok(())
    }

    pub fn set_parameter_value(&mut self, name: ExpandedName, value: Value) {
        self.parameters.insert(name, value);
    }

    pub fn set_error_handler(&mut self, handler: impl ErrorHandler + 'static) {
        self.error_handler = Box::new(handler);
    }

    pub fn set_document_resolver(&mut self, resolver: impl DocumentResolver + 'static) {
        self.documents = Box::new(resolver);
    }

    pub fn set_output_resolver(&mut self, resolver: impl OutputResolver + 'static) {
        self.outputs = Box::new(resolver);
    }

    pub fn set_filter_resolver(&mut self, resolver: impl FilterResolver + 'static) {
        self.filters = Box::new(resolver);
    }

    /// Text of every `message` instruction executed so far.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn handler(&self) -> &H {
        self.emitter.handler()
    }

    pub fn handler_mut(&mut self) -> &mut H {
        self.emitter.handler_mut()
    }

    pub fn into_handler(self) -> H {
        self.emitter.into_handler()
    }

    fn recover(&mut self, error: StxError) -> Result<(), StxError> {
        self.error_handler.error(error)
    }

    /// The configuration of the group governing the current input position.
    fn input_config(&self) -> &GroupConfig {
        let group = self.frames.last().map(|f| f.group).unwrap_or(TOP_GROUP);
        &self.sheet.groups[group].config
    }

    /// Runs one input callback. The first error aborts the transformation;
    /// it is reported once and every later call fails with
    /// [`StxError::Aborted`].
    fn guard(&mut self, f: impl FnOnce(&mut Self) -> Result<(), StxError>) -> Result<(), StxError> {
        if self.aborted {
            return Err(StxError::Aborted);
        }
        let result = f(self);
        if let Err(error) = &result {
            self.aborted = true;
            self.error_handler.fatal(error);
        }
        result
    }
}

impl<H: ResultHandler> ContentHandler for Processor<H> {
    fn start_document(&mut self) -> Result<(), StxError> {
        self.guard(|p| {
            log::debug!("starting transformation with {} templates", p.sheet.template_count());
            p.frames.clear();
            p.events.clear();
            p.init_scopes()?;
            p.emitter.start_document()?;
            p.push_boundary(0, TOP_GROUP, Rc::default());
            p.start_root()
        })
    }

    fn end_document(&mut self) -> Result<(), StxError> {
        self.guard(|p| {
            p.end_root()?;
            p.frames.clear();
            p.emitter.end_document()
        })
    }

    fn start_element(
        &mut self,
        name: QualifiedName,
        attributes: Vec<Attribute>,
        namespaces: Rc<NamespaceScope>,
    ) -> Result<(), StxError> {
        self.guard(|p| p.on_start_element(name, attributes, namespaces))
    }

    fn end_element(&mut self, _name: &QualifiedName) -> Result<(), StxError> {
        self.guard(|p| p.on_end_element())
    }

    fn characters(&mut self, text: &str) -> Result<(), StxError> {
        self.guard(|p| {
            p.on_characters(text);
            Ok(())
        })
    }

    fn start_cdata(&mut self) -> Result<(), StxError> {
        self.guard(|p| p.on_start_cdata())
    }

    fn end_cdata(&mut self) -> Result<(), StxError> {
        self.guard(|p| p.on_end_cdata())
    }

    fn comment(&mut self, text: &str) -> Result<(), StxError> {
        self.guard(|p| p.on_comment(text))
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError> {
        self.guard(|p| p.on_processing_instruction(target, data))
    }
}

#[cfg(test)]
mod tests;
