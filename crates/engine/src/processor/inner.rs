//! Processing content that does not come from the main input: buffers and
//! documents read by `process-document`. Both run to completion before the
//! calling instruction continues.

use super::Processor;
use super::frame::{Activation, Params};
use crate::error::StxError;
use crate::group::GroupId;
use crate::input::{ContentHandler, parse_str, replay};
use crate::output::{OutputEvent, ResultHandler};
use sluice_types::{Attribute, EventBuilder, EventRef, NamespaceScope, QualifiedName};
use std::rc::Rc;

/// Input position saved while an inner run borrows the processor.
struct Saved {
    events: Vec<EventRef>,
    open_depth: usize,
    pending: Option<EventBuilder>,
    text: String,
    cdata: Option<String>,
}

impl<H: ResultHandler> Processor<H> {
    fn save_input(&mut self, events: Vec<EventRef>, open_depth: usize) -> Saved {
        let saved = Saved {
            events: std::mem::replace(&mut self.events, events),
            open_depth: self.open_depth,
            pending: self.pending.take(),
            text: std::mem::take(&mut self.text),
            cdata: self.cdata.take(),
        };
        self.open_depth = open_depth;
        saved
    }

    fn restore_input(&mut self, saved: Saved) {
        self.events = saved.events;
        self.open_depth = saved.open_depth;
        self.pending = saved.pending;
        self.text = saved.text;
        self.cdata = saved.cdata;
    }

    /// Processes recorded events as children of the current node.
    pub(super) fn process_buffer(
        &mut self,
        act: &Activation,
        events: &[OutputEvent],
        group: GroupId,
        params: Params,
    ) -> Result<(), StxError> {
        let depth = act.depth();
        let mut stack = act.stack[..depth].to_vec();
        if let Some(node) = act.node() {
            stack.push(node.fresh_copy());
        }
        let saved = self.save_input(stack, depth);
        let bottom = self.frames.len();
        self.push_boundary(depth + 1, group, params);
        let result = self.replay_inner(events, depth);
        self.frames.truncate(bottom);
        self.restore_input(saved);
        result
    }

    fn replay_inner(&mut self, events: &[OutputEvent], depth: usize) -> Result<(), StxError> {
        replay(events, &mut Inner { processor: self, document: false })?;
        self.flush_text()?;
        self.events.truncate(depth + 1);
        self.close_below(depth)
    }

    /// Processes a complete external document, starting at its document node.
    pub(super) fn process_document(&mut self, text: &str, group: GroupId, params: Params) -> Result<(), StxError> {
        let saved = self.save_input(Vec::new(), 0);
        let bottom = self.frames.len();
        self.push_boundary(0, group, params);
        let result = parse_str(text, &mut Inner { processor: self, document: true });
        self.frames.truncate(bottom);
        self.restore_input(saved);
        result
    }
}

/// Routes the events of an inner run into the processor without the
/// document-level setup of the main input.
struct Inner<'a, H: ResultHandler> {
    processor: &'a mut Processor<H>,
    document: bool,
}

impl<H: ResultHandler> ContentHandler for Inner<'_, H> {
    fn start_document(&mut self) -> Result<(), StxError> {
        match self.document {
            true => self.processor.start_root(),
            false => Ok(()),
        }
    }

    fn end_document(&mut self) -> Result<(), StxError> {
        match self.document {
            true => self.processor.end_root(),
            false => Ok(()),
        }
    }

    fn start_element(
        &mut self,
        name: QualifiedName,
        attributes: Vec<Attribute>,
        namespaces: Rc<NamespaceScope>,
    ) -> Result<(), StxError> {
        self.processor.on_start_element(name, attributes, namespaces)
    }

    fn end_element(&mut self, _name: &QualifiedName) -> Result<(), StxError> {
        self.processor.on_end_element()
    }

    fn characters(&mut self, text: &str) -> Result<(), StxError> {
        self.processor.on_characters(text);
        Ok(())
    }

    fn start_cdata(&mut self) -> Result<(), StxError> {
        self.processor.on_start_cdata()
    }

    fn end_cdata(&mut self) -> Result<(), StxError> {
        self.processor.on_end_cdata()
    }

    fn comment(&mut self, text: &str) -> Result<(), StxError> {
        self.processor.on_comment(text)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError> {
        self.processor.on_processing_instruction(target, data)
    }
}
