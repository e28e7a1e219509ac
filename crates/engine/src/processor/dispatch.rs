//! Routing input nodes to templates and closing frames as the input moves on.

use super::Processor;
use super::frame::{Activation, Frame, FrameState, Params};
use super::scope::Scope;
use crate::error::StxError;
use crate::filter::node_events;
use crate::group::{GroupId, TemplateId};
use crate::instr::Instr;
use crate::output::{OutputEvent, ResultHandler};
use sluice_types::{Attribute, Event, EventBuilder, EventKind, EventRef, NamespaceScope, QualifiedName};
use std::rc::Rc;
use std::sync::Arc;

fn describe(event: &Event) -> String {
    match (event.kind(), event.name()) {
        (EventKind::Root, _) => "document node".to_string(),
        (EventKind::Element, Some(name)) => format!("<{}>", name),
        (EventKind::Attribute, Some(name)) => format!("@{}", name),
        (EventKind::Pi, Some(name)) => format!("<?{}?>", name),
        (kind, _) => format!("{:?} node", kind).to_lowercase(),
    }
}

impl<H: ResultHandler> Processor<H> {
    pub(super) fn on_start_element(
        &mut self,
        name: QualifiedName,
        attributes: Vec<Attribute>,
        namespaces: Rc<NamespaceScope>,
    ) -> Result<(), StxError> {
        self.flush_pending(true)?;
        self.flush_text()?;
        self.pending = Some(EventBuilder::element(name, attributes, namespaces));
        Ok(())
    }

    pub(super) fn on_end_element(&mut self) -> Result<(), StxError> {
        if self.pending.is_some() {
            self.flush_pending(false)?;
        }
        self.flush_text()?;
        let depth = self.open_depth;
        self.end_node(depth)?;
        self.open_depth = depth.saturating_sub(1);
        Ok(())
    }

    pub(super) fn on_characters(&mut self, text: &str) {
        match &mut self.cdata {
            Some(cdata) => cdata.push_str(text),
            None => self.text.push_str(text),
        }
    }

    pub(super) fn on_start_cdata(&mut self) -> Result<(), StxError> {
        if !self.input_config().recognize_cdata {
            return Ok(());
        }
        self.flush_pending(true)?;
        self.flush_text()?;
        self.cdata = Some(String::new());
        Ok(())
    }

    pub(super) fn on_end_cdata(&mut self) -> Result<(), StxError> {
        match self.cdata.take() {
            Some(text) => self.leaf(Event::cdata(text)),
            None => Ok(()),
        }
    }

    pub(super) fn on_comment(&mut self, text: &str) -> Result<(), StxError> {
        self.flush_pending(true)?;
        self.flush_text()?;
        self.leaf(Event::comment(text))
    }

    pub(super) fn on_processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError> {
        self.flush_pending(true)?;
        self.flush_text()?;
        self.leaf(Event::processing_instruction(target, data))
    }

    /// Pushes the document node and processes it.
    pub(super) fn start_root(&mut self) -> Result<(), StxError> {
        let root = Event::root();
        self.push_node(Rc::clone(&root), 0);
        self.open_depth = 0;
        self.dispatch(root, 0)
    }

    pub(super) fn end_root(&mut self) -> Result<(), StxError> {
        if self.pending.is_some() {
            self.flush_pending(false)?;
        }
        self.flush_text()?;
        self.end_node(0)
    }

    pub(super) fn push_boundary(&mut self, child_depth: usize, group: GroupId, params: Params) {
        self.frames.push(Frame {
            state: FrameState::Boundary { child_depth },
            depth: child_depth.saturating_sub(1),
            group,
            params,
            activation: None,
        });
    }

    /// Completes the held-back element start and processes it.
    fn flush_pending(&mut self, has_children: bool) -> Result<(), StxError> {
        let Some(mut builder) = self.pending.take() else {
            return Ok(());
        };
        let strip = self.input_config().strip_space;
        let has_text = !self.text.is_empty() && !(strip && self.text.trim().is_empty());
        builder.set_value(self.text.clone());
        builder.set_has_child_nodes(has_children || has_text);
        let event = builder.build();
        let depth = self.open_depth + 1;
        self.push_node(Rc::clone(&event), depth);
        self.open_depth = depth;
        self.dispatch(event, depth)
    }

    pub(super) fn flush_text(&mut self) -> Result<(), StxError> {
        if self.text.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.text);
        if self.input_config().strip_space && text.trim().is_empty() {
            return Ok(());
        }
        self.leaf(Event::text(text))
    }

    fn leaf(&mut self, event: EventRef) -> Result<(), StxError> {
        let depth = self.open_depth + 1;
        self.push_node(Rc::clone(&event), depth);
        self.dispatch(event, depth)
    }

    /// Makes `event` the node at `depth`, counting it as a child of the node
    /// above.
    pub(super) fn push_node(&mut self, event: EventRef, depth: usize) {
        self.events.truncate(depth);
        if let Some(parent) = self.events.last() {
            parent.count_child(&event);
        }
        self.events.push(event);
    }

    /// Processes the node at `depth`, which is the top of `events`.
    pub(super) fn dispatch(&mut self, event: EventRef, depth: usize) -> Result<(), StxError> {
        if let Some(Frame {
            state: FrameState::Filter { filter, .. },
            depth: filter_depth,
            ..
        }) = self.frames.last_mut()
        {
            if *filter_depth < depth {
                for output in node_events(&event) {
                    filter.event(&output, &mut self.emitter)?;
                }
                return Ok(());
            }
        }
        self.resolve_siblings(depth)?;
        let Some((group, params)) = self.governing(depth) else {
            log::trace!("{} at depth {} is not selected", describe(&event), depth);
            return Ok(());
        };
        let stack = self.events[..=depth].to_vec();
        self.process_node(stack, group, params, &[])
    }

    /// The group and parameters for a node at `depth`, if any frame selects
    /// it.
    fn governing(&self, depth: usize) -> Option<(GroupId, Params)> {
        let frame = self.frames.last()?;
        let selected = match frame.state {
            FrameState::Siblings { .. } => frame.depth == depth,
            FrameState::Children | FrameState::PassThrough { .. } | FrameState::Attributes => frame.depth + 1 == depth,
            FrameState::Boundary { child_depth } => child_depth == depth,
            FrameState::SelfProcessing { .. } | FrameState::Filter { .. } => false,
        };
        selected.then(|| (frame.group, Rc::clone(&frame.params)))
    }

    /// Ends `process-siblings` obligations that the node at `depth` violates.
    ///
    /// The sibling frames at the top of the stack form one run. It is checked
    /// from the outside in; the first obligation that fails is resumed,
    /// together with everything started inside it.
    fn resolve_siblings(&mut self, depth: usize) -> Result<(), StxError> {
        loop {
            let len = self.frames.len();
            let mut start = len;
            while start > 0
                && self.frames[start - 1].depth == depth
                && matches!(
                    self.frames[start - 1].state,
                    FrameState::Siblings { .. } | FrameState::SelfProcessing { .. }
                )
            {
                start -= 1;
            }
            let mut failing = None;
            for index in start..len {
                if let FrameState::Siblings { instr } = self.frames[index].state {
                    if !self.sibling_selected(index, instr, depth)? {
                        failing = Some(index);
                        break;
                    }
                }
            }
            let Some(failing) = failing else {
                return Ok(());
            };
            for frame in &mut self.frames[failing + 1..] {
                if let Some(act) = frame.activation.as_mut() {
                    act.siblings_closed = true;
                }
            }
            if let Some(frame) = self.frames.pop() {
                self.close_frame(frame, false)?;
            }
        }
    }

    fn sibling_selected(&mut self, index: usize, instr: usize, depth: usize) -> Result<bool, StxError> {
        let sheet = Arc::clone(&self.sheet);
        let node = &sheet.program[instr];
        let Instr::ProcessSiblings {
            while_pattern, until, ..
        } = &node.instr
        else {
            return Ok(false);
        };
        let result = {
            let frame = &self.frames[index];
            let (group, locals) = match &frame.activation {
                Some(act) => (act.group, act.visible_locals()),
                None => (frame.group, &[][..]),
            };
            let scope = Scope::new(&sheet, &self.scopes, group, locals);
            let stack = &self.events[..=depth];
            let holds = match while_pattern {
                Some(pattern) => pattern.matches(stack, &scope),
                None => Ok(true),
            };
            holds.and_then(|holds| match (holds, until) {
                (true, Some(pattern)) => pattern.matches(stack, &scope).map(|stop| !stop),
                (holds, _) => Ok(holds),
            })
        };
        match result {
            Ok(selected) => Ok(selected),
            Err(e) => {
                self.recover(StxError::path(e, &node.location))?;
                Ok(false)
            }
        }
    }

    /// Finds the template for the node on top of `stack` and runs it, or
    /// applies the group's pass-through rules.
    pub(super) fn process_node(
        &mut self,
        stack: Vec<EventRef>,
        group: GroupId,
        params: Params,
        exclude: &[TemplateId],
    ) -> Result<(), StxError> {
        let sheet = Arc::clone(&self.sheet);
        let found = {
            let scope = Scope::new(&sheet, &self.scopes, group, &[]);
            sheet.find_template(group, &stack, &scope, exclude)
        };
        let found = match found {
            Ok(found) => found,
            Err(e) if e.is_recoverable() => {
                self.recover(e)?;
                None
            }
            Err(e) => return Err(e),
        };
        let Some(found) = found else {
            return self.pass_through(stack, group);
        };
        let template = &sheet.templates[found.template];
        let depth = stack.len() - 1;
        let position = match depth {
            0 => 1,
            _ => stack[depth - 1].position(&found.key),
        };
        log::debug!(
            "{} matched '{}' ({}) at position {}",
            describe(&stack[depth]),
            template.pattern,
            template.location,
            position
        );
        let mut act = Activation::new(found.template, template.group, template.entry, stack, position, params);
        if template.new_scope {
            self.enter_scope(template.group, &act)?;
            act.new_scope = Some(template.group);
        }
        self.run(act)
    }

    fn pass_through(&mut self, stack: Vec<EventRef>, group: GroupId) -> Result<(), StxError> {
        let rules = self.sheet.groups[group].config.pass_through;
        let depth = stack.len() - 1;
        let event = Rc::clone(&stack[depth]);
        match event.kind() {
            EventKind::Root => {
                self.frames.push(Frame {
                    state: FrameState::PassThrough { copied: None },
                    depth,
                    group,
                    params: Rc::default(),
                    activation: None,
                });
                return Ok(());
            }
            EventKind::Element => {
                let copied = match (rules.elements, event.name()) {
                    (true, Some(name)) => {
                        let attributes = if rules.attributes {
                            event.attributes().to_vec()
                        } else {
                            Vec::new()
                        };
                        self.emitter
                            .start_element(name.clone(), attributes, &event.namespaces().declarations())?;
                        Some(name.clone())
                    }
                    _ => None,
                };
                if self.awaits_children(&stack) {
                    self.frames.push(Frame {
                        state: FrameState::PassThrough { copied },
                        depth,
                        group,
                        params: Rc::default(),
                        activation: None,
                    });
                    return Ok(());
                }
                if let Some(name) = copied {
                    self.emitter.end_element(&name)?;
                }
            }
            EventKind::Text if rules.text => self.emitter.characters(event.value())?,
            EventKind::Cdata if rules.text => {
                self.emitter.start_cdata()?;
                self.emitter.characters(event.value())?;
                self.emitter.end_cdata()?;
            }
            EventKind::Comment if rules.comments => self.emitter.comment(event.value())?,
            EventKind::Pi if rules.processing_instructions => {
                let target = event.name().map(|n| n.local.to_string()).unwrap_or_default();
                self.emitter.processing_instruction(&target, event.value())?;
            }
            EventKind::Attribute if rules.attributes => {
                if let Some(name) = event.name() {
                    if let Err(e) = self.emitter.add_attribute(name.clone(), event.value().to_string()) {
                        self.recover(e)?;
                    }
                }
            }
            _ => {}
        }
        self.settle()
    }

    /// Is the node on top of `stack` still open, with children to come?
    pub(super) fn awaits_children(&self, stack: &[EventRef]) -> bool {
        let Some(node) = stack.last() else {
            return false;
        };
        node.is_container()
            && node.has_child_nodes()
            && self.events.get(stack.len() - 1).is_some_and(|e| Rc::ptr_eq(e, node))
    }

    /// Resumes the template waiting for a `process-self` that just finished.
    pub(super) fn settle(&mut self) -> Result<(), StxError> {
        let waiting = matches!(
            self.frames.last(),
            Some(Frame {
                state: FrameState::SelfProcessing { .. },
                ..
            })
        );
        if !waiting {
            return Ok(());
        }
        match self.frames.pop() {
            Some(frame) => self.close_frame(frame, false),
            None => Ok(()),
        }
    }

    /// Finishes whatever `frame` was waiting for and resumes its template.
    pub(super) fn close_frame(&mut self, frame: Frame, siblings_closed: bool) -> Result<(), StxError> {
        match frame.state {
            FrameState::PassThrough { copied } => {
                if let Some(name) = copied {
                    self.emitter.end_element(&name)?;
                }
                self.settle()
            }
            FrameState::Filter { mut filter, end } => {
                if let Some(name) = end {
                    filter.event(&OutputEvent::EndElement(name), &mut self.emitter)?;
                }
                filter.finish(&mut self.emitter)?;
                match frame.activation {
                    Some(act) => self.resume(act, siblings_closed),
                    None => self.settle(),
                }
            }
            _ => match frame.activation {
                Some(act) => self.resume(act, siblings_closed),
                None => Ok(()),
            },
        }
    }

    fn resume(&mut self, mut act: Activation, siblings_closed: bool) -> Result<(), StxError> {
        if siblings_closed {
            act.siblings_closed = true;
        }
        self.run(act)
    }

    /// Handles the end of the container at `depth`.
    pub(super) fn end_node(&mut self, depth: usize) -> Result<(), StxError> {
        let name = self.events.get(depth).and_then(|e| e.name().cloned());
        if let Some(Frame {
            state: FrameState::Filter { filter, .. },
            depth: filter_depth,
            ..
        }) = self.frames.last_mut()
        {
            if *filter_depth < depth {
                if let Some(name) = name {
                    filter.event(&OutputEvent::EndElement(name), &mut self.emitter)?;
                }
                self.events.truncate(depth);
                return Ok(());
            }
        }
        self.events.truncate(depth);
        self.close_below(depth)?;
        let owned = matches!(
            self.frames.last(),
            Some(Frame {
                state: FrameState::Children | FrameState::PassThrough { .. } | FrameState::Filter { .. },
                depth: frame_depth,
                ..
            }) if *frame_depth == depth
        );
        if owned {
            if let Some(frame) = self.frames.pop() {
                self.close_frame(frame, false)?;
            }
        }
        Ok(())
    }

    /// Closes every frame deeper than `depth`, up to the nearest boundary.
    pub(super) fn close_below(&mut self, depth: usize) -> Result<(), StxError> {
        loop {
            let deeper = self
                .frames
                .last()
                .is_some_and(|frame| frame.depth > depth && !frame.is_boundary());
            if !deeper {
                return Ok(());
            }
            if let Some(frame) = self.frames.pop() {
                self.close_frame(frame, true)?;
            }
        }
    }

    /// Processes the attributes of the element on top of `stack` as if they
    /// were its first children.
    pub(super) fn visit_attributes(&mut self, stack: &[EventRef]) -> Result<(), StxError> {
        let depth = stack.len() - 1;
        let element = Rc::clone(&stack[depth]);
        let on_stack = self.events.get(depth).is_some_and(|e| Rc::ptr_eq(e, &element));
        let saved = if on_stack {
            None
        } else {
            Some(std::mem::replace(&mut self.events, stack.to_vec()))
        };
        element.clear_attribute_counters();
        let mut result = Ok(());
        for attribute in element.attributes() {
            let event = Event::attribute(attribute, Rc::clone(element.namespaces()));
            self.push_node(Rc::clone(&event), depth + 1);
            result = self.dispatch(event, depth + 1);
            if result.is_err() {
                break;
            }
        }
        self.events.truncate(depth + 1);
        if result.is_ok() {
            result = self.close_below(depth);
        }
        if let Some(events) = saved {
            self.events = events;
        }
        result
    }
}
