//! The instruction interpreter.

use super::Processor;
use super::frame::{Activation, CallRecord, Frame, FrameState, Local, LoopState, Params};
use super::scope::Scope;
use crate::emitter::Sink;
use crate::error::StxError;
use crate::filter::{Collector, Filter, node_events};
use crate::group::GroupId;
use crate::input::parse_str;
use crate::instr::{FilterSpec, Instr, InstrId, Node, ProcessSpec};
use crate::output::{OutputEvent, ResultHandler};
use sluice_path::{Avt, EvalContext, Expression, Pattern, evaluate};
use sluice_types::{Attribute, Event, EventKind, EventRef, ExpandedName, Location, QualifiedName, Sym, Value, XML_NAMESPACE};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

enum Flow {
    Next,
    Goto(InstrId),
    Suspend(Suspend),
    Done,
}

/// Content a template waits for.
enum Suspend {
    Children {
        group: GroupId,
        params: Params,
        filter: Option<Box<dyn Filter>>,
    },
    SelfNode {
        group: GroupId,
        params: Params,
        filter: Option<Box<dyn Filter>>,
    },
    Attributes {
        group: GroupId,
        params: Params,
    },
    Siblings {
        group: GroupId,
        params: Params,
        instr: InstrId,
    },
}

impl<H: ResultHandler> Processor<H> {
    /// Executes `act` until it completes or suspends.
    pub(super) fn run(&mut self, mut act: Activation) -> Result<(), StxError> {
        let sheet = Arc::clone(&self.sheet);
        loop {
            let Some(node) = sheet.program.get(act.pc) else {
                return Err(StxError::fatal(format!("no instruction at {}", act.pc)));
            };
            let flow = match self.step(&mut act, node) {
                Ok(flow) => flow,
                Err(e) if e.is_recoverable() => {
                    self.recover(e.at(&node.location))?;
                    Flow::Next
                }
                Err(e) => return Err(e.at(&node.location)),
            };
            match flow {
                Flow::Next => act.pc = node.next,
                Flow::Goto(target) => act.pc = target,
                Flow::Suspend(suspend) => {
                    act.pc = node.next;
                    return self.suspend(act, suspend).map_err(|e| e.at(&node.location));
                }
                Flow::Done => return self.complete(act),
            }
        }
    }

    fn complete(&mut self, act: Activation) -> Result<(), StxError> {
        if let Some(group) = act.new_scope {
            self.leave_scope(group);
        }
        self.settle()
    }

    fn suspend(&mut self, act: Activation, suspend: Suspend) -> Result<(), StxError> {
        let depth = act.depth();
        match suspend {
            Suspend::Children { group, params, filter } => {
                let state = match filter {
                    Some(filter) => FrameState::Filter { filter, end: None },
                    None => FrameState::Children,
                };
                self.frames.push(Frame {
                    state,
                    depth,
                    group,
                    params,
                    activation: Some(act),
                });
                Ok(())
            }
            Suspend::SelfNode {
                group,
                params,
                filter: Some(mut filter),
            } => {
                let Some(node) = act.node().cloned() else {
                    return self.run(act);
                };
                for event in node_events(&node) {
                    filter.event(&event, &mut self.emitter)?;
                }
                let end = node.name().filter(|_| node.is_element()).cloned();
                if self.awaits_children(&act.stack) {
                    self.frames.push(Frame {
                        state: FrameState::Filter { filter, end },
                        depth,
                        group,
                        params,
                        activation: Some(act),
                    });
                    return Ok(());
                }
                if let Some(name) = end {
                    filter.event(&OutputEvent::EndElement(name), &mut self.emitter)?;
                }
                filter.finish(&mut self.emitter)?;
                self.run(act)
            }
            Suspend::SelfNode {
                group,
                params,
                filter: None,
            } => {
                let stack = act.stack.clone();
                self.frames.push(Frame {
                    state: FrameState::SelfProcessing { template: act.template },
                    depth,
                    group,
                    params: Rc::clone(&params),
                    activation: Some(act),
                });
                let exclude: Vec<_> = self
                    .frames
                    .iter()
                    .rev()
                    .map_while(|frame| match frame.state {
                        FrameState::SelfProcessing { template } if frame.depth == depth => Some(template),
                        _ => None,
                    })
                    .collect();
                self.process_node(stack, group, params, &exclude)
            }
            Suspend::Attributes { group, params } => {
                let stack = act.stack.clone();
                self.frames.push(Frame {
                    state: FrameState::Attributes,
                    depth,
                    group,
                    params,
                    activation: Some(act),
                });
                self.visit_attributes(&stack)?;
                match self.frames.pop() {
                    Some(Frame {
                        state: FrameState::Attributes,
                        activation: Some(act),
                        ..
                    }) => self.run(act),
                    other => Err(StxError::fatal(format!(
                        "attribute processing left frame {:?} behind",
                        other.map(|f| f.state)
                    ))),
                }
            }
            Suspend::Siblings { group, params, instr } => {
                self.frames.push(Frame {
                    state: FrameState::Siblings { instr },
                    depth,
                    group,
                    params,
                    activation: Some(act),
                });
                Ok(())
            }
        }
    }

    fn step(&mut self, act: &mut Activation, node: &Node) -> Result<Flow, StxError> {
        let location = &node.location;
        match &node.instr {
            Instr::Text(text) => self.emitter.characters(text)?,
            Instr::CdataStart => self.emitter.start_cdata()?,
            Instr::CdataEnd => self.emitter.end_cdata()?,
            Instr::ValueOf { select, separator } => {
                let value = self.value_of(act, select)?;
                let separator = self.string_of(act, separator)?;
                self.emitter.characters(&value.to_string_joined(&separator))?;
            }
            Instr::LiteralElementStart {
                name,
                attributes,
                namespaces,
            } => {
                let mut values = Vec::with_capacity(attributes.len());
                for (attribute, avt) in attributes {
                    let value = self.string_or_empty(act, avt, location)?;
                    values.push(Attribute::new(attribute.clone(), value));
                }
                self.emitter.start_element(name.clone(), values, namespaces)?;
            }
            Instr::LiteralElementEnd { name } => self.emitter.end_element(name)?,
            Instr::ElementStart { name, namespace } => match self.computed_name(act, name, namespace.as_ref(), false) {
                Ok(name) => {
                    self.emitter.start_element(name.clone(), Vec::new(), &[])?;
                    act.elements.push(Some(name));
                }
                Err(e) if e.is_recoverable() => {
                    act.elements.push(None);
                    self.recover(e.at(location))?;
                }
                Err(e) => return Err(e),
            },
            Instr::ElementEnd | Instr::CopyEnd => {
                if let Some(Some(name)) = act.elements.pop() {
                    self.emitter.end_element(&name)?;
                }
            }
            Instr::StartElement { name, namespace } => {
                let name = self.computed_name(act, name, namespace.as_ref(), false)?;
                self.emitter.start_element(name, Vec::new(), &[])?;
            }
            Instr::EndElement { name, namespace } => {
                let name = self.computed_name(act, name, namespace.as_ref(), false)?;
                self.emitter.end_element(&name)?;
            }
            Instr::BeginText => self.emitter.push_sink(Sink::Text(String::new()))?,
            Instr::BeginAttribute => self.emitter.begin_attribute()?,
            Instr::EndAttribute { name, namespace } => {
                let value = self.pop_text()?;
                let name = self.computed_name(act, name, namespace.as_ref(), true)?;
                self.emitter.add_attribute(name, value)?;
            }
            Instr::EndComment => {
                let text = self.pop_text()?;
                self.emitter.comment(&text)?;
            }
            Instr::EndPi { name } => {
                let data = self.pop_text()?;
                let target = self.string_of(act, name)?;
                let target = target.trim();
                if !QualifiedName::is_valid(target) || target.contains(':') || target.eq_ignore_ascii_case("xml") {
                    return Err(StxError::runtime(format!(
                        "'{}' is not a valid processing instruction target",
                        target
                    )));
                }
                self.emitter.processing_instruction(target, &data)?;
            }
            Instr::EndMessage => {
                let text = self.pop_text()?;
                log::info!("{}", text);
                self.messages.push(text);
            }
            Instr::CopyStart { attributes } => self.copy_start(act, attributes.as_ref(), location)?,
            Instr::Variable { name, select } => {
                let value = match select {
                    Some(select) => self.value_or_empty(act, select, location)?,
                    None => Value::empty(),
                };
                bind(act, *name, value);
            }
            Instr::EndVariable { name } | Instr::EndParam { name } => {
                let text = self.pop_text()?;
                bind(act, *name, Value::from(text));
            }
            Instr::Param {
                name,
                select,
                required,
                skip,
            } => {
                if let Some(value) = act.params.get(name).cloned() {
                    bind(act, *name, value);
                    return Ok(skip.map_or(Flow::Next, Flow::Goto));
                }
                if *required {
                    let name = self.sheet.interner.resolve(*name).to_string();
                    self.recover(StxError::runtime(format!("required parameter '${}' was not passed", name)).at(location))?;
                }
                if skip.is_some() {
                    self.emitter.push_sink(Sink::Text(String::new()))?;
                    return Ok(Flow::Next);
                }
                let value = match select {
                    Some(select) => self.value_or_empty(act, select, location)?,
                    None => Value::empty(),
                };
                bind(act, *name, value);
            }
            Instr::Assign { name, select } => {
                let value = self.value_of(act, select)?;
                self.assign(act, *name, value)?;
            }
            Instr::EndAssign { name } => {
                let text = self.pop_text()?;
                self.assign(act, *name, Value::from(text))?;
            }
            Instr::BufferStart { .. } | Instr::ResultBufferStart => self.emitter.push_sink(Sink::Events(Vec::new()))?,
            Instr::BufferEnd { name } => {
                let events = self.pop_events()?;
                act.buffers.push((*name, events));
            }
            Instr::ResultBufferEnd { name, clear } => {
                let events = self.pop_events()?;
                self.fill_buffer(act, *name, events, *clear)?;
            }
            Instr::ResultDocumentStart { href } => match self.string_of(act, href) {
                Ok(href) => {
                    let mut handler = self.outputs.open(&href)?;
                    handler.start_document()?;
                    log::debug!("writing result document '{}'", href);
                    self.emitter.push_sink(Sink::Document(handler))?;
                    act.documents.push(Some(href));
                }
                Err(e) if e.is_recoverable() => {
                    self.emitter.push_sink(Sink::Text(String::new()))?;
                    act.documents.push(None);
                    self.recover(e.at(location))?;
                }
                Err(e) => return Err(e),
            },
            Instr::ResultDocumentEnd => {
                let sink = self.emitter.pop_sink()?;
                if let (Sink::Document(mut handler), Some(Some(href))) = (sink, act.documents.pop()) {
                    handler.end_document()?;
                    self.outputs.close(&href, handler)?;
                }
            }
            Instr::If { test, on_false } | Instr::When { test, on_false } => {
                if !self.value_or_empty(act, test, location)?.to_boolean() {
                    return Ok(Flow::Goto(*on_false));
                }
            }
            Instr::Jump { target } => return Ok(Flow::Goto(*target)),
            Instr::ForEachStart { select } => {
                let items = self.value_or_empty(act, select, location)?.into_items();
                act.loops.push(LoopState {
                    items,
                    index: 0,
                    bound: false,
                });
            }
            Instr::ForEachNext { name, exit } => {
                let Some(state) = act.loops.last_mut() else {
                    return Err(StxError::fatal("for-each-item without a loop"));
                };
                if state.bound {
                    state.bound = false;
                    act.locals.pop();
                }
                if state.index >= state.items.len() {
                    act.loops.pop();
                    return Ok(Flow::Goto(*exit));
                }
                let item = state.items[state.index].clone();
                state.index += 1;
                state.bound = true;
                bind(act, *name, Value::from(item));
            }
            Instr::While { test, exit } => {
                if !self.value_or_empty(act, test, location)?.to_boolean() {
                    return Ok(Flow::Goto(*exit));
                }
            }
            Instr::ScopeEnd { variables, buffers } => {
                act.locals.truncate(act.locals.len().saturating_sub(*variables));
                act.buffers.truncate(act.buffers.len().saturating_sub(*buffers));
            }
            Instr::ParamsStart => act.param_stack.push(HashMap::new()),
            Instr::WithParam { name, select } => {
                let value = self.value_or_empty(act, select, location)?;
                if let Some(params) = act.param_stack.last_mut() {
                    params.insert(*name, value);
                }
            }
            Instr::EndWithParam { name } => {
                let text = self.pop_text()?;
                if let Some(params) = act.param_stack.last_mut() {
                    params.insert(*name, Value::from(text));
                }
            }
            Instr::ProcessChildren(spec) => {
                let (group, params) = target(act, spec);
                if !self.awaits_children(&act.stack) {
                    return Ok(Flow::Next);
                }
                let filter = self.open_filter(act, spec.filter.as_ref(), &params)?;
                return Ok(Flow::Suspend(Suspend::Children { group, params, filter }));
            }
            Instr::ProcessSelf(spec) => {
                let (group, params) = target(act, spec);
                let filter = self.open_filter(act, spec.filter.as_ref(), &params)?;
                return Ok(Flow::Suspend(Suspend::SelfNode { group, params, filter }));
            }
            Instr::ProcessAttributes(spec) => {
                let (group, params) = target(act, spec);
                let has_attributes = act.node().is_some_and(|n| n.is_element() && !n.attributes().is_empty());
                if has_attributes {
                    return Ok(Flow::Suspend(Suspend::Attributes { group, params }));
                }
            }
            Instr::ProcessSiblings { spec, .. } => {
                let (group, params) = target(act, spec);
                if !act.siblings_closed && self.parent_open(act) {
                    return Ok(Flow::Suspend(Suspend::Siblings {
                        group,
                        params,
                        instr: act.pc,
                    }));
                }
            }
            Instr::ProcessBuffer { name, spec } => {
                let (group, params) = target(act, spec);
                let Some(events) = self.buffer_content(act, *name) else {
                    let name = self.sheet.interner.resolve(*name).to_string();
                    return Err(StxError::runtime(format!("unknown buffer '{}'", name)));
                };
                match self.open_filter(act, spec.filter.as_ref(), &params)? {
                    Some(mut filter) => {
                        for event in &events {
                            filter.event(event, &mut self.emitter)?;
                        }
                        filter.finish(&mut self.emitter)?;
                    }
                    None => self.process_buffer(act, &events, group, params)?,
                }
            }
            Instr::ProcessDocument { href, base, spec } => {
                let (group, params) = target(act, spec);
                self.process_documents(act, href, base.as_ref(), group, params, spec.filter.as_ref(), location)?;
            }
            Instr::CallProcedure { name, procedure, spec } => {
                let Some(id) = *procedure else {
                    return Err(StxError::fatal(format!("procedure '{}' was never resolved", name)));
                };
                let sheet = Arc::clone(&self.sheet);
                let callee = &sheet.procedures[id];
                let (_, params) = target(act, spec);
                act.calls.push(CallRecord {
                    return_pc: node.next,
                    group: act.group,
                    params: std::mem::replace(&mut act.params, params),
                    locals_base: act.locals.len(),
                    buffers_base: act.buffers.len(),
                    new_scope: None,
                });
                act.group = callee.group;
                if callee.new_scope {
                    self.enter_scope(callee.group, act)?;
                    if let Some(record) = act.calls.last_mut() {
                        record.new_scope = Some(callee.group);
                    }
                }
                log::trace!("calling procedure '{}'", callee.name);
                return Ok(Flow::Goto(callee.entry));
            }
            Instr::Return => {
                let Some(record) = act.calls.pop() else {
                    return Ok(Flow::Done);
                };
                act.locals.truncate(record.locals_base);
                act.buffers.truncate(record.buffers_base);
                if let Some(group) = record.new_scope {
                    self.leave_scope(group);
                }
                act.params = record.params;
                act.group = record.group;
                return Ok(Flow::Goto(record.return_pc));
            }
        }
        Ok(Flow::Next)
    }

    fn value_of(&self, act: &Activation, expr: &Expression) -> Result<Value, StxError> {
        let scope = Scope::new(&self.sheet, &self.scopes, act.group, act.visible_locals());
        let ctx = EvalContext::new(&act.stack, act.position, &scope);
        evaluate(expr, &ctx).map_err(|e| StxError::path(e, &Location::default()))
    }

    fn string_of(&self, act: &Activation, avt: &Avt) -> Result<String, StxError> {
        let scope = Scope::new(&self.sheet, &self.scopes, act.group, act.visible_locals());
        let ctx = EvalContext::new(&act.stack, act.position, &scope);
        avt.evaluate(&ctx).map_err(|e| StxError::path(e, &Location::default()))
    }

    /// Evaluates `expr`; a recovered error yields the empty sequence.
    fn value_or_empty(&mut self, act: &Activation, expr: &Expression, location: &Location) -> Result<Value, StxError> {
        match self.value_of(act, expr) {
            Ok(value) => Ok(value),
            Err(e) if e.is_recoverable() => {
                self.recover(e.at(location))?;
                Ok(Value::empty())
            }
            Err(e) => Err(e),
        }
    }

    fn string_or_empty(&mut self, act: &Activation, avt: &Avt, location: &Location) -> Result<String, StxError> {
        match self.string_of(act, avt) {
            Ok(value) => Ok(value),
            Err(e) if e.is_recoverable() => {
                self.recover(e.at(location))?;
                Ok(String::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Resolves the name of a dynamically created element or attribute. An
    /// unprefixed attribute is never in the default namespace.
    fn computed_name(
        &self,
        act: &Activation,
        name: &Avt,
        namespace: Option<&Avt>,
        attribute: bool,
    ) -> Result<QualifiedName, StxError> {
        let lexical = self.string_of(act, name)?;
        let lexical = lexical.trim();
        if !QualifiedName::is_valid(lexical) {
            let what = if attribute { "attribute" } else { "element" };
            return Err(StxError::runtime(format!("'{}' is not a valid {} name", lexical, what)));
        }
        let (prefix, local) = QualifiedName::split(lexical);
        let uri = match (namespace, prefix) {
            (Some(namespace), _) => self.string_of(act, namespace)?,
            (None, Some("xml")) => XML_NAMESPACE.to_string(),
            (None, Some(prefix)) => self.sheet.namespaces.get(prefix).cloned().ok_or_else(|| {
                StxError::fatal(format!("undeclared namespace prefix '{}' in name '{}'", prefix, lexical))
            })?,
            (None, None) if attribute => String::new(),
            (None, None) => self.sheet.namespaces.get("").cloned().unwrap_or_default(),
        };
        let prefix = prefix.filter(|_| !uri.is_empty());
        Ok(QualifiedName::new(prefix, local, uri))
    }

    fn pop_text(&mut self) -> Result<String, StxError> {
        match self.emitter.pop_sink()? {
            Sink::Text(text) => Ok(text),
            other => Err(StxError::fatal(format!("expected a text capture, found {:?}", other))),
        }
    }

    fn pop_events(&mut self) -> Result<Vec<OutputEvent>, StxError> {
        match self.emitter.pop_sink()? {
            Sink::Events(events) => Ok(events),
            other => Err(StxError::fatal(format!("expected a buffer capture, found {:?}", other))),
        }
    }

    fn assign(&mut self, act: &mut Activation, name: Sym, value: Value) -> Result<(), StxError> {
        if let Some(local) = act.visible_locals_mut().iter_mut().rev().find(|l| l.name == name) {
            local.value = value;
            return Ok(());
        }
        let sheet = Arc::clone(&self.sheet);
        match self.scopes.variable_mut(&sheet, act.group, name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(StxError::runtime(format!(
                "assignment to undeclared variable '${}'",
                sheet.interner.resolve(name)
            ))),
        }
    }

    fn buffer_content(&self, act: &Activation, name: Sym) -> Option<Vec<OutputEvent>> {
        act.visible_buffers()
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, events)| events.clone())
            .or_else(|| self.scopes.buffer(&self.sheet, act.group, name).cloned())
    }

    fn fill_buffer(&mut self, act: &mut Activation, name: Sym, events: Vec<OutputEvent>, clear: bool) -> Result<(), StxError> {
        let group = act.group;
        let sheet = Arc::clone(&self.sheet);
        let target = match act.visible_buffers_mut().iter_mut().rev().find(|(n, _)| *n == name) {
            Some((_, buffer)) => Some(buffer),
            None => self.scopes.buffer_mut(&sheet, group, name),
        };
        match target {
            Some(buffer) if clear => *buffer = events,
            Some(buffer) => buffer.extend(events),
            None => {
                return Err(StxError::runtime(format!(
                    "unknown buffer '{}'",
                    sheet.interner.resolve(name)
                )));
            }
        }
        Ok(())
    }

    fn copy_start(&mut self, act: &mut Activation, attributes: Option<&Pattern>, location: &Location) -> Result<(), StxError> {
        let Some(node) = act.node().cloned() else {
            act.elements.push(None);
            return Ok(());
        };
        if let (EventKind::Element, Some(name)) = (node.kind(), node.name()) {
            let copied = match attributes {
                Some(pattern) => self.copied_attributes(act, &node, pattern, location)?,
                None => Vec::new(),
            };
            self.emitter
                .start_element(name.clone(), copied, &node.namespaces().declarations())?;
            act.elements.push(Some(name.clone()));
            return Ok(());
        }
        act.elements.push(None);
        match node.kind() {
            EventKind::Text => self.emitter.characters(node.value()),
            EventKind::Cdata => {
                self.emitter.start_cdata()?;
                self.emitter.characters(node.value())?;
                self.emitter.end_cdata()
            }
            EventKind::Comment => self.emitter.comment(node.value()),
            EventKind::Pi => {
                let target = node.name().map(|n| n.local.to_string()).unwrap_or_default();
                self.emitter.processing_instruction(&target, node.value())
            }
            EventKind::Attribute => match node.name() {
                Some(name) => self.emitter.add_attribute(name.clone(), node.value().to_string()),
                None => Ok(()),
            },
            EventKind::Root | EventKind::Element => Ok(()),
        }
    }

    fn copied_attributes(
        &mut self,
        act: &Activation,
        node: &EventRef,
        pattern: &Pattern,
        location: &Location,
    ) -> Result<Vec<Attribute>, StxError> {
        let mut kept = Vec::new();
        let mut stack = act.stack.clone();
        for attribute in node.attributes() {
            stack.truncate(act.stack.len());
            stack.push(Event::attribute(attribute, Rc::clone(node.namespaces())));
            let matched = {
                let scope = Scope::new(&self.sheet, &self.scopes, act.group, act.visible_locals());
                pattern.matches(&stack, &scope)
            };
            match matched {
                Ok(true) => kept.push(attribute.clone()),
                Ok(false) => {}
                Err(e) => self.recover(StxError::path(e, location))?,
            }
        }
        Ok(kept)
    }

    /// Are the following siblings of the context node still to come?
    fn parent_open(&self, act: &Activation) -> bool {
        let depth = act.depth();
        depth > 0
            && match (act.stack.get(depth - 1), self.events.get(depth - 1)) {
                (Some(parent), Some(current)) => Rc::ptr_eq(parent, current),
                _ => false,
            }
    }

    fn open_filter(
        &mut self,
        act: &Activation,
        spec: Option<&FilterSpec>,
        params: &Params,
    ) -> Result<Option<Box<dyn Filter>>, StxError> {
        let Some(spec) = spec else {
            return Ok(None);
        };
        let src = match &spec.src {
            Some(src) => Some(self.value_of(act, src)?.to_string_value()),
            None => None,
        };
        let params: HashMap<ExpandedName, Value> = params
            .iter()
            .map(|(name, value)| (self.sheet.interner.resolve(*name).clone(), value.clone()))
            .collect();
        match self.filters.resolve(&spec.method, src.as_deref(), &params) {
            Ok(filter) => Ok(Some(filter)),
            Err(e @ StxError::Fatal { .. }) => Err(e),
            Err(e) => Err(StxError::fatal(format!("cannot create filter '{}': {}", spec.method, e))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_documents(
        &mut self,
        act: &Activation,
        href: &Expression,
        base: Option<&Expression>,
        group: GroupId,
        params: Params,
        filter: Option<&FilterSpec>,
        location: &Location,
    ) -> Result<(), StxError> {
        let hrefs = self.value_or_empty(act, href, location)?;
        let base = match base {
            Some(base) => Some(self.value_or_empty(act, base, location)?.to_string_value()),
            None => self.config.base_uri.clone().or_else(|| self.sheet.system_id.clone()),
        };
        let mut filter = self.open_filter(act, filter, &params)?;
        for item in hrefs.items() {
            let href = item.string_value();
            let text = match self.documents.resolve(&href, base.as_deref()) {
                Ok(text) => text,
                Err(e) if e.is_recoverable() => {
                    self.recover(e.at(location))?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            log::debug!("processing document '{}'", href);
            match filter.as_mut() {
                Some(filter) => {
                    let mut collector = Collector::default();
                    parse_str(&text, &mut collector)?;
                    for event in &collector.events {
                        filter.event(event, &mut self.emitter)?;
                    }
                }
                None => self.process_document(&text, group, Rc::clone(&params))?,
            }
        }
        if let Some(mut filter) = filter {
            filter.finish(&mut self.emitter)?;
        }
        Ok(())
    }
}

fn bind(act: &mut Activation, name: Sym, value: Value) {
    act.locals.push(Local { name, value });
}

/// Group and parameters for a `process-*` instruction. Collected `with-param`
/// values are taken off the activation's parameter stack.
fn target(act: &mut Activation, spec: &ProcessSpec) -> (GroupId, Params) {
    let params = if spec.has_params {
        act.param_stack.pop().unwrap_or_default()
    } else {
        HashMap::new()
    };
    (spec.group.unwrap_or(act.group), Rc::new(params))
}
