//! Continuation frames and activation records.

use crate::filter::Filter;
use crate::group::{GroupId, TemplateId};
use crate::instr::InstrId;
use crate::output::OutputEvent;
use sluice_types::{EventRef, Item, QualifiedName, Sym, Value};
use std::collections::HashMap;
use std::rc::Rc;

pub(crate) type Params = Rc<HashMap<Sym, Value>>;

/// What a suspended frame is waiting for.
pub(crate) enum FrameState {
    /// The children of the node at `depth`; resumes at the node's end.
    Children,
    /// A re-match of the node at `depth`; resumes when that completes.
    SelfProcessing { template: TemplateId },
    /// Following siblings at `depth`, while the test of the
    /// `process-siblings` instruction at `instr` holds.
    Siblings { instr: InstrId },
    /// Attributes of the element at `depth`, visited synchronously.
    Attributes,
    /// An element without a matching template; its children are processed
    /// and `copied` is closed at its end.
    PassThrough { copied: Option<QualifiedName> },
    /// Isolates an inner run (buffer or external document) from the frames
    /// below it. Nodes at `child_depth` are processed in the frame's group.
    Boundary { child_depth: usize },
    /// Events below `depth` go to an external filter. `end` is forwarded
    /// when the frame closes.
    Filter {
        filter: Box<dyn Filter>,
        end: Option<QualifiedName>,
    },
}

impl std::fmt::Debug for FrameState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameState::Children => f.write_str("Children"),
            FrameState::SelfProcessing { template } => write!(f, "Self({})", template),
            FrameState::Siblings { instr } => write!(f, "Siblings({})", instr),
            FrameState::Attributes => f.write_str("Attributes"),
            FrameState::PassThrough { copied } => write!(f, "PassThrough({:?})", copied),
            FrameState::Boundary { child_depth } => write!(f, "Boundary({})", child_depth),
            FrameState::Filter { .. } => f.write_str("Filter"),
        }
    }
}

pub(crate) struct Frame {
    pub state: FrameState,
    pub depth: usize,
    /// Group used to match the nodes this frame governs.
    pub group: GroupId,
    /// Parameters passed to the templates matched for those nodes.
    pub params: Params,
    /// The suspended template, if any.
    pub activation: Option<Activation>,
}

impl Frame {
    pub fn is_boundary(&self) -> bool {
        matches!(self.state, FrameState::Boundary { .. })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Local {
    pub name: Sym,
    pub value: Value,
}

/// Saved caller state of a `call-procedure`.
#[derive(Debug)]
pub(crate) struct CallRecord {
    pub return_pc: InstrId,
    pub group: GroupId,
    pub params: Params,
    pub locals_base: usize,
    pub buffers_base: usize,
    pub new_scope: Option<GroupId>,
}

#[derive(Debug)]
pub(crate) struct LoopState {
    pub items: Vec<Item>,
    pub index: usize,
    pub bound: bool,
}

/// One execution of a template, including the procedures it calls.
#[derive(Debug)]
pub(crate) struct Activation {
    pub template: TemplateId,
    pub group: GroupId,
    pub pc: InstrId,
    /// Ancestors of the context node, with the node itself on top.
    pub stack: Vec<EventRef>,
    pub position: u64,
    pub params: Params,
    pub locals: Vec<Local>,
    pub buffers: Vec<(Sym, Vec<OutputEvent>)>,
    pub calls: Vec<CallRecord>,
    pub param_stack: Vec<HashMap<Sym, Value>>,
    pub loops: Vec<LoopState>,
    /// Elements opened by `element` and `copy`, for their end instructions.
    pub elements: Vec<Option<QualifiedName>>,
    /// Hrefs of open result documents.
    pub documents: Vec<Option<String>>,
    /// Group whose variables got a fresh frame for this activation.
    pub new_scope: Option<GroupId>,
    /// Set when the activation was resumed because its sibling run ended;
    /// a later `process-siblings` then continues at once.
    pub siblings_closed: bool,
}

impl Activation {
    pub fn new(template: TemplateId, group: GroupId, pc: InstrId, stack: Vec<EventRef>, position: u64, params: Params) -> Self {
        Self {
            template,
            group,
            pc,
            stack,
            position,
            params,
            locals: Vec::new(),
            buffers: Vec::new(),
            calls: Vec::new(),
            param_stack: Vec::new(),
            loops: Vec::new(),
            elements: Vec::new(),
            documents: Vec::new(),
            new_scope: None,
            siblings_closed: false,
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len().saturating_sub(1)
    }

    pub fn node(&self) -> Option<&EventRef> {
        self.stack.last()
    }

    /// Locals of the innermost procedure call, or of the template.
    pub fn visible_locals(&self) -> &[Local] {
        let base = self.calls.last().map(|c| c.locals_base).unwrap_or(0);
        &self.locals[base.min(self.locals.len())..]
    }

    pub fn visible_locals_mut(&mut self) -> &mut [Local] {
        let base = self.calls.last().map(|c| c.locals_base).unwrap_or(0);
        let base = base.min(self.locals.len());
        &mut self.locals[base..]
    }

    pub fn visible_buffers(&self) -> &[(Sym, Vec<OutputEvent>)] {
        let base = self.calls.last().map(|c| c.buffers_base).unwrap_or(0);
        &self.buffers[base.min(self.buffers.len())..]
    }

    pub fn visible_buffers_mut(&mut self) -> &mut [(Sym, Vec<OutputEvent>)] {
        let base = self.calls.last().map(|c| c.buffers_base).unwrap_or(0);
        let base = base.min(self.buffers.len());
        &mut self.buffers[base..]
    }
}
