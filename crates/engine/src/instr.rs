//! The executable form of template and procedure bodies.
//!
//! Bodies are flattened into one arena of [`Node`]s addressed by
//! [`InstrId`]. Each node names its successor; branches and loops carry
//! explicit jump targets patched in when the body is lowered. Instructions
//! are immutable: state belonging to one execution (loop cursors, open
//! dynamic elements, captured text) lives in the processor's activation
//! records, so the same instruction can be in flight in several recursive
//! invocations at once.

use crate::group::{GroupId, ProcedureId};
use sluice_path::{Avt, Expression, Pattern};
use sluice_types::{ExpandedName, Location, NamespaceDecl, QualifiedName, Sym};

pub type InstrId = usize;

#[derive(Debug, Clone)]
pub struct Node {
    pub instr: Instr,
    pub next: InstrId,
    pub location: Location,
}

/// Where the content selected by a `process-*` instruction goes.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    /// Named target group, resolved after the whole sheet is compiled.
    pub group_name: Option<ExpandedName>,
    pub group: Option<GroupId>,
    pub filter: Option<FilterSpec>,
    /// Parameters were collected by a preceding [`Instr::ParamsStart`].
    pub has_params: bool,
}

#[derive(Debug, Clone)]
pub struct FilterSpec {
    pub method: String,
    pub src: Option<Expression>,
}

#[derive(Debug, Clone)]
pub enum Instr {
    Text(String),
    CdataStart,
    CdataEnd,
    ValueOf {
        select: Expression,
        separator: Avt,
    },
    LiteralElementStart {
        name: QualifiedName,
        attributes: Vec<(QualifiedName, Avt)>,
        namespaces: Vec<NamespaceDecl>,
    },
    LiteralElementEnd {
        name: QualifiedName,
    },
    /// `element`: name and namespace computed at run time.
    ElementStart {
        name: Avt,
        namespace: Option<Avt>,
    },
    ElementEnd,
    /// `start-element` and `end-element` emit unbalanced tags; the emitter
    /// checks the result.
    StartElement {
        name: Avt,
        namespace: Option<Avt>,
    },
    EndElement {
        name: Avt,
        namespace: Option<Avt>,
    },
    /// Starts capturing output as text for the matching `End*` instruction.
    BeginText,
    /// Starts capturing an attribute value. Attribute captures do not nest.
    BeginAttribute,
    EndAttribute {
        name: Avt,
        namespace: Option<Avt>,
    },
    EndComment,
    EndPi {
        name: Avt,
    },
    EndMessage,
    CopyStart {
        attributes: Option<Pattern>,
    },
    CopyEnd,
    Variable {
        name: Sym,
        select: Option<Expression>,
    },
    EndVariable {
        name: Sym,
    },
    /// Binds the parameter passed by the caller or falls back to the
    /// default. With a body, `skip` is the instruction after `EndParam`.
    Param {
        name: Sym,
        select: Option<Expression>,
        required: bool,
        skip: Option<InstrId>,
    },
    EndParam {
        name: Sym,
    },
    Assign {
        name: Sym,
        select: Expression,
    },
    EndAssign {
        name: Sym,
    },
    BufferStart {
        name: Sym,
    },
    BufferEnd {
        name: Sym,
    },
    ResultBufferStart,
    ResultBufferEnd {
        name: Sym,
        clear: bool,
    },
    ResultDocumentStart {
        href: Avt,
    },
    ResultDocumentEnd,
    If {
        test: Expression,
        on_false: InstrId,
    },
    When {
        test: Expression,
        on_false: InstrId,
    },
    Jump {
        target: InstrId,
    },
    ForEachStart {
        select: Expression,
    },
    /// Loop head: binds the next item, or leaves the loop through `exit`.
    ForEachNext {
        name: Sym,
        exit: InstrId,
    },
    While {
        test: Expression,
        exit: InstrId,
    },
    /// Drops the locals declared by the block that ends here.
    ScopeEnd {
        variables: usize,
        buffers: usize,
    },
    ParamsStart,
    WithParam {
        name: Sym,
        select: Expression,
    },
    EndWithParam {
        name: Sym,
    },
    ProcessChildren(ProcessSpec),
    ProcessSelf(ProcessSpec),
    ProcessAttributes(ProcessSpec),
    ProcessSiblings {
        spec: ProcessSpec,
        while_pattern: Option<Pattern>,
        until: Option<Pattern>,
    },
    ProcessBuffer {
        name: Sym,
        spec: ProcessSpec,
    },
    ProcessDocument {
        href: Expression,
        base: Option<Expression>,
        spec: ProcessSpec,
    },
    CallProcedure {
        name: ExpandedName,
        procedure: Option<ProcedureId>,
        spec: ProcessSpec,
    },
    Return,
}

impl Instr {
    pub fn spec_mut(&mut self) -> Option<&mut ProcessSpec> {
        match self {
            Instr::ProcessChildren(spec)
            | Instr::ProcessSelf(spec)
            | Instr::ProcessAttributes(spec)
            | Instr::ProcessSiblings { spec, .. }
            | Instr::ProcessBuffer { spec, .. }
            | Instr::ProcessDocument { spec, .. }
            | Instr::CallProcedure { spec, .. } => Some(spec),
            _ => None,
        }
    }

    /// Short name used in trace output.
    pub fn name(&self) -> &'static str {
        match self {
            Instr::Text(_) => "text",
            Instr::CdataStart | Instr::CdataEnd => "cdata",
            Instr::ValueOf { .. } => "value-of",
            Instr::LiteralElementStart { .. } | Instr::LiteralElementEnd { .. } => "literal-element",
            Instr::ElementStart { .. } | Instr::ElementEnd => "element",
            Instr::StartElement { .. } => "start-element",
            Instr::EndElement { .. } => "end-element",
            Instr::BeginText => "begin-text",
            Instr::BeginAttribute | Instr::EndAttribute { .. } => "attribute",
            Instr::EndComment => "comment",
            Instr::EndPi { .. } => "processing-instruction",
            Instr::EndMessage => "message",
            Instr::CopyStart { .. } | Instr::CopyEnd => "copy",
            Instr::Variable { .. } | Instr::EndVariable { .. } => "variable",
            Instr::Param { .. } | Instr::EndParam { .. } => "param",
            Instr::Assign { .. } | Instr::EndAssign { .. } => "assign",
            Instr::BufferStart { .. } | Instr::BufferEnd { .. } => "buffer",
            Instr::ResultBufferStart | Instr::ResultBufferEnd { .. } => "result-buffer",
            Instr::ResultDocumentStart { .. } | Instr::ResultDocumentEnd => "result-document",
            Instr::If { .. } => "if",
            Instr::When { .. } => "when",
            Instr::Jump { .. } => "jump",
            Instr::ForEachStart { .. } | Instr::ForEachNext { .. } => "for-each-item",
            Instr::While { .. } => "while",
            Instr::ScopeEnd { .. } => "scope-end",
            Instr::ParamsStart | Instr::WithParam { .. } | Instr::EndWithParam { .. } => "with-param",
            Instr::ProcessChildren(_) => "process-children",
            Instr::ProcessSelf(_) => "process-self",
            Instr::ProcessAttributes(_) => "process-attributes",
            Instr::ProcessSiblings { .. } => "process-siblings",
            Instr::ProcessBuffer { .. } => "process-buffer",
            Instr::ProcessDocument { .. } => "process-document",
            Instr::CallProcedure { .. } => "call-procedure",
            Instr::Return => "return",
        }
    }
}
