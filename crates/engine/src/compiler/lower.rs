//! Lowers construct trees into the instruction arena.
//!
//! Local checks run on each construct as it is lowered: `choose` needs a
//! `when`, parameters lead their body, and a name may not be declared twice
//! in nested scopes. Instructions are appended in order, so the default
//! successor of each node is the next one; forward jumps are emitted with a
//! placeholder and patched once their target exists.

use super::passes::Pending;
use super::{compile_expression, resolve_name};
use crate::def::{Construct, Kind, ProcessDef};
use crate::error::StxError;
use crate::group::GroupId;
use crate::instr::{FilterSpec, Instr, InstrId, Node, ProcessSpec};
use sluice_path::{Avt, Expression, Namespaces, Pattern};
use sluice_types::{Interner, Location, NamespaceDecl, Sym};

const UNPATCHED: InstrId = usize::MAX;

pub(super) struct Lowerer<'c> {
    program: &'c mut Vec<Node>,
    interner: &'c mut Interner,
    namespaces: &'c Namespaces,
    result_namespaces: &'c [NamespaceDecl],
    pending: &'c mut Vec<Pending>,
    group: GroupId,
    system_id: Option<&'c str>,
    /// Names declared by each open block: variables, then buffers.
    scopes: Vec<(Vec<(Sym, String)>, Vec<Sym>)>,
}

impl<'c> Lowerer<'c> {
    pub(super) fn new(
        program: &'c mut Vec<Node>,
        interner: &'c mut Interner,
        namespaces: &'c Namespaces,
        result_namespaces: &'c [NamespaceDecl],
        pending: &'c mut Vec<Pending>,
        group: GroupId,
        system_id: Option<&'c str>,
    ) -> Self {
        Self {
            program,
            interner,
            namespaces,
            result_namespaces,
            pending,
            group,
            system_id,
            scopes: Vec::new(),
        }
    }

    /// Lowers a template or procedure body and returns its entry point.
    pub(super) fn body(&mut self, body: &[Construct], location: &Location) -> Result<InstrId, StxError> {
        let entry = self.program.len();
        let mut params_allowed = true;
        for construct in body {
            let is_param = matches!(construct.kind, Kind::Param { .. });
            if is_param && !params_allowed {
                return Err(StxError::compile(
                    "param must come before any other content of its template or procedure",
                    &self.locate(&construct.location),
                ));
            }
            params_allowed &= is_param;
        }
        self.block(body, true)?;
        self.emit(Instr::Return, location);
        Ok(entry)
    }

    fn locate(&self, location: &Location) -> Location {
        match (&location.system_id, self.system_id) {
            (None, Some(system_id)) => location.clone().with_system_id(system_id),
            _ => location.clone(),
        }
    }

    fn emit(&mut self, instr: Instr, location: &Location) -> InstrId {
        let id = self.program.len();
        let location = self.locate(location);
        self.program.push(Node {
            instr,
            next: id + 1,
            location,
        });
        id
    }

    fn here(&self) -> InstrId {
        self.program.len()
    }

    fn patch(&mut self, id: InstrId, target: InstrId) {
        match &mut self.program[id].instr {
            Instr::If { on_false, .. } | Instr::When { on_false, .. } => *on_false = target,
            Instr::Jump { target: t } => *t = target,
            Instr::ForEachNext { exit, .. } | Instr::While { exit, .. } => *exit = target,
            Instr::Param { skip, .. } => *skip = Some(target),
            _ => {}
        }
    }

    fn block(&mut self, body: &[Construct], allow_params: bool) -> Result<(), StxError> {
        self.scopes.push((Vec::new(), Vec::new()));
        for construct in body {
            self.construct(construct, allow_params)?;
        }
        let (variables, buffers) = self.scopes.pop().unwrap_or_default();
        if !variables.is_empty() || !buffers.is_empty() {
            let location = body.last().map(|c| c.location.clone()).unwrap_or_default();
            self.emit(
                Instr::ScopeEnd {
                    variables: variables.len(),
                    buffers: buffers.len(),
                },
                &location,
            );
        }
        Ok(())
    }

    fn symbol(&mut self, name: &str, location: &Location) -> Result<Sym, StxError> {
        let expanded = resolve_name(name, self.namespaces, false, location)?.expanded();
        Ok(self.interner.intern(&expanded))
    }

    fn declare_variable(&mut self, name: &str, location: &Location) -> Result<Sym, StxError> {
        let sym = self.symbol(name, location)?;
        if self.scopes.iter().any(|(vars, _)| vars.iter().any(|(s, _)| *s == sym)) {
            return Err(StxError::compile(
                format!("variable '${}' is already declared in this scope", name),
                &self.locate(location),
            ));
        }
        if let Some((vars, _)) = self.scopes.last_mut() {
            vars.push((sym, name.to_string()));
        }
        Ok(sym)
    }

    fn declare_buffer(&mut self, name: &str, location: &Location) -> Result<Sym, StxError> {
        let sym = self.symbol(name, location)?;
        if self.scopes.iter().any(|(_, buffers)| buffers.contains(&sym)) {
            return Err(StxError::compile(
                format!("buffer '{}' is already declared in this scope", name),
                &self.locate(location),
            ));
        }
        if let Some((_, buffers)) = self.scopes.last_mut() {
            buffers.push(sym);
        }
        Ok(sym)
    }

    fn expr(&self, source: &str, location: &Location) -> Result<Expression, StxError> {
        compile_expression(source, self.namespaces, &self.locate(location))
    }

    fn avt(&self, source: &str, location: &Location) -> Result<Avt, StxError> {
        Avt::compile(source, self.namespaces).map_err(|e| {
            StxError::compile(
                format!("invalid value template '{}': {}", source, e),
                &self.locate(location),
            )
        })
    }

    fn optional_avt(&self, source: &Option<String>, location: &Location) -> Result<Option<Avt>, StxError> {
        source.as_deref().map(|s| self.avt(s, location)).transpose()
    }

    fn pattern(&self, source: &str, location: &Location) -> Result<Pattern, StxError> {
        Pattern::compile(source, self.namespaces).map_err(|e| {
            StxError::compile(format!("invalid pattern '{}': {}", source, e), &self.locate(location))
        })
    }

    /// Body-or-select content captured as text: `select` becomes a value-of
    /// inside the capture.
    fn captured(&mut self, select: &Option<String>, body: &[Construct], location: &Location) -> Result<(), StxError> {
        match select {
            Some(select) => {
                let select = self.expr(select, location)?;
                self.emit(
                    Instr::ValueOf {
                        select,
                        separator: Avt::literal(" "),
                    },
                    location,
                );
                Ok(())
            }
            None => self.block(body, false),
        }
    }

    fn construct(&mut self, construct: &Construct, allow_params: bool) -> Result<(), StxError> {
        let at = &construct.location;
        match &construct.kind {
            Kind::Text { text } => {
                self.emit(Instr::Text(text.clone()), at);
            }
            Kind::Cdata { text, body } => {
                self.emit(Instr::CdataStart, at);
                if let Some(text) = text {
                    self.emit(Instr::Text(text.clone()), at);
                }
                self.block(body, false)?;
                self.emit(Instr::CdataEnd, at);
            }
            Kind::ValueOf { select, separator } => {
                let select = self.expr(select, at)?;
                let separator = match separator {
                    Some(separator) => self.avt(separator, at)?,
                    None => Avt::literal(" "),
                };
                self.emit(Instr::ValueOf { select, separator }, at);
            }
            Kind::Element { name, attributes, body } => {
                let location = self.locate(at);
                let name = resolve_name(name, self.namespaces, true, &location)?;
                let attributes = attributes
                    .iter()
                    .map(|(attr, value)| {
                        Ok((resolve_name(attr, self.namespaces, false, &location)?, self.avt(value, at)?))
                    })
                    .collect::<Result<Vec<_>, StxError>>()?;
                self.emit(
                    Instr::LiteralElementStart {
                        name: name.clone(),
                        attributes,
                        namespaces: self.result_namespaces.to_vec(),
                    },
                    at,
                );
                self.block(body, false)?;
                self.emit(Instr::LiteralElementEnd { name }, at);
            }
            Kind::DynamicElement { name, namespace, body } => {
                let name = self.avt(name, at)?;
                let namespace = self.optional_avt(namespace, at)?;
                self.emit(Instr::ElementStart { name, namespace }, at);
                self.block(body, false)?;
                self.emit(Instr::ElementEnd, at);
            }
            Kind::StartElement { name, namespace } => {
                let name = self.avt(name, at)?;
                let namespace = self.optional_avt(namespace, at)?;
                self.emit(Instr::StartElement { name, namespace }, at);
            }
            Kind::EndElement { name, namespace } => {
                let name = self.avt(name, at)?;
                let namespace = self.optional_avt(namespace, at)?;
                self.emit(Instr::EndElement { name, namespace }, at);
            }
            Kind::Attribute {
                name,
                namespace,
                select,
                body,
            } => {
                let name = self.avt(name, at)?;
                let namespace = self.optional_avt(namespace, at)?;
                self.emit(Instr::BeginAttribute, at);
                self.captured(select, body, at)?;
                self.emit(Instr::EndAttribute { name, namespace }, at);
            }
            Kind::Comment { select, body } => {
                self.emit(Instr::BeginText, at);
                self.captured(select, body, at)?;
                self.emit(Instr::EndComment, at);
            }
            Kind::ProcessingInstruction { name, select, body } => {
                let name = self.avt(name, at)?;
                self.emit(Instr::BeginText, at);
                self.captured(select, body, at)?;
                self.emit(Instr::EndPi { name }, at);
            }
            Kind::Message { select, body } => {
                self.emit(Instr::BeginText, at);
                self.captured(select, body, at)?;
                self.emit(Instr::EndMessage, at);
            }
            Kind::Copy { attributes, body } => {
                let attributes = attributes.as_deref().map(|p| self.pattern(p, at)).transpose()?;
                self.emit(Instr::CopyStart { attributes }, at);
                self.block(body, false)?;
                self.emit(Instr::CopyEnd, at);
            }
            Kind::Variable { name, select, body } => {
                let select = select.as_deref().map(|s| self.expr(s, at)).transpose()?;
                if select.is_none() && !body.is_empty() {
                    self.emit(Instr::BeginText, at);
                    self.block(body, false)?;
                    let name = self.declare_variable(name, at)?;
                    self.emit(Instr::EndVariable { name }, at);
                } else {
                    let name = self.declare_variable(name, at)?;
                    self.emit(Instr::Variable { name, select }, at);
                }
            }
            Kind::Param {
                name,
                select,
                required,
                body,
            } => {
                if !allow_params {
                    return Err(StxError::compile(
                        format!("param '${}' is only allowed at the start of a template or procedure", name),
                        &self.locate(at),
                    ));
                }
                let select = select.as_deref().map(|s| self.expr(s, at)).transpose()?;
                let sym = self.declare_variable(name, at)?;
                if select.is_none() && !body.is_empty() {
                    let head = self.emit(
                        Instr::Param {
                            name: sym,
                            select: None,
                            required: *required,
                            skip: Some(UNPATCHED),
                        },
                        at,
                    );
                    self.block(body, false)?;
                    self.emit(Instr::EndParam { name: sym }, at);
                    let after = self.here();
                    self.patch(head, after);
                } else {
                    self.emit(
                        Instr::Param {
                            name: sym,
                            select,
                            required: *required,
                            skip: None,
                        },
                        at,
                    );
                }
            }
            Kind::Assign { name, select, body } => {
                let sym = self.symbol(name, at)?;
                match select {
                    Some(select) => {
                        let select = self.expr(select, at)?;
                        self.emit(Instr::Assign { name: sym, select }, at);
                    }
                    None => {
                        self.emit(Instr::BeginText, at);
                        self.block(body, false)?;
                        self.emit(Instr::EndAssign { name: sym }, at);
                    }
                }
            }
            Kind::Buffer { name, body } => {
                let sym = self.symbol(name, at)?;
                self.emit(Instr::BufferStart { name: sym }, at);
                self.block(body, false)?;
                self.declare_buffer(name, at)?;
                self.emit(Instr::BufferEnd { name: sym }, at);
            }
            Kind::ResultBuffer { name, clear, body } => {
                let sym = self.symbol(name, at)?;
                self.emit(Instr::ResultBufferStart, at);
                self.block(body, false)?;
                self.emit(Instr::ResultBufferEnd { name: sym, clear: *clear }, at);
            }
            Kind::ResultDocument { href, body } => {
                let href = self.avt(href, at)?;
                self.emit(Instr::ResultDocumentStart { href }, at);
                self.block(body, false)?;
                self.emit(Instr::ResultDocumentEnd, at);
            }
            Kind::If { test, body } => {
                let test = self.expr(test, at)?;
                let head = self.emit(
                    Instr::If {
                        test,
                        on_false: UNPATCHED,
                    },
                    at,
                );
                self.block(body, false)?;
                let after = self.here();
                self.patch(head, after);
            }
            Kind::Choose { whens, otherwise } => {
                if whens.is_empty() {
                    return Err(StxError::compile(
                        "choose must contain at least one when",
                        &self.locate(at),
                    ));
                }
                let mut exits = Vec::new();
                for when in whens {
                    let location = if when.location.is_unknown() { at } else { &when.location };
                    let test = self.expr(&when.test, location)?;
                    let head = self.emit(
                        Instr::When {
                            test,
                            on_false: UNPATCHED,
                        },
                        location,
                    );
                    self.block(&when.body, false)?;
                    exits.push(self.emit(Instr::Jump { target: UNPATCHED }, location));
                    let next = self.here();
                    self.patch(head, next);
                }
                if let Some(otherwise) = otherwise {
                    self.block(otherwise, false)?;
                }
                let after = self.here();
                for exit in exits {
                    self.patch(exit, after);
                }
            }
            Kind::ForEachItem { name, select, body } => {
                let select = self.expr(select, at)?;
                self.emit(Instr::ForEachStart { select }, at);
                self.scopes.push((Vec::new(), Vec::new()));
                let sym = self.declare_variable(name, at)?;
                let head = self.emit(
                    Instr::ForEachNext {
                        name: sym,
                        exit: UNPATCHED,
                    },
                    at,
                );
                self.block(body, false)?;
                self.scopes.pop();
                self.emit(Instr::Jump { target: head }, at);
                let after = self.here();
                self.patch(head, after);
            }
            Kind::While { test, body } => {
                let test = self.expr(test, at)?;
                let head = self.emit(Instr::While { test, exit: UNPATCHED }, at);
                self.block(body, false)?;
                self.emit(Instr::Jump { target: head }, at);
                let after = self.here();
                self.patch(head, after);
            }
            Kind::ProcessChildren { process } => {
                let spec = self.process_spec(process, at)?;
                self.emit_process(Instr::ProcessChildren(spec), at);
            }
            Kind::ProcessSelf { process } => {
                let spec = self.process_spec(process, at)?;
                self.emit_process(Instr::ProcessSelf(spec), at);
            }
            Kind::ProcessAttributes { process } => {
                let spec = self.process_spec(process, at)?;
                self.emit_process(Instr::ProcessAttributes(spec), at);
            }
            Kind::ProcessSiblings {
                while_pattern,
                until,
                process,
            } => {
                let while_pattern = while_pattern.as_deref().map(|p| self.pattern(p, at)).transpose()?;
                let until = until.as_deref().map(|p| self.pattern(p, at)).transpose()?;
                let spec = self.process_spec(process, at)?;
                self.emit_process(
                    Instr::ProcessSiblings {
                        spec,
                        while_pattern,
                        until,
                    },
                    at,
                );
            }
            Kind::ProcessBuffer { name, process } => {
                let name = self.symbol(name, at)?;
                let spec = self.process_spec(process, at)?;
                self.emit_process(Instr::ProcessBuffer { name, spec }, at);
            }
            Kind::ProcessDocument { href, base, process } => {
                let href = self.expr(href, at)?;
                let base = base.as_deref().map(|b| self.expr(b, at)).transpose()?;
                let spec = self.process_spec(process, at)?;
                self.emit_process(Instr::ProcessDocument { href, base, spec }, at);
            }
            Kind::CallProcedure { name, process } => {
                let location = self.locate(at);
                let name = resolve_name(name, self.namespaces, false, &location)?.expanded();
                let spec = self.process_spec(process, at)?;
                let id = self.emit_process(
                    Instr::CallProcedure {
                        name: name.clone(),
                        procedure: None,
                        spec,
                    },
                    at,
                );
                self.pending.push(Pending::ResolveProcedure {
                    instr: id,
                    name,
                    from: self.group,
                    location,
                });
            }
        }
        Ok(())
    }

    /// Emits the parameter instructions of `process` and returns the spec
    /// for the instruction that consumes them.
    fn process_spec(&mut self, process: &ProcessDef, at: &Location) -> Result<ProcessSpec, StxError> {
        let location = self.locate(at);
        let group_name = match &process.group {
            Some(group) => Some(resolve_name(group, self.namespaces, false, &location)?.expanded()),
            None => None,
        };
        let filter = match &process.filter {
            Some(filter) => Some(FilterSpec {
                method: filter.method.clone(),
                src: filter.src.as_deref().map(|s| self.expr(s, at)).transpose()?,
            }),
            None => None,
        };
        let has_params = !process.params.is_empty();
        if has_params {
            self.emit(Instr::ParamsStart, at);
            for param in &process.params {
                let location = if param.location.is_unknown() { at } else { &param.location };
                let name = self.symbol(&param.name, location)?;
                match &param.select {
                    Some(select) => {
                        let select = self.expr(select, location)?;
                        self.emit(Instr::WithParam { name, select }, location);
                    }
                    None => {
                        self.emit(Instr::BeginText, location);
                        self.block(&param.body, false)?;
                        self.emit(Instr::EndWithParam { name }, location);
                    }
                }
            }
        }
        Ok(ProcessSpec {
            group_name,
            group: None,
            filter,
            has_params,
        })
    }

    fn emit_process(&mut self, instr: Instr, at: &Location) -> InstrId {
        let group_name = match &instr {
            Instr::ProcessChildren(spec)
            | Instr::ProcessSelf(spec)
            | Instr::ProcessAttributes(spec)
            | Instr::ProcessSiblings { spec, .. }
            | Instr::ProcessBuffer { spec, .. }
            | Instr::ProcessDocument { spec, .. }
            | Instr::CallProcedure { spec, .. } => spec.group_name.clone(),
            _ => None,
        };
        let id = self.emit(instr, at);
        if let Some(name) = group_name {
            self.pending.push(Pending::ResolveGroup {
                instr: id,
                name,
                location: self.locate(at),
            });
        }
        id
    }
}
