//! Group variables and buffers, and the variable view expressions see.

use super::Processor;
use super::frame::{Activation, Local};
use crate::error::StxError;
use crate::group::GroupId;
use crate::output::{OutputEvent, ResultHandler};
use crate::sheet::Sheet;
use sluice_path::{EvalContext, VariableResolver, evaluate};
use sluice_types::{Event, EventRef, ExpandedName, Sym, Value};

/// One generation of a group's variables. A group gets a new frame for each
/// activation of a `new-scope` template or procedure.
#[derive(Debug, Clone)]
pub(crate) struct ScopeFrame {
    pub values: Vec<Value>,
    pub buffers: Vec<Vec<OutputEvent>>,
}

#[derive(Debug, Default)]
pub(crate) struct GroupScopes {
    groups: Vec<Vec<ScopeFrame>>,
}

impl GroupScopes {
    fn frame(&self, group: GroupId) -> Option<&ScopeFrame> {
        self.groups.get(group).and_then(|frames| frames.last())
    }

    fn frame_mut(&mut self, group: GroupId) -> Option<&mut ScopeFrame> {
        self.groups.get_mut(group).and_then(|frames| frames.last_mut())
    }

    /// Searches `group` and its ancestors.
    pub fn variable(&self, sheet: &Sheet, group: GroupId, name: Sym) -> Option<&Value> {
        let mut current = Some(group);
        while let Some(id) = current {
            let group = &sheet.groups[id];
            if let Some(index) = group.variable_index(name) {
                return self.frame(id).and_then(|f| f.values.get(index));
            }
            current = group.parent;
        }
        None
    }

    pub fn variable_mut(&mut self, sheet: &Sheet, group: GroupId, name: Sym) -> Option<&mut Value> {
        let mut current = Some(group);
        while let Some(id) = current {
            let group = &sheet.groups[id];
            if let Some(index) = group.variable_index(name) {
                return self.frame_mut(id).and_then(|f| f.values.get_mut(index));
            }
            current = group.parent;
        }
        None
    }

    pub fn buffer(&self, sheet: &Sheet, group: GroupId, name: Sym) -> Option<&Vec<OutputEvent>> {
        let mut current = Some(group);
        while let Some(id) = current {
            let group = &sheet.groups[id];
            if let Some(index) = group.buffer_index(name) {
                return self.frame(id).and_then(|f| f.buffers.get(index));
            }
            current = group.parent;
        }
        None
    }

    pub fn buffer_mut(&mut self, sheet: &Sheet, group: GroupId, name: Sym) -> Option<&mut Vec<OutputEvent>> {
        let mut current = Some(group);
        while let Some(id) = current {
            let group = &sheet.groups[id];
            if let Some(index) = group.buffer_index(name) {
                return self.frame_mut(id).and_then(|f| f.buffers.get_mut(index));
            }
            current = group.parent;
        }
        None
    }

    fn push(&mut self, group: GroupId, frame: ScopeFrame) {
        if self.groups.len() <= group {
            self.groups.resize_with(group + 1, Vec::new);
        }
        self.groups[group].push(frame);
    }

    fn pop(&mut self, group: GroupId) {
        if let Some(frames) = self.groups.get_mut(group) {
            if frames.len() > 1 {
                frames.pop();
            }
        }
    }
}

/// Variables visible to one expression: the locals of the running template
/// or procedure, then the variables of its group and the enclosing groups.
pub(crate) struct Scope<'a> {
    sheet: &'a Sheet,
    scopes: &'a GroupScopes,
    group: GroupId,
    locals: &'a [Local],
}

impl<'a> Scope<'a> {
    pub fn new(sheet: &'a Sheet, scopes: &'a GroupScopes, group: GroupId, locals: &'a [Local]) -> Self {
        Self {
            sheet,
            scopes,
            group,
            locals,
        }
    }
}

impl VariableResolver for Scope<'_> {
    fn resolve_variable(&self, name: &ExpandedName) -> Option<Value> {
        let sym = self.sheet.interner.get(name)?;
        if let Some(local) = self.locals.iter().rev().find(|l| l.name == sym) {
            return Some(local.value.clone());
        }
        self.scopes.variable(self.sheet, self.group, sym).cloned()
    }
}

impl<H: ResultHandler> Processor<H> {
    /// Creates the first generation of every group's variables, in
    /// declaration order. Externally set parameters replace the defaults.
    pub(super) fn init_scopes(&mut self) -> Result<(), StxError> {
        self.scopes = GroupScopes::default();
        let sheet = std::sync::Arc::clone(&self.sheet);
        let stack = vec![Event::root()];
        for (id, group) in sheet.groups.iter().enumerate() {
            self.scopes.push(
                id,
                ScopeFrame {
                    values: vec![Value::empty(); group.variables.len()],
                    buffers: vec![Vec::new(); group.buffers.len()],
                },
            );
            for (index, variable) in group.variables.iter().enumerate() {
                let name = sheet.interner.resolve(variable.name);
                let value = match self.parameters.get(name) {
                    Some(value) if variable.param => value.clone(),
                    _ if variable.param && variable.required => {
                        return Err(StxError::fatal(format!("required parameter '${}' was not set", name))
                            .at(&variable.location));
                    }
                    _ => self.initial_value(&sheet, id, &stack, 1, variable.select.as_ref(), &variable.location)?,
                };
                if let Some(frame) = self.scopes.frame_mut(id) {
                    frame.values[index] = value;
                }
            }
        }
        Ok(())
    }

    /// Gives `group` a fresh generation of variables for a `new-scope`
    /// activation. `keep-value` variables start with their current value.
    pub(super) fn enter_scope(&mut self, group: GroupId, act: &Activation) -> Result<(), StxError> {
        let sheet = std::sync::Arc::clone(&self.sheet);
        let declared = &sheet.groups[group];
        let mut frame = ScopeFrame {
            values: Vec::with_capacity(declared.variables.len()),
            buffers: vec![Vec::new(); declared.buffers.len()],
        };
        for (index, variable) in declared.variables.iter().enumerate() {
            let value = if variable.keep_value {
                self.scopes
                    .frame(group)
                    .and_then(|f| f.values.get(index))
                    .cloned()
                    .unwrap_or_default()
            } else {
                self.initial_value(
                    &sheet,
                    group,
                    &act.stack,
                    act.position,
                    variable.select.as_ref(),
                    &variable.location,
                )?
            };
            frame.values.push(value);
        }
        log::trace!("new scope for group {}", group);
        self.scopes.push(group, frame);
        Ok(())
    }

    pub(super) fn leave_scope(&mut self, group: GroupId) {
        self.scopes.pop(group);
    }

    fn initial_value(
        &mut self,
        sheet: &Sheet,
        group: GroupId,
        stack: &[EventRef],
        position: u64,
        select: Option<&sluice_path::Expression>,
        location: &sluice_types::Location,
    ) -> Result<Value, StxError> {
        let Some(select) = select else {
            return Ok(Value::empty());
        };
        let result = {
            let scope = Scope::new(sheet, &self.scopes, group, &[]);
            let ctx = EvalContext::new(stack, position, &scope);
            evaluate(select, &ctx)
        };
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                self.recover(StxError::path(e, location))?;
                Ok(Value::empty())
            }
        }
    }
}
