//! A compiled transformation sheet.
//!
//! A [`Sheet`] is immutable once compiled and holds no reference-counted
//! input data, so one `Arc<Sheet>` can drive any number of processors,
//! on any thread.

use crate::compiler;
use crate::config::OutputConfig;
use crate::def::TransformDef;
use crate::error::StxError;
use crate::group::{Group, GroupId, Match, Procedure, ProcedureId, Rule, Template, TemplateId, match_tier};
use crate::instr::Node;
use sluice_path::{Namespaces, VariableResolver};
use sluice_types::{EventRef, ExpandedName, Interner};
use std::collections::HashMap;

/// The outermost group of every sheet.
pub const TOP_GROUP: GroupId = 0;

#[derive(Debug, Clone)]
pub struct Sheet {
    pub(crate) program: Vec<Node>,
    pub(crate) groups: Vec<Group>,
    pub(crate) templates: Vec<Template>,
    pub(crate) procedures: Vec<Procedure>,
    pub(crate) global_rules: Vec<Rule>,
    pub(crate) global_procedures: HashMap<ExpandedName, ProcedureId>,
    pub(crate) group_names: HashMap<ExpandedName, GroupId>,
    pub(crate) interner: Interner,
    pub(crate) namespaces: Namespaces,
    pub(crate) output: Option<OutputConfig>,
    pub(crate) system_id: Option<String>,
}

impl Sheet {
    pub fn compile(def: &TransformDef) -> Result<Self, StxError> {
        compiler::compile(def)
    }

    pub(crate) fn empty(def: &TransformDef, namespaces: Namespaces) -> Self {
        Self {
            program: Vec::new(),
            groups: Vec::new(),
            templates: Vec::new(),
            procedures: Vec::new(),
            global_rules: Vec::new(),
            global_procedures: HashMap::new(),
            group_names: HashMap::new(),
            interner: Interner::new(),
            namespaces,
            output: def.output.clone(),
            system_id: def.system_id.clone(),
        }
    }

    /// Output settings declared by the sheet itself.
    pub fn output(&self) -> Option<&OutputConfig> {
        self.output.as_ref()
    }

    pub fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    pub fn instruction_count(&self) -> usize {
        self.program.len()
    }

    pub fn group_by_name(&self, name: &ExpandedName) -> Option<GroupId> {
        self.group_names.get(name).copied()
    }

    /// Finds the template for the node on top of `stack`, searching the
    /// rules visible in `group`, then the group's own rules, then the global
    /// rules. The first tier with a match decides.
    pub(crate) fn find_template(
        &self,
        group: GroupId,
        stack: &[EventRef],
        variables: &dyn VariableResolver,
        exclude: &[TemplateId],
    ) -> Result<Option<Match>, StxError> {
        let group = &self.groups[group];
        for tier in [&group.visible_rules, &group.own_rules, &self.global_rules] {
            if let Some(found) = match_tier(tier, &self.templates, stack, variables, exclude)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}
