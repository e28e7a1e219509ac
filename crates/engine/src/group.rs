//! The group and template registry.
//!
//! Groups form a tree stored in an arena; parents and children refer to
//! each other by index. Each group keeps its own rules and the rules visible
//! in it (its own plus those its child groups export), both sorted by
//! descending priority.

use crate::config::GroupConfig;
use crate::def::Visibility;
use crate::error::StxError;
use crate::instr::InstrId;
use sluice_path::{Expression, PathPattern, VariableResolver};
use sluice_types::{EventRef, ExpandedName, Location, PositionKey, Sym};
use std::collections::HashMap;

pub type GroupId = usize;
pub type TemplateId = usize;
pub type ProcedureId = usize;

#[derive(Debug, Clone)]
pub struct Template {
    pub group: GroupId,
    pub entry: InstrId,
    pub pattern: String,
    pub visibility: Visibility,
    pub new_scope: bool,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct Procedure {
    pub name: ExpandedName,
    pub group: GroupId,
    pub entry: InstrId,
    pub visibility: Visibility,
    pub new_scope: bool,
    pub location: Location,
}

/// One alternative of a template's match pattern.
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: PathPattern,
    pub priority: f64,
    pub template: TemplateId,
    pub visibility: Visibility,
    /// Node test used to compute the matched node's context position.
    pub key: PositionKey,
}

#[derive(Debug, Clone)]
pub struct GroupVariable {
    pub name: Sym,
    pub select: Option<Expression>,
    pub keep_value: bool,
    pub param: bool,
    pub required: bool,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub name: Option<ExpandedName>,
    pub parent: Option<GroupId>,
    pub children: Vec<GroupId>,
    pub config: GroupConfig,
    pub own_rules: Vec<Rule>,
    pub visible_rules: Vec<Rule>,
    /// Rules this group makes visible to its parent.
    pub exported_rules: Vec<Rule>,
    /// Own procedures plus those exported by child groups.
    pub procedures: HashMap<ExpandedName, ProcedureId>,
    pub exported_procedures: HashMap<ExpandedName, ProcedureId>,
    pub own_procedures: HashMap<ExpandedName, ProcedureId>,
    pub variables: Vec<GroupVariable>,
    pub buffers: Vec<Sym>,
    pub compiled: bool,
    pub location: Location,
}

impl Group {
    pub fn new(name: Option<ExpandedName>, parent: Option<GroupId>, config: GroupConfig, location: Location) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            config,
            own_rules: Vec::new(),
            visible_rules: Vec::new(),
            exported_rules: Vec::new(),
            procedures: HashMap::new(),
            exported_procedures: HashMap::new(),
            own_procedures: HashMap::new(),
            variables: Vec::new(),
            buffers: Vec::new(),
            compiled: false,
            location,
        }
    }

    pub fn variable_index(&self, name: Sym) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }

    pub fn buffer_index(&self, name: Sym) -> Option<usize> {
        self.buffers.iter().position(|b| *b == name)
    }
}

/// Sorts by descending priority; declaration order is kept among equals.
pub fn sort_rules(rules: &mut [Rule]) {
    rules.sort_by(|a, b| b.priority.total_cmp(&a.priority));
}

/// The outcome of matching a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub template: TemplateId,
    pub key: PositionKey,
}

/// Finds the rule for the node on top of `stack` in one tier. Another
/// template matching at the same priority is an ambiguity error.
pub fn match_tier(
    rules: &[Rule],
    templates: &[Template],
    stack: &[EventRef],
    variables: &dyn VariableResolver,
    exclude: &[TemplateId],
) -> Result<Option<Match>, StxError> {
    let mut iter = rules.iter().enumerate();
    let found = loop {
        let Some((index, rule)) = iter.next() else {
            return Ok(None);
        };
        if exclude.contains(&rule.template) {
            continue;
        }
        if rule
            .pattern
            .matches(stack, variables)
            .map_err(|e| StxError::path(e, &templates[rule.template].location))?
        {
            break (index, rule);
        }
    };
    let (index, rule) = found;
    for other in &rules[index + 1..] {
        if other.priority != rule.priority {
            break;
        }
        if other.template == rule.template || exclude.contains(&other.template) {
            continue;
        }
        if other
            .pattern
            .matches(stack, variables)
            .map_err(|e| StxError::path(e, &templates[other.template].location))?
        {
            let first = &templates[rule.template];
            let second = &templates[other.template];
            return Err(StxError::fatal(format!(
                "ambiguous template match: '{}' ({}) and '{}' ({}) both match with priority {}",
                first.pattern, first.location, second.pattern, second.location, rule.priority
            )));
        }
    }
    Ok(Some(Match {
        template: rule.template,
        key: rule.key.clone(),
    }))
}
