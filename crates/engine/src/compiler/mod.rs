//! Compiles [`TransformDef`]s into a [`Sheet`].
//!
//! Template and procedure bodies are checked and lowered into the
//! instruction arena group by group (see [`lower`]). References that can
//! only be settled once every group exists (named groups, procedures,
//! the visible template sets of groups) are queued and resolved by the
//! fixed-point passes in [`passes`].

mod lower;
mod passes;

use crate::config::GroupConfig;
use crate::def::{GroupDef, TransformDef, Visibility};
use crate::error::StxError;
use crate::group::{Group, GroupId, GroupVariable, Procedure, Rule, Template};
use crate::sheet::Sheet;
use lower::Lowerer;
use passes::Pending;
use sluice_path::{Expression, Namespaces, Pattern};
use sluice_types::{Location, NamespaceDecl, QualifiedName, XML_NAMESPACE};
use std::collections::HashSet;

pub fn compile(def: &TransformDef) -> Result<Sheet, StxError> {
    let mut namespaces = Namespaces::new();
    namespaces.insert("xml".to_string(), XML_NAMESPACE.to_string());
    for (prefix, uri) in &def.namespaces {
        namespaces.insert(prefix.clone(), uri.clone());
    }
    let excluded: HashSet<&str> = def.exclude_result_prefixes.iter().map(String::as_str).collect();
    let result_namespaces = def
        .namespaces
        .iter()
        .filter(|(prefix, _)| prefix != "xml" && !excluded.contains(prefix.as_str()))
        .map(|(prefix, uri)| NamespaceDecl::new(prefix.clone(), uri.clone()))
        .collect();

    let mut compiler = Compiler {
        sheet: Sheet::empty(def, namespaces),
        result_namespaces,
        pending: Vec::new(),
    };
    compiler.group(&def.group, None, &GroupConfig::default())?;
    let Compiler { mut sheet, pending, .. } = compiler;
    passes::run(&mut sheet, pending)?;
    log::debug!(
        "compiled sheet: {} groups, {} templates, {} procedures, {} instructions",
        sheet.groups.len(),
        sheet.templates.len(),
        sheet.procedures.len(),
        sheet.program.len()
    );
    Ok(sheet)
}

struct Compiler {
    sheet: Sheet,
    result_namespaces: Vec<NamespaceDecl>,
    pending: Vec<Pending>,
}

impl Compiler {
    fn locate(&self, location: &Location) -> Location {
        match (&location.system_id, &self.sheet.system_id) {
            (None, Some(system_id)) => location.clone().with_system_id(system_id.clone()),
            _ => location.clone(),
        }
    }

    fn group(&mut self, def: &GroupDef, parent: Option<GroupId>, inherited: &GroupConfig) -> Result<GroupId, StxError> {
        let location = self.locate(&def.location);
        let name = match &def.name {
            Some(name) => Some(resolve_name(name, &self.sheet.namespaces, false, &location)?.expanded()),
            None => None,
        };
        let config = def.options.resolve(inherited);
        let id = self.sheet.groups.len();
        if let Some(name) = &name {
            if self.sheet.group_names.insert(name.clone(), id).is_some() {
                return Err(StxError::compile(format!("duplicate group name '{}'", name), &location));
            }
        }
        self.sheet.groups.push(Group::new(name, parent, config, location.clone()));
        if let Some(parent) = parent {
            self.sheet.groups[parent].children.push(id);
        }

        for variable in &def.variables {
            let location = self.locate(&variable.location);
            let expanded = resolve_name(&variable.name, &self.sheet.namespaces, false, &location)?.expanded();
            let sym = self.sheet.interner.intern(&expanded);
            if self.sheet.groups[id].variable_index(sym).is_some() {
                return Err(StxError::compile(
                    format!("group variable '${}' is already declared", variable.name),
                    &location,
                ));
            }
            let select = match &variable.select {
                Some(select) => Some(compile_expression(select, &self.sheet.namespaces, &location)?),
                None => None,
            };
            self.sheet.groups[id].variables.push(GroupVariable {
                name: sym,
                select,
                keep_value: variable.keep_value,
                param: variable.param,
                required: variable.required,
                location,
            });
        }

        for buffer in &def.buffers {
            let location = self.locate(&buffer.location);
            let expanded = resolve_name(&buffer.name, &self.sheet.namespaces, false, &location)?.expanded();
            let sym = self.sheet.interner.intern(&expanded);
            if self.sheet.groups[id].buffer_index(sym).is_some() {
                return Err(StxError::compile(
                    format!("buffer '{}' is already declared", buffer.name),
                    &location,
                ));
            }
            self.sheet.groups[id].buffers.push(sym);
        }

        for template in &def.templates {
            let location = self.locate(&template.location);
            let pattern = Pattern::compile(&template.pattern, &self.sheet.namespaces).map_err(|e| {
                StxError::compile(format!("invalid pattern '{}': {}", template.pattern, e), &location)
            })?;
            let entry = self.lowerer(id).body(&template.body, &location)?;
            let template_id = self.sheet.templates.len();
            self.sheet.templates.push(Template {
                group: id,
                entry,
                pattern: template.pattern.clone(),
                visibility: template.visibility,
                new_scope: template.new_scope,
                location,
            });
            for alternative in pattern.alternatives {
                let rule = Rule {
                    priority: template.priority.unwrap_or_else(|| alternative.default_priority()),
                    key: alternative.position_key(),
                    pattern: alternative,
                    template: template_id,
                    visibility: template.visibility,
                };
                if template.visibility == Visibility::Global {
                    self.sheet.global_rules.push(rule.clone());
                }
                self.sheet.groups[id].own_rules.push(rule);
            }
        }

        for procedure in &def.procedures {
            let location = self.locate(&procedure.location);
            let name = resolve_name(&procedure.name, &self.sheet.namespaces, false, &location)?.expanded();
            if self.sheet.groups[id].own_procedures.contains_key(&name) {
                return Err(StxError::compile(
                    format!("procedure '{}' is already declared in this group", procedure.name),
                    &location,
                ));
            }
            let entry = self.lowerer(id).body(&procedure.body, &location)?;
            let procedure_id = self.sheet.procedures.len();
            self.sheet.procedures.push(Procedure {
                name: name.clone(),
                group: id,
                entry,
                visibility: procedure.visibility,
                new_scope: procedure.new_scope,
                location: location.clone(),
            });
            if procedure.visibility == Visibility::Global
                && self.sheet.global_procedures.insert(name.clone(), procedure_id).is_some()
            {
                return Err(StxError::compile(
                    format!("global procedure '{}' is already declared", procedure.name),
                    &location,
                ));
            }
            self.sheet.groups[id].own_procedures.insert(name, procedure_id);
        }

        for child in &def.groups {
            self.group(child, Some(id), &config)?;
        }
        crate::group::sort_rules(&mut self.sheet.groups[id].own_rules);
        if id == 0 {
            crate::group::sort_rules(&mut self.sheet.global_rules);
        }
        self.pending.push(Pending::CompileGroup(id));
        Ok(id)
    }

    fn lowerer(&mut self, group: GroupId) -> Lowerer<'_> {
        Lowerer::new(
            &mut self.sheet.program,
            &mut self.sheet.interner,
            &self.sheet.namespaces,
            &self.result_namespaces,
            &mut self.pending,
            group,
            self.sheet.system_id.as_deref(),
        )
    }
}

/// Resolves a lexical QName against the sheet namespaces. Unprefixed names
/// take the default namespace only when `use_default` is set (element names).
pub(crate) fn resolve_name(
    name: &str,
    namespaces: &Namespaces,
    use_default: bool,
    location: &Location,
) -> Result<QualifiedName, StxError> {
    if !QualifiedName::is_valid(name) {
        return Err(StxError::compile(format!("'{}' is not a valid name", name), location));
    }
    match QualifiedName::split(name) {
        (Some(prefix), local) => match namespaces.get(prefix) {
            Some(uri) => Ok(QualifiedName::new(Some(prefix), local, uri.clone())),
            None => Err(StxError::compile(
                format!("undeclared namespace prefix '{}' in '{}'", prefix, name),
                location,
            )),
        },
        (None, local) => {
            let uri = if use_default {
                namespaces.get("").cloned().unwrap_or_default()
            } else {
                String::new()
            };
            Ok(QualifiedName::new(None, local, uri))
        }
    }
}

pub(crate) fn compile_expression(source: &str, namespaces: &Namespaces, location: &Location) -> Result<Expression, StxError> {
    Expression::compile(source, namespaces)
        .map_err(|e| StxError::compile(format!("invalid expression '{}': {}", source, e), location))
}
