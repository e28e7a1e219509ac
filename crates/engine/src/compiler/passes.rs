//! Cross-reference resolution after all groups are lowered.
//!
//! Each pass tries every pending item once. Items that depend on something
//! not yet available (a group whose children are not compiled, a procedure
//! in a group whose visible set is not known) wait for the next pass. A pass
//! that settles nothing ends compilation with an error naming every item
//! left.

use crate::def::Visibility;
use crate::error::StxError;
use crate::group::{GroupId, sort_rules};
use crate::instr::{Instr, InstrId};
use crate::sheet::Sheet;
use sluice_types::{ExpandedName, Location};

#[derive(Debug)]
pub(crate) enum Pending {
    /// Compute visible templates and procedures once the children are done.
    CompileGroup(GroupId),
    ResolveGroup {
        instr: InstrId,
        name: ExpandedName,
        location: Location,
    },
    ResolveProcedure {
        instr: InstrId,
        name: ExpandedName,
        from: GroupId,
        location: Location,
    },
}

pub(super) fn run(sheet: &mut Sheet, mut pending: Vec<Pending>) -> Result<(), StxError> {
    let mut pass = 1;
    while !pending.is_empty() {
        let before = pending.len();
        let mut waiting = Vec::new();
        for item in pending {
            if !resolve(sheet, &item) {
                waiting.push(item);
            }
        }
        log::trace!("compile pass {}: {} of {} items resolved", pass, before - waiting.len(), before);
        if waiting.len() == before {
            return Err(unresolved(sheet, &waiting));
        }
        pending = waiting;
        pass += 1;
    }
    Ok(())
}

fn resolve(sheet: &mut Sheet, item: &Pending) -> bool {
    match item {
        Pending::CompileGroup(id) => compile_group(sheet, *id),
        Pending::ResolveGroup { instr, name, .. } => match sheet.group_names.get(name).copied() {
            Some(group) => {
                if let Some(spec) = sheet.program[*instr].instr.spec_mut() {
                    spec.group = Some(group);
                }
                true
            }
            None => false,
        },
        Pending::ResolveProcedure { instr, name, from, .. } => {
            let target = match &sheet.program[*instr].instr {
                Instr::CallProcedure { spec, .. } => match (&spec.group_name, spec.group) {
                    (Some(_), None) => return false,
                    (_, group) => group.unwrap_or(*from),
                },
                _ => return true,
            };
            if !sheet.groups[target].compiled {
                return false;
            }
            let found = sheet.groups[target]
                .procedures
                .get(name)
                .or_else(|| sheet.global_procedures.get(name))
                .copied();
            match found {
                Some(id) => {
                    if let Instr::CallProcedure { procedure, .. } = &mut sheet.program[*instr].instr {
                        *procedure = Some(id);
                    }
                    true
                }
                None => false,
            }
        }
    }
}

/// Builds the visible and exported template and procedure sets of a group
/// from its own declarations and the exports of its children.
fn compile_group(sheet: &mut Sheet, id: GroupId) -> bool {
    let children = sheet.groups[id].children.clone();
    if children.iter().any(|c| !sheet.groups[*c].compiled) {
        return false;
    }
    let group = &sheet.groups[id];
    let mut visible = group.own_rules.clone();
    let mut exported: Vec<_> = group
        .own_rules
        .iter()
        .filter(|r| r.visibility != Visibility::Private)
        .cloned()
        .collect();
    let mut procedures = std::collections::HashMap::new();
    let mut exported_procedures = std::collections::HashMap::new();
    for child in &children {
        let child = &sheet.groups[*child];
        visible.extend(child.exported_rules.iter().cloned());
        exported.extend(child.exported_rules.iter().cloned());
        for (name, proc_id) in &child.exported_procedures {
            procedures.entry(name.clone()).or_insert(*proc_id);
            exported_procedures.entry(name.clone()).or_insert(*proc_id);
        }
    }
    for (name, proc_id) in &group.own_procedures {
        procedures.insert(name.clone(), *proc_id);
        if sheet.procedures[*proc_id].visibility != Visibility::Private {
            exported_procedures.insert(name.clone(), *proc_id);
        }
    }
    sort_rules(&mut visible);
    sort_rules(&mut exported);

    let group = &mut sheet.groups[id];
    group.visible_rules = visible;
    group.exported_rules = exported;
    group.procedures = procedures;
    group.exported_procedures = exported_procedures;
    group.compiled = true;
    true
}

fn unresolved(sheet: &Sheet, waiting: &[Pending]) -> StxError {
    let mut first = None;
    let messages: Vec<String> = waiting
        .iter()
        .map(|item| {
            let (message, location) = match item {
                Pending::CompileGroup(id) => {
                    let group = &sheet.groups[*id];
                    let name = group.name.as_ref().map(ToString::to_string).unwrap_or_default();
                    (format!("group '{}' could not be compiled", name), group.location.clone())
                }
                Pending::ResolveGroup { name, location, .. } => {
                    (format!("unknown group '{}'", name), location.clone())
                }
                Pending::ResolveProcedure { name, location, .. } => {
                    (format!("unknown procedure '{}'", name), location.clone())
                }
            };
            let text = format!("{} ({})", message, location);
            first.get_or_insert(location);
            text
        })
        .collect();
    StxError::compile(messages.join("; "), &first.unwrap_or_default())
}
