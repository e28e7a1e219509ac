//! Match patterns for templates and for `while`/`until` tests.
//!
//! A pattern is matched against the event stack with the candidate node on
//! top. Steps are checked right to left, walking up the ancestors; predicates
//! see the step's node as context and its position among the siblings that
//! satisfy the same node test.

use crate::ast::{Expression, NodeTest};
use crate::bind::Binder;
use crate::error::PathError;
use crate::eval::{self, EvalContext, VariableResolver};
use crate::parser;
use crate::Namespaces;
use sluice_types::{EventKind, EventRef, Item, PositionKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternStep {
    /// The separator in front of this step. Only meaningful for the first
    /// step when the pattern is absolute.
    pub separator: Separator,
    pub attribute: bool,
    pub test: NodeTest,
    pub predicates: Vec<Expression>,
}

impl PatternStep {
    pub fn position_key(&self) -> PositionKey {
        if self.attribute {
            return match &self.test {
                NodeTest::Name(name) => PositionKey::Attribute(name.uri.clone(), name.local.clone()),
                NodeTest::NamespaceWildcard { uri, .. } => PositionKey::AttributeNs(uri.clone()),
                _ => PositionKey::AnyAttribute,
            };
        }
        match &self.test {
            NodeTest::Name(name) => PositionKey::Element(name.uri.clone(), name.local.clone()),
            NodeTest::NamespaceWildcard { uri, .. } => PositionKey::ElementNs(uri.clone()),
            NodeTest::LocalWildcard(local) => PositionKey::ElementLocal(local.clone()),
            NodeTest::Wildcard => PositionKey::AnyElement,
            NodeTest::Node => PositionKey::Node,
            NodeTest::Text => PositionKey::Text,
            NodeTest::Cdata => PositionKey::Cdata,
            NodeTest::Comment => PositionKey::Comment,
            NodeTest::Pi(None) => PositionKey::Pi,
            NodeTest::Pi(Some(target)) => PositionKey::PiTarget(target.clone()),
        }
    }

    fn accepts(&self, event: &EventRef) -> bool {
        let principal = if self.attribute {
            EventKind::Attribute
        } else {
            EventKind::Element
        };
        if event.kind() == EventKind::Root || self.attribute != (event.kind() == EventKind::Attribute) {
            return false;
        }
        eval::test_node(&self.test, event, principal)
    }
}

/// One alternative of a union pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    pub absolute: bool,
    pub steps: Vec<PatternStep>,
}

impl PathPattern {
    /// Priority used when a template does not declare one.
    pub fn default_priority(&self) -> f64 {
        let [step] = self.steps.as_slice() else {
            return 0.5;
        };
        if self.absolute || !step.predicates.is_empty() {
            return 0.5;
        }
        match &step.test {
            NodeTest::Name(_) | NodeTest::Pi(Some(_)) => 0.0,
            NodeTest::NamespaceWildcard { .. } | NodeTest::LocalWildcard(_) => -0.25,
            _ => -0.5,
        }
    }

    /// The counter key that yields `position()` for a node matched by this alternative.
    pub fn position_key(&self) -> PositionKey {
        self.steps
            .last()
            .map(PatternStep::position_key)
            .unwrap_or(PositionKey::Node)
    }

    /// Tests the node on top of `stack`.
    pub fn matches(&self, stack: &[EventRef], variables: &dyn VariableResolver) -> Result<bool, PathError> {
        let Some(top) = stack.len().checked_sub(1) else {
            return Ok(false);
        };
        if self.steps.is_empty() {
            return Ok(self.absolute && stack[top].kind() == EventKind::Root);
        }
        self.match_at(self.steps.len() - 1, top, stack, variables)
    }

    fn match_at(
        &self,
        step_index: usize,
        index: usize,
        stack: &[EventRef],
        variables: &dyn VariableResolver,
    ) -> Result<bool, PathError> {
        let step = &self.steps[step_index];
        let node = &stack[index];
        if !step.accepts(node) || !self.predicates_hold(step, index, stack, variables)? {
            return Ok(false);
        }

        if step_index == 0 {
            if !self.absolute {
                return Ok(true);
            }
            return Ok(match step.separator {
                Separator::Child => index == 1,
                Separator::Descendant => index >= 1,
            });
        }

        match step.separator {
            Separator::Child => match index.checked_sub(1) {
                Some(parent) => self.match_at(step_index - 1, parent, stack, variables),
                None => Ok(false),
            },
            Separator::Descendant => {
                for ancestor in (0..index).rev() {
                    if self.match_at(step_index - 1, ancestor, stack, variables)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn predicates_hold(
        &self,
        step: &PatternStep,
        index: usize,
        stack: &[EventRef],
        variables: &dyn VariableResolver,
    ) -> Result<bool, PathError> {
        if step.predicates.is_empty() {
            return Ok(true);
        }
        let position = match index.checked_sub(1) {
            Some(parent) => stack[parent].position(&step.position_key()),
            None => 1,
        };
        let ctx = EvalContext::new(&stack[..=index], position, variables);
        for predicate in &step.predicates {
            let value = eval::evaluate(predicate, &ctx)?;
            let holds = match value.items() {
                [Item::Number(n)] => *n == position as f64,
                _ => value.to_boolean(),
            };
            if !holds {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// A union of path patterns.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub source: String,
    pub alternatives: Vec<PathPattern>,
}

impl Pattern {
    pub fn compile(source: &str, namespaces: &Namespaces) -> Result<Self, PathError> {
        let mut alternatives = parser::parse_pattern(source)?;
        let binder = Binder::new(namespaces);
        for alternative in &mut alternatives {
            binder.pattern(alternative)?;
        }
        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    pub fn matches(&self, stack: &[EventRef], variables: &dyn VariableResolver) -> Result<bool, PathError> {
        for alternative in &self.alternatives {
            if alternative.matches(stack, variables)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
