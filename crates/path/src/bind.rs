//! Resolves namespace prefixes and checks function calls once, right after parsing.

use crate::ast::{Expression, NodeTest, PathStart, Step};
use crate::error::PathError;
use crate::functions;
use crate::pattern::PathPattern;
use crate::Namespaces;
use sluice_types::{QualifiedName, XML_NAMESPACE};

pub(crate) struct Binder<'a> {
    namespaces: &'a Namespaces,
}

impl<'a> Binder<'a> {
    pub(crate) fn new(namespaces: &'a Namespaces) -> Self {
        Self { namespaces }
    }

    fn uri(&self, prefix: &str) -> Result<String, PathError> {
        if prefix == "xml" {
            return Ok(XML_NAMESPACE.to_string());
        }
        self.namespaces
            .get(prefix)
            .cloned()
            .ok_or_else(|| PathError::UnknownPrefix(prefix.to_string()))
    }

    /// Unprefixed names are in no namespace.
    fn name(&self, name: &mut QualifiedName) -> Result<(), PathError> {
        name.uri = match &name.prefix {
            Some(prefix) => self.uri(prefix)?,
            None => String::new(),
        };
        Ok(())
    }

    pub(crate) fn node_test(&self, test: &mut NodeTest) -> Result<(), PathError> {
        match test {
            NodeTest::Name(name) => self.name(name),
            NodeTest::NamespaceWildcard { prefix, uri } => {
                *uri = self.uri(prefix)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn step(&self, step: &mut Step) -> Result<(), PathError> {
        self.node_test(&mut step.test)?;
        step.predicates.iter_mut().try_for_each(|p| self.expression(p))
    }

    pub(crate) fn expression(&self, expr: &mut Expression) -> Result<(), PathError> {
        match expr {
            Expression::Literal(_) | Expression::Number(_) | Expression::ContextItem => Ok(()),
            Expression::Variable(name) => self.name(name),
            Expression::Path(path) => {
                if let PathStart::Expr(start) = &mut path.start {
                    self.expression(start)?;
                }
                path.steps.iter_mut().try_for_each(|s| self.step(s))
            }
            Expression::Sequence(items) => items.iter_mut().try_for_each(|e| self.expression(e)),
            Expression::Range(start, end) => {
                self.expression(start)?;
                self.expression(end)
            }
            Expression::BinaryOp { left, right, .. } => {
                self.expression(left)?;
                self.expression(right)
            }
            Expression::UnaryOp { expr, .. } => self.expression(expr),
            Expression::FunctionCall { name, args } => {
                if !functions::is_known(name, args.len()) {
                    return Err(PathError::UnknownFunction {
                        name: name.clone(),
                        arity: args.len(),
                    });
                }
                args.iter_mut().try_for_each(|a| self.expression(a))
            }
        }
    }

    pub(crate) fn pattern(&self, pattern: &mut PathPattern) -> Result<(), PathError> {
        for step in &mut pattern.steps {
            self.node_test(&mut step.test)?;
            step.predicates.iter_mut().try_for_each(|p| self.expression(p))?;
        }
        Ok(())
    }
}
