//! Expressions, match patterns and attribute value templates evaluated
//! against a streaming context.
//!
//! Only the ancestors of the current node are available while a document
//! streams past, so the path language here navigates upwards (`..`,
//! `ancestor::`), sideways into attributes (`@x`) and never into children.
//! Everything else is the usual expression toolkit: literals, variables,
//! sequences and ranges, arithmetic, comparisons and a function library.
//!
//! Parsing and prefix binding happen together in the `compile` constructors,
//! so a compiled [`Expression`], [`Pattern`] or [`Avt`] carries namespace URIs
//! instead of prefixes and is immutable from then on.

pub mod ast;
pub mod avt;
mod bind;
pub mod error;
pub mod eval;
mod functions;
mod parser;
pub mod pattern;

pub use ast::{Axis, BinaryOperator, Expression, NodeTest, PathExpr, PathStart, Step, UnaryOperator};
pub use avt::{Avt, AvtPart};
pub use error::PathError;
pub use eval::{EvalContext, NoVariables, VariableResolver, evaluate};
pub use pattern::{PathPattern, Pattern, PatternStep, Separator};

use std::collections::HashMap;

/// Prefix to namespace URI bindings in effect where an expression is written.
pub type Namespaces = HashMap<String, String>;
