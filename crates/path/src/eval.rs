//! The evaluator: runs an [`Expression`] against a streaming context.

use crate::ast::{Axis, BinaryOperator, Expression, NodeTest, PathExpr, PathStart, Step, UnaryOperator};
use crate::bind::Binder;
use crate::error::PathError;
use crate::functions;
use crate::parser;
use crate::Namespaces;
use sluice_types::{Event, EventKind, EventRef, ExpandedName, Item, NodeRef, Value};
use std::cmp::Ordering;
use std::rc::Rc;

/// Longest sequence a `to` range may produce.
const MAX_RANGE_LEN: u64 = 10_000_000;

/// Supplies variable values by expanded name.
pub trait VariableResolver {
    fn resolve_variable(&self, name: &ExpandedName) -> Option<Value>;
}

/// A resolver with no variables in scope.
pub struct NoVariables;

impl VariableResolver for NoVariables {
    fn resolve_variable(&self, _name: &ExpandedName) -> Option<Value> {
        None
    }
}

/// Everything an expression can see: the ancestor stack (context node on
/// top), the context position and the variables in scope.
pub struct EvalContext<'a> {
    pub stack: &'a [EventRef],
    pub position: u64,
    pub variables: &'a dyn VariableResolver,
}

impl<'a> EvalContext<'a> {
    pub fn new(stack: &'a [EventRef], position: u64, variables: &'a dyn VariableResolver) -> Self {
        Self {
            stack,
            position,
            variables,
        }
    }

    pub fn context_node(&self) -> Option<NodeRef> {
        self.stack
            .last()
            .map(|event| NodeRef::new(Rc::clone(event), self.stack.len() - 1))
    }

    fn on_stack(&self, node: &NodeRef) -> bool {
        self.stack
            .get(node.depth)
            .is_some_and(|event| Rc::ptr_eq(event, &node.event))
    }

    pub(crate) fn parent_of(&self, node: &NodeRef) -> Option<NodeRef> {
        let parent_depth = node.depth.checked_sub(1)?;
        let parent = self.stack.get(parent_depth)?;
        if self.on_stack(node) {
            return Some(NodeRef::new(Rc::clone(parent), parent_depth));
        }
        // Attribute nodes are synthesized off the stack; their owner is the
        // element one level up if it carries the same attribute.
        let owns_attribute = node.event.kind() == EventKind::Attribute
            && parent.attributes().iter().any(|a| {
                Some(&a.name) == node.event.name() && a.value == node.event.value()
            });
        owns_attribute.then(|| NodeRef::new(Rc::clone(parent), parent_depth))
    }

    /// Runs `f` with `node` as the context node.
    fn with_node<R>(&self, node: &NodeRef, position: u64, f: impl FnOnce(&EvalContext<'_>) -> R) -> R {
        if self.on_stack(node) {
            return f(&EvalContext::new(&self.stack[..=node.depth], position, self.variables));
        }
        let keep = node.depth.min(self.stack.len());
        let mut stack = self.stack[..keep].to_vec();
        stack.push(Rc::clone(&node.event));
        f(&EvalContext::new(&stack, position, self.variables))
    }
}

impl Expression {
    /// Parses `source` and binds its prefixes against `namespaces`.
    pub fn compile(source: &str, namespaces: &Namespaces) -> Result<Self, PathError> {
        let mut expr = parser::parse_expression(source)?;
        Binder::new(namespaces).expression(&mut expr)?;
        Ok(expr)
    }
}

/// Evaluates a compiled expression.
pub fn evaluate(expr: &Expression, ctx: &EvalContext<'_>) -> Result<Value, PathError> {
    match expr {
        Expression::Literal(s) => Ok(Value::from(s.as_str())),
        Expression::Number(n) => Ok(Value::from(*n)),
        Expression::Variable(name) => ctx
            .variables
            .resolve_variable(&name.expanded())
            .ok_or_else(|| PathError::UnknownVariable(name.qname())),
        Expression::ContextItem => Ok(ctx.context_node().map(Value::node).unwrap_or_default()),
        Expression::Path(path) => evaluate_path(path, ctx),
        Expression::Sequence(items) => {
            let mut result = Value::empty();
            for item in items {
                result.append(evaluate(item, ctx)?);
            }
            Ok(result)
        }
        Expression::Range(start, end) => {
            let start = evaluate(start, ctx)?;
            let end = evaluate(end, ctx)?;
            if start.is_empty() || end.is_empty() {
                return Ok(Value::empty());
            }
            let (from, to) = (start.to_number().round(), end.to_number().round());
            if from.is_nan() || to.is_nan() || from > to {
                return Ok(Value::empty());
            }
            if to - from >= MAX_RANGE_LEN as f64 {
                return Err(PathError::RangeTooLong { from, to });
            }
            let items = (from as i64..=to as i64).map(|n| Item::Number(n as f64)).collect();
            Ok(Value::from_items(items))
        }
        Expression::BinaryOp { left, op, right } => match op {
            BinaryOperator::Or => {
                Ok(Value::from(evaluate(left, ctx)?.to_boolean() || evaluate(right, ctx)?.to_boolean()))
            }
            BinaryOperator::And => {
                Ok(Value::from(evaluate(left, ctx)?.to_boolean() && evaluate(right, ctx)?.to_boolean()))
            }
            BinaryOperator::Equals
            | BinaryOperator::NotEquals
            | BinaryOperator::LessThan
            | BinaryOperator::LessThanOrEqual
            | BinaryOperator::GreaterThan
            | BinaryOperator::GreaterThanOrEqual => {
                let left = evaluate(left, ctx)?;
                let right = evaluate(right, ctx)?;
                Ok(Value::from(general_compare(*op, &left, &right)))
            }
            _ => {
                let left = evaluate(left, ctx)?;
                let right = evaluate(right, ctx)?;
                Ok(arithmetic(*op, &left, &right))
            }
        },
        Expression::UnaryOp { op: UnaryOperator::Minus, expr } => {
            let value = evaluate(expr, ctx)?;
            if value.is_empty() {
                return Ok(value);
            }
            Ok(Value::from(-value.to_number()))
        }
        Expression::FunctionCall { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, ctx)?);
            }
            functions::call(name, values, ctx)
        }
    }
}

fn evaluate_path(path: &PathExpr, ctx: &EvalContext<'_>) -> Result<Value, PathError> {
    let mut nodes: Vec<NodeRef> = match &path.start {
        PathStart::Root => ctx
            .stack
            .first()
            .map(|root| vec![NodeRef::new(Rc::clone(root), 0)])
            .unwrap_or_default(),
        PathStart::Context => ctx.context_node().into_iter().collect(),
        PathStart::Expr(expr) => {
            let value = evaluate(expr, ctx)?;
            value
                .into_items()
                .into_iter()
                .map(|item| match item {
                    Item::Node(node) => Ok(node),
                    other => Err(PathError::type_error(format!(
                        "path step applied to non-node '{}'",
                        other.string_value()
                    ))),
                })
                .collect::<Result<_, _>>()?
        }
    };

    for step in &path.steps {
        let mut next: Vec<NodeRef> = Vec::new();
        for node in &nodes {
            for candidate in apply_step(step, node, ctx)? {
                if !next.iter().any(|n| n.same_node(&candidate)) {
                    next.push(candidate);
                }
            }
        }
        nodes = next;
    }

    Ok(Value::from_items(nodes.into_iter().map(Item::Node).collect()))
}

fn apply_step(step: &Step, node: &NodeRef, ctx: &EvalContext<'_>) -> Result<Vec<NodeRef>, PathError> {
    let principal = if step.axis == Axis::Attribute {
        EventKind::Attribute
    } else {
        EventKind::Element
    };
    let candidates: Vec<NodeRef> = axis_nodes(step.axis, node, ctx)
        .into_iter()
        .filter(|candidate| test_node(&step.test, &candidate.event, principal))
        .collect();

    let mut selected = candidates;
    for predicate in &step.predicates {
        let mut kept = Vec::new();
        for (index, candidate) in selected.iter().enumerate() {
            let position = index as u64 + 1;
            let value = ctx.with_node(candidate, position, |inner| evaluate(predicate, inner))?;
            let holds = match value.items() {
                [Item::Number(n)] => *n == position as f64,
                _ => value.to_boolean(),
            };
            if holds {
                kept.push(candidate.clone());
            }
        }
        selected = kept;
    }

    // Reverse axes are collected nearest first; hand them back in document order.
    if matches!(step.axis, Axis::Ancestor | Axis::AncestorOrSelf) {
        selected.reverse();
    }
    Ok(selected)
}

fn axis_nodes(axis: Axis, node: &NodeRef, ctx: &EvalContext<'_>) -> Vec<NodeRef> {
    match axis {
        Axis::SelfAxis => vec![node.clone()],
        Axis::Parent => ctx.parent_of(node).into_iter().collect(),
        Axis::Ancestor | Axis::AncestorOrSelf => {
            let mut result = Vec::new();
            if axis == Axis::AncestorOrSelf {
                result.push(node.clone());
            }
            let mut current = ctx.parent_of(node);
            while let Some(parent) = current {
                current = ctx.parent_of(&parent);
                result.push(parent);
            }
            result
        }
        Axis::Attribute => {
            if node.event.kind() != EventKind::Element {
                return vec![];
            }
            node.event
                .attributes()
                .iter()
                .map(|attribute| {
                    NodeRef::new(
                        Event::attribute(attribute, Rc::clone(node.event.namespaces())),
                        node.depth + 1,
                    )
                })
                .collect()
        }
    }
}

/// Does `event` satisfy `test` on an axis whose principal node kind is `principal`?
pub(crate) fn test_node(test: &NodeTest, event: &EventRef, principal: EventKind) -> bool {
    let kind = event.kind();
    let name = event.name();
    match test {
        NodeTest::Name(expected) => kind == principal && name.is_some_and(|n| n.matches(expected)),
        NodeTest::NamespaceWildcard { uri, .. } => kind == principal && name.is_some_and(|n| &n.uri == uri),
        NodeTest::LocalWildcard(local) => kind == principal && name.is_some_and(|n| &n.local == local),
        NodeTest::Wildcard => kind == principal,
        NodeTest::Node => {
            if principal == EventKind::Attribute {
                kind == EventKind::Attribute
            } else {
                kind != EventKind::Attribute
            }
        }
        NodeTest::Text => matches!(kind, EventKind::Text | EventKind::Cdata),
        NodeTest::Cdata => kind == EventKind::Cdata,
        NodeTest::Comment => kind == EventKind::Comment,
        NodeTest::Pi(None) => kind == EventKind::Pi,
        NodeTest::Pi(Some(target)) => kind == EventKind::Pi && name.is_some_and(|n| &n.local == target),
    }
}

fn general_compare(op: BinaryOperator, left: &Value, right: &Value) -> bool {
    left.items()
        .iter()
        .any(|a| right.items().iter().any(|b| compare_items(op, a, b)))
}

fn compare_items(op: BinaryOperator, a: &Item, b: &Item) -> bool {
    match (a, b) {
        (Item::Boolean(_), _) | (_, Item::Boolean(_)) => {
            let x = Value::from(a.clone()).to_boolean();
            let y = Value::from(b.clone()).to_boolean();
            compare_ordering(op, Some(x.cmp(&y)))
        }
        (Item::Number(_), _) | (_, Item::Number(_)) => {
            compare_ordering(op, a.number_value().partial_cmp(&b.number_value()))
        }
        _ => {
            let (x, y) = (a.string_value(), b.string_value());
            match op {
                BinaryOperator::Equals => x == y,
                BinaryOperator::NotEquals => x != y,
                _ => {
                    let (nx, ny) = (a.number_value(), b.number_value());
                    if nx.is_nan() || ny.is_nan() {
                        compare_ordering(op, Some(x.cmp(&y)))
                    } else {
                        compare_ordering(op, nx.partial_cmp(&ny))
                    }
                }
            }
        }
    }
}

/// `None` stands for an unordered pair (NaN), which only satisfies `!=`.
fn compare_ordering(op: BinaryOperator, ordering: Option<Ordering>) -> bool {
    let Some(ordering) = ordering else {
        return op == BinaryOperator::NotEquals;
    };
    match op {
        BinaryOperator::Equals => ordering == Ordering::Equal,
        BinaryOperator::NotEquals => ordering != Ordering::Equal,
        BinaryOperator::LessThan => ordering == Ordering::Less,
        BinaryOperator::LessThanOrEqual => ordering != Ordering::Greater,
        BinaryOperator::GreaterThan => ordering == Ordering::Greater,
        BinaryOperator::GreaterThanOrEqual => ordering != Ordering::Less,
        _ => false,
    }
}

fn arithmetic(op: BinaryOperator, left: &Value, right: &Value) -> Value {
    if left.is_empty() || right.is_empty() {
        return Value::empty();
    }
    let (a, b) = (left.to_number(), right.to_number());
    let n = match op {
        BinaryOperator::Plus => a + b,
        BinaryOperator::Minus => a - b,
        BinaryOperator::Multiply => a * b,
        BinaryOperator::Divide => a / b,
        BinaryOperator::Modulo => a % b,
        _ => f64::NAN,
    };
    Value::from(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_types::{Attribute, EventBuilder, NamespaceScope, QualifiedName};
    use std::collections::HashMap;

    struct Vars(HashMap<String, Value>);

    impl VariableResolver for Vars {
        fn resolve_variable(&self, name: &ExpandedName) -> Option<Value> {
            self.0.get(&name.local).cloned()
        }
    }

    fn eval_on(stack: &[EventRef], src: &str) -> Value {
        let vars = Vars(HashMap::from([("x".to_string(), Value::from(4.0))]));
        let expr = Expression::compile(src, &Namespaces::new()).unwrap();
        evaluate(&expr, &EvalContext::new(stack, 1, &vars)).unwrap()
    }

    fn eval(src: &str) -> Value {
        eval_on(&[Event::root()], src)
    }

    fn doc_stack() -> Vec<EventRef> {
        let root = Event::root();
        let doc = EventBuilder::element(
            QualifiedName::local("doc"),
            vec![Attribute::new(QualifiedName::local("lang"), "en")],
            NamespaceScope::root(),
        )
        .build();
        let item = EventBuilder::element(
            QualifiedName::local("item"),
            vec![Attribute::new(QualifiedName::local("id"), "i1")],
            NamespaceScope::root(),
        )
        .value("hello")
        .build();
        vec![root, doc, item]
    }

    #[test]
    fn range_joins_with_separator() {
        assert_eq!(eval("1 to 3").to_string_joined(" "), "1 2 3");
        assert!(eval("3 to 1").is_empty());
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3").to_number(), 7.0);
        assert_eq!(eval("$x div 2 - 1").to_number(), 1.0);
        assert_eq!(eval("-$x mod 3").to_number(), -1.0);
        assert!(eval("() + 1").is_empty());
    }

    #[test]
    fn general_comparison_is_existential() {
        assert!(eval("(1, 2, 3) = 2").to_boolean());
        assert!(!eval("(1, 2) = 5").to_boolean());
        assert!(eval("'10' > 9").to_boolean());
        assert!(eval("'a' != 'b' and 'b' < 'c'").to_boolean());
    }

    #[test]
    fn attribute_and_ancestor_navigation() {
        let stack = doc_stack();
        assert_eq!(eval_on(&stack, "@id").to_string_value(), "i1");
        assert_eq!(eval_on(&stack, "../@lang").to_string_value(), "en");
        assert_eq!(eval_on(&stack, "string(.)").to_string_value(), "hello");
        assert_eq!(eval_on(&stack, "name(..)").to_string_value(), "doc");
        assert_eq!(eval_on(&stack, "count(ancestor::node())").to_number(), 2.0);
        assert_eq!(eval_on(&stack, "ancestor::doc/@lang").to_string_value(), "en");
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let expr = Expression::compile("$nope", &Namespaces::new()).unwrap();
        let err = evaluate(&expr, &EvalContext::new(&[], 1, &NoVariables)).unwrap_err();
        assert_eq!(err, PathError::UnknownVariable("nope".into()));
    }

    #[test]
    fn oversized_ranges_are_refused() {
        assert_eq!(eval("count(5 to 1004)").to_number(), 1000.0);
        for src in ["1 to 10000001", "1 to 100000000000000", "-1 div 0 to 1"] {
            let expr = Expression::compile(src, &Namespaces::new()).unwrap();
            let err = evaluate(&expr, &EvalContext::new(&[], 1, &NoVariables)).unwrap_err();
            assert!(matches!(err, PathError::RangeTooLong { .. }), "{}: {}", src, err);
        }
    }

    #[test]
    fn unknown_function_fails_at_compile_time() {
        assert!(matches!(
            Expression::compile("frobnicate(1)", &Namespaces::new()),
            Err(PathError::UnknownFunction { .. })
        ));
    }
}
