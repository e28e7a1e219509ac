//! Abstract syntax of the expression language.

use sluice_types::QualifiedName;

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(String),
    Number(f64),
    /// `$name`, with the URI filled in at bind time.
    Variable(QualifiedName),
    /// `.`
    ContextItem,
    Path(PathExpr),
    /// `(a, b, ...)`; `()` is the empty sequence.
    Sequence(Vec<Expression>),
    /// `a to b`
    Range(Box<Expression>, Box<Expression>),
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
    FunctionCall {
        name: String,
        args: Vec<Expression>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Or,
    And,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Minus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathStart {
    /// `/...`
    Root,
    /// A relative path starting at the context node.
    Context,
    /// `$nodes/...` or `f()/...`
    Expr(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    pub start: PathStart,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    SelfAxis,
    Parent,
    Ancestor,
    AncestorOrSelf,
    Attribute,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeTest {
    /// An exact name of the axis' principal node kind.
    Name(QualifiedName),
    /// `p:*`
    NamespaceWildcard { prefix: String, uri: String },
    /// `*:local`
    LocalWildcard(String),
    /// `*`
    Wildcard,
    /// `node()`
    Node,
    /// `text()`
    Text,
    /// `cdata()`
    Cdata,
    /// `comment()`
    Comment,
    /// `processing-instruction()` or `processing-instruction('target')`
    Pi(Option<String>),
}
