use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathError {
    #[error("parse error in '{expr}': {message}")]
    Parse { expr: String, message: String },

    #[error("undeclared namespace prefix '{0}'")]
    UnknownPrefix(String),

    #[error("unknown function '{name}' with {arity} argument(s)")]
    UnknownFunction { name: String, arity: usize },

    #[error("variable '${0}' is not declared")]
    UnknownVariable(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("range {from} to {to} is too long")]
    RangeTooLong { from: f64, to: f64 },

    #[error("function '{function}': {message}")]
    Function { function: String, message: String },
}

impl PathError {
    pub fn parse(expr: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            expr: expr.to_string(),
            message: message.into(),
        }
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::Type(msg.into())
    }

    pub fn function(function: &str, message: impl Into<String>) -> Self {
        Self::Function {
            function: function.to_string(),
            message: message.into(),
        }
    }
}
