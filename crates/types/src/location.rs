use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a construct in the transformation sheet (or of an input node).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub system_id: Option<String>,
    pub public_id: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Self {
            line,
            column,
            ..Self::default()
        }
    }

    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.line == 0 && self.system_id.is_none()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(public_id) = &self.public_id {
            write!(f, "{} ", public_id)?;
        }
        match &self.system_id {
            Some(system_id) => write!(f, "{}:{}:{}", system_id, self.line, self.column),
            None => write!(f, "line {}, column {}", self.line, self.column),
        }
    }
}
