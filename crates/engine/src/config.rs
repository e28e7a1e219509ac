//! Processor, output and per-group configuration.

use crate::error::StxError;
use serde::{Deserialize, Serialize};

/// Which node kinds are copied to the output when no template matches them.
/// Unmatched elements always have their children processed; the flag only
/// decides whether the element itself is copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PassThroughRepr")]
pub struct PassThrough {
    pub elements: bool,
    pub text: bool,
    pub comments: bool,
    pub processing_instructions: bool,
    pub attributes: bool,
}

impl PassThrough {
    pub const NONE: Self = Self {
        elements: false,
        text: false,
        comments: false,
        processing_instructions: false,
        attributes: false,
    };

    pub const TEXT: Self = Self {
        text: true,
        ..Self::NONE
    };

    pub const ALL: Self = Self {
        elements: true,
        text: true,
        comments: true,
        processing_instructions: true,
        attributes: true,
    };

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::NONE),
            "text" => Some(Self::TEXT),
            "all" => Some(Self::ALL),
            _ => None,
        }
    }
}

impl Default for PassThrough {
    fn default() -> Self {
        Self::NONE
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PassThroughRepr {
    Preset(String),
    Flags {
        #[serde(default)]
        elements: bool,
        #[serde(default)]
        text: bool,
        #[serde(default)]
        comments: bool,
        #[serde(default)]
        processing_instructions: bool,
        #[serde(default)]
        attributes: bool,
    },
}

impl TryFrom<PassThroughRepr> for PassThrough {
    type Error = String;

    fn try_from(repr: PassThroughRepr) -> Result<Self, Self::Error> {
        match repr {
            PassThroughRepr::Preset(name) => {
                Self::preset(&name).ok_or_else(|| format!("unknown pass-through preset '{}'", name))
            }
            PassThroughRepr::Flags {
                elements,
                text,
                comments,
                processing_instructions,
                attributes,
            } => Ok(Self {
                elements,
                text,
                comments,
                processing_instructions,
                attributes,
            }),
        }
    }
}

/// Effective settings of a group after inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub pass_through: PassThrough,
    pub strip_space: bool,
    pub recognize_cdata: bool,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            pass_through: PassThrough::NONE,
            strip_space: false,
            recognize_cdata: true,
        }
    }
}

/// Settings a group declares; unset fields are inherited from the parent group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupOptions {
    pub pass_through: Option<PassThrough>,
    pub strip_space: Option<bool>,
    pub recognize_cdata: Option<bool>,
}

impl GroupOptions {
    pub fn resolve(&self, parent: &GroupConfig) -> GroupConfig {
        GroupConfig {
            pass_through: self.pass_through.unwrap_or(parent.pass_through),
            strip_space: self.strip_space.unwrap_or(parent.strip_space),
            recognize_cdata: self.recognize_cdata.unwrap_or(parent.recognize_cdata),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub indent: Option<usize>,
    pub omit_xml_declaration: bool,
    pub encoding: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            indent: None,
            omit_xml_declaration: false,
            encoding: "UTF-8".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Escalate recoverable errors instead of logging them.
    pub strict: bool,
    pub output: OutputConfig,
    /// Base for resolving relative `process-document` references.
    pub base_uri: Option<String>,
}

impl ProcessorConfig {
    pub fn from_json(json: &str) -> Result<Self, StxError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_and_flags_deserialize() {
        let pt: PassThrough = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(pt, PassThrough::ALL);
        let pt: PassThrough = serde_json::from_str(r#"{"text": true, "comments": true}"#).unwrap();
        assert!(pt.text && pt.comments && !pt.elements);
        assert!(serde_json::from_str::<PassThrough>("\"most\"").is_err());
    }

    #[test]
    fn processor_config_from_json() {
        let config = ProcessorConfig::from_json(r#"{"strict": true, "output": {"indent": 2}}"#).unwrap();
        assert!(config.strict);
        assert_eq!(config.output.indent, Some(2));
        assert_eq!(config.output.encoding, "UTF-8");
        assert!(ProcessorConfig::from_json("{").is_err());
    }

    #[test]
    fn group_options_inherit() {
        let parent = GroupConfig {
            pass_through: PassThrough::ALL,
            strip_space: true,
            recognize_cdata: true,
        };
        let child = GroupOptions {
            recognize_cdata: Some(false),
            ..GroupOptions::default()
        }
        .resolve(&parent);
        assert_eq!(child.pass_through, PassThrough::ALL);
        assert!(child.strip_space);
        assert!(!child.recognize_cdata);
    }
}
