//! Typed definitions of a transformation sheet.
//!
//! A front-end (the XML sheet reader, a JSON document, or code) describes the
//! sheet with these and hands the result to [`crate::compiler::compile`].
//! Names are written as lexical QNames and expressions as source text; both
//! are resolved against the sheet namespaces when the sheet is compiled.

use crate::config::{GroupOptions, OutputConfig, PassThrough};
use crate::error::StxError;
use serde::{Deserialize, Serialize};
use sluice_types::Location;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformDef {
    /// Prefix bindings available to every name, expression and pattern.
    pub namespaces: Vec<(String, String)>,
    /// Prefixes whose declarations literal result elements do not copy.
    pub exclude_result_prefixes: Vec<String>,
    pub output: Option<OutputConfig>,
    pub system_id: Option<String>,
    pub group: GroupDef,
}

impl TransformDef {
    pub fn new(group: GroupDef) -> Self {
        Self {
            group,
            ..Self::default()
        }
    }

    pub fn namespace(mut self, prefix: &str, uri: &str) -> Self {
        self.namespaces.push((prefix.to_string(), uri.to_string()));
        self
    }

    pub fn exclude_prefix(mut self, prefix: &str) -> Self {
        self.exclude_result_prefixes.push(prefix.to_string());
        self
    }

    pub fn from_json(json: &str) -> Result<Self, StxError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupDef {
    pub name: Option<String>,
    pub options: GroupOptions,
    pub variables: Vec<VariableDef>,
    pub buffers: Vec<BufferDef>,
    pub templates: Vec<TemplateDef>,
    pub procedures: Vec<ProcedureDef>,
    pub groups: Vec<GroupDef>,
    pub location: Location,
}

impl GroupDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn pass_through(mut self, pass_through: PassThrough) -> Self {
        self.options.pass_through = Some(pass_through);
        self
    }

    pub fn strip_space(mut self, strip: bool) -> Self {
        self.options.strip_space = Some(strip);
        self
    }

    pub fn recognize_cdata(mut self, recognize: bool) -> Self {
        self.options.recognize_cdata = Some(recognize);
        self
    }

    pub fn variable(mut self, variable: VariableDef) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn buffer(mut self, name: &str) -> Self {
        self.buffers.push(BufferDef {
            name: name.to_string(),
            location: Location::default(),
        });
        self
    }

    pub fn template(mut self, template: TemplateDef) -> Self {
        self.templates.push(template);
        self
    }

    pub fn procedure(mut self, procedure: ProcedureDef) -> Self {
        self.procedures.push(procedure);
        self
    }

    pub fn group(mut self, group: GroupDef) -> Self {
        self.groups.push(group);
        self
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.location = Location::new(line, column);
        self
    }
}

/// A group variable or group parameter. Its initial value comes from
/// `select` (empty sequence if absent).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableDef {
    pub name: String,
    pub select: Option<String>,
    /// On entering a new scope, start from the current value instead of
    /// re-evaluating `select`.
    pub keep_value: bool,
    /// A parameter that can be set from outside the transformation.
    pub param: bool,
    pub required: bool,
    pub location: Location,
}

impl VariableDef {
    pub fn new(name: &str, select: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            select: select.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn param(name: &str, select: Option<&str>) -> Self {
        Self {
            param: true,
            ..Self::new(name, select)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn keep_value(mut self) -> Self {
        self.keep_value = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferDef {
    pub name: String,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    /// Visible in the declaring group only.
    #[default]
    Private,
    /// Also visible in the parent group.
    Public,
    /// Visible everywhere.
    Global,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateDef {
    pub pattern: String,
    pub priority: Option<f64>,
    pub visibility: Visibility,
    pub new_scope: bool,
    pub body: Vec<Construct>,
    pub location: Location,
}

impl TemplateDef {
    pub fn new(pattern: &str, body: Vec<Construct>) -> Self {
        Self {
            pattern: pattern.to_string(),
            body,
            ..Self::default()
        }
    }

    pub fn priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn public(mut self) -> Self {
        self.visibility = Visibility::Public;
        self
    }

    pub fn global(mut self) -> Self {
        self.visibility = Visibility::Global;
        self
    }

    pub fn new_scope(mut self) -> Self {
        self.new_scope = true;
        self
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.location = Location::new(line, column);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcedureDef {
    pub name: String,
    pub visibility: Visibility,
    pub new_scope: bool,
    pub body: Vec<Construct>,
    pub location: Location,
}

impl ProcedureDef {
    pub fn new(name: &str, body: Vec<Construct>) -> Self {
        Self {
            name: name.to_string(),
            body,
            ..Self::default()
        }
    }

    pub fn public(mut self) -> Self {
        self.visibility = Visibility::Public;
        self
    }

    pub fn global(mut self) -> Self {
        self.visibility = Visibility::Global;
        self
    }
}

/// Options shared by the `process-*` instructions and `call-procedure`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessDef {
    /// Name of the group whose templates are used instead of the current one.
    pub group: Option<String>,
    /// Hands the selected content to an external transformation instead.
    pub filter: Option<FilterDef>,
    pub params: Vec<WithParamDef>,
}

impl ProcessDef {
    pub fn group(name: &str) -> Self {
        Self {
            group: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn with_param(mut self, name: &str, select: &str) -> Self {
        self.params.push(WithParamDef {
            name: name.to_string(),
            select: Some(select.to_string()),
            ..WithParamDef::default()
        });
        self
    }

    pub fn filter(method: &str, src: Option<&str>) -> Self {
        Self {
            filter: Some(FilterDef {
                method: method.to_string(),
                src: src.map(str::to_string),
            }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterDef {
    /// URI identifying the kind of external transformation.
    pub method: String,
    /// Expression giving the source (for example a sheet name) of the filter.
    pub src: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WithParamDef {
    pub name: String,
    pub select: Option<String>,
    pub body: Vec<Construct>,
    pub location: Location,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhenDef {
    pub test: String,
    pub body: Vec<Construct>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Construct {
    #[serde(flatten)]
    pub kind: Kind,
    #[serde(default)]
    pub location: Location,
}

/// The constructs a template or procedure body is made of. Fields holding
/// names and `name`/`namespace`/`href` of computed constructs are attribute
/// value templates; `select` and `test` are expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Kind {
    Text {
        text: String,
    },
    Cdata {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        body: Vec<Construct>,
    },
    ValueOf {
        select: String,
        #[serde(default)]
        separator: Option<String>,
    },
    /// A literal result element. `name` is a lexical QName and attribute
    /// values are value templates.
    Element {
        name: String,
        #[serde(default)]
        attributes: Vec<(String, String)>,
        #[serde(default)]
        body: Vec<Construct>,
    },
    DynamicElement {
        name: String,
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default)]
        body: Vec<Construct>,
    },
    StartElement {
        name: String,
        #[serde(default)]
        namespace: Option<String>,
    },
    EndElement {
        name: String,
        #[serde(default)]
        namespace: Option<String>,
    },
    Attribute {
        name: String,
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default)]
        select: Option<String>,
        #[serde(default)]
        body: Vec<Construct>,
    },
    Comment {
        #[serde(default)]
        select: Option<String>,
        #[serde(default)]
        body: Vec<Construct>,
    },
    ProcessingInstruction {
        name: String,
        #[serde(default)]
        select: Option<String>,
        #[serde(default)]
        body: Vec<Construct>,
    },
    /// Shallow copy of the current node; `attributes` is a pattern selecting
    /// which attributes of a copied element are kept.
    Copy {
        #[serde(default)]
        attributes: Option<String>,
        #[serde(default)]
        body: Vec<Construct>,
    },
    Message {
        #[serde(default)]
        select: Option<String>,
        #[serde(default)]
        body: Vec<Construct>,
    },
    Variable {
        name: String,
        #[serde(default)]
        select: Option<String>,
        #[serde(default)]
        body: Vec<Construct>,
    },
    Param {
        name: String,
        #[serde(default)]
        select: Option<String>,
        #[serde(default)]
        required: bool,
        #[serde(default)]
        body: Vec<Construct>,
    },
    Assign {
        name: String,
        #[serde(default)]
        select: Option<String>,
        #[serde(default)]
        body: Vec<Construct>,
    },
    /// Declares a local buffer and fills it with the body's output.
    Buffer {
        name: String,
        #[serde(default)]
        body: Vec<Construct>,
    },
    /// Appends the body's output to a declared buffer.
    ResultBuffer {
        name: String,
        #[serde(default)]
        clear: bool,
        #[serde(default)]
        body: Vec<Construct>,
    },
    ResultDocument {
        href: String,
        #[serde(default)]
        body: Vec<Construct>,
    },
    If {
        test: String,
        #[serde(default)]
        body: Vec<Construct>,
    },
    Choose {
        whens: Vec<WhenDef>,
        #[serde(default)]
        otherwise: Option<Vec<Construct>>,
    },
    ForEachItem {
        name: String,
        select: String,
        #[serde(default)]
        body: Vec<Construct>,
    },
    While {
        test: String,
        #[serde(default)]
        body: Vec<Construct>,
    },
    ProcessChildren {
        #[serde(default)]
        process: ProcessDef,
    },
    ProcessSelf {
        #[serde(default)]
        process: ProcessDef,
    },
    ProcessAttributes {
        #[serde(default)]
        process: ProcessDef,
    },
    ProcessSiblings {
        #[serde(default, rename = "while")]
        while_pattern: Option<String>,
        #[serde(default)]
        until: Option<String>,
        #[serde(default)]
        process: ProcessDef,
    },
    ProcessBuffer {
        name: String,
        #[serde(default)]
        process: ProcessDef,
    },
    ProcessDocument {
        href: String,
        #[serde(default)]
        base: Option<String>,
        #[serde(default)]
        process: ProcessDef,
    },
    CallProcedure {
        name: String,
        #[serde(default)]
        process: ProcessDef,
    },
}

impl Construct {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            location: Location::default(),
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.location = Location::new(line, column);
        self
    }

    pub fn text(text: &str) -> Self {
        Self::new(Kind::Text { text: text.to_string() })
    }

    pub fn value_of(select: &str) -> Self {
        Self::new(Kind::ValueOf {
            select: select.to_string(),
            separator: None,
        })
    }

    pub fn value_of_sep(select: &str, separator: &str) -> Self {
        Self::new(Kind::ValueOf {
            select: select.to_string(),
            separator: Some(separator.to_string()),
        })
    }

    pub fn element(name: &str, attributes: &[(&str, &str)], body: Vec<Construct>) -> Self {
        Self::new(Kind::Element {
            name: name.to_string(),
            attributes: attributes
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body,
        })
    }

    pub fn dynamic_element(name: &str, namespace: Option<&str>, body: Vec<Construct>) -> Self {
        Self::new(Kind::DynamicElement {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            body,
        })
    }

    pub fn attribute(name: &str, select: &str) -> Self {
        Self::new(Kind::Attribute {
            name: name.to_string(),
            namespace: None,
            select: Some(select.to_string()),
            body: Vec::new(),
        })
    }

    pub fn attribute_body(name: &str, body: Vec<Construct>) -> Self {
        Self::new(Kind::Attribute {
            name: name.to_string(),
            namespace: None,
            select: None,
            body,
        })
    }

    pub fn comment(body: Vec<Construct>) -> Self {
        Self::new(Kind::Comment { select: None, body })
    }

    pub fn copy(body: Vec<Construct>) -> Self {
        Self::new(Kind::Copy { attributes: None, body })
    }

    pub fn copy_with_attributes(attributes: &str, body: Vec<Construct>) -> Self {
        Self::new(Kind::Copy {
            attributes: Some(attributes.to_string()),
            body,
        })
    }

    pub fn message(select: &str) -> Self {
        Self::new(Kind::Message {
            select: Some(select.to_string()),
            body: Vec::new(),
        })
    }

    pub fn variable(name: &str, select: &str) -> Self {
        Self::new(Kind::Variable {
            name: name.to_string(),
            select: Some(select.to_string()),
            body: Vec::new(),
        })
    }

    pub fn param(name: &str, select: Option<&str>) -> Self {
        Self::new(Kind::Param {
            name: name.to_string(),
            select: select.map(str::to_string),
            required: false,
            body: Vec::new(),
        })
    }

    pub fn assign(name: &str, select: &str) -> Self {
        Self::new(Kind::Assign {
            name: name.to_string(),
            select: Some(select.to_string()),
            body: Vec::new(),
        })
    }

    pub fn result_buffer(name: &str, clear: bool, body: Vec<Construct>) -> Self {
        Self::new(Kind::ResultBuffer {
            name: name.to_string(),
            clear,
            body,
        })
    }

    pub fn result_document(href: &str, body: Vec<Construct>) -> Self {
        Self::new(Kind::ResultDocument {
            href: href.to_string(),
            body,
        })
    }

    pub fn if_(test: &str, body: Vec<Construct>) -> Self {
        Self::new(Kind::If {
            test: test.to_string(),
            body,
        })
    }

    pub fn choose(whens: Vec<(&str, Vec<Construct>)>, otherwise: Option<Vec<Construct>>) -> Self {
        Self::new(Kind::Choose {
            whens: whens
                .into_iter()
                .map(|(test, body)| WhenDef {
                    test: test.to_string(),
                    body,
                    location: Location::default(),
                })
                .collect(),
            otherwise,
        })
    }

    pub fn for_each(name: &str, select: &str, body: Vec<Construct>) -> Self {
        Self::new(Kind::ForEachItem {
            name: name.to_string(),
            select: select.to_string(),
            body,
        })
    }

    pub fn while_(test: &str, body: Vec<Construct>) -> Self {
        Self::new(Kind::While {
            test: test.to_string(),
            body,
        })
    }

    pub fn process_children() -> Self {
        Self::new(Kind::ProcessChildren {
            process: ProcessDef::default(),
        })
    }

    pub fn process_children_with(process: ProcessDef) -> Self {
        Self::new(Kind::ProcessChildren { process })
    }

    pub fn process_self() -> Self {
        Self::new(Kind::ProcessSelf {
            process: ProcessDef::default(),
        })
    }

    pub fn process_attributes() -> Self {
        Self::new(Kind::ProcessAttributes {
            process: ProcessDef::default(),
        })
    }

    pub fn process_siblings_while(pattern: &str) -> Self {
        Self::new(Kind::ProcessSiblings {
            while_pattern: Some(pattern.to_string()),
            until: None,
            process: ProcessDef::default(),
        })
    }

    pub fn process_siblings_until(pattern: &str) -> Self {
        Self::new(Kind::ProcessSiblings {
            while_pattern: None,
            until: Some(pattern.to_string()),
            process: ProcessDef::default(),
        })
    }

    pub fn process_buffer(name: &str) -> Self {
        Self::new(Kind::ProcessBuffer {
            name: name.to_string(),
            process: ProcessDef::default(),
        })
    }

    pub fn process_document(href: &str) -> Self {
        Self::new(Kind::ProcessDocument {
            href: href.to_string(),
            base: None,
            process: ProcessDef::default(),
        })
    }

    pub fn call_procedure(name: &str) -> Self {
        Self::new(Kind::CallProcedure {
            name: name.to_string(),
            process: ProcessDef::default(),
        })
    }

    pub fn call_procedure_with(name: &str, process: ProcessDef) -> Self {
        Self::new(Kind::CallProcedure {
            name: name.to_string(),
            process,
        })
    }

    /// Nested constructs, if any.
    pub fn children(&self) -> Vec<&[Construct]> {
        match &self.kind {
            Kind::Cdata { body, .. }
            | Kind::Element { body, .. }
            | Kind::DynamicElement { body, .. }
            | Kind::Attribute { body, .. }
            | Kind::Comment { body, .. }
            | Kind::ProcessingInstruction { body, .. }
            | Kind::Copy { body, .. }
            | Kind::Message { body, .. }
            | Kind::Variable { body, .. }
            | Kind::Param { body, .. }
            | Kind::Assign { body, .. }
            | Kind::Buffer { body, .. }
            | Kind::ResultBuffer { body, .. }
            | Kind::ResultDocument { body, .. }
            | Kind::If { body, .. }
            | Kind::ForEachItem { body, .. }
            | Kind::While { body, .. } => vec![body.as_slice()],
            Kind::Choose { whens, otherwise } => {
                let mut bodies: Vec<&[Construct]> = whens.iter().map(|w| w.body.as_slice()).collect();
                if let Some(otherwise) = otherwise {
                    bodies.push(otherwise.as_slice());
                }
                bodies
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_loads_from_json() {
        let def = TransformDef::from_json(
            r#"{
                "namespaces": [["h", "urn:h"]],
                "group": {
                    "options": {"pass_through": "text"},
                    "templates": [{
                        "pattern": "h:item",
                        "priority": 2,
                        "body": [
                            {"kind": "element", "name": "li", "body": [
                                {"kind": "value-of", "select": "@id"},
                                {"kind": "process-siblings", "while": "h:item"}
                            ]}
                        ],
                        "location": {"line": 4, "column": 7}
                    }]
                }
            }"#,
        )
        .unwrap();
        let template = &def.group.templates[0];
        assert_eq!(def.group.options.pass_through, Some(PassThrough::TEXT));
        assert_eq!(template.priority, Some(2.0));
        assert_eq!(template.location.line, 4);
        match &template.body[0].kind {
            Kind::Element { name, body, .. } => {
                assert_eq!(name, "li");
                assert!(matches!(
                    &body[1].kind,
                    Kind::ProcessSiblings { while_pattern: Some(p), .. } if p == "h:item"
                ));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_construct_is_rejected() {
        let err = TransformDef::from_json(r#"{"group": {"templates": [{"pattern": "a", "body": [{"kind": "frobnicate"}]}]}}"#)
            .unwrap_err();
        assert!(matches!(err, StxError::Config(_)));
    }
}
