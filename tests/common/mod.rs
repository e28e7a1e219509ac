#![allow(dead_code)]

use sluice::{GroupDef, OutputConfig, ProcessorConfig, TransformDef, TransformError, Transformer};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Processor settings that leave out the XML declaration, so outputs can be
/// compared as plain strings.
pub fn quiet() -> ProcessorConfig {
    ProcessorConfig {
        output: OutputConfig {
            omit_xml_declaration: true,
            ..OutputConfig::default()
        },
        ..ProcessorConfig::default()
    }
}

pub fn strict() -> ProcessorConfig {
    ProcessorConfig {
        strict: true,
        ..quiet()
    }
}

pub fn transformer(group: GroupDef) -> Result<Transformer, TransformError> {
    init_logging();
    Ok(Transformer::from_def(&TransformDef::new(group))?.with_config(quiet()))
}

pub fn run(group: GroupDef, input: &str) -> Result<String, TransformError> {
    transformer(group)?.transform_str(input)
}

/// Parses `xml` and fails the test unless it is well-formed.
pub fn parse_output(xml: &str) -> roxmltree::Document<'_> {
    match roxmltree::Document::parse(xml) {
        Ok(doc) => doc,
        Err(e) => panic!("output is not well-formed ({}): {}", e, xml),
    }
}
