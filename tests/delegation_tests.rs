mod common;

use common::*;
use sluice::{
    BuiltinFilters, Construct, GroupDef, IDENTITY_METHOD, Kind, MemoryDocumentResolver, MemoryOutputResolver,
    ProcessDef, ProcessorConfig, SHEET_METHOD, Sheet, StxError, TemplateDef, TransformDef, Transformer, XmlWriter,
    parse_str,
};
use std::sync::Arc;

fn bracket_items() -> GroupDef {
    GroupDef::named("items").template(TemplateDef::new(
        "item",
        vec![Construct::text("["), Construct::value_of("."), Construct::text("]")],
    ))
}

fn read_document(href: &str) -> Construct {
    Construct::new(Kind::ProcessDocument {
        href: href.into(),
        base: None,
        process: ProcessDef::group("items"),
    })
}

// ============================================================================
// process-document
// ============================================================================

#[test]
fn documents_are_processed_in_the_named_group() -> TestResult {
    let group = GroupDef::new()
        .template(TemplateDef::new(
            "/",
            vec![read_document("('one.xml', 'two.xml')"), Construct::text("!")],
        ))
        .group(bracket_items());

    let mut documents = MemoryDocumentResolver::new();
    documents.insert("one.xml", "<list><item>1</item></list>");
    documents.insert("two.xml", "<list><item>2</item><item>3</item></list>");

    let transformer = transformer(group)?;
    let mut processor = transformer.processor(XmlWriter::in_memory(&transformer.output_config()))?;
    processor.set_document_resolver(documents);
    parse_str("<main/>", &mut processor)?;
    assert_eq!(processor.into_handler().into_string()?, "[1][2][3]!");
    Ok(())
}

#[test]
fn documents_are_read_relative_to_the_base_uri() -> TestResult {
    let dir = std::env::temp_dir();
    let file = format!("sluice-{}-items.xml", std::process::id());
    std::fs::write(dir.join(&file), "<list><item>disk</item></list>")?;

    let group = GroupDef::new()
        .template(TemplateDef::new("/", vec![read_document(&format!("'{}'", file))]))
        .group(bracket_items());
    let config = ProcessorConfig {
        base_uri: Some(format!("{}/", dir.display())),
        ..quiet()
    };
    let out = Transformer::from_def(&TransformDef::new(group))?
        .with_config(config)
        .transform_str("<main/>");
    std::fs::remove_file(dir.join(&file))?;

    assert_eq!(out?, "[disk]");
    Ok(())
}

#[test]
fn unreadable_documents_fail_in_strict_mode() -> TestResult {
    let group = GroupDef::new()
        .template(TemplateDef::new("/", vec![read_document("'/nonexistent/sluice.xml'").at(4, 2)]))
        .group(bracket_items());
    let err = Transformer::from_def(&TransformDef::new(group))?
        .with_config(strict())
        .transform_str("<main/>")
        .unwrap_err();
    assert!(matches!(err.engine(), Some(StxError::Io { .. })), "{}", err);
    assert!(err.to_string().contains("/nonexistent/sluice.xml"), "{}", err);
    assert!(err.to_string().contains("line 4, column 2"), "{}", err);
    Ok(())
}

// ============================================================================
// result-document
// ============================================================================

#[test]
fn result_documents_are_written_separately() -> TestResult {
    let group = GroupDef::new().template(TemplateDef::new(
        "item",
        vec![
            Construct::result_document(
                "{.}.xml",
                vec![Construct::element("page", &[], vec![Construct::value_of(".")])],
            ),
            Construct::text("."),
        ],
    ));
    let outputs = MemoryOutputResolver::new(quiet().output);
    let transformer = transformer(group)?;
    let mut processor = transformer.processor(XmlWriter::in_memory(&transformer.output_config()))?;
    processor.set_output_resolver(outputs.clone());
    parse_str("<list><item>a</item><item>b</item></list>", &mut processor)?;

    assert_eq!(processor.into_handler().into_string()?, "..");
    assert_eq!(outputs.hrefs(), vec!["a.xml".to_string(), "b.xml".to_string()]);
    let page = outputs.document("b.xml").unwrap_or_default();
    assert_eq!(parse_output(&page).root_element().text(), Some("b"));
    Ok(())
}

// ============================================================================
// Filters
// ============================================================================

fn wrap_children(method: &str, src: Option<&str>) -> GroupDef {
    GroupDef::new().template(TemplateDef::new(
        "a",
        vec![Construct::element(
            "w",
            &[],
            vec![Construct::process_children_with(ProcessDef::filter(method, src))],
        )],
    ))
}

#[test]
fn identity_filter_copies_the_children() -> TestResult {
    let out = run(wrap_children(IDENTITY_METHOD, None), "<a><b>t</b><?p d?></a>")?;
    assert_eq!(out, "<w><b>t</b><?p d?></w>");
    Ok(())
}

#[test]
fn sheet_filter_runs_a_registered_sheet() -> TestResult {
    let upper = Sheet::compile(&TransformDef::new(GroupDef::new().template(TemplateDef::new(
        "b",
        vec![Construct::element("B", &[], vec![Construct::value_of("upper-case(.)")])],
    ))))?;
    let mut filters = BuiltinFilters::new();
    filters.register("upper", Arc::new(upper));

    let transformer = transformer(wrap_children(SHEET_METHOD, Some("'upper'")))?;
    let mut processor = transformer.processor(XmlWriter::in_memory(&transformer.output_config()))?;
    processor.set_filter_resolver(filters);
    parse_str("<a><b>x</b><c/><b>y</b></a>", &mut processor)?;
    assert_eq!(processor.into_handler().into_string()?, "<w><B>X</B><B>Y</B></w>");
    Ok(())
}

#[test]
fn unknown_filter_methods_are_fatal() -> TestResult {
    let err = run(wrap_children("urn:nowhere", None), "<a><b/></a>").unwrap_err();
    assert!(matches!(err.engine(), Some(StxError::Fatal { .. })), "{}", err);
    assert!(err.to_string().contains("urn:nowhere"), "{}", err);
    Ok(())
}

#[test]
fn unregistered_sheets_are_fatal() -> TestResult {
    let err = run(wrap_children(SHEET_METHOD, Some("'missing'")), "<a><b/></a>").unwrap_err();
    assert!(err.to_string().contains("no sheet registered as 'missing'"), "{}", err);
    Ok(())
}
