use super::*;
use crate::config::{OutputConfig, PassThrough};
use crate::def::{Construct, GroupDef, Kind, ProcedureDef, ProcessDef, TemplateDef, TransformDef, VariableDef};
use crate::filter::IDENTITY_METHOD;
use crate::input::parse_str;
use crate::resolve::MemoryDocumentResolver;
use crate::writer::XmlWriter;

fn config() -> ProcessorConfig {
    ProcessorConfig {
        output: OutputConfig {
            omit_xml_declaration: true,
            ..OutputConfig::default()
        },
        ..ProcessorConfig::default()
    }
}

fn processor(group: GroupDef) -> Processor<XmlWriter<Vec<u8>>> {
    let sheet = Arc::new(Sheet::compile(&TransformDef::new(group)).unwrap());
    let config = config();
    let writer = XmlWriter::in_memory(&config.output);
    Processor::new(sheet, config, writer)
}

fn transform(group: GroupDef, input: &str) -> String {
    let mut p = processor(group);
    parse_str(input, &mut p).unwrap();
    p.into_handler().into_string().unwrap()
}

#[test]
fn nothing_passes_through_by_default() {
    assert_eq!(transform(GroupDef::new(), "<a><b>1</b><b>2</b></a>"), "");
    let silent = GroupDef::new().template(TemplateDef::new("b", vec![]));
    assert_eq!(transform(silent, "<a><b>1</b><b>2</b></a>"), "");
    let loud = GroupDef::new().template(TemplateDef::new("b", vec![Construct::text("B")]));
    assert_eq!(transform(loud, "<a><b>1</b><b>2</b></a>"), "BB");
}

#[test]
fn pass_through_all_copies_the_document() {
    let input = r#"<a x="1"><!--c--><b>t</b><?pi go?></a>"#;
    let out = transform(GroupDef::new().pass_through(PassThrough::ALL), input);
    assert_eq!(out, r#"<a x="1"><!--c--><b>t</b><?pi go?></a>"#);
}

#[test]
fn children_are_processed_in_document_order() {
    let group = GroupDef::new()
        .template(TemplateDef::new(
            "a",
            vec![Construct::element("x", &[], vec![Construct::process_children()])],
        ))
        .template(TemplateDef::new(
            "b",
            vec![Construct::value_of("position()"), Construct::value_of(".")],
        ));
    assert_eq!(transform(group, "<a><b>p</b><b>q</b></a>"), "<x>1p2q</x>");
}

#[test]
fn siblings_are_grouped_under_their_heading() {
    let group = GroupDef::new()
        .template(TemplateDef::new("a", vec![Construct::process_children()]))
        .template(TemplateDef::new(
            "h",
            vec![Construct::element(
                "sec",
                &[],
                vec![Construct::value_of("."), Construct::process_siblings_while("p")],
            )],
        ))
        .template(TemplateDef::new(
            "p",
            vec![Construct::element("p", &[], vec![Construct::value_of(".")])],
        ));
    let out = transform(group, "<a><h>1</h><p>x</p><p>y</p><h>2</h><p>z</p></a>");
    assert_eq!(out, "<sec>1<p>x</p><p>y</p></sec><sec>2<p>z</p></sec>");
}

#[test]
fn process_self_falls_back_to_lower_priority() {
    let group = GroupDef::new()
        .template(
            TemplateDef::new(
                "b",
                vec![Construct::element("wrap", &[], vec![Construct::process_self()])],
            )
            .priority(1.0),
        )
        .template(TemplateDef::new("b", vec![Construct::value_of(".")]));
    assert_eq!(transform(group, "<b>1</b>"), "<wrap>1</wrap>");
}

#[test]
fn attributes_are_visited_in_order() {
    let group = GroupDef::new()
        .template(TemplateDef::new(
            "e",
            vec![Construct::element("out", &[], vec![Construct::process_attributes()])],
        ))
        .template(TemplateDef::new(
            "@*",
            vec![Construct::element(
                "att",
                &[("n", "{position()}")],
                vec![Construct::value_of(".")],
            )],
        ));
    let out = transform(group, r#"<e x="a" y="b"/>"#);
    assert_eq!(out, r#"<out><att n="1">a</att><att n="2">b</att></out>"#);
}

#[test]
fn for_each_binds_each_item() {
    let group = GroupDef::new().template(TemplateDef::new(
        "/",
        vec![Construct::for_each(
            "i",
            "1 to 3",
            vec![Construct::value_of("$i"), Construct::text(";")],
        )],
    ));
    assert_eq!(transform(group, "<a/>"), "1;2;3;");
}

#[test]
fn group_variables_survive_between_templates() {
    let group = GroupDef::new()
        .variable(VariableDef::new("count", Some("0")))
        .template(TemplateDef::new(
            "/",
            vec![Construct::process_children(), Construct::value_of("$count")],
        ))
        .template(TemplateDef::new("b", vec![Construct::assign("count", "$count + 1")]));
    assert_eq!(transform(group, "<a><b/><b/><c><b/></c></a>"), "3");
}

#[test]
fn buffers_are_processed_like_input() {
    let group = GroupDef::new()
        .template(TemplateDef::new(
            "/",
            vec![
                Construct::new(Kind::Buffer {
                    name: "buf".into(),
                    body: vec![
                        Construct::element("x", &[], vec![Construct::text("1")]),
                        Construct::element("y", &[], vec![]),
                    ],
                }),
                Construct::process_buffer("buf"),
            ],
        ))
        .template(TemplateDef::new("x", vec![Construct::text("X"), Construct::value_of(".")]))
        .template(TemplateDef::new("y", vec![Construct::value_of("position()")]));
    assert_eq!(transform(group, "<a/>"), "X11");
}

#[test]
fn nested_attributes_abort() {
    let group = GroupDef::new().template(TemplateDef::new(
        "/",
        vec![Construct::element(
            "r",
            &[],
            vec![Construct::attribute_body("a", vec![Construct::attribute("b", "1")])],
        )],
    ));
    let mut p = processor(group);
    let err = parse_str("<a/>", &mut p).unwrap_err();
    assert!(err.to_string().contains("can't create nested attribute"), "{}", err);
    assert!(matches!(p.end_document(), Err(StxError::Aborted)));
}

#[test]
fn attribute_value_can_come_from_child_templates() {
    let group = GroupDef::new()
        .template(TemplateDef::new(
            "a",
            vec![Construct::element(
                "r",
                &[],
                vec![
                    Construct::attribute_body("v", vec![Construct::process_children()]),
                    Construct::attribute("n", "name()"),
                ],
            )],
        ))
        .template(TemplateDef::new("b", vec![Construct::value_of(".")]));
    assert_eq!(transform(group.clone(), "<a><b>x</b><b>y</b></a>"), r#"<r v="xy" n="a"/>"#);

    let nested = group.template(TemplateDef::new("b", vec![Construct::attribute("w", ".")]).priority(1.0));
    let mut p = processor(nested);
    let err = parse_str("<a><b>x</b></a>", &mut p).unwrap_err();
    assert!(err.to_string().contains("can't create nested attribute"), "{}", err);
}

#[test]
fn malformed_comment_is_skipped() {
    let group = GroupDef::new().template(TemplateDef::new(
        "/",
        vec![
            Construct::comment(vec![Construct::text("a--b")]),
            Construct::comment(vec![Construct::text("fine")]),
            Construct::text("ok"),
        ],
    ));
    assert_eq!(transform(group, "<a/>"), "<!--fine-->ok");
}

#[test]
fn messages_are_collected() {
    let group = GroupDef::new().template(TemplateDef::new("/", vec![Construct::message("'hello'")]));
    let mut p = processor(group);
    parse_str("<a/>", &mut p).unwrap();
    assert_eq!(p.messages(), &["hello".to_string()]);
}

#[test]
fn required_parameters_must_be_set() {
    let group = GroupDef::new()
        .variable(VariableDef::param("who", None).required())
        .template(TemplateDef::new("/", vec![Construct::value_of("$who")]));

    let mut missing = processor(group.clone());
    assert!(matches!(parse_str("<a/>", &mut missing), Err(StxError::Fatal { .. })));

    let mut p = processor(group);
    p.set_parameter("who", "world").unwrap();
    parse_str("<a/>", &mut p).unwrap();
    assert_eq!(p.into_handler().into_string().unwrap(), "world");
}

#[test]
fn undeclared_assignment_is_recoverable() {
    let group = GroupDef::new().template(TemplateDef::new(
        "/",
        vec![Construct::assign("nope", "1"), Construct::text("ok")],
    ));
    assert_eq!(transform(group.clone(), "<a/>"), "ok");

    let sheet = Arc::new(Sheet::compile(&TransformDef::new(group)).unwrap());
    let strict = ProcessorConfig {
        strict: true,
        ..config()
    };
    let mut p = Processor::new(sheet, strict, XmlWriter::in_memory(&OutputConfig::default()));
    let err = parse_str("<a/>", &mut p).unwrap_err();
    assert!(err.to_string().contains("undeclared variable"), "{}", err);
}

#[test]
fn procedures_receive_parameters() {
    let group = GroupDef::new()
        .procedure(ProcedureDef::new(
            "show",
            vec![Construct::param("x", Some("'default'")), Construct::value_of("$x")],
        ))
        .template(TemplateDef::new(
            "/",
            vec![
                Construct::call_procedure_with("show", ProcessDef::default().with_param("x", "'given'")),
                Construct::text(" "),
                Construct::call_procedure("show"),
            ],
        ));
    assert_eq!(transform(group, "<a/>"), "given default");
}

#[test]
fn external_documents_use_the_named_group() {
    let group = GroupDef::new()
        .template(TemplateDef::new(
            "/",
            vec![Construct::new(Kind::ProcessDocument {
                href: "'other.xml'".into(),
                base: None,
                process: ProcessDef::group("inner"),
            })],
        ))
        .group(GroupDef::named("inner").template(TemplateDef::new(
            "item",
            vec![Construct::text("["), Construct::value_of("."), Construct::text("]")],
        )));
    let mut documents = MemoryDocumentResolver::new();
    documents.insert("other.xml", "<list><item>1</item><item>2</item></list>");
    let mut p = processor(group);
    p.set_document_resolver(documents);
    parse_str("<a/>", &mut p).unwrap();
    assert_eq!(p.into_handler().into_string().unwrap(), "[1][2]");
}

#[test]
fn missing_documents_are_reported_and_skipped() {
    let group = GroupDef::new().template(TemplateDef::new(
        "/",
        vec![Construct::process_document("'absent.xml'"), Construct::text("done")],
    ));
    let mut p = processor(group);
    p.set_document_resolver(MemoryDocumentResolver::new());
    parse_str("<a/>", &mut p).unwrap();
    assert_eq!(p.into_handler().into_string().unwrap(), "done");
}

#[test]
fn result_documents_go_to_the_output_resolver() {
    let group = GroupDef::new().template(TemplateDef::new(
        "/",
        vec![
            Construct::result_document("side.xml", vec![Construct::element("r", &[], vec![])]),
            Construct::text("main"),
        ],
    ));
    let outputs = MemoryOutputResolver::new(config().output);
    let mut p = processor(group);
    p.set_output_resolver(outputs.clone());
    parse_str("<a/>", &mut p).unwrap();
    assert_eq!(p.into_handler().into_string().unwrap(), "main");
    assert_eq!(outputs.document("side.xml").as_deref(), Some("<r/>"));
}

#[test]
fn identity_filter_forwards_the_children() {
    let group = GroupDef::new().template(TemplateDef::new(
        "a",
        vec![Construct::element(
            "w",
            &[],
            vec![Construct::process_children_with(ProcessDef::filter(IDENTITY_METHOD, None))],
        )],
    ));
    assert_eq!(transform(group, "<a><b>t</b><!--c--></a>"), "<w><b>t</b><!--c--></w>");
}

#[test]
fn siblings_end_with_their_parent() {
    let group = GroupDef::new()
        .template(TemplateDef::new("a", vec![Construct::process_children(), Construct::text("|")]))
        .template(TemplateDef::new(
            "b",
            vec![Construct::text("("), Construct::process_siblings_until("stop"), Construct::text(")")],
        ))
        .template(TemplateDef::new("c", vec![Construct::text("c")]));
    assert_eq!(transform(group, "<r><a><b/><c/><c/></a></r>"), "(cc)|");
}

#[test]
fn strip_space_drops_whitespace_text() {
    let template = TemplateDef::new("text()", vec![Construct::text("T")]);
    let kept = GroupDef::new().pass_through(PassThrough::ALL).template(template.clone());
    assert_eq!(transform(kept, "<a> <b/></a>"), "<a>T<b/></a>");
    let stripped = GroupDef::new()
        .pass_through(PassThrough::ALL)
        .strip_space(true)
        .template(template);
    assert_eq!(transform(stripped, "<a> <b/></a>"), "<a><b/></a>");
}
