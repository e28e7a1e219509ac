mod common;

use common::*;
use sluice::{Construct, GroupDef, Kind, OutputEvent, PassThrough, RecordingHandler, TemplateDef};

fn item(n: &str, text: &str) -> Construct {
    Construct::element("item", &[("n", n)], vec![Construct::text(text)])
}

fn recorded(group: GroupDef, input: &str) -> Result<Vec<OutputEvent>, Box<dyn std::error::Error>> {
    let handler = transformer(group)?.transform_to(input, RecordingHandler::new())?;
    Ok(handler.into_events())
}

#[test]
fn replayed_buffers_match_live_input() -> TestResult {
    let live = recorded(
        GroupDef::new().pass_through(PassThrough::ALL),
        r#"<list><item n="1">a</item><item n="2">b</item></list>"#,
    )?;

    let buffered = GroupDef::new().pass_through(PassThrough::ALL).template(TemplateDef::new(
        "/",
        vec![
            Construct::new(Kind::Buffer {
                name: "copy".into(),
                body: vec![Construct::element("list", &[], vec![item("1", "a"), item("2", "b")])],
            }),
            Construct::process_buffer("copy"),
        ],
    ));
    let replayed = recorded(buffered, "<ignored/>")?;

    assert_eq!(replayed, live);
    Ok(())
}

#[test]
fn buffers_can_be_replayed_more_than_once() -> TestResult {
    let group = GroupDef::new()
        .template(TemplateDef::new(
            "/",
            vec![
                Construct::new(Kind::Buffer {
                    name: "b".into(),
                    body: vec![item("1", "x")],
                }),
                Construct::process_buffer("b"),
                Construct::process_buffer("b"),
            ],
        ))
        .template(TemplateDef::new("item", vec![Construct::value_of("@n"), Construct::value_of(".")]));
    assert_eq!(run(group, "<a/>")?, "1x1x");
    Ok(())
}

fn logging_group(clear: bool) -> GroupDef {
    GroupDef::new()
        .buffer("log")
        .template(TemplateDef::new(
            "/",
            vec![Construct::process_children(), Construct::process_buffer("log")],
        ))
        .template(TemplateDef::new(
            "b",
            vec![Construct::result_buffer(
                "log",
                clear,
                vec![Construct::element("seen", &[], vec![Construct::value_of(".")])],
            )],
        ))
        .template(TemplateDef::new(
            "seen",
            vec![Construct::text("("), Construct::value_of("."), Construct::text(")")],
        ))
}

#[test]
fn group_buffers_collect_across_templates() -> TestResult {
    assert_eq!(run(logging_group(false), "<a><b>1</b><b>2</b></a>")?, "(1)(2)");
    Ok(())
}

#[test]
fn clearing_result_buffer_replaces_the_content() -> TestResult {
    assert_eq!(run(logging_group(true), "<a><b>1</b><b>2</b></a>")?, "(2)");
    Ok(())
}

#[test]
fn unknown_buffers_are_a_recoverable_error() -> TestResult {
    let group = GroupDef::new().template(TemplateDef::new(
        "/",
        vec![Construct::process_buffer("nowhere"), Construct::text("after")],
    ));
    assert_eq!(run(group, "<a/>")?, "after");
    Ok(())
}
