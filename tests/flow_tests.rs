mod common;

use common::*;
use sluice::{Construct, GroupDef, PassThrough, StxError, TemplateDef, TransformDef, Transformer, VariableDef};
use std::sync::Arc;

// ============================================================================
// Values and loops
// ============================================================================

#[test]
fn value_of_joins_a_sequence_with_a_space() -> TestResult {
    let group = GroupDef::new().template(TemplateDef::new("/", vec![Construct::value_of("1 to 3")]));
    assert_eq!(run(group, "<a/>")?, "1 2 3");
    Ok(())
}

#[test]
fn value_of_honours_a_separator() -> TestResult {
    let group = GroupDef::new().template(TemplateDef::new("/", vec![Construct::value_of_sep("1 to 3", ", ")]));
    assert_eq!(run(group, "<a/>")?, "1, 2, 3");
    Ok(())
}

#[test]
fn oversized_range_is_a_recoverable_error() -> TestResult {
    let group = || {
        GroupDef::new().template(TemplateDef::new(
            "/",
            vec![Construct::value_of("1 to 100000000000000"), Construct::text("done")],
        ))
    };
    assert_eq!(run(group(), "<a/>")?, "done");
    let err = Transformer::from_def(&TransformDef::new(group()))?
        .with_config(strict())
        .transform_str("<a/>")
        .unwrap_err();
    assert!(err.to_string().contains("too long"), "{}", err);
    Ok(())
}

fn loop_with_inner_variable() -> GroupDef {
    GroupDef::new().template(TemplateDef::new(
        "/",
        vec![
            Construct::for_each("i", "1 to 3", vec![Construct::variable("x", "$i"), Construct::value_of("$x")]),
            Construct::value_of("$x"),
        ],
    ))
}

#[test]
fn for_each_runs_once_per_item() -> TestResult {
    assert_eq!(run(loop_with_inner_variable(), "<a/>")?, "123");
    Ok(())
}

#[test]
fn for_each_variables_are_not_visible_after_the_loop() -> TestResult {
    let err = Transformer::from_def(&TransformDef::new(loop_with_inner_variable()))?
        .with_config(strict())
        .transform_str("<a/>")
        .unwrap_err();
    assert!(err.to_string().contains("'$x' is not declared"), "{}", err);
    Ok(())
}

#[test]
fn while_loops_until_the_test_fails() -> TestResult {
    let group = GroupDef::new()
        .variable(VariableDef::new("n", Some("0")))
        .template(TemplateDef::new(
            "/",
            vec![Construct::while_(
                "$n < 3",
                vec![Construct::assign("n", "$n + 1"), Construct::value_of("$n")],
            )],
        ));
    assert_eq!(run(group, "<a/>")?, "123");
    Ok(())
}

#[test]
fn choose_takes_the_first_true_branch() -> TestResult {
    let group = GroupDef::new().template(TemplateDef::new(
        "b",
        vec![Construct::choose(
            vec![
                ("@k = 'x'", vec![Construct::text("X")]),
                ("@k", vec![Construct::text("K")]),
            ],
            Some(vec![Construct::text("-")]),
        )],
    ));
    assert_eq!(run(group, r#"<a><b k="x"/><b k="y"/><b/></a>"#)?, "XK-");
    Ok(())
}

// ============================================================================
// Siblings
// ============================================================================

#[test]
fn process_siblings_resumes_at_the_first_failing_sibling() -> TestResult {
    let group = GroupDef::new()
        .template(TemplateDef::new(
            "h",
            vec![Construct::text("["), Construct::process_siblings_while("p"), Construct::text("]")],
        ))
        .template(TemplateDef::new("p", vec![Construct::value_of(".")]))
        .template(TemplateDef::new("q", vec![Construct::text("Q")]));
    let out = run(group, "<a><h/><p>1</p><p>2</p><q/><p>3</p></a>")?;
    assert_eq!(out, "[12]Q3");
    Ok(())
}

#[test]
fn process_siblings_until_stops_before_the_matching_sibling() -> TestResult {
    let group = GroupDef::new()
        .template(TemplateDef::new(
            "h",
            vec![Construct::element("sec", &[], vec![Construct::process_siblings_until("h")])],
        ))
        .template(TemplateDef::new("p", vec![Construct::value_of(".")]));
    let out = run(group, "<a><h/><p>1</p><h/><p>2</p><p>3</p></a>")?;
    assert_eq!(out, "<sec>1</sec><sec>23</sec>");
    Ok(())
}

// ============================================================================
// Output construction
// ============================================================================

#[test]
fn attributes_are_added_to_the_open_element() -> TestResult {
    let group = GroupDef::new().template(TemplateDef::new(
        "b",
        vec![Construct::element(
            "c",
            &[("id", "{@n}")],
            vec![Construct::attribute("size", "string-length(.)"), Construct::value_of(".")],
        )],
    ));
    let out = run(group, r#"<a><b n="7">abc</b></a>"#)?;
    let doc = parse_output(&out);
    let c = doc.root_element();
    assert_eq!(c.attribute("id"), Some("7"));
    assert_eq!(c.attribute("size"), Some("3"));
    assert_eq!(c.text(), Some("abc"));
    Ok(())
}

#[test]
fn attribute_body_is_merged_before_later_content() -> TestResult {
    let group = GroupDef::new().template(TemplateDef::new(
        "b",
        vec![Construct::element(
            "c",
            &[],
            vec![Construct::attribute_body("k", vec![Construct::text("v")]), Construct::text("t")],
        )],
    ));
    assert_eq!(run(group, "<a><b/></a>")?, r#"<c k="v">t</c>"#);
    Ok(())
}

#[test]
fn nested_attribute_creation_aborts() -> TestResult {
    let group = GroupDef::new().template(TemplateDef::new(
        "/",
        vec![Construct::element(
            "r",
            &[],
            vec![Construct::attribute_body("a", vec![Construct::attribute("b", "1")])],
        )],
    ));
    let err = run(group, "<a/>").unwrap_err();
    assert!(matches!(err.engine(), Some(StxError::Fatal { .. })), "{}", err);
    assert!(err.to_string().contains("can't create nested attribute"), "{}", err);
    Ok(())
}

#[test]
fn copy_keeps_the_selected_attributes() -> TestResult {
    let group = GroupDef::new().template(TemplateDef::new(
        "b",
        vec![Construct::copy_with_attributes("@keep", vec![Construct::process_children()])],
    ));
    let input = r#"<b keep="1" drop="2"><b keep="3"/></b>"#;
    assert_eq!(run(group, input)?, r#"<b keep="1"><b keep="3"/></b>"#);
    Ok(())
}

// ============================================================================
// Repeatability
// ============================================================================

fn numbering_sheet() -> TransformDef {
    TransformDef::new(
        GroupDef::new()
            .pass_through(PassThrough::ALL)
            .variable(VariableDef::new("seen", Some("0")))
            .template(TemplateDef::new(
                "item",
                vec![
                    Construct::assign("seen", "$seen + 1"),
                    Construct::element("item", &[("n", "{$seen}")], vec![Construct::process_children()]),
                ],
            )),
    )
}

const NUMBERING_INPUT: &str = "<list><item>a</item><!--x--><item>b<item>c</item></item></list>";

#[test]
fn repeated_runs_produce_identical_output() -> TestResult {
    init_logging();
    let transformer = Transformer::from_def(&numbering_sheet())?.with_config(quiet());
    let first = transformer.transform_str(NUMBERING_INPUT)?;
    let second = transformer.transform_str(NUMBERING_INPUT)?;
    assert_eq!(first, second);
    assert_eq!(
        first,
        r#"<list><item n="1">a</item><!--x--><item n="2">b<item n="3">c</item></item></list>"#
    );
    Ok(())
}

#[test]
fn one_sheet_serves_processors_on_several_threads() -> TestResult {
    let sheet = Arc::new(sluice::Sheet::compile(&numbering_sheet())?);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let sheet = Arc::clone(&sheet);
            std::thread::spawn(move || {
                Transformer::new(sheet)
                    .with_config(quiet())
                    .transform_str(NUMBERING_INPUT)
                    .map_err(|e| e.to_string())
            })
        })
        .collect();
    let expected = Transformer::new(sheet).with_config(quiet()).transform_str(NUMBERING_INPUT)?;
    for handle in handles {
        let out = handle.join().map_err(|_| "thread panicked")??;
        assert_eq!(out, expected);
    }
    Ok(())
}
