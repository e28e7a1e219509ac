mod common;

use common::*;
use sluice::{Construct, GroupDef, PassThrough, StxError, TemplateDef, TransformDef, Transformer};

// ============================================================================
// Template selection
// ============================================================================

#[test]
fn unmatched_nodes_produce_nothing_without_pass_through() -> TestResult {
    let group = GroupDef::new().template(TemplateDef::new("c", vec![Construct::text("never")]));
    assert_eq!(run(group, "<a><b>1</b><b>2</b></a>")?, "");

    // The silent template for `b` is still reached through the unmatched `a`.
    let group = GroupDef::new().template(TemplateDef::new("b", vec![]));
    assert_eq!(run(group, "<a><b>1</b><b>2</b></a>")?, "");
    Ok(())
}

#[test]
fn children_of_unmatched_elements_are_still_matched() -> TestResult {
    let group = GroupDef::new().template(TemplateDef::new("b", vec![Construct::text("B")]));
    assert_eq!(run(group, "<a><b>1</b><b>2</b></a>")?, "BB");
    Ok(())
}

#[test]
fn equal_priorities_are_reported_as_ambiguous() -> TestResult {
    let group = GroupDef::new()
        .template(TemplateDef::new("b", vec![Construct::text("first")]))
        .template(TemplateDef::new("b", vec![Construct::text("second")]));
    let err = run(group, "<a><b/></a>").unwrap_err();
    assert!(matches!(err.engine(), Some(StxError::Fatal { .. })), "{}", err);
    assert!(err.to_string().contains("ambiguous"), "{}", err);
    Ok(())
}

#[test]
fn explicit_priority_resolves_the_tie() -> TestResult {
    let group = GroupDef::new()
        .template(TemplateDef::new("b", vec![Construct::text("first")]))
        .template(TemplateDef::new("b", vec![Construct::text("second")]).priority(2.0));
    assert_eq!(run(group, "<a><b/></a>")?, "second");
    Ok(())
}

#[test]
fn specific_patterns_win_over_wildcards() -> TestResult {
    let group = GroupDef::new()
        .template(TemplateDef::new("*", vec![Construct::text("any"), Construct::process_children()]))
        .template(TemplateDef::new("b", vec![Construct::text("b")]));
    assert_eq!(run(group, "<a><b/><c/></a>")?, "anybany");
    Ok(())
}

#[test]
fn predicates_see_the_position_among_siblings() -> TestResult {
    let group = GroupDef::new()
        .template(TemplateDef::new("b[2]", vec![Construct::text("second")]))
        .template(TemplateDef::new("b", vec![Construct::text("-")]));
    assert_eq!(run(group, "<a><b/><b/><b/></a>")?, "-second-");
    Ok(())
}

#[test]
fn process_self_does_not_rematch_the_active_template() -> TestResult {
    let group = GroupDef::new()
        .template(
            TemplateDef::new("b", vec![Construct::element("outer", &[], vec![Construct::process_self()])])
                .priority(2.0),
        )
        .template(
            TemplateDef::new("b", vec![Construct::element("inner", &[], vec![Construct::process_self()])])
                .priority(1.0),
        )
        .template(TemplateDef::new("b", vec![Construct::value_of(".")]));
    assert_eq!(run(group, "<b>x</b>")?, "<outer><inner>x</inner></outer>");
    Ok(())
}

#[test]
fn pass_through_text_copies_only_character_data() -> TestResult {
    let group = GroupDef::new().pass_through(PassThrough::TEXT);
    assert_eq!(run(group, "<a>one<b>two</b><!--no-->three</a>")?, "onetwothree");
    Ok(())
}

#[test]
fn templates_of_a_public_child_group_are_visible() -> TestResult {
    let group = GroupDef::new()
        .template(TemplateDef::new("a", vec![Construct::process_children()]))
        .group(GroupDef::named("items").template(TemplateDef::new("b", vec![Construct::text("B")]).public()));
    assert_eq!(run(group, "<a><b/><b/></a>")?, "BB");
    Ok(())
}

// ============================================================================
// Namespaces
// ============================================================================

#[test]
fn patterns_match_by_namespace_uri() -> TestResult {
    init_logging();
    let def = TransformDef::new(
        GroupDef::new()
            .template(TemplateDef::new(
                "p:a",
                vec![Construct::element("p:out", &[], vec![Construct::process_children()])],
            ))
            .template(TemplateDef::new("p:b", vec![Construct::text("hit")]))
            .template(TemplateDef::new("b", vec![Construct::text("miss")])),
    )
    .namespace("p", "urn:p");
    let out = Transformer::from_def(&def)?
        .with_config(quiet())
        .transform_str(r#"<x:a xmlns:x="urn:p"><x:b/><b/></x:a>"#)?;

    let doc = parse_output(&out);
    let root = doc.root_element();
    assert_eq!(root.tag_name().namespace(), Some("urn:p"));
    assert_eq!(root.tag_name().name(), "out");
    assert_eq!(root.text(), Some("hitmiss"));
    Ok(())
}

#[test]
fn undeclared_prefix_in_a_computed_name_aborts() -> TestResult {
    let group = GroupDef::new().template(TemplateDef::new(
        "/",
        vec![Construct::dynamic_element("q:e", None, vec![])],
    ));
    let err = run(group, "<a/>").unwrap_err();
    assert!(matches!(err.engine(), Some(StxError::Fatal { .. })), "{}", err);
    assert!(err.to_string().contains("undeclared namespace prefix 'q'"), "{}", err);
    Ok(())
}
