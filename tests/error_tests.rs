mod common;

use common::*;
use sluice::{
    Construct, ErrorHandler, GroupDef, ProcedureDef, StxError, TemplateDef, TransformDef, Transformer, XmlWriter,
    parse_str,
};
use std::cell::RefCell;
use std::rc::Rc;

fn compile_error(group: GroupDef) -> StxError {
    match Transformer::from_def(&TransformDef::new(group)) {
        Ok(_) => panic!("sheet compiled"),
        Err(sluice::TransformError::Engine(e)) => e,
        Err(e) => panic!("unexpected error: {}", e),
    }
}

// ============================================================================
// Compile errors
// ============================================================================

#[test]
fn unresolved_procedures_name_the_call_site() {
    let err = compile_error(GroupDef::new().template(TemplateDef::new(
        "/",
        vec![Construct::call_procedure("missing").at(3, 7)],
    )));
    assert!(matches!(err, StxError::Compile { .. }));
    let text = err.to_string();
    assert!(text.contains("unknown procedure 'missing'"), "{}", text);
    assert!(text.contains("line 3, column 7"), "{}", text);
}

#[test]
fn procedures_in_child_groups_need_to_be_public() {
    let private = GroupDef::new()
        .template(TemplateDef::new("/", vec![Construct::call_procedure("p")]))
        .group(GroupDef::named("g").procedure(ProcedureDef::new("p", vec![])));
    assert!(matches!(compile_error(private), StxError::Compile { .. }));

    let public = GroupDef::new()
        .template(TemplateDef::new("/", vec![Construct::call_procedure("p")]))
        .group(GroupDef::named("g").procedure(ProcedureDef::new("p", vec![Construct::text("p")]).public()));
    assert!(Transformer::from_def(&TransformDef::new(public)).is_ok());
}

#[test]
fn duplicate_group_names_are_rejected() {
    let err = compile_error(GroupDef::new().group(GroupDef::named("g")).group(GroupDef::named("g")));
    assert!(err.to_string().contains("duplicate group name 'g'"), "{}", err);
}

#[test]
fn choose_needs_a_when() {
    let err = compile_error(GroupDef::new().template(TemplateDef::new(
        "/",
        vec![Construct::choose(vec![], Some(vec![]))],
    )));
    assert!(err.to_string().contains("at least one when"), "{}", err);
}

#[test]
fn params_must_come_first() {
    let err = compile_error(GroupDef::new().template(TemplateDef::new(
        "/",
        vec![Construct::text("x"), Construct::param("p", None)],
    )));
    assert!(matches!(err, StxError::Compile { .. }), "{}", err);
}

#[test]
fn malformed_patterns_are_compile_errors() {
    let err = compile_error(GroupDef::new().template(TemplateDef::new("b[", vec![])));
    assert!(err.to_string().contains("invalid pattern 'b['"), "{}", err);
}

#[test]
fn unknown_prefixes_are_compile_errors() {
    let err = compile_error(GroupDef::new().template(TemplateDef::new("q:b", vec![])));
    assert!(matches!(err, StxError::Compile { .. }), "{}", err);
}

// ============================================================================
// Runtime errors
// ============================================================================

#[test]
fn strict_errors_carry_the_instruction_location() -> TestResult {
    let group = GroupDef::new().template(TemplateDef::new("/", vec![Construct::assign("nope", "1").at(2, 5)]));
    let err = Transformer::from_def(&TransformDef::new(group))?
        .with_config(strict())
        .transform_str("<a/>")
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("undeclared variable '$nope'"), "{}", text);
    assert!(text.contains("line 2, column 5"), "{}", text);
    Ok(())
}

#[derive(Clone, Default)]
struct Journal {
    recovered: Rc<RefCell<Vec<String>>>,
    fatal: Rc<RefCell<Vec<String>>>,
}

impl ErrorHandler for Journal {
    fn error(&mut self, error: StxError) -> Result<(), StxError> {
        self.recovered.borrow_mut().push(error.to_string());
        Ok(())
    }

    fn fatal(&mut self, error: &StxError) {
        self.fatal.borrow_mut().push(error.to_string());
    }
}

#[test]
fn recoverable_errors_reach_the_error_handler() -> TestResult {
    let group = GroupDef::new().template(TemplateDef::new(
        "/",
        vec![
            Construct::assign("nope", "1"),
            Construct::value_of("$unset"),
            Construct::text("ok"),
        ],
    ));
    let journal = Journal::default();
    let transformer = transformer(group)?;
    let mut processor = transformer.processor(XmlWriter::in_memory(&transformer.output_config()))?;
    processor.set_error_handler(journal.clone());
    parse_str("<a/>", &mut processor)?;

    assert_eq!(processor.into_handler().into_string()?, "ok");
    let recovered = journal.recovered.borrow();
    assert_eq!(recovered.len(), 2, "{:?}", recovered);
    assert!(recovered[0].contains("'$nope'"));
    assert!(recovered[1].contains("'$unset' is not declared"));
    assert!(journal.fatal.borrow().is_empty());
    Ok(())
}

#[test]
fn fatal_errors_are_reported_once() -> TestResult {
    let group = GroupDef::new().template(TemplateDef::new(
        "/",
        vec![Construct::element(
            "r",
            &[],
            vec![Construct::attribute_body("a", vec![Construct::attribute("b", "1")])],
        )],
    ));
    let journal = Journal::default();
    let transformer = transformer(group)?;
    let mut processor = transformer.processor(XmlWriter::in_memory(&transformer.output_config()))?;
    processor.set_error_handler(journal.clone());

    assert!(parse_str("<a/>", &mut processor).is_err());
    assert!(matches!(
        sluice::ContentHandler::end_document(&mut processor),
        Err(StxError::Aborted)
    ));
    assert_eq!(journal.fatal.borrow().len(), 1);
    assert!(journal.fatal.borrow()[0].contains("can't create nested attribute"));
    Ok(())
}
