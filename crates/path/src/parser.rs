//! A `nom`-based parser for expressions and match patterns.

use crate::ast::*;
use crate::error::PathError;
use crate::pattern::{PathPattern, PatternStep, Separator};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit0, digit1, multispace0, satisfy},
    combinator::{map, map_res, not, opt, peek, recognize},
    error::{Error, ErrorKind},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated},
};
use sluice_types::QualifiedName;

// --- Main Public Parsers ---

pub(crate) fn parse_expression(input: &str) -> Result<Expression, PathError> {
    match sequence_expr(input.trim()) {
        Ok(("", expr)) => Ok(expr),
        Ok((rem, _)) => Err(PathError::parse(
            input,
            format!("parser did not consume all input, remainder: '{}'", rem),
        )),
        Err(e) => Err(PathError::parse(input, e.to_string())),
    }
}

pub(crate) fn parse_pattern(input: &str) -> Result<Vec<PathPattern>, PathError> {
    match union_pattern(input.trim()) {
        Ok(("", alternatives)) => Ok(alternatives),
        Ok((rem, _)) => Err(PathError::parse(
            input,
            format!("parser did not consume all input, remainder: '{}'", rem),
        )),
        Err(e) => Err(PathError::parse(input, e.to_string())),
    }
}

// --- Combinators & Helpers ---

fn ws<'a, F, O, E>(inner: F) -> impl Parser<&'a str, Output = O, Error = E>
where
    F: Parser<&'a str, Output = O, Error = E>,
    E: nom::error::ParseError<&'a str>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

/// A word operator such as `and` or `div` that must not run into a following name.
fn keyword<'a>(word: &'static str) -> impl Parser<&'a str, Output = &'a str, Error = Error<&'a str>> {
    terminated(tag(word), not(satisfy(is_name_char)))
}

fn build_binary_expr_parser<'a, F, G>(
    sub_expr_parser: F,
    op_parser: G,
) -> impl FnMut(&'a str) -> IResult<&'a str, Expression>
where
    F: Parser<&'a str, Output = Expression, Error = Error<&'a str>> + Clone,
    G: Parser<&'a str, Output = BinaryOperator, Error = Error<&'a str>> + Clone,
{
    move |input: &str| {
        let (input, mut left) = sub_expr_parser.clone().parse(input)?;
        let (input, remainder) = many0(pair(ws(op_parser.clone()), sub_expr_parser.clone())).parse(input)?;

        for (op, right) in remainder {
            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok((input, left))
    }
}

// --- Expression Parsers (in order of precedence) ---

fn sequence_expr(input: &str) -> IResult<&str, Expression> {
    map(separated_list1(ws(char(',')), single_expr), |mut items| {
        if items.len() == 1 {
            items.remove(0)
        } else {
            Expression::Sequence(items)
        }
    })
    .parse(input)
}

fn single_expr(input: &str) -> IResult<&str, Expression> {
    or_expr(input)
}

fn or_op(input: &str) -> IResult<&str, BinaryOperator> {
    map(keyword("or"), |_| BinaryOperator::Or).parse(input)
}

fn and_op(input: &str) -> IResult<&str, BinaryOperator> {
    map(keyword("and"), |_| BinaryOperator::And).parse(input)
}

fn comparison_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        map(tag("!="), |_| BinaryOperator::NotEquals),
        map(tag("="), |_| BinaryOperator::Equals),
        map(tag("<="), |_| BinaryOperator::LessThanOrEqual),
        map(tag(">="), |_| BinaryOperator::GreaterThanOrEqual),
        map(tag("<"), |_| BinaryOperator::LessThan),
        map(tag(">"), |_| BinaryOperator::GreaterThan),
    ))
    .parse(input)
}

fn additive_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        map(char('+'), |_| BinaryOperator::Plus),
        map(char('-'), |_| BinaryOperator::Minus),
    ))
    .parse(input)
}

fn multiplicative_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        map(char('*'), |_| BinaryOperator::Multiply),
        map(keyword("div"), |_| BinaryOperator::Divide),
        map(keyword("mod"), |_| BinaryOperator::Modulo),
    ))
    .parse(input)
}

fn or_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(and_expr, or_op)(input)
}

fn and_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(comparison_expr, and_op)(input)
}

fn comparison_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(range_expr, comparison_op)(input)
}

fn range_expr(input: &str) -> IResult<&str, Expression> {
    let (i, start) = additive_expr(input)?;
    let (i, end) = opt(preceded(ws(keyword("to")), additive_expr)).parse(i)?;
    let expr = match end {
        Some(end) => Expression::Range(Box::new(start), Box::new(end)),
        None => start,
    };
    Ok((i, expr))
}

fn additive_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(multiplicative_expr, additive_op)(input)
}

fn multiplicative_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(unary_expr, multiplicative_op)(input)
}

fn unary_expr(input: &str) -> IResult<&str, Expression> {
    let (i, negations) = many0(ws(char('-'))).parse(input)?;
    let (i, expr) = path_expr(i)?;

    if negations.len() % 2 == 1 {
        Ok((
            i,
            Expression::UnaryOp {
                op: UnaryOperator::Minus,
                expr: Box::new(expr),
            },
        ))
    } else {
        Ok((i, expr))
    }
}

/// Primary expressions are tried before relative paths so that a function
/// call such as `position()` is not mistaken for a step.
fn path_expr(input: &str) -> IResult<&str, Expression> {
    ws(alt((rooted_path, primary_with_steps, relative_path))).parse(input)
}

fn rooted_path(input: &str) -> IResult<&str, Expression> {
    let (i, _) = char('/').parse(input)?;
    let (i, steps) = opt(relative_steps).parse(i)?;
    Ok((
        i,
        Expression::Path(PathExpr {
            start: PathStart::Root,
            steps: steps.unwrap_or_default(),
        }),
    ))
}

fn primary_with_steps(input: &str) -> IResult<&str, Expression> {
    let (i, primary) = primary_expr(input)?;
    let (i, steps) = many0(preceded(ws(char('/')), step)).parse(i)?;
    if steps.is_empty() {
        return Ok((i, primary));
    }
    Ok((
        i,
        Expression::Path(PathExpr {
            start: PathStart::Expr(Box::new(primary)),
            steps,
        }),
    ))
}

fn relative_path(input: &str) -> IResult<&str, Expression> {
    let (i, steps) = relative_steps(input)?;
    let is_context_item = matches!(
        steps.as_slice(),
        [Step { axis: Axis::SelfAxis, test: NodeTest::Node, predicates }] if predicates.is_empty()
    );
    if is_context_item {
        return Ok((i, Expression::ContextItem));
    }
    Ok((
        i,
        Expression::Path(PathExpr {
            start: PathStart::Context,
            steps,
        }),
    ))
}

fn relative_steps(input: &str) -> IResult<&str, Vec<Step>> {
    separated_list1(ws(char('/')), step).parse(input)
}

fn primary_expr(input: &str) -> IResult<&str, Expression> {
    alt((
        variable_reference,
        map(number_literal, Expression::Number),
        map(string_literal, Expression::Literal),
        function_call,
        map(
            delimited(ws(char('(')), opt(sequence_expr), ws(char(')'))),
            |inner| inner.unwrap_or(Expression::Sequence(vec![])),
        ),
    ))
    .parse(input)
}

// --- Literal Parsers ---

fn number_literal(input: &str) -> IResult<&str, f64> {
    map_res(
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
        str::parse::<f64>,
    )
    .parse(input)
}

/// A quoted string; the quote character is escaped by doubling it.
fn string_literal(input: &str) -> IResult<&str, String> {
    let quote = match input.chars().next() {
        Some(q @ ('"' | '\'')) => q,
        _ => return Err(nom::Err::Error(Error::new(input, ErrorKind::Char))),
    };
    let mut out = String::new();
    let mut rest = &input[1..];
    loop {
        let Some(idx) = rest.find(quote) else {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::Char)));
        };
        out.push_str(&rest[..idx]);
        rest = &rest[idx + 1..];
        if rest.starts_with(quote) {
            out.push(quote);
            rest = &rest[1..];
        } else {
            return Ok((rest, out));
        }
    }
}

// --- Variable Reference Parser ---

fn variable_reference(input: &str) -> IResult<&str, Expression> {
    map(preceded(char('$'), q_name), |(prefix, local)| {
        Expression::Variable(QualifiedName::new(prefix, local, ""))
    })
    .parse(input)
}

// --- Name and NodeTest Parsers ---

fn nc_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(is_name_char),
    ))
    .parse(input)
}

fn q_name(input: &str) -> IResult<&str, (Option<&str>, &str)> {
    map(pair(nc_name, opt(preceded(char(':'), nc_name))), |(first, second)| match second {
        Some(local) => (Some(first), local),
        None => (None, first),
    })
    .parse(input)
}

fn empty_parens(input: &str) -> IResult<&str, ()> {
    map(pair(ws(char('(')), char(')')), |_| ()).parse(input)
}

fn kind_test(input: &str) -> IResult<&str, NodeTest> {
    alt((
        map(terminated(tag("node"), empty_parens), |_| NodeTest::Node),
        map(terminated(tag("text"), empty_parens), |_| NodeTest::Text),
        map(terminated(tag("cdata"), empty_parens), |_| NodeTest::Cdata),
        map(terminated(tag("comment"), empty_parens), |_| NodeTest::Comment),
        map(
            delimited(
                pair(tag("processing-instruction"), ws(char('('))),
                opt(ws(string_literal)),
                char(')'),
            ),
            NodeTest::Pi,
        ),
    ))
    .parse(input)
}

pub(crate) fn node_test(input: &str) -> IResult<&str, NodeTest> {
    alt((
        kind_test,
        map(terminated(nc_name, tag(":*")), |prefix: &str| NodeTest::NamespaceWildcard {
            prefix: prefix.to_string(),
            uri: String::new(),
        }),
        map(preceded(tag("*:"), nc_name), |local: &str| {
            NodeTest::LocalWildcard(local.to_string())
        }),
        map(char('*'), |_| NodeTest::Wildcard),
        map(q_name, |(prefix, local)| {
            NodeTest::Name(QualifiedName::new(prefix, local, ""))
        }),
    ))
    .parse(input)
}

// --- Step Parsers ---

fn axis(input: &str) -> IResult<&str, Axis> {
    map(
        terminated(
            alt((
                tag("ancestor-or-self"),
                tag("ancestor"),
                tag("parent"),
                tag("self"),
                tag("attribute"),
            )),
            tag("::"),
        ),
        |axis_str: &str| match axis_str {
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "ancestor" => Axis::Ancestor,
            "parent" => Axis::Parent,
            "attribute" => Axis::Attribute,
            _ => Axis::SelfAxis,
        },
    )
    .parse(input)
}

fn predicate(input: &str) -> IResult<&str, Expression> {
    delimited(ws(char('[')), sequence_expr, ws(char(']'))).parse(input)
}

fn step(input: &str) -> IResult<&str, Step> {
    let (i, (axis, test)) = alt((
        map(tag(".."), |_| (Axis::Parent, NodeTest::Node)),
        map(char('.'), |_| (Axis::SelfAxis, NodeTest::Node)),
        map(preceded(char('@'), node_test), |test| (Axis::Attribute, test)),
        pair(axis, node_test),
    ))
    .parse(input)?;
    let (i, predicates) = many0(predicate).parse(i)?;
    Ok((
        i,
        Step {
            axis,
            test,
            predicates,
        },
    ))
}

// --- Function Call Parser ---

fn function_call(input: &str) -> IResult<&str, Expression> {
    let (i, (prefix, local)) = q_name(input)?;
    let (i, _) = peek(ws(char('('))).parse(i)?;

    // Kind tests look like calls but belong to steps.
    if prefix.is_none() && matches!(local, "node" | "text" | "cdata" | "comment" | "processing-instruction") {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Verify)));
    }
    let name = match prefix {
        Some(prefix) => format!("{}:{}", prefix, local),
        None => local.to_string(),
    };

    let (i, _) = multispace0(i)?;
    let (i, args) = delimited(
        char('('),
        separated_list0(ws(char(',')), single_expr),
        ws(char(')')),
    )
    .parse(i)?;

    Ok((i, Expression::FunctionCall { name, args }))
}

// --- Pattern Parsers ---

fn union_pattern(input: &str) -> IResult<&str, Vec<PathPattern>> {
    separated_list1(ws(char('|')), ws(path_pattern)).parse(input)
}

fn separator(input: &str) -> IResult<&str, Separator> {
    alt((
        map(tag("//"), |_| Separator::Descendant),
        map(tag("/"), |_| Separator::Child),
    ))
    .parse(input)
}

fn pattern_step(input: &str) -> IResult<&str, (bool, NodeTest, Vec<Expression>)> {
    let (i, attribute) = opt(alt((tag("@"), tag("attribute::")))).parse(input)?;
    let (i, _) = opt(tag("child::")).parse(i)?;
    let (i, test) = node_test(i)?;
    let (i, predicates) = many0(predicate).parse(i)?;
    Ok((i, (attribute.is_some(), test, predicates)))
}

fn path_pattern(input: &str) -> IResult<&str, PathPattern> {
    let (i, lead) = opt(separator).parse(input)?;
    let (i, first) = match lead {
        Some(Separator::Child) => opt(pattern_step).parse(i)?,
        _ => map(pattern_step, Some).parse(i)?,
    };
    let Some((attribute, test, predicates)) = first else {
        return Ok((
            i,
            PathPattern {
                absolute: true,
                steps: vec![],
            },
        ));
    };

    let mut steps = vec![PatternStep {
        separator: lead.unwrap_or(Separator::Child),
        attribute,
        test,
        predicates,
    }];
    let (i, rest) = many0(pair(separator, pattern_step)).parse(i)?;
    for (separator, (attribute, test, predicates)) in rest {
        steps.push(PatternStep {
            separator,
            attribute,
            test,
            predicates,
        });
    }

    Ok((
        i,
        PathPattern {
            absolute: lead.is_some(),
            steps,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_range_and_sequence() {
        let expr = parse_expression("1 to 3").unwrap();
        assert!(matches!(expr, Expression::Range(_, _)));

        let expr = parse_expression("(1, 'a', $x)").unwrap();
        match expr {
            Expression::Sequence(items) => assert_eq!(items.len(), 3),
            other => panic!("expected sequence, got {:?}", other),
        }
    }

    #[test]
    fn keywords_do_not_split_names() {
        let expr = parse_expression("$order").unwrap();
        assert_eq!(expr, Expression::Variable(QualifiedName::local("order")));
    }

    #[test]
    fn string_literal_escapes() {
        assert_eq!(parse_expression("'it''s'").unwrap(), Expression::Literal("it's".into()));
    }

    #[test]
    fn attribute_and_parent_steps() {
        let expr = parse_expression("../@id").unwrap();
        match expr {
            Expression::Path(path) => {
                assert_eq!(path.start, PathStart::Context);
                assert_eq!(path.steps.len(), 2);
                assert_eq!(path.steps[0].axis, Axis::Parent);
                assert_eq!(path.steps[1].axis, Axis::Attribute);
            }
            other => panic!("expected path, got {:?}", other),
        }
    }

    #[test]
    fn rejects_trailing_input() {
        assert!(parse_expression("1 +").is_err());
        assert!(parse_expression("concat('a'").is_err());
    }

    #[test]
    fn pattern_shapes() {
        let alternatives = parse_pattern("a/b | //c[1] | /").unwrap();
        assert_eq!(alternatives.len(), 3);
        assert!(!alternatives[0].absolute);
        assert_eq!(alternatives[0].steps.len(), 2);
        assert!(alternatives[1].absolute);
        assert_eq!(alternatives[1].steps[0].separator, Separator::Descendant);
        assert!(alternatives[2].steps.is_empty());
    }

    #[test]
    fn node_tests() {
        assert_eq!(node_test("p:*").unwrap().1, NodeTest::NamespaceWildcard { prefix: "p".into(), uri: String::new() });
        assert_eq!(node_test("*:x").unwrap().1, NodeTest::LocalWildcard("x".into()));
        assert_eq!(node_test("processing-instruction('t')").unwrap().1, NodeTest::Pi(Some("t".into())));
        assert_eq!(node_test("text()").unwrap().1, NodeTest::Text);
    }
}
