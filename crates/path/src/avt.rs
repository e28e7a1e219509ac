//! Attribute value templates: literal text with embedded `{expression}` parts.

use crate::ast::Expression;
use crate::error::PathError;
use crate::eval::{EvalContext, evaluate};
use crate::Namespaces;

#[derive(Debug, Clone, PartialEq)]
pub enum AvtPart {
    Literal(String),
    Expr(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Avt {
    pub parts: Vec<AvtPart>,
}

impl Avt {
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            parts: vec![AvtPart::Literal(text.into())],
        }
    }

    pub fn compile(source: &str, namespaces: &Namespaces) -> Result<Self, PathError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let end = find_closing_brace(source, i + 1)
                        .ok_or_else(|| PathError::parse(source, "unterminated '{' in attribute value template"))?;
                    if !literal.is_empty() {
                        parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(AvtPart::Expr(Expression::compile(&source[i + 1..end], namespaces)?));
                    while chars.peek().is_some_and(|(j, _)| *j <= end) {
                        chars.next();
                    }
                }
                '}' => return Err(PathError::parse(source, "unmatched '}' in attribute value template")),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() || parts.is_empty() {
            parts.push(AvtPart::Literal(literal));
        }
        Ok(Self { parts })
    }

    /// The literal text, if the template contains no expressions.
    pub fn as_literal(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [AvtPart::Literal(text)] => Some(text),
            _ => None,
        }
    }

    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<String, PathError> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                AvtPart::Literal(text) => out.push_str(text),
                AvtPart::Expr(expr) => out.push_str(&evaluate(expr, ctx)?.to_string_joined(" ")),
            }
        }
        Ok(out)
    }
}

/// Byte index of the `}` closing an expression that starts at `from`,
/// skipping braces inside string literals.
fn find_closing_brace(source: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (offset, c) in source[from..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '}') => return Some(from + offset),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::NoVariables;

    fn render(src: &str) -> String {
        let avt = Avt::compile(src, &Namespaces::new()).unwrap();
        avt.evaluate(&EvalContext::new(&[], 1, &NoVariables)).unwrap()
    }

    #[test]
    fn literal_and_expression_parts() {
        assert_eq!(render("id-{1 + 1}"), "id-2");
        assert_eq!(render("{{x}}"), "{x}");
        assert_eq!(render("{'}'}"), "}");
        assert_eq!(render("{1 to 3}"), "1 2 3");
        assert_eq!(Avt::compile("plain", &Namespaces::new()).unwrap().as_literal(), Some("plain"));
    }

    #[test]
    fn malformed_templates() {
        assert!(Avt::compile("{1", &Namespaces::new()).is_err());
        assert!(Avt::compile("a}b", &Namespaces::new()).is_err());
    }
}
