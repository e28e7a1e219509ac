//! The built-in function library.

use crate::error::PathError;
use crate::eval::EvalContext;
use sluice_types::{EventKind, Item, NodeRef, Value};

/// Name, minimum and maximum arity.
const FUNCTIONS: &[(&str, usize, usize)] = &[
    ("string", 0, 1),
    ("number", 0, 1),
    ("boolean", 1, 1),
    ("not", 1, 1),
    ("true", 0, 0),
    ("false", 0, 0),
    ("concat", 2, usize::MAX),
    ("string-length", 0, 1),
    ("normalize-space", 0, 1),
    ("substring", 2, 3),
    ("substring-before", 2, 2),
    ("substring-after", 2, 2),
    ("contains", 2, 2),
    ("starts-with", 2, 2),
    ("ends-with", 2, 2),
    ("upper-case", 1, 1),
    ("lower-case", 1, 1),
    ("translate", 3, 3),
    ("string-join", 1, 2),
    ("count", 1, 1),
    ("empty", 1, 1),
    ("exists", 1, 1),
    ("sum", 1, 1),
    ("round", 1, 1),
    ("floor", 1, 1),
    ("ceiling", 1, 1),
    ("name", 0, 1),
    ("local-name", 0, 1),
    ("namespace-uri", 0, 1),
    ("position", 0, 0),
    ("has-child-nodes", 0, 1),
    ("item-at", 2, 2),
    ("subsequence", 2, 3),
];

pub(crate) fn is_known(name: &str, arity: usize) -> bool {
    FUNCTIONS
        .iter()
        .any(|(n, min, max)| *n == name && (*min..=*max).contains(&arity))
}

pub(crate) fn call(name: &str, args: Vec<Value>, ctx: &EvalContext<'_>) -> Result<Value, PathError> {
    let string_arg = |i: usize| -> String {
        match args.get(i) {
            Some(v) => v.to_string_value(),
            None => ctx.context_node().map(|n| n.string_value()).unwrap_or_default(),
        }
    };

    let value = match name {
        "string" => Value::from(string_arg(0)),
        "number" => match args.first() {
            Some(v) => Value::from(v.to_number()),
            None => Value::from(ctx.context_node().map(Item::Node).map(|i| i.number_value()).unwrap_or(f64::NAN)),
        },
        "boolean" => Value::from(args[0].to_boolean()),
        "not" => Value::from(!args[0].to_boolean()),
        "true" => Value::from(true),
        "false" => Value::from(false),
        "concat" => Value::from(args.iter().map(Value::to_string_value).collect::<String>()),
        "string-length" => Value::from(string_arg(0).chars().count() as f64),
        "normalize-space" => Value::from(string_arg(0).split_whitespace().collect::<Vec<_>>().join(" ")),
        "substring" => {
            let s = string_arg(0);
            let start = args[1].to_number();
            let length = args.get(2).map(Value::to_number);
            Value::from(substring(&s, start, length))
        }
        "substring-before" => {
            let (s, pat) = (string_arg(0), string_arg(1));
            Value::from(s.find(&pat).map(|i| s[..i].to_string()).unwrap_or_default())
        }
        "substring-after" => {
            let (s, pat) = (string_arg(0), string_arg(1));
            Value::from(s.find(&pat).map(|i| s[i + pat.len()..].to_string()).unwrap_or_default())
        }
        "contains" => Value::from(string_arg(0).contains(&string_arg(1))),
        "starts-with" => Value::from(string_arg(0).starts_with(&string_arg(1))),
        "ends-with" => Value::from(string_arg(0).ends_with(&string_arg(1))),
        "upper-case" => Value::from(string_arg(0).to_uppercase()),
        "lower-case" => Value::from(string_arg(0).to_lowercase()),
        "translate" => Value::from(translate(&string_arg(0), &string_arg(1), &string_arg(2))),
        "string-join" => {
            let separator = args.get(1).map(Value::to_string_value).unwrap_or_default();
            Value::from(args[0].to_string_joined(&separator))
        }
        "count" => Value::from(args[0].len() as f64),
        "empty" => Value::from(args[0].is_empty()),
        "exists" => Value::from(!args[0].is_empty()),
        "sum" => Value::from(args[0].items().iter().map(Item::number_value).sum::<f64>()),
        "round" => map_number(&args[0], |n| (n + 0.5).floor()),
        "floor" => map_number(&args[0], f64::floor),
        "ceiling" => map_number(&args[0], f64::ceil),
        "name" | "local-name" | "namespace-uri" => {
            let node = node_arg(name, args.first(), ctx)?;
            let text = node
                .and_then(|n| n.event.name().cloned())
                .map(|qname| match name {
                    "name" => qname.qname(),
                    "local-name" => qname.local,
                    _ => qname.uri,
                })
                .unwrap_or_default();
            Value::from(text)
        }
        "position" => Value::from(ctx.position as f64),
        "has-child-nodes" => {
            let node = node_arg(name, args.first(), ctx)?;
            Value::from(node.is_some_and(|n| n.event.kind() == EventKind::Root || n.event.has_child_nodes()))
        }
        "item-at" => {
            let position = args[1].to_number();
            Value::from_items(select_range(&args[0], position, Some(1.0)))
        }
        "subsequence" => {
            let start = args[1].to_number();
            let length = args.get(2).map(Value::to_number);
            Value::from_items(select_range(&args[0], start, length))
        }
        other => {
            return Err(PathError::UnknownFunction {
                name: other.to_string(),
                arity: args.len(),
            });
        }
    };
    Ok(value)
}

fn node_arg(function: &str, arg: Option<&Value>, ctx: &EvalContext<'_>) -> Result<Option<NodeRef>, PathError> {
    match arg {
        None => Ok(ctx.context_node()),
        Some(value) => match value.first() {
            None => Ok(None),
            Some(Item::Node(node)) => Ok(Some(node.clone())),
            Some(other) => Err(PathError::function(
                function,
                format!("expected a node, found '{}'", other.string_value()),
            )),
        },
    }
}

fn map_number(value: &Value, f: impl Fn(f64) -> f64) -> Value {
    if value.is_empty() {
        return Value::empty();
    }
    Value::from(f(value.to_number()))
}

/// Items at rounded positions `[start, start + length)`. Any NaN bound
/// selects nothing, for both `item-at` and `subsequence`.
fn select_range(sequence: &Value, start: f64, length: Option<f64>) -> Vec<Item> {
    let start = (start + 0.5).floor();
    let end = length.map(|l| start + (l + 0.5).floor());
    sequence
        .items()
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            let p = (*i + 1) as f64;
            p >= start && end.is_none_or(|end| p < end)
        })
        .map(|(_, item)| item.clone())
        .collect()
}

fn substring(s: &str, start: f64, length: Option<f64>) -> String {
    let start = (start + 0.5).floor();
    let end = length.map(|l| start + (l + 0.5).floor());
    s.chars()
        .enumerate()
        .filter(|(i, _)| {
            let p = (*i + 1) as f64;
            p >= start && end.is_none_or(|end| p < end)
        })
        .map(|(_, c)| c)
        .collect()
}

fn translate(s: &str, from: &str, to: &str) -> String {
    let to: Vec<char> = to.chars().collect();
    s.chars()
        .filter_map(|c| match from.chars().position(|f| f == c) {
            Some(i) => to.get(i).copied(),
            None => Some(c),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::NoVariables;

    fn numbers(ns: &[f64]) -> Value {
        Value::from_items(ns.iter().map(|n| Item::Number(*n)).collect())
    }

    fn run(name: &str, args: Vec<Value>) -> Value {
        call(name, args, &EvalContext::new(&[], 3, &NoVariables)).unwrap()
    }

    #[test]
    fn nan_positions_select_nothing() {
        let seq = numbers(&[1.0, 2.0, 3.0]);
        assert!(run("item-at", vec![seq.clone(), Value::from(f64::NAN)]).is_empty());
        assert!(run("subsequence", vec![seq.clone(), Value::from(f64::NAN)]).is_empty());
        assert!(run("subsequence", vec![seq, Value::from(1.0), Value::from(f64::NAN)]).is_empty());
    }

    #[test]
    fn positional_selection() {
        let seq = numbers(&[10.0, 20.0, 30.0]);
        assert_eq!(run("item-at", vec![seq.clone(), Value::from(2.0)]).to_number(), 20.0);
        assert!(run("item-at", vec![seq.clone(), Value::from(4.0)]).is_empty());
        assert_eq!(
            run("subsequence", vec![seq, Value::from(2.0), Value::from(5.0)]).to_string_joined(","),
            "20,30"
        );
    }

    #[test]
    fn string_functions() {
        assert_eq!(run("substring", vec!["12345".into(), Value::from(1.5), Value::from(2.6)]).to_string_value(), "234");
        assert_eq!(run("translate", vec!["bar".into(), "abc".into(), "AB".into()]).to_string_value(), "BAr");
        assert_eq!(run("normalize-space", vec!["  a   b ".into()]).to_string_value(), "a b");
        assert_eq!(run("substring-after", vec!["key=value".into(), "=".into()]).to_string_value(), "value");
        assert_eq!(run("position", vec![]).to_number(), 3.0);
    }
}
