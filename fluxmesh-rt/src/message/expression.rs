//! Path expressions addressing slots inside an envelope.
//!
//! Expressions use the `source[:path]` form, e.g. `previous`,
//! `input.payload:foo.bar`, `user_properties:key`. The optional `input.`
//! prefix is accepted and ignored. Evaluation is total: a missing path
//! yields `Value::Null`, never an error. Parsing happens once, at
//! configuration time.

// Layer 1: Standard library imports
use std::fmt;
use std::str::FromStr;

// Layer 2: Third-party crate imports
use serde_json::{Map, Value};
use thiserror::Error;

// Layer 3: Internal module imports
use super::envelope::Envelope;

/// Expression parse failure. Evaluation itself never fails.
#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("unknown expression source: {0}")]
    UnknownSource(String),

    #[error("expression source {0} cannot be written to")]
    NotWritable(String),

    #[error("empty expression")]
    Empty,
}

/// One step into a nested value: an object key or a list index.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Vec<PathSegment> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<usize>() {
            Ok(i) => PathSegment::Index(i),
            Err(_) => PathSegment::Key(s.to_string()),
        })
        .collect()
}

fn get_path<'a>(mut value: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    for segment in path {
        value = match (value, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get(key)?,
            // Numeric segments index lists, but fall back to string keys
            // so maps with numeric keys stay addressable.
            (Value::Array(list), PathSegment::Index(i)) => list.get(*i)?,
            (Value::Object(map), PathSegment::Index(i)) => map.get(&i.to_string())?,
            _ => return None,
        };
    }
    Some(value)
}

fn set_path(root: &mut Value, path: &[PathSegment], new_value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *root = new_value;
        return;
    };
    if !root.is_object() && !root.is_array() {
        *root = Value::Object(Map::new());
    }
    match (root, head) {
        (Value::Object(map), PathSegment::Key(key)) => {
            set_path(map.entry(key.clone()).or_insert(Value::Null), rest, new_value);
        }
        (Value::Object(map), PathSegment::Index(i)) => {
            set_path(map.entry(i.to_string()).or_insert(Value::Null), rest, new_value);
        }
        (Value::Array(list), PathSegment::Index(i)) => {
            if *i >= list.len() {
                list.resize(*i + 1, Value::Null);
            }
            set_path(&mut list[*i], rest, new_value);
        }
        (root @ Value::Array(_), PathSegment::Key(_)) => {
            // A key into a list replaces the list with an object.
            *root = Value::Object(Map::new());
            set_path(root, path, new_value);
        }
        _ => {}
    }
}

fn remove_path(root: &mut Value, path: &[PathSegment]) {
    let Some((last, parents)) = path.split_last() else {
        *root = Value::Null;
        return;
    };
    let Some(parent) = get_path_mut(root, parents) else {
        return;
    };
    match (parent, last) {
        (Value::Object(map), PathSegment::Key(key)) => {
            map.remove(key);
        }
        (Value::Object(map), PathSegment::Index(i)) => {
            map.remove(&i.to_string());
        }
        (Value::Array(list), PathSegment::Index(i)) => {
            if *i < list.len() {
                list.remove(*i);
            }
        }
        _ => {}
    }
}

fn get_path_mut<'a>(mut value: &'a mut Value, path: &[PathSegment]) -> Option<&'a mut Value> {
    for segment in path {
        value = match (value, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get_mut(key)?,
            (Value::Array(list), PathSegment::Index(i)) => list.get_mut(*i)?,
            (Value::Object(map), PathSegment::Index(i)) => map.get_mut(&i.to_string())?,
            _ => return None,
        };
    }
    Some(value)
}

/// The envelope slot an expression reads from or writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Payload,
    Topic,
    UserProperties,
    UserData,
    Previous,
}

impl Slot {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "payload" => Some(Slot::Payload),
            "topic" => Some(Slot::Topic),
            "user_properties" => Some(Slot::UserProperties),
            "user_data" => Some(Slot::UserData),
            "previous" => Some(Slot::Previous),
            _ => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Slot::Payload => "payload",
            Slot::Topic => "topic",
            Slot::UserProperties => "user_properties",
            Slot::UserData => "user_data",
            Slot::Previous => "previous",
        };
        write!(f, "{name}")
    }
}

/// A parsed, read-only path expression.
///
/// Keeps the text it was parsed from, so an expression can travel through
/// envelope data (e.g. a request's `previous` stamp) and be re-parsed on
/// the other side.
#[derive(Debug, Clone)]
pub struct SourceExpression {
    repr: Repr,
    raw: String,
}

impl fmt::Display for SourceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[derive(Debug, Clone)]
enum Repr {
    /// Read from an envelope slot, optionally descending a dotted path.
    Slot { slot: Slot, path: Vec<PathSegment> },
    /// A literal value (`static:...`).
    Static(Value),
    /// A string template with embedded `{{expr}}` substitutions.
    Template(Vec<TemplatePart>),
}

#[derive(Debug, Clone)]
enum TemplatePart {
    Literal(String),
    Expr(Box<SourceExpression>),
}

impl SourceExpression {
    /// The default input selection: the previous component's output.
    pub fn previous() -> Self {
        SourceExpression {
            repr: Repr::Slot {
                slot: Slot::Previous,
                path: Vec::new(),
            },
            raw: "previous".to_string(),
        }
    }

    /// Evaluate against an envelope. Missing paths yield `Value::Null`.
    pub fn evaluate(&self, env: &Envelope) -> Value {
        match &self.repr {
            Repr::Slot { slot, path } => {
                let topic_value;
                let props_value;
                let data_value;
                let root: &Value = match slot {
                    Slot::Payload => env.payload(),
                    Slot::Previous => env.previous(),
                    Slot::Topic => {
                        topic_value = Value::String(env.topic().to_string());
                        &topic_value
                    }
                    Slot::UserProperties => {
                        props_value = Value::Object(env.user_properties().clone());
                        &props_value
                    }
                    Slot::UserData => {
                        data_value = Value::Object(env.user_data().clone());
                        &data_value
                    }
                };
                get_path(root, path).cloned().unwrap_or(Value::Null)
            }
            Repr::Static(value) => value.clone(),
            Repr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Literal(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => match expr.evaluate(env) {
                            Value::String(s) => out.push_str(&s),
                            Value::Null => {}
                            other => out.push_str(&other.to_string()),
                        },
                    }
                }
                Value::String(out)
            }
        }
    }

    fn parse_template(text: &str) -> Result<Repr, ExpressionError> {
        let mut parts = Vec::new();
        let mut rest = text;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                parts.push(TemplatePart::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                parts.push(TemplatePart::Literal(rest[start..].to_string()));
                rest = "";
                break;
            };
            let expr = after[..end].trim().parse::<SourceExpression>()?;
            parts.push(TemplatePart::Expr(Box::new(expr)));
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            parts.push(TemplatePart::Literal(rest.to_string()));
        }
        Ok(Repr::Template(parts))
    }

    fn parse_repr(raw: &str) -> Result<Repr, ExpressionError> {
        let (source, path) = match raw.split_once(':') {
            Some((source, path)) => (source.trim(), Some(path)),
            None => (raw, None),
        };

        if source == "static" {
            let text = path.unwrap_or_default();
            let value = match serde_json::from_str(text) {
                Ok(v) => v,
                Err(_) => Value::String(text.to_string()),
            };
            return Ok(Repr::Static(value));
        }
        if source == "template" {
            return Self::parse_template(path.unwrap_or_default());
        }

        // `input.payload` and `payload` address the same slot. A dotted
        // remainder without a colon (`previous.foo`) is also accepted.
        let source = source.strip_prefix("input.").unwrap_or(source);
        let (slot_name, inline_path) = match source.split_once('.') {
            Some((head, rest)) if Slot::parse(head).is_some() => (head, Some(rest)),
            _ => (source, None),
        };
        let slot =
            Slot::parse(slot_name).ok_or_else(|| ExpressionError::UnknownSource(raw.to_string()))?;

        let mut segments = Vec::new();
        if let Some(inline) = inline_path {
            segments.extend(parse_path(inline));
        }
        if let Some(p) = path {
            segments.extend(parse_path(p));
        }
        Ok(Repr::Slot { slot, path: segments })
    }
}

impl FromStr for SourceExpression {
    type Err = ExpressionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ExpressionError::Empty);
        }
        Ok(SourceExpression {
            repr: Self::parse_repr(raw)?,
            raw: raw.to_string(),
        })
    }
}

/// A parsed, writable path expression.
///
/// Only `payload`, `topic`, `user_properties`, `user_data` and `previous`
/// can be written; `static`/`template` sources are rejected at parse time.
#[derive(Debug, Clone)]
pub struct DestExpression {
    slot: Slot,
    path: Vec<PathSegment>,
}

impl DestExpression {
    pub(crate) fn assign(&self, env: &mut Envelope, value: Value) {
        match self.slot {
            Slot::Topic => {
                if let Value::String(s) = value {
                    env.set_topic(s);
                } else {
                    env.set_topic(value.to_string());
                }
            }
            Slot::Payload => {
                let mut root = env.payload().clone();
                set_path(&mut root, &self.path, value);
                env.set_payload(root);
            }
            Slot::Previous => {
                let mut root = env.previous().clone();
                set_path(&mut root, &self.path, value);
                env.set_previous(root);
            }
            Slot::UserProperties => {
                let mut root = Value::Object(env.user_properties().clone());
                set_path(&mut root, &self.path, value);
                if let Value::Object(map) = root {
                    env.set_user_properties(map);
                }
            }
            Slot::UserData => {
                let mut root = Value::Object(env.user_data().clone());
                set_path(&mut root, &self.path, value);
                if let Value::Object(map) = root {
                    *env.user_data_mut() = map;
                }
            }
        }
    }

    pub(crate) fn remove(&self, env: &mut Envelope) {
        match self.slot {
            Slot::Topic => env.set_topic(""),
            Slot::Payload => {
                let mut root = env.payload().clone();
                remove_path(&mut root, &self.path);
                env.set_payload(root);
            }
            Slot::Previous => {
                let mut root = env.previous().clone();
                remove_path(&mut root, &self.path);
                env.set_previous(root);
            }
            Slot::UserProperties => {
                let mut root = Value::Object(env.user_properties().clone());
                remove_path(&mut root, &self.path);
                if let Value::Object(map) = root {
                    env.set_user_properties(map);
                }
            }
            Slot::UserData => {
                let mut root = Value::Object(env.user_data().clone());
                remove_path(&mut root, &self.path);
                if let Value::Object(map) = root {
                    *env.user_data_mut() = map;
                }
            }
        }
    }
}

impl FromStr for DestExpression {
    type Err = ExpressionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().parse::<SourceExpression>()?.repr {
            Repr::Slot { slot, path } => Ok(DestExpression { slot, path }),
            _ => Err(ExpressionError::NotWritable(raw.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn envelope() -> Envelope {
        let mut env = Envelope::new(
            json!({"foo": {"bar": 42}, "items": [1, 2, 3]}),
            "orders/new",
            serde_json::from_value(json!({"trace": "abc"})).unwrap(),
        );
        env.set_previous(json!({"content": "hello"}));
        env
    }

    fn eval(expr: &str, env: &Envelope) -> Value {
        expr.parse::<SourceExpression>().unwrap().evaluate(env)
    }

    #[test]
    fn payload_paths() {
        let env = envelope();
        assert_eq!(eval("input.payload:foo.bar", &env), json!(42));
        assert_eq!(eval("payload:foo.bar", &env), json!(42));
        assert_eq!(eval("payload:items.1", &env), json!(2));
        assert_eq!(eval("payload:missing.deep", &env), Value::Null);
    }

    #[test]
    fn bare_and_dotted_sources() {
        let env = envelope();
        assert_eq!(eval("previous", &env), json!({"content": "hello"}));
        assert_eq!(eval("previous.content", &env), json!("hello"));
        assert_eq!(eval("input.topic", &env), json!("orders/new"));
        assert_eq!(eval("user_properties:trace", &env), json!("abc"));
    }

    #[test]
    fn static_and_template() {
        let env = envelope();
        assert_eq!(eval("static:42", &env), json!(42));
        assert_eq!(eval("static:plain text", &env), json!("plain text"));
        assert_eq!(
            eval("template:topic={{input.topic}} bar={{payload:foo.bar}}", &env),
            json!("topic=orders/new bar=42")
        );
    }

    #[test]
    fn unknown_source_is_a_parse_error() {
        assert!("bogus:path".parse::<SourceExpression>().is_err());
        assert!("".parse::<SourceExpression>().is_err());
    }

    #[test]
    fn display_preserves_the_raw_expression() {
        for raw in [
            "previous",
            "input.payload:foo.bar",
            "user_properties:streaming.last_message",
            "template:v={{payload:foo.bar}}",
        ] {
            let expr: SourceExpression = raw.parse().unwrap();
            assert_eq!(expr.to_string(), raw);
            // The printed form parses back to an equivalent expression.
            let env = envelope();
            let reparsed: SourceExpression = expr.to_string().parse().unwrap();
            assert_eq!(reparsed.evaluate(&env), expr.evaluate(&env));
        }
        assert_eq!(SourceExpression::previous().to_string(), "previous");
    }

    #[test]
    fn dest_assignment_creates_intermediates() {
        let mut env = envelope();
        let dest: DestExpression = "user_data:a.b.c".parse().unwrap();
        env.set_data(&dest, json!(7));
        assert_eq!(eval("user_data:a.b.c", &env), json!(7));

        let dest: DestExpression = "payload:foo.new".parse().unwrap();
        env.set_data(&dest, json!("added"));
        assert_eq!(eval("payload:foo.new", &env), json!("added"));
        assert_eq!(eval("payload:foo.bar", &env), json!(42));
    }

    #[test]
    fn dest_remove() {
        let mut env = envelope();
        let dest: DestExpression = "payload:foo.bar".parse().unwrap();
        env.remove_data(&dest);
        assert_eq!(eval("payload:foo.bar", &env), Value::Null);
        assert_eq!(eval("payload:items.0", &env), json!(1));
    }

    #[test]
    fn topic_assignment() {
        let mut env = envelope();
        let dest: DestExpression = "topic".parse().unwrap();
        env.set_data(&dest, json!("orders/routed"));
        assert_eq!(env.topic(), "orders/routed");
    }

    #[test]
    fn static_is_not_writable() {
        assert!("static:x".parse::<DestExpression>().is_err());
        assert!("template:x".parse::<DestExpression>().is_err());
    }
}
