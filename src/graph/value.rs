//! Input values and attribute references.
//!
//! An input is either a literal, a reference to another node's output, a
//! template string interpolating references, or a container of those.
//! References are what create edges in the dependency graph.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A reference to a named output of another node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeReference {
    /// Id of the producing node.
    pub node_id: String,
    /// Name of the output on the producing node.
    pub output: String,
}

/// One segment of a template string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplatePart {
    /// Literal text.
    Text(String),
    /// Interpolated reference.
    Reference(AttributeReference),
}

/// A declared input value.
///
/// Two values are equal when they are structurally equal. References are
/// compared by identity, not by the value they resolve to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputValue {
    /// JSON null.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Numeric literal.
    Number(serde_json::Number),
    /// String literal.
    String(String),
    /// Ordered list.
    List(Vec<InputValue>),
    /// Key/value map with stable key order.
    Map(BTreeMap<String, InputValue>),
    /// A reference to another node's output.
    Reference(AttributeReference),
    /// A string with interpolated references.
    Template(Vec<TemplatePart>),
}

impl AttributeReference {
    /// Creates a new reference to `node_id.output`.
    #[must_use]
    pub fn new(node_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            output: output.into(),
        }
    }

    /// Parses a `node.output` expression.
    ///
    /// Everything after the first dot is the output name.
    #[must_use]
    pub fn parse(expr: &str) -> Option<Self> {
        let (node_id, output) = expr.trim().split_once('.')?;
        if node_id.is_empty() || output.is_empty() {
            return None;
        }
        Some(Self::new(node_id, output))
    }
}

impl fmt::Display for AttributeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node_id, self.output)
    }
}

impl InputValue {
    /// Creates a string literal.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    /// Creates a reference to `node_id.output`.
    #[must_use]
    pub fn reference(node_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Reference(AttributeReference::new(node_id, output))
    }

    /// Converts a declared JSON value, parsing `${node.output}` placeholders
    /// in every string it contains.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first malformed placeholder.
    pub fn from_json(value: Value) -> Result<Self, String> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => parse_template(&s)?,
            Value::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| Self::from_json(v).map(|v| (k, v)))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Returns every reference contained in this value, in document order.
    #[must_use]
    pub fn references(&self) -> Vec<&AttributeReference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a AttributeReference>) {
        match self {
            Self::Reference(r) => out.push(r),
            Self::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Reference(r) = part {
                        out.push(r);
                    }
                }
            }
            Self::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Map(map) => {
                for item in map.values() {
                    item.collect_references(out);
                }
            }
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => {}
        }
    }

    /// Resolves this value into concrete JSON.
    ///
    /// `lookup` returns the current value of a referenced output, if known.
    /// Template parts are joined; non-string outputs are rendered as JSON.
    ///
    /// # Errors
    ///
    /// Returns the first reference `lookup` could not satisfy.
    pub fn resolve<'v, F>(&self, lookup: &F) -> Result<Value, AttributeReference>
    where
        F: Fn(&AttributeReference) -> Option<&'v Value>,
    {
        Ok(match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Reference(r) => lookup(r).cloned().ok_or_else(|| r.clone())?,
            Self::Template(parts) => {
                let mut rendered = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => rendered.push_str(text),
                        TemplatePart::Reference(r) => {
                            match lookup(r).ok_or_else(|| r.clone())? {
                                Value::String(s) => rendered.push_str(s),
                                other => rendered.push_str(&other.to_string()),
                            }
                        }
                    }
                }
                Value::String(rendered)
            }
            Self::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(lookup))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| v.resolve(lookup).map(|v| (k.clone(), v)))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Reference(r) => write!(f, "${{{r}}}"),
            Self::Template(parts) => {
                write!(f, "\"")?;
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => write!(f, "{}", text.replace("${", "$${"))?,
                        TemplatePart::Reference(r) => write!(f, "${{{r}}}")?,
                    }
                }
                write!(f, "\"")
            }
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Parses a declared string into a literal, a reference or a template.
///
/// `${node.output}` is a placeholder and `$${` escapes a literal `${`.
/// A string made of exactly one placeholder becomes a plain reference so
/// the producer's output keeps its JSON type.
fn parse_template(source: &str) -> Result<InputValue, String> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut rest = source;

    while let Some(pos) = rest.find('$') {
        text.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("$${") {
            text.push_str("${");
            rest = after;
        } else if let Some(after) = tail.strip_prefix("${") {
            let end = after
                .find('}')
                .ok_or_else(|| format!("unterminated placeholder in \"{source}\""))?;
            let expr = &after[..end];
            let reference = AttributeReference::parse(expr).ok_or_else(|| {
                format!("invalid reference \"{expr}\", expected \"<resource>.<output>\"")
            })?;
            if !text.is_empty() {
                parts.push(TemplatePart::Text(std::mem::take(&mut text)));
            }
            parts.push(TemplatePart::Reference(reference));
            rest = &after[end + 1..];
        } else {
            text.push('$');
            rest = &tail[1..];
        }
    }
    text.push_str(rest);
    if !text.is_empty() {
        parts.push(TemplatePart::Text(text));
    }

    if parts.len() > 1 {
        return Ok(InputValue::Template(parts));
    }
    Ok(match parts.pop() {
        None => InputValue::String(String::new()),
        Some(TemplatePart::Text(text)) => InputValue::String(text),
        Some(TemplatePart::Reference(r)) => InputValue::Reference(r),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_string_stays_literal() {
        let value = InputValue::from_json(json!("hello $USER")).unwrap();
        assert_eq!(value, InputValue::string("hello $USER"));
    }

    #[test]
    fn test_single_placeholder_becomes_reference() {
        let value = InputValue::from_json(json!("${bucket.arn}")).unwrap();
        assert_eq!(value, InputValue::reference("bucket", "arn"));
    }

    #[test]
    fn test_template_with_surrounding_text() {
        let value = InputValue::from_json(json!("https://${cdn.domain_name}/callback")).unwrap();
        assert_eq!(
            value,
            InputValue::Template(vec![
                TemplatePart::Text("https://".into()),
                TemplatePart::Reference(AttributeReference::new("cdn", "domain_name")),
                TemplatePart::Text("/callback".into()),
            ])
        );
    }

    #[test]
    fn test_escaped_placeholder_is_literal() {
        let value = InputValue::from_json(json!("cost: $${not.a_ref}")).unwrap();
        assert_eq!(value, InputValue::string("cost: ${not.a_ref}"));
        assert!(value.references().is_empty());
    }

    #[test]
    fn test_malformed_placeholders_are_rejected() {
        assert!(InputValue::from_json(json!("${bucket.arn")).is_err());
        assert!(InputValue::from_json(json!("${bucket}")).is_err());
        assert!(InputValue::from_json(json!("${.arn}")).is_err());
    }

    #[test]
    fn test_references_found_in_nested_containers() {
        let value = InputValue::from_json(json!({
            "origins": [{"target": "${bucket.arn}"}],
            "aliases": ["${cert.domain}", "static"],
        }))
        .unwrap();

        let refs: Vec<String> = value.references().iter().map(ToString::to_string).collect();
        assert_eq!(refs, vec!["cert.domain", "bucket.arn"]);
    }

    #[test]
    fn test_resolve_joins_template_and_keeps_reference_types() {
        let outputs = json!({"domain_name": "d111.example.net", "port": 443});
        let lookup = |r: &AttributeReference| outputs.get(&r.output);

        let template =
            InputValue::from_json(json!("https://${cdn.domain_name}:${cdn.port}/")).unwrap();
        assert_eq!(
            template.resolve(&lookup).unwrap(),
            json!("https://d111.example.net:443/")
        );

        let direct = InputValue::reference("cdn", "port");
        assert_eq!(direct.resolve(&lookup).unwrap(), json!(443));
    }

    #[test]
    fn test_resolve_reports_missing_reference() {
        let outputs = json!({});
        let lookup = |r: &AttributeReference| outputs.get(&r.output);
        let value = InputValue::List(vec![InputValue::reference("bucket", "arn")]);
        assert_eq!(
            value.resolve(&lookup).unwrap_err(),
            AttributeReference::new("bucket", "arn")
        );
    }

    #[test]
    fn test_display_round_trips_placeholders() {
        let value = InputValue::from_json(json!("s3://${bucket.name}/$${literal}")).unwrap();
        assert_eq!(value.to_string(), "\"s3://${bucket.name}/$${literal}\"");
    }
}
