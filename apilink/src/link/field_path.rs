//! Structured field paths into JSON documents
//!
//! Supported syntax: `data.level`, `items[0].value`, `response['data']["level"]`.
//! A leading `response` root is accepted for older link files.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::LinkError;
use crate::transform::TransformValue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed field path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    source: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(source: &str) -> Result<Self, LinkError> {
        let invalid = |reason: &str| {
            LinkError::ConfigValidation(format!("invalid field path `{}`: {}", source, reason))
        };

        let chars: Vec<char> = source.trim().chars().collect();
        let mut segments = Vec::new();
        let mut pos = 0;

        while pos < chars.len() {
            match chars[pos] {
                '.' => {
                    if segments.is_empty() || pos + 1 >= chars.len() || !is_key_char(chars[pos + 1]) {
                        return Err(invalid("misplaced `.`"));
                    }
                    pos += 1;
                }
                '[' => {
                    pos += 1;
                    match chars.get(pos) {
                        Some(quote @ ('\'' | '"')) => {
                            let quote = *quote;
                            let start = pos + 1;
                            let end = chars[start..]
                                .iter()
                                .position(|c| *c == quote)
                                .map(|offset| start + offset)
                                .ok_or_else(|| invalid("unterminated quoted key"))?;
                            segments.push(Segment::Key(chars[start..end].iter().collect()));
                            pos = end + 1;
                        }
                        Some(_) => {
                            let start = pos;
                            while pos < chars.len() && chars[pos].is_ascii_digit() {
                                pos += 1;
                            }
                            if start == pos {
                                return Err(invalid("index must be a non-negative integer"));
                            }
                            let digits: String = chars[start..pos].iter().collect();
                            let index = digits
                                .parse::<usize>()
                                .map_err(|_| invalid("index out of range"))?;
                            segments.push(Segment::Index(index));
                        }
                        None => return Err(invalid("unterminated `[`")),
                    }
                    if chars.get(pos) != Some(&']') {
                        return Err(invalid("expected `]`"));
                    }
                    pos += 1;
                }
                c if is_key_char(c) => {
                    let after_separator = pos == 0 || chars[pos - 1] == '.';
                    if !after_separator {
                        return Err(invalid("expected `.` or `[` between segments"));
                    }
                    let start = pos;
                    while pos < chars.len() && is_key_char(chars[pos]) {
                        pos += 1;
                    }
                    segments.push(Segment::Key(chars[start..pos].iter().collect()));
                }
                c => return Err(invalid(&format!("unexpected character `{}`", c))),
            }
        }

        // Legacy configs address the document as `response[...]`
        let legacy_root = matches!(segments.first(), Some(Segment::Key(k)) if k == "response")
            && source.trim_start().starts_with("response")
            && segments.len() > 1
            && !source.trim_start().starts_with("response.");
        if legacy_root {
            segments.remove(0);
        }

        if segments.is_empty() {
            return Err(invalid("empty path"));
        }

        Ok(Self {
            source: source.trim().to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Resolve the path against `document` and turn the leaf into a raw value
    pub fn extract(&self, document: &Value) -> Result<TransformValue, LinkError> {
        let mut current = document;
        for segment in &self.segments {
            let next = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key),
                (Segment::Index(index), Value::Array(items)) => items.get(*index),
                _ => None,
            };
            current = next.ok_or_else(|| {
                LinkError::FieldNotFound(format!("`{}` has no {}", self.source, segment))
            })?;
        }

        match current {
            Value::Number(n) => n
                .as_f64()
                .map(TransformValue::Number)
                .ok_or_else(|| LinkError::FieldNotFound(format!("`{}` is not a finite number", self.source))),
            Value::String(s) => Ok(TransformValue::Text(s.clone())),
            Value::Bool(b) => Ok(TransformValue::Number(if *b { 1.0 } else { 0.0 })),
            other => Err(LinkError::FieldNotFound(format!(
                "`{}` resolved to {}, expected a number or string",
                self.source,
                type_name(other)
            ))),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, "key `{}`", key),
            Segment::Index(index) => write!(f, "index {}", index),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = LinkError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        FieldPath::parse(&source)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.source
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
