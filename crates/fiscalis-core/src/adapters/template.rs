//! `{name}` placeholder templates for endpoint paths and request bodies.

use std::collections::BTreeMap;

use crate::data_source::SourceError;
use crate::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// Parsed endpoint template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parses a path template. Every `{` must open a `{name}` placeholder.
    pub fn parse(template: &str) -> Result<Self, ValidationError> {
        Self::parse_inner(template, true)
    }

    /// Parses a body template. Braces that do not form a `{name}` placeholder
    /// are kept as literal text, so JSON bodies need no escaping.
    pub fn parse_lenient(template: &str) -> Self {
        Self::parse_inner(template, false).unwrap_or_else(|_| Self {
            source: template.to_owned(),
            segments: vec![Segment::Literal(template.to_owned())],
        })
    }

    fn parse_inner(template: &str, strict: bool) -> Result<Self, ValidationError> {
        let malformed = |reason: &str| ValidationError::MalformedTemplate {
            template: template.to_owned(),
            reason: reason.to_owned(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        while let Some(ch) = rest.chars().next() {
            match ch {
                '{' => {
                    let placeholder = rest[1..]
                        .find('}')
                        .map(|end| &rest[1..=end])
                        .filter(|name| is_placeholder_name(name));
                    match placeholder {
                        Some(name) => {
                            if !literal.is_empty() {
                                segments.push(Segment::Literal(std::mem::take(&mut literal)));
                            }
                            segments.push(Segment::Placeholder(name.to_owned()));
                            rest = &rest[name.len() + 2..];
                        }
                        None if strict => return Err(malformed("'{' must open a {name} placeholder")),
                        None => {
                            literal.push('{');
                            rest = &rest[1..];
                        }
                    }
                }
                '}' if strict => return Err(malformed("unmatched '}'")),
                _ => {
                    literal.push(ch);
                    rest = &rest[ch.len_utf8()..];
                }
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: template.to_owned(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Substitutes URL-encoded parameter values.
    pub fn render_path(&self, params: &BTreeMap<String, String>) -> Result<String, SourceError> {
        self.render(params, |value| urlencoding::encode(value).into_owned())
    }

    /// Substitutes parameter values verbatim.
    pub fn render_body(&self, params: &BTreeMap<String, String>) -> Result<String, SourceError> {
        self.render(params, str::to_owned)
    }

    fn render(
        &self,
        params: &BTreeMap<String, String>,
        encode: impl Fn(&str) -> String,
    ) -> Result<String, SourceError> {
        let mut output = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => output.push_str(text),
                Segment::Placeholder(name) => {
                    let value = params
                        .get(name)
                        .ok_or_else(|| SourceError::missing_parameter(name))?;
                    output.push_str(&encode(value));
                }
            }
        }
        Ok(output)
    }
}

fn is_placeholder_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
