//! Minimal text templates.
//!
//! A template is literal text with `{field}` placeholders. Literal braces are
//! written `{{` and `}}`. The set of fields a template may use is fixed when
//! it is parsed, so rendering cannot fail.

use std::fmt::Write as _;
use std::sync::Arc;

use thiserror::Error;

/// A template which could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// A placeholder names a field the template may not use.
    #[error("unknown template field {field:?}, expected one of: {allowed}")]
    UnknownField {
        /// The placeholder as written.
        field: String,
        /// Comma-separated permitted fields.
        allowed: String,
    },

    /// A `{` without its closing `}`.
    #[error("unclosed '{{' at byte {position} in template")]
    Unclosed {
        /// Byte offset of the opening brace.
        position: usize,
    },

    /// A lone `}` outside a placeholder.
    #[error("unmatched '}}' at byte {position} in template")]
    Unmatched {
        /// Byte offset of the brace.
        position: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A parsed template. Clones share the parsed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Arc<[Segment]>,
}

impl Template {
    /// Parse `source`, accepting only placeholders named in `allowed`.
    pub fn parse(source: &str, allowed: &[&str]) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((position, c)) = chars.next() {
            match c {
                '{' if chars.next_if(|&(_, c)| c == '{').is_some() => literal.push('{'),
                '}' if chars.next_if(|&(_, c)| c == '}').is_some() => literal.push('}'),
                '}' => return Err(TemplateError::Unmatched { position }),
                '{' => {
                    let start = position + 1;
                    let end = loop {
                        match chars.next() {
                            Some((end, '}')) => break end,
                            Some((_, '{')) | None => {
                                return Err(TemplateError::Unclosed { position });
                            }
                            Some(_) => {}
                        }
                    };

                    let field = source[start..end].trim();
                    if !allowed.contains(&field) {
                        return Err(TemplateError::UnknownField {
                            field: field.to_owned(),
                            allowed: allowed.join(", "),
                        });
                    }

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field.to_owned()));
                }
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            segments: segments.into(),
        })
    }

    /// Fill in every placeholder with `lookup(field)`.
    pub fn render<F, V>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> V,
        V: std::fmt::Display,
    {
        let mut out = String::new();
        for segment in self.segments.iter() {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(field) => {
                    // Writing into a String cannot fail.
                    let _ = write!(out, "{}", lookup(field.as_str()));
                }
            }
        }
        out
    }
}
