// src/convert/template.rs

use super::Row;
use crate::error::TemplateError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Tokens of a pattern string: escaped braces, a placeholder, or a stray
/// brace (which makes the pattern malformed).
static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{|\}\}|\{[^{}]*\}|[{}]").expect("template token regex"));

#[derive(Debug, Clone)]
enum Segment {
    Text(String),
    Placeholder(String),
}

#[derive(Debug, Clone)]
struct CompiledTemplate {
    pattern: String,
    segments: Vec<Segment>,
}

impl CompiledTemplate {
    fn parse(pattern: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut last = 0;
        for m in TOKEN.find_iter(pattern) {
            text.push_str(&pattern[last..m.start()]);
            last = m.end();
            match m.as_str() {
                "{{" => text.push('{'),
                "}}" => text.push('}'),
                "{" | "}" | "{}" => {
                    return Err(TemplateError::Unbalanced {
                        pattern: pattern.to_string(),
                    })
                }
                token => {
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Placeholder(token[1..token.len() - 1].to_string()));
                }
            }
        }
        text.push_str(&pattern[last..]);
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(Self {
            pattern: pattern.to_string(),
            segments,
        })
    }

    fn render(&self, row: &Row, row_number: u64) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.pattern.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder(name) if name == "_row" => {
                    out.push_str(&row_number.to_string())
                }
                Segment::Placeholder(name) => match row.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(TemplateError::MissingKey {
                            pattern: self.pattern.clone(),
                            key: name.clone(),
                        })
                    }
                },
            }
        }
        Ok(out)
    }
}

/// Renders `{name}` patterns against a row's column values, plus the
/// `_row` pseudo-column carrying the observation number.
///
/// Compiled patterns are memoized for the engine's lifetime; patterns
/// repeat once per row, and recompiling each time is measurable at scale.
#[derive(Debug, Default)]
pub struct TemplateEngine {
    cache: HashMap<String, CompiledTemplate>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(
        &mut self,
        pattern: &str,
        row: &Row,
        row_number: u64,
    ) -> Result<String, TemplateError> {
        if !self.cache.contains_key(pattern) {
            let compiled = CompiledTemplate::parse(pattern)?;
            self.cache.insert(pattern.to_string(), compiled);
        }
        self.cache[pattern].render(row, row_number)
    }

    pub fn cached_patterns(&self) -> usize {
        self.cache.len()
    }
}
