//! Trace URL templates
//!
//! Operators configure a URL template such as
//! `https://tracing.example.com/trace/{{.TraceID}}` which is compiled once at
//! startup and rendered for every pipeline that carries a trace id.

use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while compiling or rendering a template
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unterminated placeholder starting at byte {0}")]
    Unterminated(usize),

    #[error("empty placeholder at byte {0}")]
    EmptyPlaceholder(usize),

    #[error("template refers to unknown variable {0:?}")]
    MissingVariable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A compiled `{{.Name}}`-style URL template
#[derive(Debug, Clone)]
pub struct UrlTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl UrlTemplate {
    /// Parses a template, rejecting malformed placeholders
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }

            let after_open = &rest[start + 2..];
            let end = after_open
                .find("}}")
                .ok_or(TemplateError::Unterminated(offset + start))?;

            let inner = after_open[..end].trim();
            let name = inner.strip_prefix('.').unwrap_or(inner).trim();
            if name.is_empty() {
                return Err(TemplateError::EmptyPlaceholder(offset + start));
            }
            segments.push(Segment::Variable(name.to_string()));

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Renders the template with the given variables
    pub fn execute(&self, vars: &BTreeMap<&str, &str>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => {
                    let value = vars
                        .get(name.as_str())
                        .ok_or_else(|| TemplateError::MissingVariable(name.clone()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

/// Renders trace links from an optional configured template
#[derive(Debug, Clone, Default)]
pub struct TraceLinker {
    template: Option<UrlTemplate>,
}

impl TraceLinker {
    /// Builds a linker; an absent or blank template disables trace links
    pub fn new(template: Option<&str>) -> Result<Self, TemplateError> {
        let template = match template.map(str::trim) {
            Some(source) if !source.is_empty() => Some(UrlTemplate::compile(source)?),
            _ => None,
        };
        Ok(Self { template })
    }

    pub fn is_enabled(&self) -> bool {
        self.template.is_some()
    }

    /// Trace URL for a trace id, or an empty string when unavailable
    ///
    /// Render failures are logged and yield an empty string; the error text
    /// never ends up in the link.
    pub fn trace_url(&self, trace_id: &str) -> String {
        let Some(template) = &self.template else {
            return String::new();
        };
        if trace_id.is_empty() {
            return String::new();
        }

        let vars = BTreeMap::from([("TraceID", trace_id)]);
        match template.execute(&vars) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(
                    template = template.source(),
                    trace_id,
                    "Failed to render trace URL: {}",
                    e
                );
                String::new()
            }
        }
    }
}
