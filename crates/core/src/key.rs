//! Object key derivation
//!
//! Tiered files are addressed by a randomly generated identifier, optionally
//! rewritten through a user-configured template before it becomes the remote
//! object key.

use uuid::Uuid;

use crate::error::{Error, Result};

/// Generate a fresh random blob key.
pub fn new_blob_key() -> String {
    Uuid::new_v4().to_string()
}

/// A key template compiled once from the `key_template` configuration
/// property.
///
/// Template text is literal except for the `{{.}}` directive, which is
/// replaced by the raw key: `prefix/{{.}}` turns `abc` into `prefix/abc`.
/// Malformed templates are rejected at compile time so a backend is never
/// constructed with a template that can fail later; rendering itself is
/// deterministic and infallible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    text: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Key,
}

impl KeyTemplate {
    pub fn compile(text: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut rest = text;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                parts.push(Part::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                return Err(Error::Config(format!(
                    "key template {text:?}: unclosed directive"
                )));
            };
            let directive = after[..end].trim();
            if directive != "." {
                return Err(Error::Config(format!(
                    "key template {text:?}: unknown directive {directive:?}"
                )));
            }
            parts.push(Part::Key);
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }
        Ok(Self {
            text: text.to_string(),
            parts,
        })
    }

    /// The original template text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Render the final object key for a raw key.
    pub fn render(&self, key: &str) -> String {
        let mut out = String::with_capacity(self.text.len() + key.len());
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Key => out.push_str(key),
            }
        }
        out
    }
}

/// Apply an optional template to a raw key. Without a template the raw key
/// is used verbatim.
pub fn format_key(key: &str, template: Option<&KeyTemplate>) -> String {
    match template {
        Some(t) => t.render(key),
        None => key.to_string(),
    }
}
