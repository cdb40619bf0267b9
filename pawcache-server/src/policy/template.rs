use crate::core::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Placeholder(String),
}

/// A key or pattern template such as `user:{user}:pet:{petId}`
///
/// Placeholders are `{name}` where `name` is ASCII alphanumeric or `_`.
/// `{{` and `}}` are not supported; braces are always placeholder syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyTemplate {
    source: String,
    parts: Vec<Part>,
}

impl KeyTemplate {
    pub fn parse(source: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            CacheError::InvalidPolicy(format!("template '{}': {}", source, reason))
        };

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) if c.is_ascii_alphanumeric() || c == '_' => name.push(c),
                            Some(c) => {
                                return Err(invalid(&format!(
                                    "unexpected '{}' in placeholder",
                                    c
                                )));
                            }
                            None => return Err(invalid("unterminated placeholder")),
                        }
                    }
                    if name.is_empty() {
                        return Err(invalid("empty placeholder"));
                    }
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(Part::Placeholder(name));
                }
                '}' => return Err(invalid("unmatched '}'")),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        if parts.is_empty() {
            return Err(invalid("template is empty"));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Names of the placeholders, in order of appearance
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            Part::Placeholder(name) => Some(name.as_str()),
            Part::Literal(_) => None,
        })
    }

    /// Substitute every placeholder, or report the first one `value_of` cannot resolve
    pub fn render<F>(&self, mut value_of: F) -> std::result::Result<String, String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut rendered = String::with_capacity(self.source.len() + 16);
        for part in &self.parts {
            match part {
                Part::Literal(text) => rendered.push_str(text),
                Part::Placeholder(name) => match value_of(name) {
                    Some(value) => rendered.push_str(&value),
                    None => return Err(name.clone()),
                },
            }
        }
        Ok(rendered)
    }
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for KeyTemplate {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<KeyTemplate> for String {
    fn from(template: KeyTemplate) -> Self {
        template.source
    }
}
