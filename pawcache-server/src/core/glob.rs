//! Redis-compatible glob patterns
//!
//! Supports the syntax accepted by `KEYS` and `SCAN MATCH`:
//! - `*` matches any run of characters (including none)
//! - `?` matches exactly one character
//! - `[abc]`, `[a-z]` and `[^a]` character classes
//! - `\x` matches `x` literally
//!
//! The in-memory store uses the compiled pattern both to narrow its scan to
//! the trie subtree under [`GlobPattern::literal_prefix`] and to test each
//! candidate key.

use super::error::{CacheError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyRun,
    AnyOne,
    Class {
        negated: bool,
        ranges: Vec<(char, char)>,
    },
}

impl Token {
    fn matches_char(&self, ch: char) -> bool {
        match self {
            Token::Literal(c) => *c == ch,
            Token::AnyOne => true,
            Token::Class { negated, ranges } => {
                ranges.iter().any(|(lo, hi)| *lo <= ch && ch <= *hi) != *negated
            }
            Token::AnyRun => false,
        }
    }
}

/// A compiled glob pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    source: String,
    tokens: Vec<Token>,
}

impl GlobPattern {
    /// Compile a pattern, rejecting unterminated classes and dangling escapes
    pub fn compile(pattern: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut chars = pattern.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    // Consecutive stars collapse into one
                    if tokens.last() != Some(&Token::AnyRun) {
                        tokens.push(Token::AnyRun);
                    }
                }
                '?' => tokens.push(Token::AnyOne),
                '\\' => match chars.next() {
                    Some(escaped) => tokens.push(Token::Literal(escaped)),
                    None => {
                        return Err(CacheError::InvalidPattern(format!(
                            "dangling escape at end of '{}'",
                            pattern
                        )));
                    }
                },
                '[' => {
                    let negated = chars.peek() == Some(&'^');
                    if negated {
                        chars.next();
                    }

                    let mut ranges = Vec::new();
                    let mut closed = false;

                    while let Some(c) = chars.next() {
                        match c {
                            ']' => {
                                closed = true;
                                break;
                            }
                            '\\' => {
                                let escaped = chars.next().ok_or_else(|| {
                                    CacheError::InvalidPattern(format!(
                                        "dangling escape in class of '{}'",
                                        pattern
                                    ))
                                })?;
                                ranges.push((escaped, escaped));
                            }
                            start => {
                                let mut lookahead = chars.clone();
                                match (lookahead.next(), lookahead.next()) {
                                    (Some('-'), Some(end)) if end != ']' => {
                                        chars.next();
                                        chars.next();
                                        if start <= end {
                                            ranges.push((start, end));
                                        } else {
                                            ranges.push((end, start));
                                        }
                                    }
                                    _ => ranges.push((start, start)),
                                }
                            }
                        }
                    }

                    if !closed {
                        return Err(CacheError::InvalidPattern(format!(
                            "unterminated character class in '{}'",
                            pattern
                        )));
                    }
                    if ranges.is_empty() {
                        return Err(CacheError::InvalidPattern(format!(
                            "empty character class in '{}'",
                            pattern
                        )));
                    }

                    tokens.push(Token::Class { negated, ranges });
                }
                c => tokens.push(Token::Literal(c)),
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            tokens,
        })
    }

    /// The pattern text as given to [`GlobPattern::compile`]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check whether `text` matches the whole pattern
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let (mut t, mut p) = (0, 0);
        // Position after the last star and the text index it is currently absorbing up to
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            if let Some(token) = self.tokens.get(p) {
                if *token == Token::AnyRun {
                    backtrack = Some((p + 1, t));
                    p += 1;
                    continue;
                }
                if token.matches_char(text[t]) {
                    p += 1;
                    t += 1;
                    continue;
                }
            }

            match backtrack {
                Some((star_p, star_t)) => {
                    p = star_p;
                    t = star_t + 1;
                    backtrack = Some((star_p, star_t + 1));
                }
                None => return false,
            }
        }

        self.tokens[p..].iter().all(|token| *token == Token::AnyRun)
    }

    /// Literal characters before the first wildcard
    pub fn literal_prefix(&self) -> String {
        self.tokens
            .iter()
            .map_while(|token| match token {
                Token::Literal(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    /// True when the pattern contains no wildcard at all
    pub fn is_literal(&self) -> bool {
        self.tokens
            .iter()
            .all(|token| matches!(token, Token::Literal(_)))
    }
}

/// Escape glob metacharacters so `value` only ever matches itself
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
