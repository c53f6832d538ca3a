//! Glob-style key patterns used to route objects to tables.
//!
//! `*` matches any run of characters (including `/`), `?` matches exactly one
//! character, and everything else is literal. Matching is case-sensitive and
//! anchored at both ends. A leading `/` is ignored on both the pattern and the
//! key, so `/landing/*.csv` matches `landing/a.csv`.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Longest pattern accepted at load time
pub const MAX_PATTERN_LEN: usize = 1024;

/// Most wildcards (`*` and `?` combined) accepted in one pattern
pub const MAX_WILDCARDS: usize = 64;

/// Compiled program size cap handed to the regex builder
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Errors raised while compiling a pattern
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("pattern is {len} characters long (limit {max})")]
    TooLong {
        pattern: String,
        len: usize,
        max: usize,
    },

    #[error("pattern has {count} wildcards (limit {max})")]
    TooManyWildcards {
        pattern: String,
        count: usize,
        max: usize,
    },

    #[error("pattern does not compile: {source}")]
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },
}

impl PatternError {
    /// The pattern text that was rejected
    pub fn pattern(&self) -> &str {
        match self {
            PatternError::TooLong { pattern, .. }
            | PatternError::TooManyWildcards { pattern, .. }
            | PatternError::InvalidRegex { pattern, .. } => pattern,
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    /// Empty pattern or a lone `*`
    Any,
    /// No wildcards at all
    Exact(String),
    /// Literal followed by a single trailing `*`
    Prefix(String),
    /// Anything else; the literal prefix is checked before the regex
    Glob { literal_prefix: String, regex: Regex },
}

/// A pattern compiled once at load time and reused for every key
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    matcher: Matcher,
}

impl CompiledPattern {
    /// Compile a pattern, enforcing the complexity limits
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        if pattern.len() > MAX_PATTERN_LEN {
            return Err(PatternError::TooLong {
                pattern: pattern.to_string(),
                len: pattern.len(),
                max: MAX_PATTERN_LEN,
            });
        }

        let wildcards = pattern.chars().filter(|c| *c == '*' || *c == '?').count();
        if wildcards > MAX_WILDCARDS {
            return Err(PatternError::TooManyWildcards {
                pattern: pattern.to_string(),
                count: wildcards,
                max: MAX_WILDCARDS,
            });
        }

        let body = normalize(pattern);
        let literal_prefix: String = body.chars().take_while(|c| *c != '*' && *c != '?').collect();

        let matcher = if body.is_empty() || body == "*" {
            Matcher::Any
        } else if wildcards == 0 {
            Matcher::Exact(body.to_string())
        } else if wildcards == 1 && body.ends_with('*') {
            Matcher::Prefix(literal_prefix)
        } else {
            let regex = RegexBuilder::new(&glob_to_regex(body))
                .dot_matches_new_line(true)
                .size_limit(REGEX_SIZE_LIMIT)
                .dfa_size_limit(REGEX_SIZE_LIMIT)
                .build()
                .map_err(|e| PatternError::InvalidRegex {
                    pattern: pattern.to_string(),
                    source: e,
                })?;
            Matcher::Glob {
                literal_prefix,
                regex,
            }
        };

        Ok(Self {
            source: pattern.to_string(),
            matcher,
        })
    }

    /// Check whether a key matches this pattern
    pub fn matches(&self, key: &str) -> bool {
        let key = normalize(key);
        match &self.matcher {
            Matcher::Any => true,
            Matcher::Exact(literal) => key == literal,
            Matcher::Prefix(prefix) => key.starts_with(prefix.as_str()),
            Matcher::Glob {
                literal_prefix,
                regex,
            } => key.starts_with(literal_prefix.as_str()) && regex.is_match(key),
        }
    }

    /// The pattern as configured
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// One-shot match. A pattern that fails to compile matches nothing.
pub fn matches(key: &str, pattern: &str) -> bool {
    CompiledPattern::new(pattern)
        .map(|compiled| compiled.matches(key))
        .unwrap_or(false)
}

fn normalize(value: &str) -> &str {
    value.trim_start_matches('/')
}

fn glob_to_regex(body: &str) -> String {
    let mut out = String::with_capacity(body.len() * 2 + 2);
    out.push('^');
    let mut literal = [0u8; 4];
    for c in body.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut literal))),
        }
    }
    out.push('$');
    out
}
