//! URL pattern matchers
//!
//! A pattern string is compiled once into a [`UrlPattern`]:
//! - `re:<regex>` → regular expression, unanchored
//! - contains `*` → glob anchored to the whole URL, where `?` also matches
//!   any single character
//! - anything else → substring match, so a literal query string such as
//!   `/api/users?page=2` matches absolute URLs too

use crate::error::RuleError;
use regex::Regex;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Prefix selecting the regular expression syntax
pub const REGEX_PREFIX: &str = "re:";

/// Compiled URL matcher
#[derive(Debug, Clone)]
pub struct UrlPattern {
    source: String,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Substring(String),
    Glob(Regex),
    Regex(Regex),
}

/// Syntax a pattern was compiled from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Plain substring
    Substring,
    /// `*` glob
    Glob,
    /// `re:` regular expression
    Regex,
}

impl UrlPattern {
    /// Compile a pattern string
    ///
    /// # Errors
    /// - `RuleError::EmptyPattern` for an empty pattern
    /// - `RuleError::InvalidPattern` if the regex (or translated glob) fails to compile
    pub fn compile(pattern: &str) -> Result<Self, RuleError> {
        if pattern.is_empty() {
            return Err(RuleError::EmptyPattern);
        }

        let matcher = if let Some(expr) = pattern.strip_prefix(REGEX_PREFIX) {
            if expr.is_empty() {
                return Err(RuleError::EmptyPattern);
            }
            Matcher::Regex(Regex::new(expr).map_err(|source| RuleError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?)
        } else if pattern.contains('*') {
            let expr = glob_to_regex(pattern);
            Matcher::Glob(Regex::new(&expr).map_err(|source| RuleError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?)
        } else {
            Matcher::Substring(pattern.to_string())
        };

        Ok(Self {
            source: pattern.to_string(),
            matcher,
        })
    }

    /// Test a URL against this pattern
    #[inline]
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match &self.matcher {
            Matcher::Substring(needle) => url.contains(needle.as_str()),
            Matcher::Glob(re) | Matcher::Regex(re) => re.is_match(url),
        }
    }

    /// Original pattern text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Syntax this pattern was compiled from
    #[inline]
    #[must_use]
    pub fn kind(&self) -> PatternKind {
        match self.matcher {
            Matcher::Substring(_) => PatternKind::Substring,
            Matcher::Glob(_) => PatternKind::Glob,
            Matcher::Regex(_) => PatternKind::Regex,
        }
    }
}

impl FromStr for UrlPattern {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl Display for UrlPattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for UrlPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for UrlPattern {}

/// Translate a glob into an anchored regex
fn glob_to_regex(glob: &str) -> String {
    let mut expr = String::with_capacity(glob.len() * 2 + 2);
    expr.push('^');
    let mut literal = String::new();
    for ch in glob.chars() {
        match ch {
            '*' | '?' => {
                expr.push_str(&regex::escape(&literal));
                literal.clear();
                expr.push_str(if ch == '*' { ".*" } else { "." });
            }
            other => literal.push(other),
        }
    }
    expr.push_str(&regex::escape(&literal));
    expr.push('$');
    expr
}
