//! Error types for rule compilation
//!
//! Rules are validated and compiled when a rule set is installed, never
//! per request. Any failure rejects the whole set.

/// Errors raised while compiling a single rule or a rule set
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Pattern could not be compiled to a matcher
    #[error("invalid url pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending pattern as supplied
        pattern: String,
        /// Underlying regex error
        #[source]
        source: regex::Error,
    },

    /// Empty url pattern
    #[error("url pattern must not be empty")]
    EmptyPattern,

    /// Status code outside 100..=599
    #[error("invalid status code: {0}")]
    InvalidStatus(u16),

    /// A rule inside a rule set failed to compile
    #[error("rule #{index} rejected: {source}")]
    InvalidRule {
        /// Position of the rule in the submitted sequence
        index: usize,
        /// Why the rule was rejected
        #[source]
        source: Box<RuleError>,
    },
}

impl RuleError {
    /// Wrap an error with the index of the rule that produced it
    #[inline]
    #[must_use]
    pub fn at(self, index: usize) -> Self {
        Self::InvalidRule {
            index,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_error_display_includes_index() {
        let err = RuleError::InvalidStatus(42).at(3);
        let msg = err.to_string();
        assert!(msg.contains("rule #3"));
        assert!(msg.contains("invalid status code: 42"));
    }

    #[test]
    fn empty_pattern_display() {
        assert_eq!(
            RuleError::EmptyPattern.to_string(),
            "url pattern must not be empty"
        );
    }
}
