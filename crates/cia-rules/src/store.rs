//! Rule store
//!
//! Holds the active, ordered rule set. The set is compiled up front and
//! swapped in whole; a rejected set leaves the previous one untouched.

use crate::error::RuleError;
use crate::rule::{CompiledRule, InterventionRule};
use std::sync::Arc;

/// A rule that matched a URL, with its position in the installed order
#[derive(Debug, Clone, Copy)]
pub struct RuleMatch<'a> {
    /// Installation index
    pub index: usize,
    /// The matching rule
    pub rule: &'a CompiledRule,
}

/// Ordered, whole-replace rule container
#[derive(Debug, Clone)]
pub struct RuleStore {
    rules: Arc<[CompiledRule]>,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self {
            rules: Arc::from(Vec::new()),
        }
    }
}

impl RuleStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a rule sequence without installing it
    ///
    /// # Errors
    /// `RuleError::InvalidRule` naming the first rule that failed.
    pub fn compile_all(rules: Vec<InterventionRule>) -> Result<Arc<[CompiledRule]>, RuleError> {
        rules
            .into_iter()
            .enumerate()
            .map(|(index, rule)| rule.compile().map_err(|e| e.at(index)))
            .collect()
    }

    /// Replace the whole rule set
    ///
    /// # Errors
    /// Any rule failing to compile rejects the set; the store is unchanged.
    pub fn replace(&mut self, rules: Vec<InterventionRule>) -> Result<usize, RuleError> {
        let compiled = Self::compile_all(rules)?;
        self.rules = compiled;
        Ok(self.rules.len())
    }

    /// Drop every rule
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// First rule (in installation order) whose pattern matches `url`
    #[must_use]
    pub fn first_match(&self, url: &str) -> Option<RuleMatch<'_>> {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(url))
            .map(|(index, rule)| RuleMatch { index, rule })
    }

    /// Installed rule count
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules are installed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Immutable view of the current set
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> Arc<[CompiledRule]> {
        Arc::clone(&self.rules)
    }

    /// Source rules in installation order
    #[must_use]
    pub fn rules(&self) -> Vec<InterventionRule> {
        self.rules.iter().map(|r| r.rule().clone()).collect()
    }
}
