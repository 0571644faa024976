//! Intervention rules
//!
//! Wire shape (JSON):
//!
//! ```json
//! { "urlPattern": "/api/users", "action": "SET_STATUS", "value": 500 }
//! { "urlPattern": "*.css", "action": "DELAY", "value": 1500 }
//! { "urlPattern": "re:/api/.*", "action": "REPLACE_BODY", "value": {"ok": false}, "status": 200 }
//! ```

use crate::error::RuleError;
use crate::pattern::UrlPattern;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};

/// Action tag as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    /// Defer the real response
    Delay,
    /// Synthetic response with only a status code
    SetStatus,
    /// Synthetic body, original status unless overridden
    ReplaceBody,
}

impl ActionKind {
    /// Wire name of the action
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delay => "DELAY",
            Self::SetStatus => "SET_STATUS",
            Self::ReplaceBody => "REPLACE_BODY",
        }
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action with its payload
#[derive(Debug, Clone, PartialEq)]
pub enum InterventionAction {
    /// Delay in milliseconds
    Delay(u64),
    /// Status code
    SetStatus(u16),
    /// Replacement body (strings are served verbatim, other JSON is serialized)
    ReplaceBody(Value),
}

impl InterventionAction {
    /// Wire tag for this action
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Delay(_) => ActionKind::Delay,
            Self::SetStatus(_) => ActionKind::SetStatus,
            Self::ReplaceBody(_) => ActionKind::ReplaceBody,
        }
    }

    /// Payload in wire form
    #[must_use]
    pub fn value(&self) -> Value {
        match self {
            Self::Delay(ms) => Value::from(*ms),
            Self::SetStatus(code) => Value::from(*code),
            Self::ReplaceBody(body) => body.clone(),
        }
    }
}

/// A URL-pattern-to-action mapping installed by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RuleWire", into = "RuleWire")]
pub struct InterventionRule {
    /// Pattern source (substring, glob or `re:` regex)
    pub url_pattern: String,
    /// What to do with matching requests
    pub action: InterventionAction,
    /// Status override for `REPLACE_BODY`
    pub status: Option<u16>,
}

impl InterventionRule {
    /// Create a rule
    #[inline]
    #[must_use]
    pub fn new(url_pattern: impl Into<String>, action: InterventionAction) -> Self {
        Self {
            url_pattern: url_pattern.into(),
            action,
            status: None,
        }
    }

    /// `DELAY` rule
    #[inline]
    #[must_use]
    pub fn delay(url_pattern: impl Into<String>, millis: u64) -> Self {
        Self::new(url_pattern, InterventionAction::Delay(millis))
    }

    /// `SET_STATUS` rule
    #[inline]
    #[must_use]
    pub fn set_status(url_pattern: impl Into<String>, status: u16) -> Self {
        Self::new(url_pattern, InterventionAction::SetStatus(status))
    }

    /// `REPLACE_BODY` rule
    #[inline]
    #[must_use]
    pub fn replace_body(url_pattern: impl Into<String>, body: impl Into<Value>) -> Self {
        Self::new(url_pattern, InterventionAction::ReplaceBody(body.into()))
    }

    /// With status override
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Validate and compile the pattern
    ///
    /// # Errors
    /// Pattern compilation failures and status codes outside 100..=599.
    pub fn compile(self) -> Result<CompiledRule, RuleError> {
        if let InterventionAction::SetStatus(code) = self.action {
            check_status(code)?;
        }
        if let Some(code) = self.status {
            check_status(code)?;
        }
        let pattern = UrlPattern::compile(&self.url_pattern)?;
        Ok(CompiledRule {
            rule: self,
            pattern,
        })
    }
}

fn check_status(code: u16) -> Result<(), RuleError> {
    if (100..=599).contains(&code) {
        Ok(())
    } else {
        Err(RuleError::InvalidStatus(code))
    }
}

/// Rule with its matcher compiled
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: InterventionRule,
    pattern: UrlPattern,
}

impl CompiledRule {
    /// Test a URL against the rule's pattern
    #[inline]
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        self.pattern.matches(url)
    }

    /// Source rule
    #[inline]
    #[must_use]
    pub fn rule(&self) -> &InterventionRule {
        &self.rule
    }

    /// Rule action
    #[inline]
    #[must_use]
    pub fn action(&self) -> &InterventionAction {
        &self.rule.action
    }

    /// Compiled pattern
    #[inline]
    #[must_use]
    pub fn pattern(&self) -> &UrlPattern {
        &self.pattern
    }
}

/// Flat wire form of [`InterventionRule`]
#[doc(hidden)]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleWire {
    url_pattern: String,
    action: ActionKind,
    #[serde(default)]
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
}

/// Payload did not fit the action
#[derive(Debug, thiserror::Error)]
#[error("{action} expects {expected}, got {got}")]
pub struct RuleShapeError {
    action: ActionKind,
    expected: &'static str,
    got: Value,
}

impl TryFrom<RuleWire> for InterventionRule {
    type Error = RuleShapeError;

    fn try_from(wire: RuleWire) -> Result<Self, Self::Error> {
        let shape_error = |expected| RuleShapeError {
            action: wire.action,
            expected,
            got: wire.value.clone(),
        };
        let action = match wire.action {
            ActionKind::Delay => InterventionAction::Delay(
                wire.value
                    .as_u64()
                    .ok_or_else(|| shape_error("milliseconds as a non-negative integer"))?,
            ),
            ActionKind::SetStatus => InterventionAction::SetStatus(
                wire.value
                    .as_u64()
                    .and_then(|v| u16::try_from(v).ok())
                    .ok_or_else(|| shape_error("a status code"))?,
            ),
            ActionKind::ReplaceBody => InterventionAction::ReplaceBody(wire.value.clone()),
        };
        Ok(Self {
            url_pattern: wire.url_pattern,
            action,
            status: wire.status,
        })
    }
}

impl From<InterventionRule> for RuleWire {
    fn from(rule: InterventionRule) -> Self {
        Self {
            url_pattern: rule.url_pattern,
            action: rule.action.kind(),
            value: rule.action.value(),
            status: rule.status,
        }
    }
}
