//! CIA Rules
//!
//! Intervention rules for the causal intervention agent.
//!
//! # Overview
//!
//! - **InterventionRule**: URL pattern → action (`DELAY`, `SET_STATUS`, `REPLACE_BODY`)
//! - **UrlPattern**: substring, glob or `re:` regex matcher compiled at install time
//! - **RuleStore**: ordered, whole-replace container with first-match-wins lookup
//!
//! # Example
//!
//! ```rust
//! use cia_rules::{InterventionAction, InterventionRule, RuleStore};
//!
//! let mut store = RuleStore::new();
//! store
//!     .replace(vec![
//!         InterventionRule::set_status("/api/users", 500),
//!         InterventionRule::delay("/api", 250),
//!     ])
//!     .unwrap();
//!
//! let hit = store.first_match("https://app.local/api/users").unwrap();
//! assert_eq!(hit.rule.action(), &InterventionAction::SetStatus(500));
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod pattern;
pub mod rule;
pub mod store;

// Re-exports
pub use error::RuleError;
pub use pattern::{PatternKind, UrlPattern};
pub use rule::{ActionKind, CompiledRule, InterventionAction, InterventionRule, RuleShapeError};
pub use store::{RuleMatch, RuleStore};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for rule handling
    pub use crate::{
        ActionKind, CompiledRule, InterventionAction, InterventionRule, RuleError, RuleStore,
        UrlPattern,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
