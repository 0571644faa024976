//! Interception engine
//!
//! Decision order for each outbound request:
//! 1. Precognitive cache hit (GET only) short-circuits everything else
//! 2. First matching rule, in installation order
//! 3. Chaos sampling, for requests no rule matched
//! 4. Passthrough
//!
//! Deciding is synchronous and happens on the worker loop; executing the
//! decision (delays, upstream I/O) runs off the loop.

use crate::chaos::{ChaosController, ChaosFault};
use crate::error::NetworkError;
use crate::precognition::PrecognitiveCache;
use crate::protocol::{AgentEvent, InterventionReport};
use crate::types::{NetworkRequest, NetworkResponse};
use crate::upstream::Upstream;
use chrono::Utc;
use cia_rules::{InterventionAction, RuleStore};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Fate of one intercepted request
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Serve the prefetched response
    Precognition(NetworkResponse),
    /// Apply an explicit rule
    Rule {
        /// Installation index of the rule
        index: usize,
        /// Action to apply
        action: InterventionAction,
        /// Status override for body replacement
        status: Option<u16>,
    },
    /// Inject a chaos fault
    Chaos(ChaosFault),
    /// Forward unmodified
    Passthrough,
}

impl Decision {
    /// Whether the agent alters this request
    #[inline]
    #[must_use]
    pub fn is_intervention(&self) -> bool {
        !matches!(self, Self::Passthrough)
    }
}

/// Decide what happens to `request`
pub fn decide(
    request: &NetworkRequest,
    rules: &RuleStore,
    chaos: &mut ChaosController,
    cache: &mut PrecognitiveCache,
) -> Decision {
    if request.is_get() {
        if let Some(response) = cache.take_hit(&request.url) {
            return Decision::Precognition(response);
        }
    }

    if let Some(hit) = rules.first_match(&request.url) {
        return Decision::Rule {
            index: hit.index,
            action: hit.rule.action().clone(),
            status: hit.rule.rule().status,
        };
    }

    chaos
        .sample(request.class())
        .map_or(Decision::Passthrough, Decision::Chaos)
}

/// Telemetry event for an applied intervention
#[must_use]
pub fn event_for(decision: &Decision, request: &NetworkRequest) -> Option<AgentEvent> {
    let report = |action: &str, detail: Value, rule_index: Option<usize>| InterventionReport {
        url: request.url.clone(),
        method: request.method.clone(),
        action: action.to_string(),
        detail,
        rule_index,
        at: Utc::now(),
    };

    match decision {
        Decision::Passthrough => None,
        Decision::Precognition(response) => Some(AgentEvent::PrecognitionHit(report(
            "PRECOGNITION",
            json!({"status": response.status}),
            None,
        ))),
        Decision::Rule {
            index,
            action,
            status,
        } => {
            let detail = match status {
                Some(code) => json!({"value": action.value(), "status": code}),
                None => json!({"value": action.value()}),
            };
            Some(AgentEvent::RuleIntervention(report(
                action.kind().as_str(),
                detail,
                Some(*index),
            )))
        }
        Decision::Chaos(ChaosFault::Status(code)) => Some(AgentEvent::ChaosIntervention(report(
            "CHAOS_STATUS",
            json!({"status": code}),
            None,
        ))),
        Decision::Chaos(ChaosFault::NetworkError) => Some(AgentEvent::ChaosIntervention(
            report("CHAOS_NETWORK_ERROR", Value::Null, None),
        )),
    }
}

/// Carry out a decision
///
/// # Errors
/// Upstream failures propagate; injected network faults surface as
/// `NetworkError::Injected`.
pub async fn execute(
    decision: Decision,
    request: NetworkRequest,
    upstream: Arc<dyn Upstream>,
) -> Result<NetworkResponse, NetworkError> {
    match decision {
        Decision::Precognition(response) => Ok(response),
        Decision::Passthrough => upstream.fetch(request).await,
        Decision::Rule { action, status, .. } => apply_rule(action, status, request, upstream).await,
        Decision::Chaos(ChaosFault::Status(code)) => Ok(NetworkResponse::synthetic(code)),
        Decision::Chaos(ChaosFault::NetworkError) => {
            Err(NetworkError::Injected(format!("chaos: {}", request.url)))
        }
    }
}

async fn apply_rule(
    action: InterventionAction,
    status: Option<u16>,
    request: NetworkRequest,
    upstream: Arc<dyn Upstream>,
) -> Result<NetworkResponse, NetworkError> {
    match action {
        InterventionAction::Delay(ms) => {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            upstream.fetch(request).await
        }
        InterventionAction::SetStatus(code) => Ok(NetworkResponse::synthetic(code)),
        InterventionAction::ReplaceBody(body) => {
            let code = match status {
                Some(code) => code,
                None => upstream.fetch(request).await?.status,
            };
            Ok(replacement(code, body))
        }
    }
}

fn replacement(status: u16, body: Value) -> NetworkResponse {
    match body {
        Value::String(text) => NetworkResponse::synthetic(status).with_body(text),
        other => NetworkResponse::synthetic(status)
            .with_header("content-type", "application/json")
            .with_body(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::{ChaosOptions, ChaosTarget};
    use crate::types::ResponseSource;
    use async_trait::async_trait;
    use cia_rules::InterventionRule;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingUpstream {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Upstream for CountingUpstream {
        async fn fetch(&self, request: NetworkRequest) -> Result<NetworkResponse, NetworkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(NetworkResponse::network(201, format!("real:{}", request.url)))
        }
    }

    fn parts() -> (RuleStore, ChaosController, PrecognitiveCache) {
        (
            RuleStore::new(),
            ChaosController::new(0.1, Some(9)),
            PrecognitiveCache::new(8, None),
        )
    }

    #[test]
    fn first_rule_wins() {
        let (mut rules, mut chaos, mut cache) = parts();
        rules
            .replace(vec![
                InterventionRule::set_status("/api/users", 500),
                InterventionRule::set_status("/api", 418),
            ])
            .unwrap();

        let decision = decide(&NetworkRequest::get("/api/users"), &rules, &mut chaos, &mut cache);
        assert_eq!(
            decision,
            Decision::Rule {
                index: 0,
                action: InterventionAction::SetStatus(500),
                status: None,
            }
        );
    }

    #[test]
    fn rule_preempts_chaos() {
        let (mut rules, mut chaos, mut cache) = parts();
        chaos
            .configure(true, ChaosOptions::new().with_intensity(1.0))
            .unwrap();
        rules.replace(vec![InterventionRule::delay("/api/slow", 10)]).unwrap();

        let decision = decide(&NetworkRequest::get("/api/slow"), &rules, &mut chaos, &mut cache);
        assert!(matches!(decision, Decision::Rule { index: 0, .. }));

        let decision = decide(&NetworkRequest::get("/api/other"), &rules, &mut chaos, &mut cache);
        assert!(matches!(decision, Decision::Chaos(_)));
    }

    #[test]
    fn chaos_ignores_other_target() {
        let (rules, mut chaos, mut cache) = parts();
        chaos
            .configure(
                true,
                ChaosOptions::new()
                    .with_intensity(1.0)
                    .with_target(ChaosTarget::Assets),
            )
            .unwrap();
        let decision = decide(&NetworkRequest::get("/api/users"), &rules, &mut chaos, &mut cache);
        assert_eq!(decision, Decision::Passthrough);
    }

    #[test]
    fn cache_hit_bypasses_rules_and_chaos() {
        let (mut rules, mut chaos, mut cache) = parts();
        rules.replace(vec![InterventionRule::delay("/api", 5000)]).unwrap();
        chaos
            .configure(true, ChaosOptions::new().with_intensity(1.0))
            .unwrap();
        assert!(cache.should_prefetch("/api/users"));
        cache.complete("/api/users", Some(NetworkResponse::ok("cached")));

        let decision = decide(&NetworkRequest::get("/api/users"), &rules, &mut chaos, &mut cache);
        let response = match decision {
            Decision::Precognition(response) => response,
            other => panic!("expected cache hit, got {other:?}"),
        };
        assert_eq!(response.body, "cached");
        assert_eq!(response.source, ResponseSource::Precognition);
    }

    #[test]
    fn cache_not_used_for_post() {
        let (rules, mut chaos, mut cache) = parts();
        assert!(cache.should_prefetch("/api/users"));
        cache.complete("/api/users", Some(NetworkResponse::ok("cached")));

        let decision = decide(&NetworkRequest::post("/api/users"), &rules, &mut chaos, &mut cache);
        assert_eq!(decision, Decision::Passthrough);
    }

    #[test]
    fn events_name_the_action() {
        let request = NetworkRequest::get("/api/users");
        let event = event_for(
            &Decision::Rule {
                index: 0,
                action: InterventionAction::SetStatus(500),
                status: None,
            },
            &request,
        )
        .unwrap();
        assert_eq!(event.name(), "RULE_INTERVENTION");
        assert_eq!(event.report().action, "SET_STATUS");
        assert_eq!(event.report().detail, json!({"value": 500}));

        let event = event_for(&Decision::Chaos(ChaosFault::Status(503)), &request).unwrap();
        assert_eq!(event.name(), "CHAOS_INTERVENTION");

        assert!(event_for(&Decision::Passthrough, &request).is_none());
    }

    #[tokio::test]
    async fn set_status_is_synthetic() {
        let upstream = Arc::new(CountingUpstream::default());
        let response = execute(
            Decision::Rule {
                index: 0,
                action: InterventionAction::SetStatus(500),
                status: None,
            },
            NetworkRequest::get("/api/users"),
            upstream.clone(),
        )
        .await
        .unwrap();

        assert_eq!(response.status, 500);
        assert_eq!(response.source, ResponseSource::Synthetic);
        assert!(response.body.is_empty());
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn replace_body_keeps_upstream_status() {
        let upstream = Arc::new(CountingUpstream::default());
        let response = execute(
            Decision::Rule {
                index: 0,
                action: InterventionAction::ReplaceBody(json!({"users": []})),
                status: None,
            },
            NetworkRequest::get("/api/users"),
            upstream.clone(),
        )
        .await
        .unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.body, r#"{"users":[]}"#);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn replace_body_with_status_skips_upstream() {
        let upstream = Arc::new(CountingUpstream::default());
        let response = execute(
            Decision::Rule {
                index: 0,
                action: InterventionAction::ReplaceBody(json!("maintenance")),
                status: Some(503),
            },
            NetworkRequest::get("/"),
            upstream.clone(),
        )
        .await
        .unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(response.body, "maintenance");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_defers_real_response() {
        let upstream = Arc::new(CountingUpstream::default());
        let started = tokio::time::Instant::now();
        let response = execute(
            Decision::Rule {
                index: 0,
                action: InterventionAction::Delay(1500),
                status: None,
            },
            NetworkRequest::get("/api/users"),
            upstream.clone(),
        )
        .await
        .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert_eq!(response.status, 201);
        assert_eq!(response.body, "real:/api/users");
        assert_eq!(response.source, ResponseSource::Network);
    }

    #[tokio::test]
    async fn chaos_network_error_is_injected() {
        let upstream = Arc::new(CountingUpstream::default());
        let err = execute(
            Decision::Chaos(ChaosFault::NetworkError),
            NetworkRequest::get("/api/users"),
            upstream,
        )
        .await
        .unwrap_err();
        assert!(err.is_injected());
    }
}
