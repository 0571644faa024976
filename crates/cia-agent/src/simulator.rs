//! Traffic simulator
//!
//! Drives a full agent (lifecycle, worker, command channel) with a seeded mix
//! of page traffic against a synthetic upstream, then checks the outcomes
//! against the installed rules and chaos settings.

use crate::chaos::{ChaosOptions, ChaosTarget};
use crate::client::AgentClient;
use crate::error::{AgentError, NetworkError};
use crate::lifecycle::AgentLifecycle;
use crate::types::{AgentConfig, AgentState, NetworkRequest, NetworkResponse, ResponseSource};
use crate::upstream::Upstream;
use async_trait::async_trait;
use cia_rules::{InterventionAction, InterventionRule, RuleStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

/// Request mix the simulator draws from
pub const TRAFFIC: &[(&str, &str)] = &[
    ("GET", "/api/users"),
    ("GET", "/api/orders/17"),
    ("POST", "/api/orders"),
    ("GET", "/static/app.js"),
    ("GET", "/static/site.css"),
    ("GET", "/images/logo.png"),
    ("GET", "/index.html"),
];

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for traffic and chaos
    pub seed: u64,
    /// Requests to issue
    pub requests: usize,
    /// Chaos intensity; zero leaves chaos disabled
    pub intensity: f64,
    /// Chaos target class
    pub target: ChaosTarget,
    /// Rules installed before traffic starts
    pub rules: Vec<InterventionRule>,
    /// URLs hinted for prefetch before traffic starts
    pub prefetch: Vec<String>,
    /// Agent settings
    pub agent: AgentConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            requests: 1_000,
            intensity: 0.1,
            target: ChaosTarget::Api,
            rules: Vec::new(),
            prefetch: Vec::new(),
            agent: AgentConfig::default(),
        }
    }
}

/// Outcome check that did not hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Request position in the run
    pub request_index: usize,
    /// Request URL
    pub url: String,
    /// What went wrong
    pub details: String,
}

/// Final report from the simulator
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorReport {
    /// Seed used
    pub seed: u64,
    /// Requests issued
    pub total_requests: usize,
    /// Responses by provenance
    pub by_source: BTreeMap<String, usize>,
    /// Responses by status
    pub by_status: BTreeMap<u16, usize>,
    /// Failed requests (injected network errors)
    pub network_errors: usize,
    /// Pushed events by name
    pub events: BTreeMap<String, usize>,
    /// Agent state at the end of the run
    pub final_state: AgentState,
    /// Outcome checks that failed
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Check if the run satisfied every outcome check
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Events pushed under `name`
    #[must_use]
    pub fn event_count(&self, name: &str) -> usize {
        self.events.get(name).copied().unwrap_or(0)
    }

    /// Generate a text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Intervention Simulator Report ===\n\n");
        let _ = writeln!(report, "Seed: {}", self.seed);
        let _ = writeln!(report, "Requests: {}", self.total_requests);
        let _ = writeln!(report, "Network Errors: {}", self.network_errors);
        let _ = writeln!(report, "Rules Installed: {}", self.final_state.rule_count);
        let _ = writeln!(report, "Chaos Mode: {}", self.final_state.chaos_mode);
        let _ = writeln!(
            report,
            "Precognitive Entries: {}",
            self.final_state.precognition_cache_size
        );

        report.push_str("\n--- Responses by source ---\n");
        for (source, count) in &self.by_source {
            let _ = writeln!(report, "  {source}: {count}");
        }
        report.push_str("\n--- Responses by status ---\n");
        for (status, count) in &self.by_status {
            let _ = writeln!(report, "  {status}: {count}");
        }
        report.push_str("\n--- Events ---\n");
        for (name, count) in &self.events {
            let _ = writeln!(report, "  {name}: {count}");
        }

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. #{} {}: {}", i + 1, v.request_index, v.url, v.details);
            }
        }

        let _ = write!(
            report,
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        report
    }
}

/// Upstream answering every request with `200 ok:<url>`
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticUpstream;

#[async_trait]
impl Upstream for SyntheticUpstream {
    async fn fetch(&self, request: NetworkRequest) -> Result<NetworkResponse, NetworkError> {
        Ok(NetworkResponse::ok(format!("ok:{}", request.url)))
    }
}

/// Run the simulator
///
/// # Errors
/// Agent start failures and rejected rules or chaos settings.
pub async fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport, AgentError> {
    let agent_config = config.agent.clone().with_chaos_seed(config.seed);
    let lifecycle = Arc::new(AgentLifecycle::new(agent_config, Arc::new(SyntheticUpstream)));
    let client = lifecycle.client();
    client.start().await?;

    let result = drive(&client, &config).await;
    client.stop().await;
    result
}

async fn drive(client: &AgentClient, config: &SimulatorConfig) -> Result<SimulatorReport, AgentError> {
    let mut expected = RuleStore::new();
    expected
        .replace(config.rules.clone())
        .map_err(|e| AgentError::Command(e.to_string()))?;

    client.task_set_intervention_rules(config.rules.clone()).await?;
    if config.intensity > 0.0 {
        client
            .task_enable_chaos_mode(
                true,
                ChaosOptions::new()
                    .with_intensity(config.intensity)
                    .with_target(config.target),
            )
            .await?;
    }
    warm_cache(client, &config.prefetch).await?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut by_source = BTreeMap::new();
    let mut by_status = BTreeMap::new();
    let mut network_errors = 0;
    let mut events = BTreeMap::new();
    let mut violations = Vec::new();

    for index in 0..config.requests {
        let (method, url) = TRAFFIC[rng.random_range(0..TRAFFIC.len())];
        let request = NetworkRequest::new(method, url);
        let cached = request.is_get() && config.prefetch.iter().any(|p| p == url);
        let rule = expected.first_match(url).map(|hit| hit.rule.action().clone());

        let outcome = client.fetch(request).await;
        if let Some(details) = check_outcome(cached, rule.as_ref(), config.intensity, &outcome) {
            violations.push(Violation {
                request_index: index,
                url: url.to_string(),
                details,
            });
        }

        match outcome {
            Ok(response) => {
                let source = serde_json::to_value(response.source)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                *by_source.entry(source).or_insert(0) += 1;
                *by_status.entry(response.status).or_insert(0) += 1;
            }
            Err(_) => network_errors += 1,
        }

        // Drain per request so the bounded push port never drops events.
        while let Some(event) = client.try_next_event() {
            *events.entry(event.name().to_string()).or_insert(0) += 1;
        }
    }

    let final_state = client.query_get_agent_state().await?;
    if final_state.rule_count != config.rules.len() {
        violations.push(Violation {
            request_index: config.requests,
            url: String::new(),
            details: format!(
                "agent reports {} rules, {} installed",
                final_state.rule_count,
                config.rules.len()
            ),
        });
    }

    Ok(SimulatorReport {
        seed: config.seed,
        total_requests: config.requests,
        by_source,
        by_status,
        network_errors,
        events,
        final_state,
        violations,
    })
}

async fn warm_cache(client: &AgentClient, urls: &[String]) -> Result<(), AgentError> {
    for url in urls {
        client.hint_prefetch_resource(url.clone());
    }
    for _ in 0..200 {
        if client.query_get_agent_state().await?.precognition_cache_size >= urls.len() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    tracing::warn!(expected = urls.len(), "precognitive cache did not fill");
    Ok(())
}

fn check_outcome(
    cached: bool,
    rule: Option<&InterventionAction>,
    intensity: f64,
    outcome: &Result<NetworkResponse, NetworkError>,
) -> Option<String> {
    if cached {
        return match outcome {
            Ok(response) if response.source == ResponseSource::Precognition => None,
            other => Some(format!("prefetched resource not served from cache: {other:?}")),
        };
    }
    match (rule, outcome) {
        (Some(_), Err(e)) => Some(format!("chaos fault on rule-matched request: {e}")),
        (Some(InterventionAction::SetStatus(code)), Ok(response)) if response.status != *code => {
            Some(format!("expected status {code}, got {}", response.status))
        }
        (None, Err(_)) if intensity <= 0.0 => Some("fault injected with chaos disabled".to_string()),
        (None, Ok(response)) if intensity <= 0.0 && response.status != 200 => {
            Some(format!("unexpected status {} with chaos disabled", response.status))
        }
        _ => None,
    }
}
