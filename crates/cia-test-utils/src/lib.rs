//! Testing utilities for CIA workspace
//!
//! Fake upstreams, hosts and telemetry sinks, plus agent setup helpers.

#![allow(missing_docs)]

use async_trait::async_trait;
use cia_agent::{
    AgentClient, AgentConfig, AgentLifecycle, HostError, NetworkError, NetworkRequest,
    NetworkResponse, TelemetrySink, Upstream, WorkerHost, WorkerScope,
};
use cia_rules::InterventionRule;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Upstream that records every request and answers `200 upstream:<url>`
/// unless a canned outcome is registered for the URL.
#[derive(Debug, Default)]
pub struct RecordingUpstream {
    calls: Mutex<Vec<NetworkRequest>>,
    canned: Mutex<HashMap<String, Result<NetworkResponse, NetworkError>>>,
}

impl RecordingUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, response: NetworkResponse) {
        self.canned.lock().insert(url.to_string(), Ok(response));
    }

    pub fn fail(&self, url: &str, message: &str) {
        self.canned
            .lock()
            .insert(url.to_string(), Err(NetworkError::Failed(message.to_string())));
    }

    pub fn calls(&self) -> Vec<NetworkRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|r| r.url == url).count()
    }
}

#[async_trait]
impl Upstream for RecordingUpstream {
    async fn fetch(&self, request: NetworkRequest) -> Result<NetworkResponse, NetworkError> {
        let canned = self.canned.lock().get(&request.url).cloned();
        let url = request.url.clone();
        self.calls.lock().push(request);
        canned.unwrap_or_else(|| Ok(NetworkResponse::ok(format!("upstream:{url}"))))
    }
}

/// Host without background-worker support
#[derive(Debug, Default)]
pub struct UnsupportedHost;

#[async_trait]
impl WorkerHost for UnsupportedHost {
    fn supports_background_workers(&self) -> bool {
        false
    }

    async fn register(&self, _scope: &WorkerScope) -> Result<(), HostError> {
        Err(HostError::Rejected("unsupported".to_string()))
    }

    async fn unregister(&self, _scope: &WorkerScope) -> Result<(), HostError> {
        Ok(())
    }
}

/// Host that refuses every registration
#[derive(Debug)]
pub struct RejectingHost {
    pub reason: String,
}

impl RejectingHost {
    pub fn new(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            reason: reason.to_string(),
        })
    }
}

#[async_trait]
impl WorkerHost for RejectingHost {
    fn supports_background_workers(&self) -> bool {
        true
    }

    async fn register(&self, _scope: &WorkerScope) -> Result<(), HostError> {
        Err(HostError::Rejected(self.reason.clone()))
    }

    async fn unregister(&self, _scope: &WorkerScope) -> Result<(), HostError> {
        Ok(())
    }
}

/// Host counting registrations, optionally failing unregister
#[derive(Debug, Default)]
pub struct CountingHost {
    registrations: AtomicUsize,
    unregistrations: AtomicUsize,
    fail_unregister: bool,
}

impl CountingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_unregister() -> Arc<Self> {
        Arc::new(Self {
            fail_unregister: true,
            ..Self::default()
        })
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn unregistrations(&self) -> usize {
        self.unregistrations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerHost for CountingHost {
    fn supports_background_workers(&self) -> bool {
        true
    }

    async fn register(&self, _scope: &WorkerScope) -> Result<(), HostError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unregister(&self, _scope: &WorkerScope) -> Result<(), HostError> {
        self.unregistrations.fetch_add(1, Ordering::SeqCst);
        if self.fail_unregister {
            Err(HostError::Rejected("unregister failed".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Telemetry sink keeping everything it is given
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<(String, Value)>>,
    errors: Mutex<Vec<(String, String)>>,
}

impl RecordingTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    /// `(context, message)` pairs
    pub fn errors(&self) -> Vec<(String, String)> {
        self.errors.lock().clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn log_event(&self, name: &str, payload: &Value) {
        self.events.lock().push((name.to_string(), payload.clone()));
    }

    fn log_error(&self, error: &(dyn Error + 'static), context: &str) {
        self.errors
            .lock()
            .push((context.to_string(), error.to_string()));
    }
}

/// Fully wired test agent
pub struct TestAgent {
    pub lifecycle: Arc<AgentLifecycle>,
    pub client: AgentClient,
    pub upstream: Arc<RecordingUpstream>,
    pub telemetry: Arc<RecordingTelemetry>,
}

impl TestAgent {
    /// Agent with recording upstream and telemetry, not started
    pub fn new(config: AgentConfig) -> Self {
        let upstream = RecordingUpstream::new();
        let telemetry = RecordingTelemetry::new();
        let lifecycle = Arc::new(
            AgentLifecycle::new(config, upstream.clone()).with_telemetry(telemetry.clone()),
        );
        let client = lifecycle.client();
        Self {
            lifecycle,
            client,
            upstream,
            telemetry,
        }
    }

    /// Agent with default settings and a fixed chaos seed, started
    pub async fn started() -> Self {
        let agent = Self::new(AgentConfig::default().with_chaos_seed(7));
        agent.client.start().await.unwrap();
        agent
    }

    /// Another caller context on the same agent
    pub fn second_client(&self) -> AgentClient {
        self.lifecycle.client()
    }
}

/// `/api/users` → 500, the canonical failing-endpoint rule
pub fn users_500_rule() -> InterventionRule {
    InterventionRule::set_status("/api/users", 500)
}

/// Two overlapping rules; the more specific one is installed first
pub fn overlapping_rules() -> Vec<InterventionRule> {
    vec![
        InterventionRule::set_status("/api/users", 500),
        InterventionRule::set_status("/api", 418),
    ]
}
