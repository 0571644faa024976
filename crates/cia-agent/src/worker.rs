//! Background worker
//!
//! A single task owns the rule store, chaos controller and precognitive
//! cache. Every mutation and read goes through its inbox and is handled one
//! message at a time, so the state needs no locking. Slow work (delays,
//! upstream fetches, prefetches) is spawned off the loop.

use crate::chaos::{ChaosConfig, ChaosController};
use crate::engine;
use crate::error::ChaosError;
use crate::precognition::PrecognitiveCache;
use crate::protocol::{
    AgentEvent, Command, CommandResponse, ControlPort, Envelope, FetchReply, Pong,
    ToggleChaosPayload,
};
use crate::telemetry::TelemetrySink;
use crate::types::{AgentConfig, AgentState, NetworkRequest};
use crate::upstream::Upstream;
use cia_rules::RuleStore;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use ulid::Ulid;

/// Handles returned when a worker is spawned
pub(crate) struct SpawnedWorker {
    pub(crate) inbox: mpsc::Sender<Envelope>,
    pub(crate) ready: oneshot::Receiver<()>,
    pub(crate) task: JoinHandle<()>,
}

/// Worker state, moved into its task
struct Worker {
    id: Ulid,
    rules: RuleStore,
    chaos: ChaosController,
    cache: PrecognitiveCache,
    ports: Vec<ControlPort>,
    upstream: Arc<dyn Upstream>,
    telemetry: Arc<dyn TelemetrySink>,
    inbox: mpsc::WeakSender<Envelope>,
    started: Instant,
}

/// Spawn a fresh worker with empty state
///
/// The `ready` receiver resolves once the loop is accepting messages.
pub(crate) fn spawn(
    id: Ulid,
    config: &AgentConfig,
    upstream: Arc<dyn Upstream>,
    telemetry: Arc<dyn TelemetrySink>,
) -> SpawnedWorker {
    let (tx, rx) = mpsc::channel(config.inbox_capacity.max(1));
    let (ready_tx, ready_rx) = oneshot::channel();

    let worker = Worker {
        id,
        rules: RuleStore::new(),
        chaos: ChaosController::new(config.default_chaos_intensity, config.chaos_seed),
        cache: PrecognitiveCache::new(config.precognition_capacity, config.precognition_ttl()),
        ports: Vec::new(),
        upstream,
        telemetry,
        inbox: tx.downgrade(),
        started: Instant::now(),
    };
    let task = tokio::spawn(worker.run(rx, ready_tx));

    SpawnedWorker {
        inbox: tx,
        ready: ready_rx,
        task,
    }
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Envelope>, ready: oneshot::Sender<()>) {
        self.started = Instant::now();
        if ready.send(()).is_err() {
            tracing::debug!(worker = %self.id, "activation abandoned");
            return;
        }
        tracing::info!(worker = %self.id, "worker active");

        while let Some(envelope) = rx.recv().await {
            match envelope {
                Envelope::Request { data, port, reply } => {
                    let response = self.handle_request(data, port);
                    if reply.send(response).is_err() {
                        tracing::debug!(worker = %self.id, "caller dropped reply channel");
                    }
                }
                Envelope::Post { data } => self.handle_post(data),
                Envelope::Fetch { request, respond } => self.handle_fetch(request, respond),
                Envelope::PrefetchComplete { url, response } => {
                    let stored = self.cache.complete(&url, response);
                    tracing::debug!(worker = %self.id, %url, stored, "prefetch complete");
                }
                Envelope::Shutdown => break,
            }
        }

        tracing::info!(worker = %self.id, "worker stopped");
    }

    fn handle_request(&mut self, data: Value, port: Option<ControlPort>) -> CommandResponse {
        let command: Command = match serde_json::from_value(data) {
            Ok(command) => command,
            Err(e) => return CommandResponse::error(format!("malformed command: {e}")),
        };
        tracing::debug!(worker = %self.id, command = command.type_name(), "request");

        match command {
            Command::InitPort => match port {
                Some(port) => {
                    self.ports.push(port);
                    CommandResponse::payload(true)
                }
                None => CommandResponse::error("INIT_PORT requires a control port"),
            },
            Command::SetInterventionRules(rules) => match self.rules.replace(rules) {
                Ok(count) => CommandResponse::payload(count),
                Err(e) => self.fail(&e, "SET_INTERVENTION_RULES"),
            },
            Command::ToggleChaosMode(payload) => match self.toggle_chaos(payload) {
                Ok(config) => CommandResponse::payload(config),
                Err(e) => self.fail(&e, "TOGGLE_CHAOS_MODE"),
            },
            Command::UserActivityHint(hint) => {
                self.hint(hint.url);
                CommandResponse::Payload(Value::Null)
            }
            Command::GetAgentState => CommandResponse::payload(self.state()),
            Command::Ping(ping) => CommandResponse::payload(Pong {
                nonce: ping.nonce,
                uptime_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    fn handle_post(&mut self, data: Value) {
        let command: Command = match serde_json::from_value(data) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(worker = %self.id, "dropping malformed message: {}", e);
                return;
            }
        };

        match command {
            Command::UserActivityHint(hint) => self.hint(hint.url),
            Command::SetInterventionRules(rules) => {
                if let Err(e) = self.rules.replace(rules) {
                    self.report(&e, "SET_INTERVENTION_RULES");
                }
            }
            Command::ToggleChaosMode(payload) => {
                if let Err(e) = self.toggle_chaos(payload) {
                    self.report(&e, "TOGGLE_CHAOS_MODE");
                }
            }
            other => {
                tracing::debug!(
                    worker = %self.id,
                    command = other.type_name(),
                    "ignoring posted command that expects a reply"
                );
            }
        }
    }

    fn handle_fetch(&mut self, request: NetworkRequest, respond: FetchReply) {
        let decision = engine::decide(&request, &self.rules, &mut self.chaos, &mut self.cache);
        if let Some(event) = engine::event_for(&decision, &request) {
            self.broadcast(&event);
        }

        let upstream = Arc::clone(&self.upstream);
        tokio::spawn(async move {
            let result = engine::execute(decision, request, upstream).await;
            // Caller may have given up on the request.
            let _ = respond.send(result);
        });
    }

    fn toggle_chaos(&mut self, payload: ToggleChaosPayload) -> Result<ChaosConfig, ChaosError> {
        let config = self.chaos.configure(payload.enabled, payload.options)?;
        tracing::info!(
            worker = %self.id,
            enabled = config.enabled,
            intensity = config.intensity,
            target = %config.target,
            "chaos mode updated"
        );
        Ok(config)
    }

    fn hint(&mut self, url: String) {
        if !self.cache.should_prefetch(&url) {
            return;
        }
        let upstream = Arc::clone(&self.upstream);
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let response = match upstream.fetch(NetworkRequest::get(url.clone())).await {
                Ok(response) => Some(response),
                Err(e) => {
                    tracing::debug!(%url, "prefetch failed: {}", e);
                    None
                }
            };
            if let Some(inbox) = inbox.upgrade() {
                let _ = inbox.send(Envelope::PrefetchComplete { url, response }).await;
            }
        });
    }

    fn broadcast(&mut self, event: &AgentEvent) {
        tracing::debug!(
            worker = %self.id,
            event = event.name(),
            url = %event.report().url,
            "intervention"
        );
        let payload = serde_json::to_value(event.report()).unwrap_or(Value::Null);
        self.telemetry.log_event(event.name(), &payload);

        let id = self.id;
        self.ports.retain(|port| match port.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!(worker = %id, event = event.name(), "push port full, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    fn state(&mut self) -> AgentState {
        let pruned = self.cache.prune_expired();
        if pruned > 0 {
            tracing::debug!(worker = %self.id, pruned, "dropped stale precognitive entries");
        }
        AgentState {
            chaos_mode: self.chaos.is_enabled(),
            rule_count: self.rules.len(),
            precognition_cache_size: self.cache.len(),
        }
    }

    fn report(&self, error: &(dyn std::error::Error + 'static), context: &str) {
        tracing::warn!(worker = %self.id, context, "command failed: {}", error);
        self.telemetry.log_error(error, context);
    }

    fn fail(&self, error: &(dyn std::error::Error + 'static), context: &str) -> CommandResponse {
        self.report(error, context);
        CommandResponse::error(error.to_string())
    }
}
