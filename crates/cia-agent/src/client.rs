//! Caller-side control module
//!
//! Each [`AgentClient`] is one caller context. Request/response commands get
//! a private `oneshot` return path per call. Hints are posted without a
//! reply. A long-lived push port is attached lazily on the first
//! request/response command and receives intervention events.

use crate::chaos::{ChaosConfig, ChaosOptions};
use crate::error::{AgentError, NetworkError};
use crate::lifecycle::{AgentLifecycle, WorkerController};
use crate::protocol::{
    AgentEvent, Command, ControlPort, Envelope, HintPayload, PingPayload, Pong,
    ToggleChaosPayload,
};
use crate::types::{AgentState, NetworkRequest, NetworkResponse};
use cia_rules::InterventionRule;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use ulid::Ulid;

struct ClientInner {
    lifecycle: Arc<AgentLifecycle>,
    port_tx: ControlPort,
    port_rx: Mutex<mpsc::Receiver<AgentEvent>>,
    /// Worker the push port is attached to
    port_worker: Mutex<Option<Ulid>>,
}

/// Handle used by feature code to drive the agent
///
/// Clones share the same push port.
#[derive(Clone)]
pub struct AgentClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentClient")
            .field("lifecycle", &self.inner.lifecycle)
            .finish_non_exhaustive()
    }
}

impl AgentClient {
    /// Create a caller context bound to `lifecycle`
    #[must_use]
    pub fn new(lifecycle: Arc<AgentLifecycle>) -> Self {
        let (port_tx, port_rx) = mpsc::channel(lifecycle.config().event_port_capacity.max(1));
        Self {
            inner: Arc::new(ClientInner {
                lifecycle,
                port_tx,
                port_rx: Mutex::new(port_rx),
                port_worker: Mutex::new(None),
            }),
        }
    }

    /// Start the agent
    ///
    /// # Errors
    /// See [`AgentLifecycle::start`].
    pub async fn start(&self) -> Result<(), AgentError> {
        self.inner.lifecycle.start().await
    }

    /// Stop the agent and detach the push port
    pub async fn stop(&self) {
        self.inner.lifecycle.stop().await;
        *self.inner.port_worker.lock().await = None;
    }

    /// Whether the agent is running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.lifecycle.is_active()
    }

    /// Replace the installed rules
    ///
    /// Returns the installed count.
    ///
    /// # Errors
    /// `AgentError::Command` if any rule is invalid (previous rules stay),
    /// plus the channel errors of [`send_command`](Self::send_command).
    pub async fn task_set_intervention_rules(
        &self,
        rules: Vec<InterventionRule>,
    ) -> Result<usize, AgentError> {
        self.request(Command::SetInterventionRules(rules)).await
    }

    /// Replace chaos-mode configuration
    ///
    /// # Errors
    /// `AgentError::Command` for an intensity outside [0, 1].
    pub async fn task_enable_chaos_mode(
        &self,
        enabled: bool,
        options: ChaosOptions,
    ) -> Result<ChaosConfig, AgentError> {
        self.request(Command::ToggleChaosMode(ToggleChaosPayload { enabled, options }))
            .await
    }

    /// Suggest a resource to prefetch
    ///
    /// Best effort: never waits, never fails. Dropped when the agent is not
    /// active or its inbox is full.
    pub fn hint_prefetch_resource(&self, url: impl Into<String>) {
        let Some(controller) = self.inner.lifecycle.controller() else {
            tracing::debug!("hint dropped: agent not active");
            return;
        };
        let command = Command::UserActivityHint(HintPayload { url: url.into() });
        let data = match command.to_value() {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!("hint dropped: {}", e);
                return;
            }
        };
        if let Err(e) = controller.inbox.try_send(Envelope::Post { data }) {
            tracing::debug!("hint dropped: {}", e);
        }
    }

    /// Current agent state
    ///
    /// # Errors
    /// Channel errors of [`send_command`](Self::send_command).
    pub async fn query_get_agent_state(&self) -> Result<AgentState, AgentError> {
        self.request(Command::GetAgentState).await
    }

    /// Round-trip a nonce through the worker
    ///
    /// # Errors
    /// Channel errors of [`send_command`](Self::send_command).
    pub async fn ping(&self, nonce: u64) -> Result<Pong, AgentError> {
        self.request(Command::Ping(PingPayload { nonce })).await
    }

    /// Send a raw command and wait for its reply payload
    ///
    /// # Errors
    /// - `AgentError::NotActive` when no worker is attached (nothing is sent)
    /// - `AgentError::Command` when the worker answers `{error}`
    /// - `AgentError::WorkerTerminated` when the worker goes away first
    /// - `AgentError::Timeout` when a command timeout is configured and elapses
    pub async fn send_command(&self, data: Value) -> Result<Value, AgentError> {
        let context = data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();
        let result = self.send_raw(data).await;
        if let Err(e) = &result {
            self.inner.lifecycle.telemetry().log_error(e, &context);
        }
        result
    }

    /// Issue a request through the agent
    ///
    /// Goes straight to the upstream when the agent is not active or its
    /// worker disappears before answering.
    ///
    /// # Errors
    /// Upstream failures, and `NetworkError::Injected` for chaos faults.
    pub async fn fetch(&self, request: NetworkRequest) -> Result<NetworkResponse, NetworkError> {
        let upstream = Arc::clone(self.inner.lifecycle.upstream());
        let Some(controller) = self.inner.lifecycle.controller() else {
            return upstream.fetch(request).await;
        };

        let (respond, rx) = oneshot::channel();
        let envelope = Envelope::Fetch {
            request: request.clone(),
            respond,
        };
        if controller.inbox.send(envelope).await.is_err() {
            tracing::debug!(url = %request.url, "worker gone, fetching directly");
            return upstream.fetch(request).await;
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(url = %request.url, "worker dropped request, fetching directly");
                upstream.fetch(request).await
            }
        }
    }

    /// Wait for the next pushed event
    ///
    /// Returns `None` only if the port is closed.
    pub async fn next_event(&self) -> Option<AgentEvent> {
        self.inner.port_rx.lock().await.recv().await
    }

    /// Next pushed event, if one is already queued
    #[must_use]
    pub fn try_next_event(&self) -> Option<AgentEvent> {
        self.inner.port_rx.try_lock().ok()?.try_recv().ok()
    }

    async fn request<T: DeserializeOwned>(&self, command: Command) -> Result<T, AgentError> {
        let data = command.to_value()?;
        let value = self.send_command(data).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn send_raw(&self, data: Value) -> Result<Value, AgentError> {
        let controller = self
            .inner
            .lifecycle
            .controller()
            .ok_or(AgentError::NotActive)?;
        self.ensure_port(&controller).await?;
        self.round_trip(&controller, data, None).await
    }

    async fn ensure_port(&self, controller: &WorkerController) -> Result<(), AgentError> {
        let mut attached = self.inner.port_worker.lock().await;
        if *attached == Some(controller.id) {
            return Ok(());
        }
        let data = Command::InitPort.to_value()?;
        self.round_trip(controller, data, Some(self.inner.port_tx.clone()))
            .await?;
        *attached = Some(controller.id);
        tracing::debug!(worker = %controller.id, "push port attached");
        Ok(())
    }

    async fn round_trip(
        &self,
        controller: &WorkerController,
        data: Value,
        port: Option<ControlPort>,
    ) -> Result<Value, AgentError> {
        let (reply, rx) = oneshot::channel();
        controller
            .inbox
            .send(Envelope::Request { data, port, reply })
            .await
            .map_err(|_| AgentError::WorkerTerminated)?;

        let received = match self.inner.lifecycle.config().command_timeout() {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| AgentError::Timeout {
                    duration_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })?,
            None => rx.await,
        };
        received
            .map_err(|_| AgentError::WorkerTerminated)?
            .into_result()
    }
}
