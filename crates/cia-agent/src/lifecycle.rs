//! Agent lifecycle
//!
//! Registers the background worker with its host at a fixed scope, waits for
//! the worker to report itself active, and tears everything down on stop.
//! There is at most one worker per lifecycle; every start after a stop gets a
//! fresh worker with empty state.

use crate::client::AgentClient;
use crate::error::{AgentError, HostError};
use crate::protocol::Envelope;
use crate::telemetry::{TelemetrySink, TracingTelemetry};
use crate::types::AgentConfig;
use crate::upstream::Upstream;
use crate::worker;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use ulid::Ulid;

/// Validated worker scope path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerScope(String);

impl WorkerScope {
    /// Parse a scope path
    ///
    /// # Errors
    /// `HostError::InvalidScope` unless the path is absolute, free of
    /// whitespace and free of `..` segments.
    pub fn parse(raw: &str) -> Result<Self, HostError> {
        let valid = raw.starts_with('/')
            && !raw.chars().any(char::is_whitespace)
            && !raw.split('/').any(|segment| segment == "..");
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(HostError::InvalidScope(raw.to_string()))
        }
    }

    /// Scope path
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for WorkerScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The hosting runtime's background-worker registration facility
#[async_trait]
pub trait WorkerHost: Send + Sync + 'static {
    /// Whether background workers can run here at all
    fn supports_background_workers(&self) -> bool;

    /// Register a worker at `scope`
    ///
    /// # Errors
    /// `HostError` when the host refuses the registration.
    async fn register(&self, scope: &WorkerScope) -> Result<(), HostError>;

    /// Remove the registration at `scope`
    ///
    /// # Errors
    /// `HostError` when the host fails to unregister.
    async fn unregister(&self, scope: &WorkerScope) -> Result<(), HostError>;
}

/// In-process host backed by the tokio runtime
#[derive(Debug, Default)]
pub struct LocalWorkerHost;

#[async_trait]
impl WorkerHost for LocalWorkerHost {
    fn supports_background_workers(&self) -> bool {
        true
    }

    async fn register(&self, scope: &WorkerScope) -> Result<(), HostError> {
        tracing::debug!(%scope, "registered local worker");
        Ok(())
    }

    async fn unregister(&self, scope: &WorkerScope) -> Result<(), HostError> {
        tracing::debug!(%scope, "unregistered local worker");
        Ok(())
    }
}

/// Live connection to the current worker
#[derive(Debug, Clone)]
pub(crate) struct WorkerController {
    pub(crate) id: Ulid,
    pub(crate) inbox: mpsc::Sender<Envelope>,
}

struct Registration {
    scope: WorkerScope,
    id: Ulid,
    task: JoinHandle<()>,
}

/// Starts, stops and reports on the background worker
pub struct AgentLifecycle {
    config: AgentConfig,
    host: Arc<dyn WorkerHost>,
    upstream: Arc<dyn Upstream>,
    telemetry: Arc<dyn TelemetrySink>,
    registration: Mutex<Option<Registration>>,
    registered: AtomicBool,
    controller: RwLock<Option<WorkerController>>,
}

impl fmt::Debug for AgentLifecycle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentLifecycle")
            .field("config", &self.config)
            .field("registered", &self.registered.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl AgentLifecycle {
    /// Create lifecycle on the local host
    #[must_use]
    pub fn new(config: AgentConfig, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            config,
            host: Arc::new(LocalWorkerHost),
            upstream,
            telemetry: Arc::new(TracingTelemetry),
            registration: Mutex::new(None),
            registered: AtomicBool::new(false),
            controller: RwLock::new(None),
        }
    }

    /// With a different worker host
    #[must_use]
    pub fn with_host(mut self, host: Arc<dyn WorkerHost>) -> Self {
        self.host = host;
        self
    }

    /// With a different telemetry sink
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Register the worker and wait until it is active
    ///
    /// No-op when a live worker is already registered. Concurrent calls
    /// serialize; the later ones observe the first one's registration.
    ///
    /// # Errors
    /// - `AgentError::Unsupported` if the host cannot run background workers
    /// - `AgentError::Registration` if the scope is invalid, the host
    ///   rejects it, or the worker exits before activating
    pub async fn start(&self) -> Result<(), AgentError> {
        let mut registration = self.registration.lock().await;

        if let Some(current) = registration.as_ref() {
            if !current.task.is_finished() && self.is_active() {
                tracing::debug!(worker = %current.id, "agent already active");
                return Ok(());
            }
        }
        if let Some(stale) = registration.take() {
            tracing::warn!(worker = %stale.id, "replacing stale worker registration");
            self.teardown(stale).await;
        }

        if !self.host.supports_background_workers() {
            let err = AgentError::Unsupported;
            self.telemetry.log_error(&err, "start");
            return Err(err);
        }

        let scope = WorkerScope::parse(&self.config.scope)
            .map_err(|e| self.registration_failed(&e))?;
        self.host
            .register(&scope)
            .await
            .map_err(|e| self.registration_failed(&e))?;

        let id = Ulid::new();
        let spawned = worker::spawn(
            id,
            &self.config,
            Arc::clone(&self.upstream),
            Arc::clone(&self.telemetry),
        );

        if spawned.ready.await.is_err() {
            spawned.task.abort();
            if let Err(e) = self.host.unregister(&scope).await {
                tracing::warn!(%scope, "unregister after failed activation: {}", e);
            }
            let err = AgentError::Registration("worker exited before activation".to_string());
            self.telemetry.log_error(&err, "start");
            return Err(err);
        }

        *self.controller.write() = Some(WorkerController {
            id,
            inbox: spawned.inbox,
        });
        self.registered.store(true, Ordering::Release);
        *registration = Some(Registration {
            scope,
            id,
            task: spawned.task,
        });

        tracing::info!(worker = %id, scope = %self.config.scope, "agent started");
        Ok(())
    }

    /// Unregister the worker and drop its state
    ///
    /// Never fails; unregister errors are logged. No-op when not running.
    /// Commands still pending resolve to `AgentError::WorkerTerminated`.
    pub async fn stop(&self) {
        let mut registration = self.registration.lock().await;
        let Some(current) = registration.take() else {
            return;
        };
        let id = current.id;
        self.teardown(current).await;
        tracing::info!(worker = %id, "agent stopped");
    }

    /// Whether a registration exists and a live controller is attached
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.registered.load(Ordering::Acquire)
            && self
                .controller
                .read()
                .as_ref()
                .is_some_and(|c| !c.inbox.is_closed())
    }

    /// Create a caller handle with its own push port
    #[must_use]
    pub fn client(self: &Arc<Self>) -> AgentClient {
        AgentClient::new(Arc::clone(self))
    }

    /// Agent configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub(crate) fn controller(&self) -> Option<WorkerController> {
        self.controller.read().clone()
    }

    #[cfg(test)]
    pub(crate) fn attach(&self, controller: WorkerController) {
        self.registered.store(true, Ordering::Release);
        *self.controller.write() = Some(controller);
    }

    pub(crate) fn upstream(&self) -> &Arc<dyn Upstream> {
        &self.upstream
    }

    pub(crate) fn telemetry(&self) -> &Arc<dyn TelemetrySink> {
        &self.telemetry
    }

    async fn teardown(&self, registration: Registration) {
        self.registered.store(false, Ordering::Release);
        let controller = self.controller.write().take();

        let delivered = controller.is_some_and(|c| c.inbox.try_send(Envelope::Shutdown).is_ok());
        if !delivered {
            registration.task.abort();
        }

        if let Err(e) = self.host.unregister(&registration.scope).await {
            tracing::warn!(scope = %registration.scope, "unregister failed: {}", e);
            self.telemetry.log_error(&e, "stop");
        }
    }

    fn registration_failed(&self, error: &HostError) -> AgentError {
        let err = AgentError::Registration(error.to_string());
        self.telemetry.log_error(&err, "start");
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::OfflineUpstream;

    #[test]
    fn scope_validation() {
        assert!(WorkerScope::parse("/").is_ok());
        assert!(WorkerScope::parse("/app/").is_ok());
        assert!(WorkerScope::parse("app").is_err());
        assert!(WorkerScope::parse("/a/../b").is_err());
        assert!(WorkerScope::parse("/a b").is_err());
    }

    #[tokio::test]
    async fn start_stop_cycle() {
        let lifecycle = AgentLifecycle::new(AgentConfig::default(), Arc::new(OfflineUpstream));
        assert!(!lifecycle.is_active());

        lifecycle.start().await.unwrap();
        assert!(lifecycle.is_active());

        lifecycle.stop().await;
        assert!(!lifecycle.is_active());

        lifecycle.stop().await;
    }

    #[tokio::test]
    async fn invalid_scope_is_registration_error() {
        let lifecycle = AgentLifecycle::new(
            AgentConfig::default().with_scope("relative"),
            Arc::new(OfflineUpstream),
        );
        let err = lifecycle.start().await.unwrap_err();
        assert!(matches!(err, AgentError::Registration(_)));
        assert!(!lifecycle.is_active());
    }

    #[tokio::test]
    async fn restart_gets_new_worker() {
        let lifecycle = AgentLifecycle::new(AgentConfig::default(), Arc::new(OfflineUpstream));
        lifecycle.start().await.unwrap();
        let first = lifecycle.controller().unwrap().id;

        lifecycle.stop().await;
        lifecycle.start().await.unwrap();
        let second = lifecycle.controller().unwrap().id;

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn exited_worker_is_inactive_and_replaced_on_start() {
        let lifecycle = AgentLifecycle::new(AgentConfig::default(), Arc::new(OfflineUpstream));
        lifecycle.start().await.unwrap();
        let stale = lifecycle.controller().unwrap();

        stale.inbox.send(Envelope::Shutdown).await.unwrap();
        {
            let mut registration = lifecycle.registration.lock().await;
            let task = &mut registration.as_mut().unwrap().task;
            task.await.unwrap();
        }

        assert!(lifecycle.registered.load(Ordering::Acquire));
        assert!(!lifecycle.is_active());

        lifecycle.start().await.unwrap();
        assert!(lifecycle.is_active());
        assert_ne!(lifecycle.controller().unwrap().id, stale.id);
    }

    #[tokio::test]
    async fn crashed_worker_is_inactive() {
        let lifecycle = AgentLifecycle::new(AgentConfig::default(), Arc::new(OfflineUpstream));
        lifecycle.start().await.unwrap();

        {
            let mut registration = lifecycle.registration.lock().await;
            let task = &mut registration.as_mut().unwrap().task;
            task.abort();
            assert!(task.await.unwrap_err().is_cancelled());
        }

        assert!(!lifecycle.is_active());
        lifecycle.start().await.unwrap();
        assert!(lifecycle.is_active());
    }
}
