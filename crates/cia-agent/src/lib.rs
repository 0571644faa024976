//! CIA Agent
//!
//! Causal intervention agent: a background interception worker plus the
//! caller-side control module that drives it.
//!
//! # Overview
//!
//! - **AgentLifecycle**: registers the worker, waits for it to become active, tears it down
//! - **AgentClient**: per-caller command channel (request/response, hints, pushed events)
//! - **Worker**: single task owning rules, chaos state and the precognitive cache
//! - **Engine**: per-request decision (cache hit, first matching rule, chaos, passthrough)
//!
//! # Example
//!
//! ```rust,no_run
//! use cia_agent::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), AgentError> {
//! let lifecycle = Arc::new(AgentLifecycle::new(AgentConfig::default(), Arc::new(OfflineUpstream)));
//! let client = lifecycle.client();
//! client.start().await?;
//!
//! client
//!     .task_set_intervention_rules(vec![InterventionRule::set_status("/api/users", 500)])
//!     .await?;
//! let response = client.fetch(NetworkRequest::get("/api/users")).await;
//! assert_eq!(response.map(|r| r.status).ok(), Some(500));
//!
//! client.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod chaos;
pub mod client;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod precognition;
pub mod protocol;
pub mod simulator;
pub mod telemetry;
pub mod types;
pub mod upstream;

mod worker;

// Re-exports
pub use chaos::{ChaosConfig, ChaosController, ChaosFault, ChaosOptions, ChaosTarget};
pub use client::AgentClient;
pub use engine::Decision;
pub use error::{AgentError, ChaosError, HostError, NetworkError};
pub use lifecycle::{AgentLifecycle, LocalWorkerHost, WorkerHost, WorkerScope};
pub use precognition::PrecognitiveCache;
pub use protocol::{AgentEvent, Command, CommandResponse, InterventionReport, Pong};
pub use simulator::{run_simulator, SimulatorConfig, SimulatorReport};
pub use telemetry::{NoopTelemetry, TelemetrySink, TracingTelemetry};
pub use types::{
    AgentConfig, AgentState, NetworkRequest, NetworkResponse, RequestClass, ResponseSource,
};
pub use upstream::{OfflineUpstream, Upstream};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the agent
    pub use crate::{
        AgentClient, AgentConfig, AgentError, AgentEvent, AgentLifecycle, AgentState,
        ChaosOptions, ChaosTarget, NetworkRequest, NetworkResponse, OfflineUpstream, Upstream,
    };
    pub use cia_rules::{InterventionAction, InterventionRule};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
