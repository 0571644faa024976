//! Command channel protocol
//!
//! Wire shapes exchanged between callers and the worker:
//!
//! ```json
//! {"type": "SET_INTERVENTION_RULES", "payload": [{"urlPattern": "/api", "action": "DELAY", "value": 100}]}
//! {"type": "TOGGLE_CHAOS_MODE", "payload": {"enabled": true, "options": {"intensity": 0.2}}}
//! {"type": "GET_AGENT_STATE"}
//! ```
//!
//! Replies are `{"payload": ...}` or `{"error": "..."}`. Request/response
//! commands carry their own single-use reply channel inside the envelope, so
//! replies need no correlation ids.

use crate::chaos::ChaosOptions;
use crate::error::{AgentError, NetworkError};
use crate::types::{NetworkRequest, NetworkResponse};
use chrono::{DateTime, Utc};
use cia_rules::InterventionRule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Command vocabulary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Establish the caller's push port
    InitPort,
    /// Replace the rule set wholesale
    SetInterventionRules(Vec<InterventionRule>),
    /// Replace chaos configuration
    ToggleChaosMode(ToggleChaosPayload),
    /// Prefetch hint (fire-and-forget)
    UserActivityHint(HintPayload),
    /// Read the agent state snapshot
    GetAgentState,
    /// Liveness probe echoing a caller nonce
    Ping(PingPayload),
}

impl Command {
    /// Wire tag
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::InitPort => "INIT_PORT",
            Self::SetInterventionRules(_) => "SET_INTERVENTION_RULES",
            Self::ToggleChaosMode(_) => "TOGGLE_CHAOS_MODE",
            Self::UserActivityHint(_) => "USER_ACTIVITY_HINT",
            Self::GetAgentState => "GET_AGENT_STATE",
            Self::Ping(_) => "PING",
        }
    }

    /// Encode to the wire value
    ///
    /// # Errors
    /// `AgentError::Protocol` if serialization fails.
    pub fn to_value(&self) -> Result<Value, AgentError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// `TOGGLE_CHAOS_MODE` payload
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ToggleChaosPayload {
    /// Chaos mode on
    pub enabled: bool,
    /// Intensity and target
    #[serde(default)]
    pub options: ChaosOptions,
}

/// `USER_ACTIVITY_HINT` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintPayload {
    /// Resource to prefetch
    pub url: String,
}

/// `PING` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPayload {
    /// Echoed back unchanged
    pub nonce: u64,
}

/// `PING` reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    /// Nonce from the request
    pub nonce: u64,
    /// Milliseconds since the worker activated
    pub uptime_ms: u64,
}

/// Reply to a request/response command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandResponse {
    /// Success payload
    Payload(Value),
    /// Worker-side failure message
    Error(String),
}

impl CommandResponse {
    /// Success reply from a serializable value
    #[must_use]
    pub fn payload(value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Self::Payload(value),
            Err(e) => Self::Error(format!("failed to encode reply: {e}")),
        }
    }

    /// Error reply
    #[inline]
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// Convert to a result
    ///
    /// # Errors
    /// `AgentError::Command` carrying the worker's message.
    pub fn into_result(self) -> Result<Value, AgentError> {
        match self {
            Self::Payload(value) => Ok(value),
            Self::Error(message) => Err(AgentError::Command(message)),
        }
    }
}

/// Description of an applied intervention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionReport {
    /// Request URL
    pub url: String,
    /// Request method
    pub method: String,
    /// Action taken (`SET_STATUS`, `DELAY`, `CHAOS_STATUS`, `PRECOGNITION`, ...)
    pub action: String,
    /// Action-specific detail
    pub detail: Value,
    /// Index of the matching rule, for rule interventions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_index: Option<usize>,
    /// When the decision was made
    pub at: DateTime<Utc>,
}

/// Event pushed from the worker to every control port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentEvent {
    /// An explicit rule was applied
    RuleIntervention(InterventionReport),
    /// Chaos mode injected a fault
    ChaosIntervention(InterventionReport),
    /// A request was served from the precognitive cache
    PrecognitionHit(InterventionReport),
}

impl AgentEvent {
    /// Wire tag
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RuleIntervention(_) => "RULE_INTERVENTION",
            Self::ChaosIntervention(_) => "CHAOS_INTERVENTION",
            Self::PrecognitionHit(_) => "PRECOGNITION_HIT",
        }
    }

    /// Report carried by the event
    #[must_use]
    pub fn report(&self) -> &InterventionReport {
        match self {
            Self::RuleIntervention(r) | Self::ChaosIntervention(r) | Self::PrecognitionHit(r) => r,
        }
    }
}

/// Caller-side push port
///
/// Bounded; the worker drops events for a port that is full.
pub type ControlPort = mpsc::Sender<AgentEvent>;

/// Reply channel for a single intercepted request
pub(crate) type FetchReply = oneshot::Sender<Result<NetworkResponse, NetworkError>>;

/// Everything the worker inbox carries
#[derive(Debug)]
pub(crate) enum Envelope {
    /// Request/response command with its private return path
    Request {
        data: Value,
        port: Option<ControlPort>,
        reply: oneshot::Sender<CommandResponse>,
    },
    /// Fire-and-forget message to the default handler
    Post { data: Value },
    /// Intercepted outbound request
    Fetch {
        request: NetworkRequest,
        respond: FetchReply,
    },
    /// Prefetch finished
    PrefetchComplete {
        url: String,
        response: Option<NetworkResponse>,
    },
    /// Tear down the loop
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decode_commands() {
        let cmd: Command = serde_json::from_value(json!({
            "type": "SET_INTERVENTION_RULES",
            "payload": [{"urlPattern": "/api/users", "action": "SET_STATUS", "value": 500}]
        }))
        .unwrap();
        assert_eq!(
            cmd,
            Command::SetInterventionRules(vec![InterventionRule::set_status("/api/users", 500)])
        );

        let cmd: Command = serde_json::from_value(json!({"type": "GET_AGENT_STATE"})).unwrap();
        assert_eq!(cmd, Command::GetAgentState);

        let cmd: Command =
            serde_json::from_value(json!({"type": "TOGGLE_CHAOS_MODE", "payload": {"enabled": true}}))
                .unwrap();
        assert_eq!(
            cmd,
            Command::ToggleChaosMode(ToggleChaosPayload {
                enabled: true,
                options: ChaosOptions::default(),
            })
        );
    }

    #[test]
    fn encode_hint() {
        let value = Command::UserActivityHint(HintPayload {
            url: "/next".to_string(),
        })
        .to_value()
        .unwrap();
        assert_eq!(
            value,
            json!({"type": "USER_ACTIVITY_HINT", "payload": {"url": "/next"}})
        );
    }

    #[test]
    fn unknown_command_rejected() {
        let result: Result<Command, _> = serde_json::from_value(json!({"type": "SELF_DESTRUCT"}));
        assert!(result.is_err());
    }

    #[test]
    fn type_names_match_wire_tags() {
        let commands = [
            Command::InitPort,
            Command::GetAgentState,
            Command::Ping(PingPayload { nonce: 1 }),
        ];
        for cmd in commands {
            let value = cmd.to_value().unwrap();
            assert_eq!(value["type"], json!(cmd.type_name()));
        }
    }

    #[test]
    fn response_wire_shape() {
        assert_eq!(
            serde_json::to_value(CommandResponse::payload(2)).unwrap(),
            json!({"payload": 2})
        );
        assert_eq!(
            serde_json::to_value(CommandResponse::error("boom")).unwrap(),
            json!({"error": "boom"})
        );
    }

    #[test]
    fn error_response_into_command_error() {
        let err = CommandResponse::error("bad rules").into_result().unwrap_err();
        assert!(matches!(err, AgentError::Command(ref m) if m == "bad rules"));
    }

    #[test]
    fn event_tags() {
        let report = InterventionReport {
            url: "/api/users".to_string(),
            method: "GET".to_string(),
            action: "SET_STATUS".to_string(),
            detail: json!(500),
            rule_index: Some(0),
            at: Utc::now(),
        };
        let event = AgentEvent::RuleIntervention(report);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], json!("RULE_INTERVENTION"));
        assert_eq!(value["payload"]["ruleIndex"], json!(0));
        assert_eq!(event.name(), "RULE_INTERVENTION");
    }
}
