//! Core types for the agent
//!
//! Defines:
//! - Agent configuration
//! - Intercepted requests and the responses handed back to callers
//! - Request classification used by chaos targeting
//! - The read-only agent state snapshot

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;
use url::Url;

/// File extensions treated as static assets
const ASSET_EXTENSIONS: &[&str] = &[
    "js", "mjs", "css", "png", "jpg", "jpeg", "gif", "svg", "webp", "avif", "ico", "woff",
    "woff2", "ttf", "otf", "map", "wasm", "mp4", "webm",
];

/// Base used to resolve relative request URLs
const RELATIVE_BASE: &str = "http://localhost/";

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Scope path the worker is registered at
    pub scope: String,
    /// Worker inbox capacity
    pub inbox_capacity: usize,
    /// Maximum precognitive cache entries
    pub precognition_capacity: usize,
    /// Age after which a prefetched entry is stale
    pub precognition_ttl_ms: Option<u64>,
    /// Seed for chaos sampling (reproducible runs)
    pub chaos_seed: Option<u64>,
    /// Intensity used when a chaos toggle carries none
    pub default_chaos_intensity: f64,
    /// Caller-side deadline for request/response commands
    pub command_timeout_ms: Option<u64>,
    /// Undrained events each caller's push port holds before new ones drop
    pub event_port_capacity: usize,
}

impl AgentConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML
    ///
    /// # Errors
    /// `AgentError::Config` on malformed TOML or invalid values.
    pub fn from_toml_str(raw: &str) -> Result<Self, AgentError> {
        let config: Self = toml::from_str(raw).map_err(|e| AgentError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `AgentError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.inbox_capacity == 0 {
            return Err(AgentError::Config("inbox_capacity must be positive".to_string()));
        }
        if self.precognition_capacity == 0 {
            return Err(AgentError::Config(
                "precognition_capacity must be positive".to_string(),
            ));
        }
        if self.event_port_capacity == 0 {
            return Err(AgentError::Config(
                "event_port_capacity must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.default_chaos_intensity) {
            return Err(AgentError::Config(format!(
                "default_chaos_intensity must be within [0, 1], got {}",
                self.default_chaos_intensity
            )));
        }
        Ok(())
    }

    /// With scope
    #[inline]
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// With precognitive cache capacity
    #[inline]
    #[must_use]
    pub fn with_precognition_capacity(mut self, capacity: usize) -> Self {
        self.precognition_capacity = capacity;
        self
    }

    /// With precognitive entry lifetime
    #[inline]
    #[must_use]
    pub fn with_precognition_ttl(mut self, ttl: Duration) -> Self {
        self.precognition_ttl_ms = Some(duration_ms(ttl));
        self
    }

    /// With deterministic chaos seed
    #[inline]
    #[must_use]
    pub fn with_chaos_seed(mut self, seed: u64) -> Self {
        self.chaos_seed = Some(seed);
        self
    }

    /// With default chaos intensity
    #[inline]
    #[must_use]
    pub fn with_default_chaos_intensity(mut self, intensity: f64) -> Self {
        self.default_chaos_intensity = intensity;
        self
    }

    /// With caller-side command timeout
    #[inline]
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// With inbox capacity
    #[inline]
    #[must_use]
    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    /// With push port capacity
    #[inline]
    #[must_use]
    pub fn with_event_port_capacity(mut self, capacity: usize) -> Self {
        self.event_port_capacity = capacity;
        self
    }

    /// Command timeout as a duration
    #[inline]
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }

    /// Precognitive entry lifetime as a duration
    #[inline]
    #[must_use]
    pub fn precognition_ttl(&self) -> Option<Duration> {
        self.precognition_ttl_ms.map(Duration::from_millis)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            scope: "/".to_string(),
            inbox_capacity: 100,
            precognition_capacity: 64,
            precognition_ttl_ms: None,
            chaos_seed: None,
            default_chaos_intensity: 0.1,
            command_timeout_ms: None,
            event_port_capacity: 256,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Outbound request issued by the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRequest {
    /// HTTP method, upper case
    pub method: String,
    /// Absolute or origin-relative URL
    pub url: String,
    /// Lower-cased header names
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl NetworkRequest {
    /// Create request
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    /// GET request
    #[inline]
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// POST request
    #[inline]
    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    /// With header (name is lower-cased)
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Header lookup, case-insensitive
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether this is a GET
    #[inline]
    #[must_use]
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    /// URL path, resolving relative URLs against a placeholder origin
    #[must_use]
    pub fn path(&self) -> String {
        Url::parse(&self.url)
            .or_else(|_| Url::parse(RELATIVE_BASE).and_then(|base| base.join(&self.url)))
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| self.url.clone())
    }

    /// Heuristic traffic class
    #[must_use]
    pub fn class(&self) -> RequestClass {
        RequestClass::of(self)
    }
}

/// Traffic class used to scope chaos injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestClass {
    /// API call (JSON, `/api/`, GraphQL)
    Api,
    /// Static asset (scripts, styles, images, fonts)
    Assets,
    /// Documents and everything else
    Other,
}

impl RequestClass {
    /// Classify a request by path, extension and content negotiation headers
    #[must_use]
    pub fn of(request: &NetworkRequest) -> Self {
        let path = request.path().to_ascii_lowercase();
        let accept = request.header("accept").unwrap_or_default().to_ascii_lowercase();
        let content_type = request
            .header("content-type")
            .unwrap_or_default()
            .to_ascii_lowercase();

        let api_path = path == "/api" || path.starts_with("/api/") || path.contains("/api/");
        let json = accept.contains("application/json") || content_type.contains("application/json");
        if api_path || path.contains("graphql") || json {
            return Self::Api;
        }

        let extension = path
            .rsplit('/')
            .next()
            .and_then(|segment| segment.rsplit_once('.'))
            .map(|(_, ext)| ext);
        let asset_ext = extension.is_some_and(|ext| ASSET_EXTENSIONS.contains(&ext));
        let asset_accept = ["image/", "font/", "text/css", "javascript"]
            .iter()
            .any(|marker| accept.contains(marker));
        if asset_ext || asset_accept {
            return Self::Assets;
        }

        Self::Other
    }
}

impl Display for RequestClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Api => "api",
            Self::Assets => "assets",
            Self::Other => "other",
        })
    }
}

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    /// Real upstream response, possibly delayed
    Network,
    /// Built by the agent (rule or chaos)
    Synthetic,
    /// Served from the precognitive cache
    Precognition,
}

/// Response handed back for an intercepted request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkResponse {
    /// HTTP status
    pub status: u16,
    /// Lower-cased header names
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Body text
    #[serde(default)]
    pub body: String,
    /// Provenance
    pub source: ResponseSource,
}

impl NetworkResponse {
    /// Upstream response
    #[inline]
    #[must_use]
    pub fn network(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
            source: ResponseSource::Network,
        }
    }

    /// Upstream 200 response
    #[inline]
    #[must_use]
    pub fn ok(body: impl Into<String>) -> Self {
        Self::network(200, body)
    }

    /// Agent-built response carrying only a status
    #[inline]
    #[must_use]
    pub fn synthetic(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: String::new(),
            source: ResponseSource::Synthetic,
        }
    }

    /// With header (name is lower-cased)
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// With body
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// With provenance
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    /// 2xx status
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Header lookup, case-insensitive
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Read-only snapshot of agent state
///
/// Computed from the worker's components at query time, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    /// Chaos mode enabled
    pub chaos_mode: bool,
    /// Installed rule count
    pub rule_count: usize,
    /// Entries in the precognitive cache
    pub precognition_cache_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.scope, "/");
        assert_eq!(config.inbox_capacity, 100);
        assert_eq!(config.event_port_capacity, 256);
        assert!(config.command_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_from_partial_toml() {
        let config = AgentConfig::from_toml_str(
            r#"
            scope = "/app/"
            chaos_seed = 7
            command_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.scope, "/app/");
        assert_eq!(config.chaos_seed, Some(7));
        assert_eq!(config.command_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.precognition_capacity, 64);
    }

    #[test]
    fn config_rejects_bad_intensity() {
        let err = AgentConfig::from_toml_str("default_chaos_intensity = 1.5").unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn config_rejects_zero_capacity() {
        let config = AgentConfig::new().with_precognition_capacity(0);
        assert!(config.validate().is_err());
        let config = AgentConfig::new().with_event_port_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn request_path_handles_relative_and_absolute() {
        assert_eq!(NetworkRequest::get("/api/users?x=1").path(), "/api/users");
        assert_eq!(
            NetworkRequest::get("https://app.local/static/app.js").path(),
            "/static/app.js"
        );
    }

    #[test]
    fn classify_requests() {
        assert_eq!(NetworkRequest::get("/api/users").class(), RequestClass::Api);
        assert_eq!(
            NetworkRequest::post("/graphql").class(),
            RequestClass::Api
        );
        assert_eq!(
            NetworkRequest::get("/data")
                .with_header("Accept", "application/json")
                .class(),
            RequestClass::Api
        );
        assert_eq!(
            NetworkRequest::get("https://cdn.local/img/logo.PNG").class(),
            RequestClass::Assets
        );
        assert_eq!(
            NetworkRequest::get("/fonts/inter")
                .with_header("accept", "font/woff2")
                .class(),
            RequestClass::Assets
        );
        assert_eq!(NetworkRequest::get("/index.html").class(), RequestClass::Other);
    }

    #[test]
    fn request_headers_case_insensitive() {
        let req = NetworkRequest::get("/").with_header("X-Trace", "abc");
        assert_eq!(req.header("x-trace"), Some("abc"));
        assert_eq!(req.header("X-TRACE"), Some("abc"));
    }

    #[test]
    fn agent_state_wire_names() {
        let state = AgentState {
            chaos_mode: true,
            rule_count: 2,
            precognition_cache_size: 1,
        };
        let value = serde_json::to_value(state).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"chaosMode": true, "ruleCount": 2, "precognitionCacheSize": 1})
        );
    }

    #[test]
    fn response_helpers() {
        let resp = NetworkResponse::synthetic(503).with_header("Retry-After", "1");
        assert_eq!(resp.source, ResponseSource::Synthetic);
        assert_eq!(resp.header("retry-after"), Some("1"));
        assert!(!resp.is_success());
        assert!(NetworkResponse::ok("x").is_success());
    }
}
