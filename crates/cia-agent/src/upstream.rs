//! Real network access
//!
//! The agent never performs I/O itself; requests that pass through (or that a
//! `DELAY` rule merely defers) are handed to an [`Upstream`].

use crate::error::NetworkError;
use crate::types::{NetworkRequest, NetworkResponse};
use async_trait::async_trait;

/// The real network behind the agent
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// Perform the request
    ///
    /// # Errors
    /// `NetworkError::Failed` when the request cannot be completed.
    async fn fetch(&self, request: NetworkRequest) -> Result<NetworkResponse, NetworkError>;
}

/// Upstream that fails every request
///
/// Useful when only synthetic responses are expected.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineUpstream;

#[async_trait]
impl Upstream for OfflineUpstream {
    async fn fetch(&self, request: NetworkRequest) -> Result<NetworkResponse, NetworkError> {
        Err(NetworkError::Failed(format!("offline: {}", request.url)))
    }
}
