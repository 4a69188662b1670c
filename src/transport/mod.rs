//! Remote pub/sub transport boundary.
//!
//! The authority that owns topics lives behind [`RemoteTransport`]. Everything
//! in this crate talks to it through that trait, so a network client and the
//! in-process [`MemoryTransport`] are interchangeable.
//!
//! Credentials and region are carried by an explicit [`TransportConfig`]
//! handed to the transport at construction; nothing here reads or sets
//! process-wide session state.

mod config;
mod memory;

pub use config::{CredentialSource, ResolvedTransportConfig, TransportConfig, DEFAULT_REGION};
pub use memory::{MemoryTransport, TransportOp};

use crate::types::{MessageId, Protocol, ResourceId, SubscriptionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by the authority, classified by its provider error code.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("remote error ({code}): {message}")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Result type for transport calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// One entry of the authority's topic listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResource {
    /// Remote-visible name (`prefix-logical`).
    pub name: String,
    pub resource_id: ResourceId,
}

/// One subscription as reported by the authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub subscription_id: SubscriptionId,
    pub resource_id: ResourceId,
    pub protocol: Protocol,
    pub endpoint: String,
}

/// Operations the authority exposes.
///
/// Implementations report every failure as a [`RemoteError`]; callers never
/// retry.
pub trait RemoteTransport: Send + Sync {
    /// Create a topic with the given remote name and return its identifier.
    fn create_resource(&self, name: &str) -> RemoteResult<ResourceId>;

    /// Delete a topic.
    fn delete_resource(&self, id: &ResourceId) -> RemoteResult<()>;

    /// Full listing of every topic the authority knows about.
    fn list_resources(&self) -> RemoteResult<Vec<RemoteResource>>;

    fn publish(&self, id: &ResourceId, payload: &[u8]) -> RemoteResult<MessageId>;

    fn subscribe(
        &self,
        id: &ResourceId,
        protocol: Protocol,
        endpoint: &str,
    ) -> RemoteResult<SubscriptionId>;

    fn unsubscribe(&self, id: &SubscriptionId) -> RemoteResult<()>;

    /// Subscriptions of one topic, or of every topic when `id` is `None`.
    fn list_subscriptions(&self, id: Option<&ResourceId>) -> RemoteResult<Vec<SubscriptionInfo>>;
}
