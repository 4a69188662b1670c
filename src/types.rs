//! Core types shared by the registry, the message log and the transport.

use crate::error::{NotifyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Longest remote-visible topic name the authority accepts.
pub const MAX_REMOTE_NAME_LEN: usize = 256;

/// Opaque identifier assigned by the remote authority when a topic is created.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        ResourceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the authority returns for a published message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the authority returns for a subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub String);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }

    /// Current time, but never earlier than `floor`.
    pub fn now_after(floor: Timestamp) -> Self {
        Self::now().max(floor)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Delivery protocol for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    Http,
    Https,
    Email,
    EmailJson,
    Sms,
    Sqs,
    Lambda,
    Application,
    Firehose,
    /// In-process delivery, used by [`crate::transport::MemoryTransport`].
    Local,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Email => "email",
            Protocol::EmailJson => "email-json",
            Protocol::Sms => "sms",
            Protocol::Sqs => "sqs",
            Protocol::Lambda => "lambda",
            Protocol::Application => "application",
            Protocol::Firehose => "firehose",
            Protocol::Local => "local",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self> {
        let protocol = match s {
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            "email" => Protocol::Email,
            "email-json" => Protocol::EmailJson,
            "sms" => Protocol::Sms,
            "sqs" => Protocol::Sqs,
            "lambda" => Protocol::Lambda,
            "application" => Protocol::Application,
            "firehose" => Protocol::Firehose,
            "local" => Protocol::Local,
            other => return Err(NotifyError::UnknownProtocol(other.to_string())),
        };
        Ok(protocol)
    }
}

/// A message observed on a subscribed topic, as stored in the log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Capture time (assigned by the log).
    pub timestamp: Timestamp,

    /// Logical topic name.
    pub topic: String,

    /// Opaque message body.
    pub payload: Vec<u8>,
}

impl MessageRecord {
    /// Payload as UTF-8, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Inbound delivery from the authority for one subscribed topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub message_id: MessageId,
    pub resource_id: ResourceId,
    pub payload: Vec<u8>,
}

/// Check the characters allowed in prefixes and logical names.
///
/// The authority accepts ASCII alphanumerics, hyphens and underscores.
pub fn validate_name_chars(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(NotifyError::invalid_name(name, "must not be empty"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(NotifyError::invalid_name(
            name,
            format!("character {c:?} is not allowed"),
        ));
    }
    Ok(())
}
