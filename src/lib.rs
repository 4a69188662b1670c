//! # Topic Ledger
//!
//! Application-scoped pub/sub topics on top of a remote authority, with an
//! optional durable log of everything a subscriber receives.
//!
//! ## Core Concepts
//!
//! - **Registry**: Logical topic names mapped to remote resource ids, kept in
//!   sync with the authority and persisted as a JSON mapping file
//! - **Transport**: The remote pub/sub service behind a narrow trait
//! - **Subscriber**: Attaches to every topic and follows topic announcements
//! - **Log**: Append-only, checksummed record of received messages
//!
//! ## Example
//!
//! ```ignore
//! use topic_ledger::{MemoryTransport, Notifier, NotifierConfig, LogConfig};
//!
//! let notifier = Notifier::open(
//!     NotifierConfig::new("myapp", "./notifier").with_log(LogConfig::default()),
//!     Arc::new(MemoryTransport::default()),
//! )?;
//!
//! notifier.create_topic("orders")?;
//! notifier.publish("orders", "order #1 placed")?;
//! ```

pub mod error;
pub mod log;
pub mod notifier;
pub mod registry;
pub mod subscriber;
pub mod transport;
pub mod types;

// Re-exports
pub use error::{ErrorKind, NotifyError, Result};
pub use log::{MessageFilter, MessageIter, MessageLog, MessageQuery};
pub use notifier::{LogConfig, Notifier, NotifierConfig};
pub use registry::{MappingFile, TopicRegistry, DEFAULT_CONTROL_TOPIC};
pub use subscriber::{Routed, SubscriberConfig, SubscriptionHandler};
pub use transport::{
    CredentialSource, MemoryTransport, RemoteError, RemoteResource, RemoteTransport,
    ResolvedTransportConfig, SubscriptionInfo, TransportConfig, TransportOp, DEFAULT_REGION,
};
pub use types::{
    MessageId, MessageRecord, Notification, Protocol, ResourceId, SubscriptionId, Timestamp,
};
