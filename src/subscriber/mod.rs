//! Inbound notification handling.
//!
//! A [`SubscriptionHandler`] attaches one endpoint to every registered topic
//! and routes what the authority delivers to it:
//! - messages on the announcement topic name a newly registered topic, which
//!   the handler attaches to without a restart
//! - every other message is appended to the injected [`MessageLog`], when
//!   one is configured
//!
//! # Example
//!
//! ```ignore
//! let handler = SubscriptionHandler::new(registry, transport, config)
//!     .with_log(Arc::new(MessageLog::open("messages.log")?));
//! handler.attach_all()?;
//! handler.run(inbox)?;
//! ```

mod handler;

pub use handler::{Routed, SubscriberConfig, SubscriptionHandler};
