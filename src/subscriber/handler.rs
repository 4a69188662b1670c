//! Subscription handler with optional message persistence.

use crate::error::{NotifyError, Result};
use crate::log::MessageLog;
use crate::registry::TopicRegistry;
use crate::transport::RemoteTransport;
use crate::types::{MessageRecord, Notification, Protocol, ResourceId, SubscriptionId};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the authority should deliver notifications for this process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberConfig {
    pub protocol: Protocol,
    pub endpoint: String,
}

impl SubscriberConfig {
    pub fn new(protocol: Protocol, endpoint: impl Into<String>) -> Self {
        Self {
            protocol,
            endpoint: endpoint.into(),
        }
    }

    /// In-process delivery to a named inbox.
    pub fn local(endpoint: impl Into<String>) -> Self {
        Self::new(Protocol::Local, endpoint)
    }
}

/// What happened to one inbound notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Routed {
    /// An announcement; the handler is now attached to the named topic.
    Attached(String),
    /// Appended to the message log.
    Logged(MessageRecord),
    /// Accepted; no log is configured.
    Received { topic: String },
}

/// Attaches an endpoint to registered topics and routes what arrives there.
pub struct SubscriptionHandler {
    registry: Arc<TopicRegistry>,
    transport: Arc<dyn RemoteTransport>,
    config: SubscriberConfig,
    log: Option<Arc<MessageLog>>,
    /// Logical name -> subscription, for topics this handler attached to.
    attached: Mutex<BTreeMap<String, SubscriptionId>>,
}

impl SubscriptionHandler {
    pub fn new(
        registry: Arc<TopicRegistry>,
        transport: Arc<dyn RemoteTransport>,
        config: SubscriberConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            config,
            log: None,
            attached: Mutex::new(BTreeMap::new()),
        }
    }

    /// Persist every non-announcement message to `log`.
    pub fn with_log(mut self, log: Arc<MessageLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    pub fn log(&self) -> Option<&Arc<MessageLog>> {
        self.log.as_ref()
    }

    /// Subscribe to the announcement topic and to every registered topic.
    ///
    /// Returns the registered topics the handler is attached to.
    pub fn attach_all(&self) -> Result<Vec<String>> {
        self.registry.ensure_control_topic()?;
        let control = self.registry.control_topic().to_string();
        self.attach(&control)?;

        for name in self.registry.names() {
            self.attach(&name)?;
        }
        Ok(self.attached())
    }

    /// Subscribe the endpoint to one topic. Attaching twice is a no-op.
    pub fn attach(&self, name: &str) -> Result<SubscriptionId> {
        if let Some(id) = self.attached.lock().get(name) {
            return Ok(id.clone());
        }

        let resource = self.resolve_fresh(name)?;
        let subscription =
            self.transport
                .subscribe(&resource, self.config.protocol, &self.config.endpoint)?;
        info!(
            topic = name,
            endpoint = %self.config.endpoint,
            subscription = %subscription,
            "attached to topic"
        );

        Ok(self
            .attached
            .lock()
            .entry(name.to_string())
            .or_insert(subscription)
            .clone())
    }

    /// Registered topics this handler is attached to, sorted.
    pub fn attached(&self) -> Vec<String> {
        self.attached
            .lock()
            .keys()
            .filter(|name| !self.registry.is_control_topic(name))
            .cloned()
            .collect()
    }

    /// Route one notification.
    pub fn handle(&self, notification: Notification) -> Result<Routed> {
        let topic = self.topic_for(&notification.resource_id)?;

        if self.registry.is_control_topic(&topic) {
            let announced = std::str::from_utf8(&notification.payload)
                .map_err(|_| {
                    NotifyError::invalid_name("<binary>", "announcement payload is not UTF-8")
                })?
                .trim()
                .to_string();
            debug!(topic = %announced, "received topic announcement");
            self.attach(&announced)?;
            return Ok(Routed::Attached(announced));
        }

        match self.log {
            Some(ref log) => {
                let record = log.append(&topic, notification.payload)?;
                debug!(topic = %topic, message = %notification.message_id, "logged message");
                Ok(Routed::Logged(record))
            }
            None => Ok(Routed::Received { topic }),
        }
    }

    /// Handle notifications until every sender of `inbox` is gone.
    ///
    /// Routing failures are logged and skipped; storage failures stop the
    /// loop. Returns the number of notifications handled.
    pub fn run(&self, inbox: Receiver<Notification>) -> Result<usize> {
        let mut handled = 0;
        for notification in inbox.iter() {
            let message_id = notification.message_id.clone();
            match self.handle(notification) {
                Ok(_) => handled += 1,
                Err(e) if e.is_storage() => return Err(e),
                Err(e) => warn!(message = %message_id, error = %e, "dropping notification"),
            }
        }
        Ok(handled)
    }

    /// Resolve a name, reconciling once if it is not tracked locally.
    fn resolve_fresh(&self, name: &str) -> Result<ResourceId> {
        match self.registry.resolve(name) {
            Err(NotifyError::NotFound(_)) => {
                self.registry.reconcile()?;
                self.registry.resolve(name)
            }
            other => other,
        }
    }

    /// Logical topic of a resource, reconciling once if it is unknown.
    fn topic_for(&self, resource: &ResourceId) -> Result<String> {
        if let Some(name) = self.registry.name_of(resource) {
            return Ok(name);
        }
        self.registry.reconcile()?;
        self.registry
            .name_of(resource)
            .ok_or_else(|| NotifyError::NotFound(resource.to_string()))
    }
}
