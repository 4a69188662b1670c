//! In-process authority.
//!
//! Behaves like a single-account pub/sub service: topic creation is
//! idempotent per name, identifiers are ARN-shaped, and publishing delivers a
//! [`Notification`] to every [`Protocol::Local`] subscriber's inbox. Tests use
//! [`MemoryTransport::fail_next`] to inject provider errors and the
//! `*_external` helpers to mutate state behind a registry's back.

use super::{
    RemoteError, RemoteResource, RemoteResult, RemoteTransport, ResolvedTransportConfig,
    SubscriptionInfo, TransportConfig,
};
use crate::types::{MessageId, Notification, Protocol, ResourceId, SubscriptionId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const ACCOUNT_ID: &str = "000000000000";

/// Transport operations, for failure injection and call accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportOp {
    Create,
    Delete,
    List,
    Publish,
    Subscribe,
    Unsubscribe,
    ListSubscriptions,
}

#[derive(Default)]
struct MemoryState {
    /// Remote name -> id.
    topics: BTreeMap<String, ResourceId>,
    subscriptions: BTreeMap<String, SubscriptionInfo>,
    inboxes: HashMap<String, Vec<Sender<Notification>>>,
    /// Every accepted publish, in order.
    published: Vec<(ResourceId, Vec<u8>)>,
    failures: HashMap<TransportOp, RemoteError>,
    calls: HashMap<TransportOp, usize>,
    next_message: u64,
    next_subscription: u64,
}

/// An in-memory [`RemoteTransport`].
#[derive(Clone)]
pub struct MemoryTransport {
    config: ResolvedTransportConfig,
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl MemoryTransport {
    /// Create an empty authority. The region is resolved without consulting
    /// the process environment.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config: config.resolve(&HashMap::new()),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    pub fn config(&self) -> &ResolvedTransportConfig {
        &self.config
    }

    fn arn(&self, name: &str) -> ResourceId {
        ResourceId(format!(
            "arn:local:{}:{}:{}",
            self.config.region, ACCOUNT_ID, name
        ))
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: TransportOp, error: RemoteError) {
        self.state.lock().failures.insert(op, error);
    }

    /// Number of times `op` has been invoked, failed calls included.
    pub fn call_count(&self, op: TransportOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Create a topic without going through any registry.
    pub fn create_external(&self, name: &str) -> ResourceId {
        let id = self.arn(name);
        self.state
            .lock()
            .topics
            .entry(name.to_string())
            .or_insert(id)
            .clone()
    }

    /// Delete a topic by remote name without going through any registry.
    pub fn delete_external(&self, name: &str) -> Option<ResourceId> {
        let mut state = self.state.lock();
        let id = state.topics.remove(name)?;
        state.subscriptions.retain(|_, sub| sub.resource_id != id);
        Some(id)
    }

    /// Receiver for notifications delivered to a `Protocol::Local` endpoint.
    pub fn inbox(&self, endpoint: &str) -> Receiver<Notification> {
        let (tx, rx) = unbounded();
        self.state
            .lock()
            .inboxes
            .entry(endpoint.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Drop every sender for `endpoint`, disconnecting its receivers.
    pub fn close_inbox(&self, endpoint: &str) {
        self.state.lock().inboxes.remove(endpoint);
    }

    /// Payloads accepted for a topic, in publish order.
    pub fn published_to(&self, id: &ResourceId) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|(rid, _)| rid == id)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    fn begin(&self, state: &mut MemoryState, op: TransportOp) -> RemoteResult<()> {
        *state.calls.entry(op).or_insert(0) += 1;
        match state.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn not_found(what: &str) -> RemoteError {
        RemoteError::new("NotFound", format!("{what} does not exist"))
    }
}

impl RemoteTransport for MemoryTransport {
    fn create_resource(&self, name: &str) -> RemoteResult<ResourceId> {
        let mut state = self.state.lock();
        self.begin(&mut state, TransportOp::Create)?;
        let id = self.arn(name);
        Ok(state
            .topics
            .entry(name.to_string())
            .or_insert(id)
            .clone())
    }

    fn delete_resource(&self, id: &ResourceId) -> RemoteResult<()> {
        let mut state = self.state.lock();
        self.begin(&mut state, TransportOp::Delete)?;
        let name = state
            .topics
            .iter()
            .find(|(_, rid)| *rid == id)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| Self::not_found(&format!("Topic {id}")))?;
        state.topics.remove(&name);
        state.subscriptions.retain(|_, sub| &sub.resource_id != id);
        Ok(())
    }

    fn list_resources(&self) -> RemoteResult<Vec<RemoteResource>> {
        let mut state = self.state.lock();
        self.begin(&mut state, TransportOp::List)?;
        Ok(state
            .topics
            .iter()
            .map(|(name, id)| RemoteResource {
                name: name.clone(),
                resource_id: id.clone(),
            })
            .collect())
    }

    fn publish(&self, id: &ResourceId, payload: &[u8]) -> RemoteResult<MessageId> {
        let mut state = self.state.lock();
        self.begin(&mut state, TransportOp::Publish)?;
        if !state.topics.values().any(|rid| rid == id) {
            return Err(Self::not_found(&format!("Topic {id}")));
        }

        state.next_message += 1;
        let message_id = MessageId(format!("msg-{:08}", state.next_message));
        state.published.push((id.clone(), payload.to_vec()));

        let endpoints: Vec<String> = state
            .subscriptions
            .values()
            .filter(|sub| &sub.resource_id == id && sub.protocol == Protocol::Local)
            .map(|sub| sub.endpoint.clone())
            .collect();

        for endpoint in endpoints {
            if let Some(senders) = state.inboxes.get_mut(&endpoint) {
                let notification = Notification {
                    message_id: message_id.clone(),
                    resource_id: id.clone(),
                    payload: payload.to_vec(),
                };
                senders.retain(|tx| tx.send(notification.clone()).is_ok());
            }
        }

        Ok(message_id)
    }

    fn subscribe(
        &self,
        id: &ResourceId,
        protocol: Protocol,
        endpoint: &str,
    ) -> RemoteResult<SubscriptionId> {
        let mut state = self.state.lock();
        self.begin(&mut state, TransportOp::Subscribe)?;
        if !state.topics.values().any(|rid| rid == id) {
            return Err(Self::not_found(&format!("Topic {id}")));
        }

        // Same topic, protocol and endpoint resolves to the existing subscription.
        if let Some(existing) = state.subscriptions.values().find(|sub| {
            &sub.resource_id == id && sub.protocol == protocol && sub.endpoint == endpoint
        }) {
            return Ok(existing.subscription_id.clone());
        }

        state.next_subscription += 1;
        let subscription_id = SubscriptionId(format!("{}:{:08}", id, state.next_subscription));
        state.subscriptions.insert(
            subscription_id.0.clone(),
            SubscriptionInfo {
                subscription_id: subscription_id.clone(),
                resource_id: id.clone(),
                protocol,
                endpoint: endpoint.to_string(),
            },
        );
        Ok(subscription_id)
    }

    fn unsubscribe(&self, id: &SubscriptionId) -> RemoteResult<()> {
        let mut state = self.state.lock();
        self.begin(&mut state, TransportOp::Unsubscribe)?;
        state
            .subscriptions
            .remove(&id.0)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(&format!("Subscription {id}")))
    }

    fn list_subscriptions(&self, id: Option<&ResourceId>) -> RemoteResult<Vec<SubscriptionInfo>> {
        let mut state = self.state.lock();
        self.begin(&mut state, TransportOp::ListSubscriptions)?;
        if let Some(id) = id {
            if !state.topics.values().any(|rid| rid == id) {
                return Err(Self::not_found(&format!("Topic {id}")));
            }
        }
        Ok(state
            .subscriptions
            .values()
            .filter(|sub| id.map_or(true, |id| &sub.resource_id == id))
            .cloned()
            .collect())
    }
}
