//! Integration tests for the notifier.

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;
use topic_ledger::{
    LogConfig, MemoryTransport, MessageFilter, MessageId, Notification, Notifier, NotifierConfig,
    NotifyError, Protocol, RemoteError, RemoteResource, RemoteTransport, ResourceId, Routed,
    SubscriberConfig, SubscriptionId, SubscriptionInfo, TopicRegistry,
};

type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Authority with a fixed, externally controlled listing.
#[derive(Default)]
struct StaticTransport {
    topics: Mutex<BTreeMap<String, ResourceId>>,
}

impl StaticTransport {
    fn with(listing: &[(&str, &str)]) -> Self {
        let transport = Self::default();
        for (name, id) in listing {
            transport
                .topics
                .lock()
                .insert(name.to_string(), ResourceId::new(*id));
        }
        transport
    }
}

impl RemoteTransport for StaticTransport {
    fn create_resource(&self, name: &str) -> RemoteResult<ResourceId> {
        let mut topics = self.topics.lock();
        let id = ResourceId::new(format!("r-{name}"));
        Ok(topics.entry(name.to_string()).or_insert(id).clone())
    }

    fn delete_resource(&self, id: &ResourceId) -> RemoteResult<()> {
        self.topics.lock().retain(|_, v| v != id);
        Ok(())
    }

    fn list_resources(&self) -> RemoteResult<Vec<RemoteResource>> {
        Ok(self
            .topics
            .lock()
            .iter()
            .map(|(name, id)| RemoteResource {
                name: name.clone(),
                resource_id: id.clone(),
            })
            .collect())
    }

    fn publish(&self, _id: &ResourceId, _payload: &[u8]) -> RemoteResult<MessageId> {
        Ok(MessageId("static".to_string()))
    }

    fn subscribe(
        &self,
        _id: &ResourceId,
        _protocol: Protocol,
        _endpoint: &str,
    ) -> RemoteResult<SubscriptionId> {
        Err(RemoteError::new("NotSupported", "static transport"))
    }

    fn unsubscribe(&self, _id: &SubscriptionId) -> RemoteResult<()> {
        Err(RemoteError::new("NotSupported", "static transport"))
    }

    fn list_subscriptions(&self, _id: Option<&ResourceId>) -> RemoteResult<Vec<SubscriptionInfo>> {
        Ok(Vec::new())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn persistent_config(dir: &TempDir, prefix: &str, endpoint: &str) -> NotifierConfig {
    NotifierConfig::new(prefix, dir.path().join(endpoint))
        .with_log(LogConfig::default())
        .with_subscriber(SubscriberConfig::local(endpoint))
}

fn drain(notifier: &Notifier, inbox: &Receiver<Notification>) -> Vec<Routed> {
    let handler = notifier.subscriber().unwrap();
    inbox
        .try_iter()
        .map(|notification| handler.handle(notification).unwrap())
        .collect()
}

// --- Registry Scenarios ---

#[test]
fn test_reconcile_adopts_only_prefixed_topics() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(StaticTransport::with(&[("app-x", "r1"), ("other-y", "r2")]));
    let registry =
        TopicRegistry::open("app", dir.path().join("topic_mapping.json"), transport).unwrap();

    assert_eq!(registry.reconcile().unwrap(), vec!["x".to_string()]);
    assert_eq!(registry.resolve("x").unwrap(), ResourceId::new("r1"));
    assert!(matches!(registry.resolve("y"), Err(NotifyError::NotFound(_))));
}

#[test]
fn test_reconcile_readopts_replaced_resource_in_one_pass() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("topic_mapping.json");
    std::fs::write(&path, br#"{"foo":"old"}"#).unwrap();

    let transport = Arc::new(StaticTransport::with(&[("app-foo", "new")]));
    let registry = TopicRegistry::open("app", &path, transport).unwrap();

    let first = registry.reconcile().unwrap();
    assert_eq!(first, vec!["foo".to_string()]);
    assert_eq!(registry.resolve("foo").unwrap(), ResourceId::new("new"));

    // Same listing again: same names, nothing rewritten.
    std::fs::remove_file(&path).unwrap();
    let second = registry.reconcile().unwrap();
    assert_eq!(second, first);
    assert!(!path.exists());
}

#[test]
fn test_reconcile_prunes_and_adopts_out_of_band_changes() {
    let dir = TempDir::new().unwrap();
    let transport = MemoryTransport::default();
    let registry = TopicRegistry::open(
        "app",
        dir.path().join("topic_mapping.json"),
        Arc::new(transport.clone()),
    )
    .unwrap();

    registry.register("keep").unwrap();
    registry.register("gone").unwrap();

    transport.delete_external("app-gone");
    transport.create_external("app-new");

    assert_eq!(
        registry.reconcile().unwrap(),
        vec!["keep".to_string(), "new".to_string()]
    );
    assert!(matches!(registry.resolve("gone"), Err(NotifyError::NotFound(_))));

    // The healed mapping survives a reload.
    let reloaded = TopicRegistry::open(
        "app",
        dir.path().join("topic_mapping.json"),
        Arc::new(transport),
    )
    .unwrap();
    assert_eq!(reloaded.names(), vec!["keep".to_string(), "new".to_string()]);
}

#[test]
fn test_two_prefixes_share_one_authority() {
    let dir = TempDir::new().unwrap();
    let transport = MemoryTransport::default();

    let alpha = Notifier::open(
        NotifierConfig::new("alpha", dir.path().join("alpha")),
        Arc::new(transport.clone()),
    )
    .unwrap();
    let beta = Notifier::open(
        NotifierConfig::new("beta", dir.path().join("beta")),
        Arc::new(transport.clone()),
    )
    .unwrap();

    alpha.create_topic("events").unwrap();
    beta.create_topic("events").unwrap();

    assert_ne!(
        alpha.topic_arn("events").unwrap(),
        beta.topic_arn("events").unwrap()
    );
    assert_eq!(alpha.list_topics().unwrap(), vec!["events".to_string()]);
    assert_eq!(beta.list_topics().unwrap(), vec!["events".to_string()]);
}

// --- Facade ---

#[test]
fn test_topic_lifecycle_through_facade() {
    let dir = TempDir::new().unwrap();
    let transport = MemoryTransport::default();
    let notifier = Notifier::open(
        NotifierConfig::new("shop", dir.path().join("data")),
        Arc::new(transport.clone()),
    )
    .unwrap();

    notifier.create_topic("orders").unwrap();
    notifier.create_topic("invoices").unwrap();
    assert_eq!(
        notifier.list_topics().unwrap(),
        vec!["invoices".to_string(), "orders".to_string()]
    );

    let arn = notifier.topic_arn("orders").unwrap();
    assert!(arn.as_str().ends_with(":shop-orders"));

    notifier.delete_topic("orders").unwrap();
    assert_eq!(notifier.list_topics().unwrap(), vec!["invoices".to_string()]);
    assert!(transport.list_resources().unwrap().iter().all(|r| r.name != "shop-orders"));
}

#[test]
fn test_registry_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let transport = MemoryTransport::default();
    let config = NotifierConfig::new("app", dir.path().join("data"));

    let id = {
        let notifier = Notifier::open(config.clone(), Arc::new(transport.clone())).unwrap();
        notifier.create_topic("a").unwrap();
        notifier.topic_arn("a").unwrap()
    };

    let notifier = Notifier::open(
        config.with_reconcile_on_open(false),
        Arc::new(transport),
    )
    .unwrap();
    assert_eq!(notifier.registry().resolve("a").unwrap(), id);
}

// --- Persistent Subscriber ---

#[test]
fn test_persistent_subscriber_logs_messages() {
    let dir = TempDir::new().unwrap();
    let transport = MemoryTransport::default();
    let inbox = transport.inbox("worker");

    let notifier = Notifier::open(
        persistent_config(&dir, "app", "worker"),
        Arc::new(transport.clone()),
    )
    .unwrap();
    notifier.create_topic("orders").unwrap();
    assert_eq!(notifier.start_subscriber().unwrap(), vec!["orders".to_string()]);

    notifier.publish("orders", "hello").unwrap();
    notifier.publish("orders", "world").unwrap();
    drain(&notifier, &inbox);

    let records = notifier
        .messages(MessageFilter::all().topic("orders"))
        .unwrap()
        .collect_records()
        .unwrap();
    let payloads: Vec<_> = records.iter().map(|r| r.payload_str().unwrap()).collect();
    assert_eq!(payloads, vec!["hello", "world"]);
}

#[test]
fn test_announcements_reach_other_instances() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let transport = MemoryTransport::default();
    let worker_inbox = transport.inbox("worker");

    let worker = Notifier::open(
        persistent_config(&dir, "app", "worker"),
        Arc::new(transport.clone()),
    )
    .unwrap();
    worker.start_subscriber().unwrap();

    let admin = Notifier::open(
        NotifierConfig::new("app", dir.path().join("admin")),
        Arc::new(transport.clone()),
    )
    .unwrap();
    admin.list_topics().unwrap();
    admin.create_topic("alerts").unwrap();

    assert_eq!(
        drain(&worker, &worker_inbox),
        vec![Routed::Attached("alerts".to_string())]
    );

    admin.publish("alerts", "disk full").unwrap();
    let routed = drain(&worker, &worker_inbox);
    assert!(matches!(routed.as_slice(), [Routed::Logged(r)] if r.topic == "alerts"));

    // Announcements themselves are never logged.
    assert_eq!(worker.log().unwrap().len(), 1);
    assert!(!admin.list_topics().unwrap().contains(&"_topic_announcements".to_string()));
}

#[test]
fn test_subscriber_runs_on_its_own_thread() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let transport = MemoryTransport::default();
    let inbox = transport.inbox("worker");

    let notifier = Arc::new(
        Notifier::open(
            persistent_config(&dir, "app", "worker"),
            Arc::new(transport.clone()),
        )
        .unwrap(),
    );
    notifier.create_topic("jobs").unwrap();
    notifier.start_subscriber().unwrap();

    let runner = {
        let notifier = Arc::clone(&notifier);
        thread::spawn(move || notifier.run_subscriber(inbox))
    };

    for i in 0..20 {
        notifier.publish("jobs", format!("job-{i}")).unwrap();
    }
    transport.close_inbox("worker");

    assert_eq!(runner.join().unwrap().unwrap(), 20);

    let records = notifier.log().unwrap().records().unwrap();
    let expected: Vec<String> = (0..20).map(|i| format!("job-{i}")).collect();
    let actual: Vec<String> = records
        .iter()
        .map(|r| r.payload_str().unwrap().to_string())
        .collect();
    assert_eq!(actual, expected);
}

#[test]
fn test_log_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let transport = MemoryTransport::default();

    {
        let inbox = transport.inbox("worker");
        let notifier = Notifier::open(
            persistent_config(&dir, "app", "worker"),
            Arc::new(transport.clone()),
        )
        .unwrap();
        notifier.create_topic("orders").unwrap();
        notifier.start_subscriber().unwrap();
        notifier.publish("orders", "before restart").unwrap();
        drain(&notifier, &inbox);
    }

    let notifier = Notifier::open(
        persistent_config(&dir, "app", "worker"),
        Arc::new(transport),
    )
    .unwrap();
    let records = notifier
        .messages(MessageFilter::all())
        .unwrap()
        .collect_records()
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload_str(), Some("before restart"));
}
