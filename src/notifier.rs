//! Main Notifier struct tying the registry, the log and the transport together.

use crate::error::{NotifyError, Result};
use crate::log::{MessageFilter, MessageLog, MessageQuery};
use crate::registry::{TopicRegistry, DEFAULT_CONTROL_TOPIC};
use crate::subscriber::{SubscriberConfig, SubscriptionHandler};
use crate::transport::{RemoteTransport, SubscriptionInfo};
use crate::types::{MessageId, Notification, Protocol, ResourceId, SubscriptionId};
use crossbeam_channel::Receiver;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Message log settings. Present only for persistent subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// File name inside the data directory.
    pub file: String,

    /// Sync every N appends.
    pub sync_interval: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: "messages.log".to_string(),
            sync_interval: MessageLog::DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// Notifier configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Prefix of every remote topic this application owns.
    pub app_prefix: String,

    /// Directory holding the mapping, the log and the lock file.
    pub data_dir: PathBuf,

    /// Mapping file name inside the data directory.
    pub mapping_file: String,

    /// Reserved logical name for topic announcements.
    pub control_topic: String,

    /// Persist received messages (persistent-subscriber variant).
    pub log: Option<LogConfig>,

    /// Endpoint to attach to topics. `None` disables the subscriber.
    pub subscriber: Option<SubscriberConfig>,

    /// Whether to create the data directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Reconcile with the authority while opening.
    pub reconcile_on_open: bool,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            app_prefix: "app".to_string(),
            data_dir: PathBuf::from("./notifier"),
            mapping_file: "topic_mapping.json".to_string(),
            control_topic: DEFAULT_CONTROL_TOPIC.to_string(),
            log: None,
            subscriber: None,
            create_if_missing: true,
            reconcile_on_open: true,
        }
    }
}

impl NotifierConfig {
    pub fn new(app_prefix: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_prefix: app_prefix.into(),
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_subscriber(mut self, subscriber: SubscriberConfig) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    pub fn with_control_topic(mut self, name: impl Into<String>) -> Self {
        self.control_topic = name.into();
        self
    }

    pub fn with_reconcile_on_open(mut self, reconcile: bool) -> Self {
        self.reconcile_on_open = reconcile;
        self
    }
}

/// Facade over one application's topics.
///
/// Provides:
/// - topic registration, deletion and listing (with reconciliation)
/// - publish and subscription pass-throughs by logical name
/// - an optional subscriber that persists what it receives
pub struct Notifier {
    config: NotifierConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    transport: Arc<dyn RemoteTransport>,
    registry: Arc<TopicRegistry>,
    log: Option<Arc<MessageLog>>,
    subscriber: Option<SubscriptionHandler>,
}

impl Notifier {
    /// Open the data directory and wire the components together.
    pub fn open(config: NotifierConfig, transport: Arc<dyn RemoteTransport>) -> Result<Self> {
        if !config.data_dir.exists() {
            if !config.create_if_missing {
                return Err(NotifyError::NotConfigured(format!(
                    "data directory {} does not exist",
                    config.data_dir.display()
                )));
            }
            fs::create_dir_all(&config.data_dir)?;
        }

        let lock_file = Self::acquire_lock(&config.data_dir)?;

        let registry = Arc::new(
            TopicRegistry::open(
                config.app_prefix.clone(),
                config.data_dir.join(&config.mapping_file),
                Arc::clone(&transport),
            )?
            .with_control_topic(config.control_topic.clone())?,
        );

        if config.reconcile_on_open {
            registry.reconcile()?;
        }

        let log = match config.log {
            Some(ref log_config) => Some(Arc::new(MessageLog::open_with_sync_interval(
                config.data_dir.join(&log_config.file),
                log_config.sync_interval,
            )?)),
            None => None,
        };

        let subscriber = config.subscriber.clone().map(|sub_config| {
            let handler =
                SubscriptionHandler::new(Arc::clone(&registry), Arc::clone(&transport), sub_config);
            match log {
                Some(ref log) => handler.with_log(Arc::clone(log)),
                None => handler,
            }
        });

        info!(
            prefix = %config.app_prefix,
            data_dir = %config.data_dir.display(),
            topics = registry.names().len(),
            persistent = log.is_some(),
            "opened notifier"
        );

        Ok(Self {
            config,
            _lock_file: lock_file,
            transport,
            registry,
            log,
            subscriber,
        })
    }

    // --- Topic Operations ---

    pub fn create_topic(&self, name: &str) -> Result<String> {
        self.registry.register(name)
    }

    pub fn delete_topic(&self, name: &str) -> Result<()> {
        self.registry.unregister(name)
    }

    /// Reconcile with the authority and list the application's topics.
    pub fn list_topics(&self) -> Result<Vec<String>> {
        self.registry.reconcile()
    }

    /// Resource identifier of a topic, reconciling once if it is unknown.
    pub fn topic_arn(&self, name: &str) -> Result<ResourceId> {
        match self.registry.resolve(name) {
            Err(NotifyError::NotFound(_)) => {
                self.registry.reconcile()?;
                self.registry.resolve(name)
            }
            other => other,
        }
    }

    // --- Publish / Subscribe ---

    pub fn publish(&self, topic: &str, message: impl AsRef<[u8]>) -> Result<MessageId> {
        let id = self.registry.resolve(topic)?;
        Ok(self.transport.publish(&id, message.as_ref())?)
    }

    pub fn subscribe(
        &self,
        topic: &str,
        protocol: Protocol,
        endpoint: &str,
    ) -> Result<SubscriptionId> {
        let id = self.registry.resolve(topic)?;
        Ok(self.transport.subscribe(&id, protocol, endpoint)?)
    }

    pub fn unsubscribe(&self, subscription: &SubscriptionId) -> Result<()> {
        Ok(self.transport.unsubscribe(subscription)?)
    }

    /// Subscriptions of one topic, or of every topic on the authority.
    pub fn list_subscriptions(&self, topic: Option<&str>) -> Result<Vec<SubscriptionInfo>> {
        let id = topic.map(|t| self.registry.resolve(t)).transpose()?;
        Ok(self.transport.list_subscriptions(id.as_ref())?)
    }

    // --- Persistent Subscriber ---

    fn handler(&self) -> Result<&SubscriptionHandler> {
        self.subscriber
            .as_ref()
            .ok_or_else(|| NotifyError::NotConfigured("subscriber".to_string()))
    }

    /// Attach the configured endpoint to every topic and the announcement topic.
    pub fn start_subscriber(&self) -> Result<Vec<String>> {
        self.handler()?.attach_all()
    }

    /// Route notifications from `inbox` until it disconnects.
    pub fn run_subscriber(&self, inbox: Receiver<Notification>) -> Result<usize> {
        self.handler()?.run(inbox)
    }

    /// Stored messages matching `filter`.
    pub fn messages(&self, filter: MessageFilter) -> Result<MessageQuery> {
        self.log
            .as_ref()
            .map(|log| log.query(filter))
            .ok_or_else(|| NotifyError::NotConfigured("message log".to_string()))
    }

    // --- Accessors ---

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn log(&self) -> Option<&MessageLog> {
        self.log.as_deref()
    }

    pub fn subscriber(&self) -> Option<&SubscriptionHandler> {
        self.subscriber.as_ref()
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// Get the data directory.
    pub fn path(&self) -> &Path {
        &self.config.data_dir
    }

    /// Sync all data to disk.
    pub fn sync(&self) -> Result<()> {
        if let Some(ref log) = self.log {
            log.sync()?;
        }
        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| NotifyError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}
