//! Topic registry implementation.

use super::mapping::MappingFile;
use crate::error::{NotifyError, Result};
use crate::transport::RemoteTransport;
use crate::types::{validate_name_chars, ResourceId, MAX_REMOTE_NAME_LEN};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reserved logical name used to announce newly registered topics.
pub const DEFAULT_CONTROL_TOPIC: &str = "_topic_announcements";

/// In-memory mapping plus its reverse index.
#[derive(Debug, Default)]
struct TopicMap {
    by_name: BTreeMap<String, ResourceId>,
    by_id: HashMap<ResourceId, String>,
    /// The durable copy is known to be stale.
    dirty: bool,
}

impl TopicMap {
    fn from_entries(by_name: BTreeMap<String, ResourceId>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(by_name.len());
        for (name, id) in &by_name {
            if let Some(other) = by_id.insert(id.clone(), name.clone()) {
                return Err(NotifyError::Corruption(format!(
                    "resource {id} is mapped by both {other:?} and {name:?}"
                )));
            }
        }
        Ok(Self {
            by_name,
            by_id,
            dirty: false,
        })
    }

    fn get(&self, name: &str) -> Option<&ResourceId> {
        self.by_name.get(name)
    }

    fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    fn insert(&mut self, name: &str, id: ResourceId) {
        self.by_id.insert(id.clone(), name.to_string());
        self.by_name.insert(name.to_string(), id);
    }

    fn remove(&mut self, name: &str) -> Option<ResourceId> {
        let id = self.by_name.remove(name)?;
        self.by_id.remove(&id);
        Some(id)
    }
}

/// Name -> resource-id registry for one application prefix.
///
/// Mutations (`register`, `unregister`, `reconcile`, `ensure_control_topic`)
/// are serialized by one lock and each ends with a full rewrite of the
/// mapping file. Reads take the map's read lock and never observe a
/// half-applied mutation.
pub struct TopicRegistry {
    prefix: String,
    control_topic: String,
    file: MappingFile,
    transport: Arc<dyn RemoteTransport>,
    map: RwLock<TopicMap>,
    write_lock: Mutex<()>,
}

impl TopicRegistry {
    /// Open a registry, loading any mapping persisted at `path`.
    pub fn open(
        prefix: impl Into<String>,
        path: impl AsRef<Path>,
        transport: Arc<dyn RemoteTransport>,
    ) -> Result<Self> {
        let prefix = prefix.into();
        validate_name_chars(&prefix)?;

        let file = MappingFile::new(path);
        let map = TopicMap::from_entries(file.load()?)?;
        debug!(
            prefix = %prefix,
            path = %file.path().display(),
            topics = map.by_name.len(),
            "loaded topic mapping"
        );

        Ok(Self {
            prefix,
            control_topic: DEFAULT_CONTROL_TOPIC.to_string(),
            file,
            transport,
            map: RwLock::new(map),
            write_lock: Mutex::new(()),
        })
    }

    /// Use a different reserved name for the announcement topic.
    pub fn with_control_topic(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name_chars(&name)?;
        self.control_topic = name;
        Ok(self)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn control_topic(&self) -> &str {
        &self.control_topic
    }

    pub fn mapping_path(&self) -> &Path {
        self.file.path()
    }

    /// Remote-visible name of a logical topic.
    pub fn remote_name(&self, name: &str) -> String {
        format!("{}-{}", self.prefix, name)
    }

    /// Whether `name` is the reserved announcement topic.
    pub fn is_control_topic(&self, name: &str) -> bool {
        name == self.control_topic
    }

    fn validate_name(&self, name: &str) -> Result<()> {
        validate_name_chars(name)?;
        if self.prefix.len() + 1 + name.len() > MAX_REMOTE_NAME_LEN {
            return Err(NotifyError::invalid_name(
                name,
                format!("remote name would exceed {MAX_REMOTE_NAME_LEN} characters"),
            ));
        }
        Ok(())
    }

    fn reject_reserved(&self, name: &str) -> Result<()> {
        if self.is_control_topic(name) {
            return Err(NotifyError::invalid_name(name, "reserved for announcements"));
        }
        Ok(())
    }

    // --- Mutations ---

    /// Create `name` at the authority and start tracking it.
    pub fn register(&self, name: &str) -> Result<String> {
        self.validate_name(name)?;
        self.reject_reserved(name)?;

        {
            let _lock = self.write_lock.lock();
            self.create_locked(name)?;
        }

        self.announce(name);
        Ok(name.to_string())
    }

    /// Register the announcement topic if it is not tracked yet.
    pub fn ensure_control_topic(&self) -> Result<ResourceId> {
        let _lock = self.write_lock.lock();
        if let Some(id) = self.map.read().get(&self.control_topic) {
            return Ok(id.clone());
        }
        self.create_locked(&self.control_topic.clone())
    }

    fn create_locked(&self, name: &str) -> Result<ResourceId> {
        if self.map.read().contains(name) {
            return Err(NotifyError::AlreadyExists(name.to_string()));
        }

        let remote_name = self.remote_name(name);
        let id = self.transport.create_resource(&remote_name)?;

        {
            let mut map = self.map.write();
            if let Some(owner) = map.by_id.get(&id) {
                return Err(NotifyError::AlreadyExists(format!(
                    "{name} (resource {id} is already tracked as {owner:?})"
                )));
            }
            map.insert(name, id.clone());
        }
        info!(topic = name, remote = %remote_name, resource = %id, "registered topic");

        self.flush_locked()?;
        Ok(id)
    }

    /// Delete `name` at the authority and stop tracking it.
    pub fn unregister(&self, name: &str) -> Result<()> {
        self.reject_reserved(name)?;

        let _lock = self.write_lock.lock();
        let id = self
            .map
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| NotifyError::NotFound(name.to_string()))?;

        self.transport.delete_resource(&id)?;
        self.map.write().remove(name);
        info!(topic = name, resource = %id, "unregistered topic");

        self.flush_locked()
    }

    /// Merge the authority's listing into the local mapping.
    ///
    /// Remote topics under `prefix-` that are not tracked are adopted; tracked
    /// topics whose resource no longer exists remotely are dropped. Returns
    /// the tracked logical names, sorted.
    pub fn reconcile(&self) -> Result<Vec<String>> {
        let _lock = self.write_lock.lock();

        // A listing failure aborts before anything is touched.
        let listing = self.transport.list_resources()?;
        let marker = format!("{}-", self.prefix);
        let live: HashSet<&ResourceId> = listing.iter().map(|r| &r.resource_id).collect();

        let mut adopted = Vec::new();
        let mut pruned = Vec::new();
        let needs_flush = {
            let mut map = self.map.write();

            // Prune before adopting so a name whose resource was replaced is
            // re-adopted under its live id in the same pass.
            let stale: Vec<String> = map
                .by_name
                .iter()
                .filter(|(_, id)| !live.contains(id))
                .map(|(name, _)| name.clone())
                .collect();
            for name in stale {
                map.remove(&name);
                pruned.push(name);
            }

            for resource in &listing {
                let Some(name) = resource.name.strip_prefix(&marker) else {
                    continue;
                };
                if self.validate_name(name).is_err() {
                    debug!(remote = %resource.name, "skipping remote topic with invalid name");
                    continue;
                }
                if map.contains(name) || map.by_id.contains_key(&resource.resource_id) {
                    continue;
                }
                map.insert(name, resource.resource_id.clone());
                adopted.push(name.to_string());
            }

            !adopted.is_empty() || !pruned.is_empty() || map.dirty
        };

        if needs_flush {
            self.flush_locked()?;
        }

        if adopted.is_empty() && pruned.is_empty() {
            debug!(prefix = %self.prefix, "topic mapping already in sync");
        } else {
            info!(
                prefix = %self.prefix,
                adopted = ?adopted,
                pruned = ?pruned,
                "reconciled topic mapping"
            );
        }

        Ok(self.names())
    }

    /// Rewrite the mapping file. Caller holds the write lock.
    fn flush_locked(&self) -> Result<()> {
        let snapshot = self.map.read().by_name.clone();
        match self.file.store(&snapshot) {
            Ok(()) => {
                self.map.write().dirty = false;
                Ok(())
            }
            Err(e) => {
                self.map.write().dirty = true;
                warn!(
                    path = %self.file.path().display(),
                    error = %e,
                    "failed to persist topic mapping"
                );
                Err(e)
            }
        }
    }

    /// Publish a newly registered name on the announcement topic, if tracked.
    fn announce(&self, name: &str) {
        let Some(control) = self.map.read().get(&self.control_topic).cloned() else {
            return;
        };
        match self.transport.publish(&control, name.as_bytes()) {
            Ok(message_id) => debug!(topic = name, message = %message_id, "announced topic"),
            Err(e) => warn!(topic = name, error = %e, "failed to announce topic"),
        }
    }

    // --- Reads ---

    /// Resource identifier of a tracked topic.
    pub fn resolve(&self, name: &str) -> Result<ResourceId> {
        self.map
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| NotifyError::NotFound(name.to_string()))
    }

    /// Logical name tracked for a resource identifier.
    pub fn name_of(&self, id: &ResourceId) -> Option<String> {
        self.map.read().by_id.get(id).cloned()
    }

    /// Tracked logical names, sorted, without the announcement topic.
    pub fn names(&self) -> Vec<String> {
        self.map
            .read()
            .by_name
            .keys()
            .filter(|name| !self.is_control_topic(name))
            .cloned()
            .collect()
    }

    /// Snapshot of every tracked entry, the announcement topic included.
    pub fn entries(&self) -> BTreeMap<String, ResourceId> {
        self.map.read().by_name.clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.read().contains(name)
    }

    /// Number of tracked topics, the announcement topic included.
    pub fn len(&self) -> usize {
        self.map.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the durable copy is known to lag the in-memory mapping.
    pub fn is_dirty(&self) -> bool {
        self.map.read().dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::transport::{MemoryTransport, RemoteError, TransportOp};
    use std::fs;
    use tempfile::TempDir;

    fn open(dir: &TempDir, transport: &MemoryTransport) -> TopicRegistry {
        TopicRegistry::open(
            "app",
            dir.path().join("topic_mapping.json"),
            Arc::new(transport.clone()),
        )
        .unwrap()
    }

    #[test]
    fn test_register_and_resolve() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::default();
        let registry = open(&dir, &transport);

        assert_eq!(registry.register("orders").unwrap(), "orders");
        let id = registry.resolve("orders").unwrap();

        let remote = transport.list_resources().unwrap();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].name, "app-orders");
        assert_eq!(remote[0].resource_id, id);
        assert_eq!(registry.name_of(&id).as_deref(), Some("orders"));
    }

    #[test]
    fn test_register_duplicate() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::default();
        let registry = open(&dir, &transport);

        registry.register("orders").unwrap();
        let result = registry.register("orders");
        assert!(matches!(result, Err(NotifyError::AlreadyExists(_))));
        assert_eq!(transport.call_count(TransportOp::Create), 1);
    }

    #[test]
    fn test_register_rejects_invalid_and_reserved_names() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::default();
        let registry = open(&dir, &transport);

        for bad in ["", "with space", "a.b", DEFAULT_CONTROL_TOPIC] {
            let err = registry.register(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Invalid, "{bad:?}");
        }
        let too_long = "x".repeat(MAX_REMOTE_NAME_LEN);
        assert!(registry.register(&too_long).is_err());
        assert_eq!(transport.call_count(TransportOp::Create), 0);
    }

    #[test]
    fn test_remote_failure_leaves_no_local_change() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::default();
        let registry = open(&dir, &transport);

        transport.fail_next(TransportOp::Create, RemoteError::new("Throttled", "slow down"));
        let err = registry.register("orders").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert!(!registry.contains("orders"));
        assert!(!registry.mapping_path().exists());

        registry.register("orders").unwrap();
        transport.fail_next(TransportOp::Delete, RemoteError::new("AuthorizationError", "no"));
        assert!(matches!(
            registry.unregister("orders"),
            Err(NotifyError::Remote(ref e)) if e.code == "AuthorizationError"
        ));
        assert!(registry.resolve("orders").is_ok());
    }

    #[test]
    fn test_unregister() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::default();
        let registry = open(&dir, &transport);

        registry.register("orders").unwrap();
        registry.unregister("orders").unwrap();

        assert!(matches!(registry.resolve("orders"), Err(NotifyError::NotFound(_))));
        assert!(transport.list_resources().unwrap().is_empty());
        assert!(matches!(
            registry.unregister("orders"),
            Err(NotifyError::NotFound(_))
        ));
    }

    #[test]
    fn test_reconcile_adopts_and_filters_prefix() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::default();
        let x = transport.create_external("app-x");
        transport.create_external("other-y");
        transport.create_external("application-z");
        transport.create_external("app-");
        let registry = open(&dir, &transport);

        assert_eq!(registry.reconcile().unwrap(), vec!["x".to_string()]);
        assert_eq!(registry.resolve("x").unwrap(), x);
        assert!(matches!(registry.resolve("y"), Err(NotifyError::NotFound(_))));
    }

    #[test]
    fn test_reconcile_prunes_out_of_band_deletes() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::default();
        let registry = open(&dir, &transport);

        registry.register("keep").unwrap();
        registry.register("gone").unwrap();
        transport.delete_external("app-gone");

        assert_eq!(registry.reconcile().unwrap(), vec!["keep".to_string()]);
        assert!(matches!(registry.resolve("gone"), Err(NotifyError::NotFound(_))));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::default();
        transport.create_external("app-a");
        transport.create_external("app-b");
        let registry = open(&dir, &transport);

        let first = registry.reconcile().unwrap();
        let entries = registry.entries();

        // No change remotely: the mapping file must not be rewritten.
        fs::remove_file(registry.mapping_path()).unwrap();
        let second = registry.reconcile().unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.entries(), entries);
        assert!(!registry.mapping_path().exists());
    }

    #[test]
    fn test_reconcile_listing_failure_aborts() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::default();
        let registry = open(&dir, &transport);
        registry.register("orders").unwrap();
        transport.delete_external("app-orders");
        transport.create_external("app-new");

        transport.fail_next(TransportOp::List, RemoteError::new("ServiceUnavailable", "down"));
        assert!(registry.reconcile().is_err());
        assert!(registry.contains("orders"));
        assert!(!registry.contains("new"));
    }

    #[test]
    fn test_durability_round_trip() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::default();

        let id = {
            let registry = open(&dir, &transport);
            registry.register("a").unwrap();
            registry.resolve("a").unwrap()
        };

        let reopened = open(&dir, &transport);
        assert_eq!(reopened.resolve("a").unwrap(), id);
    }

    #[test]
    fn test_persist_failure_marks_dirty_and_reconcile_heals() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::default();
        let registry = open(&dir, &transport);

        // A directory in place of the mapping file makes the rename fail.
        fs::create_dir(registry.mapping_path()).unwrap();
        let err = registry.register("orders").unwrap_err();
        assert!(err.is_storage());
        assert!(registry.is_dirty());
        assert!(registry.resolve("orders").is_ok());

        fs::remove_dir(registry.mapping_path()).unwrap();
        assert_eq!(registry.reconcile().unwrap(), vec!["orders".to_string()]);
        assert!(!registry.is_dirty());
        assert!(registry.mapping_path().is_file());
    }

    #[test]
    fn test_announcement_on_register() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::default();
        let registry = open(&dir, &transport);

        // Without a control topic nothing is published.
        registry.register("early").unwrap();
        assert_eq!(transport.call_count(TransportOp::Publish), 0);

        let control = registry.ensure_control_topic().unwrap();
        assert_eq!(registry.ensure_control_topic().unwrap(), control);
        registry.register("late").unwrap();

        assert_eq!(transport.published_to(&control), vec![b"late".to_vec()]);
        assert_eq!(registry.names(), vec!["early".to_string(), "late".to_string()]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_announcement_failure_does_not_fail_register() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::default();
        let registry = open(&dir, &transport);
        registry.ensure_control_topic().unwrap();

        transport.fail_next(TransportOp::Publish, RemoteError::new("InternalError", "boom"));
        assert_eq!(registry.register("orders").unwrap(), "orders");
        assert!(registry.contains("orders"));
    }

    #[test]
    fn test_custom_control_topic() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::default();
        let registry = open(&dir, &transport)
            .with_control_topic("announcements")
            .unwrap();

        assert!(registry.register("announcements").is_err());
        assert!(registry.register(DEFAULT_CONTROL_TOPIC).is_ok());
        registry.ensure_control_topic().unwrap();
        assert!(registry
            .reconcile()
            .unwrap()
            .iter()
            .all(|n| n != "announcements"));
    }

    #[test]
    fn test_duplicate_resource_in_file_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("topic_mapping.json");
        fs::write(&path, r#"{"a": "arn:1", "b": "arn:1"}"#).unwrap();

        let result = TopicRegistry::open("app", &path, Arc::new(MemoryTransport::default()));
        assert!(matches!(result, Err(NotifyError::Corruption(_))));
    }
}
