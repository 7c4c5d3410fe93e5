//! Per-node metadata registry.
//!
//! Metadata is a map from node id to a string map. Readers may run
//! concurrently with each other but never with a writer. The registry sits
//! behind [`MetadataRegistry`] so a persisted implementation can replace
//! [`InMemoryMetadata`] without touching the apply path.

use std::{collections::BTreeMap, fmt, sync::Arc};

use parking_lot::RwLock;

/// Metadata of every node, keyed by node id.
pub type MetadataMap = BTreeMap<String, BTreeMap<String, String>>;

/// Storage for per-node metadata.
pub trait MetadataRegistry: Send + Sync + fmt::Debug {
    /// Value of `key` for `node_id`, or an empty string when either is absent.
    fn get(&self, node_id: &str, key: &str) -> String;

    /// Every pair stored for `node_id`; empty when the node is unknown.
    fn node(&self, node_id: &str) -> BTreeMap<String, String>;

    /// Merges `kv` into the node's pairs, overwriting existing keys.
    fn set(&self, node_id: &str, kv: BTreeMap<String, String>);

    /// Removes the node and all its pairs.
    fn delete(&self, node_id: &str);

    /// Copy of the whole map.
    fn export(&self) -> MetadataMap;

    /// Replaces the whole map.
    fn replace(&self, map: MetadataMap);
}

/// [`MetadataRegistry`] held in memory under a read-write lock.
#[derive(Debug, Default)]
pub struct InMemoryMetadata {
    nodes: RwLock<MetadataMap>,
}

impl InMemoryMetadata {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataRegistry for InMemoryMetadata {
    fn get(&self, node_id: &str, key: &str) -> String {
        self.nodes.read().get(node_id).and_then(|kv| kv.get(key)).cloned().unwrap_or_default()
    }

    fn node(&self, node_id: &str) -> BTreeMap<String, String> {
        self.nodes.read().get(node_id).cloned().unwrap_or_default()
    }

    fn set(&self, node_id: &str, kv: BTreeMap<String, String>) {
        self.nodes.write().entry(node_id.to_string()).or_default().extend(kv);
    }

    fn delete(&self, node_id: &str) {
        self.nodes.write().remove(node_id);
    }

    fn export(&self) -> MetadataMap {
        self.nodes.read().clone()
    }

    fn replace(&self, map: MetadataMap) {
        *self.nodes.write() = map;
    }
}

/// Cloneable read handle over the state machine's metadata.
///
/// Lookups never fail; a missing node or key reads as an empty string.
#[derive(Debug, Clone)]
pub struct MetadataHandle {
    registry: Arc<dyn MetadataRegistry>,
}

impl MetadataHandle {
    /// Wraps a registry.
    pub fn new(registry: Arc<dyn MetadataRegistry>) -> Self {
        Self { registry }
    }

    /// Value of `key` for `node_id`, or `""`.
    pub fn get(&self, node_id: &str, key: &str) -> String {
        self.registry.get(node_id, key)
    }

    /// Every pair stored for `node_id`.
    pub fn node(&self, node_id: &str) -> BTreeMap<String, String> {
        self.registry.node(node_id)
    }

    pub(crate) fn registry(&self) -> &dyn MetadataRegistry {
        self.registry.as_ref()
    }
}

impl Default for MetadataHandle {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryMetadata::new()))
    }
}
