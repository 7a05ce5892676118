//! An in-memory mirror of a watched collection.

use crate::index::{IndexError, SharedIndexFn};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use kube::{api::ObjectMeta, runtime::watcher::Event};
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

pub type SharedStore<T> = Arc<RwLock<Store<T>>>;

/// Identifies an object within a store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

/// A change to a mirrored collection.
#[derive(Clone, Debug)]
pub enum Change<T> {
    Event(Event<T>),

    /// An object changed in a way that cannot be mirrored, so any mirrored version of it is
    /// stale.
    Evict(ObjectKey),
}

/// Holds the latest version of every object in a collection, along with its secondary indexes.
pub struct Store<T> {
    objects: HashMap<ObjectKey, T>,
    indexers: BTreeMap<String, SharedIndexFn<T>>,
    indices: HashMap<String, Index>,

    // Objects received since the last `Init` event, swapped in on `InitDone`.
    pending: Option<Vec<T>>,
}

#[derive(Debug, Default)]
struct Index {
    by_value: HashMap<String, HashSet<ObjectKey>>,
    by_object: HashMap<ObjectKey, Vec<String>>,
}

// === impl ObjectKey ===

impl ObjectKey {
    pub fn new(namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    pub fn of<T: kube::Resource>(obj: &T) -> Self {
        Self::from_meta(obj.meta())
    }

    pub fn from_meta(meta: &ObjectMeta) -> Self {
        let name = meta
            .name
            .clone()
            .or_else(|| meta.generate_name.clone())
            .unwrap_or_default();
        Self::new(meta.namespace.clone(), name)
    }
}

// === impl Change ===

impl<T> Change<T> {
    /// Returns the watch event, if this change is one.
    pub fn into_event(self) -> Option<Event<T>> {
        match self {
            Self::Event(ev) => Some(ev),
            Self::Evict(_) => None,
        }
    }
}

// === impl Store ===

impl<T> Store<T>
where
    T: kube::Resource + Clone + 'static,
{
    pub fn new(indexers: BTreeMap<String, SharedIndexFn<T>>) -> Self {
        let indices = indexers
            .keys()
            .map(|name| (name.clone(), Index::default()))
            .collect();
        Self {
            objects: HashMap::default(),
            indexers,
            indices,
            pending: None,
        }
    }

    pub fn shared(indexers: BTreeMap<String, SharedIndexFn<T>>) -> SharedStore<T> {
        Arc::new(RwLock::new(Self::new(indexers)))
    }

    /// Updates the store with a watch event.
    ///
    /// Events between `Init` and `InitDone` are buffered and replace the store's contents once
    /// the resync completes.
    pub fn apply_event(&mut self, event: Event<T>) -> Result<(), IndexError> {
        match event {
            Event::Apply(obj) => self.apply(obj),
            Event::Delete(obj) => {
                self.delete(&ObjectKey::of(&obj));
                Ok(())
            }
            Event::Init => {
                self.pending = Some(Vec::new());
                Ok(())
            }
            Event::InitApply(obj) => {
                self.pending.get_or_insert_with(Vec::new).push(obj);
                Ok(())
            }
            Event::InitDone => {
                let objs = self.pending.take().unwrap_or_default();
                self.reset(objs)
            }
        }
    }

    pub fn apply_change(&mut self, change: Change<T>) -> Result<(), IndexError> {
        match change {
            Change::Event(ev) => self.apply_event(ev),
            Change::Evict(key) => {
                self.delete(&key);
                Ok(())
            }
        }
    }

    /// Inserts or replaces an object.
    ///
    /// The object is stored even when it cannot be indexed.
    pub fn apply(&mut self, obj: T) -> Result<(), IndexError> {
        let key = ObjectKey::of(&obj);
        self.unindex(&key);

        let mut result = Ok(());
        for (name, indexer) in &self.indexers {
            match indexer.index_keys(&obj) {
                Ok(values) => {
                    if let Some(index) = self.indices.get_mut(name) {
                        index.insert(&key, values);
                    }
                }
                Err(error) => result = Err(error),
            }
        }
        self.objects.insert(key, obj);
        result
    }

    pub fn delete(&mut self, key: &ObjectKey) -> Option<T> {
        self.unindex(key);
        self.objects.remove(key)
    }

    /// Replaces the contents of the store.
    pub fn reset(&mut self, objs: Vec<T>) -> Result<(), IndexError> {
        self.objects.clear();
        for index in self.indices.values_mut() {
            *index = Index::default();
        }

        let mut result = Ok(());
        for obj in objs {
            if let Err(error) = self.apply(obj) {
                result = Err(error);
            }
        }
        result
    }

    pub fn get(&self, namespace: Option<&str>, name: &str) -> Option<&T> {
        self.objects
            .get(&ObjectKey::new(namespace.map(Into::into), name))
    }

    /// Returns the objects indexed under `value` in the named index, ordered by key.
    pub fn by_index(&self, index: &str, value: &str) -> Vec<T> {
        let Some(keys) = self
            .indices
            .get(index)
            .and_then(|idx| idx.by_value.get(value))
        else {
            return Vec::new();
        };
        let mut keys = keys.iter().collect::<Vec<_>>();
        keys.sort();
        keys.into_iter()
            .filter_map(|k| self.objects.get(k).cloned())
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ObjectKey> {
        self.objects.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn unindex(&mut self, key: &ObjectKey) {
        for index in self.indices.values_mut() {
            index.remove(key);
        }
    }
}

// === impl Index ===

impl Index {
    fn insert(&mut self, key: &ObjectKey, values: impl IntoIterator<Item = String>) {
        let values = values.into_iter().collect::<Vec<_>>();
        if values.is_empty() {
            return;
        }
        for value in &values {
            self.by_value
                .entry(value.clone())
                .or_default()
                .insert(key.clone());
        }
        self.by_object.insert(key.clone(), values);
    }

    fn remove(&mut self, key: &ObjectKey) {
        for value in self.by_object.remove(key).into_iter().flatten() {
            if let Some(keys) = self.by_value.get_mut(&value) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_value.remove(&value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{index::LocalEndpointIndex, LocalNode, LOCAL_NODE_INDEX};
    use kube::ResourceExt;
    use netmirror_k8s_api::workload::{EndpointNetworking, LocalEndpoint};

    fn mk_endpoint(name: &str, node_ip: &str) -> LocalEndpoint {
        LocalEndpoint {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns-0".to_string()),
                ..Default::default()
            },
            identity: None,
            networking: Some(EndpointNetworking {
                addressing: vec![],
                node_ip: node_ip.to_string(),
            }),
        }
    }

    fn mk_store(node: &LocalNode) -> Store<LocalEndpoint> {
        let mut indexers = BTreeMap::new();
        indexers.insert(
            LOCAL_NODE_INDEX.to_string(),
            Arc::new(LocalEndpointIndex::new(node.clone())) as SharedIndexFn<LocalEndpoint>,
        );
        Store::new(indexers)
    }

    fn names(eps: Vec<LocalEndpoint>) -> Vec<String> {
        eps.into_iter().map(|ep| ep.name_any()).collect()
    }

    #[test]
    fn index_follows_updates() {
        let node = LocalNode::from_ip("10.0.0.5");
        let mut store = mk_store(&node);

        store.apply(mk_endpoint("web-0", "10.0.0.5")).unwrap();
        store.apply(mk_endpoint("web-1", "10.0.0.6")).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(names(store.by_index(LOCAL_NODE_INDEX, "10.0.0.5")), vec!["web-0"]);

        // Moving an endpoint off the node removes it from the index.
        store.apply(mk_endpoint("web-0", "10.0.0.6")).unwrap();
        assert!(store.by_index(LOCAL_NODE_INDEX, "10.0.0.5").is_empty());

        store.apply(mk_endpoint("web-1", "10.0.0.5")).unwrap();
        store.delete(&ObjectKey::new(Some("ns-0".to_string()), "web-1"));
        assert!(store.by_index(LOCAL_NODE_INDEX, "10.0.0.5").is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn resync_replaces_contents() {
        let node = LocalNode::from_ip("10.0.0.5");
        let mut store = mk_store(&node);
        store.apply(mk_endpoint("stale", "10.0.0.5")).unwrap();

        store.apply_event(Event::Init).unwrap();
        store
            .apply_event(Event::InitApply(mk_endpoint("web-0", "10.0.0.5")))
            .unwrap();
        // The store is unchanged until the resync completes.
        assert!(store.get(Some("ns-0"), "stale").is_some());

        store.apply_event(Event::InitDone).unwrap();
        assert!(store.get(Some("ns-0"), "stale").is_none());
        assert_eq!(names(store.by_index(LOCAL_NODE_INDEX, "10.0.0.5")), vec!["web-0"]);
    }

    #[test]
    fn unindexable_objects_are_stored() {
        let node = LocalNode::pending();
        let mut store = mk_store(&node);
        assert!(matches!(
            store.apply_event(Event::Apply(mk_endpoint("web-0", "10.0.0.5"))),
            Err(IndexError::NodeNotReady)
        ));
        assert_eq!(store.len(), 1);
        assert!(store.by_index("unknown", "10.0.0.5").is_empty());
    }

    #[test]
    fn evicts_by_key() {
        let node = LocalNode::from_ip("10.0.0.5");
        let mut store = mk_store(&node);
        store.apply(mk_endpoint("web-0", "10.0.0.5")).unwrap();
        store.apply(mk_endpoint("web-1", "10.0.0.5")).unwrap();

        let key = ObjectKey::from_meta(&ObjectMeta {
            name: Some("web-0".to_string()),
            namespace: Some("ns-0".to_string()),
            ..Default::default()
        });
        assert_eq!(key, ObjectKey::of(&mk_endpoint("web-0", "10.0.0.6")));
        store.apply_change(Change::Evict(key)).unwrap();

        assert!(store.get(Some("ns-0"), "web-0").is_none());
        assert_eq!(names(store.by_index(LOCAL_NODE_INDEX, "10.0.0.5")), vec!["web-1"]);

        // Evicting an unknown object is a no-op.
        store
            .apply_change(Change::Evict(ObjectKey::new(None, "missing")))
            .unwrap();
        assert_eq!(store.len(), 1);
    }
}
