use crate::{
    index::{IndexFn, SharedIndexFn},
    lister_watcher::{SharedListerWatcher, WatchEvent},
    store::{Change, ObjectKey, SharedStore},
    Error, ListOptions, LocalNode, MirrorMetrics,
};
use futures::prelude::*;
use kube::runtime::watcher::Event;
use netmirror_k8s_api::{type_meta, TypeMeta};
use std::{collections::BTreeMap, fmt, sync::Arc};
use tokio::time;
use tracing::{debug, error, info, warn};

type Transform<K, T> = Arc<dyn Fn(K) -> Result<T, (K, Error)> + Send + Sync>;
type Template = Arc<dyn Fn() -> TypeMeta + Send + Sync>;
type KeyFn<K> = Arc<dyn Fn(&K) -> ObjectKey + Send + Sync>;

/// A watched collection, received as `K` and mirrored as `T`.
pub struct Resource<K, T = K> {
    lw: SharedListerWatcher<K>,
    key: KeyFn<K>,
    transform: Transform<K, T>,
    template: Template,
    indexers: BTreeMap<String, SharedIndexFn<T>>,
    local_node: Option<LocalNode>,
    metric: &'static str,
    metrics: Option<MirrorMetrics>,
}

/// Transforms received objects, reporting the objects that cannot be transformed.
struct Decoder<K, T> {
    key: KeyFn<K>,
    transform: Transform<K, T>,
    resource: &'static str,
    metrics: Option<MirrorMetrics>,
}

// === impl Resource ===

impl<K> Resource<K>
where
    K: kube::Resource<DynamicType = ()> + Send + 'static,
{
    pub fn new(lw: SharedListerWatcher<K>) -> Self {
        Self::new_lazy(lw, ObjectKey::of::<K>, type_meta::<K>, Ok::<K, (K, Error)>)
    }
}

impl<K, T> Resource<K, T>
where
    K: Send + 'static,
    T: Send + 'static,
{
    /// Mirrors objects received as `K` as `T`. See [`Resource::with_lazy_transform`].
    ///
    /// `key` identifies a received object, so that a mirrored object can be evicted when a
    /// later version of it cannot be transformed.
    pub fn new_lazy(
        lw: SharedListerWatcher<K>,
        key: impl Fn(&K) -> ObjectKey + Send + Sync + 'static,
        template: impl Fn() -> TypeMeta + Send + Sync + 'static,
        transform: impl Fn(K) -> Result<T, (K, Error)> + Send + Sync + 'static,
    ) -> Self {
        Self {
            lw,
            key: Arc::new(key),
            transform: Arc::new(transform),
            template: Arc::new(template),
            indexers: BTreeMap::new(),
            local_node: None,
            metric: "",
            metrics: None,
        }
    }

    /// Mirrors objects as `U` rather than as received.
    ///
    /// `template` reports the type of the received objects. It is only evaluated when the type
    /// is requested, so that it may depend on state resolved by the first request. A transform
    /// that fails hands the object back with the error. Indexers must be added after the
    /// transform.
    pub fn with_lazy_transform<U>(
        self,
        template: impl Fn() -> TypeMeta + Send + Sync + 'static,
        transform: impl Fn(K) -> Result<U, (K, Error)> + Send + Sync + 'static,
    ) -> Resource<K, U> {
        Resource {
            lw: self.lw,
            key: self.key,
            transform: Arc::new(transform),
            template: Arc::new(template),
            indexers: BTreeMap::new(),
            local_node: self.local_node,
            metric: self.metric,
            metrics: self.metrics,
        }
    }

    pub fn with_indexer(mut self, name: impl Into<String>, index: impl IndexFn<T>) -> Self {
        self.indexers.insert(name.into(), Arc::new(index));
        self
    }

    /// Defers the resource's events until the local node's address is known.
    pub fn with_local_node(mut self, node: LocalNode) -> Self {
        self.local_node = Some(node);
        self
    }

    pub fn with_metric(mut self, name: &'static str) -> Self {
        self.metric = name;
        self
    }

    pub fn with_metrics(mut self, metrics: MirrorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The type of the objects received from the cluster.
    pub fn type_meta(&self) -> TypeMeta {
        (self.template)()
    }

    pub fn metric_name(&self) -> &'static str {
        self.metric
    }

    pub fn local_node(&self) -> Option<&LocalNode> {
        self.local_node.as_ref()
    }

    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.indexers.keys().map(String::as_str)
    }

    /// Returns an empty store carrying this resource's indexes.
    pub fn store(&self) -> SharedStore<T>
    where
        T: kube::Resource + Clone,
    {
        crate::Store::shared(self.indexers.clone())
    }

    /// Lists the collection and then watches it, listing again whenever the watch ends.
    ///
    /// Errors are yielded as they occur and the stream continues with a fresh list. Listed
    /// objects that cannot be transformed are left out of the resync. A watched object that
    /// cannot be transformed is evicted, since any mirrored version of it is stale.
    pub fn events(&self) -> impl Stream<Item = Result<Change<T>, Error>> + Send + 'static
    where
        K: fmt::Debug,
    {
        let lw = self.lw.clone();
        let decoder = Decoder {
            key: self.key.clone(),
            transform: self.transform.clone(),
            resource: self.metric,
            metrics: self.metrics.clone(),
        };
        async_stream::stream! {
            loop {
                let list = match lw.list(ListOptions::default()).await {
                    Ok(list) => list,
                    Err(error) => {
                        yield Err(error);
                        continue;
                    }
                };

                yield Ok(Change::Event(Event::Init));
                for obj in list.items {
                    if let Ok(obj) = decoder.transform(obj) {
                        yield Ok(Change::Event(Event::InitApply(obj)));
                    }
                }
                yield Ok(Change::Event(Event::InitDone));

                let opts = ListOptions {
                    resource_version: list.resource_version,
                    ..Default::default()
                };
                let mut watch = match lw.watch(opts).await {
                    Ok(watch) => watch,
                    Err(error) => {
                        yield Err(error);
                        continue;
                    }
                };
                while let Some(ev) = watch.next().await {
                    let change = match ev {
                        Ok(WatchEvent::Added(obj) | WatchEvent::Modified(obj)) => {
                            match decoder.transform(obj) {
                                Ok(obj) => Change::Event(Event::Apply(obj)),
                                Err(key) => Change::Evict(key),
                            }
                        }
                        Ok(WatchEvent::Deleted(obj)) => match decoder.transform(obj) {
                            Ok(obj) => Change::Event(Event::Delete(obj)),
                            Err(key) => Change::Evict(key),
                        },
                        Ok(WatchEvent::Bookmark { .. }) => continue,
                        Err(error) => {
                            yield Err(error);
                            break;
                        }
                    };
                    yield Ok(change);
                }
                debug!(resource = decoder.resource, "Watch ended");
            }
        }
    }

    /// Returns a stream of changes that never fails.
    ///
    /// If the resource depends on the local node, no changes are produced until its address is
    /// known. After an error, the stream waits 1s before listing again.
    pub fn stream(self) -> impl Stream<Item = Change<T>> + Send + 'static
    where
        K: fmt::Debug,
    {
        let local_node = self.local_node.clone();
        let resource = self.metric;
        let events = self.events();
        async_stream::stream! {
            if let Some(node) = local_node {
                let ip = node.ready().await;
                debug!(resource, %ip, "Local node ready");
            }

            let mut events = events.boxed();
            while let Some(ev) = events.next().await {
                match ev {
                    Ok(change) => {
                        yield change;
                    }
                    Err(error) => {
                        info!(resource, %error, "Failed");
                        time::sleep(time::Duration::from_secs(1)).await;
                        info!(resource, "Restarting");
                    }
                }
            }
        }
    }

    /// Mirrors the collection into `store` until the task is dropped.
    pub async fn run(self, store: SharedStore<T>)
    where
        K: fmt::Debug,
        T: kube::Resource + Clone,
    {
        let resource = self.metric;
        let metrics = self.metrics.clone();
        let template = self.template.clone();
        let mut synced = false;

        let mut changes = self.stream().boxed();
        while let Some(change) = changes.next().await {
            if let Some(metrics) = &metrics {
                metrics.observe(resource, &change);
            }
            let init_done = matches!(change, Change::Event(Event::InitDone));

            let size = {
                let mut store = store.write();
                if let Err(error) = store.apply_change(change) {
                    warn!(resource, %error, "Failed to index object");
                }
                store.len()
            };
            if let Some(metrics) = &metrics {
                metrics.set_size(resource, size);
            }

            if init_done && !synced {
                synced = true;
                let TypeMeta { api_version, kind } = template();
                info!(resource, %api_version, %kind, objects = size, "Synced");
            }
        }
    }
}

impl<K, T> fmt::Debug for Resource<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("metric", &self.metric)
            .field("indexers", &self.indexers.keys().collect::<Vec<_>>())
            .field("local_node", &self.local_node)
            .finish()
    }
}

// === impl Decoder ===

impl<K: fmt::Debug, T> Decoder<K, T> {
    /// Returns the key of an object that cannot be transformed.
    fn transform(&self, obj: K) -> Result<T, ObjectKey> {
        let (obj, error) = match (self.transform)(obj) {
            Ok(obj) => return Ok(obj),
            Err(rejected) => rejected,
        };
        if let Some(metrics) = &self.metrics {
            metrics.decode_error(self.resource);
        }
        error!(resource = self.resource, %error, object = ?obj, "Failed to decode object");
        Err((self.key)(&obj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        index::LocalEndpointIndex, lister_watcher::fake::FakeListerWatcher, LOCAL_NODE_INDEX,
    };
    use kube::api::ObjectMeta;
    use netmirror_k8s_api::{
        workload::{EndpointNetworking, LocalEndpoint},
        Namespace, ResourceExt,
    };
    use std::time::Duration;

    fn mk_ns(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

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

    fn mk_labeled_ns(name: &str, label: &str) -> Namespace {
        let mut ns = mk_ns(name);
        ns.metadata.labels = Some(
            Some((label.to_string(), "true".to_string()))
                .into_iter()
                .collect(),
        );
        ns
    }

    // Rejects namespaces labeled `reject`.
    fn rejecting(lw: SharedListerWatcher<Namespace>) -> Resource<Namespace> {
        Resource::<Namespace>::new(lw).with_lazy_transform(
            || TypeMeta {
                api_version: "v1".to_string(),
                kind: "Namespace".to_string(),
            },
            |ns: Namespace| {
                if ns.labels().contains_key("reject") {
                    return Err((ns, Error::Watch("rejected".to_string())));
                }
                Ok(ns)
            },
        )
    }

    async fn next<T: kube::Resource>(
        events: &mut (impl Stream<Item = Result<Change<T>, Error>> + Unpin),
    ) -> (&'static str, Option<String>) {
        name(events.next().await.unwrap().unwrap())
    }

    fn name<T: kube::Resource>(change: Change<T>) -> (&'static str, Option<String>) {
        match change {
            Change::Event(Event::Init) => ("init", None),
            Change::Event(Event::InitApply(obj)) => ("init_apply", Some(obj.name_any())),
            Change::Event(Event::InitDone) => ("init_done", None),
            Change::Event(Event::Apply(obj)) => ("apply", Some(obj.name_any())),
            Change::Event(Event::Delete(obj)) => ("delete", Some(obj.name_any())),
            Change::Evict(key) => ("evict", Some(key.name)),
        }
    }

    #[tokio::test]
    async fn lists_then_watches() {
        let fake = FakeListerWatcher::new(vec![mk_ns("a"), mk_ns("b")]);
        let tx = fake.push_watch();
        let resource = Resource::<Namespace>::new(fake.clone()).with_metric("Namespace");
        assert_eq!(resource.type_meta().kind, "Namespace");

        let mut events = resource.events().boxed();
        assert_eq!(next(&mut events).await, ("init", None));
        assert_eq!(next(&mut events).await, ("init_apply", Some("a".to_string())));
        assert_eq!(next(&mut events).await, ("init_apply", Some("b".to_string())));
        assert_eq!(next(&mut events).await, ("init_done", None));

        tx.send(Ok(WatchEvent::Added(mk_ns("c")))).unwrap();
        tx.send(Ok(WatchEvent::Bookmark {
            resource_version: "2".to_string(),
        }))
        .unwrap();
        tx.send(Ok(WatchEvent::Deleted(mk_ns("a")))).unwrap();
        assert_eq!(next(&mut events).await, ("apply", Some("c".to_string())));
        assert_eq!(next(&mut events).await, ("delete", Some("a".to_string())));

        // When the watch ends, the collection is listed again.
        fake.set_items(vec![mk_ns("c")]);
        let _tx = fake.push_watch();
        drop(tx);
        assert_eq!(next(&mut events).await, ("init", None));
        assert_eq!(next(&mut events).await, ("init_apply", Some("c".to_string())));
        assert_eq!(next(&mut events).await, ("init_done", None));

        // The watch resumes from the listed version.
        let requests = fake.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].resource_version.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn failed_transforms_are_dropped() {
        let fake = FakeListerWatcher::new(vec![mk_ns("good"), mk_labeled_ns("bad", "reject")]);
        let _tx = fake.push_watch();
        let metrics = MirrorMetrics::default();
        let resource = rejecting(fake)
            .with_metric("Namespace")
            .with_metrics(metrics.clone());

        let events = resource.events().take(3).collect::<Vec<_>>().await;
        let names = events
            .into_iter()
            .map(|ev| name(ev.unwrap()))
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                ("init", None),
                ("init_apply", Some("good".to_string())),
                ("init_done", None),
            ]
        );
        assert_eq!(metrics.events("Namespace", "decode_error"), 1);
    }

    #[tokio::test]
    async fn untransformable_updates_evict_mirrored_objects() {
        let fake = FakeListerWatcher::new(vec![mk_ns("a"), mk_ns("b")]);
        let tx = fake.push_watch();
        let metrics = MirrorMetrics::default();
        let resource = rejecting(fake.clone())
            .with_metric("Namespace")
            .with_metrics(metrics.clone());
        let store = resource.store();
        let task = tokio::spawn(resource.run(store.clone()));

        for _ in 0..100 {
            if store.read().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(store.read().len(), 2);

        // `a` changes so that it can no longer be mirrored and is then deleted, while `b` is
        // deleted in a form that cannot be transformed.
        tx.send(Ok(WatchEvent::Modified(mk_labeled_ns("a", "reject"))))
            .unwrap();
        tx.send(Ok(WatchEvent::Deleted(mk_labeled_ns("a", "reject"))))
            .unwrap();
        tx.send(Ok(WatchEvent::Deleted(mk_labeled_ns("b", "reject"))))
            .unwrap();

        for _ in 0..100 {
            if metrics.events("Namespace", "evict") == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(store.read().is_empty(), "deleted objects must not stay mirrored");
        assert_eq!(metrics.events("Namespace", "evict"), 3);
        assert_eq!(metrics.events("Namespace", "decode_error"), 3);
        task.abort();
    }

    #[tokio::test]
    async fn waits_for_local_node() {
        let node = LocalNode::pending();
        let fake = FakeListerWatcher::new(vec![mk_endpoint("web-0", "10.0.0.5")]);
        let _tx = fake.push_watch();
        let metrics = MirrorMetrics::default();
        let resource = Resource::<LocalEndpoint>::new(fake.clone())
            .with_indexer(LOCAL_NODE_INDEX, LocalEndpointIndex::new(node.clone()))
            .with_local_node(node.clone())
            .with_metric("WorkloadEndpoint")
            .with_metrics(metrics.clone());
        let store = resource.store();
        let task = tokio::spawn(resource.run(store.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(fake.requests().is_empty(), "must not list before the node is known");

        node.set_ip("10.0.0.5");
        for _ in 0..100 {
            if !store.read().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let local = store.read().by_index(LOCAL_NODE_INDEX, "10.0.0.5");
        assert_eq!(local.len(), 1);
        assert_eq!(metrics.events("WorkloadEndpoint", "init_apply"), 1);
        task.abort();
    }
}
