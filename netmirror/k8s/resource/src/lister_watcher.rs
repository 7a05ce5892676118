//! The list/watch capability consumed by resources.

use crate::{options::OptionsModifier, Error, ListOptions};
use futures::{prelude::*, stream::BoxStream};
use kube::{api::Api, core::WatchEvent as KubeWatchEvent};
use serde::de::DeserializeOwned;
use std::{fmt, marker::PhantomData, sync::Arc};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The objects returned by a list request, and the version they were observed at.
#[derive(Clone, Debug, PartialEq)]
pub struct List<T> {
    pub items: Vec<T>,
    pub resource_version: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
    Bookmark { resource_version: String },
}

pub type WatchStream<T> = BoxStream<'static, Result<WatchEvent<T>>>;

/// Lists and watches a single collection.
#[async_trait::async_trait]
pub trait ListerWatcher: Send + Sync + 'static {
    type Object: Send + 'static;

    async fn list(&self, opts: ListOptions) -> Result<List<Self::Object>>;

    async fn watch(&self, opts: ListOptions) -> Result<WatchStream<Self::Object>>;
}

pub type SharedListerWatcher<T> = Arc<dyn ListerWatcher<Object = T>>;

/// Lists and watches a typed collection through the Kubernetes API.
pub struct ApiListerWatcher<K> {
    api: Api<K>,
}

/// Applies a fixed sequence of option modifiers before every request.
pub struct ModifyListerWatcher<T> {
    inner: SharedListerWatcher<T>,
    modifiers: Vec<OptionsModifier>,
}

/// Converts the objects of an inner lister-watcher into another type.
pub struct MapListerWatcher<T, U> {
    inner: SharedListerWatcher<T>,
    _marker: PhantomData<fn(T) -> U>,
}

// === impl ApiListerWatcher ===

impl<K> ApiListerWatcher<K> {
    pub fn new(api: Api<K>) -> Self {
        Self { api }
    }
}

impl<K> ApiListerWatcher<K>
where
    K: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + fmt::Debug,
    K: Send + Sync + 'static,
{
    pub fn all(client: kube::Client) -> Self {
        Self::new(Api::all(client))
    }

    pub fn shared(self) -> SharedListerWatcher<K> {
        Arc::new(self)
    }
}

#[async_trait::async_trait]
impl<K> ListerWatcher for ApiListerWatcher<K>
where
    K: kube::Resource + Clone + DeserializeOwned + fmt::Debug,
    K: Send + Sync + 'static,
{
    type Object = K;

    async fn list(&self, opts: ListOptions) -> Result<List<K>> {
        let list = self.api.list(&opts.to_list_params()).await?;
        Ok(List {
            items: list.items,
            resource_version: list.metadata.resource_version,
        })
    }

    async fn watch(&self, opts: ListOptions) -> Result<WatchStream<K>> {
        let version = opts.resource_version.clone().unwrap_or_else(|| "0".to_string());
        let events = self.api.watch(&opts.to_watch_params(), &version).await?;
        Ok(events
            .map(|ev| -> Result<WatchEvent<K>> {
                match ev? {
                    KubeWatchEvent::Added(obj) => Ok(WatchEvent::Added(obj)),
                    KubeWatchEvent::Modified(obj) => Ok(WatchEvent::Modified(obj)),
                    KubeWatchEvent::Deleted(obj) => Ok(WatchEvent::Deleted(obj)),
                    KubeWatchEvent::Bookmark(bookmark) => Ok(WatchEvent::Bookmark {
                        resource_version: bookmark.metadata.resource_version,
                    }),
                    KubeWatchEvent::Error(error) => Err(Error::Watch(format!("{error:?}"))),
                }
            })
            .boxed())
    }
}

// === impl ModifyListerWatcher ===

impl<T: Send + 'static> ModifyListerWatcher<T> {
    pub fn new(inner: SharedListerWatcher<T>, modifiers: Vec<OptionsModifier>) -> Self {
        Self { inner, modifiers }
    }

    /// Wraps `inner` unless there is nothing to modify.
    pub fn shared(
        inner: SharedListerWatcher<T>,
        modifiers: Vec<OptionsModifier>,
    ) -> SharedListerWatcher<T> {
        if modifiers.is_empty() {
            return inner;
        }
        Arc::new(Self::new(inner, modifiers))
    }

    fn modify(&self, opts: ListOptions) -> ListOptions {
        opts.with_modifiers(&self.modifiers)
    }
}

#[async_trait::async_trait]
impl<T: Send + 'static> ListerWatcher for ModifyListerWatcher<T> {
    type Object = T;

    async fn list(&self, opts: ListOptions) -> Result<List<T>> {
        self.inner.list(self.modify(opts)).await
    }

    async fn watch(&self, opts: ListOptions) -> Result<WatchStream<T>> {
        self.inner.watch(self.modify(opts)).await
    }
}

// === impl MapListerWatcher ===

impl<T, U> MapListerWatcher<T, U>
where
    T: Send + 'static,
    U: From<T> + Send + 'static,
{
    pub fn shared(inner: SharedListerWatcher<T>) -> SharedListerWatcher<U> {
        Arc::new(Self {
            inner,
            _marker: PhantomData,
        })
    }
}

#[async_trait::async_trait]
impl<T, U> ListerWatcher for MapListerWatcher<T, U>
where
    T: Send + 'static,
    U: From<T> + Send + 'static,
{
    type Object = U;

    async fn list(&self, opts: ListOptions) -> Result<List<U>> {
        let List {
            items,
            resource_version,
        } = self.inner.list(opts).await?;
        Ok(List {
            items: items.into_iter().map(U::from).collect(),
            resource_version,
        })
    }

    async fn watch(&self, opts: ListOptions) -> Result<WatchStream<U>> {
        let events = self.inner.watch(opts).await?;
        Ok(events.map_ok(|ev| ev.map(U::from)).boxed())
    }
}

// === impl WatchEvent ===

impl<T> WatchEvent<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WatchEvent<U> {
        match self {
            Self::Added(obj) => WatchEvent::Added(f(obj)),
            Self::Modified(obj) => WatchEvent::Modified(f(obj)),
            Self::Deleted(obj) => WatchEvent::Deleted(f(obj)),
            Self::Bookmark { resource_version } => WatchEvent::Bookmark { resource_version },
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! An in-memory lister-watcher for tests.

    use super::*;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    /// Serves a fixed list and a scripted sequence of watch streams, recording the options of
    /// every request.
    pub struct FakeListerWatcher<T> {
        items: Mutex<Vec<T>>,
        watches: Mutex<Vec<mpsc::UnboundedReceiver<Result<WatchEvent<T>>>>>,
        requests: Mutex<Vec<ListOptions>>,
    }

    impl<T: Clone + Send + 'static> FakeListerWatcher<T> {
        pub fn new(items: Vec<T>) -> Arc<Self> {
            Arc::new(Self {
                items: Mutex::new(items),
                watches: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
            })
        }

        /// Returns a sender that feeds the next watch request.
        pub fn push_watch(&self) -> mpsc::UnboundedSender<Result<WatchEvent<T>>> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.watches.lock().push(rx);
            tx
        }

        pub fn set_items(&self, items: Vec<T>) {
            *self.items.lock() = items;
        }

        pub fn requests(&self) -> Vec<ListOptions> {
            self.requests.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl<T: Clone + Send + 'static> ListerWatcher for FakeListerWatcher<T> {
        type Object = T;

        async fn list(&self, opts: ListOptions) -> Result<List<T>> {
            self.requests.lock().push(opts);
            Ok(List {
                items: self.items.lock().clone(),
                resource_version: Some("1".to_string()),
            })
        }

        async fn watch(&self, opts: ListOptions) -> Result<WatchStream<T>> {
            self.requests.lock().push(opts);
            let mut watches = self.watches.lock();
            if watches.is_empty() {
                return Err(Error::Watch("no watch scripted".to_string()));
            }
            let rx = watches.remove(0);
            Ok(tokio_stream::wrappers::UnboundedReceiverStream::new(rx).boxed())
        }
    }
}
