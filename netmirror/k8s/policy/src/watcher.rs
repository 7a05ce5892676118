use crate::{parse::resource_id, Reconciler, NETWORKING_API_GROUP};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use futures::prelude::*;
use kube::runtime::watcher::Event;
use netmirror_core::{PolicyEngine, ResourceId};
use netmirror_k8s_api::NetworkPolicy;
use tracing::{debug, info};

/// Dispatches NetworkPolicy events to a [`Reconciler`].
///
/// Events are handled one at a time, in the order they are received. A failure is isolated to
/// the object that caused it.
#[derive(Debug)]
pub struct Watcher<E> {
    reconciler: Reconciler<E>,

    // The last successfully applied version of each policy.
    installed: HashMap<ResourceId, NetworkPolicy>,

    // Policies seen since a resync started.
    resync: Option<HashSet<ResourceId>>,
}

// === impl Watcher ===

impl<E: PolicyEngine> Watcher<E> {
    pub fn new(reconciler: Reconciler<E>) -> Self {
        Self {
            reconciler,
            installed: HashMap::default(),
            resync: None,
        }
    }

    pub fn reconciler(&self) -> &Reconciler<E> {
        &self.reconciler
    }

    pub fn installed(&self) -> impl Iterator<Item = &ResourceId> {
        self.installed.keys()
    }

    pub async fn run(mut self, events: impl Stream<Item = Event<NetworkPolicy>>) {
        let mut events = std::pin::pin!(events);
        while let Some(ev) = events.next().await {
            self.handle(ev);
        }
        info!("NetworkPolicy stream ended");
    }

    pub fn handle(&mut self, ev: Event<NetworkPolicy>) {
        match ev {
            Event::Apply(np) => self.apply(np),
            Event::Delete(np) => self.retract(&np),
            Event::Init => self.resync = Some(HashSet::default()),
            Event::InitApply(np) => {
                if let Some(seen) = self.resync.as_mut() {
                    seen.insert(resource_id(&np));
                }
                self.apply(np);
            }
            Event::InitDone => {
                let seen = self.resync.take().unwrap_or_default();
                let stale = self
                    .installed
                    .iter()
                    .filter(|(id, _)| !seen.contains(*id))
                    .map(|(_, np)| np.clone())
                    .collect::<Vec<_>>();
                for np in stale {
                    debug!(id = %resource_id(&np), "Removing NetworkPolicy deleted during resync");
                    self.retract(&np);
                }
            }
        }
    }

    fn apply(&mut self, np: NetworkPolicy) {
        // Failures are logged by the reconciler. Any previously installed rules remain.
        if self.reconciler.apply(&np, NETWORKING_API_GROUP).is_ok() {
            self.installed.insert(resource_id(&np), np);
        }
    }

    fn retract(&mut self, np: &NetworkPolicy) {
        // A policy whose rules could not be removed stays installed and is retracted again by
        // the next resync.
        if self.reconciler.retract(np, NETWORKING_API_GROUP).is_ok() {
            self.installed.remove(&resource_id(np));
        }
    }
}
