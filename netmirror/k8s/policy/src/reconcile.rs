use crate::{
    metrics::{PolicyMetrics, SyncProgress},
    parse::{parse_network_policy, policy_labels, resource_id, ParseError},
};
use netmirror_core::{AddOptions, DeleteOptions, PolicyEngine, ResourceId, Revision, Source};
use netmirror_k8s_api::NetworkPolicy;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to parse NetworkPolicy {id}: {source}")]
    Parse {
        id: ResourceId,
        #[source]
        source: ParseError,
    },

    #[error("policy engine rejected NetworkPolicy {id}: {source}")]
    Engine {
        id: ResourceId,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot derive labels for NetworkPolicy {id}")]
    MissingLabels { id: ResourceId },
}

/// Installs and removes the rules derived from NetworkPolicies.
///
/// Every call counts exactly one success or failure and records the time of the event.
#[derive(Debug)]
pub struct Reconciler<E> {
    engine: E,
    metrics: PolicyMetrics,
    sync: SyncProgress,
}

// === impl Reconciler ===

impl<E: PolicyEngine> Reconciler<E> {
    pub fn new(engine: E, metrics: PolicyMetrics, sync: SyncProgress) -> Self {
        Self {
            engine,
            metrics,
            sync,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn metrics(&self) -> &PolicyMetrics {
        &self.metrics
    }

    pub fn sync_progress(&self) -> &SyncProgress {
        &self.sync
    }

    /// Installs the rules derived from `np`, replacing any rules it previously installed.
    ///
    /// A policy that cannot be parsed leaves the engine untouched.
    pub fn apply(&self, np: &NetworkPolicy, api_group: &str) -> Result<Revision, Error> {
        let result = self.add(np);
        self.sync.set_event_timestamp(api_group);
        result
    }

    /// Removes the rules installed by `np`. Removing a policy that installed nothing succeeds.
    pub fn retract(&self, np: &NetworkPolicy, api_group: &str) -> Result<usize, Error> {
        let result = self.delete(np);
        self.sync.set_event_timestamp(api_group);
        result
    }

    fn add(&self, np: &NetworkPolicy) -> Result<Revision, Error> {
        let id = resource_id(np);
        let rules = match parse_network_policy(np) {
            Ok(rules) => rules,
            Err(source) => {
                self.metrics.fail();
                error!(%id, error = %source, policy = ?np, "Failed to parse NetworkPolicy");
                return Err(Error::Parse { id, source });
            }
        };

        if np.has_end_port() {
            warn!(%id, "EndPort in NetworkPolicy is not supported");
        }

        let opts = AddOptions {
            replace: true,
            source: Source::Kubernetes,
            resource: id.clone(),
        };
        match self.engine.add(rules, opts) {
            Ok(revision) => {
                self.metrics.success();
                info!(%id, revision, "NetworkPolicy added");
                Ok(revision)
            }
            Err(source) => {
                self.metrics.fail();
                error!(%id, error = %source, policy = ?np, "Failed to add NetworkPolicy rules");
                Err(Error::Engine { id, source })
            }
        }
    }

    fn delete(&self, np: &NetworkPolicy) -> Result<usize, Error> {
        let id = resource_id(np);
        let Some(labels) = policy_labels(np) else {
            self.metrics.fail();
            error!(%id, policy = ?np, "Cannot delete NetworkPolicy without a name");
            return Err(Error::MissingLabels { id });
        };

        let opts = DeleteOptions {
            source: Source::Kubernetes,
            resource: id.clone(),
        };
        match self.engine.delete(&labels, opts) {
            Ok(removed) => {
                self.metrics.success();
                info!(%id, removed, "NetworkPolicy removed");
                Ok(removed)
            }
            Err(source) => {
                self.metrics.fail();
                error!(%id, error = %source, ?labels, "Failed to delete NetworkPolicy rules");
                Err(Error::Engine { id, source })
            }
        }
    }
}
