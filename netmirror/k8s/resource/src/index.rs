//! Secondary indexes over mirrored objects.

use crate::LocalNode;
use kube::ResourceExt;
use netmirror_k8s_api::workload::{LocalEndpoint, WorkloadEndpointSlice};
use std::{collections::BTreeSet, sync::Arc};
use tracing::debug;

/// Indexes objects by the address of the local node. Only objects on the local node have keys.
pub const LOCAL_NODE_INDEX: &str = "localNode";

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("the local node address is not yet known")]
    NodeNotReady,
}

/// Computes the keys under which an object is indexed.
pub trait IndexFn<T>: Send + Sync + 'static {
    fn index_keys(&self, obj: &T) -> Result<BTreeSet<String>, IndexError>;
}

pub type SharedIndexFn<T> = Arc<dyn IndexFn<T>>;

/// Indexes workload endpoints that run on the local node.
#[derive(Clone, Debug)]
pub struct LocalEndpointIndex {
    node: LocalNode,
}

/// Indexes workload endpoint slices that contain at least one endpoint on the local node.
#[derive(Clone, Debug)]
pub struct LocalEndpointSliceIndex {
    node: LocalNode,
}

impl<T, F> IndexFn<T> for F
where
    F: Fn(&T) -> Result<BTreeSet<String>, IndexError> + Send + Sync + 'static,
{
    fn index_keys(&self, obj: &T) -> Result<BTreeSet<String>, IndexError> {
        (self)(obj)
    }
}

// === impl LocalEndpointIndex ===

impl LocalEndpointIndex {
    pub fn new(node: LocalNode) -> Self {
        Self { node }
    }
}

impl IndexFn<LocalEndpoint> for LocalEndpointIndex {
    fn index_keys(&self, ep: &LocalEndpoint) -> Result<BTreeSet<String>, IndexError> {
        let Some(networking) = ep.networking.as_ref() else {
            debug!(
                ns = %ep.namespace().unwrap_or_default(),
                name = %ep.name_any(),
                "Cannot index endpoint by node without network status"
            );
            return Ok(BTreeSet::new());
        };

        let local = self.node.ip().ok_or(IndexError::NodeNotReady)?;
        if networking.node_ip == local {
            return Ok(Some(local).into_iter().collect());
        }
        Ok(BTreeSet::new())
    }
}

// === impl LocalEndpointSliceIndex ===

impl LocalEndpointSliceIndex {
    pub fn new(node: LocalNode) -> Self {
        Self { node }
    }
}

impl IndexFn<WorkloadEndpointSlice> for LocalEndpointSliceIndex {
    fn index_keys(&self, slice: &WorkloadEndpointSlice) -> Result<BTreeSet<String>, IndexError> {
        let local = self.node.ip().ok_or(IndexError::NodeNotReady)?;
        if slice
            .spec
            .endpoints
            .iter()
            .any(|ep| ep.networking.node_ip == local)
        {
            return Ok(Some(local).into_iter().collect());
        }
        Ok(BTreeSet::new())
    }
}
