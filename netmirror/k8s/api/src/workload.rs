//! Workload endpoint resources.
//!
//! A `WorkloadEndpoint` describes the network identity of a single workload; a
//! `WorkloadEndpointSlice` batches many endpoints of one namespace into a single cluster-scoped
//! object so that large clusters need fewer watch events.

use kube::{api::ObjectMeta, CustomResource, Resource};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "netmirror.io",
    version = "v1",
    kind = "WorkloadEndpoint",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadEndpointSpec {
    /// The security identity allocated to the workload.
    pub identity: Option<i64>,

    /// Unset until the workload's networking has been configured.
    pub networking: Option<EndpointNetworking>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointNetworking {
    #[serde(default)]
    pub addressing: Vec<AddressPair>,

    /// The address of the node hosting the workload.
    #[serde(rename = "node")]
    pub node_ip: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct AddressPair {
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "netmirror.io",
    version = "v1",
    kind = "WorkloadEndpointSlice",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadEndpointSliceSpec {
    /// The namespace of every endpoint in the slice.
    pub namespace: String,

    #[serde(default)]
    pub endpoints: Vec<SlicedEndpoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlicedEndpoint {
    pub name: String,
    pub identity: Option<i64>,
    #[serde(default)]
    pub networking: EndpointNetworking,
}

/// The parts of a [`WorkloadEndpoint`] that are kept in memory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalEndpoint {
    pub metadata: ObjectMeta,
    pub identity: Option<i64>,
    pub networking: Option<EndpointNetworking>,
}

// === impl LocalEndpoint ===

impl From<WorkloadEndpoint> for LocalEndpoint {
    fn from(ep: WorkloadEndpoint) -> Self {
        let WorkloadEndpoint { metadata, spec } = ep;
        // Only identifying metadata is retained.
        let metadata = ObjectMeta {
            name: metadata.name,
            namespace: metadata.namespace,
            uid: metadata.uid,
            resource_version: metadata.resource_version,
            labels: metadata.labels,
            ..Default::default()
        };
        Self {
            metadata,
            identity: spec.identity,
            networking: spec.networking,
        }
    }
}

impl Resource for LocalEndpoint {
    type DynamicType = ();
    type Scope = k8s_openapi::NamespaceResourceScope;

    fn kind(dt: &()) -> Cow<'_, str> {
        WorkloadEndpoint::kind(dt)
    }

    fn group(dt: &()) -> Cow<'_, str> {
        WorkloadEndpoint::group(dt)
    }

    fn version(dt: &()) -> Cow<'_, str> {
        WorkloadEndpoint::version(dt)
    }

    fn plural(dt: &()) -> Cow<'_, str> {
        WorkloadEndpoint::plural(dt)
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
