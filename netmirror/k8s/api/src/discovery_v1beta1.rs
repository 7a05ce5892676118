//! `discovery.k8s.io/v1beta1` EndpointSlice.
//!
//! The beta API was removed from the generated bindings once it stopped being served, but older
//! clusters only serve this version. Only the fields that endpoint discovery reads are modeled.

use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSlice {
    #[serde(default)]
    pub metadata: ObjectMeta,

    pub address_type: String,

    #[serde(default)]
    pub endpoints: Vec<Endpoint>,

    pub ports: Option<Vec<EndpointPort>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub addresses: Vec<String>,

    pub conditions: Option<EndpointConditions>,

    pub hostname: Option<String>,

    pub node_name: Option<String>,

    /// Deprecated in favor of `nodeName` and the zone label, but still populated by v1beta1
    /// controllers.
    pub topology: Option<BTreeMap<String, String>>,

    pub hints: Option<EndpointHints>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConditions {
    pub ready: Option<bool>,
    pub serving: Option<bool>,
    pub terminating: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointHints {
    pub for_zones: Option<Vec<ForZone>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ForZone {
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointPort {
    pub name: Option<String>,
    pub port: Option<i32>,
    pub protocol: Option<String>,
    pub app_protocol: Option<String>,
}

impl k8s_openapi::Resource for EndpointSlice {
    const API_VERSION: &'static str = "discovery.k8s.io/v1beta1";
    const GROUP: &'static str = "discovery.k8s.io";
    const KIND: &'static str = "EndpointSlice";
    const VERSION: &'static str = "v1beta1";
    const URL_PATH_SEGMENT: &'static str = "endpointslices";
    type Scope = k8s_openapi::NamespaceResourceScope;
}

impl k8s_openapi::ListableResource for EndpointSlice {
    const LIST_KIND: &'static str = "EndpointSliceList";
}

impl k8s_openapi::Metadata for EndpointSlice {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn deserializes_beta_slice() {
        let slice: EndpointSlice = serde_json::from_value(serde_json::json!({
            "apiVersion": "discovery.k8s.io/v1beta1",
            "kind": "EndpointSlice",
            "metadata": { "name": "web-abc", "namespace": "ns-0" },
            "addressType": "IPv4",
            "endpoints": [{
                "addresses": ["10.1.0.4"],
                "conditions": { "ready": true },
                "topology": { "topology.kubernetes.io/zone": "z1" },
            }],
            "ports": [{ "name": "http", "port": 8080, "protocol": "TCP" }],
        }))
        .unwrap();
        assert_eq!(slice.endpoints[0].addresses, vec!["10.1.0.4".to_string()]);
        assert_eq!(EndpointSlice::api_version(&()), "discovery.k8s.io/v1beta1");
        assert_eq!(EndpointSlice::plural(&()), "endpointslices");
    }
}
