//! Constructors for the mirrored kinds.
//!
//! Constructing a resource performs no I/O. Endpoints negotiate their wire format on the first
//! list or watch.

use crate::{
    endpoints::{EndpointSet, EndpointsApi, EndpointsListerWatcher, RawEndpoints},
    index::{LocalEndpointIndex, LocalEndpointSliceIndex},
    lister_watcher::{ApiListerWatcher, ModifyListerWatcher, SharedListerWatcher},
    options, CapabilityProvider, Config, Error, LocalNode, MirrorMetrics, ObjectKey,
    OptionsModifier, Resource, LOCAL_NODE_INDEX,
};
use netmirror_k8s_api::{
    type_meta,
    workload::{LocalEndpoint, WorkloadEndpoint, WorkloadEndpointSlice},
    Namespace, NetworkPolicy, Node, Pod, Service,
};
use serde::de::DeserializeOwned;
use std::{fmt, sync::Arc};

/// Dependencies shared by every constructor.
#[derive(Clone)]
pub struct ResourceParams {
    pub client: kube::Client,
    pub config: Config,

    /// Applied to every request, before any kind-specific modifier.
    pub modifiers: Vec<OptionsModifier>,

    pub metrics: Option<MirrorMetrics>,
}

// === impl ResourceParams ===

impl ResourceParams {
    pub fn new(client: kube::Client, config: Config) -> Self {
        let modifiers = config.list_timeout().into_iter().collect();
        Self {
            client,
            config,
            modifiers,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MirrorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn typed<K>(&self, modifier: Option<OptionsModifier>, metric: &'static str) -> Resource<K>
    where
        K: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + fmt::Debug,
        K: Send + Sync + 'static,
    {
        let mut modifiers = self.modifiers.clone();
        modifiers.extend(modifier);
        let lw = ModifyListerWatcher::shared(
            ApiListerWatcher::all(self.client.clone()).shared(),
            modifiers,
        );
        self.instrument(Resource::new(lw).with_metric(metric))
    }

    fn instrument<K, T>(&self, resource: Resource<K, T>) -> Resource<K, T>
    where
        K: Send + 'static,
        T: Send + 'static,
    {
        match &self.metrics {
            Some(metrics) => resource.with_metrics(metrics.clone()),
            None => resource,
        }
    }
}

impl fmt::Debug for ResourceParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceParams")
            .field("config", &self.config)
            .field("modifiers", &self.modifiers.len())
            .finish()
    }
}

/// Services handled by the configured service proxy. Headless services are excluded.
pub fn service_resource(params: &ResourceParams) -> Result<Resource<Service>, Error> {
    let proxy = options::service_proxy_name(&params.config.service_proxy_name)?;
    Ok(params.typed(Some(proxy), "Service"))
}

pub fn node_resource(params: &ResourceParams) -> Resource<Node> {
    params.typed(None, "Node")
}

pub fn pod_resource(params: &ResourceParams) -> Resource<Pod> {
    params.typed(None, "Pod")
}

pub fn namespace_resource(params: &ResourceParams) -> Resource<Namespace> {
    params.typed(None, "Namespace")
}

pub fn network_policy_resource(params: &ResourceParams) -> Resource<NetworkPolicy> {
    params.typed(None, "NetworkPolicy")
}

/// Service endpoints, in the most capable format the cluster serves.
pub fn endpoints_resource(
    params: &ResourceParams,
    caps: impl CapabilityProvider + 'static,
) -> Result<Resource<RawEndpoints, EndpointSet>, Error> {
    endpoints_resource_from(params.client.clone(), caps, params)
}

fn endpoints_resource_from(
    api: impl EndpointsApi,
    caps: impl CapabilityProvider + 'static,
    params: &ResourceParams,
) -> Result<Resource<RawEndpoints, EndpointSet>, Error> {
    let proxy = options::service_proxy_name(&params.config.service_proxy_name)?;
    let lw = Arc::new(EndpointsListerWatcher::new(
        api,
        caps,
        params.config.enable_endpoint_slice,
        params.modifiers.clone(),
        proxy,
    ));

    let template = lw.clone();
    let decoder = lw.clone();
    let resource = Resource::new_lazy(
        lw as SharedListerWatcher<RawEndpoints>,
        |raw: &RawEndpoints| ObjectKey::from_meta(raw.metadata()),
        move || template.type_meta(),
        move |raw: RawEndpoints| match decoder.decode(&raw) {
            Ok(set) => Ok(set),
            Err(error) => Err((raw, error.into())),
        },
    );
    Ok(params.instrument(resource.with_metric("Endpoint")))
}

/// Workload endpoints, slimmed on receipt and indexed by the local node.
pub fn workload_endpoint_resource(
    params: &ResourceParams,
    node: &LocalNode,
) -> Resource<WorkloadEndpoint, LocalEndpoint> {
    params
        .typed::<WorkloadEndpoint>(None, "WorkloadEndpoint")
        .with_lazy_transform(type_meta::<WorkloadEndpoint>, |ep| {
            Ok(LocalEndpoint::from(ep))
        })
        .with_indexer(LOCAL_NODE_INDEX, LocalEndpointIndex::new(node.clone()))
        .with_local_node(node.clone())
}

/// Workload endpoint slices, indexed by the local node.
pub fn workload_endpoint_slice_resource(
    params: &ResourceParams,
    node: &LocalNode,
) -> Resource<WorkloadEndpointSlice> {
    params
        .typed::<WorkloadEndpointSlice>(None, "WorkloadEndpointSlice")
        .with_indexer(LOCAL_NODE_INDEX, LocalEndpointSliceIndex::new(node.clone()))
        .with_local_node(node.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        endpoints::{EndpointsFormat, ServiceRef},
        lister_watcher::fake::FakeListerWatcher,
        Capabilities, Change,
    };
    use futures::prelude::*;
    use kube::runtime::watcher::Event;
    use netmirror_k8s_api::{EndpointSlice, ObjectMeta};
    use parking_lot::Mutex;

    struct FakeApi {
        negotiated: Mutex<Option<EndpointsFormat>>,
        slices: Vec<EndpointSlice>,
    }

    impl EndpointsApi for Arc<FakeApi> {
        fn lister_watcher(&self, format: EndpointsFormat) -> SharedListerWatcher<RawEndpoints> {
            *self.negotiated.lock() = Some(format);
            let lw = FakeListerWatcher::new(
                self.slices
                    .iter()
                    .cloned()
                    .map(RawEndpoints::from)
                    .collect(),
            );
            let _tx = lw.push_watch();
            lw
        }
    }

    fn mk_slice(labels: bool) -> EndpointSlice {
        EndpointSlice {
            metadata: ObjectMeta {
                name: Some(if labels { "web-abc" } else { "orphan" }.to_string()),
                namespace: Some("ns-0".to_string()),
                labels: labels.then(|| {
                    Some((
                        netmirror_k8s_api::labels::SERVICE_NAME.to_string(),
                        "web".to_string(),
                    ))
                    .into_iter()
                    .collect()
                }),
                ..Default::default()
            },
            address_type: "IPv4".to_string(),
            endpoints: vec![],
            ports: None,
        }
    }

    fn mk_params(config: Config) -> ResourceParams {
        // Clients are lazy; no connection is made until a request is issued.
        let config_client = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        let client = kube::Client::try_from(config_client).unwrap();
        ResourceParams::new(client, config)
    }

    #[tokio::test]
    async fn endpoints_negotiate_on_first_use() {
        let api = Arc::new(FakeApi {
            negotiated: Mutex::new(None),
            slices: vec![mk_slice(true), mk_slice(false)],
        });
        let params = mk_params(Config::default());
        let resource = endpoints_resource_from(
            api.clone(),
            Capabilities::from_version(1, 30),
            &params,
        )
        .unwrap();
        assert_eq!(resource.metric_name(), "Endpoint");
        assert_eq!(*api.negotiated.lock(), None);

        // The slice without a service label is dropped.
        let events = resource.events().take(3).collect::<Vec<_>>().await;
        assert_eq!(*api.negotiated.lock(), Some(EndpointsFormat::SliceV1));
        match &events[1] {
            Ok(Change::Event(Event::InitApply(set))) => assert_eq!(
                set.service,
                ServiceRef {
                    namespace: "ns-0".to_string(),
                    name: "web".to_string(),
                }
            ),
            ev => panic!("unexpected event: {ev:?}"),
        }
        assert!(matches!(events[2], Ok(Change::Event(Event::InitDone))));
        assert_eq!(resource.type_meta().api_version, "discovery.k8s.io/v1");
    }

    #[tokio::test]
    async fn invalid_proxy_name_fails_construction() {
        let params = mk_params(Config {
            service_proxy_name: "not a label!".to_string(),
            ..Default::default()
        });
        assert!(service_resource(&params).is_err());
        assert!(endpoints_resource(&params, Capabilities::default()).is_err());
    }

    #[tokio::test]
    async fn local_resources_depend_on_the_node() {
        let params = mk_params(Config {
            list_timeout_seconds: 30,
            ..Default::default()
        });
        assert_eq!(params.modifiers.len(), 1);

        let node = LocalNode::pending();
        let endpoints = workload_endpoint_resource(&params, &node);
        assert!(endpoints.local_node().is_some());
        assert_eq!(endpoints.index_names().collect::<Vec<_>>(), vec![LOCAL_NODE_INDEX]);
        assert_eq!(endpoints.type_meta().kind, "WorkloadEndpoint");

        let slices = workload_endpoint_slice_resource(&params, &node);
        assert_eq!(slices.metric_name(), "WorkloadEndpointSlice");
        assert!(node_resource(&params).local_node().is_none());
    }
}
