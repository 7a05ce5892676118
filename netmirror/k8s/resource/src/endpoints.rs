//! Service endpoints, in whichever wire format the cluster serves.
//!
//! Clusters expose the endpoints backing a service as core/v1 `Endpoints`, as
//! `discovery.k8s.io/v1beta1` EndpointSlices, or as `discovery.k8s.io/v1` EndpointSlices. The
//! format is negotiated on the first list or watch and then fixed for the lifetime of the
//! [`EndpointsListerWatcher`]. Every format decodes into the same [`EndpointSet`].

use crate::{
    capabilities::{Capabilities, CapabilityProvider},
    lister_watcher::{
        ApiListerWatcher, List, ListerWatcher, MapListerWatcher, ModifyListerWatcher, Result,
        SharedListerWatcher, WatchStream,
    },
    options::{self, OptionsModifier},
    ListOptions, Negotiator,
};
use k8s_openapi::api::{core::v1 as corev1, discovery::v1 as discoveryv1};
use netmirror_core::rule::Protocol;
use netmirror_k8s_api::{
    discovery_v1beta1,
    labels::{SERVICE_NAME, TOPOLOGY_ZONE, TOPOLOGY_ZONE_BETA},
    type_meta, DynamicObject, Endpoints, EndpointSlice, ObjectMeta, TypeMeta,
};
use std::{borrow::Cow, collections::BTreeMap, fmt, net::IpAddr};
use tracing::{debug, info};

/// The wire formats in which a cluster may serve service endpoints.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EndpointsFormat {
    /// core/v1 Endpoints, served by every cluster.
    Endpoints,
    SliceV1Beta1,
    SliceV1,
}

/// An endpoints object as received from the cluster.
#[derive(Clone, Debug, PartialEq)]
pub enum RawEndpoints {
    Endpoints(Endpoints),
    SliceV1(EndpointSlice),
    SliceV1Beta1(discovery_v1beta1::EndpointSlice),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected endpoints object {kind} ({api_version})")]
    UnknownShape { api_version: String, kind: String },

    #[error("expected {expected} but received {actual}")]
    UnexpectedFormat {
        expected: EndpointsFormat,
        actual: EndpointsFormat,
    },

    #[error("malformed {format}: {source}")]
    Malformed {
        format: EndpointsFormat,
        #[source]
        source: serde_json::Error,
    },

    #[error("{ns}/{name} is missing the kubernetes.io/service-name label")]
    MissingServiceName { ns: String, name: String },
}

/// The endpoints backing a service, independent of the format they were received in.
///
/// A service backed by EndpointSlices may be described by several sets; each set is keyed by
/// the name of the object it was decoded from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EndpointSet {
    pub metadata: ObjectMeta,
    pub service: ServiceRef,
    pub backends: BTreeMap<IpAddr, Backend>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backend {
    /// Ports keyed by name. Unnamed ports use the empty name.
    pub ports: BTreeMap<String, PortSpec>,
    pub node_name: Option<String>,
    pub hostname: Option<String>,
    pub zone: Option<String>,
    pub hint_zones: Vec<String>,
    pub ready: bool,
    pub terminating: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PortSpec {
    pub port: u16,
    pub protocol: Protocol,
}

/// Builds the lister-watcher for a negotiated format.
pub trait EndpointsApi: Send + Sync + 'static {
    fn lister_watcher(&self, format: EndpointsFormat) -> SharedListerWatcher<RawEndpoints>;
}

/// Lists and watches endpoints in the format negotiated on first use.
pub struct EndpointsListerWatcher {
    negotiated: Negotiator<Negotiated>,
}

#[derive(Clone)]
struct Negotiated {
    format: EndpointsFormat,
    lw: SharedListerWatcher<RawEndpoints>,
}

// === impl EndpointsFormat ===

impl EndpointsFormat {
    /// Picks the most capable format that is both enabled and served.
    pub fn negotiate(enable_endpoint_slice: bool, caps: Capabilities) -> Self {
        if enable_endpoint_slice && caps.endpoint_slice_v1 {
            Self::SliceV1
        } else if enable_endpoint_slice && caps.endpoint_slice {
            Self::SliceV1Beta1
        } else {
            Self::Endpoints
        }
    }

    pub fn is_slice(self) -> bool {
        !matches!(self, Self::Endpoints)
    }

    /// The type of the objects served in this format.
    pub fn type_meta(self) -> TypeMeta {
        match self {
            Self::Endpoints => type_meta::<Endpoints>(),
            Self::SliceV1 => type_meta::<EndpointSlice>(),
            Self::SliceV1Beta1 => type_meta::<discovery_v1beta1::EndpointSlice>(),
        }
    }
}

impl fmt::Display for EndpointsFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let TypeMeta { api_version, kind } = self.type_meta();
        write!(f, "{api_version} {kind}")
    }
}

// === impl RawEndpoints ===

impl RawEndpoints {
    pub fn format(&self) -> EndpointsFormat {
        match self {
            Self::Endpoints(_) => EndpointsFormat::Endpoints,
            Self::SliceV1(_) => EndpointsFormat::SliceV1,
            Self::SliceV1Beta1(_) => EndpointsFormat::SliceV1Beta1,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Endpoints(ep) => &ep.metadata,
            Self::SliceV1(slice) => &slice.metadata,
            Self::SliceV1Beta1(slice) => &slice.metadata,
        }
    }
}

impl From<Endpoints> for RawEndpoints {
    fn from(ep: Endpoints) -> Self {
        Self::Endpoints(ep)
    }
}

impl From<EndpointSlice> for RawEndpoints {
    fn from(slice: EndpointSlice) -> Self {
        Self::SliceV1(slice)
    }
}

impl From<discovery_v1beta1::EndpointSlice> for RawEndpoints {
    fn from(slice: discovery_v1beta1::EndpointSlice) -> Self {
        Self::SliceV1Beta1(slice)
    }
}

impl TryFrom<DynamicObject> for RawEndpoints {
    type Error = DecodeError;

    fn try_from(obj: DynamicObject) -> std::result::Result<Self, DecodeError> {
        let TypeMeta { api_version, kind } = obj.types.clone().unwrap_or_default();
        let format = [
            EndpointsFormat::Endpoints,
            EndpointsFormat::SliceV1,
            EndpointsFormat::SliceV1Beta1,
        ]
        .into_iter()
        .find(|f| {
            let tm = f.type_meta();
            tm.api_version == api_version && tm.kind == kind
        })
        .ok_or(DecodeError::UnknownShape { api_version, kind })?;

        let malformed = |source| DecodeError::Malformed { format, source };
        let value = serde_json::to_value(&obj).map_err(malformed)?;
        let raw = match format {
            EndpointsFormat::Endpoints => serde_json::from_value(value).map(Self::Endpoints),
            EndpointsFormat::SliceV1 => serde_json::from_value(value).map(Self::SliceV1),
            EndpointsFormat::SliceV1Beta1 => serde_json::from_value(value).map(Self::SliceV1Beta1),
        };
        raw.map_err(malformed)
    }
}

// === impl EndpointSet ===

impl kube::Resource for EndpointSet {
    type DynamicType = ();
    type Scope = k8s_openapi::NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "EndpointSet".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        "netmirror.io".into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        "v1".into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "endpointsets".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl EndpointSet {
    fn new(metadata: &ObjectMeta, service: ServiceRef) -> Self {
        Self {
            metadata: ObjectMeta {
                name: metadata.name.clone(),
                namespace: metadata.namespace.clone(),
                uid: metadata.uid.clone(),
                resource_version: metadata.resource_version.clone(),
                ..Default::default()
            },
            service,
            backends: BTreeMap::new(),
        }
    }

    fn backend(&mut self, addr: &str) -> Option<&mut Backend> {
        match addr.parse::<IpAddr>() {
            Ok(ip) => Some(self.backends.entry(ip).or_insert_with(|| Backend {
                ports: BTreeMap::new(),
                node_name: None,
                hostname: None,
                zone: None,
                hint_zones: Vec::new(),
                ready: true,
                terminating: false,
            })),
            Err(error) => {
                debug!(service = %self.service, %addr, %error, "Skipping invalid endpoint address");
                None
            }
        }
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === decoders ===

/// Decodes core/v1 Endpoints. Addresses listed as not ready are kept but marked as such.
pub fn decode_endpoints(ep: &Endpoints) -> EndpointSet {
    let service = ServiceRef {
        namespace: ep.metadata.namespace.clone().unwrap_or_default(),
        name: ep.metadata.name.clone().unwrap_or_default(),
    };
    let mut set = EndpointSet::new(&ep.metadata, service);

    for subset in ep.subsets.iter().flatten() {
        let ports = subset
            .ports
            .iter()
            .flatten()
            .filter_map(|p: &corev1::EndpointPort| {
                port_spec(&set.service, p.name.as_deref(), Some(p.port), p.protocol.as_deref())
            })
            .collect::<Vec<_>>();

        let ready = subset.addresses.iter().flatten().map(|a| (a, true));
        let not_ready = subset.not_ready_addresses.iter().flatten().map(|a| (a, false));
        for (addr, ready) in ready.chain(not_ready) {
            if let Some(backend) = set.backend(&addr.ip) {
                backend.ready = ready;
                backend.node_name = addr.node_name.clone();
                backend.hostname = addr.hostname.clone();
                backend.ports.extend(ports.iter().cloned());
            }
        }
    }

    set
}

/// Decodes a `discovery.k8s.io/v1` EndpointSlice.
pub fn decode_slice_v1(slice: &EndpointSlice) -> Result<EndpointSet, DecodeError> {
    let mut set = EndpointSet::new(&slice.metadata, slice_service(&slice.metadata)?);
    let ports = slice
        .ports
        .iter()
        .flatten()
        .filter_map(|p: &discoveryv1::EndpointPort| {
            port_spec(&set.service, p.name.as_deref(), p.port, p.protocol.as_deref())
        })
        .collect::<Vec<_>>();

    for ep in &slice.endpoints {
        let conditions = ep.conditions.as_ref();
        let hint_zones = ep
            .hints
            .iter()
            .flat_map(|h| h.for_zones.iter().flatten())
            .map(|z| z.name.clone())
            .collect::<Vec<_>>();
        for addr in &ep.addresses {
            if let Some(backend) = set.backend(addr) {
                // An unset ready condition means the endpoint is ready.
                backend.ready = conditions.and_then(|c| c.ready).unwrap_or(true);
                backend.terminating = conditions.and_then(|c| c.terminating).unwrap_or(false);
                backend.node_name = ep.node_name.clone();
                backend.hostname = ep.hostname.clone();
                backend.zone = ep.zone.clone();
                backend.hint_zones = hint_zones.clone();
                backend.ports.extend(ports.iter().cloned());
            }
        }
    }

    Ok(set)
}

/// Decodes a `discovery.k8s.io/v1beta1` EndpointSlice, whose zone is carried as a topology label.
pub fn decode_slice_v1beta1(
    slice: &discovery_v1beta1::EndpointSlice,
) -> Result<EndpointSet, DecodeError> {
    let mut set = EndpointSet::new(&slice.metadata, slice_service(&slice.metadata)?);
    let ports = slice
        .ports
        .iter()
        .flatten()
        .filter_map(|p| port_spec(&set.service, p.name.as_deref(), p.port, p.protocol.as_deref()))
        .collect::<Vec<_>>();

    for ep in &slice.endpoints {
        let conditions = ep.conditions.as_ref();
        let zone = ep.topology.as_ref().and_then(|t| {
            t.get(TOPOLOGY_ZONE)
                .or_else(|| t.get(TOPOLOGY_ZONE_BETA))
                .cloned()
        });
        let hint_zones = ep
            .hints
            .iter()
            .flat_map(|h| h.for_zones.iter().flatten())
            .map(|z| z.name.clone())
            .collect::<Vec<_>>();
        for addr in &ep.addresses {
            if let Some(backend) = set.backend(addr) {
                backend.ready = conditions.and_then(|c| c.ready).unwrap_or(true);
                backend.terminating = conditions.and_then(|c| c.terminating).unwrap_or(false);
                backend.node_name = ep.node_name.clone();
                backend.hostname = ep.hostname.clone();
                backend.zone = zone.clone();
                backend.hint_zones = hint_zones.clone();
                backend.ports.extend(ports.iter().cloned());
            }
        }
    }

    Ok(set)
}

fn slice_service(metadata: &ObjectMeta) -> Result<ServiceRef, DecodeError> {
    let namespace = metadata.namespace.clone().unwrap_or_default();
    match metadata.labels.as_ref().and_then(|l| l.get(SERVICE_NAME)) {
        Some(name) => Ok(ServiceRef {
            namespace,
            name: name.clone(),
        }),
        None => Err(DecodeError::MissingServiceName {
            ns: namespace,
            name: metadata.name.clone().unwrap_or_default(),
        }),
    }
}

fn port_spec(
    service: &ServiceRef,
    name: Option<&str>,
    port: Option<i32>,
    protocol: Option<&str>,
) -> Option<(String, PortSpec)> {
    let name = name.unwrap_or_default().to_string();
    let port = match port.map(u16::try_from) {
        Some(Ok(port)) if port != 0 => port,
        port => {
            debug!(%service, %name, ?port, "Skipping endpoint port without a valid number");
            return None;
        }
    };
    let protocol = match protocol.map(str::parse::<Protocol>).transpose() {
        Ok(protocol) => protocol.unwrap_or_default(),
        Err(error) => {
            debug!(%service, %name, %error, "Skipping endpoint port");
            return None;
        }
    };
    Some((name, PortSpec { port, protocol }))
}

// === impl EndpointsApi ===

impl EndpointsApi for kube::Client {
    fn lister_watcher(&self, format: EndpointsFormat) -> SharedListerWatcher<RawEndpoints> {
        match format {
            EndpointsFormat::Endpoints => MapListerWatcher::<Endpoints, RawEndpoints>::shared(
                ApiListerWatcher::all(self.clone()).shared(),
            ),
            EndpointsFormat::SliceV1 => MapListerWatcher::<EndpointSlice, RawEndpoints>::shared(
                ApiListerWatcher::all(self.clone()).shared(),
            ),
            EndpointsFormat::SliceV1Beta1 => {
                MapListerWatcher::<discovery_v1beta1::EndpointSlice, RawEndpoints>::shared(
                    ApiListerWatcher::all(self.clone()).shared(),
                )
            }
        }
    }
}

// === impl EndpointsListerWatcher ===

impl EndpointsListerWatcher {
    /// Defers format negotiation until the first request.
    ///
    /// `modifiers` apply to every format. They are followed by `endpoints_modifier` when core/v1
    /// Endpoints are used, and by the EndpointSlice modifier otherwise.
    pub fn new(
        api: impl EndpointsApi,
        caps: impl CapabilityProvider + 'static,
        enable_endpoint_slice: bool,
        modifiers: Vec<OptionsModifier>,
        endpoints_modifier: OptionsModifier,
    ) -> Self {
        let negotiated = Negotiator::new(move || {
            let format = EndpointsFormat::negotiate(enable_endpoint_slice, caps.capabilities());
            info!(%format, "Using endpoints format");
            let mut modifiers = modifiers;
            modifiers.push(if format.is_slice() {
                options::endpoint_slices()
            } else {
                endpoints_modifier
            });
            Negotiated {
                format,
                lw: ModifyListerWatcher::shared(api.lister_watcher(format), modifiers),
            }
        });
        Self { negotiated }
    }

    /// Returns the negotiated format, negotiating if necessary.
    pub fn format(&self) -> EndpointsFormat {
        self.negotiated.resolve().format
    }

    /// The type of objects this source produces. Fixed once negotiated.
    pub fn type_meta(&self) -> TypeMeta {
        self.format().type_meta()
    }

    /// Decodes an object received in the negotiated format.
    pub fn decode(&self, raw: &RawEndpoints) -> Result<EndpointSet, DecodeError> {
        let expected = self.format();
        if raw.format() != expected {
            return Err(DecodeError::UnexpectedFormat {
                expected,
                actual: raw.format(),
            });
        }
        match raw {
            RawEndpoints::Endpoints(ep) => Ok(decode_endpoints(ep)),
            RawEndpoints::SliceV1(slice) => decode_slice_v1(slice),
            RawEndpoints::SliceV1Beta1(slice) => decode_slice_v1beta1(slice),
        }
    }

    /// Decodes an untyped object, rejecting anything that is not an endpoints object.
    pub fn decode_dynamic(&self, obj: DynamicObject) -> Result<EndpointSet, DecodeError> {
        self.decode(&RawEndpoints::try_from(obj)?)
    }

    fn inner(&self) -> SharedListerWatcher<RawEndpoints> {
        self.negotiated.resolve().lw
    }
}

#[async_trait::async_trait]
impl ListerWatcher for EndpointsListerWatcher {
    type Object = RawEndpoints;

    async fn list(&self, opts: ListOptions) -> Result<List<RawEndpoints>> {
        self.inner().list(opts).await
    }

    async fn watch(&self, opts: ListOptions) -> Result<WatchStream<RawEndpoints>> {
        self.inner().watch(opts).await
    }
}

impl fmt::Debug for EndpointsListerWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointsListerWatcher")
            .field("format", &self.negotiated.get().map(|n| n.format))
            .finish()
    }
}
