//! Well-known label keys.

/// Set on services (and their endpoints) that are handled by a specific service proxy.
pub const SERVICE_PROXY_NAME: &str = "service.kubernetes.io/service-proxy-name";

/// Set on services (and their endpoints) that have no cluster IP.
pub const HEADLESS_SERVICE: &str = "service.kubernetes.io/headless";

/// Names the service that owns an EndpointSlice.
pub const SERVICE_NAME: &str = "kubernetes.io/service-name";

/// The zone a node runs in.
pub const TOPOLOGY_ZONE: &str = "topology.kubernetes.io/zone";

/// The pre-GA zone label, still reported by `discovery.k8s.io/v1beta1` endpoint topology.
pub const TOPOLOGY_ZONE_BETA: &str = "failure-domain.beta.kubernetes.io/zone";
