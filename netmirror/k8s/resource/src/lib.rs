//! Mirrors Kubernetes resources into local, incrementally-updated stores.
//!
//! Every watched kind is described by a [`Resource`]: a lister-watcher, the list-option
//! modifiers applied to each request, an optional transform from the wire type into the stored
//! type, and a set of named secondary indexes. A resource's event stream feeds a [`Store`].
//!
//! Some logical resources are served by the cluster in more than one wire format. Service
//! endpoints are the canonical example: a cluster may serve `discovery.k8s.io/v1`
//! EndpointSlices, `discovery.k8s.io/v1beta1` EndpointSlices, or only core/v1 Endpoints. The
//! [`endpoints`] module negotiates the format on first use, so that the resource can be built
//! before the cluster's capabilities are known.
//!
//! ```text
//! [ Capabilities ] -> [ Negotiator ] -> [ EndpointsListerWatcher ] -> [ Resource ] -> [ Store ]
//!                                                                                      ^
//!                                                         [ LocalNode ] -> [ local-node index ]
//! ```

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod capabilities;
mod config;
mod ctors;
pub mod endpoints;
mod error;
pub mod index;
pub mod lister_watcher;
mod local_node;
pub mod metrics;
mod negotiate;
pub mod options;
mod resource;
pub mod store;

pub use self::{
    capabilities::{Capabilities, CapabilityProvider, ClusterCapabilities},
    config::Config,
    ctors::*,
    error::Error,
    index::{IndexError, IndexFn, LOCAL_NODE_INDEX},
    lister_watcher::{ListerWatcher, SharedListerWatcher},
    local_node::LocalNode,
    metrics::MirrorMetrics,
    negotiate::Negotiator,
    options::{ListOptions, OptionsModifier},
    resource::Resource,
    store::{Change, ObjectKey, SharedStore, Store},
};
