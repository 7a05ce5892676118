#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod discovery_v1beta1;
pub mod labels;
pub mod networking_v1;
pub mod workload;

pub use k8s_openapi::{
    api::{
        self,
        core::v1::{Endpoints, Namespace, Node, NodeSpec, Pod, PodSpec, PodStatus, Service},
        discovery::v1::EndpointSlice,
    },
    apimachinery::{self, pkg::apis::meta::v1::LabelSelector},
};
pub use self::networking_v1::NetworkPolicy;
pub use kube::{
    api::{Api, ListParams, ObjectList, ObjectMeta, ResourceExt, WatchParams},
    core::{DynamicObject, TypeMeta, WatchEvent},
    runtime::watcher::Event,
    Client, Error, Resource,
};

/// Returns the `apiVersion` and `kind` of a statically-typed resource.
pub fn type_meta<K>() -> TypeMeta
where
    K: Resource,
    K::DynamicType: Default,
{
    let dt = Default::default();
    TypeMeta {
        api_version: K::api_version(&dt).into_owned(),
        kind: K::kind(&dt).into_owned(),
    }
}
