#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod engine;
pub mod labels;
mod resource_id;
pub mod rule;

pub use self::{
    engine::{AddOptions, DeleteOptions, PolicyEngine, Repository, Revision, Source},
    labels::{Labels, Selector},
    resource_id::{ResourceId, ResourceKind},
    rule::Rule,
};
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};
