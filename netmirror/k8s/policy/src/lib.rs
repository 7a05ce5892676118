//! Reconciles Kubernetes NetworkPolicies into the policy engine.
//!
//! Each NetworkPolicy is parsed into engine rules and installed under its own [`ResourceId`],
//! replacing whatever that policy installed before. Deleting a policy removes exactly the rules
//! it installed. Failures are isolated to the object that caused them.
//!
//! [`ResourceId`]: netmirror_core::ResourceId

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod metrics;
pub mod parse;
mod reconcile;
mod watcher;


pub use self::{
    metrics::{PolicyMetrics, SyncProgress},
    parse::{parse_network_policy, policy_labels, ParseError},
    reconcile::{Error, Reconciler},
    watcher::Watcher,
};

/// The API group from which NetworkPolicies are received.
pub const NETWORKING_API_GROUP: &str = "networking.k8s.io";
