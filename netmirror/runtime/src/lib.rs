#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use netmirror_core as core;
pub use netmirror_k8s_api as k8s;
pub use netmirror_k8s_policy as policy;
pub use netmirror_k8s_resource as resource;

mod args;
mod node;

pub use self::args::Args;
