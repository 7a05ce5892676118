//! The internal representation of network policy rules.

use crate::{IpNet, Labels, Selector};
use std::num::NonZeroU16;

/// A single policy rule, selecting a set of endpoints and describing the traffic they admit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    /// Selects the endpoints this rule applies to.
    pub endpoint_selector: EndpointSelector,

    /// When set, ingress to the selected endpoints is restricted to `ingress`.
    pub enforce_ingress: bool,
    pub ingress: Vec<PeerRule>,

    /// When set, egress from the selected endpoints is restricted to `egress`.
    pub enforce_egress: bool,
    pub egress: Vec<PeerRule>,

    /// Identifies the rule's origin. Deletions select rules by these labels.
    pub labels: Labels,
}

/// Selects endpoints within a namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointSelector {
    pub namespace: NamespaceMatch,
    pub pods: Selector,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NamespaceMatch {
    Name(String),
    Selector(Selector),
}

/// Allows traffic to or from a set of peers on a set of ports.
///
/// An empty peer list matches all peers and an empty port list matches all ports.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerRule {
    pub peers: Vec<Peer>,
    pub ports: Vec<PortRule>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Peer {
    Endpoints(EndpointSelector),
    Network { net: IpNet, except: Vec<IpNet> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortRule {
    pub port: Option<Port>,
    pub protocol: Protocol,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Port {
    Number(NonZeroU16),
    Name(String),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

// === impl Rule ===

impl Rule {
    pub fn new(endpoint_selector: EndpointSelector, labels: Labels) -> Self {
        Self {
            endpoint_selector,
            enforce_ingress: false,
            ingress: Vec::new(),
            enforce_egress: false,
            egress: Vec::new(),
            labels,
        }
    }
}

// === impl EndpointSelector ===

impl EndpointSelector {
    pub fn in_namespace(namespace: impl Into<String>, pods: Selector) -> Self {
        Self {
            namespace: NamespaceMatch::Name(namespace.into()),
            pods,
        }
    }
}

// === impl Protocol ===

impl std::str::FromStr for Protocol {
    type Err = InvalidProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TCP" => Ok(Self::Tcp),
            "UDP" => Ok(Self::Udp),
            "SCTP" => Ok(Self::Sctp),
            s => Err(InvalidProtocol(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported protocol: {0}")]
pub struct InvalidProtocol(String);
