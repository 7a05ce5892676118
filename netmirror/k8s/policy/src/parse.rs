//! Translates NetworkPolicies into engine rules.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use netmirror_core::{
    labels::{Expression, InvalidOperator},
    rule::{
        EndpointSelector, InvalidProtocol, NamespaceMatch, Peer, PeerRule, Port, PortRule,
        Protocol,
    },
    IpNet, Labels, ResourceId, ResourceKind, Rule, Selector,
};
use netmirror_k8s_api::{
    networking_v1::{NetworkPolicyPeer, NetworkPolicyPort},
    LabelSelector, NetworkPolicy,
};
use std::num::NonZeroU16;

/// Identifies the kind of object a rule was derived from.
pub const DERIVED_FROM_LABEL: &str = "netmirror.io/policy-derived-from";
pub const NAME_LABEL: &str = "netmirror.io/policy-name";
pub const NAMESPACE_LABEL: &str = "netmirror.io/policy-namespace";
pub const UID_LABEL: &str = "netmirror.io/policy-uid";

const DERIVED_FROM_NETWORK_POLICY: &str = "NetworkPolicy";

// Policies without a namespace are treated as belonging to the default namespace.
const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("policy has no name")]
    MissingName,

    #[error("invalid CIDR {cidr:?}: {source}")]
    InvalidCidr {
        cidr: String,
        #[source]
        source: ipnet::AddrParseError,
    },

    #[error("invalid port {0}")]
    InvalidPort(i32),

    #[error(transparent)]
    InvalidProtocol(#[from] InvalidProtocol),

    #[error(transparent)]
    InvalidOperator(#[from] InvalidOperator),

    #[error("peer selects nothing")]
    EmptyPeer,

    #[error("unsupported policy type {0:?}")]
    InvalidPolicyType(String),
}

/// Returns the labels identifying the rules derived from `np`, or `None` if the policy has no
/// name.
pub fn policy_labels(np: &NetworkPolicy) -> Option<Labels> {
    let name = np.metadata.name.as_deref()?;
    let mut labels = vec![
        (DERIVED_FROM_LABEL, DERIVED_FROM_NETWORK_POLICY.to_string()),
        (NAME_LABEL, name.to_string()),
        (NAMESPACE_LABEL, namespace(np).to_string()),
    ];
    if let Some(uid) = np.metadata.uid.as_deref() {
        labels.push((UID_LABEL, uid.to_string()));
    }
    Some(
        labels
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

/// The identity under which the rules derived from `np` are installed.
pub fn resource_id(np: &NetworkPolicy) -> ResourceId {
    ResourceId::new(
        ResourceKind::NetworkPolicy,
        namespace(np),
        np.metadata.name.as_deref().unwrap_or_default(),
    )
}

pub fn parse_network_policy(np: &NetworkPolicy) -> Result<Vec<Rule>, ParseError> {
    let labels = policy_labels(np).ok_or(ParseError::MissingName)?;
    let ns = namespace(np);
    let spec = &np.spec;

    let selector = EndpointSelector::in_namespace(ns, selector(&spec.pod_selector)?);
    let mut rule = Rule::new(selector, labels);

    rule.ingress = spec
        .ingress
        .iter()
        .flatten()
        .map(|r| peer_rule(ns, r.from.as_deref(), r.ports.as_deref()))
        .collect::<Result<_, _>>()?;
    rule.egress = spec
        .egress
        .iter()
        .flatten()
        .map(|r| peer_rule(ns, r.to.as_deref(), r.ports.as_deref()))
        .collect::<Result<_, _>>()?;

    // Without explicit policy types, ingress is always restricted and egress is restricted only
    // when egress rules are present.
    match spec.policy_types.as_deref() {
        None | Some([]) => {
            rule.enforce_ingress = true;
            rule.enforce_egress = spec.egress.is_some();
        }
        Some(types) => {
            for ty in types {
                match ty.as_str() {
                    "Ingress" => rule.enforce_ingress = true,
                    "Egress" => rule.enforce_egress = true,
                    _ => return Err(ParseError::InvalidPolicyType(ty.clone())),
                }
            }
        }
    }

    Ok(vec![rule])
}

fn namespace(np: &NetworkPolicy) -> &str {
    np.metadata.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
}

fn selector(sel: &LabelSelector) -> Result<Selector, ParseError> {
    let exprs = match sel.match_expressions.as_ref() {
        Some(reqs) => Some(
            reqs.iter()
                .map(|req| -> Result<Expression, ParseError> {
                    Ok(Expression::new(
                        req.key.clone(),
                        req.operator.parse()?,
                        req.values.iter().flatten().cloned(),
                    ))
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
        None => None,
    };
    Ok(Selector::new(sel.match_labels.clone(), exprs))
}

fn peer_rule(
    ns: &str,
    peers: Option<&[NetworkPolicyPeer]>,
    ports: Option<&[NetworkPolicyPort]>,
) -> Result<PeerRule, ParseError> {
    Ok(PeerRule {
        peers: peers
            .into_iter()
            .flatten()
            .map(|p| peer(ns, p))
            .collect::<Result<_, _>>()?,
        ports: ports
            .into_iter()
            .flatten()
            .map(port_rule)
            .collect::<Result<_, _>>()?,
    })
}

fn peer(ns: &str, peer: &NetworkPolicyPeer) -> Result<Peer, ParseError> {
    if let Some(block) = peer.ip_block.as_ref() {
        let net = parse_net(&block.cidr)?;
        let except = block
            .except
            .iter()
            .flatten()
            .map(|cidr| parse_net(cidr))
            .collect::<Result<_, _>>()?;
        return Ok(Peer::Network { net, except });
    }

    // A pod selector without a namespace selector selects pods in the policy's namespace, and a
    // namespace selector without a pod selector selects all pods in the selected namespaces.
    let namespace = match peer.namespace_selector.as_ref() {
        Some(sel) => NamespaceMatch::Selector(selector(sel)?),
        None if peer.pod_selector.is_some() => NamespaceMatch::Name(ns.to_string()),
        None => return Err(ParseError::EmptyPeer),
    };
    let pods = match peer.pod_selector.as_ref() {
        Some(sel) => selector(sel)?,
        None => Selector::default(),
    };
    Ok(Peer::Endpoints(EndpointSelector { namespace, pods }))
}

fn port_rule(port: &NetworkPolicyPort) -> Result<PortRule, ParseError> {
    let protocol = match port.protocol.as_deref() {
        Some(p) => p.parse()?,
        None => Protocol::default(),
    };
    let port = match port.port.as_ref() {
        None => None,
        Some(IntOrString::Int(n)) => {
            let n = u16::try_from(*n)
                .ok()
                .and_then(NonZeroU16::new)
                .ok_or(ParseError::InvalidPort(*n))?;
            Some(Port::Number(n))
        }
        Some(IntOrString::String(name)) => {
            match name.parse::<u16>().ok().and_then(NonZeroU16::new) {
                Some(n) => Some(Port::Number(n)),
                None => Some(Port::Name(name.clone())),
            }
        }
    };
    Ok(PortRule { port, protocol })
}

fn parse_net(cidr: &str) -> Result<IpNet, ParseError> {
    cidr.parse().map_err(|source| ParseError::InvalidCidr {
        cidr: cidr.to_string(),
        source,
    })
}
