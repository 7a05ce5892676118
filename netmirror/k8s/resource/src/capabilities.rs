//! Cluster capabilities that select between wire formats.

use crate::Error;
use k8s_openapi::apimachinery::pkg::version::Info;
use std::sync::{Arc, OnceLock};

/// The optional APIs a cluster serves.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `discovery.k8s.io` EndpointSlices are served (v1beta1 at least).
    pub endpoint_slice: bool,

    /// `discovery.k8s.io/v1` EndpointSlices are served.
    pub endpoint_slice_v1: bool,
}

/// Exposes the capabilities of the connected cluster.
pub trait CapabilityProvider: Send + Sync {
    fn capabilities(&self) -> Capabilities;
}

/// Capabilities detected from the API server once the client has connected.
///
/// Until detection succeeds no optional capability is reported.
#[derive(Clone, Debug, Default)]
pub struct ClusterCapabilities(Arc<OnceLock<Capabilities>>);

// === impl Capabilities ===

impl Capabilities {
    pub const fn from_version(major: u32, minor: u32) -> Self {
        Self {
            endpoint_slice: major > 1 || (major == 1 && minor >= 17),
            endpoint_slice_v1: major > 1 || (major == 1 && minor >= 21),
        }
    }

    /// Reads the version reported by the API server.
    ///
    /// Managed clusters often report minors like `27+`, and some only populate `gitVersion`.
    pub fn from_info(info: &Info) -> Result<Self, Error> {
        let major = leading_number(&info.major);
        let minor = leading_number(&info.minor);
        if let (Some(major), Some(minor)) = (major, minor) {
            return Ok(Self::from_version(major, minor));
        }

        let mut parts = info.git_version.trim_start_matches('v').split('.');
        match (
            parts.next().and_then(leading_number),
            parts.next().and_then(leading_number),
        ) {
            (Some(major), Some(minor)) => Ok(Self::from_version(major, minor)),
            _ => Err(Error::InvalidVersion(info.git_version.clone())),
        }
    }
}

impl CapabilityProvider for Capabilities {
    fn capabilities(&self) -> Capabilities {
        *self
    }
}

fn leading_number(s: &str) -> Option<u32> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse().ok()
}

// === impl ClusterCapabilities ===

impl ClusterCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the cluster's capabilities. Returns false if they were already known.
    pub fn set(&self, caps: Capabilities) -> bool {
        self.0.set(caps).is_ok()
    }

    pub fn is_detected(&self) -> bool {
        self.0.get().is_some()
    }

    #[tracing::instrument(skip_all)]
    pub async fn detect(&self, client: &kube::Client) -> Result<Capabilities, Error> {
        let info = client.apiserver_version().await?;
        let caps = Capabilities::from_info(&info)?;
        tracing::info!(version = %info.git_version, ?caps, "Detected cluster capabilities");
        self.set(caps);
        Ok(self.capabilities())
    }
}

impl CapabilityProvider for ClusterCapabilities {
    fn capabilities(&self) -> Capabilities {
        self.0.get().copied().unwrap_or_default()
    }
}
