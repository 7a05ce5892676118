use crate::options::{self, OptionsModifier};

/// Settings shared by the resource constructors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Prefer EndpointSlices over Endpoints when the cluster serves them.
    pub enable_endpoint_slice: bool,

    /// Only services labeled with this service-proxy-name are mirrored. When empty, only
    /// services without the label are mirrored.
    pub service_proxy_name: String,

    /// Bounds the duration of list requests. Zero leaves them unbounded.
    pub list_timeout_seconds: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_endpoint_slice: true,
            service_proxy_name: String::new(),
            list_timeout_seconds: 0,
        }
    }
}

impl Config {
    /// The modifier applied to every list request, if any.
    pub fn list_timeout(&self) -> Option<OptionsModifier> {
        options::list_timeout(self.list_timeout_seconds)
    }
}
