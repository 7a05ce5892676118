//! List options and the modifiers that shape them.

use crate::Error;
use kube::api::{ListParams, WatchParams};
use netmirror_core::{
    labels::{Expression, Operator},
    Selector,
};
use netmirror_k8s_api::labels::{HEADLESS_SERVICE, SERVICE_PROXY_NAME};
use regex::Regex;
use std::sync::{Arc, LazyLock};

/// Parameters for a list or watch request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub timeout_seconds: Option<u32>,

    /// The version to start a watch from. Unset for lists.
    pub resource_version: Option<String>,
}

/// Mutates list options before a request is issued.
///
/// Modifiers are applied in the order they were provided, so later modifiers win.
pub type OptionsModifier = Arc<dyn Fn(&mut ListOptions) + Send + Sync>;

// Kubernetes rejects watches with a timeout of 295s or more.
const MAX_WATCH_TIMEOUT_SECS: u32 = 290;

const MAX_LABEL_VALUE_LEN: usize = 63;

static LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$").expect("label value regex")
});

// === impl ListOptions ===

impl ListOptions {
    pub fn with_modifiers<'m>(
        mut self,
        modifiers: impl IntoIterator<Item = &'m OptionsModifier>,
    ) -> Self {
        for modify in modifiers {
            modify(&mut self);
        }
        self
    }

    pub fn to_list_params(&self) -> ListParams {
        let mut params = ListParams::default();
        params.label_selector = self.label_selector.clone();
        params.field_selector = self.field_selector.clone();
        params.timeout = self.timeout_seconds;
        params
    }

    pub fn to_watch_params(&self) -> WatchParams {
        let mut params = WatchParams::default();
        params.label_selector = self.label_selector.clone();
        params.field_selector = self.field_selector.clone();
        params.timeout = self
            .timeout_seconds
            .map(|t| t.min(MAX_WATCH_TIMEOUT_SECS));
        params
    }
}

/// Bounds the duration of every request. A zero timeout leaves requests unbounded.
pub fn list_timeout(seconds: u32) -> Option<OptionsModifier> {
    if seconds == 0 {
        return None;
    }
    Some(Arc::new(move |opts: &mut ListOptions| {
        opts.timeout_seconds = Some(seconds);
    }))
}

/// Restricts services and endpoints to those handled by the named service proxy, ignoring
/// headless services.
///
/// An empty name selects objects without a service-proxy-name label.
pub fn service_proxy_name(name: &str) -> Result<OptionsModifier, Error> {
    validate_label_value(SERVICE_PROXY_NAME, name)?;

    let not_headless = Expression::new(HEADLESS_SERVICE, Operator::DoesNotExist, None);
    let selector = if name.is_empty() {
        Selector::from_expressions(vec![
            not_headless,
            Expression::new(SERVICE_PROXY_NAME, Operator::DoesNotExist, None),
        ])
    } else {
        Selector::new(
            Some(
                Some((SERVICE_PROXY_NAME.to_string(), name.to_string()))
                    .into_iter()
                    .collect(),
            ),
            Some(vec![not_headless]),
        )
    };
    Ok(label_selector(selector))
}

/// Restricts endpoint slices to those of non-headless services.
pub fn endpoint_slices() -> OptionsModifier {
    label_selector(Selector::from_expressions(vec![Expression::new(
        HEADLESS_SERVICE,
        Operator::DoesNotExist,
        None,
    )]))
}

pub fn label_selector(selector: Selector) -> OptionsModifier {
    let selector = selector.to_string();
    Arc::new(move |opts: &mut ListOptions| {
        opts.label_selector = Some(selector.clone());
    })
}

fn validate_label_value(key: &'static str, value: &str) -> Result<(), Error> {
    if value.len() > MAX_LABEL_VALUE_LEN || !LABEL_VALUE.is_match(value) {
        return Err(Error::InvalidLabelValue {
            key,
            value: value.to_string(),
        });
    }
    Ok(())
}
