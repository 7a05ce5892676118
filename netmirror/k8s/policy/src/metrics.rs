use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::{
    sync::{atomic::AtomicU64, Arc},
    time::{SystemTime, UNIX_EPOCH},
};

/// Counts policy changes by outcome.
#[derive(Clone, Debug, Default)]
pub struct PolicyMetrics {
    changes: Family<OutcomeLabels, Counter>,
}

/// Records when an event was last received from each API group.
#[derive(Clone, Debug, Default)]
pub struct SyncProgress {
    timestamps: Family<ApiGroupLabels, Gauge<f64, AtomicU64>>,
    last: Arc<Mutex<HashMap<String, SystemTime>>>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabels {
    outcome: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ApiGroupLabels {
    api_group: String,
}

const SUCCESS: &str = "success";
const FAIL: &str = "fail";

// === impl PolicyMetrics ===

impl PolicyMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let changes = Family::default();
        prom.register(
            "policy_change",
            "Count of policy changes by outcome",
            changes.clone(),
        );
        Self { changes }
    }

    pub(crate) fn success(&self) {
        self.changes
            .get_or_create(&OutcomeLabels { outcome: SUCCESS })
            .inc();
    }

    pub(crate) fn fail(&self) {
        self.changes
            .get_or_create(&OutcomeLabels { outcome: FAIL })
            .inc();
    }

    pub fn successes(&self) -> u64 {
        self.changes
            .get_or_create(&OutcomeLabels { outcome: SUCCESS })
            .get()
    }

    pub fn failures(&self) -> u64 {
        self.changes
            .get_or_create(&OutcomeLabels { outcome: FAIL })
            .get()
    }
}

// === impl SyncProgress ===

impl SyncProgress {
    pub fn register(prom: &mut Registry) -> Self {
        let timestamps = Family::default();
        prom.register(
            "k8s_event_timestamp_seconds",
            "Time of the last event received from each Kubernetes API group",
            timestamps.clone(),
        );
        Self {
            timestamps,
            last: Default::default(),
        }
    }

    pub fn set_event_timestamp(&self, api_group: &str) {
        let now = SystemTime::now();
        let secs = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.timestamps
            .get_or_create(&ApiGroupLabels {
                api_group: api_group.to_string(),
            })
            .set(secs);
        self.last.lock().insert(api_group.to_string(), now);
    }

    pub fn last_event(&self, api_group: &str) -> Option<SystemTime> {
        self.last.lock().get(api_group).copied()
    }
}
