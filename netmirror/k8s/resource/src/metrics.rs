use crate::store::Change;
use kube::runtime::watcher::Event;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

/// Counts the events applied to mirror stores.
#[derive(Clone, Debug, Default)]
pub struct MirrorMetrics {
    events: Family<EventLabels, Counter>,
    size: Family<ResourceLabels, Gauge>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct EventLabels {
    resource: &'static str,
    event: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResourceLabels {
    resource: &'static str,
}

// === impl MirrorMetrics ===

impl MirrorMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let events = Family::default();
        prom.register(
            "events",
            "Count of watch events applied to mirrored resources",
            events.clone(),
        );

        let size = Family::default();
        prom.register(
            "size",
            "Gauge of the number of objects in each mirrored resource",
            size.clone(),
        );

        Self { events, size }
    }

    pub fn observe<T>(&self, resource: &'static str, change: &Change<T>) {
        let event = match change {
            Change::Event(Event::Apply(_)) => "apply",
            Change::Event(Event::Delete(_)) => "delete",
            Change::Event(Event::Init) => "init",
            Change::Event(Event::InitApply(_)) => "init_apply",
            Change::Event(Event::InitDone) => "init_done",
            Change::Evict(_) => "evict",
        };
        self.inc(resource, event);
    }

    /// Counts an object that could not be decoded into its mirrored form.
    pub fn decode_error(&self, resource: &'static str) {
        self.inc(resource, "decode_error");
    }

    pub fn set_size(&self, resource: &'static str, size: usize) {
        self.size
            .get_or_create(&ResourceLabels { resource })
            .set(size as i64);
    }

    fn inc(&self, resource: &'static str, event: &'static str) {
        self.events
            .get_or_create(&EventLabels { resource, event })
            .inc();
    }

    pub fn events(&self, resource: &'static str, event: &'static str) -> u64 {
        self.events
            .get_or_create(&EventLabels { resource, event })
            .get()
    }
}
