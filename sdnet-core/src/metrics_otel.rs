//! OpenTelemetry-based metrics
//!
//! A single global [`Metrics`] instance is created on first use from the
//! global meter provider. Without an installed exporter the instruments are
//! no-ops, so recording is always safe. Building without the
//! `observability` feature compiles every `record_*` function to nothing.

#[cfg(feature = "observability")]
mod otel {
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram, Meter},
        KeyValue,
    };
    use std::sync::OnceLock;

    static METRICS: OnceLock<Metrics> = OnceLock::new();

    /// Container for all sdnet metrics
    pub struct Metrics {
        pub mastership_changes: Counter<u64>,
        pub backup_changes: Counter<u64>,
        pub store_suspensions: Counter<u64>,
        pub cas_conflicts: Counter<u64>,
        pub balancer_moves: Counter<u64>,
        pub topology_rebuilds: Counter<u64>,
        pub topology_build_duration: Histogram<f64>,
        pub path_computations: Counter<u64>,
        pub path_cache_hits: Counter<u64>,
        pub route_events: Counter<u64>,
        pub stale_writes_rejected: Counter<u64>,
        pub listener_drops: Counter<u64>,
        pub reaper_runs: Counter<u64>,
    }

    impl Metrics {
        fn new(meter: Meter) -> Self {
            Self {
                mastership_changes: meter
                    .u64_counter("mastership.master_changes.total")
                    .with_description("Number of master changes applied to the term store")
                    .init(),
                backup_changes: meter
                    .u64_counter("mastership.backup_changes.total")
                    .with_description("Number of standby list changes")
                    .init(),
                store_suspensions: meter
                    .u64_counter("store.suspensions.total")
                    .with_description("Number of times a distributed primitive became unavailable")
                    .init(),
                cas_conflicts: meter
                    .u64_counter("store.cas_conflicts.total")
                    .with_description("Number of compare-and-swap retries")
                    .init(),
                balancer_moves: meter
                    .u64_counter("mastership.balancer.moves.total")
                    .with_description("Masterships moved by the role balancer")
                    .init(),
                topology_rebuilds: meter
                    .u64_counter("topology.rebuilds.total")
                    .with_description("Number of topology snapshots built")
                    .init(),
                topology_build_duration: meter
                    .f64_histogram("topology.build.duration")
                    .with_description("Time to build a topology snapshot in seconds")
                    .init(),
                path_computations: meter
                    .u64_counter("path.computations.total")
                    .with_description("Path queries executed against snapshots")
                    .init(),
                path_cache_hits: meter
                    .u64_counter("path.cache_hits.total")
                    .with_description("Path queries served from the snapshot cache")
                    .init(),
                route_events: meter
                    .u64_counter("route.events.total")
                    .with_description("Route events emitted")
                    .init(),
                stale_writes_rejected: meter
                    .u64_counter("store.stale_writes.total")
                    .with_description("Writes rejected because of a stale mastership term")
                    .init(),
                listener_drops: meter
                    .u64_counter("events.listener_drops.total")
                    .with_description("Events dropped because a listener queue was full")
                    .init(),
                reaper_runs: meter
                    .u64_counter("reaper.runs.total")
                    .with_description("Departed nodes processed by the reaper")
                    .init(),
            }
        }
    }

    /// Get the global metrics instance
    pub fn metrics() -> &'static Metrics {
        METRICS.get_or_init(|| Metrics::new(global::meter("sdnet")))
    }

    pub fn record_master_change(device_id: &str) {
        metrics()
            .mastership_changes
            .add(1, &[KeyValue::new("device.id", device_id.to_string())]);
    }

    pub fn record_backup_change() {
        metrics().backup_changes.add(1, &[]);
    }

    pub fn record_store_suspended(store: &str) {
        metrics()
            .store_suspensions
            .add(1, &[KeyValue::new("store", store.to_string())]);
    }

    pub fn record_cas_conflict(store: &str) {
        metrics()
            .cas_conflicts
            .add(1, &[KeyValue::new("store", store.to_string())]);
    }

    pub fn record_balancer_moves(moves: usize) {
        metrics().balancer_moves.add(moves as u64, &[]);
    }

    pub fn record_topology_build(duration_secs: f64) {
        let m = metrics();
        m.topology_rebuilds.add(1, &[]);
        m.topology_build_duration.record(duration_secs, &[]);
    }

    pub fn record_path_computation(kind: &'static str, cache_hit: bool) {
        let m = metrics();
        m.path_computations.add(1, &[KeyValue::new("kind", kind)]);
        if cache_hit {
            m.path_cache_hits.add(1, &[KeyValue::new("kind", kind)]);
        }
    }

    pub fn record_route_event(kind: &'static str) {
        metrics().route_events.add(1, &[KeyValue::new("type", kind)]);
    }

    pub fn record_stale_write(store: &str) {
        metrics()
            .stale_writes_rejected
            .add(1, &[KeyValue::new("store", store.to_string())]);
    }

    pub fn record_listener_drop(listener: &str) {
        metrics()
            .listener_drops
            .add(1, &[KeyValue::new("listener", listener.to_string())]);
    }

    pub fn record_reaper_run() {
        metrics().reaper_runs.add(1, &[]);
    }
}

#[cfg(feature = "observability")]
pub use otel::*;

#[cfg(not(feature = "observability"))]
mod noop {
    pub fn record_master_change(_device_id: &str) {}
    pub fn record_backup_change() {}
    pub fn record_store_suspended(_store: &str) {}
    pub fn record_cas_conflict(_store: &str) {}
    pub fn record_balancer_moves(_moves: usize) {}
    pub fn record_topology_build(_duration_secs: f64) {}
    pub fn record_path_computation(_kind: &'static str, _cache_hit: bool) {}
    pub fn record_route_event(_kind: &'static str) {}
    pub fn record_stale_write(_store: &str) {}
    pub fn record_listener_drop(_listener: &str) {}
    pub fn record_reaper_run() {}
}

#[cfg(not(feature = "observability"))]
pub use noop::*;
