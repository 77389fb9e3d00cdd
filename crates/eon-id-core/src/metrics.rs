/// A narrow metrics hook the generator calls through when one is supplied.
///
/// No metrics backend ships in this crate — exporting to Prometheus,
/// StatsD, or an OTLP collector is a host concern. The generator operates
/// correctly with no sink installed at all; every call site treats the sink
/// as `Option<Arc<dyn MetricsSink>>`.
///
/// Shared with `eon-id-coordinator`, which calls through the same trait for
/// heartbeat and registration outcomes — one sink can observe both halves
/// of the system.
pub trait MetricsSink: Send + Sync {
    /// Called once per successfully generated id.
    fn record_generated(&self) {}

    /// Called whenever `generate_id` had to wait (drift-wait sleep or
    /// sequence-wrap spin) before returning, with the wait duration.
    fn record_wait_ms(&self, _wait_ms: i64) {}

    /// Called after a successful heartbeat refresh.
    fn record_heartbeat_success(&self) {}

    /// Called after a failed heartbeat refresh.
    fn record_heartbeat_failure(&self) {}

    /// Called after a successful worker-id registration (dynamic or
    /// specific).
    fn record_registration(&self) {}
}
