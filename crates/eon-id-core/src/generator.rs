use std::cmp::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::clock::{ClockSource, SystemClock};
use crate::config::{ClockDriftAction, GeneratorConfig};
use crate::error::Error;
use crate::layout::Layout;
use crate::metrics::MetricsSink;
use crate::parsed_id::ParsedId;

#[derive(Debug, Clone, Copy)]
struct State {
    /// Milliseconds since `custom_epoch_ms`. `-1` is the sentinel for "never
    /// generated an id yet".
    last_timestamp: i64,
    sequence: i64,
}

/// A thread-safe Snowflake-style id generator for one `(datacenter_id,
/// worker_id)` pair.
///
/// Concurrent callers are serialized by a single mutex covering
/// `last_timestamp` and `sequence`. Every retry path (the sequence-wrap spin
/// and the drift-wait sleep) drops the guard first and re-enters the loop
/// from the top; the lock is never held across a sleep or a spin.
pub struct Generator<C: ClockSource = SystemClock> {
    state: Mutex<State>,
    clock: C,
    layout: Layout,
    custom_epoch_ms: i64,
    datacenter_id: i64,
    worker_id: i64,
    clock_drift_action: ClockDriftAction,
    max_drift_tolerance_ms: i64,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl<C: ClockSource> std::fmt::Debug for Generator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("datacenter_id", &self.datacenter_id)
            .field("worker_id", &self.worker_id)
            .field("clock_drift_action", &self.clock_drift_action)
            .field("max_drift_tolerance_ms", &self.max_drift_tolerance_ms)
            .finish_non_exhaustive()
    }
}

impl<C: ClockSource> Generator<C> {
    /// Constructs a generator for the given datacenter/worker pair.
    ///
    /// # Errors
    /// Returns `Error::ConfigInvalid` if `config` fails validation, or if
    /// `datacenter_id`/`worker_id` fall outside the configured field widths.
    pub fn new(
        datacenter_id: i64,
        worker_id: i64,
        config: GeneratorConfig,
        clock: C,
    ) -> Result<Self, Error> {
        let layout = config.validate()?;

        if !(0..=layout.max_datacenter_id()).contains(&datacenter_id) {
            return Err(Error::ConfigInvalid {
                reason: format!(
                    "datacenter_id {datacenter_id} outside valid range 0..={}",
                    layout.max_datacenter_id()
                ),
            });
        }
        if !(0..=layout.max_worker_id()).contains(&worker_id) {
            return Err(Error::ConfigInvalid {
                reason: format!(
                    "worker_id {worker_id} outside valid range 0..={}",
                    layout.max_worker_id()
                ),
            });
        }

        Ok(Self {
            state: Mutex::new(State {
                last_timestamp: -1,
                sequence: 0,
            }),
            clock,
            layout,
            custom_epoch_ms: config.custom_epoch_ms,
            datacenter_id,
            worker_id,
            clock_drift_action: config.clock_drift_action,
            max_drift_tolerance_ms: config.max_drift_tolerance_ms,
            metrics: None,
        })
    }

    /// Attaches a metrics sink. The generator calls through it for every
    /// generated id and every wait; with no sink installed these calls are
    /// simply skipped.
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    pub fn datacenter_id(&self) -> i64 {
        self.datacenter_id
    }

    pub fn worker_id(&self) -> i64 {
        self.worker_id
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Generates the next id.
    ///
    /// # Errors
    /// `Error::ClockDrift` if the wall clock moved backward beyond
    /// tolerance (or the drift action is `Error`); `Error::TimestampOverflow`
    /// if the timestamp delta no longer fits the configured field width.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn generate_id(&self) -> Result<i64, Error> {
        loop {
            let now = self.clock.current_millis() - self.custom_epoch_ms;
            let mut guard = self.lock_state();

            match now.cmp(&guard.last_timestamp) {
                Ordering::Equal => {
                    let next_seq = (guard.sequence + 1) & self.layout.max_sequence();
                    if next_seq == 0 {
                        let stale = guard.last_timestamp;
                        drop(guard);
                        self.wait_for_next_millis(stale);
                        continue;
                    }
                    return self.commit(&mut guard, now, next_seq);
                }
                Ordering::Greater => {
                    return self.commit(&mut guard, now, 0);
                }
                Ordering::Less => {
                    let drift = guard.last_timestamp - now;
                    if drift > self.max_drift_tolerance_ms {
                        return Err(Error::ClockDrift { drift_ms: drift });
                    }
                    match self.clock_drift_action {
                        ClockDriftAction::Error => {
                            return Err(Error::ClockDrift { drift_ms: drift });
                        }
                        ClockDriftAction::Wait => {
                            drop(guard);
                            #[cfg(feature = "tracing")]
                            tracing::warn!(drift_ms = drift, "clock drift detected, waiting");
                            if let Some(m) = &self.metrics {
                                m.record_wait_ms(drift);
                            }
                            std::thread::sleep(Duration::from_millis(drift as u64));
                        }
                        ClockDriftAction::UsePrevious => {
                            let last = guard.last_timestamp;
                            let next_seq = (guard.sequence + 1) & self.layout.max_sequence();
                            if next_seq == 0 {
                                drop(guard);
                                self.wait_for_next_millis(last);
                                continue;
                            }
                            return self.commit(&mut guard, last, next_seq);
                        }
                    }
                }
            }
        }
    }

    /// Validates the timestamp delta still fits the configured field width,
    /// then records `(ts_delta, sequence)` into `state` and packs the id.
    fn commit(&self, state: &mut State, ts_delta: i64, sequence: i64) -> Result<i64, Error> {
        if ts_delta > self.layout.max_timestamp_delta() {
            return Err(Error::TimestampOverflow { delta_ms: ts_delta });
        }
        state.last_timestamp = ts_delta;
        state.sequence = sequence;
        let id = self
            .layout
            .pack(ts_delta, self.datacenter_id, self.worker_id, sequence);
        if let Some(m) = &self.metrics {
            m.record_generated();
        }
        Ok(id)
    }

    /// Busy-waits, with the lock released, until the clock reports a value
    /// strictly greater than `last`. Bounded in practice to well under a
    /// millisecond since it only runs after a sequence counter wraps.
    fn wait_for_next_millis(&self, last: i64) {
        loop {
            let now = self.clock.current_millis() - self.custom_epoch_ms;
            if now > last {
                if let Some(m) = &self.metrics {
                    m.record_wait_ms(1);
                }
                return;
            }
            std::hint::spin_loop();
        }
    }

    /// Generates an id and immediately parses it back, for callers that
    /// want both representations without a second call.
    pub fn generate_id_with_metadata(&self) -> Result<(i64, ParsedId), Error> {
        let id = self.generate_id()?;
        let parsed = self.parse_id(id)?;
        Ok((id, parsed))
    }

    /// Decodes a previously generated id.
    ///
    /// # Errors
    /// `Error::InvalidId` if `id` is negative (sign bit set).
    pub fn parse_id(&self, id: i64) -> Result<ParsedId, Error> {
        if id < 0 {
            return Err(Error::InvalidId {
                reason: "id must be non-negative (sign bit must be clear)".to_string(),
            });
        }
        let (ts_delta, datacenter_id, worker_id, sequence) = self.layout.unpack(id);
        Ok(ParsedId {
            timestamp_ms: self.custom_epoch_ms + ts_delta,
            datacenter_id,
            worker_id,
            sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::{FixedClock, SteppedClock};

    fn config() -> GeneratorConfig {
        GeneratorConfig {
            custom_epoch_ms: 0,
            ..Default::default()
        }
    }

    #[test]
    fn ids_strictly_increase_within_same_millisecond() {
        let r#gen = Generator::new(1, 1, config(), FixedClock(1_000)).unwrap();
        let mut prev = r#gen.generate_id().unwrap();
        for _ in 0..100 {
            let id = r#gen.generate_id().unwrap();
            assert!(id > prev, "{id} should be greater than {prev}");
            prev = id;
        }
    }

    #[test]
    fn parse_id_round_trips_all_fields() {
        let r#gen = Generator::new(7, 11, config(), FixedClock(123_456)).unwrap();
        let (id, parsed) = r#gen.generate_id_with_metadata().unwrap();
        assert!(id >= 0);
        assert_eq!(parsed.timestamp_ms, 123_456);
        assert_eq!(parsed.datacenter_id, 7);
        assert_eq!(parsed.worker_id, 11);
        assert_eq!(parsed.sequence, 0);
    }

    #[test]
    fn parse_id_rejects_negative_input() {
        let r#gen = Generator::new(0, 0, config(), FixedClock(0)).unwrap();
        assert!(matches!(r#gen.parse_id(-1), Err(Error::InvalidId { .. })));
    }

    #[test]
    fn out_of_range_datacenter_id_is_rejected() {
        let err = Generator::new(999, 0, config(), FixedClock(0)).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
    }

    #[test]
    fn sequence_wrap_advances_to_next_millisecond_without_duplicates() {
        let mut cfg = config();
        cfg.sequence_bits = 2; // max_sequence == 3, wraps fast for the test
        let clock = SteppedClock::new(vec![1_000, 1_000, 1_000, 1_000, 1_000, 1_001]);
        let r#gen = Generator::new(0, 0, cfg, clock).unwrap();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..4 {
            let id = r#gen.generate_id().unwrap();
            assert!(seen.insert(id), "duplicate id {id}");
        }
        let wrapped = r#gen.generate_id().unwrap();
        let parsed = r#gen.parse_id(wrapped).unwrap();
        assert_eq!(parsed.timestamp_ms, 1_001);
        assert_eq!(parsed.sequence, 0);
    }

    #[test]
    fn backward_clock_jump_within_tolerance_waits_then_succeeds() {
        let clock = SteppedClock::new(vec![1_000, 995, 1_001]);
        let r#gen = Generator::new(0, 0, config(), clock).unwrap();
        let first = r#gen.generate_id().unwrap();
        let second = r#gen.generate_id().unwrap();
        assert!(second > first);
    }

    #[test]
    fn backward_clock_jump_returns_error_when_action_is_error() {
        let mut cfg = config();
        cfg.clock_drift_action = ClockDriftAction::Error;
        let clock = SteppedClock::new(vec![1_000, 995]);
        let r#gen = Generator::new(0, 0, cfg, clock).unwrap();
        r#gen.generate_id().unwrap();
        assert!(matches!(r#gen.generate_id(), Err(Error::ClockDrift { .. })));
    }

    #[test]
    fn backward_clock_jump_beyond_tolerance_always_errors() {
        let mut cfg = config();
        cfg.max_drift_tolerance_ms = 2;
        let clock = SteppedClock::new(vec![1_000, 990]);
        let r#gen = Generator::new(0, 0, cfg, clock).unwrap();
        r#gen.generate_id().unwrap();
        assert!(matches!(r#gen.generate_id(), Err(Error::ClockDrift { .. })));
    }

    #[test]
    fn use_previous_reuses_last_timestamp_without_blocking() {
        let mut cfg = config();
        cfg.clock_drift_action = ClockDriftAction::UsePrevious;
        let clock = SteppedClock::new(vec![1_000, 995]);
        let r#gen = Generator::new(0, 0, cfg, clock).unwrap();
        let first = r#gen.generate_id_with_metadata().unwrap().1;
        let second = r#gen.generate_id_with_metadata().unwrap().1;
        assert_eq!(first.timestamp_ms, 1_000);
        assert_eq!(second.timestamp_ms, 1_000);
        assert_eq!(second.sequence, first.sequence + 1);
    }

    #[test]
    fn timestamp_overflow_is_rejected() {
        let mut cfg = config();
        cfg.timestamp_bits = 2; // max_timestamp_delta == 3
        cfg.datacenter_bits = 1;
        cfg.worker_bits = 1;
        cfg.sequence_bits = 1;
        let r#gen = Generator::new(0, 0, cfg, FixedClock(10)).unwrap();
        assert!(matches!(
            r#gen.generate_id(),
            Err(Error::TimestampOverflow { .. })
        ));
    }
}
