use std::time::{SystemTime, UNIX_EPOCH};

/// A source of wall-clock time, in UNIX milliseconds.
///
/// This abstraction lets the generator be driven by a mocked clock in tests
/// (to force backward jumps and same-millisecond bursts deterministically)
/// while production code reads the OS clock.
///
/// Unlike a monotonic, process-relative timer, this must report the same
/// notion of "now" as `custom_epoch` and the coordinator's
/// `register_time`/`last_heartbeat` fields, all of which are UNIX
/// timestamps shared across the fleet.
pub trait ClockSource: Send + Sync {
    /// Returns the current time in UNIX milliseconds.
    fn current_millis(&self) -> i64;
}

/// The production clock source: reads the OS wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn current_millis(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX_EPOCH");
        now.as_millis() as i64
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::ClockSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A clock fixed at a single millisecond value.
    pub struct FixedClock(pub i64);

    impl ClockSource for FixedClock {
        fn current_millis(&self) -> i64 {
            self.0
        }
    }

    /// A clock that walks through a scripted sequence of millisecond values,
    /// repeating the last one once exhausted. Lets tests script a backward
    /// jump, a same-millisecond burst, or any other ordering without
    /// sleeping.
    ///
    /// Uses an atomic index (rather than `Cell`) since `ClockSource` requires
    /// `Sync` — the generator calls through a shared `&self`.
    pub struct SteppedClock {
        values: Vec<i64>,
        index: AtomicUsize,
    }

    impl SteppedClock {
        pub fn new(values: Vec<i64>) -> Self {
            assert!(!values.is_empty(), "SteppedClock needs at least one value");
            Self {
                values,
                index: AtomicUsize::new(0),
            }
        }
    }

    impl ClockSource for SteppedClock {
        fn current_millis(&self) -> i64 {
            let i = self.index.load(Ordering::SeqCst);
            let v = self.values[i.min(self.values.len() - 1)];
            if i + 1 < self.values.len() {
                self.index.store(i + 1, Ordering::SeqCst);
            }
            v
        }
    }
}
