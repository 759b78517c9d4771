use chrono::{DateTime, Utc};

/// Wall clock abstraction for the control cycle.
///
/// `now()` is the UTC instant used to stamp decisions and age samples.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Default, real-time clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub mod test_clock {
    use super::*;
    use chrono::Duration;

    /// Deterministic test clock whose time can be advanced manually.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        at: std::sync::Arc<std::sync::Mutex<DateTime<Utc>>>,
    }

    impl TestClock {
        pub fn new(at: DateTime<Utc>) -> Self {
            Self {
                at: std::sync::Arc::new(std::sync::Mutex::new(at)),
            }
        }

        /// Advance the clock by the given number of minutes.
        pub fn advance_min(&self, minutes: i64) {
            if let Ok(mut at) = self.at.lock() {
                *at += Duration::minutes(minutes);
            }
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            self.at.lock().map(|g| *g).unwrap_or_else(|_| Utc::now())
        }
    }

    #[test]
    fn advance_moves_now() {
        let start = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = TestClock::new(start);
        clock.advance_min(12);
        assert_eq!(clock.now() - start, Duration::minutes(12));
    }

    #[test]
    fn system_clock_is_close_to_utc_now() {
        let before = Utc::now();
        let now = SystemClock::new().now();
        assert!(now >= before);
        assert!(now - before < Duration::seconds(5));
    }
}
