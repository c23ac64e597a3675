use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Monotonic coarse time used for wall-clock leases.
pub type CoarseTimePoint = Instant;

/// Physical component of a hybrid time, in microseconds since the unix epoch.
pub type MicrosTime = u64;

/// Clock is the source of both time domains that lease computations consult. Both readings must
/// be monotonic within a process.
pub trait Clock: Send + Sync {
    fn now(&self) -> CoarseTimePoint;
    fn hybrid_time_micros(&self) -> MicrosTime;
}

#[derive(Default)]
pub struct RealClock {
    // Wall clock can step backwards. Hybrid time never does.
    last_hybrid_time_micros: AtomicU64,
}

impl RealClock {
    pub fn new() -> Self {
        RealClock::default()
    }
}

impl Clock for RealClock {
    fn now(&self) -> CoarseTimePoint {
        Instant::now()
    }

    fn hybrid_time_micros(&self) -> MicrosTime {
        let wall = chrono::Utc::now().timestamp_micros().max(0) as u64;
        let previous = self.last_hybrid_time_micros.fetch_max(wall, Ordering::AcqRel);
        previous.max(wall)
    }
}

#[derive(Copy, Clone, Debug)]
struct MockTime {
    now: Instant,
    hybrid_time_micros: MicrosTime,
}

pub fn mocked_clock() -> (MockClock, MockClockController) {
    let now = Instant::now();
    let (tx, rx) = watch::channel(MockTime {
        now,
        hybrid_time_micros: 0,
    });
    let clock = MockClock { current_time: rx };
    let controller = MockClockController {
        current_time: tx,
        time_of_instantiation: now,
    };

    (clock, controller)
}

/// MockClock only moves when its controller says so. Both time domains start at the controller's
/// origin: `now()` at the instant of creation and hybrid time at 0.
#[derive(Clone)]
pub struct MockClock {
    current_time: watch::Receiver<MockTime>,
}

impl Clock for MockClock {
    fn now(&self) -> CoarseTimePoint {
        self.current_time.borrow().now
    }

    fn hybrid_time_micros(&self) -> MicrosTime {
        self.current_time.borrow().hybrid_time_micros
    }
}

pub struct MockClockController {
    current_time: watch::Sender<MockTime>,
    time_of_instantiation: Instant,
}

impl MockClockController {
    pub fn current_time(&self) -> Instant {
        self.current_time.borrow().now
    }

    /// The instant `elapsed` after this clock was created. Handy for expressing lease deadlines.
    pub fn at(&self, elapsed: Duration) -> Instant {
        self.time_of_instantiation + elapsed
    }

    pub fn elapsed_time(&self) -> Duration {
        self.current_time() - self.time_of_instantiation
    }

    /// Advances both time domains by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.current_time.send_modify(|t| {
            t.now += duration;
            t.hybrid_time_micros += duration.as_micros() as u64;
        });
    }

    /// Moves coarse time to exactly `elapsed` past the origin. Time never goes backwards.
    pub fn set_elapsed(&self, elapsed: Duration) {
        let current = self.elapsed_time();
        assert!(elapsed >= current, "MockClock can't go backwards");
        self.advance(elapsed - current);
    }

    pub fn set_hybrid_time_micros(&self, micros: MicrosTime) {
        self.current_time.send_modify(|t| {
            assert!(micros >= t.hybrid_time_micros, "Hybrid time can't go backwards");
            t.hybrid_time_micros = micros;
        });
    }
}
