use std::cell::Cell;
use std::time::Instant;

/// Source of monotonic time in microseconds.
pub trait Clock {
    fn now_micros(&self) -> u64;
}

/// Wall clock backed by [`Instant`], counting from construction.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_micros(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Virtual clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new(start_micros: u64) -> Self {
        Self {
            now: Cell::new(start_micros),
        }
    }

    /// Moves the clock to `micros`. Going backwards is ignored.
    pub fn set(&self, micros: u64) {
        if micros > self.now.get() {
            self.now.set(micros);
        }
    }

    pub fn advance(&self, micros: u64) {
        self.now.set(self.now.get().saturating_add(micros));
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u64 {
        self.now.get()
    }
}
