use std::cell::Cell;
use std::rc::Rc;

/// Monotonic tick source.
///
/// The tick unit is chosen by the embedder; an emulator would typically drive
/// this from the guest CPU's cycle counter. Tests inject a [`FakeClock`] to
/// step time deterministically.
pub trait TimeSource {
    fn now(&self) -> u64;
}

impl<T: TimeSource + ?Sized> TimeSource for Rc<T> {
    fn now(&self) -> u64 {
        (**self).now()
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct FakeClock {
    ticks: Cell<u64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ticks: u64) {
        self.ticks.set(self.ticks.get() + ticks);
    }

    pub fn set(&self, ticks: u64) {
        self.ticks.set(ticks);
    }
}

impl TimeSource for FakeClock {
    fn now(&self) -> u64 {
        self.ticks.get()
    }
}

/// Polled countdown timer.
///
/// `expired` compares the captured start tick against the caller-supplied
/// current time; nothing fires asynchronously.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    duration: u64,
    started: u64,
}

impl Timer {
    pub fn new(duration: u64) -> Self {
        Self {
            duration,
            started: 0,
        }
    }

    pub fn start(&mut self, now: u64) {
        self.started = now;
    }

    pub fn expired(&self, now: u64) -> bool {
        now.saturating_sub(self.started) >= self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_expires_after_duration() {
        let clock = FakeClock::new();
        let mut timer = Timer::new(100);
        timer.start(clock.now());
        assert!(!timer.expired(clock.now()));
        clock.advance(99);
        assert!(!timer.expired(clock.now()));
        clock.advance(1);
        assert!(timer.expired(clock.now()));
    }

    #[test]
    fn restart_rearms() {
        let clock = FakeClock::new();
        let mut timer = Timer::new(10);
        clock.advance(50);
        assert!(timer.expired(clock.now()));
        timer.start(clock.now());
        assert!(!timer.expired(clock.now()));
        clock.advance(10);
        assert!(timer.expired(clock.now()));
    }
}
