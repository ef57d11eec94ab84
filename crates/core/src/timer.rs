//! Frame timing.

use std::time::{Duration, Instant};

/// Measures frame deltas and total run time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Total time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Time since the previous `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts frames and reports the rate once per reporting window.
#[derive(Debug)]
pub struct FpsCounter {
    window: Duration,
    accumulated: Duration,
    frames: u32,
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            accumulated: Duration::ZERO,
            frames: 0,
        }
    }

    /// Adds one frame that took `delta`. Returns frames per second each time
    /// a full window has elapsed.
    pub fn frame(&mut self, delta: Duration) -> Option<f64> {
        self.frames += 1;
        self.accumulated += delta;
        if self.accumulated < self.window {
            return None;
        }
        let fps = f64::from(self.frames) / self.accumulated.as_secs_f64();
        self.frames = 0;
        self.accumulated = Duration::ZERO;
        Some(fps)
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_is_monotonic() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(2));
        assert!(timer.tick() >= Duration::from_millis(2));
        assert!(timer.elapsed() >= Duration::from_millis(2));
    }

    #[test]
    fn test_fps_reported_once_per_window() {
        let mut fps = FpsCounter::new(Duration::from_secs(1));
        for _ in 0..59 {
            assert_eq!(fps.frame(Duration::from_micros(16_000)), None);
        }
        let rate = fps.frame(Duration::from_micros(56_000)).unwrap();
        assert!((rate - 60.0).abs() < 1e-9);

        // The window restarts after a report.
        assert_eq!(fps.frame(Duration::from_millis(10)), None);
    }
}
