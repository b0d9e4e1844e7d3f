use std::time::{Duration, Instant};

/// Timing snapshot for one host frame.
#[derive(Debug, Copy, Clone)]
pub struct FrameTime {
    /// Clamped time since the previous tick.
    pub dt: Duration,

    /// Milliseconds since the clock was created, summed from clamped deltas.
    ///
    /// This is the value handed to `Engine::render`.
    pub elapsed_ms: f64,

    /// Monotonic frame counter.
    pub frame_index: u64,
}

/// Produces [`FrameTime`] snapshots for the host frame loop.
///
/// Deltas are clamped so a stalled loop (debugger, minimized window) does not
/// hand engines or the scheduler one enormous step.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Instant,
    elapsed: Duration,
    frame_index: u64,
    dt_min: Duration,
    dt_max: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::with_clamps(Duration::from_micros(100), Duration::from_millis(250))
    }

    /// Creates a clock with custom delta clamps.
    pub fn with_clamps(dt_min: Duration, dt_max: Duration) -> Self {
        debug_assert!(dt_min <= dt_max);
        Self {
            last: Instant::now(),
            elapsed: Duration::ZERO,
            frame_index: 0,
            dt_min,
            dt_max,
        }
    }

    /// Resets the delta baseline without touching the elapsed total.
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    /// Samples the wall clock and advances.
    pub fn tick(&mut self) -> FrameTime {
        let now = Instant::now();
        let raw = now.saturating_duration_since(self.last);
        self.last = now;
        self.step(raw)
    }

    /// Advances by an explicit delta instead of sampling the wall clock.
    ///
    /// Headless hosts and tests use this to run a deterministic loop.
    pub fn step(&mut self, raw: Duration) -> FrameTime {
        let dt = raw.clamp(self.dt_min, self.dt_max);
        self.elapsed += dt;

        let ft = FrameTime {
            dt,
            elapsed_ms: self.elapsed.as_secs_f64() * 1000.0,
            frame_index: self.frame_index,
        };

        self.frame_index = self.frame_index.wrapping_add(1);
        ft
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
