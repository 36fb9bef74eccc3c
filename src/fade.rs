//! Linear gain ramps
//!
//! A [`FadeRamp`] describes one linear gain transition evaluated against a
//! monotonic clock. Ramps are pure values; the engine's scheduler samples
//! them and writes the resulting gain to the backend. Replacing a track's
//! ramp is how an in-flight fade is cancelled; ramps never stack.

use std::time::{Duration, Instant};

/// Default fade duration for start/stop transitions.
pub const DEFAULT_FADE: Duration = Duration::from_millis(300);

/// One linear gain ramp.
#[derive(Debug, Clone, Copy)]
pub struct FadeRamp {
    from: f32,
    to: f32,
    started: Instant,
    duration: Duration,
    /// Stop the underlying source once the ramp completes (fade-out).
    pub then_stop: bool,
}

impl FadeRamp {
    /// Create a ramp starting now. Endpoints are clamped to `[0, 1]`.
    pub fn new(from: f32, to: f32, duration: Duration, then_stop: bool) -> Self {
        FadeRamp {
            from: from.clamp(0.0, 1.0),
            to: to.clamp(0.0, 1.0),
            started: Instant::now(),
            duration,
            then_stop,
        }
    }

    /// Target gain at the end of the ramp.
    pub fn target(&self) -> f32 {
        self.to
    }

    /// Instantaneous gain at `now`, linearly interpolated and clamped to
    /// the ramp endpoints.
    pub fn value_at(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return self.to;
        }
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed >= self.duration {
            return self.to;
        }
        let t = elapsed.as_secs_f32() / self.duration.as_secs_f32();
        self.from + (self.to - self.from) * t
    }

    /// Whether the ramp has reached its target at `now`.
    pub fn is_complete(&self, now: Instant) -> bool {
        self.duration.is_zero() || now.saturating_duration_since(self.started) >= self.duration
    }

    /// Re-aim an in-flight ramp at a new target without restarting it:
    /// the replacement starts from the instantaneous gain at `now` and
    /// keeps the remaining duration and stop behavior.
    pub fn retarget(&self, now: Instant, new_to: f32) -> FadeRamp {
        let elapsed = now.saturating_duration_since(self.started);
        let remaining = self.duration.saturating_sub(elapsed);
        FadeRamp {
            from: self.value_at(now),
            to: new_to.clamp(0.0, 1.0),
            started: now,
            duration: remaining,
            then_stop: self.then_stop,
        }
    }
}
