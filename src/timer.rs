//! Session timer
//!
//! [`TimerController`] composes with the [`MixerEngine`]: starting the
//! timer starts playback (`play_all`), pausing or expiring pauses it
//! (`pause_all`). In countdown mode a periodic tick decrements the
//! remaining time; in infinite mode the tick exists but never decrements.
//!
//! The tick loop runs on its own thread. Stops are enforced with a
//! generation counter checked under the same lock the tick mutates, so
//! once `pause`/`stop` returns no stale tick can act.

use crate::events::{EngineEvent, EventBus};
use crate::{MixerEngine, MixerError, Result, TimerState};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Shortest configurable duration (one minute).
pub const MIN_DURATION_SECS: u32 = 60;
/// Longest configurable duration (two hours).
pub const MAX_DURATION_SECS: u32 = 7200;
/// Default duration (25 minutes).
pub const DEFAULT_DURATION_SECS: u32 = 1500;

/// Timer mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerMode {
    /// Runs indefinitely; ticks never decrement.
    Infinite,
    /// Decrements to zero, then pauses playback.
    Countdown,
}

impl TimerMode {
    /// The other mode.
    pub fn toggled(self) -> Self {
        match self {
            TimerMode::Infinite => TimerMode::Countdown,
            TimerMode::Countdown => TimerMode::Infinite,
        }
    }
}

/// Timer tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct TimerConfig {
    /// Wall-clock interval of one tick. One tick always accounts for one
    /// second of timer time; tests shrink this to run countdowns fast.
    pub tick: Duration,
    /// Initial total duration in seconds, clamped to
    /// [`MIN_DURATION_SECS`, `MAX_DURATION_SECS`].
    pub initial_duration: u32,
    /// Initial mode.
    pub mode: TimerMode,
}

impl Default for TimerConfig {
    fn default() -> Self {
        TimerConfig {
            tick: Duration::from_secs(1),
            initial_duration: DEFAULT_DURATION_SECS,
            mode: TimerMode::Infinite,
        }
    }
}

struct TimerShared {
    mode: TimerMode,
    total_seconds: u32,
    remaining_seconds: u32,
    running: bool,
    /// Bumped on every start/pause/stop; a tick thread acts only while
    /// its generation is current.
    generation: u64,
}

/// Infinite/countdown timer driving the mixer lifecycle.
pub struct TimerController {
    shared: Arc<Mutex<TimerShared>>,
    engine: Arc<MixerEngine>,
    events: EventBus,
    tick: Duration,
}

impl TimerController {
    /// Create a timer bound to `engine`.
    pub fn new(engine: Arc<MixerEngine>, config: TimerConfig) -> Self {
        let total = config
            .initial_duration
            .clamp(MIN_DURATION_SECS, MAX_DURATION_SECS);
        let events = engine.events();
        TimerController {
            shared: Arc::new(Mutex::new(TimerShared {
                mode: config.mode,
                total_seconds: total,
                remaining_seconds: total,
                running: false,
                generation: 0,
            })),
            engine,
            events,
            tick: config.tick,
        }
    }

    /// Set the total duration in seconds, clamped to
    /// [`MIN_DURATION_SECS`, `MAX_DURATION_SECS`]. Out-of-range input is
    /// clamped, never rejected. Remaining time resets to the new total.
    pub fn set_duration(&self, total_seconds: u32) {
        let clamped = total_seconds.clamp(MIN_DURATION_SECS, MAX_DURATION_SECS);
        let mut shared = self.shared.lock();
        shared.total_seconds = clamped;
        shared.remaining_seconds = clamped;
    }

    /// Set the duration as a percentage of the maximum (a dial position):
    /// `total = round(pct / 100 x 7200)`, then clamped as usual.
    pub fn set_duration_by_percentage(&self, percentage: f32) {
        let pct = percentage.clamp(0.0, 100.0);
        let total = (pct / 100.0 * MAX_DURATION_SECS as f32).round() as u32;
        self.set_duration(total);
    }

    /// Set the duration from a minute preset.
    pub fn set_preset_minutes(&self, minutes: u32) {
        self.set_duration(minutes.saturating_mul(60));
    }

    /// Swap infinite/countdown. Always performs an implicit stop and
    /// reset, discarding any in-progress countdown.
    pub fn toggle_mode(&self) {
        {
            let mut shared = self.shared.lock();
            shared.mode = shared.mode.toggled();
        }
        self.stop();
    }

    /// Begin (or resume) the run: starts the tick loop and all tracks.
    /// Idempotent while running. A run resumed at zero restarts from the
    /// full duration.
    ///
    /// If the tick thread cannot be spawned the controller forces itself
    /// back to not-running and reports the failure, rather than drifting
    /// from wall-clock time.
    pub fn start(&self) -> Result<()> {
        let generation = {
            let mut shared = self.shared.lock();
            if shared.running {
                return Ok(());
            }
            if shared.remaining_seconds == 0 {
                shared.remaining_seconds = shared.total_seconds;
            }
            shared.generation += 1;
            shared.running = true;
            shared.generation
        };

        self.engine.play_all();

        let shared = Arc::clone(&self.shared);
        let engine = Arc::clone(&self.engine);
        let events = self.events.clone();
        let tick = self.tick;
        let spawned = thread::Builder::new()
            .name("ambimix-timer".into())
            .spawn(move || tick_loop(shared, engine, events, tick, generation));

        if let Err(error) = spawned {
            {
                let mut shared = self.shared.lock();
                shared.running = false;
                shared.generation += 1;
            }
            self.engine.pause_all();
            log::error!("timer tick thread failed to start: {error}");
            return Err(MixerError::Timer(format!(
                "failed to start tick loop: {error}"
            )));
        }
        Ok(())
    }

    /// Halt the tick loop and pause all tracks; remaining time is kept
    /// for resume. No tick fires after this returns.
    pub fn pause(&self) {
        {
            let mut shared = self.shared.lock();
            if !shared.running {
                return;
            }
            shared.running = false;
            shared.generation += 1;
        }
        self.engine.pause_all();
    }

    /// Halt the tick loop, restore the remaining time to the full
    /// duration and pause all tracks. No tick fires after this returns.
    pub fn stop(&self) {
        {
            let mut shared = self.shared.lock();
            shared.running = false;
            shared.generation += 1;
            shared.remaining_seconds = shared.total_seconds;
        }
        self.engine.pause_all();
    }

    /// Alias of [`stop`](Self::stop).
    pub fn reset(&self) {
        self.stop();
    }

    /// Flip between running and paused.
    pub fn toggle_running(&self) -> Result<()> {
        if self.shared.lock().running {
            self.pause();
            Ok(())
        } else {
            self.start()
        }
    }

    /// Read-only snapshot for the display layer.
    pub fn snapshot(&self) -> TimerState {
        let shared = self.shared.lock();
        TimerState {
            mode: shared.mode,
            total_seconds: shared.total_seconds,
            remaining_seconds: shared.remaining_seconds,
            running: shared.running,
        }
    }
}

fn tick_loop(
    shared: Arc<Mutex<TimerShared>>,
    engine: Arc<MixerEngine>,
    events: EventBus,
    tick: Duration,
    generation: u64,
) {
    loop {
        thread::sleep(tick);
        let mut guard = shared.lock();
        if !guard.running || guard.generation != generation {
            // Superseded by a pause/stop/newer run; act on nothing.
            return;
        }
        if guard.mode == TimerMode::Infinite {
            continue;
        }
        guard.remaining_seconds = guard.remaining_seconds.saturating_sub(1);
        if guard.remaining_seconds == 0 {
            guard.running = false;
            guard.generation += 1;
            drop(guard);
            engine.pause_all();
            events.emit(EngineEvent::TimerFinished);
            log::info!("countdown finished");
            return;
        }
    }
}
