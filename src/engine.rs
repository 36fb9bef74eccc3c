//! Mixer engine
//!
//! [`MixerEngine`] owns every track runtime and is the only writer of
//! gain state. User operations take effect under one lock and a
//! background scheduler thread steps the active fade ramps against the
//! monotonic clock, so all gain mutations for a tick land as one
//! consistent batch.
//!
//! Start/stop transitions always fade (linear, default 0.3 s). Volume
//! changes on already-playing tracks apply instantly. Re-toggling a track
//! whose fade is still in flight replaces the ramp, starting from the
//! instantaneous gain found at cancellation; ramps never stack.

use crate::events::{EngineEvent, EventBus};
use crate::fade::{FadeRamp, DEFAULT_FADE};
use crate::loader::{LoadState, TrackLoader, TrackRuntime};
use crate::state::{LoadPhase, MixerState, TrackState};
use crate::{BackendKind, Result, SoundCatalog, TrackId};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Engine tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct MixerConfig {
    /// Fade duration for start/stop transitions.
    pub fade: Duration,
    /// Scheduler step interval for ramp evaluation and loop re-trigger.
    pub scheduler_interval: Duration,
    /// Initial global volume.
    pub global_volume: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        MixerConfig {
            fade: DEFAULT_FADE,
            scheduler_interval: Duration::from_millis(15),
            global_volume: 0.7,
        }
    }
}

/// One owned track plus its scheduling state.
struct TrackSlot {
    runtime: TrackRuntime,
    /// Active fade, if any. Replacing it cancels the previous one.
    ramp: Option<FadeRamp>,
    /// Whether the backend source is actually emitting audio. Lags
    /// `runtime.is_playing` on the way down: the physical stop happens
    /// when the fade-out completes.
    source_active: bool,
}

impl TrackSlot {
    fn effective_gain(&self, global: f32) -> f32 {
        (self.runtime.volume * global).clamp(0.0, 1.0)
    }

    /// Gain currently being rendered: the in-flight ramp value if one is
    /// active, the steady effective gain otherwise.
    fn rendered_gain(&self, global: f32, now: Instant) -> f32 {
        match &self.ramp {
            Some(ramp) => ramp.value_at(now),
            None if self.source_active => self.effective_gain(global),
            None => 0.0,
        }
    }
}

struct EngineShared {
    tracks: Vec<TrackSlot>,
    global_volume: f32,
    /// Aggregate, display-facing error message.
    error: Option<String>,
    closed: bool,
}

/// Concurrent ambient mixer. Construct one instance and share it by
/// reference ([`Arc`]); all methods take `&self`.
pub struct MixerEngine {
    shared: Arc<Mutex<EngineShared>>,
    events: EventBus,
    config: MixerConfig,
    shutdown: Arc<AtomicBool>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl MixerEngine {
    /// Create an engine and start its fade scheduler.
    pub fn new(config: MixerConfig) -> Result<Self> {
        let shared = Arc::new(Mutex::new(EngineShared {
            tracks: Vec::new(),
            global_volume: config.global_volume.clamp(0.0, 1.0),
            error: None,
            closed: false,
        }));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_shared = Arc::clone(&shared);
        let thread_shutdown = Arc::clone(&shutdown);
        let interval = config.scheduler_interval;
        let scheduler = thread::Builder::new()
            .name("ambimix-fades".into())
            .spawn(move || {
                while !thread_shutdown.load(Ordering::Relaxed) {
                    step_schedule(&thread_shared);
                    thread::park_timeout(interval);
                }
            })?;

        Ok(MixerEngine {
            shared,
            events: EventBus::new(),
            config,
            shutdown,
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    /// The event bus shared with collaborators such as the timer.
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Run the preload pass: resolve every catalog definition through the
    /// loader and install the runtimes in catalog order. Emits a
    /// `LoadFailed` event per failed track; if every track failed, the
    /// aggregate error flag is set as well.
    pub fn preload(&self, loader: &TrackLoader, catalog: &SoundCatalog) {
        let runtimes = loader.load_all(catalog);

        let mut failed = 0usize;
        for runtime in &runtimes {
            if let LoadState::Failed(error) = &runtime.load_state {
                failed += 1;
                self.events.emit(EngineEvent::LoadFailed {
                    id: runtime.definition.id.clone(),
                    reason: error.to_string(),
                });
            }
        }

        let mut shared = self.shared.lock();
        if shared.closed {
            log::warn!("preload after cleanup ignored");
            return;
        }
        if !runtimes.is_empty() && failed == runtimes.len() {
            shared.error = Some("all tracks failed to load".into());
        }
        shared.tracks = runtimes
            .into_iter()
            .map(|runtime| TrackSlot {
                runtime,
                ramp: None,
                source_active: false,
            })
            .collect();
    }

    /// Flip one track between playing and stopped.
    ///
    /// Starting fades the gain from the current value up to
    /// `track volume x global volume`; stopping fades down to zero and
    /// only then pauses and rewinds the source. Toggling a failed track
    /// is a no-op that sets the aggregate error flag.
    pub fn toggle(&self, id: &TrackId) {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        if shared.closed {
            return;
        }
        let global = shared.global_volume;
        let Some(slot) = shared.tracks.iter_mut().find(|s| &s.runtime.definition.id == id)
        else {
            log::warn!("toggle of unknown track {id}");
            return;
        };

        match &slot.runtime.load_state {
            LoadState::Failed(error) => {
                shared.error = Some(format!("{id}: {error}"));
                return;
            }
            LoadState::Pending => {
                log::debug!("toggle of still-loading track {id} ignored");
                return;
            }
            LoadState::Ready => {}
        }

        let now = Instant::now();
        if slot.runtime.is_playing {
            stop_slot(slot, global, self.config.fade, now);
        } else if let Some(error) = start_slot(slot, global, self.config.fade, now) {
            shared.error = Some(error);
        }
    }

    /// Set one track's volume, clamped to `[0, 1]`.
    ///
    /// If the track is playing its rendered gain updates instantly (no
    /// re-fade); an in-flight start fade is retargeted instead.
    pub fn set_track_volume(&self, id: &TrackId, volume: f32) {
        let mut shared = self.shared.lock();
        if shared.closed {
            return;
        }
        let global = shared.global_volume;
        let Some(slot) = shared.tracks.iter_mut().find(|s| &s.runtime.definition.id == id)
        else {
            log::warn!("volume change for unknown track {id}");
            return;
        };
        slot.runtime.volume = volume.clamp(0.0, 1.0);
        apply_volume_now(slot, global);
    }

    /// Set the global volume, clamped to `[0, 1]`; every playing track's
    /// rendered gain updates instantly.
    pub fn set_global_volume(&self, volume: f32) {
        let mut shared = self.shared.lock();
        if shared.closed {
            return;
        }
        shared.global_volume = volume.clamp(0.0, 1.0);
        let global = shared.global_volume;
        for slot in &mut shared.tracks {
            apply_volume_now(slot, global);
        }
    }

    /// Restore every track to its catalog default volume and the global
    /// volume to the configured initial value.
    pub fn reset_volumes(&self) {
        let mut shared = self.shared.lock();
        if shared.closed {
            return;
        }
        shared.global_volume = self.config.global_volume.clamp(0.0, 1.0);
        let global = shared.global_volume;
        for slot in &mut shared.tracks {
            slot.runtime.volume = slot.runtime.definition.default_volume;
            apply_volume_now(slot, global);
        }
    }

    /// Start every ready track that is not already playing. Idempotent.
    pub fn play_all(&self) {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        if shared.closed {
            return;
        }
        let global = shared.global_volume;
        let now = Instant::now();
        let mut first_error = None;
        for slot in &mut shared.tracks {
            if slot.runtime.load_state.is_ready() && !slot.runtime.is_playing {
                if let Some(error) = start_slot(slot, global, self.config.fade, now) {
                    first_error.get_or_insert(error);
                }
            }
        }
        if let Some(error) = first_error {
            shared.error = Some(error);
        }
    }

    /// Fade out and stop every playing track. Idempotent.
    pub fn pause_all(&self) {
        let mut shared = self.shared.lock();
        if shared.closed {
            return;
        }
        let global = shared.global_volume;
        let now = Instant::now();
        for slot in &mut shared.tracks {
            if slot.runtime.is_playing {
                stop_slot(slot, global, self.config.fade, now);
            }
        }
    }

    /// Clear the aggregate error flag.
    pub fn clear_error(&self) {
        self.shared.lock().error = None;
    }

    /// Read-only snapshot for the display layer.
    pub fn snapshot(&self) -> MixerState {
        let shared = self.shared.lock();
        let now = Instant::now();
        let tracks: Vec<TrackState> = shared
            .tracks
            .iter()
            .map(|slot| {
                let (phase, failure) = match &slot.runtime.load_state {
                    LoadState::Pending => (LoadPhase::Pending, None),
                    LoadState::Ready => (LoadPhase::Ready, None),
                    LoadState::Failed(e) => (LoadPhase::Failed, Some(e.to_string())),
                };
                TrackState {
                    id: slot.runtime.definition.id.clone(),
                    display_name: slot.runtime.definition.display_name.clone(),
                    backend: slot.runtime.backend.kind(),
                    phase,
                    failure,
                    is_playing: slot.runtime.is_playing,
                    volume: slot.runtime.volume,
                    rendered_gain: slot.rendered_gain(shared.global_volume, now),
                }
            })
            .collect();
        let any_playing = tracks.iter().any(|t| t.is_playing);
        let active_count = tracks.iter().filter(|t| t.is_playing).count();
        MixerState {
            tracks,
            global_volume: shared.global_volume,
            any_playing,
            active_count,
            error: shared.error.clone(),
        }
    }

    /// Backend variant chosen for `id` at load time.
    pub fn backend_kind(&self, id: &TrackId) -> Option<BackendKind> {
        self.shared
            .lock()
            .tracks
            .iter()
            .find(|s| &s.runtime.definition.id == id)
            .map(|s| s.runtime.backend.kind())
    }

    /// Stop every track immediately (no fade), cancel in-flight fades and
    /// release backend resources. The engine is unusable afterwards; a
    /// new instance must be constructed to play again.
    pub fn cleanup(&self) {
        self.stop_scheduler();
        let mut shared = self.shared.lock();
        for slot in &mut shared.tracks {
            slot.ramp = None;
            slot.runtime.is_playing = false;
            if slot.source_active {
                slot.runtime.backend.stop();
                slot.source_active = false;
            }
        }
        shared.tracks.clear();
        shared.closed = true;
        log::info!("mixer engine cleaned up");
    }

    fn stop_scheduler(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.scheduler.lock().take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for MixerEngine {
    fn drop(&mut self) {
        self.stop_scheduler();
    }
}

/// Begin a fade-in, starting the source if it is not already emitting.
/// Returns an error message if the backend rejected the start.
fn start_slot(
    slot: &mut TrackSlot,
    global: f32,
    fade: Duration,
    now: Instant,
) -> Option<String> {
    // Cancelling a pending fade-out resumes from its instantaneous gain.
    let from = slot
        .ramp
        .as_ref()
        .map(|r| r.value_at(now))
        .unwrap_or(0.0);

    if !slot.source_active {
        slot.runtime.backend.set_volume(0.0);
        if let Err(error) = slot.runtime.backend.play() {
            log::warn!(
                "playback rejected for {}: {error}",
                slot.runtime.definition.id
            );
            slot.ramp = None;
            return Some(error.to_string());
        }
        slot.source_active = true;
    }

    slot.runtime.is_playing = true;
    slot.runtime.backend.set_volume(from);
    slot.ramp = Some(FadeRamp::new(
        from,
        slot.effective_gain(global),
        fade,
        false,
    ));
    None
}

/// Begin a fade-out; the source is stopped when the ramp completes.
fn stop_slot(slot: &mut TrackSlot, global: f32, fade: Duration, now: Instant) {
    let current = slot.rendered_gain(global, now);
    slot.runtime.is_playing = false;
    slot.ramp = Some(FadeRamp::new(current, 0.0, fade, true));
}

/// Instant-apply a volume change to a playing track. An in-flight start
/// fade is retargeted at the new effective gain; a pending fade-out keeps
/// its zero target.
fn apply_volume_now(slot: &mut TrackSlot, global: f32) {
    if !slot.runtime.is_playing {
        return;
    }
    let effective = slot.effective_gain(global);
    match &slot.ramp {
        Some(ramp) if !ramp.then_stop => {
            slot.ramp = Some(ramp.retarget(Instant::now(), effective));
        }
        Some(_) => {}
        None => slot.runtime.backend.set_volume(effective),
    }
}

/// One scheduler step: evaluate active ramps, perform deferred stops and
/// re-trigger finished non-gapless loops.
fn step_schedule(shared: &Mutex<EngineShared>) {
    let now = Instant::now();
    let mut shared = shared.lock();
    if shared.closed {
        return;
    }
    let global = shared.global_volume;
    for slot in &mut shared.tracks {
        if let Some(ramp) = slot.ramp {
            slot.runtime.backend.set_volume(ramp.value_at(now));
            if ramp.is_complete(now) {
                if ramp.then_stop {
                    slot.runtime.backend.stop();
                    slot.source_active = false;
                }
                slot.ramp = None;
            }
        }

        // Best-effort loop for backends without gapless looping.
        if slot.source_active
            && slot.runtime.is_playing
            && slot.runtime.backend.is_finished()
        {
            log::debug!("re-triggering loop for {}", slot.runtime.definition.id);
            match slot.runtime.backend.play() {
                Ok(()) => slot
                    .runtime
                    .backend
                    .set_volume(slot.rendered_gain(global, now)),
                Err(error) => log::warn!(
                    "loop re-trigger failed for {}: {error}",
                    slot.runtime.definition.id
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockCall;
    use approx::assert_relative_eq;

    fn fast_config() -> MixerConfig {
        MixerConfig {
            fade: Duration::from_millis(40),
            scheduler_interval: Duration::from_millis(5),
            global_volume: 0.7,
        }
    }

    fn engine_with_builtin(loader: &TrackLoader) -> MixerEngine {
        let engine = MixerEngine::new(fast_config()).unwrap();
        engine.preload(loader, &SoundCatalog::builtin());
        engine
    }

    fn wait_for_fades() {
        thread::sleep(Duration::from_millis(80));
    }

    #[test]
    fn toggle_starts_and_fades_to_effective_gain() {
        let loader = TrackLoader::mock();
        let engine = engine_with_builtin(&loader);
        let rain: TrackId = "rain".into();

        engine.toggle(&rain);
        let state = engine.snapshot();
        assert!(state.any_playing);
        assert_eq!(state.active_count, 1);

        wait_for_fades();
        let handle = loader.mock_handle(&rain).unwrap();
        // rain default volume 0.6 x global 0.7
        assert_relative_eq!(handle.gain(), 0.42, epsilon = 1e-5);
        assert_eq!(handle.count(&MockCall::Play), 1);
    }

    #[test]
    fn toggle_stop_pauses_source_only_after_fade() {
        let loader = TrackLoader::mock();
        // Generous fade so the mid-fade assertions cannot race it.
        let engine = MixerEngine::new(MixerConfig {
            fade: Duration::from_millis(250),
            scheduler_interval: Duration::from_millis(5),
            global_volume: 0.7,
        })
        .unwrap();
        engine.preload(&loader, &SoundCatalog::builtin());
        let rain: TrackId = "rain".into();
        let handle = loader.mock_handle(&rain).unwrap();

        engine.toggle(&rain);
        thread::sleep(Duration::from_millis(300));
        engine.toggle(&rain);

        // Logical state flips immediately; the stop is deferred.
        assert!(!engine.snapshot().any_playing);
        assert_eq!(handle.count(&MockCall::Stop), 0);

        thread::sleep(Duration::from_millis(350));
        assert_eq!(handle.count(&MockCall::Stop), 1);
        assert_relative_eq!(handle.gain(), 0.0);
    }

    #[test]
    fn retoggle_during_fade_out_cancels_and_fades_back_in() {
        let loader = TrackLoader::mock();
        let engine = MixerEngine::new(MixerConfig {
            fade: Duration::from_millis(250),
            scheduler_interval: Duration::from_millis(5),
            global_volume: 0.7,
        })
        .unwrap();
        engine.preload(&loader, &SoundCatalog::builtin());
        let rain: TrackId = "rain".into();
        let handle = loader.mock_handle(&rain).unwrap();

        engine.toggle(&rain);
        thread::sleep(Duration::from_millis(300));
        engine.toggle(&rain); // begin fade-out
        thread::sleep(Duration::from_millis(50));
        engine.toggle(&rain); // cancel, fade back in

        thread::sleep(Duration::from_millis(350));
        // The pending stop never fired and playback recovered fully.
        assert_eq!(handle.count(&MockCall::Stop), 0);
        assert_eq!(handle.count(&MockCall::Play), 1);
        assert!(engine.snapshot().any_playing);
        assert_relative_eq!(handle.gain(), 0.42, epsilon = 1e-5);
    }

    #[test]
    fn global_volume_applies_instantly_to_playing_tracks() {
        let loader = TrackLoader::mock();
        let engine = engine_with_builtin(&loader);
        engine.toggle(&"rain".into());
        engine.toggle(&"waves".into());
        wait_for_fades();

        engine.set_global_volume(0.2);
        // No scheduler round needed: gains are written under the same lock.
        let rain = loader.mock_handle(&"rain".into()).unwrap();
        let waves = loader.mock_handle(&"waves".into()).unwrap();
        assert_relative_eq!(rain.gain(), 0.6 * 0.2, epsilon = 1e-5);
        assert_relative_eq!(waves.gain(), 0.5 * 0.2, epsilon = 1e-5);
        // Still playing, no restart.
        assert_eq!(rain.count(&MockCall::Play), 1);
        assert_eq!(rain.count(&MockCall::Stop), 0);
    }

    #[test]
    fn track_volume_change_on_stopped_track_does_not_touch_backend() {
        let loader = TrackLoader::mock();
        let engine = engine_with_builtin(&loader);
        let rain: TrackId = "rain".into();
        engine.set_track_volume(&rain, 0.9);
        let handle = loader.mock_handle(&rain).unwrap();
        assert!(handle.calls().is_empty());
        let state = engine.snapshot();
        assert_relative_eq!(state.tracks[0].volume, 0.9);
    }

    #[test]
    fn volumes_are_clamped() {
        let loader = TrackLoader::mock();
        let engine = engine_with_builtin(&loader);
        engine.set_track_volume(&"rain".into(), 4.2);
        engine.set_global_volume(-1.0);
        let state = engine.snapshot();
        assert_relative_eq!(state.tracks[0].volume, 1.0);
        assert_relative_eq!(state.global_volume, 0.0);
    }

    #[test]
    fn play_all_is_idempotent() {
        let loader = TrackLoader::mock();
        let engine = engine_with_builtin(&loader);
        engine.play_all();
        let first = engine.snapshot();
        engine.play_all();
        let second = engine.snapshot();
        assert_eq!(first.active_count, 6);
        assert_eq!(second.active_count, 6);
        wait_for_fades();
        let rain = loader.mock_handle(&"rain".into()).unwrap();
        assert_eq!(rain.count(&MockCall::Play), 1);
    }

    #[test]
    fn pause_all_twice_produces_single_stop() {
        let loader = TrackLoader::mock();
        let engine = engine_with_builtin(&loader);
        engine.play_all();
        wait_for_fades();
        engine.pause_all();
        engine.pause_all();
        wait_for_fades();
        let rain = loader.mock_handle(&"rain".into()).unwrap();
        assert_eq!(rain.count(&MockCall::Stop), 1);
        assert!(!engine.snapshot().any_playing);
    }

    #[test]
    fn toggling_failed_track_is_noop_with_error_flag() {
        let loader = TrackLoader::mock_failing(["stream".into()]);
        let engine = engine_with_builtin(&loader);
        engine.toggle(&"stream".into());
        let state = engine.snapshot();
        assert!(!state.any_playing);
        assert!(state.error.is_some());
        assert_eq!(state.tracks[2].phase, LoadPhase::Failed);
    }

    #[test]
    fn rejected_playback_is_contained_to_its_track() {
        let loader = TrackLoader::mock_rejecting_play(["wind".into()]);
        let engine = engine_with_builtin(&loader);
        engine.play_all();
        let state = engine.snapshot();
        assert_eq!(state.active_count, 5);
        assert!(state.error.is_some());
        let wind = state.tracks.iter().find(|t| t.id.as_str() == "wind").unwrap();
        assert!(!wind.is_playing);
    }

    #[test]
    fn cleanup_stops_everything_and_closes_the_engine() {
        let loader = TrackLoader::mock();
        let engine = engine_with_builtin(&loader);
        engine.play_all();
        wait_for_fades();
        engine.cleanup();

        let rain = loader.mock_handle(&"rain".into()).unwrap();
        assert_eq!(rain.count(&MockCall::Stop), 1);
        assert!(engine.snapshot().tracks.is_empty());

        // Closed engine ignores further operations.
        engine.toggle(&"rain".into());
        engine.play_all();
        assert!(!engine.snapshot().any_playing);
    }

    #[test]
    fn playing_implies_ready_at_all_times() {
        let loader = TrackLoader::mock_failing(["thunder".into(), "wind".into()]);
        let engine = engine_with_builtin(&loader);
        engine.play_all();
        for track in engine.snapshot().tracks {
            if track.is_playing {
                assert_eq!(track.phase, LoadPhase::Ready);
            }
        }
    }

    #[test]
    fn reset_volumes_restores_catalog_defaults() {
        let loader = TrackLoader::mock();
        let engine = engine_with_builtin(&loader);
        engine.set_track_volume(&"rain".into(), 0.1);
        engine.set_global_volume(0.3);
        engine.reset_volumes();
        let state = engine.snapshot();
        assert_relative_eq!(state.tracks[0].volume, 0.6);
        assert_relative_eq!(state.global_volume, 0.7);
    }
}
