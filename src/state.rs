//! State snapshots
//!
//! Read-only value snapshots of mixer and timer state for the display
//! layer. Snapshots are plain serializable data; mutating them has no
//! effect on the engine.

use crate::timer::TimerMode;
use crate::{BackendKind, TrackId};
use serde::Serialize;

/// Simplified load lifecycle tag exposed to the display layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPhase {
    /// Load has not completed yet.
    Pending,
    /// Track is playable.
    Ready,
    /// Track failed to load; its controls should render disabled.
    Failed,
}

/// Snapshot of one track.
#[derive(Debug, Clone, Serialize)]
pub struct TrackState {
    /// Track id.
    pub id: TrackId,
    /// Display name from the catalog.
    pub display_name: String,
    /// Backend variant chosen at load time.
    pub backend: BackendKind,
    /// Load lifecycle tag.
    pub phase: LoadPhase,
    /// Failure cause when `phase` is failed.
    pub failure: Option<String>,
    /// Logical playing flag.
    pub is_playing: bool,
    /// Track volume in `[0, 1]`.
    pub volume: f32,
    /// Gain currently rendered (mid-fade values included).
    pub rendered_gain: f32,
}

/// Snapshot of the whole mixer.
#[derive(Debug, Clone, Serialize)]
pub struct MixerState {
    /// Per-track snapshots in catalog order.
    pub tracks: Vec<TrackState>,
    /// Global volume in `[0, 1]`.
    pub global_volume: f32,
    /// Whether any track is playing.
    pub any_playing: bool,
    /// Number of playing tracks.
    pub active_count: usize,
    /// Aggregate error message, if any.
    pub error: Option<String>,
}

impl MixerState {
    /// Ids of the playing tracks, in catalog order.
    pub fn playing_ids(&self) -> Vec<&TrackId> {
        self.tracks
            .iter()
            .filter(|t| t.is_playing)
            .map(|t| &t.id)
            .collect()
    }
}

/// Snapshot of the timer.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TimerState {
    /// Current mode.
    pub mode: TimerMode,
    /// Configured total duration in seconds.
    pub total_seconds: u32,
    /// Seconds remaining in the current run.
    pub remaining_seconds: u32,
    /// Whether the tick loop is running.
    pub running: bool,
}

impl TimerState {
    /// Progress in percent: always 100 in infinite mode, otherwise
    /// remaining over total.
    pub fn progress_percentage(&self) -> f32 {
        match self.mode {
            TimerMode::Infinite => 100.0,
            TimerMode::Countdown => {
                if self.total_seconds == 0 {
                    0.0
                } else {
                    self.remaining_seconds as f32 / self.total_seconds as f32 * 100.0
                }
            }
        }
    }

    /// Remaining time as a clock string.
    pub fn formatted_remaining(&self) -> String {
        format_clock(self.remaining_seconds)
    }

    /// Total duration as a clock string.
    pub fn formatted_total(&self) -> String {
        format_clock(self.total_seconds)
    }
}

/// Format whole seconds as `MM:SS`, or `H:MM:SS` from one hour up.
pub fn format_clock(total_seconds: u32) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_formatting() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(90), "01:30");
        assert_eq!(format_clock(1500), "25:00");
        assert_eq!(format_clock(3661), "1:01:01");
        assert_eq!(format_clock(7200), "2:00:00");
    }

    #[test]
    fn progress_is_always_full_in_infinite_mode() {
        let state = TimerState {
            mode: TimerMode::Infinite,
            total_seconds: 1500,
            remaining_seconds: 10,
            running: true,
        };
        assert_eq!(state.progress_percentage(), 100.0);
    }

    #[test]
    fn progress_tracks_remaining_in_countdown_mode() {
        let state = TimerState {
            mode: TimerMode::Countdown,
            total_seconds: 200,
            remaining_seconds: 50,
            running: true,
        };
        assert_eq!(state.progress_percentage(), 25.0);
    }
}
