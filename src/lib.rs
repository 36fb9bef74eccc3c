//! Ambient sound mixing engine
//!
//! Plays multiple independent, looping ambient sound tracks simultaneously
//! with per-track and global volume control, click-free linear fades and a
//! session timer that drives the mixer lifecycle.
//!
//! # Architecture
//! - [`SoundCatalog`]: immutable list of track definitions
//! - [`TrackLoader`]: resolves one definition into a playable runtime,
//!   choosing a backend once per track and isolating failures
//! - [`MixerEngine`]: owns all track runtimes; play/pause/volume controls
//!   and fade scheduling
//! - [`TimerController`]: infinite/countdown state machine composed with
//!   the engine's play-all/pause-all
//! - [`MixerState`]/[`TimerState`]: read-only snapshots for a display layer
//!
//! # Crate feature flags
//! - `playback` (optional): real audio output via rodio (buffered and
//!   streaming backends). Without it only the mock backend is compiled,
//!   which is enough for the whole control plane and its tests.
//! - `cli` (optional): small interactive demo binary (implies `playback`).
//!
//! # Quick start
//! ```no_run
//! # #[cfg(feature = "playback")]
//! # fn main() -> ambimix::Result<()> {
//! use ambimix::{AudioOutput, MixerConfig, MixerEngine, SoundCatalog, TrackLoader};
//!
//! let output = AudioOutput::open_default()?;
//! let loader = TrackLoader::new(&output);
//! let engine = MixerEngine::new(MixerConfig::default())?;
//! engine.preload(&loader, &SoundCatalog::builtin());
//! engine.toggle(&"rain".into());
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "playback"))]
//! # fn main() {}
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod catalog;
pub mod engine;
pub mod events;
pub mod fade;
pub mod loader;
pub mod state;
pub mod timer;

#[cfg(feature = "playback")]
pub use backend::AudioOutput;
pub use backend::{BackendKind, MockCall, MockHandle, TrackBackend};
pub use catalog::{SoundCatalog, TrackDefinition, TrackId};
pub use engine::{MixerConfig, MixerEngine};
pub use events::{EngineEvent, EventBus};
pub use fade::FadeRamp;
pub use loader::{LoadState, TrackLoader, TrackRuntime, DEFAULT_LOAD_TIMEOUT};
pub use state::{LoadPhase, MixerState, TimerState, TrackState};
pub use timer::{TimerConfig, TimerController, TimerMode};

use std::time::Duration;

/// Errors raised while resolving a track definition into a playable runtime.
///
/// A load error never propagates past the track it belongs to: the loader
/// degrades the track to a failed runtime and siblings load on.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// The source could not be fetched or opened.
    #[error("failed to open source: {0}")]
    Open(String),

    /// The source was fetched but could not be decoded as audio.
    #[error("failed to decode source: {0}")]
    Decode(String),

    /// The bounded wait for the fallback path elapsed.
    #[error("load timed out after {0:?}")]
    Timeout(Duration),
}

/// Error types for mixer and timer operations.
#[derive(thiserror::Error, Debug)]
pub enum MixerError {
    /// Audio output device error.
    #[error("audio output error: {0}")]
    Output(String),

    /// Playback start/resume was rejected by the backend.
    #[error("playback error: {0}")]
    Playback(String),

    /// The timer's tick-scheduling primitive failed; the controller has
    /// forced itself to a not-running state.
    #[error("timer error: {0}")]
    Timer(String),

    /// A track failed to load.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// IO error from filesystem or device.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using [`MixerError`].
pub type Result<T> = std::result::Result<T, MixerError>;
