//! Playback backends
//!
//! Every loaded track is driven through exactly one [`TrackBackend`]
//! variant, chosen at load time and never re-selected:
//!
//! - `Buffered`: the source is decoded fully into memory and looped
//!   gaplessly by the output queue (the preferred path).
//! - `Streaming`: the source is decoded incrementally while playing; the
//!   engine re-triggers it from position zero when it runs out, which is
//!   best-effort rather than sample-accurate.
//! - `Mock`: records every call; always compiled, used by the tests and
//!   by inert failed-track runtimes.
//!
//! The rest of the system may only depend on the `play`/`stop`/
//! `set_volume` capability surface exposed here. No other component
//! touches output sinks directly.

use crate::Result;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "playback")]
use crate::MixerError;
#[cfg(feature = "playback")]
use rodio::{buffer::SamplesBuffer, Decoder, OutputStream, OutputStreamHandle, Sink, Source};
#[cfg(feature = "playback")]
use std::{fs::File, io::BufReader, path::PathBuf};

/// Which backend variant is driving a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Decoded-into-buffer path with native gapless looping.
    Buffered,
    /// Incremental-decode path, looped by re-trigger.
    Streaming,
    /// Call-recording stand-in.
    Mock,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Buffered => "buffered",
            BackendKind::Streaming => "streaming",
            BackendKind::Mock => "mock",
        };
        f.write_str(name)
    }
}

/// The connection to the system audio device.
///
/// Owns the rodio output stream; sinks are created from its handle. Keep
/// this alive for as long as any track plays.
#[cfg(feature = "playback")]
pub struct AudioOutput {
    _stream: OutputStream,
    handle: OutputStreamHandle,
}

#[cfg(feature = "playback")]
impl AudioOutput {
    /// Open the default output device.
    pub fn open_default() -> Result<Self> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| MixerError::Output(format!("failed to open output stream: {e}")))?;
        log::info!("audio output opened");
        Ok(AudioOutput {
            _stream: stream,
            handle,
        })
    }

    pub(crate) fn handle(&self) -> OutputStreamHandle {
        self.handle.clone()
    }
}

/// Fully decoded track audio, ready to be queued on a sink.
#[cfg(feature = "playback")]
#[derive(Clone)]
pub(crate) struct DecodedAudio {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Arc<Vec<f32>>,
}

#[cfg(feature = "playback")]
impl DecodedAudio {
    fn to_source(&self) -> SamplesBuffer<f32> {
        SamplesBuffer::new(self.channels, self.sample_rate, self.samples.as_ref().clone())
    }
}

/// Buffered backend: whole source in memory, gapless loop via
/// `repeat_infinite`.
///
/// The sink is rebuilt on every start so a stop is always a true rewind.
#[cfg(feature = "playback")]
pub struct BufferedHandle {
    handle: OutputStreamHandle,
    sink: Mutex<Option<Sink>>,
    audio: DecodedAudio,
    gain: Mutex<f32>,
}

#[cfg(feature = "playback")]
impl BufferedHandle {
    pub(crate) fn new(handle: OutputStreamHandle, audio: DecodedAudio) -> Self {
        BufferedHandle {
            handle,
            sink: Mutex::new(None),
            audio,
            gain: Mutex::new(0.0),
        }
    }

    fn play(&self) -> Result<()> {
        let mut slot = self.sink.lock();
        if slot.is_some() {
            return Ok(());
        }
        let sink = Sink::try_new(&self.handle)
            .map_err(|e| MixerError::Playback(format!("failed to create sink: {e}")))?;
        sink.set_volume(*self.gain.lock());
        sink.append(self.audio.to_source().repeat_infinite());
        *slot = Some(sink);
        Ok(())
    }

    fn stop(&self) {
        // Dropping the sink stops and rewinds; the next play starts fresh.
        self.sink.lock().take();
    }

    fn set_volume(&self, gain: f32) {
        *self.gain.lock() = gain;
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.set_volume(gain);
        }
    }
}

/// Streaming backend: incremental decode, re-triggered on end-of-media.
#[cfg(feature = "playback")]
pub struct StreamingHandle {
    handle: OutputStreamHandle,
    sink: Mutex<Option<Sink>>,
    path: PathBuf,
    gain: Mutex<f32>,
}

#[cfg(feature = "playback")]
impl StreamingHandle {
    pub(crate) fn new(handle: OutputStreamHandle, path: PathBuf) -> Self {
        StreamingHandle {
            handle,
            sink: Mutex::new(None),
            path,
            gain: Mutex::new(0.0),
        }
    }

    fn play(&self) -> Result<()> {
        let mut slot = self.sink.lock();
        if let Some(sink) = slot.as_ref() {
            if !sink.empty() {
                return Ok(());
            }
        }
        let file = File::open(&self.path)
            .map_err(|e| MixerError::Playback(format!("failed to reopen source: {e}")))?;
        let decoder = Decoder::new(BufReader::new(file))
            .map_err(|e| MixerError::Playback(format!("failed to decode source: {e}")))?;
        let sink = Sink::try_new(&self.handle)
            .map_err(|e| MixerError::Playback(format!("failed to create sink: {e}")))?;
        sink.set_volume(*self.gain.lock());
        sink.append(decoder.convert_samples::<f32>());
        *slot = Some(sink);
        Ok(())
    }

    fn stop(&self) {
        self.sink.lock().take();
    }

    fn set_volume(&self, gain: f32) {
        *self.gain.lock() = gain;
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.set_volume(gain);
        }
    }

    /// The end of the media was reached (the queue ran dry).
    fn is_finished(&self) -> bool {
        self.sink.lock().as_ref().map_or(false, |s| s.empty())
    }
}

/// One call observed by a [`MockHandle`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    /// Playback started.
    Play,
    /// Playback stopped.
    Stop,
    /// Gain was written.
    SetVolume(f32),
}

/// Call-recording backend used by tests and as the inert handle of failed
/// tracks.
///
/// Clones share the same call log, so a handle captured before preload
/// observes everything the engine later does to it.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    calls: Arc<Mutex<Vec<MockCall>>>,
    gain: Arc<Mutex<f32>>,
    reject_play: bool,
}

impl MockHandle {
    /// New recording handle.
    pub fn new() -> Self {
        MockHandle::default()
    }

    /// A handle whose `play` is rejected, as a missing-permission
    /// playback failure would be.
    pub fn rejecting_play() -> Self {
        MockHandle {
            reject_play: true,
            ..MockHandle::default()
        }
    }

    /// Every call recorded so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls matching `call`.
    pub fn count(&self, call: &MockCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// The most recently written gain.
    pub fn gain(&self) -> f32 {
        *self.gain.lock()
    }

    fn play(&self) -> Result<()> {
        if self.reject_play {
            return Err(crate::MixerError::Playback(
                "playback rejected by backend".into(),
            ));
        }
        self.calls.lock().push(MockCall::Play);
        Ok(())
    }

    fn stop(&self) {
        self.calls.lock().push(MockCall::Stop);
    }

    fn set_volume(&self, gain: f32) {
        *self.gain.lock() = gain;
        self.calls.lock().push(MockCall::SetVolume(gain));
    }
}

/// Closed set of playback backends behind one capability surface.
pub enum TrackBackend {
    /// Decoded-into-buffer path.
    #[cfg(feature = "playback")]
    Buffered(BufferedHandle),
    /// Incremental-decode fallback path.
    #[cfg(feature = "playback")]
    Streaming(StreamingHandle),
    /// Recording stand-in.
    Mock(MockHandle),
}

impl TrackBackend {
    /// The variant tag.
    pub fn kind(&self) -> BackendKind {
        match self {
            #[cfg(feature = "playback")]
            TrackBackend::Buffered(_) => BackendKind::Buffered,
            #[cfg(feature = "playback")]
            TrackBackend::Streaming(_) => BackendKind::Streaming,
            TrackBackend::Mock(_) => BackendKind::Mock,
        }
    }

    /// Start (or resume) playback from position zero.
    pub fn play(&self) -> Result<()> {
        match self {
            #[cfg(feature = "playback")]
            TrackBackend::Buffered(h) => h.play(),
            #[cfg(feature = "playback")]
            TrackBackend::Streaming(h) => h.play(),
            TrackBackend::Mock(h) => h.play(),
        }
    }

    /// Stop playback and rewind, releasing the queued source.
    pub fn stop(&self) {
        match self {
            #[cfg(feature = "playback")]
            TrackBackend::Buffered(h) => h.stop(),
            #[cfg(feature = "playback")]
            TrackBackend::Streaming(h) => h.stop(),
            TrackBackend::Mock(h) => h.stop(),
        }
    }

    /// Write the rendered gain for this track.
    pub fn set_volume(&self, gain: f32) {
        match self {
            #[cfg(feature = "playback")]
            TrackBackend::Buffered(h) => h.set_volume(gain),
            #[cfg(feature = "playback")]
            TrackBackend::Streaming(h) => h.set_volume(gain),
            TrackBackend::Mock(h) => h.set_volume(gain),
        }
    }

    /// Whether a non-gapless backend reached its end and needs a
    /// re-trigger. Gapless backends never report finished.
    pub fn is_finished(&self) -> bool {
        match self {
            #[cfg(feature = "playback")]
            TrackBackend::Buffered(_) => false,
            #[cfg(feature = "playback")]
            TrackBackend::Streaming(h) => h.is_finished(),
            TrackBackend::Mock(_) => false,
        }
    }
}

impl fmt::Debug for TrackBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrackBackend::{}", self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_records_calls_in_order() {
        let mock = MockHandle::new();
        let backend = TrackBackend::Mock(mock.clone());
        backend.play().unwrap();
        backend.set_volume(0.4);
        backend.stop();
        assert_eq!(
            mock.calls(),
            vec![MockCall::Play, MockCall::SetVolume(0.4), MockCall::Stop]
        );
        assert_eq!(mock.gain(), 0.4);
    }

    #[test]
    fn rejecting_mock_fails_play_only() {
        let mock = MockHandle::rejecting_play();
        let backend = TrackBackend::Mock(mock.clone());
        assert!(backend.play().is_err());
        backend.set_volume(0.1);
        assert_eq!(mock.calls(), vec![MockCall::SetVolume(0.1)]);
    }

    #[test]
    fn mock_kind_is_mock() {
        let backend = TrackBackend::Mock(MockHandle::new());
        assert_eq!(backend.kind(), BackendKind::Mock);
        assert!(!backend.is_finished());
    }
}
