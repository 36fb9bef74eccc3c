//! Track loading
//!
//! [`TrackLoader`] resolves a [`TrackDefinition`] into a [`TrackRuntime`].
//! `load` never raises: a failure degrades the result to a failed-state
//! runtime with an inert handle, so callers always get exactly one
//! runtime per definition.
//!
//! Backend selection happens once per track: the decode-into-buffer path
//! is attempted first; on open or decode failure the streaming path is
//! probed under a bounded wait (default 10 s). A timed-out probe is a
//! failed load, never a false ready.

use crate::backend::{MockHandle, TrackBackend};
use crate::{LoadError, SoundCatalog, TrackDefinition, TrackId};
use crossbeam_channel::unbounded;
#[cfg(feature = "playback")]
use crossbeam_channel::{bounded, RecvTimeoutError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[cfg(feature = "playback")]
use crate::backend::{AudioOutput, BufferedHandle, DecodedAudio, StreamingHandle};
#[cfg(feature = "playback")]
use rodio::{Decoder, OutputStreamHandle, Source};
#[cfg(feature = "playback")]
use std::{fs::File, io::BufReader, path::PathBuf};

/// Bounded wait applied to the streaming fallback probe.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Load lifecycle of one track.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    /// Load has not completed yet.
    Pending,
    /// The backend reported ready; the track is playable.
    Ready,
    /// The load failed; the runtime's handle is inert.
    Failed(LoadError),
}

impl LoadState {
    /// Whether the track is playable.
    pub fn is_ready(&self) -> bool {
        matches!(self, LoadState::Ready)
    }
}

/// Mutable per-track runtime produced by the loader, one per definition.
///
/// Invariant: `is_playing` implies `load_state` is ready, and `volume`
/// stays in `[0, 1]`.
#[derive(Debug)]
pub struct TrackRuntime {
    /// The definition this runtime was loaded from.
    pub definition: TrackDefinition,
    /// The backend chosen at load time.
    pub backend: TrackBackend,
    /// Load lifecycle state.
    pub load_state: LoadState,
    /// Logical playing flag (flips at toggle time; the physical stop
    /// happens when the fade-out completes).
    pub is_playing: bool,
    /// Track volume in `[0, 1]`.
    pub volume: f32,
}

impl TrackRuntime {
    fn ready(definition: TrackDefinition, backend: TrackBackend) -> Self {
        let volume = definition.default_volume;
        TrackRuntime {
            definition,
            backend,
            load_state: LoadState::Ready,
            is_playing: false,
            volume,
        }
    }

    fn failed(definition: TrackDefinition, error: LoadError) -> Self {
        let volume = definition.default_volume;
        TrackRuntime {
            definition,
            // Inert stand-in so the capability surface stays uniform.
            backend: TrackBackend::Mock(MockHandle::new()),
            load_state: LoadState::Failed(error),
            is_playing: false,
            volume,
        }
    }
}

#[derive(Clone)]
enum LoaderKind {
    Mock {
        fail: Vec<TrackId>,
        reject_play: Vec<TrackId>,
        handles: Arc<Mutex<HashMap<TrackId, MockHandle>>>,
    },
    #[cfg(feature = "playback")]
    Real { output: OutputStreamHandle },
}

/// Resolves track definitions into playable runtimes.
#[derive(Clone)]
pub struct TrackLoader {
    kind: LoaderKind,
    timeout: Duration,
}

impl TrackLoader {
    /// Loader backed by a real audio output.
    #[cfg(feature = "playback")]
    pub fn new(output: &AudioOutput) -> Self {
        TrackLoader {
            kind: LoaderKind::Real {
                output: output.handle(),
            },
            timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }

    /// Loader producing mock backends for every definition.
    pub fn mock() -> Self {
        TrackLoader {
            kind: LoaderKind::Mock {
                fail: Vec::new(),
                reject_play: Vec::new(),
                handles: Arc::new(Mutex::new(HashMap::new())),
            },
            timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }

    /// Mock loader for which the given ids fail to load.
    pub fn mock_failing(ids: impl IntoIterator<Item = TrackId>) -> Self {
        let mut loader = TrackLoader::mock();
        if let LoaderKind::Mock { fail, .. } = &mut loader.kind {
            fail.extend(ids);
        }
        loader
    }

    /// Mock loader for which the given ids load but reject `play`.
    pub fn mock_rejecting_play(ids: impl IntoIterator<Item = TrackId>) -> Self {
        let mut loader = TrackLoader::mock();
        if let LoaderKind::Mock { reject_play, .. } = &mut loader.kind {
            reject_play.extend(ids);
        }
        loader
    }

    /// Override the fallback-path timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The mock handle created for `id`, if this is a mock loader and the
    /// track loaded. Tests use this to observe backend calls.
    pub fn mock_handle(&self, id: &TrackId) -> Option<MockHandle> {
        match &self.kind {
            LoaderKind::Mock { handles, .. } => handles.lock().get(id).cloned(),
            #[cfg(feature = "playback")]
            LoaderKind::Real { .. } => None,
        }
    }

    /// Resolve one definition. Never raises: failures come back as a
    /// failed-state runtime.
    pub fn load(&self, definition: &TrackDefinition) -> TrackRuntime {
        match &self.kind {
            LoaderKind::Mock {
                fail,
                reject_play,
                handles,
            } => {
                if fail.contains(&definition.id) {
                    log::warn!("load failed for {}: simulated failure", definition.id);
                    return TrackRuntime::failed(
                        definition.clone(),
                        LoadError::Open("simulated load failure".into()),
                    );
                }
                let handle = if reject_play.contains(&definition.id) {
                    MockHandle::rejecting_play()
                } else {
                    MockHandle::new()
                };
                handles
                    .lock()
                    .insert(definition.id.clone(), handle.clone());
                TrackRuntime::ready(definition.clone(), TrackBackend::Mock(handle))
            }
            #[cfg(feature = "playback")]
            LoaderKind::Real { output } => self.load_real(output, definition),
        }
    }

    /// Preload a whole catalog, one worker per definition. Fail-soft: a
    /// failed or slow track never aborts or delays its siblings. Results
    /// come back in catalog order.
    pub fn load_all(&self, catalog: &SoundCatalog) -> Vec<TrackRuntime> {
        let (tx, rx) = unbounded();
        let mut spawned = 0usize;
        let mut slots: Vec<Option<TrackRuntime>> = Vec::new();
        slots.resize_with(catalog.len(), || None);

        for (index, definition) in catalog.iter().enumerate() {
            let loader = self.clone();
            let definition = definition.clone();
            let tx = tx.clone();
            let worker_definition = definition.clone();
            let worker = thread::Builder::new()
                .name(format!("ambimix-load-{}", definition.id))
                .spawn(move || {
                    let runtime = loader.load(&worker_definition);
                    let _ = tx.send((index, runtime));
                });
            match worker {
                Ok(_) => spawned += 1,
                Err(e) => {
                    // Degrade to an inline load rather than losing the track.
                    log::warn!("load worker spawn failed for {}: {e}", definition.id);
                    slots[index] = Some(self.load(&definition));
                }
            }
        }
        drop(tx);

        for (index, runtime) in rx.iter().take(spawned) {
            slots[index] = Some(runtime);
        }

        let runtimes: Vec<TrackRuntime> = slots.into_iter().flatten().collect();
        let ready = runtimes.iter().filter(|r| r.load_state.is_ready()).count();
        log::info!("preloaded {ready}/{} tracks", runtimes.len());
        runtimes
    }

    #[cfg(feature = "playback")]
    fn load_real(&self, output: &OutputStreamHandle, definition: &TrackDefinition) -> TrackRuntime {
        match decode_fully(&definition.source) {
            Ok(audio) => {
                log::debug!("loaded {} via buffered backend", definition.id);
                TrackRuntime::ready(
                    definition.clone(),
                    TrackBackend::Buffered(BufferedHandle::new(output.clone(), audio)),
                )
            }
            Err(buffered_err) => {
                log::debug!(
                    "buffered load of {} failed ({buffered_err}), probing streaming path",
                    definition.id
                );
                match probe_streaming(&definition.source, self.timeout) {
                    Ok(path) => {
                        log::debug!("loaded {} via streaming backend", definition.id);
                        TrackRuntime::ready(
                            definition.clone(),
                            TrackBackend::Streaming(StreamingHandle::new(output.clone(), path)),
                        )
                    }
                    Err(streaming_err) => {
                        log::warn!("load failed for {}: {streaming_err}", definition.id);
                        TrackRuntime::failed(definition.clone(), streaming_err)
                    }
                }
            }
        }
    }
}

/// Decode the whole source into memory for the buffered backend.
#[cfg(feature = "playback")]
pub(crate) fn decode_fully(source: &str) -> std::result::Result<DecodedAudio, LoadError> {
    let file = File::open(source).map_err(|e| LoadError::Open(e.to_string()))?;
    let decoder =
        Decoder::new(BufReader::new(file)).map_err(|e| LoadError::Decode(e.to_string()))?;
    let channels = decoder.channels();
    let sample_rate = decoder.sample_rate();
    let samples: Vec<f32> = decoder.convert_samples().collect();
    if samples.is_empty() {
        return Err(LoadError::Decode("source contains no audio".into()));
    }
    Ok(DecodedAudio {
        channels,
        sample_rate,
        samples: Arc::new(samples),
    })
}

/// Probe the source for incremental decoding under a bounded wait.
///
/// The probe runs on a worker thread; if it does not report within
/// `timeout` the load is failed. A probe completing later is discarded.
#[cfg(feature = "playback")]
fn probe_streaming(
    source: &str,
    timeout: Duration,
) -> std::result::Result<PathBuf, LoadError> {
    let path = PathBuf::from(source);
    let probe_path = path.clone();
    let (tx, rx) = bounded(1);
    let worker = thread::Builder::new()
        .name("ambimix-probe".into())
        .spawn(move || {
            let result = File::open(&probe_path)
                .map_err(|e| LoadError::Open(e.to_string()))
                .and_then(|file| {
                    Decoder::new(BufReader::new(file))
                        .map(drop)
                        .map_err(|e| LoadError::Decode(e.to_string()))
                });
            let _ = tx.send(result);
        });
    if worker.is_err() {
        return Err(LoadError::Open("failed to spawn probe worker".into()));
    }
    match rx.recv_timeout(timeout) {
        Ok(Ok(())) => Ok(path),
        Ok(Err(e)) => Err(e),
        Err(RecvTimeoutError::Timeout) => Err(LoadError::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => {
            Err(LoadError::Open("probe worker vanished".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;

    #[test]
    fn mock_load_is_ready_with_default_volume() {
        let loader = TrackLoader::mock();
        let def = TrackDefinition::new("rain", "Rain", "sounds/rain.mp3", 0.6);
        let runtime = loader.load(&def);
        assert!(runtime.load_state.is_ready());
        assert!(!runtime.is_playing);
        assert_eq!(runtime.volume, 0.6);
        assert_eq!(runtime.backend.kind(), BackendKind::Mock);
        assert!(loader.mock_handle(&"rain".into()).is_some());
    }

    #[test]
    fn failing_id_degrades_to_failed_runtime() {
        let loader = TrackLoader::mock_failing(["thunder".into()]);
        let def = TrackDefinition::new("thunder", "Thunder", "sounds/thunder.mp3", 0.4);
        let runtime = loader.load(&def);
        assert!(matches!(runtime.load_state, LoadState::Failed(_)));
        // The inert handle still honors the capability surface.
        runtime.backend.set_volume(0.2);
        runtime.backend.stop();
    }

    #[test]
    fn load_all_is_fail_soft_and_ordered() {
        let catalog = SoundCatalog::builtin();
        let loader = TrackLoader::mock_failing(["stream".into()]);
        let runtimes = loader.load_all(&catalog);
        assert_eq!(runtimes.len(), 6);
        let ids: Vec<&str> = runtimes
            .iter()
            .map(|r| r.definition.id.as_str())
            .collect();
        assert_eq!(
            ids,
            ["rain", "thunder", "stream", "wind", "fireplace", "waves"]
        );
        assert_eq!(
            runtimes
                .iter()
                .filter(|r| r.load_state.is_ready())
                .count(),
            5
        );
        assert!(matches!(runtimes[2].load_state, LoadState::Failed(_)));
    }

    #[cfg(feature = "playback")]
    mod decode {
        use super::super::*;
        use std::io::Write;

        fn write_wav_fixture(dir: &tempfile::TempDir, name: &str) -> String {
            let path = dir.path().join(name);
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate: 8000,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut writer = hound::WavWriter::create(&path, spec).unwrap();
            for n in 0..800u32 {
                let t = n as f32 / 8000.0;
                let sample = (t * 440.0 * 2.0 * std::f32::consts::PI).sin();
                writer.write_sample((sample * i16::MAX as f32 * 0.5) as i16).unwrap();
            }
            writer.finalize().unwrap();
            path.to_string_lossy().into_owned()
        }

        #[test]
        fn decode_fully_reads_wav_fixture() {
            let dir = tempfile::tempdir().unwrap();
            let source = write_wav_fixture(&dir, "tone.wav");
            let audio = decode_fully(&source).unwrap();
            assert_eq!(audio.channels, 1);
            assert_eq!(audio.sample_rate, 8000);
            assert_eq!(audio.samples.len(), 800);
        }

        #[test]
        fn decode_fully_rejects_missing_file() {
            let err = decode_fully("definitely/not/here.wav").unwrap_err();
            assert!(matches!(err, LoadError::Open(_)));
        }

        #[test]
        fn decode_fully_rejects_non_audio() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("garbage.mp3");
            std::fs::File::create(&path)
                .unwrap()
                .write_all(b"this is not audio")
                .unwrap();
            let err = decode_fully(&path.to_string_lossy()).unwrap_err();
            assert!(matches!(err, LoadError::Decode(_)));
        }

        #[test]
        fn probe_timeout_is_failed_not_ready() {
            // A zero timeout forces the bounded wait to elapse first.
            let dir = tempfile::tempdir().unwrap();
            let source = write_wav_fixture(&dir, "tone.wav");
            let err = probe_streaming(&source, Duration::ZERO).unwrap_err();
            assert!(matches!(err, LoadError::Timeout(_)));
        }
    }
}
