//! The codec service boundary.
//!
//! Decode and encode run outside the main task; results come back as events
//! that the editor drains and applies between frames. The built-in
//! [`SymphoniaCodec`] covers MP3/FLAC/OGG/WAV decode and WAV region encode.
//! Hosts with their own media stack implement [`CodecService`] instead.

mod decode;

use std::{
    collections::{HashMap, HashSet},
    error::Error,
    fmt::Display,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, Sender},
        Arc,
    },
    thread,
};

use log::{info, warn};

use super::buffer::AudioBuffer;
use super::utils::key_generator::{key_type, KeyGenerator};
use super::utils::to_samples;
use super::waveform;

key_type!(pub struct ImportSessionKey(u32));

/// Bitrates accepted by `encode_mp3`, in kbps.
pub const MP3_BITRATES: [u32; 4] = [128, 192, 256, 320];

#[derive(Clone, Debug, PartialEq)]
pub struct AudioMetadata {
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: usize,
    pub bit_depth: u32,
    pub format: String,
}

/// Fully decoded audio, as returned by the synchronous load path.
#[derive(Debug)]
pub struct LoadedAudio {
    pub metadata: AudioMetadata,
    pub waveform: Vec<f32>,
    pub buffer: AudioBuffer,
}

/// Events posted by import sessions, processed on the main task.
#[derive(Debug)]
pub enum CodecEvent {
    WaveformChunk {
        session: ImportSessionKey,
        start_bucket: usize,
        peaks: Vec<f32>,
        progress: f32,
    },
    DecodeProgress {
        session: ImportSessionKey,
        progress: f32,
    },
    ImportComplete {
        session: ImportSessionKey,
        waveform: Vec<f32>,
        duration: f64,
        buffer: AudioBuffer,
    },
    ImportError {
        session: ImportSessionKey,
        error: CodecError,
    },
}
impl CodecEvent {
    pub fn session(&self) -> ImportSessionKey {
        match self {
            Self::WaveformChunk { session, .. }
            | Self::DecodeProgress { session, .. }
            | Self::ImportComplete { session, .. }
            | Self::ImportError { session, .. } => *session,
        }
    }
}

/// Host-provided media stack: probing, decoding with streamed waveform
/// events, and region encoding.
pub trait CodecService {
    fn probe_metadata(&self, path: &Path) -> Result<AudioMetadata, CodecError>;

    /// Start a background import. Waveform chunks, progress, and the final
    /// completion or error arrive via [`CodecService::poll_events`].
    fn start_waveform_decode(
        &mut self,
        path: &Path,
        buckets: usize,
    ) -> Result<ImportSessionKey, CodecError>;

    /// Drain pending events. Events from sessions that already completed,
    /// errored or were cancelled are discarded here.
    fn poll_events(&mut self) -> Vec<CodecEvent>;

    /// Stop a session; its remaining events are dropped.
    fn cancel(&mut self, session: ImportSessionKey);

    /// Decode a whole file synchronously, for hosts without streaming needs.
    fn load_audio_complete(&self, path: &Path, buckets: usize)
        -> Result<LoadedAudio, CodecError>;

    /// Re-encode `[start, end]` seconds of a source file into `out`.
    fn encode_region(
        &self,
        source: &Path,
        out: &Path,
        start: f64,
        end: f64,
    ) -> Result<(), CodecError>;

    /// Like `encode_region`, to MP3 at one of [`MP3_BITRATES`].
    fn encode_mp3(
        &self,
        source: &Path,
        out: &Path,
        start: f64,
        end: f64,
        bitrate: u32,
    ) -> Result<(), CodecError>;
}

/// The built-in codec service, decoding via symphonia and writing WAV via
/// hound. Each import runs on its own thread and reports over a channel.
pub struct SymphoniaCodec {
    sessions: KeyGenerator<ImportSessionKey>,
    sender: Sender<CodecEvent>,
    receiver: Receiver<CodecEvent>,
    cancel_flags: HashMap<ImportSessionKey, Arc<AtomicBool>>,
    closed: HashSet<ImportSessionKey>,
}
impl SymphoniaCodec {
    pub fn new() -> Self {
        let (sender, receiver) = channel();
        Self {
            sessions: KeyGenerator::new(),
            sender,
            receiver,
            cancel_flags: HashMap::new(),
            closed: HashSet::new(),
        }
    }
}
impl Default for SymphoniaCodec {
    fn default() -> Self {
        Self::new()
    }
}
impl CodecService for SymphoniaCodec {
    fn probe_metadata(&self, path: &Path) -> Result<AudioMetadata, CodecError> {
        decode::probe(path)
    }

    fn start_waveform_decode(
        &mut self,
        path: &Path,
        buckets: usize,
    ) -> Result<ImportSessionKey, CodecError> {
        // Fail fast on unreadable files before spawning anything
        decode::probe(path)?;

        let session = self
            .sessions
            .next()
            .map_err(|_| CodecError::Other("Import sessions exhausted".to_owned()))?;
        let cancelled = Arc::new(AtomicBool::new(false));
        self.cancel_flags.insert(session, Arc::clone(&cancelled));

        let sender = self.sender.clone();
        let path = path.to_path_buf();
        info!("starting import session {session:?} for {}", path.display());
        thread::spawn(move || {
            decode::decode_streaming(&path, buckets, session, &sender, &cancelled);
        });

        Ok(session)
    }

    fn poll_events(&mut self) -> Vec<CodecEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            let session = event.session();
            if self.closed.contains(&session) {
                continue;
            }
            if matches!(
                event,
                CodecEvent::ImportComplete { .. } | CodecEvent::ImportError { .. }
            ) {
                self.closed.insert(session);
                self.cancel_flags.remove(&session);
            }
            events.push(event);
        }
        events
    }

    fn cancel(&mut self, session: ImportSessionKey) {
        if let Some(flag) = self.cancel_flags.remove(&session) {
            flag.store(true, Ordering::Relaxed);
        }
        self.closed.insert(session);
    }

    fn load_audio_complete(
        &self,
        path: &Path,
        buckets: usize,
    ) -> Result<LoadedAudio, CodecError> {
        let metadata = decode::probe(path)?;
        let buffer = decode::decode_file(path)?.into_buffer();
        let waveform = waveform::extract_peaks(&buffer, buckets.max(1));
        Ok(LoadedAudio {
            metadata: AudioMetadata {
                duration: buffer.duration(),
                sample_rate: buffer.sample_rate(),
                channels: buffer.channels(),
                ..metadata
            },
            waveform,
            buffer,
        })
    }

    fn encode_region(
        &self,
        source: &Path,
        out: &Path,
        start: f64,
        end: f64,
    ) -> Result<(), CodecError> {
        if end <= start {
            return Err(CodecError::Other(format!(
                "Invalid region: {start}..{end}"
            )));
        }
        let decoded = decode::decode_file(source)?.into_buffer();
        let rate = decoded.sample_rate();
        let s0 = to_samples(start, rate).min(decoded.len());
        let s1 = to_samples(end, rate).min(decoded.len());
        let region = decoded.slice(s0..s1);

        let spec = hound::WavSpec {
            channels: region.channels() as u16,
            sample_rate: rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(out, spec)
            .map_err(|e| CodecError::Other(e.to_string()))?;
        for sample in region.interleaved() {
            writer
                .write_sample(sample)
                .map_err(|e| CodecError::Other(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| CodecError::Other(e.to_string()))?;
        Ok(())
    }

    fn encode_mp3(
        &self,
        _source: &Path,
        _out: &Path,
        _start: f64,
        _end: f64,
        bitrate: u32,
    ) -> Result<(), CodecError> {
        if !MP3_BITRATES.contains(&bitrate) {
            return Err(CodecError::InvalidBitrate(bitrate));
        }
        warn!("mp3 encode requested but no encoder is available");
        Err(CodecError::Unsupported(
            "MP3 encoding requires a host-provided codec service".to_owned(),
        ))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CodecError {
    FileNotFound(PathBuf),
    UnknownFormat,
    InvalidBitrate(u32),
    Unsupported(String),
    Other(String),
}
impl Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileNotFound(path) => {
                write!(f, "File could not be found: {}", path.to_string_lossy())
            }
            Self::UnknownFormat => write!(f, "File format not supported"),
            Self::InvalidBitrate(bitrate) => {
                write!(f, "Unsupported MP3 bitrate: {bitrate} kbps")
            }
            Self::Unsupported(msg) => write!(f, "{msg}"),
            Self::Other(msg) => {
                write!(f, "File could not be processed. Failed with error: {msg}")
            }
        }
    }
}
impl Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("scribecut-codec-{}-{name}", std::process::id()));
        path
    }

    /// 1 s stereo 8 kHz sine written with hound, our round-trip fixture.
    fn write_test_wav(name: &str) -> PathBuf {
        let path = temp_path(name);
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..8_000 {
            let sample = ((i as f32 * 0.05).sin() * 0.5 * f32::from(i16::MAX)) as i16;
            writer.write_sample(sample).unwrap();
            writer.write_sample(-sample).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn probe_reads_wav_metadata() {
        let path = write_test_wav("probe.wav");
        let codec = SymphoniaCodec::new();
        let metadata = codec.probe_metadata(&path).unwrap();

        assert_eq!(metadata.sample_rate, 8_000);
        assert_eq!(metadata.channels, 2);
        assert!((metadata.duration - 1.0).abs() < 0.01);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn probe_missing_file() {
        let codec = SymphoniaCodec::new();
        let missing = PathBuf::from("/definitely/not/here.wav");
        assert_eq!(
            codec.probe_metadata(&missing),
            Err(CodecError::FileNotFound(missing))
        );
    }

    #[test]
    fn load_audio_complete_round_trips() {
        let path = write_test_wav("load.wav");
        let codec = SymphoniaCodec::new();
        let loaded = codec.load_audio_complete(&path, 100).unwrap();

        assert_eq!(loaded.buffer.sample_rate(), 8_000);
        assert_eq!(loaded.buffer.channels(), 2);
        assert_eq!(loaded.buffer.len(), 8_000);
        assert_eq!(loaded.waveform.len(), 200);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn import_session_streams_and_completes() {
        let path = write_test_wav("import.wav");
        let mut codec = SymphoniaCodec::new();
        let session = codec.start_waveform_decode(&path, 200).unwrap();

        let mut complete = false;
        for _ in 0..100 {
            for event in codec.poll_events() {
                assert_eq!(event.session(), session);
                if let CodecEvent::ImportComplete {
                    waveform,
                    duration,
                    buffer,
                    ..
                } = event
                {
                    assert_eq!(waveform.len(), 400);
                    assert!((duration - 1.0).abs() < 0.01);
                    assert_eq!(buffer.len(), 8_000);
                    complete = true;
                }
            }
            if complete {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(complete, "import never completed");

        // The session is closed; no further events may surface for it
        assert!(codec.poll_events().is_empty());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn cancelled_session_stops_reporting() {
        let path = write_test_wav("cancel.wav");
        let mut codec = SymphoniaCodec::new();
        let session = codec.start_waveform_decode(&path, 200).unwrap();
        codec.cancel(session);

        thread::sleep(Duration::from_millis(100));
        assert!(codec.poll_events().is_empty());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn encode_region_writes_the_slice() {
        let source = write_test_wav("region-src.wav");
        let out = temp_path("region-out.wav");
        let codec = SymphoniaCodec::new();

        codec.encode_region(&source, &out, 0.25, 0.75).unwrap();

        let reloaded = codec.load_audio_complete(&out, 10).unwrap();
        assert_eq!(reloaded.buffer.len(), 4_000);
        std::fs::remove_file(source).ok();
        std::fs::remove_file(out).ok();
    }

    #[test]
    fn mp3_encode_validates_bitrate() {
        let codec = SymphoniaCodec::new();
        let result = codec.encode_mp3(Path::new("a"), Path::new("b"), 0.0, 1.0, 123);
        assert_eq!(result, Err(CodecError::InvalidBitrate(123)));

        let result = codec.encode_mp3(Path::new("a"), Path::new("b"), 0.0, 1.0, 192);
        assert!(matches!(result, Err(CodecError::Unsupported(_))));
    }
}
