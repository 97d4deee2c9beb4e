//! The render engine boundary.
//!
//! Playback rendering and metering run outside the main task, behind the
//! [`RenderEngine`] trait: the engine owns its own clock, honors negative
//! speeds natively, and is polled for position and meter levels at frame
//! cadence. Two implementations ship with the editor: [`OfflineEngine`] for
//! tests and headless hosts, and the cpal-backed [`StreamEngine`].

mod offline;
mod stream;

use std::{
    error::Error,
    fmt::Display,
    hash::{Hash, Hasher},
    path::PathBuf,
    sync::Arc,
};

pub use offline::OfflineEngine;
pub use stream::StreamEngine;

use super::buffer::AudioBuffer;
use super::timeline::{envelope_value_at, TrackKey, VolumePoint};
use super::Sample;

/// One clip as the engine sees it: a shared buffer at a timeline position.
#[derive(Clone, Debug)]
pub struct EngineClip {
    pub buffer: Arc<AudioBuffer>,
    pub start: f64,
    pub duration: f64,
}

/// One track's playback configuration.
#[derive(Clone, Debug)]
pub struct EngineTrack {
    pub key: TrackKey,
    /// Where the audio came from; kept for engines that render from disk.
    pub source_path: Option<PathBuf>,
    pub start: f64,
    pub duration: f64,
    pub volume: f32,
    pub muted: bool,
    pub envelope: Vec<VolumePoint>,
    pub clips: Vec<EngineClip>,
}
impl EngineTrack {
    /// Hash of everything the engine renders from, used to skip redundant
    /// `set_tracks` calls.
    fn config_hash(&self, hasher: &mut impl Hasher) {
        self.key.hash(hasher);
        self.start.to_bits().hash(hasher);
        self.duration.to_bits().hash(hasher);
        self.volume.to_bits().hash(hasher);
        self.muted.hash(hasher);
        for point in &self.envelope {
            point.time.to_bits().hash(hasher);
            point.value.to_bits().hash(hasher);
        }
        for clip in &self.clips {
            clip.start.to_bits().hash(hasher);
            clip.duration.to_bits().hash(hasher);
            (Arc::as_ptr(&clip.buffer) as usize).hash(hasher);
        }
    }
}

/// Order-sensitive hash over a whole track configuration.
pub fn config_hash(tracks: &[EngineTrack]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for track in tracks {
        track.config_hash(&mut hasher);
    }
    hasher.finish()
}

/// Raw peak/RMS of one stereo bus for a single report interval.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeterFrame {
    pub peak: [f32; 2],
    pub rms: [f32; 2],
}

/// Raw meter levels for all tracks plus the master bus.
#[derive(Clone, Debug, Default)]
pub struct MeterLevels {
    pub tracks: Vec<(TrackKey, MeterFrame)>,
    pub master: MeterFrame,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Requested stream buffer size in frames; `None` keeps the device
    /// default.
    pub buffer_size: Option<u32>,
}
impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_size: None,
        }
    }
}

/// The playback/metering service driven by the playback controller.
pub trait RenderEngine {
    /// Replace the rendered track set. Callers are expected to skip the call
    /// when [`config_hash`] is unchanged.
    fn set_tracks(&mut self, tracks: Vec<EngineTrack>) -> Result<(), EngineError>;
    fn set_loop(&mut self, enabled: bool, start: f64, end: f64) -> Result<(), EngineError>;
    /// Playback speed; negative plays in reverse. Hot-swappable mid-play.
    fn set_speed(&mut self, speed: f64) -> Result<(), EngineError>;
    fn set_volume(&mut self, volume: f32) -> Result<(), EngineError>;
    fn set_track_muted(&mut self, key: TrackKey, muted: bool) -> Result<(), EngineError>;
    fn set_track_volume(&mut self, key: TrackKey, volume: f32) -> Result<(), EngineError>;
    fn set_track_envelope(
        &mut self,
        key: TrackKey,
        envelope: Vec<VolumePoint>,
    ) -> Result<(), EngineError>;

    fn play(&mut self) -> Result<(), EngineError>;
    fn pause(&mut self) -> Result<(), EngineError>;
    fn stop(&mut self) -> Result<(), EngineError>;
    fn seek(&mut self, position: f64) -> Result<(), EngineError>;

    /// Current playhead as the engine's clock sees it.
    fn position(&mut self) -> f64;
    fn meter_levels(&mut self) -> MeterLevels;
}

/// Meter accumulators written by [`RenderState::render`], preallocated to
/// match the track set so the audio thread never allocates.
#[derive(Clone, Debug)]
pub(crate) struct RenderedMeters {
    pub tracks: Vec<(TrackKey, MeterFrame)>,
    pub master: MeterFrame,
    /// Per-track square sums for RMS, last entry is the master bus.
    squares: Vec<[f64; 2]>,
}
impl RenderedMeters {
    pub fn for_tracks(tracks: &[EngineTrack]) -> Self {
        Self {
            tracks: tracks
                .iter()
                .map(|t| (t.key, MeterFrame::default()))
                .collect(),
            master: MeterFrame::default(),
            squares: vec![[0.0; 2]; tracks.len() + 1],
        }
    }
}
impl Default for RenderedMeters {
    fn default() -> Self {
        Self::for_tracks(&[])
    }
}

/// The playback state both engines render from.
///
/// Rendering steps the playhead by `speed / sample_rate` per output frame,
/// reading clip samples with linear interpolation at the fractional source
/// position. That one mechanism covers sample-rate conversion, variable
/// speed, and reverse playback.
pub(crate) struct RenderState {
    pub tracks: Vec<EngineTrack>,
    pub playing: bool,
    pub position: f64,
    pub loop_enabled: bool,
    pub loop_start: f64,
    pub loop_end: f64,
    pub speed: f64,
    pub volume: f32,
}
impl RenderState {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            playing: false,
            position: 0.0,
            loop_enabled: false,
            loop_start: 0.0,
            loop_end: 0.0,
            speed: 1.0,
            volume: 1.0,
        }
    }

    pub fn track_mut(&mut self, key: TrackKey) -> Option<&mut EngineTrack> {
        self.tracks.iter_mut().find(|t| t.key == key)
    }

    /// Render interleaved output and fill the meter accumulators.
    /// `meters.tracks` must parallel `self.tracks`.
    pub fn render(
        &mut self,
        out: &mut [Sample],
        channels: usize,
        sample_rate: u32,
        meters: &mut RenderedMeters,
    ) {
        out.fill(0.0);
        for (_, frame) in meters.tracks.iter_mut() {
            *frame = MeterFrame::default();
        }
        meters.master = MeterFrame::default();
        meters.squares.fill([0.0; 2]);
        debug_assert_eq!(meters.tracks.len(), self.tracks.len());
        debug_assert_eq!(meters.squares.len(), self.tracks.len() + 1);

        if !self.playing || channels == 0 {
            return;
        }

        let frames = out.len() / channels;
        if frames == 0 {
            return;
        }
        let step = self.speed / f64::from(sample_rate);

        for frame_index in 0..frames {
            let t = self.position;
            let mut master = [0.0f32; 2];

            for (track_index, track) in self.tracks.iter().enumerate() {
                if track.muted {
                    continue;
                }
                let gain = if track.envelope.is_empty() {
                    track.volume
                } else {
                    envelope_value_at(&track.envelope, track.volume, t - track.start)
                };

                let mut left = 0.0f32;
                let mut right = 0.0f32;
                for clip in &track.clips {
                    left += sample_at(clip, t, 0);
                    right += sample_at(clip, t, 1);
                }
                left *= gain;
                right *= gain;

                let meter = &mut meters.tracks[track_index].1;
                meter.peak[0] = meter.peak[0].max(left.abs());
                meter.peak[1] = meter.peak[1].max(right.abs());
                meters.squares[track_index][0] += f64::from(left) * f64::from(left);
                meters.squares[track_index][1] += f64::from(right) * f64::from(right);

                master[0] += left;
                master[1] += right;
            }

            master[0] *= self.volume;
            master[1] *= self.volume;
            meters.master.peak[0] = meters.master.peak[0].max(master[0].abs());
            meters.master.peak[1] = meters.master.peak[1].max(master[1].abs());
            let last = meters.squares.len() - 1;
            meters.squares[last][0] += f64::from(master[0]) * f64::from(master[0]);
            meters.squares[last][1] += f64::from(master[1]) * f64::from(master[1]);

            for ch in 0..channels {
                out[frame_index * channels + ch] = master[ch.min(1)];
            }

            self.position += step;
            if self.loop_enabled && self.loop_end > self.loop_start {
                if step > 0.0 && self.position >= self.loop_end {
                    self.position = self.loop_start;
                } else if step < 0.0 && self.position <= self.loop_start {
                    self.position = self.loop_end;
                }
            }
            if self.position < 0.0 {
                self.position = 0.0;
            }
        }

        let frames_f = frames as f64;
        let squares = &meters.squares;
        for (index, frame) in meters.tracks.iter_mut().map(|(_, f)| f).enumerate() {
            frame.rms[0] = (squares[index][0] / frames_f).sqrt() as f32;
            frame.rms[1] = (squares[index][1] / frames_f).sqrt() as f32;
        }
        let last = squares.len() - 1;
        meters.master.rms[0] = (squares[last][0] / frames_f).sqrt() as f32;
        meters.master.rms[1] = (squares[last][1] / frames_f).sqrt() as f32;
    }
}

/// One clip sample at timeline time `t`, linearly interpolated.
fn sample_at(clip: &EngineClip, t: f64, channel: usize) -> f32 {
    let local = t - clip.start;
    if local < 0.0 || local >= clip.duration {
        return 0.0;
    }
    let pos = local * f64::from(clip.buffer.sample_rate());
    let index = pos as usize;
    let data = clip.buffer.channel_clamped(channel);
    if index >= data.len() {
        return 0.0;
    }
    let a = data[index];
    let b = if index + 1 < data.len() {
        data[index + 1]
    } else {
        a
    };
    let fraction = (pos - index as f64) as f32;
    a + (b - a) * fraction
}

#[derive(Debug, PartialEq, Eq)]
pub enum EngineError {
    DeviceNotAvailable,
    Stream(String),
    Other(String),
}
impl Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceNotAvailable => write!(f, "No output device is available"),
            Self::Stream(msg) => write!(f, "Output stream failed: {msg}"),
            Self::Other(msg) => write!(f, "Render engine error: {msg}"),
        }
    }
}
impl Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::utils::key_generator::Key;

    fn ramp_clip(start: f64, seconds: f64, rate: u32) -> EngineClip {
        let frames = (seconds * f64::from(rate)) as usize;
        let samples: Vec<f32> = (0..frames).map(|i| i as f32 / frames as f32).collect();
        let buffer = Arc::new(AudioBuffer::new(rate, vec![samples]));
        EngineClip {
            duration: buffer.duration(),
            buffer,
            start,
        }
    }

    fn one_track(clips: Vec<EngineClip>) -> EngineTrack {
        EngineTrack {
            key: TrackKey::new(0),
            source_path: None,
            start: clips.first().map(|c| c.start).unwrap_or(0.0),
            duration: clips.iter().map(|c| c.duration).sum(),
            volume: 1.0,
            muted: false,
            envelope: Vec::new(),
            clips,
        }
    }

    #[test]
    fn hash_changes_with_config() {
        let tracks = vec![one_track(vec![ramp_clip(0.0, 1.0, 1000)])];
        let base = config_hash(&tracks);

        let mut moved = tracks.clone();
        moved[0].clips[0].start = 0.5;
        assert_ne!(config_hash(&moved), base);

        let mut muted = tracks.clone();
        muted[0].muted = true;
        assert_ne!(config_hash(&muted), base);

        assert_eq!(config_hash(&tracks.clone()), base);
    }

    #[test]
    fn render_advances_position_by_speed() {
        let mut state = RenderState::new();
        state.tracks = vec![one_track(vec![ramp_clip(0.0, 10.0, 1000)])];
        state.playing = true;
        state.speed = 2.0;

        let mut meters = RenderedMeters::for_tracks(&state.tracks);
        let mut out = vec![0.0; 1000 * 2];
        state.render(&mut out, 2, 1000, &mut meters);

        assert!((state.position - 2.0).abs() < 1e-6);
    }

    #[test]
    fn reverse_render_moves_backwards_and_stops_at_zero() {
        let mut state = RenderState::new();
        state.tracks = vec![one_track(vec![ramp_clip(0.0, 10.0, 1000)])];
        state.playing = true;
        state.speed = -1.0;
        state.position = 0.5;

        let mut meters = RenderedMeters::for_tracks(&state.tracks);
        let mut out = vec![0.0; 1000 * 2];
        state.render(&mut out, 2, 1000, &mut meters);

        assert_eq!(state.position, 0.0);
    }

    #[test]
    fn loop_wraps_in_both_directions() {
        let mut state = RenderState::new();
        state.tracks = vec![one_track(vec![ramp_clip(0.0, 10.0, 1000)])];
        state.playing = true;
        state.loop_enabled = true;
        state.loop_start = 1.0;
        state.loop_end = 2.0;
        state.position = 1.9;

        let mut meters = RenderedMeters::for_tracks(&state.tracks);
        let mut out = vec![0.0; 500 * 2];
        state.render(&mut out, 2, 1000, &mut meters);
        assert!(state.position >= 1.0 && state.position < 2.0);

        state.speed = -1.0;
        state.position = 1.1;
        state.render(&mut out, 2, 1000, &mut meters);
        assert!(state.position > 1.0 && state.position <= 2.0);
    }

    #[test]
    fn muted_tracks_are_silent_but_listed() {
        let mut state = RenderState::new();
        let mut track = one_track(vec![ramp_clip(0.0, 1.0, 1000)]);
        track.muted = true;
        state.tracks = vec![track];
        state.playing = true;
        state.position = 0.5;

        let mut meters = RenderedMeters::for_tracks(&state.tracks);
        let mut out = vec![1.0; 100 * 2];
        state.render(&mut out, 2, 1000, &mut meters);

        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(meters.tracks.len(), 1);
        assert_eq!(meters.tracks[0].1, MeterFrame::default());
    }

    #[test]
    fn interpolation_reads_between_samples() {
        let buffer = Arc::new(AudioBuffer::new(10, vec![vec![0.0, 1.0]]));
        let clip = EngineClip {
            duration: buffer.duration(),
            buffer,
            start: 0.0,
        };
        // Half way between sample 0 and 1
        let value = sample_at(&clip, 0.05, 0);
        assert!((value - 0.5).abs() < 1e-6);
    }

    #[test]
    fn envelope_shapes_the_render() {
        use crate::editor::timeline::VolumePointKey;

        let mut track = one_track(vec![EngineClip {
            buffer: Arc::new(AudioBuffer::new(1000, vec![vec![1.0; 2000]])),
            start: 0.0,
            duration: 2.0,
        }]);
        track.envelope = vec![
            VolumePoint {
                key: VolumePointKey::new(0),
                time: 0.0,
                value: 1.0,
            },
            VolumePoint {
                key: VolumePointKey::new(1),
                time: 2.0,
                value: 0.0,
            },
        ];

        let mut state = RenderState::new();
        state.tracks = vec![track];
        state.playing = true;
        state.position = 1.0;

        let mut meters = RenderedMeters::for_tracks(&state.tracks);
        let mut out = vec![0.0; 2];
        state.render(&mut out, 2, 1000, &mut meters);
        assert!((out[0] - 0.5).abs() < 1e-3);
    }
}
