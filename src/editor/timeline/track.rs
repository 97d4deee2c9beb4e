use std::{path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};

use super::clip::Clip;
use super::envelope::VolumePoint;
use super::timemark::TimeMark;
use crate::editor::buffer::AudioBuffer;
use crate::editor::utils::key_generator::key_type;
use crate::editor::EPSILON;

key_type!(pub struct TrackKey(u32));

/// Ceiling on the per-track linear gain; `volume` may exceed unity up to this.
pub const MAX_GAIN: f32 = 2.0;

/// Palette cycled through as tracks are created.
pub const TRACK_COLORS: [&str; 8] = [
    "#e06c75", "#61afef", "#98c379", "#e5c07b", "#c678dd", "#56b6c2", "#d19a66", "#7f848e",
];

/// Import lifecycle of a track created from a file.
///
/// `Importing` collects streamed waveform chunks, `Decoding` has the final
/// overview and waits for sample data, `Ready` has its buffer.
#[derive(Clone, Debug)]
pub enum ImportState {
    Importing { waveform: Vec<f32>, progress: f32 },
    Decoding { waveform: Vec<f32>, progress: f32 },
    Ready,
}
impl ImportState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ImportState::Ready)
    }
}

/// Import status as shown to hosts, without the chunk payloads.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Importing,
    Decoding,
    Ready,
}

/// A track's audio content.
///
/// A track has either a single buffer (one implicit clip at `track.start`) or
/// a list of clips; the edit engine converts between the two as needed.
#[derive(Clone, Debug)]
pub enum TrackAudio {
    Empty,
    Buffer {
        buffer: Arc<AudioBuffer>,
        waveform: Arc<Vec<f32>>,
    },
    Clips(Vec<Clip>),
}

/// A horizontal lane of the timeline: audio content plus mix controls,
/// automation, and timemarks.
#[derive(Clone, Debug)]
pub struct Track {
    pub key: TrackKey,
    pub name: String,
    pub color: String,

    pub muted: bool,
    pub solo: bool,
    /// Linear gain in `[0, MAX_GAIN]`.
    pub volume: f32,

    /// Timeline seconds. For clip tracks this is kept equal to the earliest
    /// clip start by `recompute_bounds`.
    pub start: f64,
    /// Extent of the audio content in seconds.
    pub duration: f64,

    pub audio: TrackAudio,
    /// Gain automation, sorted by time (track-relative).
    pub envelope: Vec<VolumePoint>,
    pub timemarks: Vec<TimeMark>,

    pub source_path: Option<PathBuf>,
    pub import: ImportState,
}
impl Track {
    pub fn new(key: TrackKey, name: String, color: String) -> Self {
        Self {
            key,
            name,
            color,
            muted: false,
            solo: false,
            volume: 1.0,
            start: 0.0,
            duration: 0.0,
            audio: TrackAudio::Empty,
            envelope: Vec::new(),
            timemarks: Vec::new(),
            source_path: None,
            import: ImportState::Ready,
        }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn has_audio(&self) -> bool {
        match &self.audio {
            TrackAudio::Empty => false,
            TrackAudio::Buffer { buffer, .. } => !buffer.is_empty(),
            TrackAudio::Clips(clips) => !clips.is_empty(),
        }
    }

    pub fn clips(&self) -> &[Clip] {
        match &self.audio {
            TrackAudio::Clips(clips) => clips,
            _ => &[],
        }
    }

    pub fn clips_mut(&mut self) -> Option<&mut Vec<Clip>> {
        match &mut self.audio {
            TrackAudio::Clips(clips) => Some(clips),
            _ => None,
        }
    }

    /// Sample rate of this track's audio, if it has any.
    pub fn sample_rate(&self) -> Option<u32> {
        match &self.audio {
            TrackAudio::Empty => None,
            TrackAudio::Buffer { buffer, .. } => Some(buffer.sample_rate()),
            TrackAudio::Clips(clips) => clips.first().map(|c| c.buffer.sample_rate()),
        }
    }

    pub fn import_status(&self) -> ImportStatus {
        match &self.import {
            ImportState::Importing { .. } => ImportStatus::Importing,
            ImportState::Decoding { .. } => ImportStatus::Decoding,
            ImportState::Ready => ImportStatus::Ready,
        }
    }

    pub fn overlaps_range(&self, start: f64, end: f64) -> bool {
        self.has_audio() && self.start < end - EPSILON && start < self.end() - EPSILON
    }

    /// Re-derive `start` and `duration` from the audio content.
    ///
    /// For clip tracks: `start = min(clip.start)`,
    /// `start + duration = max(clip.end())`.
    pub fn recompute_bounds(&mut self) {
        match &self.audio {
            TrackAudio::Empty => {
                self.duration = 0.0;
            }
            TrackAudio::Buffer { buffer, .. } => {
                self.duration = buffer.duration();
            }
            TrackAudio::Clips(clips) => {
                if clips.is_empty() {
                    self.audio = TrackAudio::Empty;
                    self.duration = 0.0;
                    return;
                }
                let start = clips.iter().map(|c| c.start).fold(f64::MAX, f64::min);
                let end = clips.iter().map(|c| c.end()).fold(f64::MIN, f64::max);
                self.start = start;
                self.duration = end - start;
            }
        }
    }

    pub fn sort_clips(&mut self) {
        if let TrackAudio::Clips(clips) = &mut self.audio {
            clips.sort_by(|a, b| a.start.total_cmp(&b.start));
        }
    }

    /// Shift timemarks and envelope points at or after `from` (track-relative)
    /// right by `by` seconds. Used when content is inserted.
    pub fn shift_decorations_right(&mut self, from: f64, by: f64) {
        for mark in &mut self.timemarks {
            if mark.time >= from - EPSILON {
                mark.time += by;
            }
        }
        for point in &mut self.envelope {
            if point.time >= from - EPSILON {
                point.time += by;
            }
        }
    }

    /// Remove timemarks and envelope points inside `[from, to)` and pull the
    /// ones at or after `to` left by the gap. Used by ripple deletes.
    pub fn close_decoration_gap(&mut self, from: f64, to: f64) {
        let gap = to - from;
        self.timemarks
            .retain(|mark| mark.time < from || mark.time >= to - EPSILON);
        for mark in &mut self.timemarks {
            if mark.time >= to - EPSILON {
                mark.time = (mark.time - gap).max(0.0);
            }
        }
        self.envelope
            .retain(|point| point.time < from || point.time >= to - EPSILON);
        for point in &mut self.envelope {
            if point.time >= to - EPSILON {
                point.time = (point.time - gap).max(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::timeline::clip::ClipKey;
    use crate::editor::timeline::envelope::VolumePointKey;
    use crate::editor::timeline::timemark::{TimeMarkKey, TimeMarkSource};

    fn clip(key: u32, start: f64, seconds: f64) -> Clip {
        let frames = (seconds * 1000.0) as usize;
        Clip::new(
            ClipKey::new(key),
            Arc::new(AudioBuffer::silent(1000, 1, frames)),
            Arc::new(Vec::new()),
            start,
        )
    }

    use crate::editor::utils::key_generator::Key;

    #[test]
    fn bounds_follow_clips() {
        let mut track = Track::new(TrackKey::new(0), "a".into(), TRACK_COLORS[0].into());
        track.audio = TrackAudio::Clips(vec![clip(0, 2.0, 1.0), clip(1, 5.0, 2.0)]);
        track.recompute_bounds();

        assert_eq!(track.start, 2.0);
        assert_eq!(track.duration, 5.0);
        assert_eq!(track.end(), 7.0);
    }

    #[test]
    fn empty_clip_list_collapses_to_empty() {
        let mut track = Track::new(TrackKey::new(0), "a".into(), TRACK_COLORS[0].into());
        track.audio = TrackAudio::Clips(Vec::new());
        track.recompute_bounds();

        assert!(!track.has_audio());
        assert_eq!(track.duration, 0.0);
    }

    #[test]
    fn decorations_shift_and_close() {
        let mut track = Track::new(TrackKey::new(0), "a".into(), TRACK_COLORS[0].into());
        track.timemarks = vec![
            TimeMark {
                key: TimeMarkKey::new(0),
                time: 1.0,
                label: "keep".into(),
                source: TimeMarkSource::Manual,
                color: None,
            },
            TimeMark {
                key: TimeMarkKey::new(1),
                time: 3.0,
                label: "inside".into(),
                source: TimeMarkSource::Manual,
                color: None,
            },
            TimeMark {
                key: TimeMarkKey::new(2),
                time: 6.0,
                label: "after".into(),
                source: TimeMarkSource::Manual,
                color: None,
            },
        ];
        track.envelope = vec![VolumePoint {
            key: VolumePointKey::new(0),
            time: 6.0,
            value: 0.5,
        }];

        track.close_decoration_gap(2.0, 4.0);

        assert_eq!(track.timemarks.len(), 2);
        assert_eq!(track.timemarks[0].time, 1.0);
        assert_eq!(track.timemarks[1].time, 4.0);
        assert_eq!(track.envelope[0].time, 4.0);

        track.shift_decorations_right(4.0, 1.5);
        assert_eq!(track.timemarks[1].time, 5.5);
        assert_eq!(track.timemarks[0].time, 1.0);
    }
}
