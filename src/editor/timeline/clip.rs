use std::sync::Arc;

use crate::editor::buffer::AudioBuffer;
use crate::editor::utils::key_generator::key_type;
use crate::editor::EPSILON;

key_type!(pub struct ClipKey(u32));

/// A contiguous audio region on a track, with its own buffer and its own
/// position on the timeline.
///
/// Clips never mutate their samples; edits carve new buffers and build new
/// clips from them. The duration is derived from the buffer, so it can never
/// drift out of sync with the audio.
#[derive(Clone, Debug)]
pub struct Clip {
    pub key: ClipKey,
    pub buffer: Arc<AudioBuffer>,
    /// Overview min/max peaks for this clip's buffer.
    pub waveform: Arc<Vec<f32>>,
    /// Start position in timeline seconds.
    pub start: f64,
}
impl Clip {
    pub fn new(key: ClipKey, buffer: Arc<AudioBuffer>, waveform: Arc<Vec<f32>>, start: f64) -> Self {
        Self {
            key,
            buffer,
            waveform,
            start,
        }
    }

    pub fn duration(&self) -> f64 {
        self.buffer.duration()
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration()
    }

    pub fn overlaps_range(&self, start: f64, end: f64) -> bool {
        self.start < end - EPSILON && start < self.end() - EPSILON
    }

    /// Whether `time` falls strictly inside the clip, away from both edges.
    pub fn contains_strictly(&self, time: f64) -> bool {
        time > self.start + EPSILON && time < self.end() - EPSILON
    }
}

/// Which clip of a track an operation addresses.
///
/// A single-buffer track exposes its audio as one implicit "main" clip;
/// tracks that have been cut or spliced address their clips by key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClipTarget {
    Main,
    Clip(ClipKey),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(start: f64, seconds: f64) -> Clip {
        let frames = (seconds * 1000.0) as usize;
        Clip::new(
            ClipKey(0),
            Arc::new(AudioBuffer::silent(1000, 1, frames)),
            Arc::new(Vec::new()),
            start,
        )
    }

    #[test]
    fn duration_follows_buffer() {
        let c = clip(2.0, 3.5);
        assert_eq!(c.duration(), 3.5);
        assert_eq!(c.end(), 5.5);
    }

    #[test]
    fn overlap_is_exclusive_at_edges() {
        let c = clip(2.0, 2.0);
        assert!(c.overlaps_range(3.0, 5.0));
        assert!(!c.overlaps_range(4.0, 5.0));
        assert!(!c.overlaps_range(0.0, 2.0));
    }

    #[test]
    fn strict_containment_rejects_edges() {
        let c = clip(1.0, 2.0);
        assert!(c.contains_strictly(2.0));
        assert!(!c.contains_strictly(1.0));
        assert!(!c.contains_strictly(3.0));
    }
}
