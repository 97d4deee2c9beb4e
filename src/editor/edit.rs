//! The edit engine: sample-accurate cut, delete, split, insert, slide and
//! region extraction over the track store, plus the snap/overlap policy for
//! clip drags.
//!
//! All operations are soft on bad input: unknown keys and degenerate ranges
//! are no-ops reported as `None`/`false`.

use std::sync::Arc;

use super::buffer::AudioBuffer;
use super::mixer;
use super::timeline::{
    ActiveDrag, Clip, ClipKey, ClipTarget, TrackAudio, TrackKey, TrackStore,
};
use super::utils::to_samples;
use super::waveform;
use super::EPSILON;

/// Magnetic alignment distance for clip drags, in seconds.
pub const SNAP_THRESHOLD: f64 = 0.1;

/// Audio carved out of the timeline, with a fresh overview for display.
#[derive(Clone, Debug)]
pub struct CutBuffer {
    pub buffer: Arc<AudioBuffer>,
    pub waveform: Arc<Vec<f32>>,
}
impl CutBuffer {
    fn from_buffer(buffer: AudioBuffer) -> Self {
        let waveform = Arc::new(waveform::overview(&buffer));
        Self {
            buffer: Arc::new(buffer),
            waveform,
        }
    }
}

/// Result of a region cut across the timeline.
#[derive(Clone, Debug)]
pub struct RegionCut {
    pub buffer: Arc<AudioBuffer>,
    pub waveform: Arc<Vec<f32>>,
    /// Tracks whose content was touched, with their start position before the
    /// cut (track-relative ranges for transcription re-timing derive from it).
    pub tracks: Vec<(TrackKey, f64)>,
}

/// Where a dragged clip should land.
///
/// Scans the other clips in start order and takes the first edge within
/// [`SNAP_THRESHOLD`]: our-end-to-their-start, our-start-to-their-end,
/// our-start-to-their-start. Afterwards an overlapping position is pushed out
/// to the nearer side of the blocking clip. Never returns a negative start.
pub fn snapped_clip_position(
    clips: &[Clip],
    moving: Option<ClipKey>,
    desired_start: f64,
    duration: f64,
    snap: bool,
) -> f64 {
    if !snap {
        return desired_start.max(0.0);
    }

    let mut others: Vec<&Clip> = clips
        .iter()
        .filter(|c| Some(c.key) != moving)
        .collect();
    others.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut start = desired_start;
    'snap: for other in &others {
        let candidates = [
            other.start - duration, // our end meets their start
            other.end(),            // our start meets their end
            other.start,            // our start meets their start
        ];
        for candidate in candidates {
            if (start - candidate).abs() <= SNAP_THRESHOLD {
                start = candidate;
                break 'snap;
            }
        }
    }

    for other in &others {
        let end = start + duration;
        let overlapping = start < other.end() - EPSILON && other.start < end - EPSILON;
        if overlapping {
            let after = other.end();
            let before = other.start - duration;
            start = if (start - after).abs() <= (start - before).abs() {
                after
            } else {
                before
            };
        }
    }

    start.max(0.0)
}

/// A piece of track audio fed through the carve loop: a buffer, its overview,
/// its timeline start, and the key of the original clip it came from (none
/// for the implicit clip of a single-buffer track, or for freshly cut pieces).
struct Piece {
    buffer: Arc<AudioBuffer>,
    waveform: Arc<Vec<f32>>,
    start: f64,
    key: Option<ClipKey>,
}

impl TrackStore {
    /// Cut `[in_point, out_point]` (timeline seconds) out of one track.
    ///
    /// Returns the extracted audio mixed into a buffer spanning the full cut
    /// length, or `None` when the range is degenerate or misses the track.
    /// The track keeps the material on either side of the cut as clips; if the
    /// cut swallows everything, the track is cleared to an empty shell
    /// (`keep_track`) or deleted.
    pub fn cut_track_region(
        &mut self,
        key: TrackKey,
        in_point: f64,
        out_point: f64,
        keep_track: bool,
    ) -> Option<CutBuffer> {
        if out_point - in_point <= EPSILON {
            return None;
        }
        let index = self.track_index(key)?;
        if !self.tracks[index].overlaps_range(in_point, out_point) {
            return None;
        }

        let track_start = self.tracks[index].start;
        let pieces: Vec<Piece> = match &self.tracks[index].audio {
            TrackAudio::Empty => return None,
            TrackAudio::Buffer { buffer, waveform } => vec![Piece {
                buffer: Arc::clone(buffer),
                waveform: Arc::clone(waveform),
                start: track_start,
                key: None,
            }],
            TrackAudio::Clips(clips) => clips
                .iter()
                .map(|c| Piece {
                    buffer: Arc::clone(&c.buffer),
                    waveform: Arc::clone(&c.waveform),
                    start: c.start,
                    key: Some(c.key),
                })
                .collect(),
        };

        let mut remaining: Vec<Piece> = Vec::new();
        let mut contributions: Vec<(Arc<AudioBuffer>, f64)> = Vec::new();

        for piece in pieces {
            let duration = piece.buffer.duration();
            let end = piece.start + duration;
            let overlapping = piece.start < out_point - EPSILON && in_point < end - EPSILON;
            if !overlapping {
                remaining.push(piece);
                continue;
            }

            let rate = piece.buffer.sample_rate();
            let rel_in = (in_point - piece.start).max(0.0);
            let rel_out = (out_point - piece.start).min(duration);
            let s0 = to_samples(rel_in, rate);
            let s1 = to_samples(rel_out, rate).min(piece.buffer.len());

            if s0 > 0 {
                let before = piece.buffer.slice(0..s0);
                remaining.push(Piece {
                    waveform: Arc::new(waveform::overview(&before)),
                    buffer: Arc::new(before),
                    start: piece.start,
                    key: None,
                });
            }

            let overlap = piece.buffer.slice(s0..s1);
            contributions.push((Arc::new(overlap), piece.start + rel_in - in_point));

            if s1 < piece.buffer.len() {
                let after = piece.buffer.slice(s1..piece.buffer.len());
                remaining.push(Piece {
                    waveform: Arc::new(waveform::overview(&after)),
                    buffer: Arc::new(after),
                    start: piece.start + rel_out,
                    key: None,
                });
            }

            if let Some(old_key) = piece.key {
                self.clip_keys
                    .free(old_key)
                    .expect("Clip key must be live while its clip is present");
            }
        }

        let cut = mixer::mix_contributions(&contributions, out_point - in_point)
            .expect("Overlapping cut must produce at least one contribution");

        if remaining.is_empty() {
            if keep_track {
                self.clear_track_audio(key);
            } else {
                self.delete_track(key);
            }
        } else {
            let clips: Vec<Clip> = remaining
                .into_iter()
                .map(|piece| {
                    let clip_key = match piece.key {
                        Some(existing) => existing,
                        None => self.clip_keys.next().expect("Clip keys exhausted"),
                    };
                    Clip::new(clip_key, piece.buffer, piece.waveform, piece.start)
                })
                .collect();
            let track = &mut self.tracks[index];
            track.audio = TrackAudio::Clips(clips);
            track.sort_clips();
            track.recompute_bounds();
        }

        Some(CutBuffer::from_buffer(cut))
    }

    /// Cut `[in_point, out_point]` from every overlapping track.
    ///
    /// With `ripple` the gap is closed: timemarks and envelope points of the
    /// affected tracks are pulled in, and everything later on the timeline
    /// slides left. Without it a silent gap remains.
    pub fn cut_region(
        &mut self,
        in_point: f64,
        out_point: f64,
        ripple: bool,
    ) -> Option<RegionCut> {
        if out_point - in_point <= EPSILON {
            return None;
        }

        let affected: Vec<(TrackKey, f64)> = self
            .tracks
            .iter()
            .filter(|t| t.overlaps_range(in_point, out_point))
            .map(|t| (t.key, t.start))
            .collect();
        if affected.is_empty() {
            return None;
        }

        let mut parts: Vec<(Arc<AudioBuffer>, f64)> = Vec::new();
        for &(key, _) in &affected {
            if let Some(cut) = self.cut_track_region(key, in_point, out_point, true) {
                parts.push((cut.buffer, 0.0));
            }
        }

        if ripple {
            for &(key, orig_start) in &affected {
                if let Some(track) = self.track_mut(key) {
                    let rel_in = (in_point - orig_start).max(0.0);
                    let rel_out = out_point - orig_start;
                    if rel_out > 0.0 {
                        track.close_decoration_gap(rel_in, rel_out);
                    }
                }
            }
            self.slide_tracks_left(out_point, out_point - in_point);
        }

        let mixed = mixer::mix_contributions(&parts, out_point - in_point)?;
        let cut = CutBuffer::from_buffer(mixed);
        Some(RegionCut {
            buffer: cut.buffer,
            waveform: cut.waveform,
            tracks: affected,
        })
    }

    /// Close a gap: move everything at or after `gap_start` left by
    /// `gap_duration`. Tracks that span the gap move only their clips past it.
    pub fn slide_tracks_left(&mut self, gap_start: f64, gap_duration: f64) {
        for track in &mut self.tracks {
            if track.start >= gap_start - EPSILON {
                track.start = (track.start - gap_duration).max(0.0);
                if let Some(clips) = track.clips_mut() {
                    for clip in clips {
                        clip.start = (clip.start - gap_duration).max(0.0);
                    }
                }
                track.recompute_bounds();
            } else if track.end() > gap_start + EPSILON {
                if let Some(clips) = track.clips_mut() {
                    for clip in clips {
                        if clip.start >= gap_start - EPSILON {
                            clip.start -= gap_duration;
                        }
                    }
                }
                track.sort_clips();
                track.recompute_bounds();
            }
        }
    }

    /// Remove a region leaving a silent gap: no slide, decorations untouched.
    pub fn delete_region(&mut self, in_point: f64, out_point: f64) -> Option<RegionCut> {
        self.cut_region(in_point, out_point, false)
    }

    /// Convert a single-buffer track into an equivalent one-clip track.
    pub(crate) fn normalize_to_clips(&mut self, key: TrackKey) -> bool {
        let index = match self.track_index(key) {
            Some(index) => index,
            None => return false,
        };
        match &self.tracks[index].audio {
            TrackAudio::Clips(_) => true,
            TrackAudio::Empty => false,
            TrackAudio::Buffer { buffer, waveform } => {
                let buffer = Arc::clone(buffer);
                let waveform = Arc::clone(waveform);
                let start = self.tracks[index].start;
                let clip_key = self.clip_keys.next().expect("Clip keys exhausted");
                self.tracks[index].audio =
                    TrackAudio::Clips(vec![Clip::new(clip_key, buffer, waveform, start)]);
                true
            }
        }
    }

    /// Split a clip in two at `time` (timeline seconds).
    ///
    /// `time` must fall strictly inside the clip; splitting exactly at an
    /// edge is a no-op. Both halves get new buffers copied from the source.
    pub fn split_clip(
        &mut self,
        key: TrackKey,
        target: ClipTarget,
        time: f64,
    ) -> Option<(ClipKey, ClipKey)> {
        let index = self.track_index(key)?;

        if matches!(target, ClipTarget::Main) && !self.normalize_to_clips(key) {
            return None;
        }

        let clips = self.tracks[index].clips();
        let clip_index = match target {
            ClipTarget::Main => clips
                .iter()
                .position(|c| c.contains_strictly(time))
                .or(if clips.len() == 1 { Some(0) } else { None })?,
            ClipTarget::Clip(clip_key) => clips.iter().position(|c| c.key == clip_key)?,
        };
        let clip = clips[clip_index].clone();
        if !clip.contains_strictly(time) {
            return None;
        }

        let rate = clip.buffer.sample_rate();
        let split_sample = to_samples(time - clip.start, rate).min(clip.buffer.len());

        let left_buffer = clip.buffer.slice(0..split_sample);
        let right_buffer = clip.buffer.slice(split_sample..clip.buffer.len());

        let left_key = self.clip_keys.next().expect("Clip keys exhausted");
        let right_key = self.clip_keys.next().expect("Clip keys exhausted");
        self.clip_keys
            .free(clip.key)
            .expect("Clip key must be live while its clip is present");

        let left_waveform = Arc::new(waveform::overview(&left_buffer));
        let right_waveform = Arc::new(waveform::overview(&right_buffer));
        let left = Clip::new(left_key, Arc::new(left_buffer), left_waveform, clip.start);
        let right = Clip::new(right_key, Arc::new(right_buffer), right_waveform, time);

        let track = &mut self.tracks[index];
        let clips = track
            .clips_mut()
            .expect("Track was normalized to clips above");
        clips[clip_index] = left;
        clips.insert(clip_index + 1, right);
        track.sort_clips();
        track.recompute_bounds();

        if self.selected_clip() == Some((key, clip.key)) {
            self.deselect_clip();
        }

        Some((left_key, right_key))
    }

    /// Insert a buffer as a new clip at the playhead, pushing later content
    /// right.
    ///
    /// A clip under the playhead is split first; every clip, timemark and
    /// envelope point at or after the playhead moves right by the buffer's
    /// duration.
    pub fn insert_clip_at(
        &mut self,
        key: TrackKey,
        playhead: f64,
        buffer: Arc<AudioBuffer>,
    ) -> Option<ClipKey> {
        let index = self.track_index(key)?;
        let paste_duration = buffer.duration();
        if paste_duration <= 0.0 {
            return None;
        }
        let playhead = playhead.max(0.0);
        let orig_start = self.tracks[index].start;

        if self.normalize_to_clips(key) {
            let split_target = self.tracks[index]
                .clips()
                .iter()
                .find(|c| c.contains_strictly(playhead))
                .map(|c| c.key);
            if let Some(clip_key) = split_target {
                self.split_clip(key, ClipTarget::Clip(clip_key), playhead);
            }

            let track = &mut self.tracks[index];
            let clips = track.clips_mut().expect("normalized above");
            for clip in clips.iter_mut() {
                if clip.start >= playhead - EPSILON {
                    clip.start += paste_duration;
                }
            }
        } else {
            // Track without audio: the paste becomes its first clip.
            self.tracks[index].audio = TrackAudio::Clips(Vec::new());
        }

        let clip_key = self.clip_keys.next().expect("Clip keys exhausted");
        let waveform = Arc::new(waveform::overview(&buffer));
        let track = &mut self.tracks[index];
        track
            .clips_mut()
            .expect("clip list ensured above")
            .push(Clip::new(clip_key, buffer, waveform, playhead));
        track.sort_clips();
        track.recompute_bounds();
        track.shift_decorations_right(playhead - orig_start, paste_duration);

        Some(clip_key)
    }

    /// Mix the intersection of `[in_point, out_point]` with every active
    /// track into a single buffer. Returns `None` when nothing overlaps.
    pub fn extract_region(&self, in_point: f64, out_point: f64) -> Option<CutBuffer> {
        if out_point - in_point <= EPSILON {
            return None;
        }

        let mut contributions: Vec<(Arc<AudioBuffer>, f64)> = Vec::new();
        for key in mixer::active_track_keys(&self.tracks) {
            let track = self.track(key).expect("active key comes from tracks");
            let pieces: Vec<(Arc<AudioBuffer>, f64)> = match &track.audio {
                TrackAudio::Empty => Vec::new(),
                TrackAudio::Buffer { buffer, .. } => vec![(Arc::clone(buffer), track.start)],
                TrackAudio::Clips(clips) => clips
                    .iter()
                    .map(|c| (Arc::clone(&c.buffer), c.start))
                    .collect(),
            };

            for (buffer, start) in pieces {
                let duration = buffer.duration();
                let end = start + duration;
                if start >= out_point - EPSILON || end <= in_point + EPSILON {
                    continue;
                }
                let rate = buffer.sample_rate();
                let rel_in = (in_point - start).max(0.0);
                let rel_out = (out_point - start).min(duration);
                let s0 = to_samples(rel_in, rate);
                let s1 = to_samples(rel_out, rate).min(buffer.len());
                let slice = buffer.slice(s0..s1);
                contributions.push((Arc::new(slice), start + rel_in - in_point));
            }
        }

        let mixed = mixer::mix_contributions(&contributions, out_point - in_point)?;
        Some(CutBuffer::from_buffer(mixed))
    }

    /// Move a clip during a drag.
    ///
    /// The implicit clip of a single-buffer track only records its position in
    /// `active_drag`; real clips get their `start` written directly, with the
    /// snap policy applied. Track bounds are not recomputed until
    /// [`TrackStore::finalize_clip_positions`], and the timeline extent is
    /// frozen via `min_timeline_duration` for the whole drag.
    pub fn set_clip_start(
        &mut self,
        key: TrackKey,
        target: ClipTarget,
        new_start: f64,
        snap: bool,
    ) -> bool {
        let Some(index) = self.track_index(key) else {
            return false;
        };

        self.min_timeline_duration = self.min_timeline_duration.max(self.timeline_duration());

        match target {
            ClipTarget::Main => {
                if !matches!(self.tracks[index].audio, TrackAudio::Buffer { .. }) {
                    return false;
                }
                let position = new_start.max(0.0);
                let right_edge = position + self.tracks[index].duration;
                self.active_drag = Some(ActiveDrag {
                    track: key,
                    position,
                });
                self.min_timeline_duration = self.min_timeline_duration.max(right_edge);
                true
            }
            ClipTarget::Clip(clip_key) => {
                let clips = self.tracks[index].clips();
                let Some(clip) = clips.iter().find(|c| c.key == clip_key) else {
                    return false;
                };
                let duration = clip.duration();
                let snapped =
                    snapped_clip_position(clips, Some(clip_key), new_start, duration, snap);

                let clips = self.tracks[index]
                    .clips_mut()
                    .expect("clip found in list above");
                let clip = clips
                    .iter_mut()
                    .find(|c| c.key == clip_key)
                    .expect("clip found in list above");
                clip.start = snapped;

                self.min_timeline_duration = self.min_timeline_duration.max(snapped + duration);
                true
            }
        }
    }

    /// Commit any in-flight drag and unfreeze the timeline extent.
    pub fn finalize_clip_positions(&mut self) {
        if let Some(drag) = self.active_drag.take() {
            if let Some(track) = self.track_mut(drag.track) {
                track.start = drag.position.max(0.0);
            }
        }
        for track in &mut self.tracks {
            if matches!(track.audio, TrackAudio::Clips(_)) {
                track.sort_clips();
                track.recompute_bounds();
            }
        }
        self.min_timeline_duration = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::timeline::TrackStore;
    use crate::editor::utils::key_generator::Key;

    const RATE: u32 = 44_100;

    fn tone_buffer(seconds: f64) -> Arc<AudioBuffer> {
        let frames = (seconds * f64::from(RATE)).round() as usize;
        let samples: Vec<f32> = (0..frames)
            .map(|i| (i as f32 * 0.001).sin() * 0.5)
            .collect();
        Arc::new(AudioBuffer::new(RATE, vec![samples]))
    }

    fn store_with_track(seconds: f64, start: f64) -> (TrackStore, TrackKey) {
        let mut store = TrackStore::new();
        let key = store.create_track_from_buffer(
            tone_buffer(seconds),
            None,
            "t".into(),
            start,
            None,
        );
        (store, key)
    }

    fn clip_of(buffer: Arc<AudioBuffer>, key: u32, start: f64) -> Clip {
        let waveform = Arc::new(waveform::overview(&buffer));
        Clip::new(ClipKey::new(key), buffer, waveform, start)
    }

    #[test]
    fn snap_is_off_by_request() {
        let clips = [clip_of(tone_buffer(1.0), 0, 2.0)];
        assert_eq!(snapped_clip_position(&clips, None, 2.05, 1.0, false), 2.05);
        assert_eq!(snapped_clip_position(&clips, None, -3.0, 1.0, false), 0.0);
    }

    #[test]
    fn snaps_end_to_start_first() {
        let clips = [clip_of(tone_buffer(1.0), 0, 2.0)];
        // Desired end 2.05 is within threshold of their start at 2.0
        let snapped = snapped_clip_position(&clips, None, 1.05, 1.0, true);
        assert!((snapped - 1.0).abs() < 1e-9);
    }

    #[test]
    fn snaps_start_to_end() {
        let clips = [clip_of(tone_buffer(1.0), 0, 2.0)];
        let snapped = snapped_clip_position(&clips, None, 3.08, 1.0, true);
        assert!((snapped - 3.0).abs() < 1e-9);
    }

    #[test]
    fn overlap_pushes_to_nearer_side() {
        let clips = [clip_of(tone_buffer(2.0), 0, 2.0)];
        // Desired start deep inside, closer to their end
        let snapped = snapped_clip_position(&clips, None, 3.5, 1.0, true);
        assert!((snapped - 4.0).abs() < 1e-9);
        // Closer to their start
        let snapped = snapped_clip_position(&clips, None, 1.4, 1.0, true);
        assert!((snapped - 1.0).abs() < 1e-9);
    }

    #[test]
    fn single_clip_cut_splits_around_region() {
        // S1: 10 s at 44.1 kHz, cut [3, 5]
        let (mut store, key) = store_with_track(10.0, 0.0);
        let pre_samples: usize = 10 * RATE as usize;

        let cut = store.cut_track_region(key, 3.0, 5.0, true).unwrap();
        assert_eq!(cut.buffer.len(), 2 * RATE as usize);

        let track = store.track(key).unwrap();
        let clips = track.clips();
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].start, 0.0);
        assert_eq!(clips[0].duration(), 3.0);
        assert_eq!(clips[1].start, 5.0);
        assert_eq!(clips[1].duration(), 5.0);
        assert_eq!(track.start, 0.0);
        assert_eq!(track.duration, 10.0);

        let post_samples: usize = clips.iter().map(|c| c.buffer.len()).sum();
        assert_eq!(post_samples, pre_samples - 2 * RATE as usize);
    }

    #[test]
    fn cut_entire_track_keeps_shell_or_deletes() {
        let (mut store, key) = store_with_track(2.0, 1.0);
        let cut = store.cut_track_region(key, 0.0, 4.0, true).unwrap();
        assert_eq!(cut.buffer.len(), 4 * RATE as usize);
        assert!(!store.track(key).unwrap().has_audio());

        let (mut store, key) = store_with_track(2.0, 1.0);
        store.cut_track_region(key, 0.0, 4.0, false).unwrap();
        assert!(store.track(key).is_none());
    }

    #[test]
    fn degenerate_or_missing_ranges_are_noops() {
        let (mut store, key) = store_with_track(4.0, 0.0);
        assert!(store.cut_track_region(key, 3.0, 3.0, true).is_none());
        assert!(store.cut_track_region(key, 5.0, 4.0, true).is_none());
        assert!(store.cut_track_region(key, 6.0, 8.0, true).is_none());
        assert_eq!(store.track(key).unwrap().clips().len(), 0);
    }

    #[test]
    fn ripple_closes_the_gap_across_tracks() {
        // S2: A [0..4], B [2..6], ripple [3, 5]
        let mut store = TrackStore::new();
        let a = store.create_track_from_buffer(tone_buffer(4.0), None, "a".into(), 0.0, None);
        let b = store.create_track_from_buffer(tone_buffer(4.0), None, "b".into(), 2.0, None);
        let before = store.timeline_duration();

        let cut = store.cut_region(3.0, 5.0, true).unwrap();
        assert_eq!(cut.buffer.duration(), 2.0);
        assert_eq!(store.timeline_duration(), before - 2.0);

        let a = store.track(a).unwrap();
        assert_eq!(a.clips().len(), 1);
        assert_eq!(a.clips()[0].start, 0.0);
        assert_eq!(a.clips()[0].duration(), 3.0);

        let b = store.track(b).unwrap();
        assert_eq!(b.clips().len(), 2);
        assert_eq!(b.clips()[0].start, 2.0);
        assert_eq!(b.clips()[0].duration(), 1.0);
        assert_eq!(b.clips()[1].start, 3.0);
        assert_eq!(b.clips()[1].duration(), 1.0);
    }

    #[test]
    fn delete_leaves_a_silent_gap() {
        let (mut store, key) = store_with_track(10.0, 0.0);
        store.delete_region(3.0, 5.0).unwrap();

        let track = store.track(key).unwrap();
        assert_eq!(track.clips().len(), 2);
        assert_eq!(track.clips()[1].start, 5.0);
        assert_eq!(store.timeline_duration(), 10.0);
    }

    #[test]
    fn split_inside_makes_two_clips() {
        let (mut store, key) = store_with_track(10.0, 0.0);
        let (left, right) = store.split_clip(key, ClipTarget::Main, 4.0).unwrap();

        let track = store.track(key).unwrap();
        let clips = track.clips();
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].key, left);
        assert_eq!(clips[0].duration(), 4.0);
        assert_eq!(clips[1].key, right);
        assert_eq!(clips[1].start, 4.0);
        assert_eq!(clips[1].duration(), 6.0);
    }

    #[test]
    fn split_at_edge_is_rejected() {
        let (mut store, key) = store_with_track(10.0, 2.0);
        assert!(store.split_clip(key, ClipTarget::Main, 2.0).is_none());
        assert!(store.split_clip(key, ClipTarget::Main, 12.0).is_none());
        assert_eq!(store.track(key).unwrap().clips().len(), 0);
    }

    #[test]
    fn insert_at_playhead_splits_and_shifts() {
        // S3: clip [0..10], paste 2 s at 4.0
        let (mut store, key) = store_with_track(10.0, 0.0);
        store.insert_clip_at(key, 4.0, tone_buffer(2.0)).unwrap();

        let track = store.track(key).unwrap();
        let clips = track.clips();
        assert_eq!(clips.len(), 3);
        assert_eq!((clips[0].start, clips[0].duration()), (0.0, 4.0));
        assert_eq!((clips[1].start, clips[1].duration()), (4.0, 2.0));
        assert_eq!((clips[2].start, clips[2].duration()), (6.0, 6.0));
        assert_eq!(store.timeline_duration(), 12.0);
    }

    #[test]
    fn insert_shifts_decorations() {
        use crate::editor::timeline::TimeMarkSource;

        let (mut store, key) = store_with_track(10.0, 0.0);
        store.add_timemark(key, 2.0, "before".into(), TimeMarkSource::Manual, None);
        store.add_timemark(key, 6.0, "after".into(), TimeMarkSource::Manual, None);
        store.add_volume_point(key, 6.0, 0.5);

        store.insert_clip_at(key, 4.0, tone_buffer(2.0)).unwrap();

        let track = store.track(key).unwrap();
        assert_eq!(track.timemarks[0].time, 2.0);
        assert_eq!(track.timemarks[1].time, 8.0);
        assert_eq!(track.envelope[0].time, 8.0);
    }

    #[test]
    fn insert_into_empty_track_is_first_clip() {
        let mut store = TrackStore::new();
        let key = store.add_empty_track("t".into());
        store.insert_clip_at(key, 3.0, tone_buffer(1.0)).unwrap();

        let track = store.track(key).unwrap();
        assert_eq!(track.clips().len(), 1);
        assert_eq!(track.start, 3.0);
        assert_eq!(track.duration, 1.0);
    }

    #[test]
    fn extract_region_mixes_active_tracks() {
        let mut store = TrackStore::new();
        store.create_track_from_buffer(tone_buffer(4.0), None, "a".into(), 0.0, None);
        let b = store.create_track_from_buffer(tone_buffer(4.0), None, "b".into(), 2.0, None);
        store.set_track_muted(b, true);

        let cut = store.extract_region(1.0, 3.0).unwrap();
        assert_eq!(cut.buffer.duration(), 2.0);

        // Muted track contributes nothing: samples past A's end at 4.0 are silent
        assert!(store.extract_region(4.5, 5.0).is_none());
    }

    #[test]
    fn drag_freezes_timeline_extent() {
        let (mut store, key) = store_with_track(10.0, 0.0);
        store.split_clip(key, ClipTarget::Main, 5.0).unwrap();
        let clip_key = store.track(key).unwrap().clips()[1].key;

        assert_eq!(store.timeline_duration(), 10.0);
        assert!(store.set_clip_start(key, ClipTarget::Clip(clip_key), 2.0, false));
        // Clip moved left mid-drag, extent must not shrink
        assert_eq!(store.timeline_duration(), 10.0);

        store.finalize_clip_positions();
        assert_eq!(store.timeline_duration(), 7.0);
    }

    #[test]
    fn main_clip_drag_goes_through_active_drag() {
        let (mut store, key) = store_with_track(4.0, 0.0);
        assert!(store.set_clip_start(key, ClipTarget::Main, 8.0, false));

        assert_eq!(store.track(key).unwrap().start, 0.0);
        assert_eq!(store.timeline_duration(), 12.0);

        store.finalize_clip_positions();
        assert_eq!(store.track(key).unwrap().start, 8.0);
        assert_eq!(store.active_drag(), None);
    }

    #[test]
    fn snap_enabled_drags_never_overlap() {
        let (mut store, key) = store_with_track(10.0, 0.0);
        store.split_clip(key, ClipTarget::Main, 5.0).unwrap();
        let second = store.track(key).unwrap().clips()[1].key;

        assert!(store.set_clip_start(key, ClipTarget::Clip(second), 2.0, true));
        store.finalize_clip_positions();

        let clips = store.track(key).unwrap().clips();
        for pair in clips.windows(2) {
            assert!(pair[0].end() <= pair[1].start + 1e-9);
        }
    }
}
