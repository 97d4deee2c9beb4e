mod clip;
mod envelope;
mod timemark;
mod track;

use std::{path::PathBuf, sync::Arc};

pub use clip::{Clip, ClipKey, ClipTarget};
pub use envelope::{value_at as envelope_value_at, VolumePoint, VolumePointKey};
pub use timemark::{TimeMark, TimeMarkKey, TimeMarkSource};
pub use track::{
    ImportState, ImportStatus, Track, TrackAudio, TrackKey, MAX_GAIN, TRACK_COLORS,
};

use super::buffer::AudioBuffer;
use super::codec::AudioMetadata;
use super::utils::key_generator::KeyGenerator;
use super::waveform;

/// Which track(s) the UI considers selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TrackSelection {
    #[default]
    None,
    /// Composite view over all tracks.
    All,
    Track(TrackKey),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Single,
    Composite,
}

/// In-flight drag of a single-buffer track's implicit clip.
///
/// The drag position lives here instead of in `track.start`, so mid-drag
/// nothing downstream of track bounds moves; `finalize_clip_positions`
/// commits it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActiveDrag {
    pub track: TrackKey,
    pub position: f64,
}

/// Everything of the track store that history snapshots capture.
/// Buffers and peak arrays inside are shared, the rest is deep-cloned.
#[derive(Clone)]
pub struct TrackStoreState {
    pub tracks: Vec<Track>,
    pub selected_track: TrackSelection,
    pub selected_clip: Option<(TrackKey, ClipKey)>,
    pub view_mode: ViewMode,
}

/// The canonical timeline: tracks, their clips, selection, and the derived
/// timeline duration.
pub struct TrackStore {
    pub(crate) tracks: Vec<Track>,

    track_keys: KeyGenerator<TrackKey>,
    pub(crate) clip_keys: KeyGenerator<ClipKey>,
    mark_keys: KeyGenerator<TimeMarkKey>,
    point_keys: KeyGenerator<VolumePointKey>,

    selected_track: TrackSelection,
    selected_clip: Option<(TrackKey, ClipKey)>,
    view_mode: ViewMode,

    pub(crate) active_drag: Option<ActiveDrag>,
    pub(crate) min_timeline_duration: f64,

    next_color: usize,
}
impl TrackStore {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            track_keys: KeyGenerator::new(),
            clip_keys: KeyGenerator::new(),
            mark_keys: KeyGenerator::new(),
            point_keys: KeyGenerator::new(),
            selected_track: TrackSelection::None,
            selected_clip: None,
            view_mode: ViewMode::Single,
            active_drag: None,
            min_timeline_duration: 0.0,
            next_color: 0,
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, key: TrackKey) -> Option<&Track> {
        self.tracks.iter().find(|t| t.key == key)
    }

    pub fn track_mut(&mut self, key: TrackKey) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.key == key)
    }

    pub(crate) fn track_index(&self, key: TrackKey) -> Option<usize> {
        self.tracks.iter().position(|t| t.key == key)
    }

    pub fn selected_track(&self) -> TrackSelection {
        self.selected_track
    }

    pub fn selected_clip(&self) -> Option<(TrackKey, ClipKey)> {
        self.selected_clip
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn active_drag(&self) -> Option<ActiveDrag> {
        self.active_drag
    }

    /// The track's start position, using the drag position while its implicit
    /// clip is being dragged.
    pub fn effective_track_start(&self, key: TrackKey) -> Option<f64> {
        let track = self.track(key)?;
        match self.active_drag {
            Some(drag) if drag.track == key => Some(drag.position),
            _ => Some(track.start),
        }
    }

    /// Derived extent of the timeline in seconds.
    ///
    /// Uses drag positions instead of committed track starts mid-drag, and
    /// never shrinks below `min_timeline_duration` so the visible extent
    /// stays frozen while a clip is dragged.
    pub fn timeline_duration(&self) -> f64 {
        let mut max_end: f64 = 0.0;
        for track in &self.tracks {
            let start = match self.active_drag {
                Some(drag) if drag.track == track.key => drag.position,
                _ => track.start,
            };
            max_end = max_end.max(start + track.duration);
        }
        max_end.max(self.min_timeline_duration).max(0.0)
    }

    fn next_color(&mut self) -> String {
        let color = TRACK_COLORS[self.next_color % TRACK_COLORS.len()];
        self.next_color += 1;
        color.to_owned()
    }

    /// Append a track holding a single decoded buffer.
    pub fn create_track_from_buffer(
        &mut self,
        buffer: Arc<AudioBuffer>,
        waveform: Option<Arc<Vec<f32>>>,
        name: String,
        track_start: f64,
        source_path: Option<PathBuf>,
    ) -> TrackKey {
        let key = self.track_keys.next().expect("Track keys exhausted");
        let color = self.next_color();
        let mut track = Track::new(key, name, color);
        let waveform =
            waveform.unwrap_or_else(|| Arc::new(waveform::overview(&buffer)));
        track.start = track_start.max(0.0);
        track.duration = buffer.duration();
        track.audio = TrackAudio::Buffer { buffer, waveform };
        track.source_path = source_path;
        self.tracks.push(track);
        key
    }

    /// Append a placeholder track for an import in flight.
    pub fn create_importing_track(
        &mut self,
        name: String,
        metadata: &AudioMetadata,
        track_start: f64,
        source_path: Option<PathBuf>,
    ) -> TrackKey {
        let key = self.track_keys.next().expect("Track keys exhausted");
        let color = self.next_color();
        let mut track = Track::new(key, name, color);
        track.start = track_start.max(0.0);
        track.duration = metadata.duration;
        track.source_path = source_path;
        track.import = ImportState::Importing {
            waveform: vec![0.0; waveform::OVERVIEW_BUCKETS * 2],
            progress: 0.0,
        };
        self.tracks.push(track);
        key
    }

    /// Write a chunk of streamed overview peaks into an importing track.
    /// Chunks arrive in bucket order.
    pub fn update_import_waveform(
        &mut self,
        key: TrackKey,
        start_bucket: usize,
        peaks: &[f32],
        progress: f32,
    ) -> bool {
        let Some(track) = self.track_mut(key) else {
            return false;
        };
        let ImportState::Importing { waveform, progress: p } = &mut track.import else {
            return false;
        };

        let offset = start_bucket * 2;
        if offset > waveform.len() {
            return false;
        }
        let available = waveform.len() - offset;
        let copy = peaks.len().min(available);
        waveform[offset..offset + copy].copy_from_slice(&peaks[..copy]);
        *p = progress;
        true
    }

    /// Commit the final overview and move the track to the decoding stage.
    /// Never regresses a track that is already ready.
    pub fn finalize_import_waveform(
        &mut self,
        key: TrackKey,
        waveform: Vec<f32>,
        actual_duration: f64,
    ) -> bool {
        let Some(track) = self.track_mut(key) else {
            return false;
        };
        if track.import.is_ready() {
            return false;
        }
        track.import = ImportState::Decoding {
            waveform,
            progress: 0.0,
        };
        track.duration = actual_duration;
        true
    }

    pub fn update_import_decode_progress(&mut self, key: TrackKey, progress: f32) -> bool {
        let Some(track) = self.track_mut(key) else {
            return false;
        };
        match &mut track.import {
            ImportState::Decoding { progress: p, .. } => {
                *p = progress;
                true
            }
            _ => false,
        }
    }

    /// Attach the decoded buffer, completing the import.
    pub fn set_import_buffer(&mut self, key: TrackKey, buffer: Arc<AudioBuffer>) -> bool {
        let Some(track) = self.track_mut(key) else {
            return false;
        };
        let waveform = match std::mem::replace(&mut track.import, ImportState::Ready) {
            ImportState::Importing { waveform, .. } | ImportState::Decoding { waveform, .. } => {
                Arc::new(waveform)
            }
            ImportState::Ready => Arc::new(waveform::overview(&buffer)),
        };
        track.duration = buffer.duration();
        track.audio = TrackAudio::Buffer { buffer, waveform };
        true
    }

    pub fn add_empty_track(&mut self, name: String) -> TrackKey {
        let key = self.track_keys.next().expect("Track keys exhausted");
        let color = self.next_color();
        self.tracks.push(Track::new(key, name, color));
        key
    }

    pub fn delete_track(&mut self, key: TrackKey) -> bool {
        let Some(index) = self.track_index(key) else {
            return false;
        };
        let track = self.tracks.remove(index);
        self.track_keys
            .free(key)
            .expect("Track key must be live while its track is present");
        for clip in track.clips() {
            let _ = self.clip_keys.free(clip.key);
        }

        if self.selected_track == TrackSelection::Track(key) {
            self.selected_track = TrackSelection::None;
        }
        if matches!(self.selected_clip, Some((t, _)) if t == key) {
            self.selected_clip = None;
        }
        if matches!(self.active_drag, Some(drag) if drag.track == key) {
            self.active_drag = None;
        }
        true
    }

    /// Reduce a track to an audio-less shell, keeping name, color and mix
    /// settings.
    pub fn clear_track_audio(&mut self, key: TrackKey) -> bool {
        let clip_keys: Vec<ClipKey> = match self.track(key) {
            Some(track) => track.clips().iter().map(|c| c.key).collect(),
            None => return false,
        };
        for clip_key in clip_keys {
            let _ = self.clip_keys.free(clip_key);
        }
        let track = self.track_mut(key).expect("track existed above");
        track.audio = TrackAudio::Empty;
        track.duration = 0.0;
        track.source_path = None;
        true
    }

    pub fn rename_track(&mut self, key: TrackKey, name: String) -> bool {
        match self.track_mut(key) {
            Some(track) => {
                track.name = name;
                true
            }
            None => false,
        }
    }

    pub fn set_track_muted(&mut self, key: TrackKey, muted: bool) -> bool {
        match self.track_mut(key) {
            Some(track) => {
                track.muted = muted;
                true
            }
            None => false,
        }
    }

    /// Solo is exclusive: enabling it on one track clears it everywhere else.
    pub fn set_track_solo(&mut self, key: TrackKey, solo: bool) -> bool {
        if self.track(key).is_none() {
            return false;
        }
        if solo {
            for track in &mut self.tracks {
                track.solo = track.key == key;
            }
        } else if let Some(track) = self.track_mut(key) {
            track.solo = false;
        }
        true
    }

    pub fn set_track_volume(&mut self, key: TrackKey, volume: f32) -> bool {
        match self.track_mut(key) {
            Some(track) => {
                track.volume = volume.clamp(0.0, MAX_GAIN);
                true
            }
            None => false,
        }
    }

    pub fn reorder_track(&mut self, from: usize, to: usize) -> bool {
        if from >= self.tracks.len() || to >= self.tracks.len() {
            return false;
        }
        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);
        true
    }

    /// Select a track (or the composite view); clears any clip selection.
    pub fn select_track(&mut self, selection: TrackSelection) {
        if let TrackSelection::Track(key) = selection {
            if self.track(key).is_none() {
                return;
            }
        }
        self.selected_track = selection;
        self.selected_clip = None;
        self.view_mode = match selection {
            TrackSelection::All => ViewMode::Composite,
            _ => ViewMode::Single,
        };
    }

    pub fn select_clip(&mut self, track: TrackKey, clip: ClipKey) -> bool {
        let valid = self
            .track(track)
            .map(|t| t.clips().iter().any(|c| c.key == clip))
            .unwrap_or(false);
        if !valid {
            return false;
        }
        self.selected_clip = Some((track, clip));
        true
    }

    pub fn deselect_clip(&mut self) {
        self.selected_clip = None;
    }

    pub fn add_timemark(
        &mut self,
        key: TrackKey,
        time: f64,
        label: String,
        source: TimeMarkSource,
        color: Option<String>,
    ) -> Option<TimeMarkKey> {
        if self.track(key).is_none() {
            return None;
        }
        let mark_key = self.mark_keys.next().expect("Timemark keys exhausted");
        let track = self.track_mut(key).expect("track existed above");
        track.timemarks.push(TimeMark {
            key: mark_key,
            time: time.max(0.0),
            label,
            source,
            color,
        });
        Some(mark_key)
    }

    /// Move a timemark. Not snapshotted by itself; drags batch around it.
    pub fn update_timemark_time(&mut self, key: TrackKey, mark: TimeMarkKey, time: f64) -> bool {
        let Some(track) = self.track_mut(key) else {
            return false;
        };
        match track.timemarks.iter_mut().find(|m| m.key == mark) {
            Some(found) => {
                found.time = time.max(0.0);
                true
            }
            None => false,
        }
    }

    pub fn remove_timemark(&mut self, key: TrackKey, mark: TimeMarkKey) -> bool {
        let Some(track) = self.track_mut(key) else {
            return false;
        };
        let before = track.timemarks.len();
        track.timemarks.retain(|m| m.key != mark);
        let removed = track.timemarks.len() != before;
        if removed {
            let _ = self.mark_keys.free(mark);
        }
        removed
    }

    pub fn add_volume_point(
        &mut self,
        key: TrackKey,
        time: f64,
        value: f32,
    ) -> Option<VolumePointKey> {
        if self.track(key).is_none() {
            return None;
        }
        let point_key = self.point_keys.next().expect("Envelope keys exhausted");
        let track = self.track_mut(key).expect("track existed above");
        envelope::sorted_insert(
            &mut track.envelope,
            VolumePoint {
                key: point_key,
                time: time.max(0.0),
                value: value.clamp(0.0, MAX_GAIN),
            },
        );
        Some(point_key)
    }

    /// Move/update an envelope point. Not snapshotted by itself.
    pub fn update_volume_point(
        &mut self,
        key: TrackKey,
        point: VolumePointKey,
        time: f64,
        value: f32,
    ) -> bool {
        let Some(track) = self.track_mut(key) else {
            return false;
        };
        let Some(index) = track.envelope.iter().position(|p| p.key == point) else {
            return false;
        };
        let mut updated = track.envelope.remove(index);
        updated.time = time.max(0.0);
        updated.value = value.clamp(0.0, MAX_GAIN);
        envelope::sorted_insert(&mut track.envelope, updated);
        true
    }

    pub fn remove_volume_point(&mut self, key: TrackKey, point: VolumePointKey) -> bool {
        let Some(track) = self.track_mut(key) else {
            return false;
        };
        let before = track.envelope.len();
        track.envelope.retain(|p| p.key != point);
        let removed = track.envelope.len() != before;
        if removed {
            let _ = self.point_keys.free(point);
        }
        removed
    }

    /// Envelope gain at a track-relative time; `track.volume` when the
    /// envelope is empty.
    pub fn volume_at_time(&self, key: TrackKey, time: f64) -> Option<f32> {
        let track = self.track(key)?;
        Some(envelope::value_at(&track.envelope, track.volume, time))
    }

    /// Snapshot for history. Buffers inside clips are shared by reference.
    pub fn state(&self) -> TrackStoreState {
        TrackStoreState {
            tracks: self.tracks.clone(),
            selected_track: self.selected_track,
            selected_clip: self.selected_clip,
            view_mode: self.view_mode,
        }
    }

    /// Replace the whole store content with a snapshot, rebuilding key
    /// bookkeeping from the restored tracks.
    pub fn restore(&mut self, state: TrackStoreState) {
        self.tracks = state.tracks;
        self.selected_track = state.selected_track;
        self.selected_clip = state.selected_clip;
        self.view_mode = state.view_mode;
        self.active_drag = None;
        self.min_timeline_duration = 0.0;

        self.track_keys = KeyGenerator::from_keys(self.tracks.iter().map(|t| t.key));
        self.clip_keys = KeyGenerator::from_keys(
            self.tracks
                .iter()
                .flat_map(|t| t.clips().iter().map(|c| c.key)),
        );
        self.mark_keys = KeyGenerator::from_keys(
            self.tracks
                .iter()
                .flat_map(|t| t.timemarks.iter().map(|m| m.key)),
        );
        self.point_keys = KeyGenerator::from_keys(
            self.tracks
                .iter()
                .flat_map(|t| t.envelope.iter().map(|p| p.key)),
        );
    }
}
impl Default for TrackStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(seconds: f64) -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::silent(1000, 1, (seconds * 1000.0) as usize))
    }

    fn store_with_track(seconds: f64) -> (TrackStore, TrackKey) {
        let mut store = TrackStore::new();
        let key =
            store.create_track_from_buffer(buffer(seconds), None, "t".into(), 0.0, None);
        (store, key)
    }

    #[test]
    fn colors_cycle() {
        let mut store = TrackStore::new();
        for _ in 0..TRACK_COLORS.len() + 1 {
            store.add_empty_track("t".into());
        }
        assert_eq!(store.tracks()[0].color, store.tracks()[TRACK_COLORS.len()].color);
        assert_ne!(store.tracks()[0].color, store.tracks()[1].color);
    }

    #[test]
    fn timeline_duration_is_derived() {
        let mut store = TrackStore::new();
        store.create_track_from_buffer(buffer(4.0), None, "a".into(), 0.0, None);
        store.create_track_from_buffer(buffer(4.0), None, "b".into(), 2.0, None);
        assert_eq!(store.timeline_duration(), 6.0);
    }

    #[test]
    fn timeline_duration_follows_drag() {
        let (mut store, key) = store_with_track(4.0);
        store.active_drag = Some(ActiveDrag {
            track: key,
            position: 10.0,
        });
        assert_eq!(store.timeline_duration(), 14.0);
        assert_eq!(store.track(key).unwrap().start, 0.0);
    }

    #[test]
    fn solo_is_exclusive() {
        let mut store = TrackStore::new();
        let a = store.add_empty_track("a".into());
        let b = store.add_empty_track("b".into());

        store.set_track_solo(a, true);
        store.set_track_solo(b, true);

        assert!(!store.track(a).unwrap().solo);
        assert!(store.track(b).unwrap().solo);

        store.set_track_solo(b, false);
        assert!(!store.track(a).unwrap().solo);
        assert!(!store.track(b).unwrap().solo);
    }

    #[test]
    fn selecting_track_clears_clip_selection() {
        let (mut store, key) = store_with_track(2.0);
        store.selected_clip = Some((key, ClipKey::new(0)));
        store.select_track(TrackSelection::All);

        assert_eq!(store.selected_clip(), None);
        assert_eq!(store.view_mode(), ViewMode::Composite);
    }

    use crate::editor::utils::key_generator::Key;

    #[test]
    fn import_lifecycle() {
        let mut store = TrackStore::new();
        let metadata = AudioMetadata {
            duration: 3.0,
            sample_rate: 1000,
            channels: 1,
            bit_depth: 16,
            format: "wav".into(),
        };
        let key = store.create_importing_track("t".into(), &metadata, 0.0, None);
        assert_eq!(store.track(key).unwrap().import_status(), ImportStatus::Importing);
        assert_eq!(store.track(key).unwrap().duration, 3.0);

        assert!(store.update_import_waveform(key, 0, &[0.0, 1.0], 0.5));
        assert!(store.finalize_import_waveform(key, vec![0.0; 4], 2.5));
        assert_eq!(store.track(key).unwrap().import_status(), ImportStatus::Decoding);
        assert_eq!(store.track(key).unwrap().duration, 2.5);

        assert!(store.update_import_decode_progress(key, 0.7));
        assert!(store.set_import_buffer(key, buffer(2.5)));
        assert_eq!(store.track(key).unwrap().import_status(), ImportStatus::Ready);

        // Ready is terminal; a late finalize must not regress it
        assert!(!store.finalize_import_waveform(key, vec![], 1.0));
        assert_eq!(store.track(key).unwrap().import_status(), ImportStatus::Ready);
    }

    #[test]
    fn envelope_interpolation_through_store() {
        let (mut store, key) = store_with_track(4.0);
        store.add_volume_point(key, 0.0, 1.0);
        store.add_volume_point(key, 2.0, 0.0);

        assert_eq!(store.volume_at_time(key, 1.0), Some(0.5));
        assert_eq!(store.volume_at_time(key, 3.0), Some(0.0));
    }

    #[test]
    fn unknown_keys_are_soft_noops() {
        let mut store = TrackStore::new();
        let ghost = TrackKey::new(99);
        assert!(!store.delete_track(ghost));
        assert!(!store.rename_track(ghost, "x".into()));
        assert!(!store.set_track_muted(ghost, true));
        assert_eq!(store.volume_at_time(ghost, 0.0), None);
    }

    #[test]
    fn state_round_trip() {
        let (mut store, key) = store_with_track(4.0);
        store.add_volume_point(key, 1.0, 0.5);
        let state = store.state();

        store.delete_track(key);
        assert!(store.tracks().is_empty());

        store.restore(state);
        assert_eq!(store.tracks().len(), 1);
        assert_eq!(store.tracks()[0].key, key);
        assert_eq!(store.tracks()[0].envelope.len(), 1);
    }
}
