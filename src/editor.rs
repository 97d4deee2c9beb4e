//! The editor core: one facade owning the timeline store, edit engine,
//! transcription table, history, playback controller and meters.
//!
//! All mutations go through [`Editor`] methods so history snapshots and
//! transcription re-timing stay in lockstep with the timeline. External
//! services (codec, render engine, speech model) are injected as trait
//! objects; built-in implementations cover the common cases.

mod buffer;
mod codec;
mod edit;
mod engine;
mod history;
mod meter;
mod mixer;
mod playback;
mod project;
mod timeline;
mod transcription;
mod utils;
mod wav;
mod waveform;

use std::{
    collections::HashMap,
    error::Error,
    fmt::Display,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::warn;

pub use buffer::{AudioBuffer, AudioBufferKey, BufferRegistry, UnknownBufferError};
pub use codec::{
    AudioMetadata, CodecError, CodecEvent, CodecService, ImportSessionKey, LoadedAudio,
    SymphoniaCodec, MP3_BITRATES,
};
pub use edit::{snapped_clip_position, CutBuffer, RegionCut, SNAP_THRESHOLD};
pub use engine::{
    config_hash, EngineClip, EngineConfig, EngineError, EngineTrack, MeterFrame, MeterLevels,
    OfflineEngine, RenderEngine, StreamEngine,
};
pub use history::{History, Snapshot, MAX_HISTORY};
pub use meter::{MeterBank, MeterState, METER_DECAY};
pub use mixer::{active_track_keys, mix_contributions, mix_sources, mixdown, MixSource};
pub use playback::{HoldMode, LoopMode, PlaybackController, TimelineView, MAX_SPEED};
pub use project::{
    relativize, resolve, ProjectError, ProjectFile, ProjectSelection, ProjectTrack,
    PROJECT_VERSION,
};
pub use timeline::{
    envelope_value_at, ActiveDrag, Clip, ClipKey, ClipTarget, ImportState, ImportStatus,
    TimeMark, TimeMarkKey, TimeMarkSource, Track, TrackAudio, TrackKey, TrackSelection,
    TrackStore, TrackStoreState, ViewMode, VolumePoint, VolumePointKey, MAX_GAIN, TRACK_COLORS,
};
pub use transcription::{
    AdjustedWord, ModelError, SidecarError, SpeechModel, SpokenWord, TrackTranscription,
    TranscriptionResult, TranscriptionSidecar, TranscriptionStore, Word, WordAdjustment, WordId,
};
pub use wav::{
    encode_wav, sample_to_i16, WavEncodeError, WavFormat, MAX_WAV_BYTES, MAX_WAV_SECONDS,
};
pub use waveform::{
    extract_peaks, needs_hi_res, WaveformCache, MAX_HI_RES_BUCKETS, OVERVIEW_BUCKETS,
};

/// Internally used sample format.
pub type Sample = f32;

/// Tolerance for edge comparisons in timeline seconds (1 ms).
pub(crate) const EPSILON: f64 = 1e-3;

/// Selections shorter than this are rejected.
pub const MIN_SELECTION_DURATION: f64 = 0.01;

/// The global selection and optional in/out points, in timeline seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectionState {
    pub start: f64,
    pub end: f64,
    pub in_point: Option<f64>,
    pub out_point: Option<f64>,
}
impl Default for SelectionState {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 0.0,
            in_point: None,
            out_point: None,
        }
    }
}

/// Detected silence regions and the flag for compressing them on export.
/// Export stays a thin wrapper over the codec service, driven by
/// [`SilenceState::kept_ranges`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SilenceState {
    pub regions: Vec<(f64, f64)>,
    pub compression_enabled: bool,
}
impl SilenceState {
    /// Invert the silence regions over `[0, duration]`.
    pub fn kept_ranges(&self, duration: f64) -> Vec<(f64, f64)> {
        let mut regions = self.regions.clone();
        regions.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut kept = Vec::new();
        let mut cursor = 0.0;
        for &(start, end) in &regions {
            let start = start.clamp(0.0, duration);
            let end = end.clamp(0.0, duration);
            if start > cursor + EPSILON {
                kept.push((cursor, start));
            }
            cursor = cursor.max(end);
        }
        if cursor + EPSILON < duration {
            kept.push((cursor, duration));
        }
        kept
    }
}

pub struct Editor {
    registry: BufferRegistry,
    waveforms: WaveformCache,
    store: TrackStore,
    transcriptions: TranscriptionStore,
    history: History,
    selection: SelectionState,
    silence: SilenceState,
    playback: PlaybackController,
    meters: MeterBank,

    codec: Box<dyn CodecService>,
    speech_model: Option<Box<dyn SpeechModel>>,

    /// In-flight import sessions and the placeholder tracks waiting on them.
    imports: HashMap<ImportSessionKey, TrackKey>,
    /// Buffers the registry holds on behalf of whole tracks.
    source_buffers: HashMap<TrackKey, AudioBufferKey>,
    clipboard: Option<CutBuffer>,
}
impl Editor {
    pub fn new(codec: Box<dyn CodecService>, render_engine: Box<dyn RenderEngine>) -> Self {
        Self {
            registry: BufferRegistry::new(),
            waveforms: WaveformCache::new(),
            store: TrackStore::new(),
            transcriptions: TranscriptionStore::new(),
            history: History::new(),
            selection: SelectionState::default(),
            silence: SilenceState::default(),
            playback: PlaybackController::new(render_engine),
            meters: MeterBank::new(),
            codec,
            speech_model: None,
            imports: HashMap::new(),
            source_buffers: HashMap::new(),
            clipboard: None,
        }
    }

    /// An editor with the built-in codec and the offline engine; no audio
    /// device required.
    pub fn headless() -> Self {
        Self::new(
            Box::new(SymphoniaCodec::new()),
            Box::new(OfflineEngine::new(EngineConfig::default())),
        )
    }

    pub fn set_speech_model(&mut self, model: Box<dyn SpeechModel>) {
        self.speech_model = Some(model);
    }

    // ───────────────────────── state access ─────────────────────────

    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    pub fn selection(&self) -> SelectionState {
        self.selection
    }

    pub fn silence(&self) -> &SilenceState {
        &self.silence
    }

    pub fn clipboard(&self) -> Option<&CutBuffer> {
        self.clipboard.as_ref()
    }

    pub fn timeline_duration(&self) -> f64 {
        self.store.timeline_duration()
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    pub fn meters(&self) -> &MeterBank {
        &self.meters
    }

    pub fn registry(&self) -> &BufferRegistry {
        &self.registry
    }

    // ───────────────────────── history ─────────────────────────

    fn capture_snapshot(&self, label: &str) -> Snapshot {
        Snapshot {
            label: label.to_owned(),
            tracks: self.store.state(),
            transcriptions: self.transcriptions.state(),
            selection: self.selection,
            silence: self.silence.clone(),
        }
    }

    fn push_state(&mut self, label: &str) {
        let snapshot = self.capture_snapshot(label);
        self.history.push_state(|| snapshot);
    }

    /// Record `snapshot` as the pre-edit state, once the edit is known to
    /// have changed something.
    fn commit_snapshot(&mut self, snapshot: Snapshot) {
        self.history.push_state(|| snapshot);
    }

    fn restore_snapshot(&mut self, snapshot: Snapshot) {
        self.history.set_restoring(true);
        self.store.restore(snapshot.tracks);
        self.transcriptions.restore(snapshot.transcriptions);
        self.selection = snapshot.selection;
        self.silence = snapshot.silence;
        self.history.set_restoring(false);
        self.after_content_change();
    }

    pub fn undo(&mut self) -> bool {
        let current = self.capture_snapshot("undo");
        match self.history.undo(current) {
            Some(snapshot) => {
                self.restore_snapshot(snapshot);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        let current = self.capture_snapshot("redo");
        match self.history.redo(current) {
            Some(snapshot) => {
                self.restore_snapshot(snapshot);
                true
            }
            None => false,
        }
    }

    /// Group the following edits into a single undo step, e.g. for drags.
    pub fn begin_batch(&mut self, label: &str) {
        let snapshot = self.capture_snapshot(label);
        self.history.begin_batch(|| snapshot);
    }

    pub fn end_batch(&mut self) {
        self.history.end_batch();
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    // ───────────────────────── selection ─────────────────────────

    /// Set the selection; rejects ranges shorter than
    /// [`MIN_SELECTION_DURATION`] or outside the timeline.
    pub fn set_selection(&mut self, start: f64, end: f64) -> bool {
        let duration = self.timeline_duration();
        let start = start.max(0.0);
        let end = end.min(duration);
        if start + MIN_SELECTION_DURATION > end {
            return false;
        }
        self.selection.start = start;
        self.selection.end = end;
        true
    }

    pub fn set_in_point(&mut self, point: Option<f64>) {
        self.selection.in_point = point.map(|p| p.clamp(0.0, self.timeline_duration()));
    }

    pub fn set_out_point(&mut self, point: Option<f64>) {
        self.selection.out_point = point.map(|p| p.clamp(0.0, self.timeline_duration()));
    }

    pub fn select_track(&mut self, selection: TrackSelection) {
        self.store.select_track(selection);
    }

    pub fn select_clip(&mut self, track: TrackKey, clip: ClipKey) -> bool {
        self.store.select_clip(track, clip)
    }

    // ───────────────────────── tracks ─────────────────────────

    /// Add a track holding an existing buffer, e.g. recorded or pasted audio.
    pub fn create_track_from_buffer(
        &mut self,
        buffer: AudioBuffer,
        name: String,
        track_start: f64,
        source_path: Option<PathBuf>,
    ) -> TrackKey {
        self.push_state("Add track");
        let shared = Arc::new(buffer);
        let key = self.store.create_track_from_buffer(
            Arc::clone(&shared),
            None,
            name,
            track_start,
            source_path,
        );
        if let Ok(buffer_key) = self.registry.insert_shared(shared) {
            self.source_buffers.insert(key, buffer_key);
        }
        self.after_content_change();
        key
    }

    pub fn add_empty_track(&mut self, name: String) -> TrackKey {
        self.push_state("Add track");
        self.store.add_empty_track(name)
    }

    pub fn delete_track(&mut self, key: TrackKey) -> bool {
        if self.store.track(key).is_none() {
            return false;
        }
        self.push_state("Delete track");

        // A deleted track cancels its import; stray events get dropped
        let sessions: Vec<ImportSessionKey> = self
            .imports
            .iter()
            .filter(|(_, &track)| track == key)
            .map(|(&session, _)| session)
            .collect();
        for session in sessions {
            self.codec.cancel(session);
            self.imports.remove(&session);
        }

        self.store.delete_track(key);
        self.transcriptions.invalidate(key);
        if let Some(buffer_key) = self.source_buffers.remove(&key) {
            let _ = self.registry.release(buffer_key);
        }
        self.after_content_change();
        true
    }

    pub fn clear_track_audio(&mut self, key: TrackKey) -> bool {
        if self.store.track(key).is_none() {
            return false;
        }
        self.push_state("Clear track");
        let cleared = self.store.clear_track_audio(key);
        if cleared {
            self.transcriptions.invalidate(key);
            if let Some(buffer_key) = self.source_buffers.remove(&key) {
                let _ = self.registry.release(buffer_key);
            }
            self.after_content_change();
        }
        cleared
    }

    pub fn rename_track(&mut self, key: TrackKey, name: String) -> bool {
        if self.store.track(key).is_none() {
            return false;
        }
        self.push_state("Rename track");
        self.store.rename_track(key, name)
    }

    pub fn set_track_muted(&mut self, key: TrackKey, muted: bool) -> bool {
        if self.store.track(key).is_none() {
            return false;
        }
        self.push_state(if muted { "Mute track" } else { "Unmute track" });
        let changed = self.store.set_track_muted(key, muted);
        self.forward_mute_states();
        changed
    }

    pub fn set_track_solo(&mut self, key: TrackKey, solo: bool) -> bool {
        if self.store.track(key).is_none() {
            return false;
        }
        self.push_state(if solo { "Solo track" } else { "Unsolo track" });
        let changed = self.store.set_track_solo(key, solo);
        self.forward_mute_states();
        changed
    }

    pub fn set_track_volume(&mut self, key: TrackKey, volume: f32) -> bool {
        if self.store.track(key).is_none() {
            return false;
        }
        self.push_state("Set track volume");
        let changed = self.store.set_track_volume(key, volume);
        if changed {
            let volume = self.store.track(key).map(|t| t.volume).unwrap_or(volume);
            if let Err(e) = self.playback.forward_track_volume(key, volume) {
                warn!("engine rejected volume update: {e}");
            }
        }
        changed
    }

    pub fn reorder_track(&mut self, from: usize, to: usize) -> bool {
        let snapshot = self.capture_snapshot("Reorder tracks");
        let reordered = self.store.reorder_track(from, to);
        if reordered {
            self.commit_snapshot(snapshot);
        }
        reordered
    }

    /// Push the solo-collapsed mute flags of every track to the engine, so a
    /// mute or solo toggle lands without a reload.
    fn forward_mute_states(&mut self) {
        let active = mixer::active_track_keys(self.store.tracks());
        let flags: Vec<(TrackKey, bool)> = self
            .store
            .tracks()
            .iter()
            .map(|t| (t.key, !active.contains(&t.key)))
            .collect();
        for (key, muted) in flags {
            if let Err(e) = self.playback.forward_track_muted(key, muted) {
                warn!("engine rejected mute update: {e}");
            }
        }
    }

    // ───────────────────────── import ─────────────────────────

    /// Start a streamed import: probes the file, adds a placeholder track and
    /// kicks off the decode session. Waveform chunks, progress and completion
    /// arrive via [`Editor::poll_import_events`].
    pub fn import_track(&mut self, path: &Path, track_start: f64) -> Result<TrackKey, CodecError> {
        let metadata = self.codec.probe_metadata(path)?;
        let session = self
            .codec
            .start_waveform_decode(path, waveform::OVERVIEW_BUCKETS)?;

        self.push_state("Import audio");
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Imported audio")
            .to_owned();
        let key = self.store.create_importing_track(
            name,
            &metadata,
            track_start,
            Some(path.to_path_buf()),
        );
        self.imports.insert(session, key);
        Ok(key)
    }

    /// Import synchronously, e.g. while loading a project.
    pub fn import_track_sync(
        &mut self,
        path: &Path,
        track_start: f64,
    ) -> Result<TrackKey, CodecError> {
        let loaded = self
            .codec
            .load_audio_complete(path, waveform::OVERVIEW_BUCKETS)?;
        self.push_state("Import audio");
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Imported audio")
            .to_owned();
        let shared = Arc::new(loaded.buffer);
        let key = self.store.create_track_from_buffer(
            Arc::clone(&shared),
            Some(Arc::new(loaded.waveform)),
            name,
            track_start,
            Some(path.to_path_buf()),
        );
        if let Ok(buffer_key) = self.registry.insert_shared(shared) {
            self.source_buffers.insert(key, buffer_key);
        }
        self.after_content_change();
        Ok(key)
    }

    /// Drain codec events and apply them to the importing tracks.
    /// Events for unknown or finished sessions are dropped. Returns the
    /// imports that failed.
    pub fn poll_import_events(&mut self) -> Vec<(TrackKey, CodecError)> {
        let mut failures = Vec::new();
        for event in self.codec.poll_events() {
            let session = event.session();
            let Some(&track) = self.imports.get(&session) else {
                continue;
            };
            match event {
                CodecEvent::WaveformChunk {
                    start_bucket,
                    peaks,
                    progress,
                    ..
                } => {
                    self.store
                        .update_import_waveform(track, start_bucket, &peaks, progress);
                }
                CodecEvent::DecodeProgress { progress, .. } => {
                    self.store.update_import_decode_progress(track, progress);
                }
                CodecEvent::ImportComplete {
                    waveform,
                    duration,
                    buffer,
                    ..
                } => {
                    self.store.finalize_import_waveform(track, waveform, duration);
                    let shared = Arc::new(buffer);
                    self.store.set_import_buffer(track, Arc::clone(&shared));
                    if let Ok(buffer_key) = self.registry.insert_shared(shared) {
                        self.source_buffers.insert(track, buffer_key);
                    }
                    self.imports.remove(&session);
                    self.after_content_change();
                }
                CodecEvent::ImportError { error, .. } => {
                    warn!("import of track {track:?} failed: {error}");
                    self.imports.remove(&session);
                    self.store.delete_track(track);
                    failures.push((track, error));
                }
            }
        }
        failures
    }

    pub fn import_in_flight(&self) -> bool {
        !self.imports.is_empty()
    }

    // ───────────────────────── timemarks & envelope ─────────────────────────

    pub fn add_timemark(
        &mut self,
        track: TrackKey,
        time: f64,
        label: String,
        source: TimeMarkSource,
        color: Option<String>,
    ) -> Option<TimeMarkKey> {
        if self.store.track(track).is_none() {
            return None;
        }
        self.push_state("Add timemark");
        self.store.add_timemark(track, time, label, source, color)
    }

    /// Live timemark drag; not snapshotted, callers batch around it.
    pub fn update_timemark_time(&mut self, track: TrackKey, mark: TimeMarkKey, time: f64) -> bool {
        self.store.update_timemark_time(track, mark, time)
    }

    pub fn remove_timemark(&mut self, track: TrackKey, mark: TimeMarkKey) -> bool {
        let snapshot = self.capture_snapshot("Remove timemark");
        let removed = self.store.remove_timemark(track, mark);
        if removed {
            self.commit_snapshot(snapshot);
        }
        removed
    }

    pub fn add_volume_point(
        &mut self,
        track: TrackKey,
        time: f64,
        value: f32,
    ) -> Option<VolumePointKey> {
        if self.store.track(track).is_none() {
            return None;
        }
        self.push_state("Add volume point");
        let key = self.store.add_volume_point(track, time, value);
        if key.is_some() {
            self.forward_envelope(track);
        }
        key
    }

    /// Live envelope-point drag; not snapshotted.
    pub fn update_volume_point(
        &mut self,
        track: TrackKey,
        point: VolumePointKey,
        time: f64,
        value: f32,
    ) -> bool {
        let updated = self.store.update_volume_point(track, point, time, value);
        if updated {
            self.forward_envelope(track);
        }
        updated
    }

    pub fn remove_volume_point(&mut self, track: TrackKey, point: VolumePointKey) -> bool {
        let snapshot = self.capture_snapshot("Remove volume point");
        let removed = self.store.remove_volume_point(track, point);
        if removed {
            self.commit_snapshot(snapshot);
            self.forward_envelope(track);
        }
        removed
    }

    pub fn volume_at_time(&self, track: TrackKey, time: f64) -> Option<f32> {
        self.store.volume_at_time(track, time)
    }

    fn forward_envelope(&mut self, track: TrackKey) {
        if let Some(envelope) = self.store.track(track).map(|t| t.envelope.clone()) {
            if let Err(e) = self.playback.forward_track_envelope(track, envelope) {
                warn!("engine rejected envelope update: {e}");
            }
        }
    }

    // ───────────────────────── edits ─────────────────────────

    /// Cut `[in_point, out_point]` out of every overlapping track into the
    /// clipboard, rippling later content left and re-timing transcripts.
    pub fn cut(&mut self, in_point: f64, out_point: f64) -> bool {
        match self.remove_region("Cut", in_point, out_point, true) {
            Some(cut) => {
                self.clipboard = Some(CutBuffer {
                    buffer: cut.buffer,
                    waveform: cut.waveform,
                });
                true
            }
            None => false,
        }
    }

    /// Cut without keeping the audio.
    pub fn ripple_delete(&mut self, in_point: f64, out_point: f64) -> bool {
        self.remove_region("Ripple delete", in_point, out_point, true)
            .is_some()
    }

    /// Remove the region leaving a silent gap.
    pub fn delete_region(&mut self, in_point: f64, out_point: f64) -> bool {
        self.remove_region("Delete", in_point, out_point, false)
            .is_some()
    }

    fn remove_region(
        &mut self,
        label: &str,
        in_point: f64,
        out_point: f64,
        ripple: bool,
    ) -> Option<RegionCut> {
        let snapshot = self.capture_snapshot(label);
        let cut = self.store.cut_region(in_point, out_point, ripple)?;
        self.commit_snapshot(snapshot);
        for &(track, orig_start) in &cut.tracks {
            if let Some(transcription) = self.transcriptions.get_mut(track) {
                let rel_in = in_point - orig_start;
                let rel_out = out_point - orig_start;
                if ripple {
                    transcription.adjust_for_cut(rel_in, rel_out);
                } else {
                    transcription.adjust_for_delete(rel_in, rel_out);
                }
            }
        }
        self.after_content_change();
        Some(cut)
    }

    /// Copy the active mix of a region to the clipboard without mutating.
    pub fn copy(&mut self, in_point: f64, out_point: f64) -> bool {
        match self.store.extract_region(in_point, out_point) {
            Some(cut) => {
                self.clipboard = Some(cut);
                true
            }
            None => false,
        }
    }

    pub fn extract_region(&self, in_point: f64, out_point: f64) -> Option<CutBuffer> {
        self.store.extract_region(in_point, out_point)
    }

    pub fn split_clip(
        &mut self,
        track: TrackKey,
        target: ClipTarget,
        time: f64,
    ) -> Option<(ClipKey, ClipKey)> {
        let snapshot = self.capture_snapshot("Split clip");
        let split = self.store.split_clip(track, target, time);
        if split.is_some() {
            self.commit_snapshot(snapshot);
            self.after_content_change();
        }
        split
    }

    /// Paste the clipboard into a track at the playhead.
    pub fn paste_at_playhead(&mut self, track: TrackKey) -> Option<ClipKey> {
        let buffer = Arc::clone(&self.clipboard.as_ref()?.buffer);
        let playhead = self.playback.current_time;
        self.insert_buffer_at(track, playhead, buffer)
    }

    /// Insert a buffer at a position, pushing later content right.
    /// The track's transcription cannot follow a splice and is dropped.
    pub fn insert_buffer_at(
        &mut self,
        track: TrackKey,
        position: f64,
        buffer: Arc<AudioBuffer>,
    ) -> Option<ClipKey> {
        let snapshot = self.capture_snapshot("Paste");
        let inserted = self.store.insert_clip_at(track, position, buffer);
        if inserted.is_some() {
            self.commit_snapshot(snapshot);
            self.transcriptions.invalidate(track);
            self.after_content_change();
        }
        inserted
    }

    /// Live clip drag; batch around it for a single undo step.
    pub fn move_clip(
        &mut self,
        track: TrackKey,
        target: ClipTarget,
        new_start: f64,
        snap: bool,
    ) -> bool {
        self.store.set_clip_start(track, target, new_start, snap)
    }

    pub fn finalize_clip_positions(&mut self) {
        self.store.finalize_clip_positions();
        self.after_content_change();
    }

    // ───────────────────────── transcription ─────────────────────────

    /// Transcribe a track's audio with the configured speech model.
    /// Lazily creates the track's transcription entry.
    pub fn transcribe_track(&mut self, track: TrackKey) -> Result<(), ModelError> {
        let model = self.speech_model.as_ref().ok_or(ModelError::Unavailable)?;
        let t = self
            .store
            .track(track)
            .ok_or_else(|| ModelError::Failed("No such track".to_owned()))?;

        let buffer: Arc<AudioBuffer> = match &t.audio {
            TrackAudio::Empty => {
                return Err(ModelError::Failed("Track has no audio".to_owned()))
            }
            TrackAudio::Buffer { buffer, .. } => Arc::clone(buffer),
            TrackAudio::Clips(clips) => {
                let parts: Vec<(Arc<AudioBuffer>, f64)> = clips
                    .iter()
                    .map(|c| (Arc::clone(&c.buffer), c.start - t.start))
                    .collect();
                let mixed = mixer::mix_contributions(&parts, t.duration)
                    .ok_or_else(|| ModelError::Failed("Track has no audio".to_owned()))?;
                Arc::new(mixed)
            }
        };

        let result = model.transcribe(&buffer, None)?;
        self.transcriptions
            .set(track, TrackTranscription::from_result(result));
        Ok(())
    }

    pub fn transcription(&self, track: TrackKey) -> Option<&TrackTranscription> {
        self.transcriptions.get(track)
    }

    /// Words positioned on the timeline, following the track mid-drag.
    pub fn adjusted_words(&self, track: TrackKey) -> Option<Vec<AdjustedWord>> {
        let offset = self.store.effective_track_start(track)?;
        Some(self.transcriptions.get(track)?.adjusted_words(offset))
    }

    pub fn word_at_time(&self, track: TrackKey, time: f64) -> Option<&Word> {
        let offset = self.store.effective_track_start(track)?;
        self.transcriptions.get(track)?.word_at_time(time, offset)
    }

    pub fn words_in_range(&self, track: TrackKey, from: f64, to: f64) -> Vec<&Word> {
        match (
            self.store.effective_track_start(track),
            self.transcriptions.get(track),
        ) {
            (Some(offset), Some(t)) => t.words_in_range(from, to, offset),
            _ => Vec::new(),
        }
    }

    /// Live word drag; batch around it for a single undo step.
    pub fn set_word_offset(
        &mut self,
        track: TrackKey,
        word: WordId,
        offset_ms: f64,
        push_neighbors: bool,
    ) -> bool {
        match self.transcriptions.get_mut(track) {
            Some(t) => t.set_word_offset(word, offset_ms, push_neighbors),
            None => false,
        }
    }

    pub fn set_falloff_enabled(&mut self, track: TrackKey, enabled: bool) -> bool {
        match self.transcriptions.get_mut(track) {
            Some(t) => {
                t.enable_falloff = enabled;
                true
            }
            None => false,
        }
    }

    pub fn shift_words(&mut self, track: TrackKey, delta_ms: f64) -> bool {
        if self.transcriptions.get(track).is_none() {
            return false;
        }
        self.push_state("Shift words");
        self.transcriptions
            .get_mut(track)
            .expect("transcription existed above")
            .shift_all(delta_ms);
        true
    }

    /// Write the track's transcription next to its source audio.
    pub fn save_transcription_sidecar(&self, track: TrackKey) -> Result<PathBuf, SidecarError> {
        let t = self.store.track(track).ok_or_else(|| {
            SidecarError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No such track",
            ))
        })?;
        let source = t.source_path.clone().ok_or_else(|| {
            SidecarError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Track has no source path",
            ))
        })?;
        let transcription = self.transcriptions.get(track).ok_or_else(|| {
            SidecarError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Track has no transcription",
            ))
        })?;

        let path = TranscriptionSidecar::path_for(&source);
        TranscriptionSidecar::from_transcription(&source, transcription).save(&path)?;
        Ok(path)
    }

    pub fn load_transcription_sidecar(&mut self, track: TrackKey) -> Result<(), SidecarError> {
        let source = self
            .store
            .track(track)
            .and_then(|t| t.source_path.clone())
            .ok_or_else(|| {
                SidecarError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Track has no source path",
                ))
            })?;
        let sidecar = TranscriptionSidecar::load(&TranscriptionSidecar::path_for(&source))?;
        self.transcriptions.set(track, sidecar.into_transcription());
        Ok(())
    }

    // ───────────────────────── playback ─────────────────────────

    /// Assemble the playback controller's view of the timeline.
    fn build_view(&self) -> TimelineView {
        let active = mixer::active_track_keys(self.store.tracks());

        let tracks: Vec<EngineTrack> = self
            .store
            .tracks()
            .iter()
            .map(|t| EngineTrack {
                key: t.key,
                source_path: t.source_path.clone(),
                start: t.start,
                duration: t.duration,
                volume: t.volume,
                muted: !active.contains(&t.key),
                envelope: t.envelope.clone(),
                clips: match &t.audio {
                    TrackAudio::Empty => Vec::new(),
                    TrackAudio::Buffer { buffer, .. } => vec![EngineClip {
                        duration: buffer.duration(),
                        buffer: Arc::clone(buffer),
                        start: t.start,
                    }],
                    TrackAudio::Clips(clips) => clips
                        .iter()
                        .map(|c| EngineClip {
                            buffer: Arc::clone(&c.buffer),
                            start: c.start,
                            duration: c.duration(),
                        })
                        .collect(),
                },
            })
            .collect();

        let active_region = self
            .store
            .tracks()
            .iter()
            .filter(|t| active.contains(&t.key) && t.has_audio())
            .map(|t| (t.start, t.end()))
            .reduce(|(a0, a1), (b0, b1)| (a0.min(b0), a1.max(b1)));

        let clip_region = match self.store.selected_track() {
            TrackSelection::Track(key) => self.store.track(key),
            _ => self.store.tracks().first(),
        }
        .filter(|t| t.has_audio())
        .map(|t| (t.start, t.end()));

        TimelineView {
            timeline_duration: self.timeline_duration(),
            selection: (self.selection.start, self.selection.end),
            in_point: self.selection.in_point,
            out_point: self.selection.out_point,
            active_region,
            clip_region,
            tracks,
        }
    }

    /// Re-sync a playing engine after a content change.
    fn after_content_change(&mut self) {
        self.playback.invalidate_config();
        let view = self.build_view();
        if let Err(e) = self.playback.resync(&view) {
            warn!("engine rejected updated session: {e}");
        }
    }

    pub fn play(&mut self) -> Result<(), EngineError> {
        let view = self.build_view();
        self.playback.play(&view)
    }

    pub fn pause(&mut self) -> Result<(), EngineError> {
        self.playback.pause()
    }

    pub fn stop(&mut self) -> Result<(), EngineError> {
        let view = self.build_view();
        self.playback.stop(&view)
    }

    pub fn seek(&mut self, time: f64) -> Result<(), EngineError> {
        let view = self.build_view();
        self.playback.seek(time, &view)
    }

    pub fn set_scrubbing(&mut self, scrubbing: bool) {
        self.playback.set_scrubbing(scrubbing);
    }

    pub fn scrub(&mut self, time: f64) {
        let view = self.build_view();
        self.playback.scrub(time, &view);
    }

    pub fn speed_up(&mut self) -> Result<(), EngineError> {
        self.playback.speed_up()
    }

    pub fn speed_down(&mut self) -> Result<(), EngineError> {
        self.playback.speed_down()
    }

    pub fn reset_speed(&mut self) -> Result<(), EngineError> {
        self.playback.reset_speed()
    }

    pub fn set_playback_speed(&mut self, speed: f64) -> Result<(), EngineError> {
        self.playback.set_speed(speed)
    }

    pub fn set_playback_volume(&mut self, volume: f32) -> Result<(), EngineError> {
        self.playback.set_volume(volume)
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) -> Result<(), EngineError> {
        let view = self.build_view();
        self.playback.set_loop_enabled(enabled, &view)
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) -> Result<(), EngineError> {
        let view = self.build_view();
        self.playback.set_loop_mode(mode, &view)
    }

    pub fn start_hold_play(&mut self) -> Result<(), EngineError> {
        let view = self.build_view();
        self.playback.start_hold_play(&view)
    }

    pub fn stop_hold_play(&mut self) -> Result<(), EngineError> {
        self.playback.stop_hold_play()
    }

    pub fn start_hold_reverse(&mut self) -> Result<(), EngineError> {
        let view = self.build_view();
        self.playback.start_hold_reverse(&view)
    }

    pub fn stop_hold_reverse(&mut self) -> Result<(), EngineError> {
        self.playback.stop_hold_reverse()
    }

    /// Current playhead; poll at frame cadence.
    pub fn position(&mut self) -> f64 {
        self.playback.position()
    }

    /// Poll the engine's meters and advance the display ballistics by `dt`
    /// seconds. While paused the displays keep decaying toward zero.
    pub fn poll_meters(&mut self, dt: f64) {
        if self.playback.is_playing {
            let levels = self.playback.meter_levels();
            self.meters.update(&levels, dt);
        } else {
            self.meters.decay_all(dt);
        }
    }

    // ───────────────────────── silence ─────────────────────────

    pub fn set_silence_regions(&mut self, regions: Vec<(f64, f64)>) {
        self.push_state("Update silence regions");
        self.silence.regions = regions;
    }

    pub fn set_silence_compression(&mut self, enabled: bool) {
        self.push_state("Toggle silence compression");
        self.silence.compression_enabled = enabled;
    }

    // ───────────────────────── export ─────────────────────────

    /// Mix the active tracks down and write a WAV file.
    pub fn export_mixdown_wav(&self, path: &Path, format: WavFormat) -> Result<(), ExportError> {
        let mixed = mixer::mixdown(&self.store).ok_or(ExportError::NoAudio)?;
        wav::encode_wav(&mixed, format, path)?;
        Ok(())
    }

    /// Mix `[in_point, out_point]` of the active tracks and write a WAV file.
    pub fn export_region_wav(
        &self,
        path: &Path,
        in_point: f64,
        out_point: f64,
        format: WavFormat,
    ) -> Result<(), ExportError> {
        let cut = self
            .store
            .extract_region(in_point, out_point)
            .ok_or(ExportError::NoAudio)?;
        wav::encode_wav(&cut.buffer, format, path)?;
        Ok(())
    }

    // ───────────────────────── project ─────────────────────────

    /// Save the session as a project file. Tracks without a source path get
    /// their audio flattened and cached as WAV next to the project.
    pub fn save_project(&self, path: &Path, name: &str) -> Result<(), ProjectError> {
        let base = path.parent().unwrap_or(Path::new("."));
        let now = chrono::Utc::now();

        let mut tracks = Vec::new();
        for track in self.store.tracks() {
            let mut cached_audio_path = None;
            if track.source_path.is_none() && track.has_audio() {
                let cache_name = format!(
                    "{}-track{}-cache.wav",
                    path.file_stem().and_then(|s| s.to_str()).unwrap_or("project"),
                    tracks.len()
                );
                let cache_path = base.join(&cache_name);
                let flattened = flatten_track(track).ok_or_else(|| {
                    ProjectError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "Track audio could not be flattened",
                    ))
                })?;
                wav::encode_wav(&flattened, WavFormat::Float32, &cache_path)
                    .map_err(|e| ProjectError::Io(std::io::Error::other(e.to_string())))?;
                cached_audio_path = Some(PathBuf::from(cache_name));
            }

            tracks.push(ProjectTrack {
                id: track.key,
                name: track.name.clone(),
                source_path: track
                    .source_path
                    .as_deref()
                    .map(|p| project::relativize(p, base)),
                cached_audio_path,
                track_start: track.start,
                duration: track.duration,
                color: track.color.clone(),
                muted: track.muted,
                solo: track.solo,
                volume: track.volume,
                tag: None,
                timemarks: track.timemarks.clone(),
                volume_envelope: track.envelope.clone(),
            });
        }

        let project = ProjectFile {
            version: PROJECT_VERSION,
            name: name.to_owned(),
            created_at: now,
            modified_at: now,
            tracks,
            selection: ProjectSelection {
                in_point: self.selection.in_point,
                out_point: self.selection.out_point,
            },
            silence_regions: self.silence.regions.clone(),
            silence_compression: self.silence.compression_enabled,
        };
        project.save(path)
    }

    /// Load a project file, replacing the current session.
    /// Tracks whose audio cannot be loaded are skipped and returned.
    pub fn load_project(
        &mut self,
        path: &Path,
    ) -> Result<Vec<(String, CodecError)>, ProjectError> {
        let project = ProjectFile::load(path)?;
        let base = path.parent().unwrap_or(Path::new("."));

        // Replace the session wholesale
        let keys: Vec<TrackKey> = self.store.tracks().iter().map(|t| t.key).collect();
        for key in keys {
            self.store.delete_track(key);
            self.transcriptions.invalidate(key);
        }
        self.clear_history();
        self.selection = SelectionState {
            start: 0.0,
            end: 0.0,
            in_point: project.selection.in_point,
            out_point: project.selection.out_point,
        };
        self.silence = SilenceState {
            regions: project.silence_regions,
            compression_enabled: project.silence_compression,
        };

        let mut failures = Vec::new();
        for entry in project.tracks {
            let audio_path = entry
                .source_path
                .as_deref()
                .or(entry.cached_audio_path.as_deref())
                .map(|p| project::resolve(p, base));
            let Some(audio_path) = audio_path else {
                // A track persisted without any audio reference stays empty
                let key = self.store.add_empty_track(entry.name.clone());
                self.apply_project_track(key, &entry);
                continue;
            };

            match self
                .codec
                .load_audio_complete(&audio_path, waveform::OVERVIEW_BUCKETS)
            {
                Ok(loaded) => {
                    let shared = Arc::new(loaded.buffer);
                    let key = self.store.create_track_from_buffer(
                        Arc::clone(&shared),
                        Some(Arc::new(loaded.waveform)),
                        entry.name.clone(),
                        entry.track_start,
                        entry.source_path.as_deref().map(|p| project::resolve(p, base)),
                    );
                    if let Ok(buffer_key) = self.registry.insert_shared(shared) {
                        self.source_buffers.insert(key, buffer_key);
                    }
                    self.apply_project_track(key, &entry);
                }
                Err(error) => {
                    warn!("skipping track '{}': {error}", entry.name);
                    failures.push((entry.name, error));
                }
            }
        }

        self.after_content_change();
        Ok(failures)
    }

    fn apply_project_track(&mut self, key: TrackKey, entry: &ProjectTrack) {
        self.store.set_track_muted(key, entry.muted);
        if entry.solo {
            self.store.set_track_solo(key, true);
        }
        self.store.set_track_volume(key, entry.volume);
        if let Some(track) = self.store.track_mut(key) {
            track.color = entry.color.clone();
        }
        for mark in &entry.timemarks {
            self.store.add_timemark(
                key,
                mark.time,
                mark.label.clone(),
                mark.source,
                mark.color.clone(),
            );
        }
        for point in &entry.volume_envelope {
            self.store.add_volume_point(key, point.time, point.value);
        }
    }

    /// Hi-res peaks on demand; falls back to the stored overview while the
    /// zoom is coarse enough.
    pub fn waveform_for_track(
        &mut self,
        track: TrackKey,
        required_bars: usize,
    ) -> Option<Arc<Vec<f32>>> {
        let t = self.store.track(track)?;
        let (buffer, overview) = match &t.audio {
            TrackAudio::Empty => return None,
            TrackAudio::Buffer { buffer, waveform } => (Arc::clone(buffer), Arc::clone(waveform)),
            TrackAudio::Clips(clips) => {
                let clip = clips.first()?;
                (Arc::clone(&clip.buffer), Arc::clone(&clip.waveform))
            }
        };
        if !waveform::needs_hi_res(required_bars) {
            return Some(overview);
        }
        Some(self.waveforms.hi_res(&buffer, required_bars))
    }
}

/// Render one track's audio into a single buffer at its own start.
fn flatten_track(track: &Track) -> Option<AudioBuffer> {
    match &track.audio {
        TrackAudio::Empty => None,
        TrackAudio::Buffer { buffer, .. } => Some(buffer.slice(0..buffer.len())),
        TrackAudio::Clips(clips) => {
            let parts: Vec<(Arc<AudioBuffer>, f64)> = clips
                .iter()
                .map(|c| (Arc::clone(&c.buffer), c.start - track.start))
                .collect();
            mixer::mix_contributions(&parts, track.duration)
        }
    }
}

/// The active mix has no audio to bounce.
#[derive(Debug)]
pub enum ExportError {
    NoAudio,
    Encode(WavEncodeError),
}
impl Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAudio => write!(f, "Nothing to export: no active track has audio"),
            Self::Encode(e) => Display::fmt(e, f),
        }
    }
}
impl Error for ExportError {}
impl From<WavEncodeError> for ExportError {
    fn from(e: WavEncodeError) -> Self {
        Self::Encode(e)
    }
}
