//! Word-level transcription kept in sync with the timeline.
//!
//! Word timings are track-relative seconds straight from the speech model;
//! display positions add the track start and a per-word millisecond offset.
//! Dragging a word moves its neighbors either with a falloff pull or a rigid
//! push, and cuts/deletes re-time the surviving words.

use std::{
    collections::HashMap,
    error::Error,
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::buffer::AudioBuffer;
use super::timeline::TrackKey;
use super::utils::key_generator::key_type;
use super::EPSILON;

key_type!(pub struct WordId(u32));

/// Neighbor coupling factor of the falloff pull.
/// With radius 5 the neighbors move by ≈ 0.55, 0.30, 0.17, 0.09 and 0.05 of
/// the drag.
const FALLOFF_FACTOR: f64 = 0.55;
const FALLOFF_RADIUS: usize = 5;
/// Offsets and pulls below this are dropped as inaudible.
const MIN_OFFSET_MS: f64 = 0.5;
/// Smallest spacing kept between adjacent words, in seconds.
const WORD_GAP: f64 = 0.01;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Word {
    pub id: WordId,
    pub text: String,
    /// Track-relative seconds.
    pub start: f64,
    pub end: f64,
    pub confidence: f32,
}

/// A word as positioned on the timeline, offsets and track start applied.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdjustedWord {
    pub id: WordId,
    pub start: f64,
    pub end: f64,
}

/// A word as produced by the speech model, before the editor assigns ids.
#[derive(Clone, Debug)]
pub struct SpokenWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f32,
}

/// Output of a [`SpeechModel`] run.
#[derive(Clone, Debug)]
pub struct TranscriptionResult {
    pub words: Vec<SpokenWord>,
    pub language: String,
}

/// Black-box ASR service. The editor only ever calls it lazily, when a host
/// asks for a transcription of a track.
pub trait SpeechModel {
    fn transcribe(
        &self,
        buffer: &AudioBuffer,
        language_hint: Option<&str>,
    ) -> Result<TranscriptionResult, ModelError>;
}

#[derive(Clone, Debug)]
pub struct TrackTranscription {
    pub words: Vec<Word>,
    pub full_text: String,
    pub language: String,
    /// Signed per-word drag offsets in milliseconds.
    offsets: HashMap<WordId, f64>,
    pub enable_falloff: bool,
}
impl TrackTranscription {
    pub fn from_result(result: TranscriptionResult) -> Self {
        let words: Vec<Word> = result
            .words
            .into_iter()
            .enumerate()
            .map(|(i, w)| Word {
                id: WordId(i as u32),
                text: w.text,
                start: w.start,
                end: w.end,
                confidence: w.confidence,
            })
            .collect();
        let full_text = join_words(&words);
        Self {
            words,
            full_text,
            language: result.language,
            offsets: HashMap::new(),
            enable_falloff: true,
        }
    }

    pub fn from_words(words: Vec<Word>, full_text: String, language: String) -> Self {
        Self {
            words,
            full_text,
            language,
            offsets: HashMap::new(),
            enable_falloff: true,
        }
    }

    pub fn offset_ms(&self, id: WordId) -> f64 {
        self.offsets.get(&id).copied().unwrap_or(0.0)
    }

    pub fn offsets(&self) -> impl Iterator<Item = (WordId, f64)> + '_ {
        self.offsets.iter().map(|(&id, &ms)| (id, ms))
    }

    pub fn set_offsets(&mut self, offsets: impl IntoIterator<Item = (WordId, f64)>) {
        self.offsets = offsets.into_iter().collect();
    }

    fn adjusted_start(&self, index: usize) -> f64 {
        let word = &self.words[index];
        word.start + self.offset_ms(word.id) / 1000.0
    }

    fn adjusted_end(&self, index: usize) -> f64 {
        let word = &self.words[index];
        word.end + self.offset_ms(word.id) / 1000.0
    }

    /// All words positioned on the timeline: `track_offset` is the owning
    /// track's current start (the drag position mid-drag).
    pub fn adjusted_words(&self, track_offset: f64) -> Vec<AdjustedWord> {
        (0..self.words.len())
            .map(|i| AdjustedWord {
                id: self.words[i].id,
                start: self.adjusted_start(i) + track_offset,
                end: self.adjusted_end(i) + track_offset,
            })
            .collect()
    }

    /// The word under a timeline position, by binary search on the adjusted
    /// starts.
    pub fn word_at_time(&self, time: f64, track_offset: f64) -> Option<&Word> {
        if self.words.is_empty() {
            return None;
        }
        let local = time - track_offset;
        let after = (0..self.words.len())
            .collect::<Vec<_>>()
            .partition_point(|&i| self.adjusted_start(i) <= local);
        let index = after.checked_sub(1)?;
        (local <= self.adjusted_end(index) + EPSILON).then(|| &self.words[index])
    }

    /// Words whose adjusted start falls inside `[from, to)` (timeline
    /// seconds).
    pub fn words_in_range(&self, from: f64, to: f64, track_offset: f64) -> Vec<&Word> {
        let indices: Vec<usize> = (0..self.words.len()).collect();
        let lo = indices.partition_point(|&i| self.adjusted_start(i) + track_offset < from);
        let hi = indices.partition_point(|&i| self.adjusted_start(i) + track_offset < to);
        self.words[lo..hi].iter().collect()
    }

    /// Drag one word to a new offset.
    ///
    /// With `push_neighbors` the surrounding words keep their spacing: either
    /// a proportional falloff pull over five neighbors each side followed by
    /// one outward overlap-resolution pass, or (falloff off) a rigid push that
    /// stops at the first neighbor already clear.
    pub fn set_word_offset(
        &mut self,
        id: WordId,
        new_offset_ms: f64,
        push_neighbors: bool,
    ) -> bool {
        let Some(pivot) = self.words.iter().position(|w| w.id == id) else {
            return false;
        };

        let previous = self.offset_ms(id);
        let delta = new_offset_ms - previous;
        if new_offset_ms == 0.0 {
            self.offsets.remove(&id);
        } else {
            self.offsets.insert(id, new_offset_ms);
        }

        if !push_neighbors || delta.abs() < MIN_OFFSET_MS {
            return true;
        }

        if self.enable_falloff {
            self.falloff_pull(pivot, delta);
            self.resolve_overlaps_outward(pivot);
        } else {
            self.rigid_push(pivot);
        }
        true
    }

    /// Pull both sides along with the drag, by `delta · factor^distance`.
    fn falloff_pull(&mut self, pivot: usize, delta: f64) {
        for distance in 1..=FALLOFF_RADIUS {
            let pull = delta * FALLOFF_FACTOR.powi(distance as i32);
            if pull.abs() <= MIN_OFFSET_MS {
                break;
            }
            if let Some(left) = pivot.checked_sub(distance) {
                let id = self.words[left].id;
                *self.offsets.entry(id).or_insert(0.0) += pull;
            }
            let right = pivot + distance;
            if right < self.words.len() {
                let id = self.words[right].id;
                *self.offsets.entry(id).or_insert(0.0) += pull;
            }
        }
    }

    /// One pass out from the pivot restoring the minimum word spacing.
    fn resolve_overlaps_outward(&mut self, pivot: usize) {
        for left in (0..pivot).rev() {
            let required_end = self.adjusted_start(left + 1) - WORD_GAP;
            let end = self.adjusted_end(left);
            if end > required_end {
                let id = self.words[left].id;
                *self.offsets.entry(id).or_insert(0.0) -= (end - required_end) * 1000.0;
            }
        }
        for right in pivot + 1..self.words.len() {
            let required_start = self.adjusted_end(right - 1) + WORD_GAP;
            let start = self.adjusted_start(right);
            if start < required_start {
                let id = self.words[right].id;
                *self.offsets.entry(id).or_insert(0.0) += (required_start - start) * 1000.0;
            }
        }
    }

    /// Push neighbors only as far as needed, stopping at the first one that
    /// already satisfies the spacing.
    fn rigid_push(&mut self, pivot: usize) {
        let mut required_end = self.adjusted_start(pivot) - WORD_GAP;
        for left in (0..pivot).rev() {
            let end = self.adjusted_end(left);
            if end <= required_end {
                break;
            }
            let id = self.words[left].id;
            *self.offsets.entry(id).or_insert(0.0) -= (end - required_end) * 1000.0;
            required_end = self.adjusted_start(left) - WORD_GAP;
        }

        let mut required_start = self.adjusted_end(pivot) + WORD_GAP;
        for right in pivot + 1..self.words.len() {
            let start = self.adjusted_start(right);
            if start >= required_start {
                break;
            }
            let id = self.words[right].id;
            *self.offsets.entry(id).or_insert(0.0) += (required_start - start) * 1000.0;
            required_start = self.adjusted_end(right) + WORD_GAP;
        }
    }

    /// Shift every word's offset, e.g. for a global transcript drag.
    /// Offsets that land below the audible threshold are dropped.
    pub fn shift_all(&mut self, delta_ms: f64) {
        for word in &self.words {
            *self.offsets.entry(word.id).or_insert(0.0) += delta_ms;
        }
        self.offsets.retain(|_, ms| ms.abs() >= MIN_OFFSET_MS);
    }

    /// Re-time the transcript after a ripple cut of `[cut_start, cut_end]`
    /// (track-relative): words fully inside vanish, later words move left by
    /// the gap.
    pub fn adjust_for_cut(&mut self, cut_start: f64, cut_end: f64) {
        let gap = cut_end - cut_start;
        if gap <= 0.0 {
            return;
        }

        self.remove_words_inside(cut_start, cut_end);

        let offsets = &self.offsets;
        for word in &mut self.words {
            let adjusted_start = word.start + offsets.get(&word.id).copied().unwrap_or(0.0) / 1000.0;
            if adjusted_start >= cut_end - EPSILON {
                word.start -= gap;
                word.end -= gap;
            }
        }
        self.full_text = join_words(&self.words);
    }

    /// Remove the words inside a deleted region; nothing shifts.
    pub fn adjust_for_delete(&mut self, from: f64, to: f64) {
        self.remove_words_inside(from, to);
        self.full_text = join_words(&self.words);
    }

    fn remove_words_inside(&mut self, from: f64, to: f64) {
        let offsets = &self.offsets;
        let removed: Vec<WordId> = self
            .words
            .iter()
            .filter(|word| {
                let ms = offsets.get(&word.id).copied().unwrap_or(0.0) / 1000.0;
                word.start + ms >= from - EPSILON && word.end + ms <= to + EPSILON
            })
            .map(|word| word.id)
            .collect();
        self.words.retain(|word| !removed.contains(&word.id));
        for id in removed {
            self.offsets.remove(&id);
        }
    }
}

fn join_words(words: &[Word]) -> String {
    words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Per-track transcription table. Replacing the whole map on restore is fine;
/// nothing holds references into it across mutations.
#[derive(Default)]
pub struct TranscriptionStore {
    map: HashMap<TrackKey, TrackTranscription>,
}
impl TranscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, track: TrackKey) -> Option<&TrackTranscription> {
        self.map.get(&track)
    }

    pub fn get_mut(&mut self, track: TrackKey) -> Option<&mut TrackTranscription> {
        self.map.get_mut(&track)
    }

    pub fn set(&mut self, track: TrackKey, transcription: TrackTranscription) {
        self.map.insert(track, transcription);
    }

    /// Drop a track's transcription, e.g. when the track goes away or its
    /// content is rearranged in a way the word timings cannot follow.
    pub fn invalidate(&mut self, track: TrackKey) {
        self.map.remove(&track);
    }

    pub fn state(&self) -> HashMap<TrackKey, TrackTranscription> {
        self.map.clone()
    }

    pub fn restore(&mut self, state: HashMap<TrackKey, TrackTranscription>) {
        self.map = state;
    }
}

/// Sidecar file stored next to an audio source, so adjustments survive
/// project reloads. `global_offset_ms` is always written as 0; older files
/// carried a transcript-wide shift there.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TranscriptionSidecar {
    pub audio_path: PathBuf,
    pub global_offset_ms: f64,
    pub word_adjustments: Vec<WordAdjustment>,
    pub saved_at: DateTime<Utc>,
    pub words: Vec<Word>,
    pub full_text: String,
    pub language: String,
}
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WordAdjustment {
    pub word_id: WordId,
    pub offset_ms: f64,
}
impl TranscriptionSidecar {
    pub fn from_transcription(audio_path: &Path, transcription: &TrackTranscription) -> Self {
        let mut word_adjustments: Vec<WordAdjustment> = transcription
            .offsets()
            .map(|(word_id, offset_ms)| WordAdjustment { word_id, offset_ms })
            .collect();
        word_adjustments.sort_by_key(|a| a.word_id.0);
        Self {
            audio_path: audio_path.to_path_buf(),
            global_offset_ms: 0.0,
            word_adjustments,
            saved_at: Utc::now(),
            words: transcription.words.clone(),
            full_text: transcription.full_text.clone(),
            language: transcription.language.clone(),
        }
    }

    pub fn into_transcription(self) -> TrackTranscription {
        let mut transcription =
            TrackTranscription::from_words(self.words, self.full_text, self.language);
        transcription.set_offsets(
            self.word_adjustments
                .into_iter()
                .map(|a| (a.word_id, a.offset_ms)),
        );
        transcription
    }

    /// Sidecar path for an audio file: `foo.wav` → `foo.wav.transcript.json`.
    pub fn path_for(audio_path: &Path) -> PathBuf {
        let mut name = audio_path.as_os_str().to_owned();
        name.push(".transcript.json");
        PathBuf::from(name)
    }

    pub fn save(&self, path: &Path) -> Result<(), SidecarError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SidecarError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[derive(Debug)]
pub enum SidecarError {
    Io(std::io::Error),
    Json(serde_json::Error),
}
impl Display for SidecarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Transcription sidecar could not be accessed: {e}"),
            Self::Json(e) => write!(f, "Transcription sidecar is not valid JSON: {e}"),
        }
    }
}
impl Error for SidecarError {}
impl From<std::io::Error> for SidecarError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
impl From<serde_json::Error> for SidecarError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

#[derive(Debug)]
pub enum ModelError {
    Unavailable,
    Failed(String),
}
impl Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "No transcription model is configured"),
            Self::Failed(msg) => write!(f, "Transcription failed: {msg}"),
        }
    }
}
impl Error for ModelError {}
