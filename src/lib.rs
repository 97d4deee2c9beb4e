//! scribecut: the timeline and editing core of a non-destructive
//! multi-track audio editor.
//!
//! The [`Editor`] facade owns the timeline, the edit engine, transcription
//! alignment, undo history, the playback transport and meters. Decoding,
//! playback rendering and speech recognition are injected services; built-in
//! implementations ([`SymphoniaCodec`], [`StreamEngine`], [`OfflineEngine`])
//! cover hosts without their own media stack.

mod editor;

pub use editor::{
    active_track_keys, config_hash, encode_wav, envelope_value_at, extract_peaks,
    mix_contributions, mix_sources, mixdown, needs_hi_res, relativize, resolve, sample_to_i16,
    snapped_clip_position, ActiveDrag, AdjustedWord, AudioBuffer, AudioBufferKey, AudioMetadata,
    BufferRegistry, Clip, ClipKey, ClipTarget, CodecError, CodecEvent, CodecService, CutBuffer,
    Editor, EngineClip, EngineConfig, EngineError, EngineTrack, ExportError, History, HoldMode,
    ImportSessionKey, ImportState, ImportStatus, LoadedAudio, LoopMode, MeterBank, MeterFrame,
    MeterLevels, MeterState, MixSource, ModelError, OfflineEngine, PlaybackController,
    ProjectError, ProjectFile, ProjectSelection, ProjectTrack, RegionCut, RenderEngine, Sample,
    SelectionState, SidecarError, SilenceState, Snapshot, SpeechModel, SpokenWord, StreamEngine,
    SymphoniaCodec, TimeMark, TimeMarkKey, TimeMarkSource, TimelineView, Track, TrackAudio,
    TrackKey, TrackSelection, TrackStore, TrackStoreState, TrackTranscription,
    TranscriptionResult, TranscriptionSidecar, TranscriptionStore, UnknownBufferError, ViewMode,
    VolumePoint, VolumePointKey, WavEncodeError, WavFormat, WaveformCache, Word, WordAdjustment,
    WordId, MAX_GAIN, MAX_HISTORY, MAX_HI_RES_BUCKETS, MAX_SPEED, MAX_WAV_BYTES, MAX_WAV_SECONDS,
    METER_DECAY, MIN_SELECTION_DURATION, MP3_BITRATES, OVERVIEW_BUCKETS, PROJECT_VERSION,
    SNAP_THRESHOLD, TRACK_COLORS,
};
