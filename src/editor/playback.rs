//! The transport: play/pause/seek/scrub, loop modes, stepped variable speed
//! including reverse, and hold-to-play. Owns the render engine handle and is
//! the only component that talks to it.

use std::sync::{Arc, Mutex};

use super::engine::{config_hash, EngineError, EngineTrack, MeterLevels, RenderEngine};
use super::timeline::{TrackKey, VolumePoint};
use super::EPSILON;

/// Fastest stepped speed in either direction.
pub const MAX_SPEED: f64 = 5.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Full,
    Zoom,
    InOut,
    Active,
    Clip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HoldMode {
    #[default]
    None,
    Forward,
    Reverse,
}

/// Everything the controller needs to know about the timeline for one call.
/// The editor assembles it fresh; the controller never reaches back into the
/// store.
#[derive(Clone, Debug, Default)]
pub struct TimelineView {
    pub timeline_duration: f64,
    /// Current selection, for the zoom loop mode.
    pub selection: (f64, f64),
    pub in_point: Option<f64>,
    pub out_point: Option<f64>,
    /// Union of the active tracks' ranges.
    pub active_region: Option<(f64, f64)>,
    /// Range of the selected track (first track fallback), for clip loop.
    pub clip_region: Option<(f64, f64)>,
    pub tracks: Vec<EngineTrack>,
}

pub struct PlaybackController {
    engine: Box<dyn RenderEngine>,

    pub is_playing: bool,
    pub current_time: f64,
    pub loop_enabled: bool,
    pub loop_mode: LoopMode,
    pub volume: f32,
    pub is_scrubbing: bool,
    /// Signed playback speed; negative plays in reverse.
    pub playback_speed: f64,
    hold: HoldMode,
    held_speed: f64,

    last_config_hash: Option<u64>,
}
impl PlaybackController {
    pub fn new(engine: Box<dyn RenderEngine>) -> Self {
        Self {
            engine,
            is_playing: false,
            current_time: 0.0,
            loop_enabled: false,
            loop_mode: LoopMode::Full,
            volume: 1.0,
            is_scrubbing: false,
            playback_speed: 1.0,
            hold: HoldMode::None,
            held_speed: 1.0,
            last_config_hash: None,
        }
    }

    pub fn hold_mode(&self) -> HoldMode {
        self.hold
    }

    /// The loop region the current mode selects.
    pub fn loop_region(&self, view: &TimelineView) -> (f64, f64) {
        let full = (0.0, view.timeline_duration);
        match self.loop_mode {
            LoopMode::Full => full,
            LoopMode::Zoom => view.selection,
            LoopMode::InOut => match (view.in_point, view.out_point) {
                (Some(in_point), Some(out_point)) => (in_point, out_point),
                _ => full,
            },
            LoopMode::Active => view.active_region.unwrap_or(full),
            LoopMode::Clip => view.clip_region.unwrap_or(full),
        }
    }

    /// Push the full session config to the engine, skipping `set_tracks`
    /// whenever the track configuration hash is unchanged.
    fn sync_engine(&mut self, view: &TimelineView) -> Result<(), EngineError> {
        let hash = config_hash(&view.tracks);
        if self.last_config_hash != Some(hash) {
            self.engine.set_tracks(view.tracks.clone())?;
            self.last_config_hash = Some(hash);
        }
        let (loop_start, loop_end) = self.loop_region(view);
        self.engine
            .set_loop(self.loop_enabled, loop_start, loop_end)?;
        self.engine.set_speed(self.playback_speed)?;
        self.engine.set_volume(self.volume)?;
        Ok(())
    }

    /// Start playback from the current position, clamped into the active
    /// region (reset to its far edge when playing in reverse from outside).
    ///
    /// Any engine failure aborts the call, reverts `is_playing` and surfaces
    /// the error.
    pub fn play(&mut self, view: &TimelineView) -> Result<(), EngineError> {
        let active = view
            .active_region
            .unwrap_or((0.0, view.timeline_duration));
        if self.current_time < active.0 - EPSILON || self.current_time > active.1 + EPSILON {
            self.current_time = if self.playback_speed >= 0.0 {
                active.0
            } else {
                active.1
            };
        }

        self.is_playing = true;
        if let Err(e) = self.start_engine(view) {
            self.is_playing = false;
            return Err(e);
        }
        Ok(())
    }

    fn start_engine(&mut self, view: &TimelineView) -> Result<(), EngineError> {
        self.sync_engine(view)?;
        self.engine.seek(self.current_time)?;
        self.engine.play()
    }

    /// Idempotent; keeps the playhead where it is.
    pub fn pause(&mut self) -> Result<(), EngineError> {
        if self.is_playing {
            self.current_time = self.engine.position();
        }
        self.is_playing = false;
        self.engine.pause()
    }

    /// Pause, rewind to the loop region's start, reset speed to +1.
    pub fn stop(&mut self, view: &TimelineView) -> Result<(), EngineError> {
        self.pause()?;
        self.current_time = self.loop_region(view).0;
        self.playback_speed = 1.0;
        self.engine.set_speed(1.0)?;
        self.engine.seek(self.current_time)
    }

    /// Jump to `time`; if playing, playback transparently resumes there.
    pub fn seek(&mut self, time: f64, view: &TimelineView) -> Result<(), EngineError> {
        let time = time.clamp(0.0, view.timeline_duration);
        let was_playing = self.is_playing;
        self.pause()?;
        self.current_time = time;
        self.engine.seek(time)?;
        if was_playing {
            self.play(view)?;
        }
        Ok(())
    }

    pub fn set_scrubbing(&mut self, scrubbing: bool) {
        self.is_scrubbing = scrubbing;
    }

    /// Move the playhead while scrubbing, without starting audio.
    pub fn scrub(&mut self, time: f64, view: &TimelineView) {
        if !self.is_scrubbing {
            return;
        }
        self.current_time = time.clamp(0.0, view.timeline_duration);
        let _ = self.engine.seek(self.current_time);
    }

    /// Step up through `{…, -2, -1, +1, +2, …, +5}`; any reverse speed jumps
    /// straight back to +1.
    pub fn speed_up(&mut self) -> Result<(), EngineError> {
        let next = if self.playback_speed < 0.0 {
            1.0
        } else {
            (self.playback_speed + 1.0).min(MAX_SPEED)
        };
        self.set_speed(next)
    }

    pub fn speed_down(&mut self) -> Result<(), EngineError> {
        let next = if self.playback_speed > 0.0 {
            -1.0
        } else {
            (self.playback_speed - 1.0).max(-MAX_SPEED)
        };
        self.set_speed(next)
    }

    pub fn reset_speed(&mut self) -> Result<(), EngineError> {
        self.set_speed(1.0)
    }

    /// Set an arbitrary speed. Hot-swapped into a running engine without a
    /// seek, so there is no audible glitch on change.
    pub fn set_speed(&mut self, speed: f64) -> Result<(), EngineError> {
        self.playback_speed = speed;
        self.engine.set_speed(speed)
    }

    pub fn set_volume(&mut self, volume: f32) -> Result<(), EngineError> {
        self.volume = volume.max(0.0);
        self.engine.set_volume(self.volume)
    }

    pub fn set_loop_enabled(
        &mut self,
        enabled: bool,
        view: &TimelineView,
    ) -> Result<(), EngineError> {
        self.loop_enabled = enabled;
        let (start, end) = self.loop_region(view);
        self.engine.set_loop(enabled, start, end)
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode, view: &TimelineView) -> Result<(), EngineError> {
        self.loop_mode = mode;
        let (start, end) = self.loop_region(view);
        self.engine.set_loop(self.loop_enabled, start, end)
    }

    /// Hold-to-play forward. Mutually exclusive with the reverse hold.
    pub fn start_hold_play(&mut self, view: &TimelineView) -> Result<(), EngineError> {
        if self.hold != HoldMode::None {
            return Ok(());
        }
        self.hold = HoldMode::Forward;
        self.held_speed = self.playback_speed;
        self.set_speed(self.playback_speed.abs().max(1.0))?;
        if !self.is_playing {
            self.play(view)?;
        }
        Ok(())
    }

    pub fn stop_hold_play(&mut self) -> Result<(), EngineError> {
        if self.hold != HoldMode::Forward {
            return Ok(());
        }
        self.hold = HoldMode::None;
        self.set_speed(self.held_speed)?;
        self.pause()
    }

    pub fn start_hold_reverse(&mut self, view: &TimelineView) -> Result<(), EngineError> {
        if self.hold != HoldMode::None {
            return Ok(());
        }
        self.hold = HoldMode::Reverse;
        self.held_speed = self.playback_speed;
        self.set_speed(-self.playback_speed.abs().max(1.0))?;
        if !self.is_playing {
            self.play(view)?;
        }
        Ok(())
    }

    pub fn stop_hold_reverse(&mut self) -> Result<(), EngineError> {
        if self.hold != HoldMode::Reverse {
            return Ok(());
        }
        self.hold = HoldMode::None;
        self.set_speed(self.held_speed)?;
        self.pause()
    }

    /// Current playhead, sampled from the engine's clock while playing.
    /// Polled at animation-frame cadence by hosts.
    pub fn position(&mut self) -> f64 {
        if self.is_playing && !self.is_scrubbing {
            self.current_time = self.engine.position();
        }
        self.current_time
    }

    pub fn meter_levels(&mut self) -> MeterLevels {
        self.engine.meter_levels()
    }

    // Live parameter forwarding: these reach the engine no later than its
    // next rendered buffer, without a pause/reload cycle.

    pub fn forward_track_muted(&mut self, key: TrackKey, muted: bool) -> Result<(), EngineError> {
        self.engine.set_track_muted(key, muted)
    }

    pub fn forward_track_volume(&mut self, key: TrackKey, volume: f32) -> Result<(), EngineError> {
        self.engine.set_track_volume(key, volume)
    }

    pub fn forward_track_envelope(
        &mut self,
        key: TrackKey,
        envelope: Vec<VolumePoint>,
    ) -> Result<(), EngineError> {
        self.engine.set_track_envelope(key, envelope)
    }

    /// Force the next sync to reload the track set, e.g. after an edit.
    pub fn invalidate_config(&mut self) {
        self.last_config_hash = None;
    }

    /// Re-push the session to a running engine after an edit.
    pub fn resync(&mut self, view: &TimelineView) -> Result<(), EngineError> {
        if self.is_playing {
            self.sync_engine(view)?;
        }
        Ok(())
    }
}

/// Shared-engine forwarding, mainly so tests can keep a handle to an
/// [`OfflineEngine`](super::engine::OfflineEngine) they also hand to the
/// controller.
impl<E: RenderEngine> RenderEngine for Arc<Mutex<E>> {
    fn set_tracks(&mut self, tracks: Vec<EngineTrack>) -> Result<(), EngineError> {
        self.lock().expect("engine lock poisoned").set_tracks(tracks)
    }
    fn set_loop(&mut self, enabled: bool, start: f64, end: f64) -> Result<(), EngineError> {
        self.lock()
            .expect("engine lock poisoned")
            .set_loop(enabled, start, end)
    }
    fn set_speed(&mut self, speed: f64) -> Result<(), EngineError> {
        self.lock().expect("engine lock poisoned").set_speed(speed)
    }
    fn set_volume(&mut self, volume: f32) -> Result<(), EngineError> {
        self.lock().expect("engine lock poisoned").set_volume(volume)
    }
    fn set_track_muted(&mut self, key: TrackKey, muted: bool) -> Result<(), EngineError> {
        self.lock()
            .expect("engine lock poisoned")
            .set_track_muted(key, muted)
    }
    fn set_track_volume(&mut self, key: TrackKey, volume: f32) -> Result<(), EngineError> {
        self.lock()
            .expect("engine lock poisoned")
            .set_track_volume(key, volume)
    }
    fn set_track_envelope(
        &mut self,
        key: TrackKey,
        envelope: Vec<VolumePoint>,
    ) -> Result<(), EngineError> {
        self.lock()
            .expect("engine lock poisoned")
            .set_track_envelope(key, envelope)
    }
    fn play(&mut self) -> Result<(), EngineError> {
        self.lock().expect("engine lock poisoned").play()
    }
    fn pause(&mut self) -> Result<(), EngineError> {
        self.lock().expect("engine lock poisoned").pause()
    }
    fn stop(&mut self) -> Result<(), EngineError> {
        self.lock().expect("engine lock poisoned").stop()
    }
    fn seek(&mut self, position: f64) -> Result<(), EngineError> {
        self.lock().expect("engine lock poisoned").seek(position)
    }
    fn position(&mut self) -> f64 {
        self.lock().expect("engine lock poisoned").position()
    }
    fn meter_levels(&mut self) -> MeterLevels {
        self.lock().expect("engine lock poisoned").meter_levels()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::buffer::AudioBuffer;
    use crate::editor::engine::{EngineClip, EngineConfig, OfflineEngine};
    use crate::editor::utils::key_generator::Key;

    fn shared_engine() -> (Arc<Mutex<OfflineEngine>>, PlaybackController) {
        let engine = Arc::new(Mutex::new(OfflineEngine::new(EngineConfig::default())));
        let controller = PlaybackController::new(Box::new(Arc::clone(&engine)));
        (engine, controller)
    }

    fn view_with_track(seconds: f64, start: f64) -> TimelineView {
        let rate = 8_000;
        let frames = (seconds * f64::from(rate)) as usize;
        let buffer = Arc::new(AudioBuffer::new(rate, vec![vec![0.25; frames]]));
        let track = EngineTrack {
            key: TrackKey::new(0),
            source_path: None,
            start,
            duration: seconds,
            volume: 1.0,
            muted: false,
            envelope: Vec::new(),
            clips: vec![EngineClip {
                duration: buffer.duration(),
                buffer,
                start,
            }],
        };
        TimelineView {
            timeline_duration: start + seconds,
            selection: (0.0, start + seconds),
            in_point: None,
            out_point: None,
            active_region: Some((start, start + seconds)),
            clip_region: Some((start, start + seconds)),
            tracks: vec![track],
        }
    }

    #[test]
    fn play_clamps_into_active_region() {
        let (_engine, mut controller) = shared_engine();
        let view = view_with_track(4.0, 2.0);

        controller.current_time = 0.5;
        controller.play(&view).unwrap();
        assert!(controller.is_playing);
        assert_eq!(controller.current_time, 2.0);
    }

    #[test]
    fn reverse_play_enters_from_the_far_edge() {
        let (_engine, mut controller) = shared_engine();
        let view = view_with_track(4.0, 2.0);

        controller.set_speed(-1.0).unwrap();
        controller.current_time = 0.0;
        controller.play(&view).unwrap();
        assert_eq!(controller.current_time, 6.0);
    }

    #[test]
    fn position_follows_the_engine_clock() {
        let (engine, mut controller) = shared_engine();
        let view = view_with_track(4.0, 0.0);

        controller.play(&view).unwrap();
        engine.lock().unwrap().advance(1.5);
        assert!((controller.position() - 1.5).abs() < 1e-3);

        controller.pause().unwrap();
        engine.lock().unwrap().advance(1.0);
        assert!((controller.position() - 1.5).abs() < 1e-3);
    }

    #[test]
    fn pause_is_idempotent() {
        let (_engine, mut controller) = shared_engine();
        controller.pause().unwrap();
        controller.pause().unwrap();
        assert!(!controller.is_playing);
    }

    #[test]
    fn stop_rewinds_and_resets_speed() {
        let (engine, mut controller) = shared_engine();
        let view = view_with_track(4.0, 0.0);

        controller.play(&view).unwrap();
        controller.speed_up().unwrap();
        engine.lock().unwrap().advance(1.0);
        controller.stop(&view).unwrap();

        assert!(!controller.is_playing);
        assert_eq!(controller.current_time, 0.0);
        assert_eq!(controller.playback_speed, 1.0);
    }

    #[test]
    fn seek_resumes_when_playing() {
        let (engine, mut controller) = shared_engine();
        let view = view_with_track(4.0, 0.0);

        controller.play(&view).unwrap();
        controller.seek(2.0, &view).unwrap();
        assert!(controller.is_playing);
        engine.lock().unwrap().advance(0.5);
        assert!((controller.position() - 2.5).abs() < 1e-3);

        // Seeks are clamped to the timeline
        controller.seek(100.0, &view).unwrap();
        assert!(controller.position() <= view.timeline_duration + 1e-9);
    }

    #[test]
    fn scrub_moves_without_playing() {
        let (_engine, mut controller) = shared_engine();
        let view = view_with_track(4.0, 0.0);

        controller.scrub(2.0, &view);
        assert_eq!(controller.current_time, 0.0);

        controller.set_scrubbing(true);
        controller.scrub(2.0, &view);
        assert_eq!(controller.current_time, 2.0);
        assert!(!controller.is_playing);
    }

    #[test]
    fn speed_steps_through_the_ladder() {
        let (_engine, mut controller) = shared_engine();

        for expected in [2.0, 3.0, 4.0, 5.0, 5.0] {
            controller.speed_up().unwrap();
            assert_eq!(controller.playback_speed, expected);
        }
        controller.speed_down().unwrap();
        assert_eq!(controller.playback_speed, -1.0);
        controller.speed_down().unwrap();
        assert_eq!(controller.playback_speed, -2.0);
        controller.speed_up().unwrap();
        assert_eq!(controller.playback_speed, 1.0);

        controller.speed_down().unwrap();
        controller.reset_speed().unwrap();
        assert_eq!(controller.playback_speed, 1.0);
    }

    #[test]
    fn loop_regions_by_mode() {
        let (_engine, mut controller) = shared_engine();
        let mut view = view_with_track(4.0, 1.0);
        view.selection = (1.5, 2.5);
        view.in_point = Some(2.0);
        view.out_point = Some(3.0);

        assert_eq!(controller.loop_region(&view), (0.0, 5.0));
        controller.loop_mode = LoopMode::Zoom;
        assert_eq!(controller.loop_region(&view), (1.5, 2.5));
        controller.loop_mode = LoopMode::InOut;
        assert_eq!(controller.loop_region(&view), (2.0, 3.0));
        controller.loop_mode = LoopMode::Active;
        assert_eq!(controller.loop_region(&view), (1.0, 5.0));
        controller.loop_mode = LoopMode::Clip;
        assert_eq!(controller.loop_region(&view), (1.0, 5.0));

        view.in_point = None;
        controller.loop_mode = LoopMode::InOut;
        assert_eq!(controller.loop_region(&view), (0.0, 5.0));
    }

    #[test]
    fn holds_are_mutually_exclusive() {
        let (_engine, mut controller) = shared_engine();
        let view = view_with_track(4.0, 0.0);

        controller.start_hold_play(&view).unwrap();
        assert_eq!(controller.hold_mode(), HoldMode::Forward);
        assert!(controller.is_playing);

        // A reverse hold cannot preempt the forward hold
        controller.start_hold_reverse(&view).unwrap();
        assert_eq!(controller.hold_mode(), HoldMode::Forward);
        assert!(controller.playback_speed > 0.0);

        controller.stop_hold_play().unwrap();
        assert_eq!(controller.hold_mode(), HoldMode::None);
        assert!(!controller.is_playing);

        controller.start_hold_reverse(&view).unwrap();
        assert_eq!(controller.hold_mode(), HoldMode::Reverse);
        assert!(controller.playback_speed < 0.0);
        controller.stop_hold_reverse().unwrap();
        assert_eq!(controller.playback_speed, 1.0);
    }

    #[test]
    fn loop_wraps_during_playback() {
        let (engine, mut controller) = shared_engine();
        let view = view_with_track(4.0, 0.0);

        controller.set_loop_enabled(true, &view).unwrap();
        controller.loop_mode = LoopMode::Full;
        controller.play(&view).unwrap();

        engine.lock().unwrap().advance(5.0);
        let position = controller.position();
        assert!(position < 4.0, "position {position} escaped the loop");
    }
}
