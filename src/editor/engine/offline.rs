//! A render engine without an audio device.
//!
//! The clock is the caller's: [`OfflineEngine::advance`] renders the next
//! stretch of audio into a scratch buffer and updates position and meters.
//! Integration tests and headless hosts drive the whole playback stack with
//! it.

use super::{
    EngineConfig, EngineError, EngineTrack, MeterLevels, RenderEngine, RenderState,
    RenderedMeters,
};
use crate::editor::timeline::{TrackKey, VolumePoint};
use crate::editor::Sample;

const CHUNK_FRAMES: usize = 1024;
const CHANNELS: usize = 2;

pub struct OfflineEngine {
    sample_rate: u32,
    state: RenderState,
    meters: RenderedMeters,
    scratch: Vec<Sample>,
}
impl OfflineEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            state: RenderState::new(),
            meters: RenderedMeters::default(),
            scratch: vec![0.0; CHUNK_FRAMES * CHANNELS],
        }
    }

    /// Simulate `seconds` of wall-clock time passing.
    pub fn advance(&mut self, seconds: f64) {
        if !self.state.playing {
            return;
        }
        let mut remaining = (seconds * f64::from(self.sample_rate)).round() as usize;
        while remaining > 0 {
            let frames = remaining.min(CHUNK_FRAMES);
            let out = &mut self.scratch[..frames * CHANNELS];
            self.state
                .render(out, CHANNELS, self.sample_rate, &mut self.meters);
            remaining -= frames;
        }
    }

    /// The most recently rendered chunk, for tests that inspect output.
    pub fn last_rendered(&self) -> &[Sample] {
        &self.scratch
    }
}
impl RenderEngine for OfflineEngine {
    fn set_tracks(&mut self, tracks: Vec<EngineTrack>) -> Result<(), EngineError> {
        self.meters = RenderedMeters::for_tracks(&tracks);
        self.state.tracks = tracks;
        Ok(())
    }

    fn set_loop(&mut self, enabled: bool, start: f64, end: f64) -> Result<(), EngineError> {
        self.state.loop_enabled = enabled;
        self.state.loop_start = start;
        self.state.loop_end = end;
        Ok(())
    }

    fn set_speed(&mut self, speed: f64) -> Result<(), EngineError> {
        self.state.speed = speed;
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<(), EngineError> {
        self.state.volume = volume;
        Ok(())
    }

    fn set_track_muted(&mut self, key: TrackKey, muted: bool) -> Result<(), EngineError> {
        if let Some(track) = self.state.track_mut(key) {
            track.muted = muted;
        }
        Ok(())
    }

    fn set_track_volume(&mut self, key: TrackKey, volume: f32) -> Result<(), EngineError> {
        if let Some(track) = self.state.track_mut(key) {
            track.volume = volume;
        }
        Ok(())
    }

    fn set_track_envelope(
        &mut self,
        key: TrackKey,
        envelope: Vec<VolumePoint>,
    ) -> Result<(), EngineError> {
        if let Some(track) = self.state.track_mut(key) {
            track.envelope = envelope;
        }
        Ok(())
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.state.playing = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.state.playing = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.state.playing = false;
        self.state.position = 0.0;
        Ok(())
    }

    fn seek(&mut self, position: f64) -> Result<(), EngineError> {
        self.state.position = position.max(0.0);
        Ok(())
    }

    fn position(&mut self) -> f64 {
        self.state.position
    }

    fn meter_levels(&mut self) -> MeterLevels {
        MeterLevels {
            tracks: self.meters.tracks.clone(),
            master: self.meters.master,
        }
    }
}
