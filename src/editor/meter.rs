//! Display-side meter ballistics.
//!
//! The engine reports raw peak/RMS frames at UI cadence; the meter state
//! turns them into stable display values: instant attack, exponential decay,
//! a two-second peak hold, and a sticky per-channel clip indicator.

use std::collections::HashMap;

use super::engine::{MeterFrame, MeterLevels};
use super::timeline::TrackKey;

/// Per-frame decay factor once the input falls below the displayed value.
pub const METER_DECAY: f32 = 0.92;
/// How long a peak is held before it starts to fall, in seconds.
const PEAK_HOLD_SECS: f64 = 2.0;

/// Smoothed meter display for one stereo bus.
#[derive(Clone, Debug, Default)]
pub struct MeterState {
    pub peak: [f32; 2],
    pub rms: [f32; 2],
    hold: [f32; 2],
    hold_age: [f64; 2],
    clipped: [bool; 2],
}
impl MeterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw frame; `dt` is the time since the previous update.
    pub fn update(&mut self, raw: MeterFrame, dt: f64) {
        for ch in 0..2 {
            self.peak[ch] = ballistic(self.peak[ch], raw.peak[ch]);
            self.rms[ch] = ballistic(self.rms[ch], raw.rms[ch]);

            if raw.peak[ch] >= self.hold[ch] {
                self.hold[ch] = raw.peak[ch];
                self.hold_age[ch] = 0.0;
            } else {
                self.hold_age[ch] += dt;
                if self.hold_age[ch] > PEAK_HOLD_SECS {
                    self.hold[ch] *= METER_DECAY;
                }
            }

            if raw.peak[ch] >= 1.0 {
                self.clipped[ch] = true;
            }
        }
    }

    pub fn peak_hold(&self) -> [f32; 2] {
        self.hold
    }

    pub fn clipped(&self) -> [bool; 2] {
        self.clipped
    }

    pub fn clear_clip(&mut self) {
        self.clipped = [false; 2];
    }
}

fn ballistic(display: f32, raw: f32) -> f32 {
    if raw >= display {
        raw
    } else {
        display * METER_DECAY
    }
}

/// Meter displays for every track plus the master bus.
#[derive(Default)]
pub struct MeterBank {
    tracks: HashMap<TrackKey, MeterState>,
    pub master: MeterState,
}
impl MeterBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one engine poll. Tracks that stopped reporting keep decaying via
    /// their absent frames being zero on the next report they do get; tracks
    /// that disappeared from the engine entirely are dropped.
    pub fn update(&mut self, levels: &MeterLevels, dt: f64) {
        self.tracks
            .retain(|key, _| levels.tracks.iter().any(|(k, _)| k == key));
        for (key, frame) in &levels.tracks {
            self.tracks.entry(*key).or_default().update(*frame, dt);
        }
        self.master.update(levels.master, dt);
    }

    /// Keep decaying with no input, e.g. while paused.
    pub fn decay_all(&mut self, dt: f64) {
        let silent = MeterFrame::default();
        for state in self.tracks.values_mut() {
            state.update(silent, dt);
        }
        self.master.update(silent, dt);
    }

    pub fn track(&self, key: TrackKey) -> Option<&MeterState> {
        self.tracks.get(&key)
    }

    pub fn clear_clips(&mut self) {
        for state in self.tracks.values_mut() {
            state.clear_clip();
        }
        self.master.clear_clip();
    }
}
