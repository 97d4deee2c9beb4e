use std::{collections::HashMap, sync::Arc};

use super::buffer::AudioBuffer;

/// Bucket count of the overview tier, computed once at import.
pub const OVERVIEW_BUCKETS: usize = 1000;
/// Upper bound on hi-res bucket requests.
pub const MAX_HI_RES_BUCKETS: usize = 8000;
/// Hi-res is only worth requesting once the required bars exceed the overview
/// by this factor.
const HI_RES_FACTOR: usize = 2;

/// Min/max peaks of a buffer, `2n` values alternating min, max.
/// Channels are folded together, so one pair covers a whole bucket of frames.
pub fn extract_peaks(buffer: &AudioBuffer, buckets: usize) -> Vec<f32> {
    let buckets = buckets.max(1);
    let mut peaks = Vec::with_capacity(buckets * 2);
    let frames = buffer.len();
    if frames == 0 {
        peaks.resize(buckets * 2, 0.0);
        return peaks;
    }

    for bucket in 0..buckets {
        let start = bucket * frames / buckets;
        let end = (((bucket + 1) * frames) / buckets).max(start + 1).min(frames);

        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for channel in 0..buffer.channels() {
            for &sample in &buffer.channel(channel)[start..end] {
                min = min.min(sample);
                max = max.max(sample);
            }
        }
        peaks.push(min);
        peaks.push(max);
    }
    peaks
}

/// Overview peaks for a freshly imported buffer.
pub fn overview(buffer: &AudioBuffer) -> Vec<f32> {
    extract_peaks(buffer, OVERVIEW_BUCKETS.min(buffer.len().max(1)))
}

/// Whether a view that needs `required_bars` bars should ask for hi-res peaks
/// instead of stretching the overview.
pub fn needs_hi_res(required_bars: usize) -> bool {
    required_bars > OVERVIEW_BUCKETS * HI_RES_FACTOR
}

/// Cache of on-demand hi-res peak arrays, keyed by `(buffer_len, buckets)`.
pub struct WaveformCache {
    hi_res: HashMap<(usize, usize), Arc<Vec<f32>>>,
}
impl WaveformCache {
    pub fn new() -> Self {
        Self {
            hi_res: HashMap::new(),
        }
    }

    pub fn hi_res(&mut self, buffer: &AudioBuffer, target_buckets: usize) -> Arc<Vec<f32>> {
        let buckets = target_buckets
            .min(MAX_HI_RES_BUCKETS)
            .min(buffer.len())
            .max(1);

        Arc::clone(
            self.hi_res
                .entry((buffer.len(), buckets))
                .or_insert_with(|| Arc::new(extract_peaks(buffer, buckets))),
        )
    }

    pub fn clear(&mut self) {
        self.hi_res.clear();
    }

    pub fn len(&self) -> usize {
        self.hi_res.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hi_res.is_empty()
    }
}
impl Default for WaveformCache {
    fn default() -> Self {
        Self::new()
    }
}
