//! Sample-accurate render of active clips, shared by export, clipboard
//! mixing and the offline engine. Playback rendering follows the same rules
//! inside the engine; the mixer itself always renders at natural rate.

use std::sync::Arc;

use super::buffer::AudioBuffer;
use super::timeline::{envelope_value_at, Track, TrackAudio, TrackKey, TrackStore, VolumePoint};
use super::utils::to_samples;
use super::Sample;

/// Peak ceiling after normalization.
const NORMALIZE_TARGET: f32 = 0.95;

/// One clip's contribution to a mix, with the gain context of its track.
#[derive(Clone, Debug)]
pub struct MixSource {
    pub buffer: Arc<AudioBuffer>,
    /// Timeline start of the clip.
    pub start: f64,
    /// Fallback gain when the envelope is empty.
    pub volume: f32,
    /// The owning track's gain automation, track-relative.
    pub envelope: Vec<VolumePoint>,
    /// The owning track's start, for envelope time conversion.
    pub track_start: f64,
}

/// The track filter: if any track is soloed (and not muted), only solo+unmuted
/// tracks play; otherwise all unmuted ones do.
pub fn active_track_keys(tracks: &[Track]) -> Vec<TrackKey> {
    let any_solo = tracks.iter().any(|t| t.solo && !t.muted);
    tracks
        .iter()
        .filter(|t| {
            if any_solo {
                t.solo && !t.muted
            } else {
                !t.muted
            }
        })
        .map(|t| t.key)
        .collect()
}

/// Collect the mix sources of every active track in the store.
pub fn sources_from_store(store: &TrackStore) -> Vec<MixSource> {
    let mut sources = Vec::new();
    for key in active_track_keys(store.tracks()) {
        let track = store.track(key).expect("active key comes from the store");
        match &track.audio {
            TrackAudio::Empty => {}
            TrackAudio::Buffer { buffer, .. } => sources.push(MixSource {
                buffer: Arc::clone(buffer),
                start: track.start,
                volume: track.volume,
                envelope: track.envelope.clone(),
                track_start: track.start,
            }),
            TrackAudio::Clips(clips) => {
                for clip in clips {
                    sources.push(MixSource {
                        buffer: Arc::clone(&clip.buffer),
                        start: clip.start,
                        volume: track.volume,
                        envelope: track.envelope.clone(),
                        track_start: track.start,
                    });
                }
            }
        }
    }
    sources
}

/// Mix sources into one buffer covering their combined extent.
///
/// The output uses the first source's sample rate and the largest channel
/// count seen; input channel `min(ch, channels - 1)` feeds output channel
/// `ch`. Gain comes from the envelope evaluated at the sample's track-relative
/// time, falling back to the track volume. If the summed peak exceeds unity
/// the whole mix is scaled to [`NORMALIZE_TARGET`].
pub fn mix_sources(sources: &[MixSource]) -> Option<AudioBuffer> {
    let first = sources.iter().find(|s| !s.buffer.is_empty())?;
    let sample_rate = first.buffer.sample_rate();

    let timeline_start = sources
        .iter()
        .map(|s| s.start)
        .fold(f64::MAX, f64::min);
    let timeline_end = sources
        .iter()
        .map(|s| s.start + s.buffer.duration())
        .fold(f64::MIN, f64::max);
    let channels = sources.iter().map(|s| s.buffer.channels()).max()?;

    let frames = ((timeline_end - timeline_start) * f64::from(sample_rate)).ceil() as usize;
    if frames == 0 {
        return None;
    }

    // 64-bit summing buffers keep rounding errors out of deep mixes.
    let mut sums = vec![vec![0.0f64; frames]; channels];

    for source in sources {
        let start_sample = to_samples(source.start - timeline_start, sample_rate);
        let length = source.buffer.len();
        for i in 0..length {
            let index = start_sample + i;
            if index >= frames {
                break;
            }
            let gain = if source.envelope.is_empty() {
                source.volume
            } else {
                let t = timeline_start + (start_sample + i) as f64 / f64::from(sample_rate)
                    - source.track_start;
                envelope_value_at(&source.envelope, source.volume, t)
            };
            for (ch, sum) in sums.iter_mut().enumerate() {
                let input = source.buffer.channel_clamped(ch);
                sum[index] += f64::from(input[i]) * f64::from(gain);
            }
        }
    }

    let max_abs = sums
        .iter()
        .flat_map(|channel| channel.iter())
        .fold(0.0f64, |max, &s| max.max(s.abs()));
    let scale = if max_abs > 1.0 {
        f64::from(NORMALIZE_TARGET) / max_abs
    } else {
        1.0
    };

    let channels: Vec<Vec<Sample>> = sums
        .into_iter()
        .map(|channel| channel.into_iter().map(|s| (s * scale) as Sample).collect())
        .collect();
    Some(AudioBuffer::new(sample_rate, channels))
}

/// Mix plain buffer fragments into a buffer of exactly `duration` seconds.
///
/// Each part is placed at its offset inside the region; no gain or
/// normalization is applied. Used for cut buffers and region extraction,
/// where the result should carry the summed content verbatim.
pub fn mix_contributions(
    parts: &[(Arc<AudioBuffer>, f64)],
    duration: f64,
) -> Option<AudioBuffer> {
    let first = parts.iter().find(|(buffer, _)| !buffer.is_empty())?;
    let sample_rate = first.0.sample_rate();
    let channels = parts.iter().map(|(buffer, _)| buffer.channels()).max()?;
    let frames = to_samples(duration, sample_rate);
    if frames == 0 {
        return None;
    }

    let mut sums = vec![vec![0.0f64; frames]; channels];
    for (buffer, offset) in parts {
        let start_sample = to_samples(*offset, sample_rate);
        for i in 0..buffer.len() {
            let index = start_sample + i;
            if index >= frames {
                break;
            }
            for (ch, sum) in sums.iter_mut().enumerate() {
                sum[index] += f64::from(buffer.channel_clamped(ch)[i]);
            }
        }
    }

    let channels: Vec<Vec<Sample>> = sums
        .into_iter()
        .map(|channel| channel.into_iter().map(|s| s as Sample).collect())
        .collect();
    Some(AudioBuffer::new(sample_rate, channels))
}

/// Render the store's active tracks into one buffer, e.g. for export.
pub fn mixdown(store: &TrackStore) -> Option<AudioBuffer> {
    let sources = sources_from_store(store);
    mix_sources(&sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::timeline::VolumePointKey;
    use crate::editor::utils::key_generator::Key;

    const RATE: u32 = 1000;

    fn constant_buffer(seconds: f64, value: f32, channels: usize) -> Arc<AudioBuffer> {
        let frames = (seconds * f64::from(RATE)).round() as usize;
        Arc::new(AudioBuffer::new(
            RATE,
            vec![vec![value; frames]; channels],
        ))
    }

    fn source(buffer: Arc<AudioBuffer>, start: f64, volume: f32) -> MixSource {
        MixSource {
            buffer,
            start,
            volume,
            envelope: Vec::new(),
            track_start: start,
        }
    }

    fn point(key: u32, time: f64, value: f32) -> VolumePoint {
        VolumePoint {
            key: VolumePointKey::new(key),
            time,
            value,
        }
    }

    #[test]
    fn mixes_at_clip_positions() {
        let mixed = mix_sources(&[
            source(constant_buffer(1.0, 0.25, 1), 0.0, 1.0),
            source(constant_buffer(1.0, 0.25, 1), 0.5, 1.0),
        ])
        .unwrap();

        assert_eq!(mixed.duration(), 1.5);
        let samples = mixed.channel(0);
        assert_eq!(samples[100], 0.25);
        assert_eq!(samples[700], 0.5);
        assert_eq!(samples[1300], 0.25);
    }

    #[test]
    fn channel_count_is_max_and_mono_fans_out() {
        let mixed = mix_sources(&[
            source(constant_buffer(1.0, 0.25, 1), 0.0, 1.0),
            source(constant_buffer(1.0, 0.25, 2), 0.0, 1.0),
        ])
        .unwrap();

        assert_eq!(mixed.channels(), 2);
        assert_eq!(mixed.channel(0)[10], 0.5);
        assert_eq!(mixed.channel(1)[10], 0.5);
    }

    #[test]
    fn volume_applies_without_envelope() {
        let mixed = mix_sources(&[source(constant_buffer(1.0, 0.5, 1), 0.0, 0.5)]).unwrap();
        assert_eq!(mixed.channel(0)[10], 0.25);
    }

    #[test]
    fn envelope_gain_uses_track_relative_time() {
        // S6: envelope [(0, 1), (2, 0)] on a track at 5.0; at timeline 6.0
        // the track-relative time is 1.0 and the gain 0.5.
        let mut src = source(constant_buffer(2.0, 1.0, 1), 5.0, 1.0);
        src.envelope = vec![point(0, 0.0, 1.0), point(1, 2.0, 0.0)];
        let mixed = mix_sources(&[src]).unwrap();

        let at_six = mixed.channel(0)[to_samples(1.0, RATE)];
        assert!((at_six - 0.5).abs() < 2e-3);
    }

    #[test]
    fn normalizes_when_sum_clips() {
        let mixed = mix_sources(&[
            source(constant_buffer(0.5, 0.8, 1), 0.0, 1.0),
            source(constant_buffer(0.5, 0.8, 1), 0.0, 1.0),
        ])
        .unwrap();

        let peak = mixed
            .channel(0)
            .iter()
            .fold(0.0f32, |m, &s| m.max(s.abs()));
        assert!((peak - 0.95).abs() < 1e-6);
    }

    #[test]
    fn contributions_are_padded_to_duration() {
        let mixed =
            mix_contributions(&[(constant_buffer(1.0, 0.5, 1), 0.5)], 2.0).unwrap();

        assert_eq!(mixed.duration(), 2.0);
        assert_eq!(mixed.channel(0)[100], 0.0);
        assert_eq!(mixed.channel(0)[1000], 0.5);
        assert_eq!(mixed.channel(0)[1600], 0.0);
    }

    #[test]
    fn solo_filter_wins_over_mute_filter() {
        let mut store = TrackStore::new();
        let a = store.add_empty_track("a".into());
        let b = store.add_empty_track("b".into());
        let c = store.add_empty_track("c".into());

        assert_eq!(active_track_keys(store.tracks()).len(), 3);

        store.set_track_muted(c, true);
        assert_eq!(active_track_keys(store.tracks()), vec![a, b]);

        store.set_track_solo(b, true);
        assert_eq!(active_track_keys(store.tracks()), vec![b]);

        // A muted solo track silences the solo set entirely
        store.set_track_muted(b, true);
        assert_eq!(active_track_keys(store.tracks()), vec![a]);
    }
}
