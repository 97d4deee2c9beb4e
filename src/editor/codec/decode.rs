//! Symphonia-backed decoding for the built-in codec service.
//!
//! Everything here runs off the main task: `decode_file` on the caller's
//! thread for synchronous loads, `decode_streaming` on a per-session import
//! thread that posts events back over a channel.

use std::borrow::Cow;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

use log::{debug, warn};
use symphonia::core::audio::{AudioBuffer as SymAudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::conv::IntoSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample as SymphoniaSample;

use super::{AudioMetadata, CodecError, CodecEvent, ImportSessionKey};
use crate::editor::buffer::AudioBuffer;
use crate::editor::{waveform, Sample};

/// How many finished buckets accumulate before a waveform chunk is posted.
const CHUNK_BUCKETS: usize = 50;

pub(super) struct Decoded {
    pub sample_rate: u32,
    pub channels: Vec<Vec<Sample>>,
}
impl Decoded {
    pub fn into_buffer(self) -> AudioBuffer {
        AudioBuffer::new(self.sample_rate, self.channels)
    }
}

struct Opened {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: Option<u32>,
    total_frames: Option<u64>,
    channels: Option<usize>,
    bits_per_sample: Option<u32>,
}

fn open(path: &Path) -> Result<Opened, CodecError> {
    let file =
        Box::new(File::open(path).map_err(|_| CodecError::FileNotFound(path.to_path_buf()))?);
    let stream = MediaSourceStream::new(file, Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|_| CodecError::UnknownFormat)?;
    let format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| CodecError::Other("No default track".to_owned()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();
    let decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|_| CodecError::UnknownFormat)?;

    Ok(Opened {
        format,
        decoder,
        track_id,
        sample_rate: params.sample_rate,
        total_frames: params.n_frames,
        channels: params.channels.map(|c| c.count()),
        bits_per_sample: params.bits_per_sample,
    })
}

/// Read stream metadata without decoding any audio.
pub(super) fn probe(path: &Path) -> Result<AudioMetadata, CodecError> {
    let opened = open(path)?;
    let sample_rate = opened
        .sample_rate
        .ok_or_else(|| CodecError::Other("Stream has no sample rate".to_owned()))?;
    let duration = opened
        .total_frames
        .map(|frames| frames as f64 / f64::from(sample_rate))
        .unwrap_or(0.0);
    Ok(AudioMetadata {
        duration,
        sample_rate,
        channels: opened.channels.unwrap_or(0),
        bit_depth: opened.bits_per_sample.unwrap_or(0),
        format: path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase(),
    })
}

/// Decode a whole file into memory.
pub(super) fn decode_file(path: &Path) -> Result<Decoded, CodecError> {
    let mut opened = open(path)?;
    let mut sample_rate = 0;
    let mut channels: Vec<Vec<Sample>> = Vec::new();

    loop {
        let packet = match opened.format.next_packet() {
            Ok(packet) => packet,
            // Symphonia reports end of stream as an IO error
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(CodecError::Other(e.to_string())),
        };
        if packet.track_id() != opened.track_id {
            continue;
        }
        match opened.decoder.decode(&packet) {
            Ok(decoded) => {
                if channels.is_empty() {
                    sample_rate = decoded.spec().rate;
                    channels = vec![Vec::new(); decoded.spec().channels.count()];
                }
                extend_from_buffer(&mut channels, decoded);
            }
            Err(SymphoniaError::DecodeError(e)) => {
                // Recoverable; skip the broken packet
                warn!("dropping undecodable packet: {e}");
            }
            Err(e) => return Err(CodecError::Other(e.to_string())),
        }
    }

    if channels.is_empty() || channels[0].is_empty() {
        return Err(CodecError::Other("Stream contained no audio".to_owned()));
    }
    Ok(Decoded {
        sample_rate,
        channels,
    })
}

/// Decode a file on an import thread, streaming overview peaks as they
/// complete and finishing with an `ImportComplete` carrying the buffer.
///
/// Cancellation is cooperative via the session's flag; once set, no further
/// events are posted for the session.
pub(super) fn decode_streaming(
    path: &Path,
    buckets: usize,
    session: ImportSessionKey,
    events: &Sender<CodecEvent>,
    cancelled: &AtomicBool,
) {
    let result = decode_streaming_inner(path, buckets, session, events, cancelled);
    if cancelled.load(Ordering::Relaxed) {
        return;
    }
    if let Err(error) = result {
        let _ = events.send(CodecEvent::ImportError { session, error });
    }
}

fn decode_streaming_inner(
    path: &Path,
    buckets: usize,
    session: ImportSessionKey,
    events: &Sender<CodecEvent>,
    cancelled: &AtomicBool,
) -> Result<(), CodecError> {
    let buckets = buckets.max(1);
    let mut opened = open(path)?;
    let total_frames = opened.total_frames;

    let mut sample_rate = 0;
    let mut channels: Vec<Vec<Sample>> = Vec::new();
    let mut sent_buckets = 0usize;
    let mut last_progress = 0.0f32;

    loop {
        if cancelled.load(Ordering::Relaxed) {
            debug!("import session {session:?} cancelled");
            return Ok(());
        }

        let packet = match opened.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(CodecError::Other(e.to_string())),
        };
        if packet.track_id() != opened.track_id {
            continue;
        }
        match opened.decoder.decode(&packet) {
            Ok(decoded) => {
                if channels.is_empty() {
                    sample_rate = decoded.spec().rate;
                    channels = vec![Vec::new(); decoded.spec().channels.count()];
                }
                extend_from_buffer(&mut channels, decoded);
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("dropping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(CodecError::Other(e.to_string())),
        }

        // With a known length, stream finished buckets as they fill up
        if let Some(total) = total_frames {
            let decoded_frames = channels.first().map(|c| c.len()).unwrap_or(0) as u64;
            let progress = (decoded_frames as f32 / total as f32).min(1.0);
            let done_buckets =
                ((decoded_frames * buckets as u64) / total.max(1)) as usize;

            if done_buckets >= sent_buckets + CHUNK_BUCKETS {
                let peaks =
                    bucket_peaks(&channels, total as usize, buckets, sent_buckets, done_buckets);
                events
                    .send(CodecEvent::WaveformChunk {
                        session,
                        start_bucket: sent_buckets,
                        peaks,
                        progress,
                    })
                    .map_err(|_| CodecError::Other("Import listener went away".to_owned()))?;
                sent_buckets = done_buckets;
            }

            if progress - last_progress >= 0.05 {
                last_progress = progress;
                let _ = events.send(CodecEvent::DecodeProgress { session, progress });
            }
        }
    }

    if channels.is_empty() || channels[0].is_empty() {
        return Err(CodecError::Other("Stream contained no audio".to_owned()));
    }

    let buffer = AudioBuffer::new(sample_rate, channels);
    // Final peaks from the complete data; streamed chunks were provisional
    let peaks = waveform::extract_peaks(&buffer, buckets);
    let duration = buffer.duration();

    if cancelled.load(Ordering::Relaxed) {
        return Ok(());
    }
    let _ = events.send(CodecEvent::ImportComplete {
        session,
        waveform: peaks,
        duration,
        buffer,
    });
    debug!("import session {session:?} complete ({duration:.2}s)");
    Ok(())
}

/// Min/max peaks of the buckets `[from, to)` out of `buckets` over the
/// (possibly still growing) channel data.
fn bucket_peaks(
    channels: &[Vec<Sample>],
    total_frames: usize,
    buckets: usize,
    from: usize,
    to: usize,
) -> Vec<f32> {
    let available = channels.first().map(|c| c.len()).unwrap_or(0);
    let mut peaks = Vec::with_capacity((to - from) * 2);
    for bucket in from..to {
        let start = bucket * total_frames / buckets;
        let end = (((bucket + 1) * total_frames) / buckets)
            .max(start + 1)
            .min(available);
        if start >= end {
            peaks.push(0.0);
            peaks.push(0.0);
            continue;
        }
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for channel in channels {
            for &sample in &channel[start..end] {
                min = min.min(sample);
                max = max.max(sample);
            }
        }
        peaks.push(min);
        peaks.push(max);
    }
    peaks
}

fn extend_from_buffer(channels: &mut [Vec<Sample>], buffer_ref: AudioBufferRef) {
    use AudioBufferRef as A;
    match buffer_ref {
        A::U8(buffer) => extend(channels, buffer),
        A::U16(buffer) => extend(channels, buffer),
        A::U24(buffer) => extend(channels, buffer),
        A::U32(buffer) => extend(channels, buffer),
        A::S8(buffer) => extend(channels, buffer),
        A::S16(buffer) => extend(channels, buffer),
        A::S24(buffer) => extend(channels, buffer),
        A::S32(buffer) => extend(channels, buffer),
        A::F32(buffer) => extend(channels, buffer),
        A::F64(buffer) => extend(channels, buffer),
    }

    fn extend<S>(channels: &mut [Vec<Sample>], buffer: Cow<SymAudioBuffer<S>>)
    where
        S: SymphoniaSample + IntoSample<Sample>,
    {
        for (index, output) in channels.iter_mut().enumerate() {
            for &sample in buffer.chan(index) {
                output.push(sample.into_sample());
            }
        }
    }
}
