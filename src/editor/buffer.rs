use std::{
    collections::HashMap,
    error::Error,
    fmt::{Debug, Display},
    ops::Range,
    sync::Arc,
};

use super::utils::key_generator::{key_type, KeyGenerator, KeyOverflowError};
use super::Sample;

key_type!(pub struct AudioBufferKey(u32));

/// An immutable block of decoded PCM audio.
///
/// Buffers are shared by reference between clips, the clipboard, the registry
/// and history snapshots; edits never mutate samples, they allocate new
/// buffers instead.
#[derive(PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    /// One sample vector per channel, all of equal length.
    channels: Vec<Vec<Sample>>,
}
impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<Sample>>) -> Self {
        debug_assert!(!channels.is_empty(), "AudioBuffer must have a channel");
        debug_assert!(
            channels.iter().all(|c| c.len() == channels[0].len()),
            "AudioBuffer channels must have equal lengths"
        );
        Self {
            sample_rate,
            channels,
        }
    }

    /// Deinterleave `samples` into `channel_count` channels.
    pub fn from_interleaved(sample_rate: u32, channel_count: usize, samples: &[Sample]) -> Self {
        let channel_count = channel_count.max(1);
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn silent(sample_rate: u32, channel_count: usize, frames: usize) -> Self {
        Self {
            sample_rate,
            channels: vec![vec![0.0; frames]; channel_count.max(1)],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames (samples per channel).
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.len() as f64 / f64::from(self.sample_rate)
    }

    /// Read-only view of one channel's samples.
    pub fn channel(&self, index: usize) -> &[Sample] {
        &self.channels[index]
    }

    /// Channel view with the index clamped into range.
    /// Mixing maps output channel `ch` to input channel `min(ch, channels - 1)`.
    pub fn channel_clamped(&self, index: usize) -> &[Sample] {
        &self.channels[index.min(self.channels.len() - 1)]
    }

    /// Copy a frame range out into a new buffer.
    /// The range is clamped to the buffer's length.
    pub fn slice(&self, range: Range<usize>) -> AudioBuffer {
        let start = range.start.min(self.len());
        let end = range.end.min(self.len()).max(start);
        AudioBuffer {
            sample_rate: self.sample_rate,
            channels: self
                .channels
                .iter()
                .map(|channel| channel[start..end].to_vec())
                .collect(),
        }
    }

    /// Interleave all channels into a single vector, frame by frame.
    pub fn interleaved(&self) -> Vec<Sample> {
        let mut out = Vec::with_capacity(self.len() * self.channels());
        for frame in 0..self.len() {
            for channel in &self.channels {
                out.push(channel[frame]);
            }
        }
        out
    }
}
impl Debug for AudioBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AudioBuffer {{ sample_rate: {}, channels(): {}, len(): {} }}",
            self.sample_rate,
            self.channels(),
            self.len(),
        )
    }
}

/// Handle table of all buffers known to the editor.
///
/// The registry hands out shared references; a buffer is only deallocated once
/// no track, clipboard entry or history snapshot holds one.
pub struct BufferRegistry {
    buffers: HashMap<AudioBufferKey, Arc<AudioBuffer>>,
    key_generator: KeyGenerator<AudioBufferKey>,
}
impl BufferRegistry {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            key_generator: KeyGenerator::new(),
        }
    }

    pub fn insert(&mut self, buffer: AudioBuffer) -> Result<AudioBufferKey, RegistryOverflowError> {
        self.insert_shared(Arc::new(buffer))
    }

    pub fn insert_shared(
        &mut self,
        buffer: Arc<AudioBuffer>,
    ) -> Result<AudioBufferKey, RegistryOverflowError> {
        let key = self.key_generator.next()?;
        self.buffers.insert(key, buffer);
        Ok(key)
    }

    pub fn get(&self, key: AudioBufferKey) -> Result<Arc<AudioBuffer>, UnknownBufferError> {
        self.buffers
            .get(&key)
            .map(Arc::clone)
            .ok_or(UnknownBufferError { key })
    }

    /// Drop the registry's reference.
    /// The buffer itself lives on for as long as anything else references it.
    pub fn release(&mut self, key: AudioBufferKey) -> Result<(), UnknownBufferError> {
        self.buffers
            .remove(&key)
            .ok_or(UnknownBufferError { key })?;
        self.key_generator
            .free(key)
            .expect("Registry key must be live while its buffer is present");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AudioBufferKey, Arc<AudioBuffer>)> + '_ {
        self.buffers.iter().map(|(&key, buf)| (key, Arc::clone(buf)))
    }
}
impl Default for BufferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownBufferError {
    pub key: AudioBufferKey,
}
impl Display for UnknownBufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "No audio buffer with key, {:?}, in registry", self.key)
    }
}
impl Error for UnknownBufferError {}

#[derive(Debug, PartialEq, Eq)]
pub struct RegistryOverflowError;
impl Display for RegistryOverflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "The max number of audio buffers has been exceeded")
    }
}
impl Error for RegistryOverflowError {}
impl From<KeyOverflowError> for RegistryOverflowError {
    fn from(_: KeyOverflowError) -> Self {
        Self
    }
}
