//! The cpal-backed render engine.
//!
//! The output stream lives on its own thread (cpal streams are not `Send`);
//! the control side talks to the audio callback through a lock-free command
//! ring, and reads position and meters from atomics. Replaced track sets ride
//! back over a garbage ring so their buffers are freed off the audio thread.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::sync_channel,
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use log::{error, info};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};

use super::{
    EngineConfig, EngineError, EngineTrack, MeterFrame, MeterLevels, RenderEngine, RenderState,
    RenderedMeters,
};
use crate::editor::timeline::{TrackKey, VolumePoint};
use crate::editor::utils::{AtomicF32, AtomicF64};
use crate::editor::Sample;

/// Ring capacity; bounds how many commands can be issued between callbacks.
const COMMAND_CAPACITY: usize = 256;
/// Biggest callback the preallocated scratch covers in one render pass.
const MAX_CHUNK_FRAMES: usize = 4096;

struct TrackSet {
    tracks: Vec<EngineTrack>,
    rendered: RenderedMeters,
    meters: Arc<MeterTable>,
}

enum Command {
    SetTracks(Box<TrackSet>),
    SetLoop { enabled: bool, start: f64, end: f64 },
    SetSpeed(f64),
    SetVolume(f32),
    SetTrackMuted(TrackKey, bool),
    SetTrackVolume(TrackKey, f32),
    SetTrackEnvelope(TrackKey, Box<Vec<VolumePoint>>),
    Play,
    Pause,
    Seek(f64),
}

enum Trash {
    Set(Box<TrackSet>),
    Envelope(Vec<VolumePoint>),
}

/// Lock-free meter mailbox written by the callback, read by the control side.
pub(crate) struct MeterTable {
    tracks: Vec<(TrackKey, AtomicMeter)>,
    master: AtomicMeter,
}
impl MeterTable {
    fn for_tracks(tracks: &[EngineTrack]) -> Self {
        Self {
            tracks: tracks
                .iter()
                .map(|t| (t.key, AtomicMeter::new()))
                .collect(),
            master: AtomicMeter::new(),
        }
    }

    fn publish(&self, rendered: &RenderedMeters) {
        for ((_, atomic), (_, frame)) in self.tracks.iter().zip(&rendered.tracks) {
            atomic.store(*frame);
        }
        self.master.store(rendered.master);
    }

    fn read(&self) -> MeterLevels {
        MeterLevels {
            tracks: self
                .tracks
                .iter()
                .map(|(key, atomic)| (*key, atomic.load()))
                .collect(),
            master: self.master.load(),
        }
    }
}

struct AtomicMeter {
    peak: [AtomicF32; 2],
    rms: [AtomicF32; 2],
}
impl AtomicMeter {
    fn new() -> Self {
        Self {
            peak: [AtomicF32::new(0.0), AtomicF32::new(0.0)],
            rms: [AtomicF32::new(0.0), AtomicF32::new(0.0)],
        }
    }

    fn store(&self, frame: MeterFrame) {
        for ch in 0..2 {
            self.peak[ch].store(frame.peak[ch], Ordering::Relaxed);
            self.rms[ch].store(frame.rms[ch], Ordering::Relaxed);
        }
    }

    fn load(&self) -> MeterFrame {
        let mut frame = MeterFrame::default();
        for ch in 0..2 {
            frame.peak[ch] = self.peak[ch].load(Ordering::Relaxed);
            frame.rms[ch] = self.rms[ch].load(Ordering::Relaxed);
        }
        frame
    }
}

/// The audio-thread half: renders from its own state, applying queued
/// commands at the start of every callback.
struct Processor {
    state: RenderState,
    rendered: RenderedMeters,
    meters: Arc<MeterTable>,
    commands: HeapConsumer<Command>,
    trash: HeapProducer<Trash>,
    position: Arc<AtomicF64>,
    scratch: Vec<Sample>,
    channels: usize,
    sample_rate: u32,
}
impl Processor {
    fn poll(&mut self) {
        while let Some(command) = self.commands.pop() {
            match command {
                Command::SetTracks(mut set) => {
                    std::mem::swap(&mut self.state.tracks, &mut set.tracks);
                    std::mem::swap(&mut self.rendered, &mut set.rendered);
                    std::mem::swap(&mut self.meters, &mut set.meters);
                    // The old set is freed on the control side
                    let _ = self.trash.push(Trash::Set(set));
                }
                Command::SetLoop {
                    enabled,
                    start,
                    end,
                } => {
                    self.state.loop_enabled = enabled;
                    self.state.loop_start = start;
                    self.state.loop_end = end;
                }
                Command::SetSpeed(speed) => self.state.speed = speed,
                Command::SetVolume(volume) => self.state.volume = volume,
                Command::SetTrackMuted(key, muted) => {
                    if let Some(track) = self.state.track_mut(key) {
                        track.muted = muted;
                    }
                }
                Command::SetTrackVolume(key, volume) => {
                    if let Some(track) = self.state.track_mut(key) {
                        track.volume = volume;
                    }
                }
                Command::SetTrackEnvelope(key, envelope) => {
                    if let Some(track) = self.state.track_mut(key) {
                        let old = std::mem::replace(&mut track.envelope, *envelope);
                        let _ = self.trash.push(Trash::Envelope(old));
                    }
                }
                Command::Play => self.state.playing = true,
                Command::Pause => self.state.playing = false,
                Command::Seek(position) => self.state.position = position.max(0.0),
            }
        }
    }

    fn output<T: SizedSample + FromSample<Sample>>(&mut self, data: &mut [T]) {
        let channels = self.channels;
        let mut cursor = 0;
        while cursor < data.len() {
            let chunk = (data.len() - cursor).min(MAX_CHUNK_FRAMES * channels);
            let scratch = &mut self.scratch[..chunk];
            self.state
                .render(scratch, channels, self.sample_rate, &mut self.rendered);
            for (out, &value) in data[cursor..cursor + chunk].iter_mut().zip(scratch.iter()) {
                *out = T::from_sample(value);
            }
            cursor += chunk;
        }

        self.meters.publish(&self.rendered);
        self.position.store(self.state.position, Ordering::Relaxed);
    }
}

pub struct StreamEngine {
    stopped: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,

    commands: HeapProducer<Command>,
    trash: HeapConsumer<Trash>,
    position: Arc<AtomicF64>,
    meters: Arc<MeterTable>,
}
impl StreamEngine {
    /// Open the default output device and start the stream.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(EngineError::DeviceNotAvailable)?;
        let device_config = device
            .default_output_config()
            .map_err(|e| EngineError::Stream(e.to_string()))?;
        let sample_format = device_config.sample_format();
        let channels = device_config.channels().max(1);

        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: match config.buffer_size {
                Some(size) => cpal::BufferSize::Fixed(size),
                None => cpal::BufferSize::Default,
            },
        };

        let (command_producer, command_consumer) = HeapRb::new(COMMAND_CAPACITY).split();
        let (trash_producer, trash_consumer) = HeapRb::new(COMMAND_CAPACITY).split();
        let position = Arc::new(AtomicF64::new(0.0));
        let meters = Arc::new(MeterTable::for_tracks(&[]));

        let processor = Processor {
            state: RenderState::new(),
            rendered: RenderedMeters::default(),
            meters: Arc::clone(&meters),
            commands: command_consumer,
            trash: trash_producer,
            position: Arc::clone(&position),
            scratch: vec![0.0; MAX_CHUNK_FRAMES * usize::from(channels)],
            channels: usize::from(channels),
            sample_rate: config.sample_rate,
        };

        let (ready_sender, ready_receiver) = sync_channel(1);
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_in_thread = Arc::clone(&stopped);

        let join_handle = thread::spawn(move || {
            // cpal::Stream is not Send, so it lives and dies on this thread
            use cpal::SampleFormat::*;
            let result = match sample_format {
                F32 => build_stream::<f32>(&device, &stream_config, processor),
                I16 => build_stream::<i16>(&device, &stream_config, processor),
                U16 => build_stream::<u16>(&device, &stream_config, processor),
                other => {
                    let _ = ready_sender.send(Some(EngineError::Stream(format!(
                        "Unsupported sample format: {other}"
                    ))));
                    return;
                }
            };

            let stream = match result {
                Ok(stream) => {
                    let _ = ready_sender.send(None);
                    stream
                }
                Err(e) => {
                    let _ = ready_sender.send(Some(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                error!("output stream refused to start: {e}");
                return;
            }
            info!("output stream running");

            while !stopped_in_thread.load(Ordering::Acquire) {
                // Parking beats spinning; spurious unparks are caught by the flag
                thread::park();
            }
            drop(stream);
            info!("output stream terminated");
        });

        match ready_receiver.recv_timeout(Duration::from_secs(30)) {
            Ok(None) => Ok(Self {
                stopped,
                join_handle: Some(join_handle),
                commands: command_producer,
                trash: trash_consumer,
                position,
                meters,
            }),
            Ok(Some(e)) => Err(e),
            Err(_) => Err(EngineError::Stream(
                "Attempt to start stream timed out".to_owned(),
            )),
        }
    }

    fn send(&mut self, command: Command) -> Result<(), EngineError> {
        self.collect_garbage();
        self.commands
            .push(command)
            .map_err(|_| EngineError::Other("Engine command queue is full".to_owned()))
    }

    /// Free whatever the audio thread replaced since the last call.
    fn collect_garbage(&mut self) {
        while self.trash.pop().is_some() {}
    }
}
impl RenderEngine for StreamEngine {
    fn set_tracks(&mut self, tracks: Vec<EngineTrack>) -> Result<(), EngineError> {
        let meters = Arc::new(MeterTable::for_tracks(&tracks));
        let rendered = RenderedMeters::for_tracks(&tracks);
        self.meters = Arc::clone(&meters);
        self.send(Command::SetTracks(Box::new(TrackSet {
            tracks,
            rendered,
            meters,
        })))
    }

    fn set_loop(&mut self, enabled: bool, start: f64, end: f64) -> Result<(), EngineError> {
        self.send(Command::SetLoop {
            enabled,
            start,
            end,
        })
    }

    fn set_speed(&mut self, speed: f64) -> Result<(), EngineError> {
        self.send(Command::SetSpeed(speed))
    }

    fn set_volume(&mut self, volume: f32) -> Result<(), EngineError> {
        self.send(Command::SetVolume(volume))
    }

    fn set_track_muted(&mut self, key: TrackKey, muted: bool) -> Result<(), EngineError> {
        self.send(Command::SetTrackMuted(key, muted))
    }

    fn set_track_volume(&mut self, key: TrackKey, volume: f32) -> Result<(), EngineError> {
        self.send(Command::SetTrackVolume(key, volume))
    }

    fn set_track_envelope(
        &mut self,
        key: TrackKey,
        envelope: Vec<VolumePoint>,
    ) -> Result<(), EngineError> {
        self.send(Command::SetTrackEnvelope(key, Box::new(envelope)))
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.send(Command::Play)
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.send(Command::Pause)
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.send(Command::Pause)?;
        self.send(Command::Seek(0.0))
    }

    fn seek(&mut self, position: f64) -> Result<(), EngineError> {
        // Reflect the jump immediately; the audio thread catches up next poll
        self.position.store(position.max(0.0), Ordering::Relaxed);
        self.send(Command::Seek(position))
    }

    fn position(&mut self) -> f64 {
        self.collect_garbage();
        self.position.load(Ordering::Relaxed)
    }

    fn meter_levels(&mut self) -> MeterLevels {
        self.collect_garbage();
        self.meters.read()
    }
}
impl Drop for StreamEngine {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.join_handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                error!("output stream thread panicked during shutdown");
            }
        }
    }
}

fn build_stream<T: SizedSample + FromSample<Sample> + 'static>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut processor: Processor,
) -> Result<cpal::Stream, EngineError> {
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info| {
                processor.poll();
                processor.output(data);
            },
            |err| error!("output stream error: {err}"),
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => EngineError::DeviceNotAvailable,
            e => EngineError::Stream(e.to_string()),
        })
}
