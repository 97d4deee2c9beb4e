#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use scribecut::{
    AudioBuffer, Editor, EngineConfig, ModelError, OfflineEngine, SpeechModel, SpokenWord,
    SymphoniaCodec, TrackKey, TranscriptionResult,
};

pub const RATE: u32 = 8_000;

/// A quiet sine so rendered output is non-zero without clipping.
pub fn tone_buffer(seconds: f64) -> AudioBuffer {
    let frames = (seconds * f64::from(RATE)).round() as usize;
    let samples: Vec<f32> = (0..frames)
        .map(|i| (i as f32 * 0.05).sin() * 0.25)
        .collect();
    AudioBuffer::new(RATE, vec![samples])
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn headless_editor() -> Editor {
    init_logging();
    Editor::headless()
}

/// An editor sharing its offline engine with the test, so the test can drive
/// the engine's clock.
pub fn editor_with_clock() -> (Editor, Arc<Mutex<OfflineEngine>>) {
    init_logging();
    let engine = Arc::new(Mutex::new(OfflineEngine::new(EngineConfig::default())));
    let editor = Editor::new(
        Box::new(SymphoniaCodec::new()),
        Box::new(Arc::clone(&engine)),
    );
    (editor, engine)
}

pub fn add_tone_track(editor: &mut Editor, seconds: f64, start: f64) -> TrackKey {
    editor.create_track_from_buffer(tone_buffer(seconds), "tone".into(), start, None)
}

/// Speech model stub: one word per second, 0.8 s long each.
pub struct MetronomeModel;
impl SpeechModel for MetronomeModel {
    fn transcribe(
        &self,
        buffer: &AudioBuffer,
        _language_hint: Option<&str>,
    ) -> Result<TranscriptionResult, ModelError> {
        let words = (0..buffer.duration().floor() as usize)
            .map(|i| SpokenWord {
                text: format!("word{i}"),
                start: i as f64,
                end: i as f64 + 0.8,
                confidence: 0.95,
            })
            .collect();
        Ok(TranscriptionResult {
            words,
            language: "en".into(),
        })
    }
}
