mod utils;

use std::path::PathBuf;
use std::time::Duration;

use scribecut::{ImportStatus, WavFormat};
use utils::{add_tone_track, headless_editor};

fn temp_dir(name: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!("scribecut-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_wav(path: &PathBuf, seconds: f64) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 8_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..(seconds * 8_000.0) as usize {
        let sample = ((i as f32 * 0.02).sin() * 8_000.0) as i16;
        writer.write_sample(sample).unwrap();
        writer.write_sample(sample / 2).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn streamed_import_goes_through_the_lifecycle() {
    let dir = temp_dir("import");
    let source = dir.join("voice.wav");
    write_wav(&source, 2.0);

    let mut editor = headless_editor();
    let track = editor.import_track(&source, 1.0).unwrap();

    assert_eq!(
        editor.store().track(track).unwrap().import_status(),
        ImportStatus::Importing
    );
    assert!(editor.import_in_flight());

    let mut waited = 0;
    while editor.import_in_flight() && waited < 200 {
        let failures = editor.poll_import_events();
        assert!(failures.is_empty());
        std::thread::sleep(Duration::from_millis(10));
        waited += 1;
    }
    assert!(!editor.import_in_flight(), "import never completed");

    let t = editor.store().track(track).unwrap();
    assert_eq!(t.import_status(), ImportStatus::Ready);
    assert_eq!(t.start, 1.0);
    assert!((t.duration - 2.0).abs() < 0.01);
    assert_eq!(t.sample_rate(), Some(8_000));

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn deleting_a_track_cancels_its_import() {
    let dir = temp_dir("cancel");
    let source = dir.join("voice.wav");
    write_wav(&source, 2.0);

    let mut editor = headless_editor();
    let track = editor.import_track(&source, 0.0).unwrap();
    assert!(editor.delete_track(track));
    assert!(!editor.import_in_flight());

    // Whatever the session still emits is dropped
    std::thread::sleep(Duration::from_millis(50));
    assert!(editor.poll_import_events().is_empty());
    assert!(editor.store().track(track).is_none());

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn import_of_a_missing_file_fails_up_front() {
    let mut editor = headless_editor();
    let result = editor.import_track(std::path::Path::new("/nope/missing.wav"), 0.0);
    assert!(result.is_err());
    assert!(editor.store().tracks().is_empty());
}

#[test]
fn project_round_trip_with_source_files() {
    let dir = temp_dir("project");
    let source = dir.join("voice.wav");
    write_wav(&source, 2.0);

    let mut editor = headless_editor();
    let track = editor.import_track_sync(&source, 1.5).unwrap();
    editor.rename_track(track, "voice".into());
    editor.set_track_volume(track, 1.2);
    editor.set_track_solo(track, true);
    editor.add_volume_point(track, 0.5, 0.8);
    editor.add_timemark(
        track,
        1.0,
        "intro".into(),
        scribecut::TimeMarkSource::Manual,
        None,
    );
    editor.set_in_point(Some(0.5));
    editor.set_silence_regions(vec![(0.2, 0.4)]);

    let project_path = dir.join("session.json");
    editor.save_project(&project_path, "session").unwrap();

    let mut reloaded = headless_editor();
    let failures = reloaded.load_project(&project_path).unwrap();
    assert!(failures.is_empty());

    let tracks = reloaded.store().tracks();
    assert_eq!(tracks.len(), 1);
    let t = &tracks[0];
    assert_eq!(t.name, "voice");
    assert_eq!(t.start, 1.5);
    assert!(t.solo);
    assert!((t.volume - 1.2).abs() < 1e-6);
    assert_eq!(t.envelope.len(), 1);
    assert_eq!(t.timemarks.len(), 1);
    assert!((t.duration - 2.0).abs() < 0.01);

    assert_eq!(reloaded.selection().in_point, Some(0.5));
    assert_eq!(reloaded.silence().regions, vec![(0.2, 0.4)]);

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn sourceless_tracks_are_cached_next_to_the_project() {
    let dir = temp_dir("cache");

    let mut editor = headless_editor();
    add_tone_track(&mut editor, 1.0, 0.0);

    let project_path = dir.join("session.json");
    editor.save_project(&project_path, "session").unwrap();

    let cache_exists = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().ends_with("-cache.wav"));
    assert!(cache_exists, "no cache WAV written");

    let mut reloaded = headless_editor();
    let failures = reloaded.load_project(&project_path).unwrap();
    assert!(failures.is_empty());
    assert_eq!(reloaded.store().tracks().len(), 1);
    assert!((reloaded.store().tracks()[0].duration - 1.0).abs() < 0.01);

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn mixdown_export_applies_gain_and_normalization() {
    let dir = temp_dir("mixdown");
    let out = dir.join("mix.wav");

    let mut editor = headless_editor();
    let track = add_tone_track(&mut editor, 1.0, 0.0);
    editor.set_track_volume(track, 0.5);

    editor.export_mixdown_wav(&out, WavFormat::Pcm16).unwrap();

    let mut reader = hound::WavReader::open(&out).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.bits_per_sample, 16);
    let peak = reader
        .samples::<i16>()
        .map(|s| s.unwrap().unsigned_abs())
        .max()
        .unwrap();
    // Tone peaks at 0.25, halved by the track volume
    let expected = (0.125 * f32::from(i16::MAX)) as u16;
    assert!((i32::from(peak) - i32::from(expected)).abs() < 200);

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn empty_session_has_nothing_to_export() {
    let editor = headless_editor();
    let result = editor.export_mixdown_wav(
        std::path::Path::new("/tmp/never-written.wav"),
        WavFormat::Float32,
    );
    assert!(matches!(result, Err(scribecut::ExportError::NoAudio)));
}
