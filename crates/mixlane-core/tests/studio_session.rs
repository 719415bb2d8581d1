use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use mixlane_core::{
    Asset, AssetKind, AssetSource, EditError, ManualAudioEngine, MemoryFetcher, Studio,
    StudioError, StudioOptions,
    fixtures::{click_wav_bytes, sine_wav_bytes},
    persistence::load_store,
};
use uuid::Uuid;

struct Harness {
    clock: Arc<ManualAudioEngine>,
    fetcher: Arc<MemoryFetcher>,
    studio: Studio,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualAudioEngine::default());
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert("memory://loops/groove.wav", click_wav_bytes(100.0, 6.0));
    fetcher.insert("memory://loops/pad.wav", sine_wav_bytes(220.0, 2.0, 0.3));
    let studio = Studio::new(clock.clone(), fetcher.clone(), StudioOptions::default());
    Harness {
        clock,
        fetcher,
        studio,
    }
}

fn audio_asset(id: &str, file: &str) -> Asset {
    Asset::new(
        id,
        id,
        format!("memory://loops/{file}"),
        AssetKind::Music,
        AssetSource::Uploaded,
    )
}

#[test]
fn first_audio_asset_sets_project_tempo() {
    let mut harness = harness();
    let studio = &mut harness.studio;

    let groove = studio
        .add_asset(audio_asset("groove", "groove.wav"))
        .expect("groove should be added");
    assert_eq!(groove.detected_tempo_bpm, Some(100.0));
    assert!((groove.duration_seconds - 6.0).abs() < 1e-3);
    assert!((studio.engine().bpm() - 100.0).abs() < f64::EPSILON);

    studio
        .add_asset(audio_asset("pad", "pad.wav"))
        .expect("pad should be added");
    assert!((studio.engine().bpm() - 100.0).abs() < f64::EPSILON);

    let again = studio
        .add_asset(audio_asset("groove", "groove.wav"))
        .expect("duplicate add should succeed");
    assert_eq!(again, groove);
    assert_eq!(studio.assets().len(), 2);
    assert!(studio.is_dirty());
}

#[test]
fn explicit_tempo_is_not_overridden_by_assets() {
    let mut harness = harness();
    let studio = &mut harness.studio;
    studio.set_bpm(90.0).expect("tempo should succeed");
    studio
        .add_asset(audio_asset("groove", "groove.wav"))
        .expect("groove should be added");
    assert!((studio.engine().bpm() - 90.0).abs() < f64::EPSILON);
}

#[test]
fn video_asset_sets_reference_and_timeline_length() {
    let mut harness = harness();
    let studio = &mut harness.studio;
    let mut video = Asset::new(
        "cut",
        "Final Cut",
        "file:///videos/cut.mp4",
        AssetKind::Video,
        AssetSource::Uploaded,
    );
    video.duration_seconds = 42.0;

    studio.add_asset(video).expect("video should be added");
    assert_eq!(studio.video_reference(), Some("file:///videos/cut.mp4"));
    assert!((studio.engine().timeline().duration_seconds() - 42.0).abs() < f64::EPSILON);
    assert!((studio.scheduler().lock().duration_seconds() - 42.0).abs() < f64::EPSILON);

    let result = studio.add_clip("cut", 0.0, None);
    assert_eq!(
        result,
        Err(StudioError::Edit(EditError::VideoAsset("cut".to_string())))
    );

    assert!(studio.remove_asset("cut"));
    assert_eq!(studio.video_reference(), None);
    assert!(!studio.remove_asset("cut"));
}

#[test]
fn clips_are_placed_from_the_catalog() {
    let mut harness = harness();
    let studio = &mut harness.studio;
    studio
        .add_asset(audio_asset("pad", "pad.wav"))
        .expect("pad should be added");

    let clip = studio.add_clip("pad", 1.0, None).expect("clip should be placed");
    assert_eq!(studio.engine().tracks()[0].clips[0].id, clip.id);
    assert!(clip.buffer.is_loaded());

    let missing = studio.add_clip("nope", 0.0, None);
    assert_eq!(missing, Err(StudioError::AssetNotFound("nope".to_string())));

    studio.clear_assets();
    assert!(studio.assets().is_empty());
    assert_eq!(studio.engine().tracks()[0].clips.len(), 1);
}

#[test]
fn insertion_started_before_project_switch_is_discarded() {
    let mut harness = harness();
    let studio = &mut harness.studio;
    studio
        .add_asset(audio_asset("pad", "pad.wav"))
        .expect("pad should be added");

    let pending = studio
        .begin_add_clip("pad", 0.0, None)
        .expect("insertion should begin");
    let resolved = pending
        .resolve(studio.decoder())
        .expect("decode should succeed");

    studio.create_project("Other");
    let result = studio.complete_add_clip(resolved);
    assert_eq!(
        result,
        Err(StudioError::StaleInsertion {
            asset_id: "pad".to_string()
        })
    );
    assert!(studio.engine().tracks().iter().all(|track| track.clips.is_empty()));
}

#[test]
fn project_lifecycle_keeps_each_project_state() {
    let mut harness = harness();
    let studio = &mut harness.studio;
    let first = studio.active_project_id();
    studio
        .add_asset(audio_asset("pad", "pad.wav"))
        .expect("pad should be added");
    studio.add_clip("pad", 2.0, None).expect("clip should be placed");
    let first_tracks = studio.engine().tracks().to_vec();

    let second = studio.create_project("Second");
    assert_eq!(studio.active_project_id(), second);
    assert_eq!(studio.projects().len(), 2);
    assert!(studio.assets().is_empty());
    assert!(!studio.engine().can_undo());

    let warnings = studio.switch_project(first).expect("switch should succeed");
    assert!(warnings.is_empty());
    assert_eq!(studio.engine().tracks(), first_tracks.as_slice());
    assert_eq!(studio.assets().len(), 1);

    studio
        .rename_project(second, "Renamed")
        .expect("rename should succeed");
    let copy = studio.duplicate_project(first).expect("duplicate should succeed");
    assert_eq!(studio.active_project_id(), first);
    let copy_project = studio
        .projects()
        .iter()
        .find(|project| project.id == copy)
        .expect("copy should be stored");
    assert_eq!(copy_project.name, "Untitled Project (Copy)");
    assert_eq!(copy_project.clip_count(), 1);

    studio.switch_project(copy).expect("switch should succeed");
    assert_eq!(studio.engine().tracks()[0].clips.len(), 1);
    assert!(studio.engine().tracks()[0].clips[0].buffer.is_loaded());

    studio.delete_project(copy).expect("delete should succeed");
    assert_ne!(studio.active_project_id(), copy);
    studio.delete_project(second).expect("delete should succeed");
    assert_eq!(studio.projects().len(), 1);
    assert_eq!(studio.delete_project(first), Err(StudioError::LastProject));

    let unknown = Uuid::new_v4();
    assert_eq!(
        studio.switch_project(unknown),
        Err(StudioError::ProjectNotFound(unknown))
    );
}

#[test]
fn saved_store_reopens_with_rehydrated_clips() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let path = temp.path().join("projects.mixlane.json");
    let mut harness = harness();
    {
        let studio = &mut harness.studio;
        studio
            .add_asset(audio_asset("pad", "pad.wav"))
            .expect("pad should be added");
        studio.add_clip("pad", 0.5, None).expect("clip should be placed");
        let track_id = studio.engine().tracks()[0].id;
        studio.engine_mut().select_track(Some(track_id));
        studio.save(&path).expect("save should succeed");
        assert!(!studio.is_dirty());
    }

    let store = load_store(&path).expect("store should load");
    let (reopened, warnings) = Studio::with_store(
        harness.clock.clone(),
        harness.fetcher.clone(),
        StudioOptions::default(),
        store,
    );
    assert!(warnings.is_empty());
    assert_eq!(reopened.active_project_id(), harness.studio.active_project_id());
    assert_eq!(reopened.engine().tracks(), harness.studio.engine().tracks());
    assert_eq!(
        reopened.engine().timeline().selected_track_id(),
        Some(harness.studio.engine().tracks()[0].id)
    );
    assert!(!reopened.is_dirty());
}

#[test]
fn reopening_without_asset_blob_reports_dropped_clips() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let path = temp.path().join("projects.mixlane.json");
    let mut harness = harness();
    harness
        .studio
        .add_asset(audio_asset("pad", "pad.wav"))
        .expect("pad should be added");
    harness
        .studio
        .add_clip("pad", 0.5, None)
        .expect("clip should be placed");
    harness.studio.save(&path).expect("save should succeed");

    let store = load_store(&path).expect("store should load");
    let (reopened, warnings) = Studio::with_store(
        harness.clock.clone(),
        Arc::new(MemoryFetcher::new()),
        StudioOptions::default(),
        store,
    );
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].asset_id, "pad");
    assert!(reopened.engine().tracks()[0].clips.is_empty());
}

#[test]
fn autosave_waits_for_idle_interval() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let mut harness = harness();
    let studio = &mut harness.studio;
    assert_eq!(
        studio
            .autosave_if_due(temp.path(), Instant::now() + Duration::from_secs(60))
            .expect("autosave check should succeed"),
        None
    );

    let track_id = studio.engine().tracks()[0].id;
    studio
        .engine_mut()
        .toggle_mute(track_id)
        .expect("mute should succeed");
    assert!(studio.is_dirty());
    assert_eq!(
        studio
            .autosave_if_due(temp.path(), Instant::now())
            .expect("autosave check should succeed"),
        None
    );

    let written = studio
        .autosave_if_due(temp.path(), Instant::now() + Duration::from_secs(31))
        .expect("autosave should succeed")
        .expect("autosave should be due");
    assert!(written.exists());
    assert!(!studio.is_dirty());
}

#[test]
fn transport_resumes_from_stopped_position() {
    let mut harness = harness();
    let studio = &mut harness.studio;
    studio
        .add_asset(audio_asset("pad", "pad.wav"))
        .expect("pad should be added");
    studio.add_clip("pad", 0.0, None).expect("clip should be placed");

    studio.play();
    harness.clock.advance(1.0);
    let tick = studio.poll();
    assert!((tick.position - 1.0).abs() < 1e-9);
    assert!((studio.stop() - 1.0).abs() < 1e-9);
    assert!(!studio.is_playing());

    studio.play();
    harness.clock.advance(0.5);
    assert!((studio.position() - 1.5).abs() < 1e-9);

    studio.seek(0.25);
    assert!((studio.position() - 0.25).abs() < 1e-9);
}
