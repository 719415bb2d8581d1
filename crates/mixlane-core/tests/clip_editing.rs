use std::sync::Arc;

use mixlane_core::{
    Asset, AssetKind, AssetSource, ClipPatch, ContinuousEdit, Edit, EditError, Engine,
    SampleBuffer, SelectMode, TrackKind, resolve_drop_track_index,
};
use uuid::Uuid;

fn buffer(seconds: f64) -> Arc<SampleBuffer> {
    let frames = (seconds * 1_000.0) as usize;
    let samples = (0..frames).map(|frame| (frame % 100) as f32 / 100.0).collect();
    Arc::new(SampleBuffer::new(1_000, vec![samples]))
}

fn asset(id: &str, kind: AssetKind, tempo: Option<f64>) -> Asset {
    let mut asset = Asset::new(id, id, format!("memory://{id}.wav"), kind, AssetSource::Generated);
    asset.detected_tempo_bpm = tempo;
    asset
}

fn engine_with_clip(position: f64) -> (Engine, Uuid, Uuid) {
    let mut engine = Engine::default();
    let clip = engine
        .add_clip(&asset("tone", AssetKind::Music, None), buffer(4.0), position, None)
        .expect("add clip should succeed");
    let track_id = engine.tracks()[0].id;
    (engine, track_id, clip.id)
}

#[test]
fn add_clip_targets_first_matching_track_and_extends_duration() {
    let mut engine = Engine::default();
    let clip = engine
        .add_clip(&asset("hit", AssetKind::Sfx, None), buffer(4.0), 200.0, None)
        .expect("add clip should succeed");

    let sfx_track = &engine.tracks()[1];
    assert_eq!(sfx_track.kind, TrackKind::Sfx);
    assert_eq!(sfx_track.clips.len(), 1);
    assert!((clip.effective_duration() - 4.0).abs() < 1e-9);
    assert!(engine.timeline().duration_seconds() >= 204.0);
}

#[test]
fn tempo_locked_rate_follows_project_tempo() {
    let mut engine = Engine::default();
    let locked = engine
        .add_clip(&asset("groove", AssetKind::Music, Some(100.0)), buffer(4.0), 0.0, None)
        .expect("add clip should succeed");
    let free = engine
        .add_clip(&asset("pad", AssetKind::Music, None), buffer(4.0), 5.0, None)
        .expect("add clip should succeed");
    assert!((locked.playback_rate - 1.2).abs() < 1e-9);

    engine.set_tempo(140.0).expect("tempo change should succeed");
    let track = &engine.tracks()[0];
    let locked = track.clip(locked.id).expect("locked clip should exist");
    let free = track.clip(free.id).expect("free clip should exist");
    assert!((locked.playback_rate - 1.4).abs() < 1e-9);
    assert!((free.playback_rate - 1.0).abs() < f64::EPSILON);

    assert!(engine.undo());
    assert!((engine.bpm() - 120.0).abs() < f64::EPSILON);
}

#[test]
fn reset_tempo_adopts_first_detected_clip_tempo() {
    let mut engine = Engine::default();
    engine
        .add_clip(&asset("groove", AssetKind::Music, Some(96.0)), buffer(4.0), 0.0, None)
        .expect("add clip should succeed");
    let adopted = engine
        .reset_tempo_to_track(None)
        .expect("reset should succeed");
    assert_eq!(adopted, Some(96.0));
    assert!((engine.tracks()[0].clips[0].playback_rate - 1.0).abs() < 1e-9);
}

#[test]
fn reset_tempo_on_unknown_track_is_rejected() {
    let mut engine = Engine::default();
    engine
        .add_clip(&asset("groove", AssetKind::Music, Some(96.0)), buffer(4.0), 0.0, None)
        .expect("add clip should succeed");
    let missing = Uuid::new_v4();

    let result = engine.reset_tempo_to_track(Some(missing));
    assert_eq!(result, Err(EditError::TrackNotFound(missing)));
    assert!((engine.bpm() - 120.0).abs() < f64::EPSILON);
    assert!(engine.undo());
    assert!(!engine.can_undo());
}

#[test]
fn video_and_unknown_track_insertions_are_rejected() {
    let mut engine = Engine::default();
    let video = engine.add_clip(&asset("film", AssetKind::Video, None), buffer(1.0), 0.0, None);
    assert_eq!(video, Err(EditError::VideoAsset("film".to_string())));

    let missing = Uuid::new_v4();
    let result = engine.add_clip(
        &asset("tone", AssetKind::Music, None),
        buffer(1.0),
        0.0,
        Some(missing),
    );
    assert_eq!(result, Err(EditError::TrackNotFound(missing)));
    assert!(!engine.can_undo());
}

#[test]
fn split_produces_contiguous_halves() {
    let (mut engine, track_id, clip_id) = engine_with_clip(2.0);
    let (left, right) = engine
        .split_clip(track_id, clip_id, 3.5)
        .expect("split should succeed");

    assert_eq!(left.id, clip_id);
    assert_ne!(right.id, clip_id);
    assert!((left.effective_duration() + right.effective_duration() - 4.0).abs() < 1e-9);
    assert!((left.source_end_seconds - right.source_start_seconds).abs() < f64::EPSILON);
    assert!((right.position_seconds - 3.5).abs() < f64::EPSILON);
    assert!(left.buffer.ptr_eq(&right.buffer));

    let track = &engine.tracks()[0];
    assert_eq!(track.clips.len(), 2);
    assert_eq!(track.clips[0].id, clip_id);
}

#[test]
fn split_respects_playback_rate() {
    let mut engine = Engine::default();
    let clip = engine
        .add_clip(&asset("fast", AssetKind::Music, Some(60.0)), buffer(4.0), 1.0, None)
        .expect("add clip should succeed");
    assert!((clip.effective_duration() - 2.0).abs() < 1e-9);
    let track_id = engine.tracks()[0].id;

    let (left, right) = engine
        .split_clip(track_id, clip.id, 1.5)
        .expect("split should succeed");
    assert!((left.source_end_seconds - 1.0).abs() < 1e-9);
    assert!((left.effective_duration() - 0.5).abs() < 1e-9);
    assert!((right.effective_duration() - 1.5).abs() < 1e-9);
}

#[test]
fn split_near_edge_is_rejected_without_history() {
    let (mut engine, track_id, clip_id) = engine_with_clip(2.0);
    let before = engine.tracks().to_vec();

    let result = engine.split_clip(track_id, clip_id, 2.03);
    assert_eq!(result, Err(EditError::SplitTooCloseToEdge { at_seconds: 2.03 }));
    assert_eq!(engine.tracks(), before.as_slice());

    assert!(engine.undo());
    assert!(!engine.can_undo());
}

#[test]
fn move_between_tracks_transfers_ownership() {
    let (mut engine, source_id, clip_id) = engine_with_clip(0.0);
    let destination_index =
        resolve_drop_track_index(0, 95.0, 88.0, engine.tracks().len()).expect("index should resolve");
    let destination_id = engine.tracks()[destination_index].id;

    let moved = engine
        .move_clip(source_id, destination_id, clip_id, 6.0)
        .expect("move should succeed");
    assert_eq!(moved.id, clip_id);

    let timeline = engine.timeline();
    assert!(timeline.track(source_id).expect("source exists").clips.is_empty());
    let destination = timeline.track(destination_id).expect("destination exists");
    assert_eq!(destination.clips.len(), 1);
    assert!((destination.clips[0].position_seconds - 6.0).abs() < f64::EPSILON);
}

#[test]
fn duplicate_places_copy_after_original_and_selects_it() {
    let (mut engine, track_id, clip_id) = engine_with_clip(1.0);
    engine.select_clip(clip_id, SelectMode::Single);
    let copy = engine
        .duplicate_clip(track_id, clip_id)
        .expect("duplicate should succeed");

    assert!((copy.position_seconds - 5.0).abs() < 1e-9);
    let selected: Vec<Uuid> = engine.timeline().selected_clip_ids().iter().copied().collect();
    assert_eq!(selected, vec![copy.id]);
}

#[test]
fn deleting_clips_and_tracks_clears_selection() {
    let (mut engine, track_id, clip_id) = engine_with_clip(0.0);
    engine.select_clip(clip_id, SelectMode::Single);
    engine.delete_clip(track_id, clip_id).expect("delete should succeed");
    assert!(engine.timeline().selected_clip_ids().is_empty());

    let (mut engine, track_id, clip_id) = engine_with_clip(0.0);
    engine.select_clip(clip_id, SelectMode::Single);
    engine.select_track(Some(track_id));
    engine.delete_track(track_id).expect("delete track should succeed");
    assert!(engine.timeline().selected_clip_ids().is_empty());
    assert_eq!(engine.timeline().selected_track_id(), None);
    assert!(engine.timeline().find_clip(clip_id).is_none());
}

#[test]
fn reorder_validates_indices() {
    let mut engine = Engine::default();
    let first = engine.tracks()[0].id;
    engine.reorder_track(0, 2).expect("reorder should succeed");
    assert_eq!(engine.tracks()[2].id, first);

    assert_eq!(
        engine.reorder_track(0, 9),
        Err(EditError::InvalidReorder { from: 0, to: 9 })
    );

    let mut untouched = Engine::default();
    untouched.reorder_track(1, 1).expect("same index should be a noop");
    assert!(!untouched.can_undo());
}

#[test]
fn muted_track_stays_silent_even_when_soloed() {
    let mut engine = Engine::default();
    let music = engine.tracks()[0].id;
    let voice = engine.tracks()[2].id;
    assert!(engine.toggle_solo(music).expect("solo should succeed"));
    assert!(engine.toggle_mute(music).expect("mute should succeed"));
    engine.toggle_solo(voice).expect("solo should succeed");

    let audible: Vec<Uuid> = engine
        .timeline()
        .audible_tracks()
        .iter()
        .map(|track| track.id)
        .collect();
    assert_eq!(audible, vec![voice]);
}

#[test]
fn mix_values_are_clamped_and_validated() {
    let mut engine = Engine::default();
    let track_id = engine.tracks()[0].id;
    engine
        .commit(Edit::SetVolume { track_id, volume: 3.0 })
        .expect("volume should succeed");
    engine
        .commit(Edit::SetPan { track_id, pan: -7.0 })
        .expect("pan should succeed");
    engine
        .commit(Edit::SetInputGain { track_id, gain: -1.0 })
        .expect("gain should succeed");
    engine
        .commit(Edit::SetTranspose { track_id, semitones: -5 })
        .expect("transpose should succeed");

    let track = &engine.tracks()[0];
    assert!((track.volume - 1.0).abs() < f32::EPSILON);
    assert!((track.pan + 1.0).abs() < f32::EPSILON);
    assert!(track.input_gain.abs() < f32::EPSILON);
    assert!((track.detune_cents() + 500.0).abs() < f32::EPSILON);

    let result = engine.commit(Edit::SetVolume {
        track_id,
        volume: f32::NAN,
    });
    assert!(matches!(result, Err(EditError::InvalidValue { field: "volume", .. })));
}

#[test]
fn drag_gesture_records_a_single_history_entry() {
    let (mut engine, track_id, clip_id) = engine_with_clip(1.0);
    let original = engine.tracks().to_vec();

    engine.begin_gesture();
    for step in 1..=5 {
        engine
            .apply_continuous(ContinuousEdit::MoveClip {
                source_track_id: track_id,
                destination_track_id: track_id,
                clip_id,
                position_seconds: 1.0 + f64::from(step) * 0.2,
            })
            .expect("drag step should succeed");
    }
    engine
        .apply_continuous(ContinuousEdit::SetVolume {
            track_id,
            volume: 0.4,
        })
        .expect("fader drag should succeed");

    let moved = engine.tracks()[0].clip(clip_id).expect("clip should exist");
    assert!((moved.position_seconds - 2.0).abs() < 1e-9);

    assert!(engine.undo());
    assert_eq!(engine.tracks(), original.as_slice());
    assert!(engine.redo());
    assert!((engine.tracks()[0].volume - 0.4).abs() < f32::EPSILON);
}

#[test]
fn trim_patches_keep_clip_end_and_minimum_length() {
    let (mut engine, track_id, clip_id) = engine_with_clip(2.0);
    let original = engine.tracks()[0].clip(clip_id).expect("clip exists").clone();

    let trimmed = engine
        .update_clip(track_id, clip_id, ClipPatch::trim_left(&original, 1.5))
        .expect("trim should succeed");
    assert!((trimmed.end_seconds() - original.end_seconds()).abs() < 1e-9);
    assert!((trimmed.position_seconds - 3.5).abs() < 1e-9);

    let squeezed = engine
        .update_clip(track_id, clip_id, ClipPatch::trim_right(&trimmed, -100.0))
        .expect("trim should succeed");
    assert!((squeezed.content_seconds() - 0.05).abs() < 1e-9);

    let faded = engine
        .update_clip(track_id, clip_id, ClipPatch::fade_in(&squeezed, 10.0))
        .expect("fade should succeed");
    assert!(faded.fade_in_seconds + faded.fade_out_seconds <= faded.effective_duration() + 1e-12);
}

#[test]
fn left_trim_stops_at_timeline_origin() {
    let (mut engine, track_id, clip_id) = engine_with_clip(0.5);
    let inset = engine
        .update_clip(
            track_id,
            clip_id,
            ClipPatch {
                source_start_seconds: Some(2.0),
                ..ClipPatch::default()
            },
        )
        .expect("inset should succeed");
    assert!((inset.position_seconds - 0.5).abs() < 1e-9);
    assert!((inset.end_seconds() - 2.5).abs() < 1e-9);

    let patch = ClipPatch::trim_left(&inset, -1.0);
    assert!(patch.position_seconds.is_some_and(|position| position >= 0.0));
    let trimmed = engine
        .update_clip(track_id, clip_id, patch)
        .expect("trim should succeed");
    assert!(trimmed.position_seconds.abs() < 1e-9);
    assert!((trimmed.source_start_seconds - 1.5).abs() < 1e-9);
    assert!((trimmed.end_seconds() - inset.end_seconds()).abs() < 1e-9);
}
