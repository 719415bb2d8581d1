use std::sync::Arc;

use mixlane_core::{
    Asset, AssetKind, AssetSource, Clip, Engine, ManualAudioEngine, PlaybackScheduler,
    SampleBuffer, SchedulerSettings, Track, TrackKind, TransportState, timeline::SharedObserver,
};
use parking_lot::Mutex;

const RATE: u32 = 1_000;

fn constant_buffer(value: f32, seconds: f64) -> Arc<SampleBuffer> {
    let frames = (seconds * f64::from(RATE)) as usize;
    Arc::new(SampleBuffer::new(RATE, vec![vec![value; frames]]))
}

fn track_with_clips(positions: &[f64]) -> Track {
    let mut track = Track::new("Music", TrackKind::Music, "#ff6b6b");
    track.clips = positions
        .iter()
        .map(|position| Clip::from_buffer("tone", constant_buffer(0.5, 2.0), *position))
        .collect();
    track
}

fn scheduler() -> (Arc<ManualAudioEngine>, PlaybackScheduler) {
    let clock = Arc::new(ManualAudioEngine::new(RATE));
    let scheduler = PlaybackScheduler::new(clock.clone(), SchedulerSettings::default());
    (clock, scheduler)
}

fn first_frame(scheduler: &mut PlaybackScheduler, block_start: f64) -> (f32, f32) {
    let mut block = vec![0.0_f32; 64];
    scheduler.render(block_start, &mut block);
    (block[0], block[1])
}

#[test]
fn play_schedules_only_clips_after_the_playhead() {
    let (_clock, mut scheduler) = scheduler();
    let tracks = vec![track_with_clips(&[0.0, 6.0])];

    scheduler.play(&tracks, 5.0, 10.0);
    assert!(scheduler.is_playing());
    assert_eq!(scheduler.graph().active_voice_count(), 1);

    scheduler.play(&tracks, 1.0, 10.0);
    assert_eq!(scheduler.graph().active_voice_count(), 2);
}

#[test]
fn muted_and_unsoloed_tracks_are_not_scheduled() {
    let (_clock, mut scheduler) = scheduler();
    let mut muted = track_with_clips(&[0.0]);
    muted.muted = true;
    let mut soloed = track_with_clips(&[0.0]);
    soloed.solo = true;
    let other = track_with_clips(&[0.0]);
    let soloed_id = soloed.id;

    scheduler.play(&[muted, soloed, other], 0.0, 10.0);
    let voices = scheduler.graph().voices();
    assert_eq!(voices.len(), 1);
    assert_eq!(voices[0].track_id, soloed_id);
}

#[test]
fn stop_returns_position_and_is_idempotent() {
    let (clock, mut scheduler) = scheduler();
    let tracks = vec![track_with_clips(&[0.0])];
    scheduler.play(&tracks, 1.0, 10.0);
    clock.advance(1.5);

    let stopped_at = scheduler.stop();
    assert!((stopped_at - 2.5).abs() < 1e-9);
    assert_eq!(scheduler.state(), TransportState::Stopped);
    assert_eq!(scheduler.graph().active_voice_count(), 0);

    clock.advance(3.0);
    assert!((scheduler.stop() - 2.5).abs() < 1e-9);
    assert!((scheduler.position() - 2.5).abs() < 1e-9);
}

#[test]
fn poll_stops_at_timeline_end() {
    let (clock, mut scheduler) = scheduler();
    scheduler.play(&[track_with_clips(&[0.0])], 0.0, 2.0);

    clock.advance(1.0);
    let tick = scheduler.poll();
    assert!(!tick.ended);
    assert!((tick.position - 1.0).abs() < 1e-9);

    clock.advance(1.5);
    let tick = scheduler.poll();
    assert!(tick.ended);
    assert!((tick.position - 2.0).abs() < f64::EPSILON);
    assert!(!scheduler.is_playing());
    assert!((scheduler.cursor().position() - 2.0).abs() < f64::EPSILON);
}

#[test]
fn play_at_timeline_end_rewinds() {
    let (_clock, mut scheduler) = scheduler();
    scheduler.play(&[track_with_clips(&[0.0])], 10.0, 10.0);
    assert!(scheduler.position().abs() < f64::EPSILON);
    assert_eq!(scheduler.graph().active_voice_count(), 1);
}

#[test]
fn seek_while_playing_reschedules_from_new_position() {
    let (clock, mut scheduler) = scheduler();
    let tracks = vec![track_with_clips(&[0.0, 6.0])];
    scheduler.play(&tracks, 0.0, 10.0);
    clock.advance(0.5);

    scheduler.seek(5.0);
    assert!(scheduler.is_playing());
    assert!((scheduler.position() - 5.0).abs() < 1e-9);
    assert_eq!(scheduler.graph().active_voice_count(), 1);

    scheduler.stop();
    scheduler.seek(42.0);
    assert!((scheduler.position() - 10.0).abs() < f64::EPSILON);
}

#[test]
fn playback_inside_fade_in_resumes_mid_curve() {
    let mut track = track_with_clips(&[6.0]);
    track.clips[0].fade_in_seconds = 1.0;
    let tracks = vec![track];

    let (_clock, mut scheduler) = scheduler();
    scheduler.play(&tracks, 6.5, 10.0);
    let (left, right) = first_frame(&mut scheduler, 0.0);
    assert!((left - 0.25).abs() < 1e-3, "left = {left}");
    assert!((right - 0.25).abs() < 1e-3, "right = {right}");

    let (_clock, mut scheduler) = self::scheduler();
    scheduler.play(&tracks, 6.0, 10.0);
    let (left, _) = first_frame(&mut scheduler, 0.0);
    assert!(left.abs() < 1e-3, "left = {left}");

    let (_clock, mut scheduler) = self::scheduler();
    scheduler.play(&tracks, 7.0, 10.0);
    let (left, _) = first_frame(&mut scheduler, 0.0);
    assert!((left - 0.5).abs() < 1e-3, "left = {left}");
}

#[test]
fn playback_inside_fade_out_resumes_mid_curve() {
    let mut track = track_with_clips(&[0.0]);
    track.clips[0].fade_out_seconds = 1.0;

    let (_clock, mut scheduler) = scheduler();
    scheduler.play(&[track], 1.5, 10.0);
    let (left, _) = first_frame(&mut scheduler, 0.0);
    assert!((left - 0.25).abs() < 1e-3, "left = {left}");
}

struct Session {
    clock: Arc<ManualAudioEngine>,
    engine: Engine,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
}

fn session() -> Session {
    let clock = Arc::new(ManualAudioEngine::new(RATE));
    let scheduler = Arc::new(Mutex::new(PlaybackScheduler::new(
        clock.clone(),
        SchedulerSettings::default(),
    )));
    let mut engine = Engine::default();
    let observer: SharedObserver = scheduler.clone();
    engine.subscribe(observer);

    let asset = Asset::new(
        "tone",
        "Tone",
        "memory://tone.wav",
        AssetKind::Music,
        AssetSource::Generated,
    );
    engine
        .add_clip(&asset, constant_buffer(0.5, 4.0), 0.0, None)
        .expect("add clip should succeed");
    Session {
        clock,
        engine,
        scheduler,
    }
}

fn start(session: &Session) {
    let mut scheduler = session.scheduler.lock();
    scheduler.play(
        session.engine.tracks(),
        0.0,
        session.engine.timeline().duration_seconds(),
    );
}

#[test]
fn mute_during_playback_ramps_volume_down() {
    let mut session = session();
    let track_id = session.engine.tracks()[0].id;
    start(&session);
    session.clock.advance(0.2);

    session
        .engine
        .toggle_mute(track_id)
        .expect("mute should succeed");

    let scheduler = session.scheduler.lock();
    let bus = scheduler.graph().bus(track_id).expect("bus should exist");
    assert!((bus.volume.value_at(0.2) - 1.0).abs() < 1e-6);
    let halfway = bus.volume.value_at(0.25);
    assert!(halfway > 0.0 && halfway < 1.0, "halfway = {halfway}");
    assert!(bus.volume.value_at(0.7) < 0.01);
    assert_eq!(scheduler.graph().active_voice_count(), 1);
}

#[test]
fn unmute_during_playback_schedules_the_track() {
    let mut session = session();
    let track_id = session.engine.tracks()[0].id;
    session
        .engine
        .toggle_mute(track_id)
        .expect("mute should succeed");
    start(&session);
    assert_eq!(session.scheduler.lock().graph().active_voice_count(), 0);

    session.clock.advance(1.0);
    session
        .engine
        .toggle_mute(track_id)
        .expect("unmute should succeed");
    assert_eq!(session.scheduler.lock().graph().active_voice_count(), 1);
}

#[test]
fn deleting_a_track_releases_its_nodes() {
    let mut session = session();
    let track_id = session.engine.tracks()[0].id;
    start(&session);
    assert!(session.scheduler.lock().graph().bus(track_id).is_some());

    session
        .engine
        .delete_track(track_id)
        .expect("delete track should succeed");
    let scheduler = session.scheduler.lock();
    assert!(scheduler.graph().bus(track_id).is_none());
    assert!(
        scheduler
            .graph()
            .voices()
            .iter()
            .all(|voice| voice.track_id != track_id)
    );
}

#[test]
fn structural_edit_during_playback_keeps_position() {
    let mut session = session();
    let track_id = session.engine.tracks()[0].id;
    let clip_id = session.engine.tracks()[0].clips[0].id;
    start(&session);
    session.clock.advance(1.0);

    session
        .engine
        .move_clip(track_id, track_id, clip_id, 3.0)
        .expect("move should succeed");
    let scheduler = session.scheduler.lock();
    assert!(scheduler.is_playing());
    assert!((scheduler.position() - 1.0).abs() < 1e-9);
    let voice = &scheduler.graph().voices()[0];
    assert!((voice.start_time() - 3.0).abs() < 1e-9);
}
