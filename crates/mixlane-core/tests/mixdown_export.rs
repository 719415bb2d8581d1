use std::{fs, sync::Arc};

use mixlane_core::{
    AssetDecoder, Clip, MixdownOptions, SampleBuffer, Track, TrackKind, encode_wav, export_mix,
    export_range,
    fixtures::{DEMO_DURATION_SECONDS, demo_fetcher, demo_project, demo_tracks},
    render_mix, render_range,
};

fn demo() -> Vec<Track> {
    let decoder = AssetDecoder::new(demo_fetcher());
    demo_tracks(&decoder)
}

fn constant_track(value: f32, position: f64, seconds: f64) -> Track {
    let frames = (seconds * 1_000.0) as usize;
    let buffer = Arc::new(SampleBuffer::new(1_000, vec![vec![value; frames]]));
    let mut track = Track::new("Music", TrackKind::Music, "#ff6b6b");
    track.clips.push(Clip::from_buffer("tone", buffer, position));
    track
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[test]
fn wav_header_describes_stereo_16_bit_pcm() {
    let rendered = render_mix(&demo(), 1.0, &MixdownOptions::default());
    let bytes = encode_wav(&rendered).expect("wav encode should succeed");

    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"WAVE");
    assert_eq!(&bytes[12..16], b"fmt ");
    assert_eq!(u16_at(&bytes, 20), 1);
    assert_eq!(u16_at(&bytes, 22), 2);
    assert_eq!(u32_at(&bytes, 24), 44_100);
    assert_eq!(u32_at(&bytes, 28), 44_100 * 4);
    assert_eq!(u16_at(&bytes, 32), 4);
    assert_eq!(u16_at(&bytes, 34), 16);
    assert_eq!(&bytes[36..40], b"data");

    let frames = rendered.frames();
    assert_eq!(frames, 44_100);
    assert_eq!(u32_at(&bytes, 40) as usize, frames * 4);
    assert_eq!(bytes.len(), 44 + frames * 4);
    assert_eq!(u32_at(&bytes, 4) as usize, bytes.len() - 8);
}

#[test]
fn demo_mixdown_is_deterministic_and_audible() {
    let tracks = demo();
    let options = MixdownOptions::default();
    let first = render_mix(&tracks, DEMO_DURATION_SECONDS, &options);
    let second = render_mix(&tracks, DEMO_DURATION_SECONDS, &options);

    assert_eq!(first, second);
    assert_eq!(first.frames(), 352_800);
    assert!(first.peak() > 0.05);
    assert!(first.peak() <= 1.5);
}

#[test]
fn muted_track_does_not_change_other_tracks() {
    let options = MixdownOptions::default();
    let mut with_muted = demo();
    with_muted[1].muted = true;
    let mut without = demo();
    without.remove(1);

    let muted_mix = render_mix(&with_muted, 3.0, &options);
    let reduced_mix = render_mix(&without, 3.0, &options);
    assert_eq!(muted_mix, reduced_mix);
}

#[test]
fn clips_without_buffers_render_silence() {
    let project = demo_project();
    let rendered = render_mix(&project.tracks, 2.0, &MixdownOptions::default());
    assert!(rendered.peak().abs() < f32::EPSILON);
}

#[test]
fn fade_in_reaches_half_gain_at_midpoint() {
    let mut track = constant_track(0.5, 0.0, 3.0);
    track.clips[0].fade_in_seconds = 1.0;
    let rendered = render_mix(&[track], 2.0, &MixdownOptions::default());

    let (start, _) = rendered.frame(0).expect("first frame should exist");
    let (middle, _) = rendered.frame(22_050).expect("midpoint frame should exist");
    let (settled, _) = rendered.frame(66_150).expect("late frame should exist");
    assert!(start.abs() < 1e-6);
    assert!((middle - 0.25).abs() < 1e-3, "middle = {middle}");
    assert!((settled - 0.5).abs() < 1e-4, "settled = {settled}");
}

#[test]
fn range_render_applies_guard_fades_at_cuts() {
    let track = constant_track(0.5, 0.0, 4.0);
    let rendered = render_range(&[track], 1.0, 2.0, &MixdownOptions::default())
        .expect("range render should succeed");

    assert_eq!(rendered.frames(), 44_100);
    let (first, _) = rendered.frame(0).expect("first frame should exist");
    let (middle, _) = rendered.frame(22_050).expect("middle frame should exist");
    let (last, _) = rendered.frame(44_099).expect("last frame should exist");
    assert!(first.abs() < 1e-6, "first = {first}");
    assert!((middle - 0.5).abs() < 1e-4, "middle = {middle}");
    assert!(last.abs() < 0.01, "last = {last}");
}

#[test]
fn range_fully_inside_clip_boundaries_skips_guard_at_clip_edges() {
    let track = constant_track(0.5, 1.0, 1.0);
    let rendered = render_range(&[track], 0.0, 3.0, &MixdownOptions::default())
        .expect("range render should succeed");
    let (at_clip_start, _) = rendered.frame(44_110).expect("frame should exist");
    assert!((at_clip_start - 0.5).abs() < 1e-4, "start = {at_clip_start}");
}

#[test]
fn export_writes_wav_file_atomically() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let path = temp.path().join("mixes").join("demo.wav");
    let tracks = demo();

    let rendered = export_mix(&tracks, 2.0, &path, &MixdownOptions::default())
        .expect("export should succeed");
    let bytes = fs::read(&path).expect("exported wav should exist");
    assert_eq!(bytes.len(), 44 + rendered.frames() * 4);
    assert_eq!(
        bytes,
        encode_wav(&rendered).expect("wav encode should succeed")
    );

    let leftovers: Vec<_> = fs::read_dir(path.parent().expect("parent exists"))
        .expect("mix directory should be readable")
        .collect();
    assert_eq!(leftovers.len(), 1);
}

#[test]
fn invalid_range_export_writes_nothing() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let path = temp.path().join("range.wav");
    let result = export_range(&demo(), 3.0, 3.0, &path, &MixdownOptions::default());
    assert!(result.is_err());
    assert!(!path.exists());
}
