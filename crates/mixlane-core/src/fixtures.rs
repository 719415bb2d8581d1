use std::{f32::consts::TAU, io::Cursor, sync::Arc};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    assets::{AssetDecoder, MemoryFetcher},
    model::{Asset, AssetKind, AssetSource, Clip, Project, SharedBuffer, Track, TrackKind},
    persistence::rehydrate_tracks,
};

pub const DEMO_SAMPLE_RATE: u32 = 44_100;
pub const DEMO_DURATION_SECONDS: f64 = 8.0;

const PAD_ASSET: &str = "demo-pad";
const BEAT_ASSET: &str = "demo-beat";
const BLIP_ASSET: &str = "demo-blip";
const HUM_ASSET: &str = "demo-hum";

fn wav_bytes(channels: u16, samples: impl IntoIterator<Item = f32>) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate: DEMO_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).expect("fixture wav writer should open");
        for sample in samples {
            let quantized = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
            writer
                .write_sample(quantized)
                .expect("fixture wav sample write should succeed");
        }
        writer.finalize().expect("fixture wav finalize should succeed");
    }
    cursor.into_inner()
}

/// Mono sine tone as 16-bit WAVE bytes.
#[must_use]
pub fn sine_wav_bytes(frequency_hz: f32, seconds: f32, amplitude: f32) -> Vec<u8> {
    let frames = (seconds * DEMO_SAMPLE_RATE as f32).round() as usize;
    wav_bytes(
        1,
        (0..frames).map(|frame| {
            let phase = frame as f32 / DEMO_SAMPLE_RATE as f32 * frequency_hz * TAU;
            phase.sin() * amplitude
        }),
    )
}

/// Stereo click train: a 20 ms decaying pulse on every beat.
#[must_use]
pub fn click_wav_bytes(bpm: f64, seconds: f32) -> Vec<u8> {
    let frames = (seconds * DEMO_SAMPLE_RATE as f32).round() as usize;
    let beat_frames = (60.0 / bpm * f64::from(DEMO_SAMPLE_RATE)).round() as usize;
    let click_frames = DEMO_SAMPLE_RATE as usize / 50;
    wav_bytes(
        2,
        (0..frames).flat_map(move |frame| {
            let within = frame % beat_frames.max(1);
            let sample = if within < click_frames {
                0.8 * (1.0 - within as f32 / click_frames as f32)
            } else {
                0.0
            };
            [sample, sample]
        }),
    )
}

/// In-memory blobs for every demo asset, keyed by locator.
#[must_use]
pub fn demo_fetcher() -> Arc<MemoryFetcher> {
    let fetcher = MemoryFetcher::new();
    fetcher.insert("memory://demo/pad.wav", sine_wav_bytes(220.0, 4.0, 0.3));
    fetcher.insert("memory://demo/beat.wav", click_wav_bytes(120.0, 4.0));
    fetcher.insert("memory://demo/blip.wav", sine_wav_bytes(880.0, 0.5, 0.25));
    fetcher.insert("memory://demo/hum.wav", sine_wav_bytes(330.0, 3.0, 0.2));
    Arc::new(fetcher)
}

#[must_use]
pub fn demo_assets() -> Vec<Asset> {
    let asset = |id: &str, name: &str, file: &str, kind: AssetKind, seconds: f64| {
        let mut asset = Asset::new(
            id,
            name,
            format!("memory://demo/{file}"),
            kind,
            AssetSource::Generated,
        );
        asset.duration_seconds = seconds;
        asset
    };
    let mut beat = asset(BEAT_ASSET, "Click Beat", "beat.wav", AssetKind::Music, 4.0);
    beat.detected_tempo_bpm = Some(120.0);
    vec![
        asset(PAD_ASSET, "Warm Pad", "pad.wav", AssetKind::Music, 4.0),
        beat,
        asset(BLIP_ASSET, "Blip", "blip.wav", AssetKind::Sfx, 0.5),
        asset(HUM_ASSET, "Hum", "hum.wav", AssetKind::Voice, 3.0),
    ]
}

fn demo_clip(id: u128, asset_id: &str, position_seconds: f64, source_end_seconds: f64) -> Clip {
    Clip {
        id: Uuid::from_u128(id),
        asset_id: asset_id.to_string(),
        buffer: SharedBuffer::default(),
        source_start_seconds: 0.0,
        source_end_seconds,
        position_seconds,
        fade_in_seconds: 0.0,
        fade_out_seconds: 0.0,
        playback_rate: 1.0,
        source_tempo_bpm: None,
    }
}

/// Three tracks with two clips each, in persisted form (no buffers).
#[must_use]
pub fn demo_project() -> Project {
    let mut project = Project::new("Mixlane Demo");
    project.id = Uuid::from_u128(0x9ed0_a3fa_4064_458f_b95f_1fdd_0bc4_f0be);
    project.updated_at = DateTime::<Utc>::from_timestamp(1_771_804_800, 0).unwrap_or_default();
    project.duration_seconds = DEMO_DURATION_SECONDS;
    project.bpm = 120.0;
    project.assets = demo_assets();

    let mut music = Track::new("Music", TrackKind::Music, "#ff6b6b");
    music.id = Uuid::from_u128(0xa959_fd97_0e35_445d_a7e8_fe6d_81d4_9235);
    let mut pad = demo_clip(0xfbf4_1a8f_c5b4_464b_a9f3_6e62_eebf_6efb, PAD_ASSET, 0.0, 4.0);
    pad.fade_in_seconds = 0.5;
    pad.fade_out_seconds = 0.5;
    let mut beat = demo_clip(0x0caa_5e8d_6ec2_4b74_9e87_d7f6_0111_f3f2, BEAT_ASSET, 4.0, 4.0);
    beat.source_tempo_bpm = Some(120.0);
    music.clips = vec![pad, beat];

    let mut sfx = Track::new("SFX", TrackKind::Sfx, "#4ecdc4");
    sfx.id = Uuid::from_u128(0x2695_613e_3bef_4f17_b44d_c8e7_53f2_268e);
    sfx.volume = 0.6;
    sfx.pan = 0.5;
    let first_blip = demo_clip(0x5d1c_7a44_1f0e_4c59_8a7e_3b09_c6d2_1e41, BLIP_ASSET, 1.0, 0.5);
    let mut second_blip = demo_clip(0x77e2_b0c1_93a4_4d8e_b1f6_0a5c_2e7d_9f13, BLIP_ASSET, 5.5, 0.5);
    second_blip.fade_out_seconds = 0.1;
    sfx.clips = vec![first_blip, second_blip];

    let mut voice = Track::new("Voice", TrackKind::Voice, "#ffe66d");
    voice.id = Uuid::from_u128(0x3c8f_52d0_6b1a_4e27_9d34_f1a0_8b6c_5e72);
    voice.pan = -0.4;
    voice.transpose_semitones = 2;
    let mut first_hum = demo_clip(0xc41b_0e96_2d7f_4a35_86e1_5f2b_a9d8_0c63, HUM_ASSET, 0.5, 2.75);
    first_hum.source_start_seconds = 0.25;
    first_hum.fade_in_seconds = 0.25;
    let mut second_hum = demo_clip(0xe905_3a7b_c612_4f88_a0d4_7b3e_16c9_2a50, HUM_ASSET, 4.5, 3.0);
    second_hum.playback_rate = 1.5;
    second_hum.fade_out_seconds = 0.3;
    voice.clips = vec![first_hum, second_hum];

    project.tracks = vec![music, sfx, voice];
    project
}

/// The demo project's tracks with buffers decoded through `decoder`.
#[must_use]
pub fn demo_tracks(decoder: &AssetDecoder) -> Vec<Track> {
    rehydrate_tracks(&demo_project(), decoder).0
}
