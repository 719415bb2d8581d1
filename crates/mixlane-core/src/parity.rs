//! Live-versus-offline parity: the same tracks rendered through the playback
//! scheduler on a stepped clock and through the mixdown renderer.

use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::{
    audio::ManualAudioEngine,
    mixdown::{MixdownOptions, RenderedMix, quantize_sample, render_mix},
    model::{OUTPUT_CHANNELS, Project, Track},
    scheduler::{PlaybackScheduler, SchedulerSettings},
};

const PARITY_SCHEMA_VERSION: u32 = 1;
/// Largest per-sample difference still reported as matching.
pub const PARITY_TOLERANCE: f32 = 1.0e-4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParityReport {
    pub schema_version: u32,
    pub project_id: String,
    pub track_count: usize,
    pub clip_count: usize,
    pub frames: usize,
    pub project_hash: String,
    pub live_hash: String,
    pub offline_hash: String,
    pub max_abs_difference: f32,
    pub matches: bool,
}

/// Play `tracks` from zero on a manual clock, rendering in the same blocks
/// the offline renderer uses.
#[must_use]
pub fn render_live(tracks: &[Track], duration_seconds: f64, options: &MixdownOptions) -> RenderedMix {
    let engine = Arc::new(ManualAudioEngine::new(options.sample_rate));
    let mut scheduler = PlaybackScheduler::new(engine.clone(), SchedulerSettings::default());
    scheduler.play(tracks, 0.0, duration_seconds);

    let channels = usize::from(OUTPUT_CHANNELS);
    let block_frames = options.block_frames.max(1);
    let rate = f64::from(options.sample_rate);
    let frames = (duration_seconds.max(0.0) * rate).ceil() as usize;
    let mut samples = vec![0.0_f32; frames * channels];

    for (block_index, block) in samples.chunks_mut(block_frames * channels).enumerate() {
        let block_start = (block_index * block_frames) as f64 / rate;
        engine.set_time(block_start);
        scheduler.poll();
        scheduler.render(block_start, block);
    }
    scheduler.stop();

    RenderedMix {
        sample_rate: options.sample_rate,
        channels: OUTPUT_CHANNELS,
        samples,
    }
}

#[instrument(skip(project, tracks, options), fields(project_id = %project.id))]
pub fn generate_parity_report(
    project: &Project,
    tracks: &[Track],
    options: &MixdownOptions,
) -> Result<ParityReport> {
    let project_bytes = serde_json::to_vec(project).context("failed to serialize project")?;
    let live = render_live(tracks, project.duration_seconds, options);
    let offline = render_mix(tracks, project.duration_seconds, options);

    let max_abs_difference = live
        .samples
        .iter()
        .zip(&offline.samples)
        .map(|(left, right)| (left - right).abs())
        .fold(0.0_f32, f32::max);
    let matches =
        live.samples.len() == offline.samples.len() && max_abs_difference <= PARITY_TOLERANCE;

    let report = ParityReport {
        schema_version: PARITY_SCHEMA_VERSION,
        project_id: project.id.to_string(),
        track_count: tracks.len(),
        clip_count: tracks.iter().map(|track| track.clips.len()).sum(),
        frames: offline.frames(),
        project_hash: hash_hex(&project_bytes),
        live_hash: hash_hex(&pcm_bytes(&live)),
        offline_hash: hash_hex(&pcm_bytes(&offline)),
        max_abs_difference,
        matches,
    };
    info!(matches, max_abs_difference, "parity report generated");
    Ok(report)
}

pub fn read_parity_report(path: &Path) -> Result<ParityReport> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read parity report: {}", path.display()))?;
    let report: ParityReport =
        serde_json::from_slice(&bytes).context("failed to parse parity report json")?;
    Ok(report)
}

pub fn write_parity_report(path: &Path, report: &ParityReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parity directory: {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(report).context("failed to encode parity report json")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write parity report: {}", path.display()))?;
    Ok(())
}

fn pcm_bytes(mix: &RenderedMix) -> Vec<u8> {
    mix.samples
        .iter()
        .flat_map(|sample| quantize_sample(*sample).to_le_bytes())
        .collect()
}

fn hash_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}
