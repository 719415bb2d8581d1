//! Offline rendering of the timeline to interleaved PCM and WAVE bytes.

use std::{
    fs,
    io::Cursor,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::{
    fades::{schedule_absolute_fades, schedule_guard_fades},
    graph::{RenderGraph, Voice},
    model::{OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE, Track, any_solo},
    param::AudioParam,
    persistence::write_atomically,
};

pub const RANGE_GUARD_FADE_SECONDS: f64 = 0.01;
pub const RENDER_BLOCK_FRAMES: usize = 1_024;

#[derive(Debug, Error, PartialEq)]
pub enum MixdownError {
    #[error("invalid render range {start:.3}s..{end:.3}s")]
    InvalidRange { start: f64, end: f64 },
    #[error("failed to encode wav: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixdownOptions {
    pub sample_rate: u32,
    pub guard_fade_seconds: f64,
    pub block_frames: usize,
}

impl Default for MixdownOptions {
    fn default() -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            guard_fade_seconds: RANGE_GUARD_FADE_SECONDS,
            block_frames: RENDER_BLOCK_FRAMES,
        }
    }
}

/// Interleaved stereo PCM in the float domain.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMix {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl RenderedMix {
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate.max(1))
    }

    #[must_use]
    pub fn peak(&self) -> f32 {
        self.samples.iter().copied().map(f32::abs).fold(0.0, f32::max)
    }

    /// Frame at `index` as `(left, right)`.
    #[must_use]
    pub fn frame(&self, index: usize) -> Option<(f32, f32)> {
        let base = index * 2;
        Some((*self.samples.get(base)?, *self.samples.get(base + 1)?))
    }
}

/// Build the static graph for `[range_start, range_start + range_length)`.
/// Render-context time zero corresponds to `range_start` on the timeline.
fn build_graph(
    tracks: &[Track],
    range_start: f64,
    range_length: f64,
    guard_fade_seconds: Option<f64>,
) -> RenderGraph {
    let mut graph = RenderGraph::new();
    let solo = any_solo(tracks);

    for track in tracks {
        if !track.is_audible(solo) {
            debug!(track_id = %track.id, "track excluded from mixdown");
            continue;
        }
        let bus = graph.ensure_bus(track.id);
        bus.input_gain.set_value_at_time(track.input_gain, 0.0);
        bus.volume.set_value_at_time(track.volume, 0.0);
        bus.pan.set_value_at_time(track.pan, 0.0);

        for clip in &track.clips {
            let Some(buffer) = clip.buffer.get() else {
                debug!(clip_id = %clip.id, "clip without buffer skipped");
                continue;
            };
            let clip_start = clip.position_seconds - range_start;
            let clip_end = clip_start + clip.effective_duration();
            if clip_end <= 0.0 || clip_start >= range_length {
                continue;
            }

            let start_time = clip_start.max(0.0);
            let offset = clip.source_start_seconds + (start_time - clip_start) * clip.playback_rate;
            let mut voice = Voice::new(
                track.id,
                clip.id,
                buffer.clone(),
                start_time,
                offset,
                clip.source_end_seconds,
                clip.playback_rate,
            );
            voice.detune.set_value_at_time(track.detune_cents(), 0.0);
            schedule_absolute_fades(&mut voice.gain, clip, clip_start);

            if let Some(guard) = guard_fade_seconds {
                let cut_at_start = clip_start < 0.0;
                let cut_at_end = clip_end > range_length;
                if cut_at_start || cut_at_end {
                    let mut param = AudioParam::new(1.0);
                    schedule_guard_fades(
                        &mut param,
                        start_time,
                        clip_end.min(range_length),
                        guard,
                        cut_at_start,
                        cut_at_end,
                    );
                    voice.guard = Some(param);
                }
            }
            graph.add_voice(voice);
        }
    }
    graph
}

fn render_graph(mut graph: RenderGraph, frames: usize, options: &MixdownOptions) -> RenderedMix {
    let channels = usize::from(OUTPUT_CHANNELS);
    let block_frames = options.block_frames.max(1);
    let rate = f64::from(options.sample_rate);
    let mut samples = vec![0.0_f32; frames * channels];

    for (block_index, block) in samples.chunks_mut(block_frames * channels).enumerate() {
        let block_start = (block_index * block_frames) as f64 / rate;
        graph.render(block_start, options.sample_rate, block);
    }

    RenderedMix {
        sample_rate: options.sample_rate,
        channels: OUTPUT_CHANNELS,
        samples,
    }
}

/// Render the whole timeline, `duration_seconds` long.
#[instrument(skip(tracks, options), fields(tracks = tracks.len(), duration_seconds))]
pub fn render_mix(tracks: &[Track], duration_seconds: f64, options: &MixdownOptions) -> RenderedMix {
    let duration_seconds = duration_seconds.max(0.0);
    let frames = (duration_seconds * f64::from(options.sample_rate)).ceil() as usize;
    let graph = build_graph(tracks, 0.0, duration_seconds, None);
    let rendered = render_graph(graph, frames, options);
    debug!(frames, peak = rendered.peak(), "mix rendered");
    rendered
}

/// Render `[start, end)` with guard fades where the range cuts through clips.
#[instrument(skip(tracks, options), fields(tracks = tracks.len(), start, end))]
pub fn render_range(
    tracks: &[Track],
    start: f64,
    end: f64,
    options: &MixdownOptions,
) -> Result<RenderedMix, MixdownError> {
    if !start.is_finite() || !end.is_finite() || start < 0.0 || end <= start {
        return Err(MixdownError::InvalidRange { start, end });
    }
    let length = end - start;
    let frames = (length * f64::from(options.sample_rate)).ceil() as usize;
    let graph = build_graph(tracks, start, length, Some(options.guard_fade_seconds));
    let rendered = render_graph(graph, frames, options);
    debug!(frames, peak = rendered.peak(), "range rendered");
    Ok(rendered)
}

/// Float sample to signed 16-bit, clamped, asymmetric around zero.
#[must_use]
pub fn quantize_sample(sample: f32) -> i16 {
    let sample = sample.clamp(-1.0, 1.0);
    if sample < 0.0 {
        (sample * 32_768.0) as i16
    } else {
        (sample * 32_767.0) as i16
    }
}

/// RIFF/WAVE bytes: 44-byte header, 16-bit PCM, interleaved little-endian.
pub fn encode_wav(mix: &RenderedMix) -> Result<Vec<u8>, MixdownError> {
    let spec = hound::WavSpec {
        channels: mix.channels,
        sample_rate: mix.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + mix.samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|error| MixdownError::Encode(error.to_string()))?;
        for sample in &mix.samples {
            writer
                .write_sample(quantize_sample(*sample))
                .map_err(|error| MixdownError::Encode(error.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|error| MixdownError::Encode(error.to_string()))?;
    }
    Ok(cursor.into_inner())
}

#[instrument(skip(tracks, options), fields(tracks = tracks.len(), duration_seconds, path = %path.display()))]
pub fn export_mix(
    tracks: &[Track],
    duration_seconds: f64,
    path: &Path,
    options: &MixdownOptions,
) -> Result<RenderedMix> {
    let rendered = render_mix(tracks, duration_seconds, options);
    let bytes = encode_wav(&rendered)?;
    write_atomically(path, &bytes)?;
    info!(bytes = bytes.len(), "mixdown export completed");
    Ok(rendered)
}

#[instrument(skip(tracks, options), fields(tracks = tracks.len(), start, end, path = %path.display()))]
pub fn export_range(
    tracks: &[Track],
    start: f64,
    end: f64,
    path: &Path,
    options: &MixdownOptions,
) -> Result<RenderedMix> {
    let rendered = render_range(tracks, start, end, options)?;
    let bytes = encode_wav(&rendered)?;
    write_atomically(path, &bytes)?;
    info!(bytes = bytes.len(), "range export completed");
    Ok(rendered)
}

/// Combine a rendered WAVE blob with a video through an external ffmpeg.
/// The video stream is copied; audio is encoded to AAC.
#[instrument(skip(wav_bytes), fields(video = %video_path.display(), output = %output_path.display()))]
pub fn mux_with_video(
    wav_bytes: &[u8],
    video_path: &Path,
    output_path: &Path,
    ffmpeg_binary: Option<&Path>,
) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create video output directory: {}",
                parent.display()
            )
        })?;
    }

    let ffmpeg = ffmpeg_binary.map_or_else(|| PathBuf::from("ffmpeg"), Path::to_path_buf);
    let temp_dir = tempfile::tempdir().context("failed to create temporary mux directory")?;
    let temp_wav = temp_dir.path().join("mixlane_mix.wav");
    fs::write(&temp_wav, wav_bytes)
        .with_context(|| format!("failed to write temporary wav {}", temp_wav.display()))?;

    let status = Command::new(&ffmpeg)
        .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
        .arg(video_path)
        .arg("-i")
        .arg(&temp_wav)
        .args([
            "-c:v", "copy", "-c:a", "aac", "-map", "0:v:0", "-map", "1:a:0", "-shortest",
        ])
        .arg(output_path)
        .status()
        .with_context(|| format!("failed to spawn ffmpeg: {}", ffmpeg.display()))?;

    if !status.success() {
        return Err(anyhow::anyhow!(
            "ffmpeg exited with status {status} while combining video"
        ));
    }

    info!("video export completed");
    Ok(())
}
