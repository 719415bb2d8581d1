//! Autocorrelation tempo estimate.

use tracing::{debug, instrument};

use crate::model::{DEFAULT_BPM, SampleBuffer};

const ANALYSIS_WINDOW_SECONDS: f64 = 30.0;
const ANALYSIS_RATE_HZ: u32 = 1_000;
const MIN_TEMPO_BPM: f64 = 60.0;
const MAX_TEMPO_BPM: f64 = 200.0;
const SNAP_TEMPOS: [f64; 3] = [120.0, 128.0, 140.0];
const SNAP_TOLERANCE_BPM: f64 = 1.0;

/// Estimate the tempo of a buffer in BPM. Never fails: silence or a buffer
/// too short to hold one slow beat yields [`DEFAULT_BPM`].
#[must_use]
#[instrument(skip(buffer), fields(frames = buffer.frames(), sample_rate = buffer.sample_rate()))]
pub fn detect_tempo(buffer: &SampleBuffer) -> f64 {
    let sample_rate = buffer.sample_rate();
    let mono = buffer.mono();

    let window = (f64::from(sample_rate) * ANALYSIS_WINDOW_SECONDS) as usize;
    let start = (mono.len() / 2).saturating_sub(window / 2);
    let end = (start + window).min(mono.len());
    let excerpt = &mono[start..end];

    let factor = (sample_rate / ANALYSIS_RATE_HZ).max(1) as usize;
    let analysis_rate = f64::from(sample_rate) / factor as f64;
    let decimated: Vec<f32> = excerpt.iter().step_by(factor).copied().collect();

    let min_lag = ((analysis_rate / (MAX_TEMPO_BPM / 60.0)) as usize).max(1);
    let max_lag = (analysis_rate / (MIN_TEMPO_BPM / 60.0)) as usize;
    if decimated.len() <= max_lag {
        debug!(samples = decimated.len(), "buffer too short for tempo detection");
        return DEFAULT_BPM;
    }

    let mut best_lag = 0;
    let mut best_correlation = 0.0_f64;
    for lag in min_lag..max_lag {
        let correlation: f64 = decimated
            .iter()
            .zip(&decimated[lag..])
            .map(|(a, b)| f64::from(*a) * f64::from(*b))
            .sum();
        if correlation > best_correlation {
            best_correlation = correlation;
            best_lag = lag;
        }
    }
    if best_lag == 0 {
        debug!("no periodicity found");
        return DEFAULT_BPM;
    }

    let mut bpm = 60.0 * analysis_rate / best_lag as f64;
    if bpm < 80.0 {
        bpm *= 2.0;
    }
    if bpm > 180.0 {
        bpm /= 2.0;
    }
    let mut bpm = bpm.round();
    if let Some(snap) = SNAP_TEMPOS
        .iter()
        .copied()
        .find(|snap| (bpm - snap).abs() < SNAP_TOLERANCE_BPM)
    {
        bpm = snap;
    }

    debug!(bpm, best_lag, analysis_rate, "tempo detected");
    bpm
}
