//! Raised-cosine fade automation built from linear-ramp primitives.

use std::f64::consts::PI;

use crate::{model::Clip, param::AudioParam};

pub const FADE_CURVE_SEGMENTS: u32 = 32;
/// Fades shorter than this are treated as absent.
pub const MIN_FADE_SECONDS: f64 = 0.001;

/// Position on the S-curve for a fade that is `fraction` complete.
#[must_use]
pub fn s_curve(fraction: f64) -> f64 {
    0.5 - 0.5 * (PI * fraction.clamp(0.0, 1.0)).cos()
}

/// Schedule an S-curve from `start_value` to `end_value` over `duration`
/// seconds, sampled at [`FADE_CURVE_SEGMENTS`] points joined by linear ramps.
pub fn apply_s_curve(
    param: &mut AudioParam,
    start_value: f32,
    end_value: f32,
    start_time: f64,
    duration: f64,
) {
    param.set_value_at_time(start_value, start_time);
    let duration = duration.max(0.0);
    for segment in 1..=FADE_CURVE_SEGMENTS {
        let fraction = f64::from(segment) / f64::from(FADE_CURVE_SEGMENTS);
        let position = s_curve(fraction) as f32;
        let value = start_value + (end_value - start_value) * position;
        param.linear_ramp_to_value_at_time(value, start_time + fraction * duration);
    }
}

/// Fade gain at `timeline_seconds` for a clip, evaluated analytically.
#[must_use]
pub fn fade_gain_at(clip: &Clip, timeline_seconds: f64) -> f64 {
    let start = clip.position_seconds;
    let end = clip.end_seconds();
    let mut gain = 1.0;

    if clip.fade_in_seconds > MIN_FADE_SECONDS && timeline_seconds < start + clip.fade_in_seconds {
        gain *= s_curve((timeline_seconds - start) / clip.fade_in_seconds);
    }
    let fade_out_start = end - clip.fade_out_seconds;
    if clip.fade_out_seconds > MIN_FADE_SECONDS && timeline_seconds > fade_out_start {
        gain *= 1.0 - s_curve((timeline_seconds - fade_out_start) / clip.fade_out_seconds);
    }
    gain
}

/// Live scheduling: the transport is at `from` and engine time is `now`.
/// A transport position inside a fade window resumes the curve from its
/// current value over the remaining time instead of restarting it.
pub fn schedule_live_fades(param: &mut AudioParam, clip: &Clip, from: f64, now: f64) {
    let clip_start = clip.position_seconds;
    let clip_end = clip.end_seconds();
    let fade_in = clip.fade_in_seconds;
    let fade_out = clip.fade_out_seconds;
    let fade_in_end = clip_start + fade_in;
    let fading_in = fade_in > MIN_FADE_SECONDS && from < fade_in_end;

    param.set_value_at_time(if fading_in { 0.0 } else { 1.0 }, now);

    if fading_in {
        if from <= clip_start {
            let play_start = now + (clip_start - from);
            param.set_value_at_time(0.0, play_start);
            apply_s_curve(param, 0.0, 1.0, play_start, fade_in);
        } else {
            let current = s_curve((from - clip_start) / fade_in) as f32;
            apply_s_curve(param, current, 1.0, now, fade_in_end - from);
        }
    }

    if fade_out > MIN_FADE_SECONDS && from < clip_end {
        let fade_out_start = clip_end - fade_out;
        if from < fade_out_start {
            let scheduled = now + (fade_out_start - from);
            param.set_value_at_time(1.0, scheduled);
            apply_s_curve(param, 1.0, 0.0, scheduled, fade_out);
        } else {
            let current = (1.0 - s_curve((from - fade_out_start) / fade_out)) as f32;
            apply_s_curve(param, current, 0.0, now, clip_end - from);
        }
    }
}

/// Offline scheduling: the curve always starts at the clip boundary.
/// `clip_start`/`clip_end` are render-context times and may lie outside
/// the rendered window.
pub fn schedule_absolute_fades(param: &mut AudioParam, clip: &Clip, clip_start: f64) {
    let clip_end = clip_start + clip.effective_duration();
    let fade_in = clip.fade_in_seconds;
    let fade_out = clip.fade_out_seconds;

    if fade_in > MIN_FADE_SECONDS {
        param.set_value_at_time(0.0, clip_start);
        apply_s_curve(param, 0.0, 1.0, clip_start, fade_in);
    }
    param.set_value_at_time(1.0, clip_start + fade_in.max(0.0));

    if fade_out > MIN_FADE_SECONDS {
        let fade_out_start = (clip_start + fade_in).max(clip_end - fade_out);
        param.set_value_at_time(1.0, fade_out_start);
        apply_s_curve(param, 1.0, 0.0, fade_out_start, fade_out);
        param.set_value_at_time(0.0, clip_end);
    }
}

/// Linear guard ramps at the edges of a ranged render, applied only where
/// the selection cuts through the clip.
pub fn schedule_guard_fades(
    param: &mut AudioParam,
    play_start: f64,
    play_end: f64,
    guard: f64,
    cut_at_start: bool,
    cut_at_end: bool,
) {
    param.set_value_at_time(1.0, play_start);
    if cut_at_start {
        param.set_value_at_time(0.0, play_start);
        param.linear_ramp_to_value_at_time(1.0, play_start + guard);
    }
    if cut_at_end {
        let guard_start = (play_end - guard).max(play_start + if cut_at_start { guard } else { 0.0 });
        param.set_value_at_time(1.0, guard_start);
        param.linear_ramp_to_value_at_time(0.0, play_end);
    }
}
