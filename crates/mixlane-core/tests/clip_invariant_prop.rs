use std::sync::Arc;

use mixlane_core::{
    Asset, AssetKind, AssetSource, ClipPatch, Engine, SampleBuffer, model::MIN_CLIP_SECONDS,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Gesture {
    TrimLeft(f64),
    TrimRight(f64),
    FadeIn(f64),
    FadeOut(f64),
    Move(f64),
    Split(f64),
}

fn gesture() -> impl Strategy<Value = Gesture> {
    prop_oneof![
        (-6.0..6.0).prop_map(Gesture::TrimLeft),
        (-6.0..6.0).prop_map(Gesture::TrimRight),
        (-6.0..6.0).prop_map(Gesture::FadeIn),
        (-6.0..6.0).prop_map(Gesture::FadeOut),
        (-6.0..6.0).prop_map(Gesture::Move),
        (0.0..1.0).prop_map(Gesture::Split),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        .. ProptestConfig::default()
    })]

    #[test]
    fn clip_gestures_preserve_invariants(
        tempo in prop::option::of(60.0..180.0_f64),
        gestures in prop::collection::vec(gesture(), 1..24),
    ) {
        let mut engine = Engine::default();
        let buffer = Arc::new(SampleBuffer::new(1_000, vec![vec![0.25; 4_000]]));
        let mut asset = Asset::new("loop", "Loop", "memory://loop.wav", AssetKind::Music, AssetSource::Generated);
        asset.detected_tempo_bpm = tempo;
        engine.add_clip(&asset, buffer, 2.0, None).expect("add clip should succeed");
        let track_id = engine.tracks()[0].id;

        for gesture in gestures {
            let clips = engine.tracks()[0].clips.clone();
            let Some(target) = clips.last() else {
                break;
            };
            let _ = match gesture {
                Gesture::TrimLeft(dx) => {
                    let trimmed = engine.update_clip(track_id, target.id, ClipPatch::trim_left(target, dx));
                    if let Ok(clip) = &trimmed {
                        prop_assert!((clip.end_seconds() - target.end_seconds()).abs() < 1e-9);
                    }
                    trimmed.map(drop)
                }
                Gesture::TrimRight(dx) => engine.update_clip(track_id, target.id, ClipPatch::trim_right(target, dx)).map(drop),
                Gesture::FadeIn(dx) => engine.update_clip(track_id, target.id, ClipPatch::fade_in(target, dx)).map(drop),
                Gesture::FadeOut(dx) => engine.update_clip(track_id, target.id, ClipPatch::fade_out(target, dx)).map(drop),
                Gesture::Move(dx) => engine.update_clip(track_id, target.id, ClipPatch::move_by(target, dx)).map(drop),
                Gesture::Split(fraction) => {
                    let at = target.position_seconds + target.effective_duration() * fraction;
                    engine.split_clip(track_id, target.id, at).map(drop)
                }
            };

            for clip in &engine.tracks()[0].clips {
                let duration = clip.effective_duration();
                prop_assert!(clip.source_start_seconds >= 0.0);
                prop_assert!(clip.source_end_seconds <= 4.0 + 1e-9);
                prop_assert!(clip.source_start_seconds < clip.source_end_seconds);
                prop_assert!(duration >= MIN_CLIP_SECONDS - 1e-9);
                prop_assert!(clip.position_seconds >= 0.0);
                prop_assert!(clip.fade_in_seconds >= 0.0 && clip.fade_out_seconds >= 0.0);
                prop_assert!(clip.fade_in_seconds + clip.fade_out_seconds <= duration + 1e-9);
                prop_assert!(engine.timeline().duration_seconds() >= clip.end_seconds() - 1e-9);
            }
        }
    }
}
