use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    history::{History, Snapshot},
    model::{
        Asset, AssetKind, Clip, MIN_CLIP_SECONDS, SampleBuffer, Track, TrackKind, track_color,
    },
    timeline::{SelectMode, SharedObserver, SubscriptionId, Timeline, TimelineChange},
};

#[derive(Debug, Error, PartialEq)]
pub enum EditError {
    #[error("track not found: {0}")]
    TrackNotFound(Uuid),
    #[error("clip not found: {0}")]
    ClipNotFound(Uuid),
    #[error("no track accepts assets of kind {0:?}")]
    NoTrackForKind(AssetKind),
    #[error("video assets cannot be placed on audio tracks: {0}")]
    VideoAsset(String),
    #[error("split point {at_seconds:.3}s is within 50 ms of a clip edge")]
    SplitTooCloseToEdge { at_seconds: f64 },
    #[error("invalid reorder from {from} to {to}")]
    InvalidReorder { from: usize, to: usize },
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: f64 },
}

/// Partial update of a clip's mutable fields. Unset fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipPatch {
    pub position_seconds: Option<f64>,
    pub source_start_seconds: Option<f64>,
    pub source_end_seconds: Option<f64>,
    pub fade_in_seconds: Option<f64>,
    pub fade_out_seconds: Option<f64>,
    pub playback_rate: Option<f64>,
}

impl ClipPatch {
    /// Drag of the left edge by `dx_seconds` of timeline time. The clip's end
    /// stays put while its content window and position move together, so the
    /// edge stops at the timeline origin as well as at the buffer start.
    #[must_use]
    pub fn trim_left(original: &Clip, dx_seconds: f64) -> Self {
        let rate = original.playback_rate;
        let origin_limit = original.source_start_seconds - original.position_seconds * rate;
        let new_start = (original.source_start_seconds + dx_seconds * rate)
            .max(0.0)
            .max(origin_limit)
            .min(original.source_end_seconds - original.min_content_seconds());
        let timeline_shift = (new_start - original.source_start_seconds) / rate;
        Self {
            source_start_seconds: Some(new_start),
            position_seconds: Some(original.position_seconds + timeline_shift),
            ..Self::default()
        }
    }

    /// Drag of the right edge; only the content end moves.
    #[must_use]
    pub fn trim_right(original: &Clip, dx_seconds: f64) -> Self {
        let limit = original
            .source_duration()
            .unwrap_or(original.source_end_seconds);
        let new_end = (original.source_end_seconds + dx_seconds * original.playback_rate)
            .min(limit)
            .max(original.source_start_seconds + original.min_content_seconds());
        Self {
            source_end_seconds: Some(new_end),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn fade_in(original: &Clip, dx_seconds: f64) -> Self {
        let room = original.effective_duration() - original.fade_out_seconds;
        Self {
            fade_in_seconds: Some((original.fade_in_seconds + dx_seconds).min(room).max(0.0)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn fade_out(original: &Clip, dx_seconds: f64) -> Self {
        let room = original.effective_duration() - original.fade_in_seconds;
        Self {
            fade_out_seconds: Some((original.fade_out_seconds - dx_seconds).min(room).max(0.0)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn move_by(original: &Clip, dx_seconds: f64) -> Self {
        Self {
            position_seconds: Some((original.position_seconds + dx_seconds).max(0.0)),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), EditError> {
        let fields = [
            ("position_seconds", self.position_seconds),
            ("source_start_seconds", self.source_start_seconds),
            ("source_end_seconds", self.source_end_seconds),
            ("fade_in_seconds", self.fade_in_seconds),
            ("fade_out_seconds", self.fade_out_seconds),
            ("playback_rate", self.playback_rate),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                finite(field, value)?;
            }
        }
        if let Some(rate) = self.playback_rate
            && rate <= 0.0
        {
            return Err(EditError::InvalidValue {
                field: "playback_rate",
                value: rate,
            });
        }
        Ok(())
    }

    fn apply(&self, clip: &mut Clip) {
        if let Some(rate) = self.playback_rate {
            clip.playback_rate = rate;
        }
        if let Some(position) = self.position_seconds {
            clip.position_seconds = position;
        }
        if let Some(start) = self.source_start_seconds {
            clip.source_start_seconds = start;
        }
        if let Some(end) = self.source_end_seconds {
            clip.source_end_seconds = end;
        }
        if let Some(fade_in) = self.fade_in_seconds {
            clip.fade_in_seconds = fade_in;
        }
        if let Some(fade_out) = self.fade_out_seconds {
            clip.fade_out_seconds = fade_out;
        }
        let moved_start = self.source_start_seconds.is_some() && self.source_end_seconds.is_none();
        clip.normalize(moved_start);
    }
}

/// Destination row for a vertical clip drag, clamped to existing tracks.
#[must_use]
pub fn resolve_drop_track_index(
    origin_index: usize,
    dy_pixels: f64,
    row_height_pixels: f64,
    track_count: usize,
) -> Option<usize> {
    if track_count == 0 {
        return None;
    }
    let delta = if row_height_pixels > 0.0 && dy_pixels.is_finite() {
        (dy_pixels / row_height_pixels).round() as i64
    } else {
        0
    };
    let target = (origin_index as i64 + delta).clamp(0, track_count as i64 - 1);
    usize::try_from(target).ok()
}

/// Mutations that record a history snapshot before they apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    UpdateClip {
        track_id: Uuid,
        clip_id: Uuid,
        patch: ClipPatch,
    },
    DeleteClip {
        track_id: Uuid,
        clip_id: Uuid,
    },
    MoveClip {
        source_track_id: Uuid,
        destination_track_id: Uuid,
        clip_id: Uuid,
        position_seconds: f64,
    },
    SplitClip {
        track_id: Uuid,
        clip_id: Uuid,
        at_seconds: f64,
    },
    DuplicateClip {
        track_id: Uuid,
        clip_id: Uuid,
    },
    AddTrack {
        kind: TrackKind,
    },
    DeleteTrack {
        track_id: Uuid,
    },
    ReorderTrack {
        from: usize,
        to: usize,
    },
    ToggleMute {
        track_id: Uuid,
    },
    ToggleSolo {
        track_id: Uuid,
    },
    SetTranspose {
        track_id: Uuid,
        semitones: i32,
    },
    SetVolume {
        track_id: Uuid,
        volume: f32,
    },
    SetInputGain {
        track_id: Uuid,
        gain: f32,
    },
    SetPan {
        track_id: Uuid,
        pan: f32,
    },
    SetTempo {
        bpm: f64,
    },
}

/// Drag-time mutations. They never touch history; the gesture's start
/// already captured the pre-drag state via [`Engine::begin_gesture`].
#[derive(Debug, Clone, PartialEq)]
pub enum ContinuousEdit {
    UpdateClip {
        track_id: Uuid,
        clip_id: Uuid,
        patch: ClipPatch,
    },
    MoveClip {
        source_track_id: Uuid,
        destination_track_id: Uuid,
        clip_id: Uuid,
        position_seconds: f64,
    },
    SetVolume {
        track_id: Uuid,
        volume: f32,
    },
    SetInputGain {
        track_id: Uuid,
        gain: f32,
    },
    SetPan {
        track_id: Uuid,
        pan: f32,
    },
}

/// Sole mutator of the timeline. Every committed edit snapshots the track
/// list first; failed validation leaves both timeline and history untouched.
#[derive(Debug, Default)]
pub struct Engine {
    timeline: Timeline,
    history: History,
}

impl Engine {
    #[must_use]
    pub fn new(timeline: Timeline, history_limit: usize) -> Self {
        Self {
            timeline,
            history: History::new(history_limit),
        }
    }

    #[must_use]
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        self.timeline.tracks()
    }

    #[must_use]
    pub fn bpm(&self) -> f64 {
        self.timeline.bpm()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn subscribe(&mut self, observer: SharedObserver) -> SubscriptionId {
        self.timeline.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.timeline.unsubscribe(id)
    }

    pub fn select_clip(&mut self, clip_id: Uuid, mode: SelectMode) {
        self.timeline.select_clip(clip_id, mode);
    }

    pub fn clear_selection(&mut self) {
        self.timeline.clear_selection();
    }

    pub fn select_track(&mut self, track_id: Option<Uuid>) {
        self.timeline.select_track(track_id);
    }

    pub fn set_duration(&mut self, seconds: f64) {
        self.timeline.set_duration(seconds);
    }

    /// Swap in a different track graph, dropping history and selection.
    #[instrument(skip(self, tracks), fields(tracks = tracks.len(), duration_seconds, bpm))]
    pub fn load(&mut self, tracks: Vec<Track>, duration_seconds: f64, bpm: f64) {
        self.timeline.replace_tracks(tracks);
        self.timeline.clear_selection();
        self.timeline.select_track(None);
        self.timeline.set_duration(duration_seconds);
        self.timeline.bpm = bpm;
        self.history.clear();
        self.timeline.notify(&TimelineChange::Replaced);
        info!("timeline loaded");
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            tracks: self.timeline.tracks.clone(),
            bpm: self.timeline.bpm,
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.timeline.replace_tracks(snapshot.tracks);
        self.timeline.bpm = snapshot.bpm;
        self.timeline.notify(&TimelineChange::Replaced);
    }

    fn recorded<T>(
        &mut self,
        change: TimelineChange,
        apply: impl FnOnce(&mut Timeline) -> Result<T, EditError>,
    ) -> Result<T, EditError> {
        let before = self.snapshot();
        let value = apply(&mut self.timeline)?;
        self.history.record(before);
        self.timeline.notify(&change);
        Ok(value)
    }

    fn unrecorded<T>(
        &mut self,
        change: TimelineChange,
        apply: impl FnOnce(&mut Timeline) -> Result<T, EditError>,
    ) -> Result<T, EditError> {
        let value = apply(&mut self.timeline)?;
        self.timeline.notify(&change);
        Ok(value)
    }

    pub fn commit(&mut self, edit: Edit) -> Result<(), EditError> {
        match edit {
            Edit::UpdateClip {
                track_id,
                clip_id,
                patch,
            } => self.update_clip(track_id, clip_id, patch).map(drop),
            Edit::DeleteClip { track_id, clip_id } => self.delete_clip(track_id, clip_id),
            Edit::MoveClip {
                source_track_id,
                destination_track_id,
                clip_id,
                position_seconds,
            } => self
                .move_clip(source_track_id, destination_track_id, clip_id, position_seconds)
                .map(drop),
            Edit::SplitClip {
                track_id,
                clip_id,
                at_seconds,
            } => self.split_clip(track_id, clip_id, at_seconds).map(drop),
            Edit::DuplicateClip { track_id, clip_id } => {
                self.duplicate_clip(track_id, clip_id).map(drop)
            }
            Edit::AddTrack { kind } => self.add_track(kind).map(drop),
            Edit::DeleteTrack { track_id } => self.delete_track(track_id),
            Edit::ReorderTrack { from, to } => self.reorder_track(from, to),
            Edit::ToggleMute { track_id } => self.toggle_mute(track_id).map(drop),
            Edit::ToggleSolo { track_id } => self.toggle_solo(track_id).map(drop),
            Edit::SetTranspose {
                track_id,
                semitones,
            } => self.set_transpose(track_id, semitones),
            Edit::SetVolume { track_id, volume } => {
                self.recorded(TimelineChange::Mix { track_id }, |timeline| {
                    set_volume(timeline, track_id, volume)
                })
            }
            Edit::SetInputGain { track_id, gain } => {
                self.recorded(TimelineChange::Mix { track_id }, |timeline| {
                    set_input_gain(timeline, track_id, gain)
                })
            }
            Edit::SetPan { track_id, pan } => {
                self.recorded(TimelineChange::Mix { track_id }, |timeline| {
                    set_pan(timeline, track_id, pan)
                })
            }
            Edit::SetTempo { bpm } => self.set_tempo(bpm),
        }
    }

    #[instrument(skip(self, edit), level = "trace")]
    pub fn apply_continuous(&mut self, edit: ContinuousEdit) -> Result<(), EditError> {
        match edit {
            ContinuousEdit::UpdateClip {
                track_id,
                clip_id,
                patch,
            } => self
                .unrecorded(TimelineChange::Structure, |timeline| {
                    patch_clip(timeline, track_id, clip_id, &patch)
                })
                .map(drop),
            ContinuousEdit::MoveClip {
                source_track_id,
                destination_track_id,
                clip_id,
                position_seconds,
            } => self
                .unrecorded(TimelineChange::Structure, |timeline| {
                    transfer_clip(
                        timeline,
                        source_track_id,
                        destination_track_id,
                        clip_id,
                        position_seconds,
                    )
                })
                .map(drop),
            ContinuousEdit::SetVolume { track_id, volume } => self
                .unrecorded(TimelineChange::Mix { track_id }, |timeline| {
                    set_volume(timeline, track_id, volume)
                }),
            ContinuousEdit::SetInputGain { track_id, gain } => self
                .unrecorded(TimelineChange::Mix { track_id }, |timeline| {
                    set_input_gain(timeline, track_id, gain)
                }),
            ContinuousEdit::SetPan { track_id, pan } => self
                .unrecorded(TimelineChange::Mix { track_id }, |timeline| {
                    set_pan(timeline, track_id, pan)
                }),
        }
    }

    /// Capture the pre-drag state once, before a run of continuous edits.
    #[instrument(skip(self))]
    pub fn begin_gesture(&mut self) {
        let before = self.snapshot();
        self.history.record(before);
        debug!("gesture started");
    }

    #[instrument(skip(self))]
    pub fn undo(&mut self) -> bool {
        let current = self.snapshot();
        let Some(snapshot) = self.history.undo(current) else {
            debug!("nothing to undo");
            return false;
        };
        self.restore(snapshot);
        info!("undo applied");
        true
    }

    #[instrument(skip(self))]
    pub fn redo(&mut self) -> bool {
        let Some(snapshot) = self.history.redo() else {
            debug!("nothing to redo");
            return false;
        };
        self.restore(snapshot);
        info!("redo applied");
        true
    }

    /// Place a decoded asset on the timeline. The clip spans the whole buffer
    /// and is tempo-locked to the project when the asset's tempo is known.
    #[instrument(skip(self, asset, buffer), fields(asset_id = %asset.id, position_seconds, track_id = ?track_id))]
    pub fn add_clip(
        &mut self,
        asset: &Asset,
        buffer: Arc<SampleBuffer>,
        position_seconds: f64,
        track_id: Option<Uuid>,
    ) -> Result<Clip, EditError> {
        if !asset.kind.is_audio() {
            return Err(EditError::VideoAsset(asset.id.clone()));
        }
        finite("position_seconds", position_seconds)?;

        let bpm = self.timeline.bpm;
        let mut clip = Clip::from_buffer(asset.id.clone(), buffer, position_seconds);
        clip.source_tempo_bpm = asset.detected_tempo_bpm.filter(|tempo| *tempo > 0.0);
        clip.playback_rate = clip.source_tempo_bpm.map_or(1.0, |tempo| bpm / tempo);
        clip.normalize(false);

        let kind = asset.kind;
        let placed = clip;
        let clip = self.recorded(TimelineChange::Structure, move |timeline| {
            let index = match track_id {
                Some(track_id) => timeline
                    .track_index(track_id)
                    .ok_or(EditError::TrackNotFound(track_id))?,
                None => timeline
                    .tracks
                    .iter()
                    .position(|track| track.kind.accepts(kind))
                    .ok_or(EditError::NoTrackForKind(kind))?,
            };
            timeline.extend_duration(placed.end_seconds());
            timeline.tracks[index].clips.push(placed.clone());
            Ok(placed)
        })?;
        info!(clip_id = %clip.id, playback_rate = clip.playback_rate, "clip added");
        Ok(clip)
    }

    #[instrument(skip(self, patch), fields(track_id = %track_id, clip_id = %clip_id))]
    pub fn update_clip(
        &mut self,
        track_id: Uuid,
        clip_id: Uuid,
        patch: ClipPatch,
    ) -> Result<Clip, EditError> {
        let clip = self.recorded(TimelineChange::Structure, |timeline| {
            patch_clip(timeline, track_id, clip_id, &patch)
        })?;
        info!("clip updated");
        Ok(clip)
    }

    #[instrument(skip(self), fields(track_id = %track_id, clip_id = %clip_id))]
    pub fn delete_clip(&mut self, track_id: Uuid, clip_id: Uuid) -> Result<(), EditError> {
        self.recorded(TimelineChange::Structure, |timeline| {
            let track = timeline
                .track_mut(track_id)
                .ok_or(EditError::TrackNotFound(track_id))?;
            let index = track
                .clips
                .iter()
                .position(|clip| clip.id == clip_id)
                .ok_or(EditError::ClipNotFound(clip_id))?;
            track.clips.remove(index);
            timeline.deselect_clip(clip_id);
            Ok(())
        })?;
        info!("clip deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(source = %source_track_id, destination = %destination_track_id, clip_id = %clip_id, position_seconds))]
    pub fn move_clip(
        &mut self,
        source_track_id: Uuid,
        destination_track_id: Uuid,
        clip_id: Uuid,
        position_seconds: f64,
    ) -> Result<Clip, EditError> {
        let clip = self.recorded(TimelineChange::Structure, |timeline| {
            transfer_clip(
                timeline,
                source_track_id,
                destination_track_id,
                clip_id,
                position_seconds,
            )
        })?;
        info!("clip moved");
        Ok(clip)
    }

    /// Cut a clip in two at a timeline position. The left half keeps the
    /// original id; both halves share the buffer.
    #[instrument(skip(self), fields(track_id = %track_id, clip_id = %clip_id, at_seconds))]
    pub fn split_clip(
        &mut self,
        track_id: Uuid,
        clip_id: Uuid,
        at_seconds: f64,
    ) -> Result<(Clip, Clip), EditError> {
        finite("at_seconds", at_seconds)?;
        let result = self.recorded(TimelineChange::Structure, |timeline| {
            let track = timeline
                .track_mut(track_id)
                .ok_or(EditError::TrackNotFound(track_id))?;
            let index = track
                .clips
                .iter()
                .position(|clip| clip.id == clip_id)
                .ok_or(EditError::ClipNotFound(clip_id))?;

            let original = &track.clips[index];
            let relative = at_seconds - original.position_seconds;
            let duration = original.effective_duration();
            if relative <= MIN_CLIP_SECONDS || relative >= duration - MIN_CLIP_SECONDS {
                return Err(EditError::SplitTooCloseToEdge { at_seconds });
            }

            let content_split = original.source_start_seconds + relative * original.playback_rate;
            let mut left = original.clone();
            left.source_end_seconds = content_split;
            left.fade_out_seconds = 0.0;
            left.clamp_fades();

            let mut right = original.clone();
            right.id = Uuid::new_v4();
            right.position_seconds = at_seconds;
            right.source_start_seconds = content_split;
            right.fade_in_seconds = 0.0;
            right.clamp_fades();

            track.clips[index] = left.clone();
            track.clips.insert(index + 1, right.clone());
            Ok((left, right))
        });

        match &result {
            Ok((_, right)) => info!(right_clip_id = %right.id, "clip split"),
            Err(error) => debug!(%error, "split rejected"),
        }
        result
    }

    #[instrument(skip(self), fields(track_id = %track_id, clip_id = %clip_id))]
    pub fn duplicate_clip(&mut self, track_id: Uuid, clip_id: Uuid) -> Result<Clip, EditError> {
        let copy = self.recorded(TimelineChange::Structure, |timeline| {
            let track = timeline
                .track_mut(track_id)
                .ok_or(EditError::TrackNotFound(track_id))?;
            let original = track.clip(clip_id).ok_or(EditError::ClipNotFound(clip_id))?;
            let mut copy = original.clone();
            copy.id = Uuid::new_v4();
            copy.position_seconds = original.position_seconds + original.effective_duration();
            track.clips.push(copy.clone());
            timeline.extend_duration(copy.end_seconds());
            timeline.select_clip(copy.id, SelectMode::Single);
            Ok(copy)
        })?;
        info!(copy_id = %copy.id, "clip duplicated");
        Ok(copy)
    }

    #[instrument(skip(self), fields(kind = ?kind))]
    pub fn add_track(&mut self, kind: TrackKind) -> Result<Track, EditError> {
        let track = self.recorded(TimelineChange::Structure, |timeline| {
            let track = Track::new(kind.label(), kind, track_color(timeline.tracks.len()));
            timeline.tracks.push(track.clone());
            Ok(track)
        })?;
        info!(track_id = %track.id, "track added");
        Ok(track)
    }

    /// Remove a track with all of its clips. Live nodes bound to the track are
    /// released by observers reacting to [`TimelineChange::TrackRemoved`].
    #[instrument(skip(self), fields(track_id = %track_id))]
    pub fn delete_track(&mut self, track_id: Uuid) -> Result<(), EditError> {
        self.recorded(TimelineChange::TrackRemoved { track_id }, |timeline| {
            let index = timeline
                .track_index(track_id)
                .ok_or(EditError::TrackNotFound(track_id))?;
            timeline.tracks.remove(index);
            timeline.prune_selection();
            Ok(())
        })?;
        info!("track deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(from, to))]
    pub fn reorder_track(&mut self, from: usize, to: usize) -> Result<(), EditError> {
        let count = self.timeline.tracks.len();
        if from >= count || to >= count {
            return Err(EditError::InvalidReorder { from, to });
        }
        if from == to {
            debug!("reorder noop");
            return Ok(());
        }
        self.recorded(TimelineChange::Structure, |timeline| {
            let track = timeline.tracks.remove(from);
            timeline.tracks.insert(to, track);
            Ok(())
        })?;
        info!("track reordered");
        Ok(())
    }

    #[instrument(skip(self), fields(track_id = %track_id))]
    pub fn toggle_mute(&mut self, track_id: Uuid) -> Result<bool, EditError> {
        let muted = self.recorded(TimelineChange::Mix { track_id }, |timeline| {
            let track = timeline
                .track_mut(track_id)
                .ok_or(EditError::TrackNotFound(track_id))?;
            track.muted = !track.muted;
            Ok(track.muted)
        })?;
        info!(muted, "track mute toggled");
        Ok(muted)
    }

    #[instrument(skip(self), fields(track_id = %track_id))]
    pub fn toggle_solo(&mut self, track_id: Uuid) -> Result<bool, EditError> {
        let solo = self.recorded(TimelineChange::Mix { track_id }, |timeline| {
            let track = timeline
                .track_mut(track_id)
                .ok_or(EditError::TrackNotFound(track_id))?;
            track.solo = !track.solo;
            Ok(track.solo)
        })?;
        info!(solo, "track solo toggled");
        Ok(solo)
    }

    #[instrument(skip(self), fields(track_id = %track_id, semitones))]
    pub fn set_transpose(&mut self, track_id: Uuid, semitones: i32) -> Result<(), EditError> {
        self.recorded(TimelineChange::Mix { track_id }, |timeline| {
            let track = timeline
                .track_mut(track_id)
                .ok_or(EditError::TrackNotFound(track_id))?;
            track.transpose_semitones = semitones;
            Ok(())
        })?;
        info!("track transposed");
        Ok(())
    }

    /// Change the project tempo and re-derive the rate of every clip with a
    /// detected source tempo.
    #[instrument(skip(self), fields(bpm))]
    pub fn set_tempo(&mut self, bpm: f64) -> Result<(), EditError> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(EditError::InvalidValue { field: "bpm", value: bpm });
        }
        self.recorded(TimelineChange::Tempo, |timeline| {
            timeline.bpm = bpm;
            for clip in timeline
                .tracks
                .iter_mut()
                .flat_map(|track| track.clips.iter_mut())
            {
                clip.lock_to_tempo(bpm);
            }
            let end = timeline.content_end_seconds();
            timeline.extend_duration(end);
            Ok(())
        })?;
        info!("tempo changed");
        Ok(())
    }

    /// Adopt the first detected clip tempo found on `track_id`, or on the
    /// first track holding clips. Returns the adopted tempo.
    #[instrument(skip(self), fields(track_id = ?track_id))]
    pub fn reset_tempo_to_track(&mut self, track_id: Option<Uuid>) -> Result<Option<f64>, EditError> {
        let track = match track_id {
            Some(track_id) => Some(
                self.timeline
                    .track(track_id)
                    .ok_or(EditError::TrackNotFound(track_id))?,
            ),
            None => self.timeline.tracks.iter().find(|track| !track.clips.is_empty()),
        };
        let Some(track) = track else {
            debug!("no track with clips");
            return Ok(None);
        };
        let Some(tempo) = track.clips.iter().find_map(|clip| clip.source_tempo_bpm) else {
            warn!(track_id = %track.id, "no clips with detected tempo on track");
            return Ok(None);
        };
        self.set_tempo(tempo)?;
        Ok(Some(tempo))
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), EditError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(EditError::InvalidValue { field, value })
    }
}

fn patch_clip(
    timeline: &mut Timeline,
    track_id: Uuid,
    clip_id: Uuid,
    patch: &ClipPatch,
) -> Result<Clip, EditError> {
    patch.validate()?;
    let track = timeline
        .track_mut(track_id)
        .ok_or(EditError::TrackNotFound(track_id))?;
    let clip = track
        .clip_mut(clip_id)
        .ok_or(EditError::ClipNotFound(clip_id))?;
    patch.apply(clip);
    let updated = clip.clone();
    timeline.extend_duration(updated.end_seconds());
    Ok(updated)
}

fn transfer_clip(
    timeline: &mut Timeline,
    source_track_id: Uuid,
    destination_track_id: Uuid,
    clip_id: Uuid,
    position_seconds: f64,
) -> Result<Clip, EditError> {
    finite("position_seconds", position_seconds)?;
    let position_seconds = position_seconds.max(0.0);
    let source = timeline
        .track_index(source_track_id)
        .ok_or(EditError::TrackNotFound(source_track_id))?;
    let destination = timeline
        .track_index(destination_track_id)
        .ok_or(EditError::TrackNotFound(destination_track_id))?;
    let index = timeline.tracks[source]
        .clips
        .iter()
        .position(|clip| clip.id == clip_id)
        .ok_or(EditError::ClipNotFound(clip_id))?;

    let moved = if source == destination {
        let clip = &mut timeline.tracks[source].clips[index];
        clip.position_seconds = position_seconds;
        clip.clone()
    } else {
        let mut clip = timeline.tracks[source].clips.remove(index);
        clip.position_seconds = position_seconds;
        timeline.tracks[destination].clips.push(clip.clone());
        clip
    };
    timeline.extend_duration(moved.end_seconds());
    Ok(moved)
}

fn set_volume(timeline: &mut Timeline, track_id: Uuid, volume: f32) -> Result<(), EditError> {
    let volume = finite_f32("volume", volume)?.clamp(0.0, 1.0);
    let track = timeline
        .track_mut(track_id)
        .ok_or(EditError::TrackNotFound(track_id))?;
    track.volume = volume;
    Ok(())
}

fn set_input_gain(timeline: &mut Timeline, track_id: Uuid, gain: f32) -> Result<(), EditError> {
    let gain = finite_f32("input_gain", gain)?.max(0.0);
    let track = timeline
        .track_mut(track_id)
        .ok_or(EditError::TrackNotFound(track_id))?;
    track.input_gain = gain;
    Ok(())
}

fn set_pan(timeline: &mut Timeline, track_id: Uuid, pan: f32) -> Result<(), EditError> {
    let pan = finite_f32("pan", pan)?.clamp(-1.0, 1.0);
    let track = timeline
        .track_mut(track_id)
        .ok_or(EditError::TrackNotFound(track_id))?;
    track.pan = pan;
    Ok(())
}

fn finite_f32(field: &'static str, value: f32) -> Result<f32, EditError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EditError::InvalidValue {
            field,
            value: f64::from(value),
        })
    }
}
