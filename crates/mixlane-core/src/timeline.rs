//! The live track graph with its derived quantities, selection state and
//! change subscriptions.

use std::{collections::BTreeSet, fmt, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::model::{Clip, DEFAULT_BPM, DEFAULT_TIMELINE_SECONDS, Track, any_solo, default_tracks};

#[derive(Debug, Clone, PartialEq)]
pub enum TimelineChange {
    /// Clips or tracks were added, removed, moved or reshaped.
    Structure,
    /// Mix parameters (volume, gain, pan, mute, solo, transpose) of one track.
    Mix { track_id: Uuid },
    /// A track and all of its clips were deleted.
    TrackRemoved { track_id: Uuid },
    /// Project tempo changed and clip rates were re-derived.
    Tempo,
    /// The whole track list was swapped (undo, redo, project switch).
    Replaced,
}

pub trait TimelineObserver: Send {
    fn timeline_changed(&mut self, change: &TimelineChange, timeline: &Timeline);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectMode {
    Single,
    Add,
    Toggle,
}

pub type SharedObserver = Arc<Mutex<dyn TimelineObserver>>;

pub struct Timeline {
    pub(crate) tracks: Vec<Track>,
    pub(crate) duration_seconds: f64,
    pub(crate) bpm: f64,
    selected_clip_ids: BTreeSet<Uuid>,
    selected_track_id: Option<Uuid>,
    observers: Vec<(SubscriptionId, SharedObserver)>,
    next_subscription: u64,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(default_tracks(), DEFAULT_TIMELINE_SECONDS, DEFAULT_BPM)
    }
}

impl fmt::Debug for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeline")
            .field("tracks", &self.tracks.len())
            .field("duration_seconds", &self.duration_seconds)
            .field("bpm", &self.bpm)
            .field("selected_clip_ids", &self.selected_clip_ids)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Timeline {
    #[must_use]
    pub fn new(tracks: Vec<Track>, duration_seconds: f64, bpm: f64) -> Self {
        Self {
            tracks,
            duration_seconds: duration_seconds.max(0.0),
            bpm,
            selected_clip_ids: BTreeSet::new(),
            selected_track_id: None,
            observers: Vec::new(),
            next_subscription: 0,
        }
    }

    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    #[must_use]
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    #[must_use]
    pub fn track(&self, track_id: Uuid) -> Option<&Track> {
        self.tracks.iter().find(|track| track.id == track_id)
    }

    pub(crate) fn track_mut(&mut self, track_id: Uuid) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|track| track.id == track_id)
    }

    #[must_use]
    pub fn track_index(&self, track_id: Uuid) -> Option<usize> {
        self.tracks.iter().position(|track| track.id == track_id)
    }

    /// Locate a clip anywhere on the timeline.
    #[must_use]
    pub fn find_clip(&self, clip_id: Uuid) -> Option<(&Track, &Clip)> {
        self.tracks
            .iter()
            .find_map(|track| track.clip(clip_id).map(|clip| (track, clip)))
    }

    /// Latest clip end across every track.
    #[must_use]
    pub fn content_end_seconds(&self) -> f64 {
        self.tracks
            .iter()
            .map(Track::end_seconds)
            .fold(0.0, f64::max)
    }

    #[must_use]
    pub fn any_solo(&self) -> bool {
        any_solo(&self.tracks)
    }

    #[must_use]
    pub fn audible_tracks(&self) -> Vec<&Track> {
        let solo = self.any_solo();
        self.tracks
            .iter()
            .filter(|track| track.is_audible(solo))
            .collect()
    }

    pub fn set_duration(&mut self, seconds: f64) {
        self.duration_seconds = seconds.max(0.0);
    }

    /// Grow the timeline so that `seconds` fits. Never shrinks.
    pub fn extend_duration(&mut self, seconds: f64) {
        if seconds > self.duration_seconds {
            self.duration_seconds = seconds;
        }
    }

    #[must_use]
    pub fn selected_clip_ids(&self) -> &BTreeSet<Uuid> {
        &self.selected_clip_ids
    }

    #[must_use]
    pub fn is_selected(&self, clip_id: Uuid) -> bool {
        self.selected_clip_ids.contains(&clip_id)
    }

    pub fn select_clip(&mut self, clip_id: Uuid, mode: SelectMode) {
        match mode {
            SelectMode::Single => {
                self.selected_clip_ids.clear();
                self.selected_clip_ids.insert(clip_id);
            }
            SelectMode::Add => {
                self.selected_clip_ids.insert(clip_id);
            }
            SelectMode::Toggle => {
                if !self.selected_clip_ids.remove(&clip_id) {
                    self.selected_clip_ids.insert(clip_id);
                }
            }
        }
    }

    pub fn deselect_clip(&mut self, clip_id: Uuid) {
        self.selected_clip_ids.remove(&clip_id);
    }

    pub fn clear_selection(&mut self) {
        self.selected_clip_ids.clear();
    }

    #[must_use]
    pub fn selected_track_id(&self) -> Option<Uuid> {
        self.selected_track_id
    }

    pub fn select_track(&mut self, track_id: Option<Uuid>) {
        self.selected_track_id = track_id;
    }

    /// Drop selection entries whose clips or track no longer exist.
    pub(crate) fn prune_selection(&mut self) {
        let tracks = &self.tracks;
        self.selected_clip_ids.retain(|clip_id| {
            tracks
                .iter()
                .any(|track| track.clips.iter().any(|clip| clip.id == *clip_id))
        });
        if let Some(track_id) = self.selected_track_id
            && !tracks.iter().any(|track| track.id == track_id)
        {
            self.selected_track_id = None;
        }
    }

    pub(crate) fn replace_tracks(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks;
        self.prune_selection();
    }

    pub fn subscribe(&mut self, observer: SharedObserver) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    pub(crate) fn notify(&self, change: &TimelineChange) {
        trace!(?change, observers = self.observers.len(), "timeline changed");
        for (_, observer) in &self.observers {
            observer.lock().timeline_changed(change, self);
        }
    }
}
