//! Live playback: turns the track graph plus a transport position into
//! scheduled voices, and runs the transport clock.

use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace};
use uuid::Uuid;

use crate::{
    audio::AudioEngine,
    fades::schedule_live_fades,
    graph::{RenderGraph, Voice},
    model::{Clip, Track, any_solo},
    timeline::{Timeline, TimelineChange, TimelineObserver},
};

pub const DEFAULT_SMOOTHING_SECONDS: f64 = 0.05;
pub const DEFAULT_PUBLISH_RATE_HZ: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Stopped,
    Playing,
}

/// Lock-free playhead shared with render-side readers. Written on every poll.
#[derive(Debug, Clone, Default)]
pub struct TransportCursor(Arc<AtomicU64>);

impl TransportCursor {
    #[must_use]
    pub fn position(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, seconds: f64) {
        self.0.store(seconds.to_bits(), Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportTick {
    pub position: f64,
    /// Throttled copy for UI consumers; `None` between publishes.
    pub published: Option<f64>,
    /// Playback reached the end of the timeline on this poll.
    pub ended: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub smoothing_seconds: f64,
    pub publish_rate_hz: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            smoothing_seconds: DEFAULT_SMOOTHING_SECONDS,
            publish_rate_hz: DEFAULT_PUBLISH_RATE_HZ,
        }
    }
}

pub struct PlaybackScheduler {
    engine: Arc<dyn AudioEngine>,
    settings: SchedulerSettings,
    state: TransportState,
    graph: RenderGraph,
    tracks: Vec<Track>,
    duration_seconds: f64,
    position_at_play_start: f64,
    engine_time_at_play_start: f64,
    stopped_position: f64,
    scheduled_tracks: HashSet<Uuid>,
    cursor: TransportCursor,
    last_publish: Option<f64>,
}

impl fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("state", &self.state)
            .field("tracks", &self.tracks.len())
            .field("duration_seconds", &self.duration_seconds)
            .field("voices", &self.graph.voices().len())
            .finish_non_exhaustive()
    }
}

impl PlaybackScheduler {
    #[must_use]
    pub fn new(engine: Arc<dyn AudioEngine>, settings: SchedulerSettings) -> Self {
        Self {
            engine,
            settings,
            state: TransportState::Stopped,
            graph: RenderGraph::new(),
            tracks: Vec::new(),
            duration_seconds: 0.0,
            position_at_play_start: 0.0,
            engine_time_at_play_start: 0.0,
            stopped_position: 0.0,
            scheduled_tracks: HashSet::new(),
            cursor: TransportCursor::default(),
            last_publish: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        self.state
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    #[must_use]
    pub fn cursor(&self) -> TransportCursor {
        self.cursor.clone()
    }

    #[must_use]
    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    pub fn set_duration(&mut self, seconds: f64) {
        self.duration_seconds = seconds.max(0.0);
    }

    /// Transport position derived from the engine clock while playing.
    #[must_use]
    pub fn position(&self) -> f64 {
        match self.state {
            TransportState::Playing => {
                self.position_at_play_start
                    + (self.engine.current_time() - self.engine_time_at_play_start)
            }
            TransportState::Stopped => self.stopped_position,
        }
    }

    /// Start playback of `tracks` from `from`. Starting at or past the end
    /// rewinds to zero.
    #[instrument(skip(self, tracks), fields(tracks = tracks.len(), from, duration_seconds))]
    pub fn play(&mut self, tracks: &[Track], from: f64, duration_seconds: f64) {
        self.tracks = tracks.to_vec();
        self.duration_seconds = duration_seconds.max(0.0);
        let mut from = from.clamp(0.0, self.duration_seconds);
        if from >= self.duration_seconds {
            from = 0.0;
        }
        if self.is_playing() {
            self.graph.stop_all();
        }
        self.state = TransportState::Playing;
        self.start_at(from);
        info!(voices = self.graph.active_voice_count(), "playback started");
    }

    /// Stop playback and return the position it stopped at. Idempotent.
    #[instrument(skip(self))]
    pub fn stop(&mut self) -> f64 {
        if !self.is_playing() {
            debug!("stop on stopped transport ignored");
            return self.stopped_position;
        }
        let position = self.position().clamp(0.0, self.duration_seconds);
        self.halt(position);
        info!(position, "playback stopped");
        position
    }

    /// Move the playhead. While playing this tears the graph down and
    /// reschedules from the new position.
    #[instrument(skip(self), fields(to))]
    pub fn seek(&mut self, to: f64) {
        let to = if to.is_finite() {
            to.clamp(0.0, self.duration_seconds)
        } else {
            0.0
        };
        if self.is_playing() {
            self.graph.stop_all();
            self.start_at(to);
        } else {
            self.stopped_position = to;
            self.cursor.store(to);
        }
        debug!(position = to, "transport seeked");
    }

    /// One clock-loop iteration: update the cursor, publish at the throttled
    /// rate and stop at the end of the timeline.
    pub fn poll(&mut self) -> TransportTick {
        if !self.is_playing() {
            return TransportTick {
                position: self.stopped_position,
                published: None,
                ended: false,
            };
        }

        let position = self.position();
        if position >= self.duration_seconds {
            let end = self.duration_seconds;
            self.halt(end);
            info!(position = end, "playback reached timeline end");
            return TransportTick {
                position: end,
                published: Some(end),
                ended: true,
            };
        }

        self.cursor.store(position);
        let now = self.engine.current_time();
        let interval = 1.0 / self.settings.publish_rate_hz.max(f64::EPSILON);
        let published = match self.last_publish {
            Some(last) if now - last < interval => None,
            _ => {
                self.last_publish = Some(now);
                Some(position)
            }
        };
        TransportTick {
            position,
            published,
            ended: false,
        }
    }

    /// Render the next block of live output. `block_start` is engine time.
    pub fn render(&mut self, block_start: f64, out: &mut [f32]) {
        self.graph.render(block_start, self.engine.sample_rate(), out);
    }

    /// Stop playback and release every per-track node.
    #[instrument(skip(self))]
    pub fn teardown(&mut self) {
        if self.is_playing() {
            let position = self.position().clamp(0.0, self.duration_seconds);
            self.halt(position);
        }
        let track_ids: Vec<Uuid> = self.tracks.iter().map(|track| track.id).collect();
        for track_id in track_ids {
            self.graph.remove_bus(track_id);
        }
        self.graph = RenderGraph::new();
        self.tracks.clear();
        self.scheduled_tracks.clear();
        self.stopped_position = 0.0;
        self.cursor.store(0.0);
        debug!("scheduler torn down");
    }

    /// Apply mix changes to live nodes with smoothed transitions. Tracks
    /// that became audible get their clips scheduled from the playhead.
    #[instrument(skip(self, tracks), fields(tracks = tracks.len()))]
    pub fn sync_tracks(&mut self, tracks: &[Track]) {
        self.tracks = tracks.to_vec();
        if !self.is_playing() {
            return;
        }
        let now = self.engine.current_time();
        let position = self.position();
        let tau = self.settings.smoothing_seconds;
        let solo = any_solo(&self.tracks);

        let tracks = std::mem::take(&mut self.tracks);
        for track in &tracks {
            let audible = track.is_audible(solo);
            let bus = self.graph.ensure_bus(track.id);
            bus.input_gain.set_target_at_time(track.input_gain, now, tau);
            bus.volume
                .set_target_at_time(if audible { track.volume } else { 0.0 }, now, tau);
            bus.pan.set_target_at_time(track.pan, now, tau);

            let cents = track.detune_cents();
            for voice in self
                .graph
                .voices_mut()
                .filter(|voice| voice.track_id == track.id)
            {
                voice.detune.set_target_at_time(cents, now, tau);
            }

            if audible && !self.scheduled_tracks.contains(&track.id) {
                self.schedule_track_clips(track, position, now);
                self.scheduled_tracks.insert(track.id);
                debug!(track_id = %track.id, "track became audible, clips scheduled");
            }
        }
        self.tracks = tracks;
    }

    /// Release the nodes of a deleted track.
    #[instrument(skip(self), fields(track_id = %track_id))]
    pub fn release_track(&mut self, track_id: Uuid) {
        self.scheduled_tracks.remove(&track_id);
        if self.graph.remove_bus(track_id) {
            debug!("track nodes released");
        }
    }

    fn halt(&mut self, position: f64) {
        self.graph.stop_all();
        self.state = TransportState::Stopped;
        self.stopped_position = position;
        self.cursor.store(position);
        self.last_publish = None;
    }

    fn start_at(&mut self, from: f64) {
        let now = self.engine.current_time();
        self.position_at_play_start = from;
        self.engine_time_at_play_start = now;
        self.cursor.store(from);
        self.last_publish = None;
        self.scheduled_tracks.clear();

        let solo = any_solo(&self.tracks);
        let tracks = std::mem::take(&mut self.tracks);
        for track in &tracks {
            let audible = track.is_audible(solo);
            let bus = self.graph.ensure_bus(track.id);
            bus.input_gain.set_value_at_time(track.input_gain, now);
            bus.volume
                .set_value_at_time(if audible { track.volume } else { 0.0 }, now);
            bus.pan.set_value_at_time(track.pan, now);

            if audible {
                self.schedule_track_clips(track, from, now);
                self.scheduled_tracks.insert(track.id);
            } else {
                trace!(track_id = %track.id, "silent track not scheduled");
            }
        }
        self.tracks = tracks;
    }

    fn schedule_track_clips(&mut self, track: &Track, from: f64, now: f64) {
        for clip in &track.clips {
            if let Some(voice) = live_voice(track, clip, from, now) {
                self.graph.add_voice(voice);
            }
        }
    }
}

fn live_voice(track: &Track, clip: &Clip, from: f64, now: f64) -> Option<Voice> {
    let Some(buffer) = clip.buffer.get() else {
        debug!(clip_id = %clip.id, "clip has no buffer, skipped");
        return None;
    };
    if clip.end_seconds() <= from {
        debug!(clip_id = %clip.id, "clip precedes playhead, skipped");
        return None;
    }

    let start_time = now + (clip.position_seconds - from).max(0.0);
    let offset =
        clip.source_start_seconds + (from - clip.position_seconds).max(0.0) * clip.playback_rate;
    let mut voice = Voice::new(
        track.id,
        clip.id,
        buffer.clone(),
        start_time,
        offset,
        clip.source_end_seconds,
        clip.playback_rate,
    );
    voice.detune.set_value_at_time(track.detune_cents(), now);
    schedule_live_fades(&mut voice.gain, clip, from, now);
    Some(voice)
}

impl TimelineObserver for PlaybackScheduler {
    fn timeline_changed(&mut self, change: &TimelineChange, timeline: &Timeline) {
        self.duration_seconds = timeline.duration_seconds();
        match change {
            TimelineChange::Mix { .. } => self.sync_tracks(timeline.tracks()),
            TimelineChange::TrackRemoved { track_id } => {
                self.release_track(*track_id);
                self.tracks = timeline.tracks().to_vec();
            }
            TimelineChange::Structure | TimelineChange::Replaced | TimelineChange::Tempo => {
                self.tracks = timeline.tracks().to_vec();
                if self.is_playing() {
                    let position = self.position().clamp(0.0, self.duration_seconds);
                    self.graph.stop_all();
                    self.start_at(position);
                    debug!(position, "graph rescheduled after timeline change");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ManualAudioEngine;

    #[test]
    fn stop_when_stopped_is_noop() {
        let engine = Arc::new(ManualAudioEngine::default());
        let mut scheduler = PlaybackScheduler::new(engine, SchedulerSettings::default());
        assert!((scheduler.stop() - 0.0).abs() < f64::EPSILON);
        assert!((scheduler.stop() - 0.0).abs() < f64::EPSILON);
        assert_eq!(scheduler.state(), TransportState::Stopped);
    }

    #[test]
    fn poll_publishes_at_throttled_rate() {
        let engine = Arc::new(ManualAudioEngine::default());
        let mut scheduler = PlaybackScheduler::new(engine.clone(), SchedulerSettings::default());
        scheduler.play(&[], 0.0, 10.0);

        assert!(scheduler.poll().published.is_some());
        engine.advance(0.016);
        assert!(scheduler.poll().published.is_none());
        engine.advance(0.1);
        let tick = scheduler.poll();
        assert!(tick.published.is_some());
        assert!((tick.position - 0.116).abs() < 1e-9);
        assert!((scheduler.cursor().position() - 0.116).abs() < 1e-9);
    }
}
