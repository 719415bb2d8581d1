use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_BPM: f64 = 120.0;
pub const DEFAULT_TIMELINE_SECONDS: f64 = 120.0;
pub const OUTPUT_SAMPLE_RATE: u32 = 44_100;
pub const OUTPUT_CHANNELS: u16 = 2;
/// Shortest timeline length a clip may be trimmed or split down to.
pub const MIN_CLIP_SECONDS: f64 = 0.05;
pub const DEFAULT_TRACK_VOLUME: f32 = 1.0;
pub const DEFAULT_TRACK_INPUT_GAIN: f32 = 1.0;
pub const DEFAULT_TRACK_PAN: f32 = 0.0;
pub const MIN_PLAYBACK_RATE: f64 = 0.01;

pub const TRACK_COLORS: [&str; 16] = [
    "#e70a0a", "#f07212", "#be640f", "#ee09e6", "#ddc133", "#753ed3", "#49e9f5", "#00f3f3",
    "#7c4a5c", "#5c7c4a", "#4a5c7c", "#ff4d4d", "#6b4a7c", "#4a7c6b", "#db0694", "#ddec54",
];

pub type AssetId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Music,
    Sfx,
    Voice,
    Video,
}

impl AssetKind {
    #[must_use]
    pub const fn is_audio(self) -> bool {
        !matches!(self, Self::Video)
    }

    /// Track lane an asset of this kind lands on when no track is named.
    #[must_use]
    pub const fn track_kind(self) -> Option<TrackKind> {
        match self {
            Self::Music => Some(TrackKind::Music),
            Self::Sfx => Some(TrackKind::Sfx),
            Self::Voice => Some(TrackKind::Voice),
            Self::Video => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetSource {
    Generated,
    Uploaded,
    Recorded,
    History,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub id: AssetId,
    pub name: String,
    pub source_locator: String,
    pub kind: AssetKind,
    pub source: AssetSource,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_tempo_bpm: Option<f64>,
}

impl Asset {
    #[must_use]
    pub fn new(
        id: impl Into<AssetId>,
        name: impl Into<String>,
        source_locator: impl Into<String>,
        kind: AssetKind,
        source: AssetSource,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source_locator: source_locator.into(),
            kind,
            source,
            duration_seconds: 0.0,
            detected_tempo_bpm: None,
        }
    }
}

/// Decoded planar audio. Shared between clips and never copied once decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl SampleBuffer {
    #[must_use]
    pub fn new(sample_rate: u32, mut channels: Vec<Vec<f32>>) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for channel in &mut channels {
            channel.truncate(frames);
        }
        Self {
            sample_rate: sample_rate.max(1),
            channels,
        }
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    #[must_use]
    pub fn channel(&self, index: usize) -> &[f32] {
        self.channels.get(index).map_or(&[], Vec::as_slice)
    }

    /// Average of all channels, frame by frame.
    #[must_use]
    pub fn mono(&self) -> Vec<f32> {
        let count = self.channels.len().max(1) as f32;
        (0..self.frames())
            .map(|frame| {
                self.channels
                    .iter()
                    .map(|channel| channel[frame])
                    .sum::<f32>()
                    / count
            })
            .collect()
    }

    /// Linearly interpolated read at a fractional source position in seconds.
    /// Mono sources are returned on both sides.
    #[must_use]
    pub fn stereo_at(&self, seconds: f64) -> (f32, f32) {
        let position = seconds * f64::from(self.sample_rate);
        if position < 0.0 {
            return (0.0, 0.0);
        }
        let index = position.floor() as usize;
        let frac = (position - position.floor()) as f32;
        let read = |channel: &[f32]| -> f32 {
            let Some(&current) = channel.get(index) else {
                return 0.0;
            };
            let next = channel.get(index + 1).copied().unwrap_or(0.0);
            current + (next - current) * frac
        };

        match self.channels.as_slice() {
            [] => (0.0, 0.0),
            [mono] => {
                let value = read(mono.as_slice());
                (value, value)
            }
            [left, right, ..] => (read(left.as_slice()), read(right.as_slice())),
        }
    }
}

/// Reference-counted handle to a clip's decoded audio. Compares by sample
/// content so that rehydrated projects equal their originals.
#[derive(Clone, Default)]
pub struct SharedBuffer(Option<Arc<SampleBuffer>>);

impl SharedBuffer {
    #[must_use]
    pub fn get(&self) -> Option<&Arc<SampleBuffer>> {
        self.0.as_ref()
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.0.is_some()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(left), Some(right)) => Arc::ptr_eq(left, right),
            (None, None) => true,
            _ => false,
        }
    }
}

impl From<Arc<SampleBuffer>> for SharedBuffer {
    fn from(value: Arc<SampleBuffer>) -> Self {
        Self(Some(value))
    }
}

impl PartialEq for SharedBuffer {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(left), Some(right)) => Arc::ptr_eq(left, right) || left == right,
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(buffer) => write!(
                f,
                "SharedBuffer({} frames @ {} Hz x{})",
                buffer.frames(),
                buffer.sample_rate(),
                buffer.channel_count()
            ),
            None => f.write_str("SharedBuffer(unloaded)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clip {
    pub id: Uuid,
    pub asset_id: AssetId,
    #[serde(skip)]
    pub buffer: SharedBuffer,
    pub source_start_seconds: f64,
    pub source_end_seconds: f64,
    pub position_seconds: f64,
    #[serde(default)]
    pub fade_in_seconds: f64,
    #[serde(default)]
    pub fade_out_seconds: f64,
    #[serde(default = "default_playback_rate")]
    pub playback_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tempo_bpm: Option<f64>,
}

impl Clip {
    /// Clip spanning the whole buffer, placed at `position_seconds`.
    #[must_use]
    pub fn from_buffer(
        asset_id: impl Into<AssetId>,
        buffer: Arc<SampleBuffer>,
        position_seconds: f64,
    ) -> Self {
        let source_end_seconds = buffer.duration_seconds();
        Self {
            id: Uuid::new_v4(),
            asset_id: asset_id.into(),
            buffer: buffer.into(),
            source_start_seconds: 0.0,
            source_end_seconds,
            position_seconds: position_seconds.max(0.0),
            fade_in_seconds: 0.0,
            fade_out_seconds: 0.0,
            playback_rate: 1.0,
            source_tempo_bpm: None,
        }
    }

    #[must_use]
    pub fn content_seconds(&self) -> f64 {
        (self.source_end_seconds - self.source_start_seconds).max(0.0)
    }

    /// Length the clip occupies on the timeline once its playback rate is applied.
    #[must_use]
    pub fn effective_duration(&self) -> f64 {
        self.content_seconds() / self.playback_rate.max(MIN_PLAYBACK_RATE)
    }

    #[must_use]
    pub fn end_seconds(&self) -> f64 {
        self.position_seconds + self.effective_duration()
    }

    /// Minimum source window, in buffer seconds, for the current rate.
    #[must_use]
    pub fn min_content_seconds(&self) -> f64 {
        MIN_CLIP_SECONDS * self.playback_rate.max(MIN_PLAYBACK_RATE)
    }

    #[must_use]
    pub fn source_duration(&self) -> Option<f64> {
        self.buffer.get().map(|buffer| buffer.duration_seconds())
    }

    /// Clamp every field back inside the clip invariants. `moved_start`
    /// tells which edge yields when the window is shorter than the minimum.
    pub fn normalize(&mut self, moved_start: bool) {
        if !self.playback_rate.is_finite() {
            self.playback_rate = 1.0;
        }
        self.playback_rate = self.playback_rate.max(MIN_PLAYBACK_RATE);

        let source_limit = self
            .source_duration()
            .unwrap_or(self.source_end_seconds.max(0.0));
        let min_content = self.min_content_seconds().min(source_limit);

        self.source_start_seconds = self.source_start_seconds.clamp(0.0, source_limit);
        self.source_end_seconds = self.source_end_seconds.clamp(0.0, source_limit);

        if self.source_end_seconds - self.source_start_seconds < min_content {
            if moved_start {
                self.source_start_seconds = (self.source_end_seconds - min_content).max(0.0);
                self.source_end_seconds = self.source_start_seconds + min_content;
            } else {
                self.source_end_seconds = (self.source_start_seconds + min_content).min(source_limit);
                self.source_start_seconds = self.source_end_seconds - min_content;
            }
        }

        self.position_seconds = self.position_seconds.max(0.0);
        self.clamp_fades();
    }

    pub fn clamp_fades(&mut self) {
        let duration = self.effective_duration();
        self.fade_in_seconds = self.fade_in_seconds.clamp(0.0, duration);
        self.fade_out_seconds = self
            .fade_out_seconds
            .clamp(0.0, (duration - self.fade_in_seconds).max(0.0));
    }

    /// Re-derive the playback rate from a project tempo. Clips without a
    /// detected source tempo keep their rate.
    pub fn lock_to_tempo(&mut self, project_bpm: f64) {
        if let Some(source_bpm) = self.source_tempo_bpm.filter(|bpm| *bpm > 0.0) {
            self.playback_rate = (project_bpm / source_bpm).max(MIN_PLAYBACK_RATE);
            self.clamp_fades();
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Music,
    Sfx,
    Voice,
}

impl TrackKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Music => "Music",
            Self::Sfx => "SFX",
            Self::Voice => "Voice",
        }
    }

    #[must_use]
    pub fn accepts(self, asset: AssetKind) -> bool {
        asset.track_kind() == Some(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub id: Uuid,
    pub name: String,
    pub kind: TrackKind,
    #[serde(default)]
    pub color: String,
    #[serde(default = "default_track_volume")]
    pub volume: f32,
    #[serde(default = "default_track_input_gain")]
    pub input_gain: f32,
    #[serde(default)]
    pub pan: f32,
    #[serde(default)]
    pub transpose_semitones: i32,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub solo: bool,
    pub clips: Vec<Clip>,
}

impl Track {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: TrackKind, color: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            color: color.into(),
            volume: DEFAULT_TRACK_VOLUME,
            input_gain: DEFAULT_TRACK_INPUT_GAIN,
            pan: DEFAULT_TRACK_PAN,
            transpose_semitones: 0,
            muted: false,
            solo: false,
            clips: Vec::new(),
        }
    }

    #[must_use]
    pub fn clip(&self, clip_id: Uuid) -> Option<&Clip> {
        self.clips.iter().find(|clip| clip.id == clip_id)
    }

    pub fn clip_mut(&mut self, clip_id: Uuid) -> Option<&mut Clip> {
        self.clips.iter_mut().find(|clip| clip.id == clip_id)
    }

    /// Muted always excludes, regardless of solo.
    #[must_use]
    pub fn is_audible(&self, any_solo: bool) -> bool {
        !self.muted && (!any_solo || self.solo)
    }

    #[must_use]
    pub fn detune_cents(&self) -> f32 {
        self.transpose_semitones as f32 * 100.0
    }

    #[must_use]
    pub fn end_seconds(&self) -> f64 {
        self.clips
            .iter()
            .map(Clip::end_seconds)
            .fold(0.0, f64::max)
    }
}

#[must_use]
pub fn any_solo(tracks: &[Track]) -> bool {
    tracks.iter().any(|track| track.solo)
}

#[must_use]
pub fn track_color(index: usize) -> &'static str {
    TRACK_COLORS[index % TRACK_COLORS.len()]
}

#[must_use]
pub fn default_tracks() -> Vec<Track> {
    [TrackKind::Music, TrackKind::Sfx, TrackKind::Voice]
        .into_iter()
        .enumerate()
        .map(|(index, kind)| Track::new(kind.label(), kind, track_color(index)))
        .collect()
}

/// Persisted project record. Clips are stored without their buffers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub video_reference: Option<String>,
    #[serde(rename = "duration")]
    pub duration_seconds: f64,
    pub bpm: f64,
    #[serde(default)]
    pub selected_track_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            tracks: default_tracks(),
            assets: Vec::new(),
            video_reference: None,
            duration_seconds: DEFAULT_TIMELINE_SECONDS,
            bpm: DEFAULT_BPM,
            selected_track_id: None,
            updated_at: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    #[must_use]
    pub fn clip_count(&self) -> usize {
        self.tracks.iter().map(|track| track.clips.len()).sum()
    }

    #[must_use]
    pub fn asset(&self, asset_id: &str) -> Option<&Asset> {
        self.assets.iter().find(|asset| asset.id == asset_id)
    }
}

const fn default_playback_rate() -> f64 {
    1.0
}

const fn default_track_volume() -> f32 {
    DEFAULT_TRACK_VOLUME
}

const fn default_track_input_gain() -> f32 {
    DEFAULT_TRACK_INPUT_GAIN
}
