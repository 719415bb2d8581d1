//! The active-project session: catalog, edit engine, live scheduler and the
//! project store, wired together through timeline subscriptions.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    assets::{AssetDecoder, AssetFetcher, DecodeError},
    audio::AudioEngine,
    config::StudioConfig,
    engine::{EditError, Engine},
    history::DEFAULT_HISTORY_LIMIT,
    mixdown::{
        MixdownError, MixdownOptions, RenderedMix, encode_wav, export_mix, export_range,
        mux_with_video, render_mix,
    },
    model::{
        Asset, AssetId, Clip, DEFAULT_BPM, DEFAULT_TIMELINE_SECONDS, Project, SampleBuffer,
    },
    persistence::{
        ProjectStore, RehydrationWarning, autosave_project, rehydrate_tracks, save_store,
    },
    scheduler::{PlaybackScheduler, SchedulerSettings, TransportTick},
    timeline::{SharedObserver, Timeline, TimelineChange, TimelineObserver},
};

#[derive(Debug, Error, PartialEq)]
pub enum StudioError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error(transparent)]
    Mixdown(#[from] MixdownError),
    #[error("asset not found in catalog: {0}")]
    AssetNotFound(AssetId),
    #[error("project not found: {0}")]
    ProjectNotFound(Uuid),
    #[error("cannot delete the only remaining project")]
    LastProject,
    #[error("clip insertion for asset {asset_id} was started in a previous project session")]
    StaleInsertion { asset_id: AssetId },
}

/// Session defaults taken from [`StudioConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct StudioOptions {
    pub default_project_name: String,
    pub default_bpm: f64,
    pub default_timeline_seconds: f64,
    pub history_limit: usize,
    pub scheduler: SchedulerSettings,
    pub mixdown: MixdownOptions,
    pub autosave_interval: Duration,
}

impl Default for StudioOptions {
    fn default() -> Self {
        Self {
            default_project_name: "Untitled Project".to_string(),
            default_bpm: DEFAULT_BPM,
            default_timeline_seconds: DEFAULT_TIMELINE_SECONDS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            scheduler: SchedulerSettings::default(),
            mixdown: MixdownOptions::default(),
            autosave_interval: Duration::from_secs(30),
        }
    }
}

impl From<&StudioConfig> for StudioOptions {
    fn from(config: &StudioConfig) -> Self {
        Self {
            default_project_name: config.project.default_name.clone(),
            default_bpm: config.project.default_bpm,
            default_timeline_seconds: config.project.default_timeline_seconds,
            history_limit: config.history.max_entries,
            scheduler: config.scheduler_settings(),
            mixdown: config.mixdown_options(),
            autosave_interval: Duration::from_secs(config.paths.autosave_interval_seconds),
        }
    }
}

/// A clip insertion waiting on its asset decode. Stamped with the session
/// generation it was started in.
#[derive(Debug, Clone)]
pub struct PendingClip {
    generation: u64,
    asset: Asset,
    position_seconds: f64,
    track_id: Option<Uuid>,
}

impl PendingClip {
    #[must_use]
    pub fn asset(&self) -> &Asset {
        &self.asset
    }

    /// Decode the asset. May run anywhere the decoder is shared.
    pub fn resolve(self, decoder: &AssetDecoder) -> Result<ResolvedClip, StudioError> {
        let buffer = decoder
            .decode(&self.asset)?
            .ok_or_else(|| EditError::VideoAsset(self.asset.id.clone()))?;
        Ok(ResolvedClip {
            pending: self,
            buffer,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedClip {
    pending: PendingClip,
    buffer: Arc<SampleBuffer>,
}

#[derive(Debug, Default)]
struct DirtyTracker {
    dirty: bool,
    last_change: Option<Instant>,
}

impl DirtyTracker {
    fn mark(&mut self, at: Instant) {
        self.dirty = true;
        self.last_change = Some(at);
    }

    fn clear(&mut self) {
        self.dirty = false;
        self.last_change = None;
    }

    fn due(&self, now: Instant, interval: Duration) -> bool {
        self.dirty
            && self
                .last_change
                .is_some_and(|changed| now.saturating_duration_since(changed) >= interval)
    }
}

impl TimelineObserver for DirtyTracker {
    fn timeline_changed(&mut self, _change: &TimelineChange, _timeline: &Timeline) {
        self.mark(Instant::now());
    }
}

pub struct Studio {
    decoder: Arc<AssetDecoder>,
    engine: Engine,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    dirty: Arc<Mutex<DirtyTracker>>,
    options: StudioOptions,
    assets: Vec<Asset>,
    video_reference: Option<String>,
    projects: Vec<Project>,
    active_project_id: Uuid,
    generation: u64,
}

impl fmt::Debug for Studio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Studio")
            .field("active_project_id", &self.active_project_id)
            .field("projects", &self.projects.len())
            .field("assets", &self.assets.len())
            .field("engine", &self.engine)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Studio {
    /// A session holding one fresh project with the default track layout.
    #[must_use]
    pub fn new(
        audio_engine: Arc<dyn AudioEngine>,
        fetcher: Arc<dyn AssetFetcher>,
        options: StudioOptions,
    ) -> Self {
        let mut project = Project::new(options.default_project_name.clone());
        project.bpm = options.default_bpm;
        project.duration_seconds = options.default_timeline_seconds;

        let timeline = Timeline::new(
            project.tracks.clone(),
            project.duration_seconds,
            project.bpm,
        );
        let mut engine = Engine::new(timeline, options.history_limit);
        let scheduler = Arc::new(Mutex::new(PlaybackScheduler::new(
            audio_engine,
            options.scheduler,
        )));
        let dirty = Arc::new(Mutex::new(DirtyTracker::default()));

        let scheduler_observer: SharedObserver = scheduler.clone();
        let dirty_observer: SharedObserver = dirty.clone();
        engine.subscribe(scheduler_observer);
        engine.subscribe(dirty_observer);
        scheduler.lock().set_duration(project.duration_seconds);

        Self {
            decoder: Arc::new(AssetDecoder::new(fetcher)),
            engine,
            scheduler,
            dirty,
            options,
            assets: Vec::new(),
            video_reference: None,
            active_project_id: project.id,
            projects: vec![project],
            generation: 0,
        }
    }

    /// Open a persisted store and rehydrate its active project.
    #[instrument(skip_all, fields(projects = store.projects.len()))]
    pub fn with_store(
        audio_engine: Arc<dyn AudioEngine>,
        fetcher: Arc<dyn AssetFetcher>,
        options: StudioOptions,
        store: ProjectStore,
    ) -> (Self, Vec<RehydrationWarning>) {
        let mut studio = Self::new(audio_engine, fetcher, options);
        let Some(first) = store.projects.first().map(|project| project.id) else {
            debug!("empty project store, starting fresh");
            return (studio, Vec::new());
        };
        let target = store
            .active()
            .map_or(first, |project| project.id);
        studio.projects = store.projects;
        let warnings = studio.activate(target);
        (studio, warnings)
    }

    #[must_use]
    pub fn decoder(&self) -> &Arc<AssetDecoder> {
        &self.decoder
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Edits go straight to the engine; observers keep playback and the
    /// dirty flag in step.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    #[must_use]
    pub fn scheduler(&self) -> Arc<Mutex<PlaybackScheduler>> {
        self.scheduler.clone()
    }

    #[must_use]
    pub fn options(&self) -> &StudioOptions {
        &self.options
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.lock().dirty
    }

    fn mark_dirty(&self) {
        self.dirty.lock().mark(Instant::now());
    }

    // Asset catalog

    #[must_use]
    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    #[must_use]
    pub fn asset(&self, asset_id: &str) -> Option<&Asset> {
        self.assets.iter().find(|asset| asset.id == asset_id)
    }

    #[must_use]
    pub fn video_reference(&self) -> Option<&str> {
        self.video_reference.as_deref()
    }

    /// Decode and catalog an incoming asset. Ids already in the catalog are
    /// returned as they are. The first audio asset of a project still at the
    /// default tempo sets the project tempo; a video sets the timeline length.
    #[instrument(skip(self, asset), fields(asset_id = %asset.id, kind = ?asset.kind))]
    pub fn add_asset(&mut self, asset: Asset) -> Result<Asset, StudioError> {
        if let Some(existing) = self.asset(&asset.id) {
            debug!("asset already cataloged");
            return Ok(existing.clone());
        }

        let asset = match self.decoder.ingest(asset) {
            Ok(asset) => asset,
            Err(error) => {
                warn!(%error, "asset ingestion failed");
                return Err(error.into());
            }
        };

        if asset.kind.is_audio() {
            let first_audio = !self.assets.iter().any(|existing| existing.kind.is_audio());
            if first_audio
                && (self.engine.bpm() - DEFAULT_BPM).abs() < f64::EPSILON
                && let Some(tempo) = asset.detected_tempo_bpm
                && (tempo - DEFAULT_BPM).abs() >= f64::EPSILON
            {
                self.engine.set_tempo(tempo)?;
                info!(tempo, "project tempo adopted from first audio asset");
            }
        } else {
            self.video_reference = Some(asset.source_locator.clone());
            if asset.duration_seconds > 0.0 {
                self.engine.set_duration(asset.duration_seconds);
                self.scheduler.lock().set_duration(asset.duration_seconds);
            }
        }

        self.assets.push(asset.clone());
        self.mark_dirty();
        info!(assets = self.assets.len(), "asset added to catalog");
        Ok(asset)
    }

    /// Drop an asset from the catalog. Clips already placed keep their buffers.
    #[instrument(skip(self))]
    pub fn remove_asset(&mut self, asset_id: &str) -> bool {
        let Some(index) = self.assets.iter().position(|asset| asset.id == asset_id) else {
            debug!("asset not in catalog");
            return false;
        };
        let removed = self.assets.remove(index);
        if self.video_reference.as_deref() == Some(removed.source_locator.as_str()) {
            self.video_reference = None;
        }
        self.mark_dirty();
        info!("asset removed from catalog");
        true
    }

    #[instrument(skip(self))]
    pub fn clear_assets(&mut self) {
        self.assets.clear();
        self.video_reference = None;
        self.mark_dirty();
        info!("asset catalog cleared");
    }

    // Clip insertion

    /// First half of an asynchronous insertion. Resolve the returned value
    /// (decode) and hand it to [`Studio::complete_add_clip`].
    pub fn begin_add_clip(
        &self,
        asset_id: &str,
        position_seconds: f64,
        track_id: Option<Uuid>,
    ) -> Result<PendingClip, StudioError> {
        let asset = self
            .asset(asset_id)
            .cloned()
            .ok_or_else(|| StudioError::AssetNotFound(asset_id.to_string()))?;
        Ok(PendingClip {
            generation: self.generation,
            asset,
            position_seconds,
            track_id,
        })
    }

    /// Insert a decoded clip, unless the project was switched since the
    /// insertion began. The target track is re-validated by the engine.
    #[instrument(skip(self, resolved), fields(asset_id = %resolved.pending.asset.id))]
    pub fn complete_add_clip(&mut self, resolved: ResolvedClip) -> Result<Clip, StudioError> {
        let ResolvedClip { pending, buffer } = resolved;
        if pending.generation != self.generation {
            warn!(
                started = pending.generation,
                current = self.generation,
                "discarding clip insertion from a previous project session"
            );
            return Err(StudioError::StaleInsertion {
                asset_id: pending.asset.id,
            });
        }
        Ok(self.engine.add_clip(
            &pending.asset,
            buffer,
            pending.position_seconds,
            pending.track_id,
        )?)
    }

    pub fn add_clip(
        &mut self,
        asset_id: &str,
        position_seconds: f64,
        track_id: Option<Uuid>,
    ) -> Result<Clip, StudioError> {
        let resolved = self
            .begin_add_clip(asset_id, position_seconds, track_id)?
            .resolve(&self.decoder)?;
        self.complete_add_clip(resolved)
    }

    // Tempo

    pub fn set_bpm(&mut self, bpm: f64) -> Result<(), StudioError> {
        Ok(self.engine.set_tempo(bpm)?)
    }

    pub fn reset_tempo_to_track(&mut self, track_id: Option<Uuid>) -> Result<Option<f64>, StudioError> {
        Ok(self.engine.reset_tempo_to_track(track_id)?)
    }

    // Transport

    /// Start playback from the current playhead.
    pub fn play(&mut self) {
        let timeline = self.engine.timeline();
        let mut scheduler = self.scheduler.lock();
        let from = scheduler.position();
        scheduler.play(timeline.tracks(), from, timeline.duration_seconds());
    }

    pub fn stop(&mut self) -> f64 {
        self.scheduler.lock().stop()
    }

    pub fn seek(&mut self, to: f64) {
        self.scheduler.lock().seek(to);
    }

    pub fn poll(&mut self) -> TransportTick {
        self.scheduler.lock().poll()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.scheduler.lock().is_playing()
    }

    #[must_use]
    pub fn position(&self) -> f64 {
        self.scheduler.lock().position()
    }

    // Export

    #[must_use]
    pub fn render_mix(&self) -> RenderedMix {
        let timeline = self.engine.timeline();
        render_mix(
            timeline.tracks(),
            timeline.duration_seconds(),
            &self.options.mixdown,
        )
    }

    pub fn export_mix(&self, path: &Path) -> Result<RenderedMix> {
        let timeline = self.engine.timeline();
        export_mix(
            timeline.tracks(),
            timeline.duration_seconds(),
            path,
            &self.options.mixdown,
        )
    }

    pub fn export_range(&self, start: f64, end: f64, path: &Path) -> Result<RenderedMix> {
        export_range(self.engine.tracks(), start, end, path, &self.options.mixdown)
    }

    /// Render the mix and combine it with the project's video reference.
    pub fn export_video(&self, output_path: &Path, ffmpeg_binary: Option<&Path>) -> Result<()> {
        let video = self
            .video_reference
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("project has no video reference"))?;
        let video_path = Path::new(video.strip_prefix("file://").unwrap_or(video));
        let wav_bytes = encode_wav(&self.render_mix())?;
        mux_with_video(&wav_bytes, video_path, output_path, ffmpeg_binary)
    }

    // Projects

    #[must_use]
    pub fn active_project_id(&self) -> Uuid {
        self.active_project_id
    }

    /// Stored projects. The active entry's content is current as of the last
    /// save or switch; [`Studio::to_project`] gives its live state.
    #[must_use]
    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Snapshot of the active project's live state.
    #[must_use]
    pub fn to_project(&self) -> Project {
        let mut project = self
            .projects
            .iter()
            .find(|project| project.id == self.active_project_id)
            .cloned()
            .unwrap_or_else(|| Project::new(self.options.default_project_name.clone()));
        let timeline = self.engine.timeline();
        project.tracks = timeline.tracks().to_vec();
        project.assets = self.assets.clone();
        project.video_reference = self.video_reference.clone();
        project.duration_seconds = timeline.duration_seconds();
        project.bpm = timeline.bpm();
        project.selected_track_id = timeline.selected_track_id();
        project.touch();
        project
    }

    #[must_use]
    pub fn project_store(&self) -> ProjectStore {
        let active = self.to_project();
        let projects = self
            .projects
            .iter()
            .map(|project| {
                if project.id == active.id {
                    active.clone()
                } else {
                    project.clone()
                }
            })
            .collect();
        ProjectStore {
            projects,
            active_project_id: Some(self.active_project_id),
            ..ProjectStore::default()
        }
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.sync_active();
        save_store(path, &self.project_store())?;
        self.dirty.lock().clear();
        Ok(())
    }

    /// Write an autosave when changes have been idle for the autosave interval.
    pub fn autosave_if_due(&mut self, autosave_dir: &Path, now: Instant) -> Result<Option<PathBuf>> {
        if !self.dirty.lock().due(now, self.options.autosave_interval) {
            return Ok(None);
        }
        let path = autosave_project(&self.to_project(), autosave_dir)?;
        self.dirty.lock().clear();
        Ok(Some(path))
    }

    #[instrument(skip(self, name))]
    pub fn create_project(&mut self, name: impl Into<String>) -> Uuid {
        let mut project = Project::new(name);
        project.bpm = self.options.default_bpm;
        project.duration_seconds = self.options.default_timeline_seconds;
        let project_id = project.id;
        self.sync_active();
        self.projects.push(project);
        self.activate(project_id);
        self.mark_dirty();
        info!(%project_id, "project created");
        project_id
    }

    /// Make another project active. The live graph is torn down, in-flight
    /// clip insertions are invalidated and the target is rehydrated.
    #[instrument(skip(self))]
    pub fn switch_project(
        &mut self,
        project_id: Uuid,
    ) -> Result<Vec<RehydrationWarning>, StudioError> {
        if !self.projects.iter().any(|project| project.id == project_id) {
            return Err(StudioError::ProjectNotFound(project_id));
        }
        if project_id == self.active_project_id {
            debug!("project already active");
            return Ok(Vec::new());
        }
        self.sync_active();
        Ok(self.activate(project_id))
    }

    #[instrument(skip(self))]
    pub fn delete_project(&mut self, project_id: Uuid) -> Result<(), StudioError> {
        let index = self
            .projects
            .iter()
            .position(|project| project.id == project_id)
            .ok_or(StudioError::ProjectNotFound(project_id))?;
        if self.projects.len() <= 1 {
            return Err(StudioError::LastProject);
        }
        self.projects.remove(index);
        if project_id == self.active_project_id {
            let next = self.projects[index.min(self.projects.len() - 1)].id;
            self.activate(next);
        }
        self.mark_dirty();
        info!("project deleted");
        Ok(())
    }

    #[instrument(skip(self, name))]
    pub fn rename_project(
        &mut self,
        project_id: Uuid,
        name: impl Into<String>,
    ) -> Result<(), StudioError> {
        let project = self
            .projects
            .iter_mut()
            .find(|project| project.id == project_id)
            .ok_or(StudioError::ProjectNotFound(project_id))?;
        project.name = name.into();
        project.touch();
        self.mark_dirty();
        info!("project renamed");
        Ok(())
    }

    /// Copy a project under a new id as `"<name> (Copy)"`. The copy is not
    /// activated.
    #[instrument(skip(self))]
    pub fn duplicate_project(&mut self, project_id: Uuid) -> Result<Uuid, StudioError> {
        self.sync_active();
        let source = self
            .projects
            .iter()
            .find(|project| project.id == project_id)
            .ok_or(StudioError::ProjectNotFound(project_id))?;
        let mut copy = source.clone();
        copy.id = Uuid::new_v4();
        copy.name = format!("{} (Copy)", source.name);
        copy.touch();
        let copy_id = copy.id;
        self.projects.push(copy);
        self.mark_dirty();
        info!(%copy_id, "project duplicated");
        Ok(copy_id)
    }

    fn sync_active(&mut self) {
        let active = self.to_project();
        if let Some(slot) = self
            .projects
            .iter_mut()
            .find(|project| project.id == active.id)
        {
            *slot = active;
        }
    }

    fn activate(&mut self, project_id: Uuid) -> Vec<RehydrationWarning> {
        let Some(project) = self
            .projects
            .iter()
            .find(|project| project.id == project_id)
            .cloned()
        else {
            return Vec::new();
        };

        self.generation += 1;
        self.scheduler.lock().teardown();

        let (tracks, warnings) = rehydrate_tracks(&project, &self.decoder);
        self.assets = project.assets.clone();
        self.video_reference = project.video_reference.clone();
        self.engine
            .load(tracks, project.duration_seconds, project.bpm);
        self.engine.select_track(project.selected_track_id);
        self.scheduler.lock().set_duration(project.duration_seconds);
        self.active_project_id = project.id;
        self.dirty.lock().clear();

        info!(
            project_id = %project.id,
            generation = self.generation,
            dropped_clips = warnings.len(),
            "project activated"
        );
        warnings
    }
}
