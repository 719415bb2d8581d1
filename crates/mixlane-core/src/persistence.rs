use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    assets::AssetDecoder,
    model::{AssetId, Project, Track},
};

pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Every project plus the active-project pointer, persisted as one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectStore {
    #[serde(default = "store_schema_version")]
    pub schema_version: u32,
    pub projects: Vec<Project>,
    pub active_project_id: Option<Uuid>,
}

impl Default for ProjectStore {
    fn default() -> Self {
        Self {
            schema_version: STORE_SCHEMA_VERSION,
            projects: Vec::new(),
            active_project_id: None,
        }
    }
}

impl ProjectStore {
    #[must_use]
    pub fn project(&self, project_id: Uuid) -> Option<&Project> {
        self.projects.iter().find(|project| project.id == project_id)
    }

    #[must_use]
    pub fn active(&self) -> Option<&Project> {
        self.active_project_id
            .and_then(|project_id| self.project(project_id))
    }
}

const fn store_schema_version() -> u32 {
    STORE_SCHEMA_VERSION
}

/// A persisted clip that could not be restored on load. The clip is
/// dropped; the rest of the project loads normally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RehydrationWarning {
    pub project_id: Uuid,
    pub track_id: Uuid,
    pub clip_id: Uuid,
    pub asset_id: AssetId,
    pub reason: String,
}

/// Write bytes to a sibling temp file, then rename it over `path`.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create directory: {}", parent.display()))?;

    let mut temp_file =
        tempfile::NamedTempFile::new_in(parent).context("failed to create temp file")?;
    temp_file
        .write_all(bytes)
        .context("failed to write temp file")?;
    temp_file
        .persist(path)
        .map_err(|error| anyhow::anyhow!(error.error))
        .with_context(|| format!("failed to persist file: {}", path.display()))?;
    Ok(())
}

#[instrument(skip(project), fields(project_id = %project.id, path = %path.display()))]
pub fn save_project(path: &Path, project: &Project) -> Result<()> {
    let json = serde_json::to_vec_pretty(project).context("failed to serialize project")?;
    write_atomically(path, &json)?;
    info!("project saved");
    Ok(())
}

#[instrument(fields(path = %path.display()))]
pub fn load_project(path: &Path) -> Result<Project> {
    let content =
        fs::read(path).with_context(|| format!("failed to read project: {}", path.display()))?;
    let project: Project = serde_json::from_slice(&content).context("invalid project json")?;
    info!(project_id = %project.id, "project loaded");
    Ok(project)
}

#[instrument(skip(project), fields(project_id = %project.id, autosave_dir = %autosave_dir.display()))]
pub fn autosave_project(project: &Project, autosave_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(autosave_dir).with_context(|| {
        format!(
            "failed to create autosave directory: {}",
            autosave_dir.display()
        )
    })?;

    let file_name = format!("{}.autosave.mixlane.json", project.id);
    let autosave_path = autosave_dir.join(file_name);
    save_project(&autosave_path, project)?;

    debug!(path = %autosave_path.display(), "autosave complete");
    Ok(autosave_path)
}

#[instrument(skip(store), fields(projects = store.projects.len(), path = %path.display()))]
pub fn save_store(path: &Path, store: &ProjectStore) -> Result<()> {
    let json = serde_json::to_vec_pretty(store).context("failed to serialize project store")?;
    write_atomically(path, &json)?;
    info!("project store saved");
    Ok(())
}

#[instrument(fields(path = %path.display()))]
pub fn load_store(path: &Path) -> Result<ProjectStore> {
    let content = fs::read(path)
        .with_context(|| format!("failed to read project store: {}", path.display()))?;
    let mut store: ProjectStore =
        serde_json::from_slice(&content).context("invalid project store json")?;
    if store.active().is_none() {
        store.active_project_id = store.projects.first().map(|project| project.id);
    }
    info!(projects = store.projects.len(), "project store loaded");
    Ok(store)
}

/// Re-derive every clip's buffer from the project's asset catalog. Clips
/// whose asset is missing or fails to decode are dropped with a warning.
#[instrument(skip(project, decoder), fields(project_id = %project.id, clips = project.clip_count()))]
pub fn rehydrate_tracks(
    project: &Project,
    decoder: &AssetDecoder,
) -> (Vec<Track>, Vec<RehydrationWarning>) {
    let mut warnings = Vec::new();
    let mut tracks = project.tracks.clone();

    for track in &mut tracks {
        let track_id = track.id;
        track.clips.retain_mut(|clip| {
            let failure = match project.asset(&clip.asset_id) {
                None => Some("asset missing from catalog".to_string()),
                Some(asset) => match decoder.decode(asset) {
                    Ok(Some(buffer)) => {
                        clip.buffer = buffer.into();
                        None
                    }
                    Ok(None) => Some("asset has no audio".to_string()),
                    Err(error) => Some(error.to_string()),
                },
            };
            let Some(reason) = failure else {
                return true;
            };
            warn!(
                track_id = %track_id,
                clip_id = %clip.id,
                asset_id = %clip.asset_id,
                %reason,
                "clip dropped during rehydration"
            );
            warnings.push(RehydrationWarning {
                project_id: project.id,
                track_id,
                clip_id: clip.id,
                asset_id: clip.asset_id.clone(),
                reason,
            });
            false
        });
    }

    info!(dropped = warnings.len(), "tracks rehydrated");
    (tracks, warnings)
}
