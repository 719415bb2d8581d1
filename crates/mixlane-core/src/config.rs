use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    history::DEFAULT_HISTORY_LIMIT,
    mixdown::{MixdownOptions, RANGE_GUARD_FADE_SECONDS, RENDER_BLOCK_FRAMES},
    model::{DEFAULT_BPM, DEFAULT_TIMELINE_SECONDS, OUTPUT_SAMPLE_RATE},
    scheduler::{DEFAULT_PUBLISH_RATE_HZ, DEFAULT_SMOOTHING_SECONDS, SchedulerSettings},
};

pub const CONFIG_FILE_NAME: &str = "mixlane.config.toml";
pub const CONFIG_PATH_ENV: &str = "MIXLANE_CONFIG_PATH";
pub const DEFAULT_LOG_FILTER: &str = "info,mixlane_core=trace";
pub const DEFAULT_LOG_FILE_PREFIX: &str = "mixlane";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub project: ProjectConfig,
    pub audio: AudioConfig,
    pub transport: TransportConfig,
    pub history: HistoryConfig,
    pub diagnostics: DiagnosticsConfig,
    pub paths: PathsConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub default_name: String,
    pub default_bpm: f64,
    pub default_timeline_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Relative asset locators resolve against this directory.
    pub asset_root: PathBuf,
    pub output_sample_rate: u32,
    pub smoothing_seconds: f64,
    pub render_block_frames: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub publish_rate_hz: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub logs_dir: PathBuf,
    pub store_path: PathBuf,
    pub autosave_dir: PathBuf,
    pub export_dir: PathBuf,
    pub autosave_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub ffmpeg_binary: String,
    pub range_guard_fade_seconds: f64,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            default_name: "Untitled Project".to_string(),
            default_bpm: DEFAULT_BPM,
            default_timeline_seconds: DEFAULT_TIMELINE_SECONDS,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from("data/assets"),
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            smoothing_seconds: DEFAULT_SMOOTHING_SECONDS,
            render_block_frames: RENDER_BLOCK_FRAMES,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            publish_rate_hz: DEFAULT_PUBLISH_RATE_HZ,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: DEFAULT_LOG_FILTER.to_string(),
            trace_file_prefix: DEFAULT_LOG_FILE_PREFIX.to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            store_path: PathBuf::from("data/projects.mixlane.json"),
            autosave_dir: PathBuf::from("data/autosave"),
            export_dir: PathBuf::from("data/exports"),
            autosave_interval_seconds: 30,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            ffmpeg_binary: "ffmpeg".to_string(),
            range_guard_fade_seconds: RANGE_GUARD_FADE_SECONDS,
        }
    }
}

impl StudioConfig {
    pub fn load() -> Result<Self> {
        let config_path = discover_config_path().with_context(|| {
            format!("failed to locate {CONFIG_FILE_NAME}; looked in cwd and parent directory")
        })?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: StudioConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config TOML from {}", path.display()))?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Discovered config, or defaults when none is found or it fails to parse.
    #[must_use]
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(error) => {
                warn!(error = %format!("{error:#}"), "using default config");
                Self::default()
            }
        }
    }

    #[must_use]
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            smoothing_seconds: self.audio.smoothing_seconds,
            publish_rate_hz: self.transport.publish_rate_hz,
        }
    }

    #[must_use]
    pub fn mixdown_options(&self) -> MixdownOptions {
        MixdownOptions {
            sample_rate: self.audio.output_sample_rate,
            guard_fade_seconds: self.export.range_guard_fade_seconds,
            block_frames: self.audio.render_block_frames,
        }
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];

    candidates
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| anyhow::anyhow!("{CONFIG_FILE_NAME} not found"))
}
