use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use mixlane_core::{
    AssetDecoder, AssetKind, FileFetcher, Studio, StudioConfig, StudioOptions, SystemAudioEngine,
    asset_from_entry, decode_audio_bytes, detect_tempo,
    diagnostics::init_tracing,
    fixtures::{demo_fetcher, demo_project, demo_tracks},
    generate_parity_report,
    mixdown::export_mix,
    parity::write_parity_report,
    persistence::{load_store, save_project},
    scan_audio_assets,
};

#[derive(Debug, Parser)]
#[command(name = "mixlane-cli")]
#[command(about = "Headless tools for Mixlane project, mixdown and parity workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Overrides the configured log directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render the built-in demo project to WAVE.
    DemoExport {
        #[arg(long, default_value = "data/exports")]
        output_dir: PathBuf,
    },
    /// Render the active project of a store, in full or over a range.
    Mixdown {
        #[arg(long)]
        store: Option<PathBuf>,

        #[arg(long)]
        output: PathBuf,

        #[arg(long, requires = "end")]
        start: Option<f64>,

        #[arg(long, requires = "start")]
        end: Option<f64>,

        /// Also combine the mix with the project's video reference.
        #[arg(long)]
        video_output: Option<PathBuf>,
    },
    /// Scan a directory and add its audio files to the active project's catalog.
    Import {
        #[arg(long)]
        directory: PathBuf,

        #[arg(long)]
        store: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "music")]
        kind: KindArg,
    },
    /// Print the detected tempo of an audio file.
    DetectTempo {
        file: PathBuf,
    },
    /// Compare live playback against the offline mixdown for the demo project.
    Parity {
        #[arg(long, default_value = "data/parity/report.json")]
        output: PathBuf,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum KindArg {
    Music,
    Sfx,
    Voice,
}

impl From<KindArg> for AssetKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Music => Self::Music,
            KindArg::Sfx => Self::Sfx,
            KindArg::Voice => Self::Voice,
        }
    }
}

fn open_studio(config: &StudioConfig, store: Option<PathBuf>) -> anyhow::Result<(Studio, PathBuf)> {
    let store_path = store.unwrap_or_else(|| config.paths.store_path.clone());
    let audio_engine = Arc::new(SystemAudioEngine::new(config.audio.output_sample_rate));
    let fetcher = Arc::new(FileFetcher::new(config.audio.asset_root.clone()));
    let options = StudioOptions::from(config);

    let studio = if store_path.is_file() {
        let store = load_store(&store_path)?;
        let (studio, warnings) = Studio::with_store(audio_engine, fetcher, options, store);
        for warning in &warnings {
            tracing::warn!(
                clip_id = %warning.clip_id,
                asset_id = %warning.asset_id,
                reason = %warning.reason,
                "clip dropped on load"
            );
        }
        studio
    } else {
        tracing::info!(path = %store_path.display(), "no project store found, starting fresh");
        Studio::new(audio_engine, fetcher, options)
    };
    Ok((studio, store_path))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = StudioConfig::load_or_default();
    let log_dir = cli
        .log_dir
        .clone()
        .unwrap_or_else(|| config.paths.logs_dir.clone());
    let _telemetry = init_tracing(&log_dir, &config.diagnostics)?;

    match cli.command {
        Commands::DemoExport { output_dir } => {
            std::fs::create_dir_all(&output_dir)?;
            let project = demo_project();
            save_project(&output_dir.join("demo.mixlane.json"), &project)?;
            let decoder = AssetDecoder::new(demo_fetcher());
            let tracks = demo_tracks(&decoder);
            let rendered = export_mix(
                &tracks,
                project.duration_seconds,
                &output_dir.join("demo.wav"),
                &config.mixdown_options(),
            )?;
            tracing::info!(frames = rendered.frames(), peak = rendered.peak(), "demo exported");
        }
        Commands::Mixdown {
            store,
            output,
            start,
            end,
            video_output,
        } => {
            let (studio, _) = open_studio(&config, store)?;
            let rendered = match (start, end) {
                (Some(start), Some(end)) => studio.export_range(start, end, &output)?,
                _ => studio.export_mix(&output)?,
            };
            tracing::info!(
                path = %output.display(),
                seconds = rendered.duration_seconds(),
                "mixdown written"
            );
            if let Some(video_output) = video_output {
                let ffmpeg = PathBuf::from(&config.export.ffmpeg_binary);
                studio.export_video(&video_output, Some(&ffmpeg))?;
            }
        }
        Commands::Import {
            directory,
            store,
            kind,
        } => {
            let (mut studio, store_path) = open_studio(&config, store)?;
            let kind = AssetKind::from(kind);
            let directory = std::path::absolute(&directory).with_context(|| {
                format!("failed to resolve import directory {}", directory.display())
            })?;
            let mut imported = 0_usize;
            for entry in scan_audio_assets(&directory)? {
                let asset = asset_from_entry(&entry, kind)?;
                match studio.add_asset(asset) {
                    Ok(asset) => {
                        imported += 1;
                        tracing::info!(
                            asset_id = %asset.id,
                            tempo_bpm = asset.detected_tempo_bpm,
                            "imported"
                        );
                    }
                    Err(error) => tracing::warn!(path = %entry.path, %error, "import skipped"),
                }
            }
            studio.save(&store_path)?;
            tracing::info!(imported, path = %store_path.display(), "import complete");
        }
        Commands::DetectTempo { file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read audio file {}", file.display()))?;
            let extension = file.extension().and_then(|value| value.to_str());
            let buffer = decode_audio_bytes(bytes, extension)?;
            let bpm = detect_tempo(&buffer);
            tracing::info!(path = %file.display(), bpm, "tempo detected");
            println!("{bpm}");
        }
        Commands::Parity { output } => {
            let project = demo_project();
            let decoder = AssetDecoder::new(demo_fetcher());
            let tracks = demo_tracks(&decoder);
            let report = generate_parity_report(&project, &tracks, &config.mixdown_options())?;
            write_parity_report(&output, &report)?;
            tracing::info!(path = %output.display(), matches = report.matches, "parity report generated");
        }
    }

    Ok(())
}
