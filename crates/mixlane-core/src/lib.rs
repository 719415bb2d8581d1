pub mod assets;
pub mod audio;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod fades;
pub mod fixtures;
pub mod graph;
pub mod history;
pub mod mixdown;
pub mod model;
pub mod param;
pub mod parity;
pub mod persistence;
pub mod scheduler;
pub mod studio;
pub mod tempo;
pub mod timeline;

pub use assets::{
    AssetDecoder, AssetFetcher, AudioAssetEntry, DecodeError, FileFetcher, MemoryFetcher,
    asset_from_entry, decode_audio_bytes, scan_audio_assets,
};
pub use audio::{AudioEngine, ManualAudioEngine, SystemAudioEngine};
pub use config::StudioConfig;
pub use diagnostics::{TelemetryGuard, init_tracing};
pub use engine::{ClipPatch, ContinuousEdit, Edit, EditError, Engine, resolve_drop_track_index};
pub use mixdown::{
    MixdownError, MixdownOptions, RenderedMix, encode_wav, export_mix, export_range, render_mix,
    render_range,
};
pub use model::{
    Asset, AssetId, AssetKind, AssetSource, Clip, Project, SampleBuffer, SharedBuffer, Track,
    TrackKind,
};
pub use parity::{ParityReport, generate_parity_report};
pub use persistence::{ProjectStore, RehydrationWarning, rehydrate_tracks};
pub use scheduler::{PlaybackScheduler, SchedulerSettings, TransportState, TransportTick};
pub use studio::{PendingClip, ResolvedClip, Studio, StudioError, StudioOptions};
pub use tempo::detect_tempo;
pub use timeline::{SelectMode, SubscriptionId, Timeline, TimelineChange, TimelineObserver};
