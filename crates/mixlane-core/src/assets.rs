use std::{
    collections::{BTreeSet, HashMap},
    fs::{self, File},
    io::{self, Cursor, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use symphonia::core::{
    audio::{AudioBufferRef, SampleBuffer as PcmBuffer},
    codecs::DecoderOptions,
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::{
    model::{Asset, AssetId, AssetKind, AssetSource, SampleBuffer},
    tempo::detect_tempo,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("failed to fetch asset {asset_id}: {message}")]
    Fetch { asset_id: AssetId, message: String },
    #[error("malformed audio in asset {asset_id}: {message}")]
    Malformed { asset_id: AssetId, message: String },
    #[error("asset {asset_id} decoded to zero samples")]
    Empty { asset_id: AssetId },
}

/// Resolves an asset locator to raw container bytes.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>>;
}

/// Reads locators as paths (optionally `file://` URLs) under a root directory.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn resolve(&self, locator: &str) -> PathBuf {
        let path = Path::new(locator.strip_prefix("file://").unwrap_or(locator));
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl AssetFetcher for FileFetcher {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        let path = self.resolve(locator);
        fs::read(&path).with_context(|| format!("failed to read asset file {}", path.display()))
    }
}

/// Blobs held in memory: recordings, uploads and test fixtures.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    blobs: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, locator: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.blobs.write().insert(locator.into(), bytes.into());
    }

    pub fn remove(&self, locator: &str) -> bool {
        self.blobs.write().remove(locator).is_some()
    }
}

impl AssetFetcher for MemoryFetcher {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .get(locator)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| anyhow::anyhow!("no in-memory blob for locator {locator}"))
    }
}

/// Decodes assets once and shares the buffers. The cache is append-only:
/// the first buffer stored for an id is the one every caller sees.
pub struct AssetDecoder {
    fetcher: Arc<dyn AssetFetcher>,
    cache: RwLock<HashMap<AssetId, Arc<SampleBuffer>>>,
}

impl std::fmt::Debug for AssetDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetDecoder")
            .field("cached", &self.cache.read().len())
            .finish_non_exhaustive()
    }
}

impl AssetDecoder {
    #[must_use]
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            fetcher,
            cache: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn cached(&self, asset_id: &str) -> Option<Arc<SampleBuffer>> {
        self.cache.read().get(asset_id).cloned()
    }

    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Buffer for an asset, decoding on first use. Video assets have none.
    /// Failures are not cached, so the next call retries.
    #[instrument(skip(self, asset), fields(asset_id = %asset.id, kind = ?asset.kind))]
    pub fn decode(&self, asset: &Asset) -> Result<Option<Arc<SampleBuffer>>, DecodeError> {
        if !asset.kind.is_audio() {
            return Ok(None);
        }
        if let Some(buffer) = self.cached(&asset.id) {
            debug!("decode cache hit");
            return Ok(Some(buffer));
        }

        let bytes = self
            .fetcher
            .fetch(&asset.source_locator)
            .map_err(|error| DecodeError::Fetch {
                asset_id: asset.id.clone(),
                message: format!("{error:#}"),
            })?;
        let extension = Path::new(&asset.source_locator)
            .extension()
            .and_then(|value| value.to_str());
        let decoded = decode_audio_bytes(bytes, extension).map_err(|error| {
            DecodeError::Malformed {
                asset_id: asset.id.clone(),
                message: format!("{error:#}"),
            }
        })?;
        if decoded.frames() == 0 {
            return Err(DecodeError::Empty {
                asset_id: asset.id.clone(),
            });
        }

        let buffer = self
            .cache
            .write()
            .entry(asset.id.clone())
            .or_insert_with(|| Arc::new(decoded))
            .clone();
        debug!(
            frames = buffer.frames(),
            sample_rate = buffer.sample_rate(),
            "asset decoded"
        );
        Ok(Some(buffer))
    }

    /// Decode an incoming asset and fill in its measured duration and, when
    /// not already known, its detected tempo.
    #[instrument(skip(self, asset), fields(asset_id = %asset.id))]
    pub fn ingest(&self, mut asset: Asset) -> Result<Asset, DecodeError> {
        let Some(buffer) = self.decode(&asset)? else {
            return Ok(asset);
        };
        asset.duration_seconds = buffer.duration_seconds();
        if asset.detected_tempo_bpm.is_none() {
            asset.detected_tempo_bpm = Some(detect_tempo(&buffer));
        }
        info!(
            duration_seconds = asset.duration_seconds,
            tempo_bpm = asset.detected_tempo_bpm,
            "asset ingested"
        );
        Ok(asset)
    }
}

/// Decode a complete container held in memory into planar samples.
pub fn decode_audio_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<SampleBuffer> {
    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default audio track found"))?;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(48_000);
    let mut channels: Vec<Vec<f32>> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(error)) if error.kind() == ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                return Err(anyhow::anyhow!("audio stream reset required"));
            }
            Err(error) => return Err(error.into()),
        };

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => {
                continue;
            }
            Err(error) => return Err(error.into()),
        };

        sample_rate = decoded.spec().rate;
        push_planar_samples(decoded, &mut channels);
    }

    Ok(SampleBuffer::new(sample_rate, channels))
}

fn push_planar_samples(decoded: AudioBufferRef<'_>, channels: &mut Vec<Vec<f32>>) {
    let spec = *decoded.spec();
    let channel_count = spec.channels.count().max(1);
    let mut pcm = PcmBuffer::<f32>::new(decoded.capacity() as u64, spec);
    pcm.copy_interleaved_ref(decoded);

    if channels.len() < channel_count {
        let frames = channels.first().map_or(0, Vec::len);
        channels.resize_with(channel_count, || vec![0.0; frames]);
    }
    for frame in pcm.samples().chunks(channel_count) {
        for (channel, sample) in channels.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioAssetEntry {
    pub path: String,
    pub extension: String,
    pub size_bytes: u64,
}

#[instrument(fields(directory = %directory.display()))]
pub fn scan_audio_assets(directory: &Path) -> Result<Vec<AudioAssetEntry>> {
    if !directory.exists() {
        fs::create_dir_all(directory).with_context(|| {
            format!(
                "failed to create audio asset directory: {}",
                directory.display()
            )
        })?;
        debug!(
            directory = %directory.display(),
            "audio asset directory missing, created empty directory"
        );
        return Ok(Vec::new());
    }

    if !directory.is_dir() {
        return Err(anyhow::anyhow!(
            "audio asset path is not a directory: {}",
            directory.display()
        ));
    }

    let extensions = supported_audio_extensions();
    let mut assets = Vec::new();

    for entry in WalkDir::new(directory).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(
                    ?error,
                    "ignoring unreadable entry while scanning audio assets"
                );
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(extension) = entry
            .path()
            .extension()
            .and_then(|value| value.to_str())
            .map(str::to_ascii_lowercase)
        else {
            continue;
        };
        if !extensions.contains(extension.as_str()) {
            continue;
        }

        let size_bytes = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
        assets.push(AudioAssetEntry {
            path: entry.path().display().to_string(),
            extension,
            size_bytes,
        });
    }

    assets.sort_by(|left, right| left.path.cmp(&right.path));
    debug!(count = assets.len(), "audio asset scan complete");
    Ok(assets)
}

/// Catalog record for a scanned file. The id is derived from the file's
/// content, so re-importing the same audio yields the same asset.
pub fn asset_from_entry(entry: &AudioAssetEntry, kind: AssetKind) -> Result<Asset> {
    let path = Path::new(&entry.path);
    let id = content_hash(path)?;
    let name = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("Imported audio")
        .to_string();
    Ok(Asset::new(
        format!("file-{}", &id[..16]),
        name,
        entry.path.clone(),
        kind,
        AssetSource::Uploaded,
    ))
}

fn content_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open asset for hashing: {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("failed to hash asset: {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn supported_audio_extensions() -> BTreeSet<&'static str> {
    [
        "wav", "flac", "mp3", "ogg", "m4a", "aiff", "aif", "caf", "mkv",
    ]
    .into_iter()
    .collect()
}
