use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};

use chrono::Utc;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::domain::{Feature, RunId};
use crate::error::KiraError;
use crate::frame::WellFrame;
use crate::source::{SensorTrace, VideoBlob};
use crate::stim::{StimFrame, Waveform};
use crate::store::{EntryMetadata, Store};

const FORMAT_VERSION: u32 = 1;

/// An artifact together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded<T> {
    /// Built from raw recordings during this call.
    Fresh(T),
    /// Read back from an entry written by an earlier call.
    Cached(T),
}

impl<T> Loaded<T> {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Loaded::Fresh(_))
    }

    pub fn get(&self) -> &T {
        match self {
            Loaded::Fresh(value) | Loaded::Cached(value) => value,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Loaded::Fresh(value) | Loaded::Cached(value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Well,
    Stim,
    Sensor,
    Audio,
    Video,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Well => "well",
            ArtifactKind::Stim => "stim",
            ArtifactKind::Sensor => "sensor",
            ArtifactKind::Audio => "audio",
            ArtifactKind::Video => "video",
        }
    }
}

/// Identifies one cache entry. Time windows never belong in a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub kind: ArtifactKind,
    pub subjects: Vec<String>,
    pub params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(kind: ArtifactKind, subjects: Vec<String>) -> Self {
        Self {
            kind,
            subjects,
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn fingerprint(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";");
        let canonical = format!(
            "v{FORMAT_VERSION}|{}|{}|{params}",
            self.kind.as_str(),
            self.subjects.join(",")
        );
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Keyed persistence for one artifact kind.
#[derive(Debug, Clone)]
pub struct DiskCache {
    store: Store,
    kind: ArtifactKind,
}

impl DiskCache {
    pub fn new(store: Store, kind: ArtifactKind) -> Self {
        Self { store, kind }
    }

    /// Returns the stored artifact, or builds, stores and returns it.
    ///
    /// Concurrent misses on one key may both build; the last rename wins and
    /// readers only ever see a complete entry.
    pub fn load_or_build<T, F>(&self, key: &CacheKey, build: F) -> Result<Loaded<T>, KiraError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, KiraError>,
    {
        if let Some(value) = self.get(key)? {
            debug!(kind = self.kind.as_str(), subjects = ?key.subjects, "cache hit");
            return Ok(Loaded::Cached(value));
        }
        debug!(kind = self.kind.as_str(), subjects = ?key.subjects, "cache miss");
        let value = build()?;
        self.put(key, &value)?;
        Ok(Loaded::Fresh(value))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>, KiraError> {
        let fingerprint = key.fingerprint();
        let metadata_path = self.store.metadata_path(self.kind.as_str(), &fingerprint);
        let Some(metadata) = Store::read_metadata(&metadata_path)? else {
            return Ok(None);
        };
        if metadata.format_version != FORMAT_VERSION || metadata.kind != self.kind.as_str() {
            return Ok(None);
        }
        let payload_path = self.store.payload_path(self.kind.as_str(), &fingerprint);
        let Ok(payload) = fs::read(payload_path.as_std_path()) else {
            return Ok(None);
        };
        if payload.len() as u64 != metadata.payload_bytes
            || sha256_hex(&payload) != metadata.payload_sha256
        {
            debug!(%fingerprint, "cache payload does not match its metadata; rebuilding");
            return Ok(None);
        }
        decode(&payload).map(Some)
    }

    pub fn put<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<(), KiraError> {
        let fingerprint = key.fingerprint();
        let payload = encode(value)?;
        let metadata = EntryMetadata {
            kind: self.kind.as_str().to_string(),
            fingerprint: fingerprint.clone(),
            subjects: key.subjects.clone(),
            params: key.params.clone(),
            format_version: FORMAT_VERSION,
            payload_bytes: payload.len() as u64,
            payload_sha256: sha256_hex(&payload),
            created_at: Utc::now().to_rfc3339(),
            tool: format!("kira-wf/{}", env!("CARGO_PKG_VERSION")),
        };
        Store::write_bytes_atomic(
            &self.store.payload_path(self.kind.as_str(), &fingerprint),
            &payload,
        )?;
        Store::write_metadata(
            &self.store.metadata_path(self.kind.as_str(), &fingerprint),
            &metadata,
        )
    }

    pub fn contains(&self, key: &CacheKey) -> Result<bool, KiraError> {
        let path = self
            .store
            .metadata_path(self.kind.as_str(), &key.fingerprint());
        Ok(Store::read_metadata(&path)?.is_some())
    }

    /// Removes the whole entry; there is no partial invalidation.
    pub fn delete(&self, key: &CacheKey) -> Result<bool, KiraError> {
        self.store
            .remove_entry(self.kind.as_str(), &key.fingerprint())
    }

    pub fn delete_where<F: Fn(&EntryMetadata) -> bool>(&self, matches: F) -> Result<usize, KiraError> {
        let mut removed = 0;
        for metadata in self.store.list_metadata(self.kind.as_str())? {
            if matches(&metadata)
                && self
                    .store
                    .remove_entry(self.kind.as_str(), &metadata.fingerprint)?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, KiraError> {
    let raw = bincode::serialize(value).map_err(|err| KiraError::CacheEncode(err.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .map_err(|err| KiraError::CacheEncode(err.to_string()))?;
    encoder
        .finish()
        .map_err(|err| KiraError::CacheEncode(err.to_string()))
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, KiraError> {
    let mut raw = Vec::new();
    GzDecoder::new(payload)
        .read_to_end(&mut raw)
        .map_err(|err| KiraError::CacheDecode(err.to_string()))?;
    bincode::deserialize(&raw).map_err(|err| KiraError::CacheDecode(err.to_string()))
}

fn run_subjects(runs: &[RunId]) -> Vec<String> {
    let mut ids: Vec<RunId> = runs.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids.iter().map(ToString::to_string).collect()
}

/// As-built well frames keyed by run set and feature.
#[derive(Debug, Clone)]
pub struct WellCache {
    disk: DiskCache,
}

impl WellCache {
    pub fn new(store: Store) -> Self {
        Self {
            disk: DiskCache::new(store, ArtifactKind::Well),
        }
    }

    pub fn key(runs: &[RunId], feature: &Feature) -> CacheKey {
        CacheKey::new(ArtifactKind::Well, run_subjects(runs)).param("feature", &feature.name)
    }

    pub fn load<F>(
        &self,
        runs: &[RunId],
        feature: &Feature,
        build: F,
    ) -> Result<Loaded<WellFrame>, KiraError>
    where
        F: FnOnce() -> Result<WellFrame, KiraError>,
    {
        self.disk.load_or_build(&Self::key(runs, feature), build)
    }

    pub fn contains(&self, runs: &[RunId], feature: &Feature) -> Result<bool, KiraError> {
        self.disk.contains(&Self::key(runs, feature))
    }

    pub fn delete(&self, runs: &[RunId], feature: &Feature) -> Result<bool, KiraError> {
        self.disk.delete(&Self::key(runs, feature))
    }

    /// Removes every entry whose run set includes any of `runs`, whatever the feature.
    pub fn delete_runs(&self, runs: &[RunId]) -> Result<usize, KiraError> {
        let wanted = run_subjects(runs);
        let removed = self.disk.delete_where(|metadata| {
            metadata
                .subjects
                .iter()
                .any(|subject| wanted.contains(subject))
        })?;
        info!("removed {removed} well cache entr{}", if removed == 1 { "y" } else { "ies" });
        Ok(removed)
    }
}

#[derive(Debug, Clone)]
pub struct StimCache {
    disk: DiskCache,
}

impl StimCache {
    pub fn new(store: Store) -> Self {
        Self {
            disk: DiskCache::new(store, ArtifactKind::Stim),
        }
    }

    pub fn load<F>(
        &self,
        battery_id: u32,
        audio_waveform: bool,
        build: F,
    ) -> Result<Loaded<StimFrame>, KiraError>
    where
        F: FnOnce() -> Result<StimFrame, KiraError>,
    {
        let key = CacheKey::new(ArtifactKind::Stim, vec![format!("b{battery_id}")])
            .param("audio_waveform", audio_waveform);
        self.disk.load_or_build(&key, build)
    }
}

#[derive(Debug, Clone)]
pub struct SensorCache {
    disk: DiskCache,
}

impl SensorCache {
    pub fn new(store: Store) -> Self {
        Self {
            disk: DiskCache::new(store, ArtifactKind::Sensor),
        }
    }

    pub fn load<F>(&self, run: RunId, sensor: &str, build: F) -> Result<Loaded<SensorTrace>, KiraError>
    where
        F: FnOnce() -> Result<SensorTrace, KiraError>,
    {
        let key = CacheKey::new(ArtifactKind::Sensor, vec![run.to_string()]).param("sensor", sensor);
        self.disk.load_or_build(&key, build)
    }

    pub fn delete_runs(&self, runs: &[RunId]) -> Result<usize, KiraError> {
        let wanted = run_subjects(runs);
        self.disk
            .delete_where(|metadata| metadata.subjects.iter().any(|s| wanted.contains(s)))
    }
}

#[derive(Debug, Clone)]
pub struct AudioCache {
    disk: DiskCache,
}

impl AudioCache {
    pub fn new(store: Store) -> Self {
        Self {
            disk: DiskCache::new(store, ArtifactKind::Audio),
        }
    }

    pub fn load<F>(&self, audio_file: u32, build: F) -> Result<Loaded<Waveform>, KiraError>
    where
        F: FnOnce() -> Result<Waveform, KiraError>,
    {
        let key = CacheKey::new(ArtifactKind::Audio, vec![format!("a{audio_file}")]);
        self.disk.load_or_build(&key, build)
    }
}

#[derive(Debug, Clone)]
pub struct VideoCache {
    disk: DiskCache,
}

impl VideoCache {
    pub fn new(store: Store) -> Self {
        Self {
            disk: DiskCache::new(store, ArtifactKind::Video),
        }
    }

    pub fn load<F>(&self, run: RunId, build: F) -> Result<Loaded<VideoBlob>, KiraError>
    where
        F: FnOnce() -> Result<VideoBlob, KiraError>,
    {
        let key = CacheKey::new(ArtifactKind::Video, vec![run.to_string()]);
        self.disk.load_or_build(&key, build)
    }

    pub fn delete_runs(&self, runs: &[RunId]) -> Result<usize, KiraError> {
        let wanted = run_subjects(runs);
        self.disk
            .delete_where(|metadata| metadata.subjects.iter().any(|s| wanted.contains(s)))
    }
}
