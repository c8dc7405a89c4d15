use std::collections::BTreeMap;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::error::KiraError;

/// On-disk layout of the derived-artifact cache.
///
/// Each entry is a payload file plus a small JSON metadata file next to it,
/// both under `<cache_root>/<kind>/`.
#[derive(Debug, Clone)]
pub struct Store {
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, KiraError> {
        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("kira-wellframe"))
                    .ok()
            })
            .ok_or_else(|| {
                KiraError::Filesystem("unable to resolve cache directory".to_string())
            })?;
        Ok(Self { cache_root })
    }

    pub fn new_with_root(cache_root: Utf8PathBuf) -> Self {
        Self { cache_root }
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn kind_dir(&self, kind: &str) -> Utf8PathBuf {
        self.cache_root.join(kind)
    }

    pub fn payload_path(&self, kind: &str, fingerprint: &str) -> Utf8PathBuf {
        self.kind_dir(kind).join(format!("{fingerprint}.bin.gz"))
    }

    pub fn metadata_path(&self, kind: &str, fingerprint: &str) -> Utf8PathBuf {
        self.kind_dir(kind).join(format!("{fingerprint}.json"))
    }

    pub fn write_metadata(path: &Utf8Path, metadata: &EntryMetadata) -> Result<(), KiraError> {
        let content = serde_json::to_vec_pretty(metadata)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn read_metadata(path: &Utf8Path) -> Result<Option<EntryMetadata>, KiraError> {
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        // A torn or foreign metadata file reads as a miss and gets overwritten.
        Ok(serde_json::from_str(&content).ok())
    }

    /// Writes through a named temp file in the destination directory, then renames over `path`.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
        let parent = path
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("kira-wf")
            .suffix(".tmp")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn remove_entry(&self, kind: &str, fingerprint: &str) -> Result<bool, KiraError> {
        let mut removed = false;
        for path in [
            self.metadata_path(kind, fingerprint),
            self.payload_path(kind, fingerprint),
        ] {
            if path.as_std_path().exists() {
                fs::remove_file(path.as_std_path())
                    .map_err(|err| KiraError::Filesystem(err.to_string()))?;
                removed = true;
            }
        }
        Ok(removed)
    }

    pub fn list_metadata(&self, kind: &str) -> Result<Vec<EntryMetadata>, KiraError> {
        let dir = self.kind_dir(kind);
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(dir.as_std_path()).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            if path.extension() != Some("json") {
                continue;
            }
            if let Some(metadata) = Self::read_metadata(&path)? {
                out.push(metadata);
            }
        }
        out.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(out)
    }
}

/// Describes a cache entry well enough to judge validity without decoding the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub kind: String,
    pub fingerprint: String,
    pub subjects: Vec<String>,
    pub params: BTreeMap<String, String>,
    pub format_version: u32,
    pub payload_bytes: u64,
    pub payload_sha256: String,
    pub created_at: String,
    pub tool: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new_with_root(Utf8PathBuf::from("/tmp/kira"));
        assert_eq!(
            store.payload_path("well", "abc"),
            Utf8PathBuf::from("/tmp/kira/well/abc.bin.gz")
        );
        assert_eq!(
            store.metadata_path("stim", "abc"),
            Utf8PathBuf::from("/tmp/kira/stim/abc.json")
        );
    }

    #[test]
    fn atomic_write_replaces_content() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = root.join("nested").join("file.bin");
        Store::write_bytes_atomic(&path, b"first").unwrap();
        Store::write_bytes_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(path.as_std_path()).unwrap(), b"second");
        let leftovers = fs::read_dir(root.join("nested").as_std_path())
            .unwrap()
            .count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn list_metadata_skips_payloads() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = Store::new_with_root(root);
        let metadata = EntryMetadata {
            kind: "well".to_string(),
            fingerprint: "ff".to_string(),
            subjects: vec!["r1".to_string()],
            params: BTreeMap::new(),
            format_version: 1,
            payload_bytes: 3,
            payload_sha256: "00".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            tool: "test".to_string(),
        };
        Store::write_metadata(&store.metadata_path("well", "ff"), &metadata).unwrap();
        Store::write_bytes_atomic(&store.payload_path("well", "ff"), b"abc").unwrap();
        assert_eq!(store.list_metadata("well").unwrap(), vec![metadata]);
        assert!(store.remove_entry("well", "ff").unwrap());
        assert!(store.list_metadata("well").unwrap().is_empty());
    }
}
