use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use keyprobe_core::ProbeOutcome;
use thiserror::Error;
use tracing::{debug, warn};

use crate::CacheEntry;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("malformed cache {}: {source}", .path.display())]
    Malformed { path: PathBuf, source: serde_json::Error },
    #[error("cannot encode cache: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Identity -> last probe outcome, persisted as a JSON object between runs.
#[derive(Debug, Clone)]
pub struct CacheStore {
    pub(crate) entries: BTreeMap<String, ProbeOutcome>,
    pub(crate) freshness: Duration,
}

impl CacheStore {
    pub fn new(freshness: Duration) -> Self {
        CacheStore { entries: BTreeMap::new(), freshness }
    }

    /// Never fails: a missing or unreadable file yields an empty store.
    pub fn load(path: impl AsRef<Path>, freshness: Duration) -> Self {
        match Self::try_load(path.as_ref(), freshness) {
            Ok(store) => store,
            Err(CacheError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.as_ref().display(), "no cache file, starting empty");
                Self::new(freshness)
            }
            Err(e) => {
                warn!(error = %e, "ignoring unusable cache");
                Self::new(freshness)
            }
        }
    }

    /// Malformed individual records are skipped; a malformed document is an error.
    pub fn try_load(path: &Path, freshness: Duration) -> Result<Self, CacheError> {
        let text = fs::read_to_string(path).map_err(|source| CacheError::Io { path: path.to_path_buf(), source })?;
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(&text)
            .map_err(|source| CacheError::Malformed { path: path.to_path_buf(), source })?;
        let mut store = Self::new(freshness);
        let mut skipped = 0usize;
        for (identity, value) in raw {
            match serde_json::from_value::<CacheEntry>(value) {
                Ok(entry) => { store.entries.insert(identity, entry.into_outcome()); }
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(skipped, path = %path.display(), "skipped malformed cache records");
        }
        debug!(entries = store.entries.len(), path = %path.display(), "cache loaded");
        Ok(store)
    }

    /// Writes a sibling temp file and renames it over `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CacheError> {
        let path = path.as_ref();
        let io_err = |source: io::Error| CacheError::Io { path: path.to_path_buf(), source };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let doc: BTreeMap<&str, CacheEntry> =
            self.entries.iter().map(|(k, v)| (k.as_str(), CacheEntry::from(v))).collect();
        let body = serde_json::to_vec_pretty(&doc)?;
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        let mut f = fs::File::create(&tmp).map_err(io_err)?;
        f.write_all(&body).and_then(|_| f.sync_all()).map_err(io_err)?;
        drop(f);
        fs::rename(&tmp, path).map_err(io_err)?;
        debug!(entries = self.entries.len(), path = %path.display(), "cache saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRESH: Duration = Duration::from_secs(3600);

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        let mut c = CacheStore::new(FRESH);
        c.record("vless://a@h:1", ProbeOutcome::alive(80, "DE", 500));
        c.record("ss://b@h:2", ProbeOutcome::dead("UNKNOWN", 400));
        c.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let back = CacheStore::load(&path, FRESH);
        assert_eq!(back.len(), 2);
        assert_eq!(back.get("vless://a@h:1"), Some(&ProbeOutcome::alive(80, "DE", 500)));
        assert_eq!(back.get("ss://b@h:2"), Some(&ProbeOutcome::dead("UNKNOWN", 400)));

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"latencyMs\": 80"));
        assert!(text.contains("\"time\": 500"));
    }

    #[test]
    fn missing_or_malformed_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CacheStore::load(dir.path().join("absent.json"), FRESH).is_empty());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert!(CacheStore::load(&bad, FRESH).is_empty());
        assert!(matches!(CacheStore::try_load(&bad, FRESH), Err(CacheError::Malformed { .. })));
    }

    #[test]
    fn skips_bad_records_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(
            &path,
            r#"{
                "good": {"alive": true, "latencyMs": 33, "time": 9, "country": "FI"},
                "no-latency": {"alive": true, "time": 9},
                "broken": {"alive": "yes"}
            }"#,
        )
        .unwrap();
        let c = CacheStore::load(&path, FRESH);
        assert_eq!(c.len(), 2);
        assert_eq!(c.lookup("good", 10).map(|o| o.country()), Some("FI"));
        let nl = c.get("no-latency").unwrap();
        assert!(!nl.is_alive());
        assert_eq!(nl.country(), "UNKNOWN");
    }
}
