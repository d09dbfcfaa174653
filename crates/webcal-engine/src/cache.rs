//! On-disk cache of downloaded calendars.
//!
//! One JSON file per source (URL + username), mapping calendar id to the
//! server's last-modified timestamp and the serialized calendar text. The
//! file is read lazily on first access and rewritten on every change
//! (temporary file + rename, so a crash never leaves a torn file).
//!
//! A missing, empty or unreadable cache file is an empty cache, never an
//! error: the worst case is a re-download.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::source::CalendarId;

/// A cached calendar and the server timestamp it was downloaded at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub modified: DateTime<Utc>,
    pub payload: String,
}

#[derive(Debug)]
pub struct CalendarCache {
    path: PathBuf,
    entries: Option<BTreeMap<String, CachedEntry>>,
}

impl CalendarCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: None,
        }
    }

    /// The cache for one source, under `cache_dir`.
    pub fn for_source(cache_dir: &Path, url: &str, username: Option<&str>) -> Self {
        Self::new(cache_dir.join(cache_file_name(url, username)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&mut self, id: &CalendarId) -> Option<&CachedEntry> {
        self.entries().get(&id.to_string())
    }

    /// Forget `id` in memory so the next [`put`](Self::put) writes even
    /// with an unchanged timestamp.
    pub fn evict(&mut self, id: &CalendarId) -> Option<CachedEntry> {
        self.entries().remove(&id.to_string())
    }

    /// Store `payload` for `id`. Nothing is written when the stored
    /// timestamp already equals `modified`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WebcalError::Io`] or [`crate::WebcalError::Json`] if
    /// the cache file cannot be written.
    pub fn put(&mut self, id: &CalendarId, modified: DateTime<Utc>, payload: String) -> Result<()> {
        let key = id.to_string();
        let entries = self.entries();
        if entries.get(&key).is_some_and(|e| e.modified == modified) {
            return Ok(());
        }
        entries.insert(key, CachedEntry { modified, payload });
        self.save()
    }

    fn entries(&mut self) -> &mut BTreeMap<String, CachedEntry> {
        let path = &self.path;
        self.entries.get_or_insert_with(|| load(path))
    }

    fn save(&self) -> Result<()> {
        let Some(entries) = &self.entries else {
            return Ok(());
        };
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), entries = entries.len(), "wrote calendar cache");
        Ok(())
    }
}

fn load(path: &Path) -> BTreeMap<String, CachedEntry> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return BTreeMap::new(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "cannot read calendar cache");
            return BTreeMap::new();
        }
    };
    if bytes.is_empty() {
        return BTreeMap::new();
    }
    serde_json::from_slice(&bytes).unwrap_or_else(|err| {
        tracing::warn!(path = %path.display(), error = %err, "discarding corrupt calendar cache");
        BTreeMap::new()
    })
}

/// `webcal-<sha256(url + username)>.json`
pub fn cache_file_name(url: &str, username: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(username.unwrap_or_default().as_bytes());
    format!("webcal-{}.json", hex::encode(hasher.finalize()))
}
