//! Calendars fetched from a remote source, backed by [`CalendarCache`].
//!
//! A source URL names either a single `.ics` resource or a collection of
//! them. The transport is a trait so the caching logic can run against a
//! fake in tests; [`crate::webdav::WebDavTransport`] is the real one.
//!
//! Connecting is deferred to the first listing or fetch, and happens at
//! most once per source.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CalendarCache;
use crate::document::CalendarDocument;
use crate::error::{Result, WebcalError};
use crate::webdav::WebDavTransport;

// ── Identifiers ─────────────────────────────────────────────────────────────

/// Which calendar of a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CalendarId {
    /// The URL itself is the calendar.
    Resource,
    /// A member of a collection, by its last path segment.
    Member(String),
}

impl fmt::Display for CalendarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource => f.write_str("0"),
            Self::Member(name) => f.write_str(name),
        }
    }
}

impl From<&str> for CalendarId {
    fn from(s: &str) -> Self {
        if s == "0" {
            Self::Resource
        } else {
            Self::Member(s.to_string())
        }
    }
}

/// What a source URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Collection,
    Resource,
}

impl Target {
    /// A URL ending in `.ics` is a single resource; anything else is a
    /// collection.
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.to_ascii_lowercase().ends_with(".ics") {
            Self::Resource
        } else {
            Self::Collection
        }
    }
}

/// One entry of a collection listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCalendar {
    pub id: String,
    pub last_modified: DateTime<Utc>,
}

// ── Transport ───────────────────────────────────────────────────────────────

/// How calendars are listed and downloaded.
pub trait CalendarTransport {
    /// Open the session. Called once, before any other request.
    fn connect(&mut self) -> Result<()>;

    fn target(&self) -> Target;

    /// List the members of a collection with their last-modified times.
    fn list(&mut self) -> Result<Vec<RemoteCalendar>>;

    /// Fetch one calendar's raw bytes.
    fn download(&mut self, id: &CalendarId) -> Result<Vec<u8>>;
}

// ── Configuration ───────────────────────────────────────────────────────────

/// Where a source lives and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub cache_dir: PathBuf,
}

impl SourceConfig {
    pub fn new(url: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            cache_dir: cache_dir.into(),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

// ── Source ──────────────────────────────────────────────────────────────────

pub struct CalendarSource<T> {
    transport: T,
    cache: CalendarCache,
    modified: HashMap<CalendarId, DateTime<Utc>>,
    connected: bool,
}

impl CalendarSource<WebDavTransport> {
    /// A WebDAV-backed source. No network traffic happens here.
    pub fn from_config(config: &SourceConfig) -> Self {
        let cache = CalendarCache::for_source(&config.cache_dir, &config.url, config.username.as_deref());
        Self::new(WebDavTransport::from_config(config), cache)
    }
}

impl<T: CalendarTransport> CalendarSource<T> {
    pub fn new(transport: T, cache: CalendarCache) -> Self {
        Self {
            transport,
            cache,
            modified: HashMap::new(),
            connected: false,
        }
    }

    /// List the calendars of this source and remember their timestamps.
    ///
    /// A single resource lists as [`CalendarId::Resource`], stamped with the
    /// current time (so it is always re-downloaded on the next fetch).
    ///
    /// # Errors
    ///
    /// Propagates connection and listing failures.
    pub fn calendar_ids(&mut self) -> Result<Vec<CalendarId>> {
        self.ensure_connected()?;
        self.modified.clear();
        match self.transport.target() {
            Target::Resource => {
                self.modified.insert(CalendarId::Resource, Utc::now());
                Ok(vec![CalendarId::Resource])
            }
            Target::Collection => {
                let listing = self.transport.list()?;
                let mut ids = Vec::with_capacity(listing.len());
                for remote in listing {
                    let id = CalendarId::Member(remote.id);
                    self.modified.insert(id.clone(), remote.last_modified);
                    ids.push(id);
                }
                tracing::debug!(calendars = ids.len(), "listed collection");
                Ok(ids)
            }
        }
    }

    /// Fetch one calendar, from the cache when its timestamp is unchanged
    /// and the cached copy still parses.
    ///
    /// A freshly downloaded calendar is written back to the cache; a failed
    /// cache write is logged and otherwise ignored.
    ///
    /// # Errors
    ///
    /// - [`WebcalError::UnknownCalendar`] if `id` is not in the listing.
    /// - Transport and parse failures.
    pub fn calendar(&mut self, id: &CalendarId) -> Result<CalendarDocument> {
        self.ensure_connected()?;
        if !self.modified.contains_key(id) {
            self.calendar_ids()?;
        }
        let modified = *self
            .modified
            .get(id)
            .ok_or_else(|| WebcalError::UnknownCalendar(id.to_string()))?;

        if let Some(entry) = self.cache.get(id) {
            if entry.modified == modified {
                match CalendarDocument::parse(&entry.payload) {
                    Ok(document) => {
                        tracing::debug!(calendar = %id, "calendar cache hit");
                        return Ok(document);
                    }
                    Err(err) => {
                        tracing::warn!(calendar = %id, error = %err, "discarding unparsable cached calendar");
                        self.cache.evict(id);
                    }
                }
            }
        }

        tracing::debug!(calendar = %id, "downloading calendar");
        let bytes = self.transport.download(id)?;
        let document = CalendarDocument::from_bytes(&bytes)?;
        if let Err(err) = self.cache.put(id, modified, document.serialize()) {
            tracing::warn!(calendar = %id, error = %err, "cannot update calendar cache");
        }
        Ok(document)
    }

    /// Fetch every calendar of the source, in listing order.
    ///
    /// # Errors
    ///
    /// Stops at the first calendar that cannot be fetched.
    pub fn calendars(&mut self) -> Result<Vec<(CalendarId, CalendarDocument)>> {
        let ids = self.calendar_ids()?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let document = self.calendar(&id)?;
            out.push((id, document));
        }
        Ok(out)
    }

    fn ensure_connected(&mut self) -> Result<()> {
        if !self.connected {
            self.transport.connect()?;
            self.connected = true;
        }
        Ok(())
    }
}
