//! # webcal-engine
//!
//! Temporal queries over iCalendar calendars hosted on WebDAV servers.
//!
//! A [`CalendarSource`] lists and downloads the calendars behind one URL,
//! caching them on disk keyed by the server's last-modified timestamps.
//! Each calendar parses into a [`CalendarDocument`] whose events can be
//! filtered by start time ([`CalendarDocument::events_before`],
//! [`CalendarDocument::events_after`], [`CalendarDocument::events_between`]),
//! with recurring events contributing their nearest occurrence.
//!
//! ## Modules
//!
//! - [`ics`] — RFC 5545 content lines: unfolding, parameters, escaping, folding
//! - [`timezone`] — `VTIMEZONE` observances, IANA fallback, local → UTC resolution
//! - [`event`] — Typed `VEVENT` access: start/end, text fields, attendees
//! - [`recurrence`] — `RRULE`/`EXDATE`/`RDATE` expansion with exact bounds
//! - [`document`] — A whole `VCALENDAR`: events, zones, lossless serialization
//! - [`query`] — `events_before` / `events_after` / `events_between`
//! - [`cache`] — Per-source JSON cache of downloaded calendars
//! - [`source`] — Listing and fetching through a [`CalendarTransport`]
//! - [`webdav`] — The HTTP(S) WebDAV transport
//! - [`error`] — Error types

pub mod cache;
pub mod document;
pub mod error;
pub mod event;
pub mod ics;
pub mod query;
pub mod recurrence;
pub mod source;
pub mod timezone;
pub mod webdav;

pub use cache::{CachedEntry, CalendarCache};
pub use document::CalendarDocument;
pub use error::{Result, WebcalError};
pub use event::{Attendee, Event, EventTime};
pub use query::{sort_occurrences, Occurrence};
pub use recurrence::{EventRecurrence, Recurrence};
pub use source::{
    CalendarId, CalendarSource, CalendarTransport, RemoteCalendar, SourceConfig, Target,
};
pub use timezone::{resolve, TimezoneTable, ZoneRule};
pub use webdav::WebDavTransport;
