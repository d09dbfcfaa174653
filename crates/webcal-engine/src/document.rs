//! A parsed `VCALENDAR`: its events, its declared timezones, and whatever
//! else it carries (kept so serialization is lossless).

use std::str::FromStr;

use crate::error::{Result, WebcalError};
use crate::event::Event;
use crate::ics::{parse_components, unescape_text, Component, Property};
use crate::timezone::TimezoneTable;

/// One iCalendar document.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarDocument {
    properties: Vec<Property>,
    timezones: Vec<Component>,
    zones: TimezoneTable,
    events: Vec<Event>,
    others: Vec<Component>,
}

impl CalendarDocument {
    /// Parse iCalendar text. Only the first `VCALENDAR` is used.
    ///
    /// # Errors
    ///
    /// - [`WebcalError::Parse`] for malformed text, a missing `VCALENDAR`,
    ///   or an event without `UID`/`DTSTART`.
    /// - Timezone errors from malformed `VTIMEZONE` blocks.
    ///
    /// # Examples
    ///
    /// ```
    /// use webcal_engine::CalendarDocument;
    ///
    /// let doc = CalendarDocument::parse(
    ///     "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:a\r\n\
    ///      DTSTART:20100813T000000Z\r\nSUMMARY:Grape Festival 2010\r\n\
    ///      END:VEVENT\r\nEND:VCALENDAR\r\n",
    /// )
    /// .unwrap();
    /// assert_eq!(doc.event_ids(), vec!["a"]);
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let calendar = parse_components(text)?
            .into_iter()
            .find(|c| c.name == "VCALENDAR")
            .ok_or_else(|| WebcalError::Parse("no VCALENDAR component".to_string()))?;
        Self::from_component(calendar)
    }

    /// Parse a downloaded payload. Invalid UTF-8 is replaced rather than
    /// rejected.
    ///
    /// # Errors
    ///
    /// Same as [`CalendarDocument::parse`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    /// Build from an already-parsed `VCALENDAR` component.
    ///
    /// # Errors
    ///
    /// Same as [`CalendarDocument::parse`], minus the text-level failures.
    pub fn from_component(calendar: Component) -> Result<Self> {
        let mut timezones = Vec::new();
        let mut events = Vec::new();
        let mut others = Vec::new();
        for child in calendar.components {
            match child.name.as_str() {
                "VTIMEZONE" => timezones.push(child),
                "VEVENT" => events.push(Event::from_component(&child)?),
                _ => others.push(child),
            }
        }
        let zones = TimezoneTable::from_components(&timezones)?;
        tracing::debug!(
            events = events.len(),
            timezones = zones.len(),
            "parsed calendar document"
        );
        Ok(Self {
            properties: calendar.properties,
            timezones,
            zones,
            events,
            others,
        })
    }

    pub fn to_component(&self) -> Component {
        let mut calendar = Component::new("VCALENDAR");
        calendar.properties = self.properties.clone();
        calendar.components.extend(self.timezones.iter().cloned());
        calendar
            .components
            .extend(self.events.iter().map(Event::to_component));
        calendar.components.extend(self.others.iter().cloned());
        calendar
    }

    /// Serialize to iCalendar text (CRLF, folded). Event mutations are
    /// reflected.
    pub fn serialize(&self) -> String {
        self.to_component().serialize()
    }

    /// `X-WR-CALNAME`, when the publisher set one.
    pub fn name(&self) -> Option<String> {
        self.properties
            .iter()
            .find(|p| p.name == "X-WR-CALNAME")
            .map(|p| unescape_text(&p.value))
    }

    /// Event UIDs in document order.
    pub fn event_ids(&self) -> Vec<&str> {
        self.events.iter().map(Event::uid).collect()
    }

    /// Events in document order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Declared `TZID`s in declaration order.
    pub fn timezone_ids(&self) -> Vec<&str> {
        self.zones.names().collect()
    }

    /// The declared timezones, for resolving event times.
    pub fn zones(&self) -> &TimezoneTable {
        &self.zones
    }

    /// # Errors
    ///
    /// Returns [`WebcalError::NoSuchEvent`] if no event has this UID.
    pub fn event(&self, uid: &str) -> Result<&Event> {
        self.events
            .iter()
            .find(|e| e.uid() == uid)
            .ok_or_else(|| WebcalError::NoSuchEvent(uid.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`WebcalError::NoSuchEvent`] if no event has this UID.
    pub fn event_mut(&mut self, uid: &str) -> Result<&mut Event> {
        self.events
            .iter_mut()
            .find(|e| e.uid() == uid)
            .ok_or_else(|| WebcalError::NoSuchEvent(uid.to_string()))
    }
}

impl FromStr for CalendarDocument {
    type Err = WebcalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
