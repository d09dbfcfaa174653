//! Typed access to one `VEVENT`.
//!
//! The fields every query needs (UID, summary, start/end, description,
//! location, URL, attendees, recurrence) are held as typed values. Anything
//! else the event carries is kept verbatim in an overflow list so that a
//! parse/serialize cycle loses nothing.
//!
//! Date/time fields keep their native encoding (value plus `TZID`/`VALUE`
//! parameters) and are only resolved when read, against the owning
//! calendar's [`TimezoneTable`].

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};

use crate::error::{Result, WebcalError};
use crate::ics::{escape_text, unescape_text, Component, Param, Property};
use crate::recurrence::{EventRecurrence, Recurrence};
use crate::timezone::{format_date, format_utc, parse_date, resolve, TimezoneTable};

// ── EventTime ───────────────────────────────────────────────────────────────

/// A resolved `DTSTART`/`DTEND` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTime {
    /// A whole calendar day (`VALUE=DATE`).
    Date(NaiveDate),
    /// An exact instant.
    DateTime(DateTime<Utc>),
}

impl EventTime {
    pub fn is_date_only(&self) -> bool {
        matches!(self, Self::Date(_))
    }

    /// The instant this value sorts at; a date counts as UTC midnight.
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            Self::Date(date) => date.and_time(chrono::NaiveTime::MIN).and_utc(),
            Self::DateTime(dt) => *dt,
        }
    }

    /// Compare against `t` at this value's granularity: a date-only value
    /// only sees the calendar date of `t`.
    pub fn cmp_at_granularity(&self, t: &DateTime<Utc>) -> Ordering {
        match self {
            Self::Date(date) => date.cmp(&t.date_naive()),
            Self::DateTime(dt) => dt.cmp(t),
        }
    }
}

impl Ord for EventTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.instant()
            .cmp(&other.instant())
            .then_with(|| other.is_date_only().cmp(&self.is_date_only()))
    }
}

impl PartialOrd for EventTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%SZ")),
        }
    }
}

impl From<DateTime<Utc>> for EventTime {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }
}

impl From<NaiveDate> for EventTime {
    fn from(date: NaiveDate) -> Self {
        Self::Date(date)
    }
}

// ── Attendee ────────────────────────────────────────────────────────────────

/// An `ATTENDEE` with its recognized parameters pulled out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attendee {
    /// Calendar user address, usually `mailto:...`.
    pub address: String,
    /// `CN`
    pub name: Option<String>,
    /// `ROLE`
    pub role: Option<String>,
    /// `RSVP`
    pub rsvp_request: Option<bool>,
    /// `PARTSTAT`
    pub rsvp_status: Option<String>,
    /// Parameters outside the recognized set, verbatim.
    pub other_params: Vec<Param>,
}

impl Attendee {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn from_property(prop: &Property) -> Self {
        let mut attendee = Self::new(prop.value.clone());
        for param in &prop.params {
            let first = param.values.first().cloned();
            match param.name.as_str() {
                "CN" => attendee.name = first,
                "ROLE" => attendee.role = first,
                "RSVP" => {
                    attendee.rsvp_request = first.map(|v| v.eq_ignore_ascii_case("TRUE"));
                }
                "PARTSTAT" => attendee.rsvp_status = first,
                _ => attendee.other_params.push(param.clone()),
            }
        }
        attendee
    }

    pub fn to_property(&self) -> Property {
        let mut prop = Property::new("ATTENDEE", self.address.clone());
        if let Some(name) = &self.name {
            prop.set_param("CN", name.clone());
        }
        if let Some(role) = &self.role {
            prop.set_param("ROLE", role.clone());
        }
        if let Some(rsvp) = self.rsvp_request {
            prop.set_param("RSVP", if rsvp { "TRUE" } else { "FALSE" });
        }
        if let Some(status) = &self.rsvp_status {
            prop.set_param("PARTSTAT", status.clone());
        }
        prop.params.extend(self.other_params.iter().cloned());
        prop
    }
}

impl fmt::Display for Attendee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_property().to_line())
    }
}

// ── Event ───────────────────────────────────────────────────────────────────

/// One calendar entry, single or recurring.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    uid: String,
    summary: Option<String>,
    start: Property,
    end: Option<Property>,
    description: Option<String>,
    location: Option<String>,
    url: Option<String>,
    attendees: Vec<Attendee>,
    rrule: Option<String>,
    exdates: Vec<Property>,
    rdates: Vec<Property>,
    extra: Vec<Property>,
    components: Vec<Component>,
}

impl Event {
    /// Build an event from a `VEVENT` component.
    ///
    /// # Errors
    ///
    /// Returns [`WebcalError::Parse`] when `UID` or `DTSTART` is missing.
    pub fn from_component(component: &Component) -> Result<Self> {
        let mut uid = None;
        let mut start = None;
        let mut event = Self {
            uid: String::new(),
            summary: None,
            start: Property::new("DTSTART", ""),
            end: None,
            description: None,
            location: None,
            url: None,
            attendees: Vec::new(),
            rrule: None,
            exdates: Vec::new(),
            rdates: Vec::new(),
            extra: Vec::new(),
            components: component.components.clone(),
        };

        for prop in &component.properties {
            match prop.name.as_str() {
                "UID" => uid = Some(prop.value.trim().to_string()),
                "DTSTART" => start = Some(prop.clone()),
                "DTEND" => event.end = Some(prop.clone()),
                "SUMMARY" => event.summary = Some(unescape_text(&prop.value)),
                "DESCRIPTION" => event.description = Some(unescape_text(&prop.value)),
                "LOCATION" => event.location = Some(unescape_text(&prop.value)),
                "URL" => event.url = Some(prop.value.clone()),
                "ATTENDEE" => event.attendees.push(Attendee::from_property(prop)),
                "RRULE" if event.rrule.is_none() => event.rrule = Some(prop.value.clone()),
                "EXDATE" => event.exdates.push(prop.clone()),
                "RDATE" => event.rdates.push(prop.clone()),
                _ => event.extra.push(prop.clone()),
            }
        }

        event.uid = uid.ok_or_else(|| WebcalError::Parse("VEVENT without UID".to_string()))?;
        event.start = start.ok_or_else(|| {
            WebcalError::Parse(format!("VEVENT {} without DTSTART", event.uid))
        })?;
        Ok(event)
    }

    /// Render back to a `VEVENT` component.
    pub fn to_component(&self) -> Component {
        let mut component = Component::new("VEVENT");
        let props = &mut component.properties;
        props.push(Property::new("UID", self.uid.clone()));
        props.push(self.start.clone());
        if let Some(end) = &self.end {
            props.push(end.clone());
        }
        let texts = [
            ("SUMMARY", &self.summary),
            ("DESCRIPTION", &self.description),
            ("LOCATION", &self.location),
        ];
        for (name, value) in texts {
            if let Some(value) = value {
                props.push(Property::new(name, escape_text(value)));
            }
        }
        if let Some(url) = &self.url {
            props.push(Property::new("URL", url.clone()));
        }
        if let Some(rule) = &self.rrule {
            props.push(Property::new("RRULE", rule.clone()));
        }
        props.extend(self.exdates.iter().cloned());
        props.extend(self.rdates.iter().cloned());
        props.extend(self.attendees.iter().map(Attendee::to_property));
        props.extend(self.extra.iter().cloned());
        component.components = self.components.clone();
        component
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) {
        self.summary = Some(summary.into());
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn set_location(&mut self, location: impl Into<String>) {
        self.location = Some(location.into());
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }

    pub fn attendees(&self) -> &[Attendee] {
        &self.attendees
    }

    pub fn set_attendees(&mut self, attendees: Vec<Attendee>) {
        self.attendees = attendees;
    }

    /// Look up an overflow property (anything without a typed accessor).
    pub fn extra_property(&self, name: &str) -> Option<&Property> {
        self.extra.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Resolved `DTSTART`.
    ///
    /// # Errors
    ///
    /// Propagates [`resolve`] failures, notably
    /// [`WebcalError::AmbiguousTimezone`].
    pub fn start(&self, zones: &TimezoneTable) -> Result<EventTime> {
        time_of(&self.start, zones)
    }

    pub fn set_start(&mut self, start: EventTime) {
        self.start = encode_time("DTSTART", start);
    }

    /// Resolved end: `DTEND`, else `DTSTART + DURATION`, else the start
    /// itself (a date-only start ends the following day).
    ///
    /// # Errors
    ///
    /// Propagates resolution failures and malformed `DURATION` values.
    pub fn end(&self, zones: &TimezoneTable) -> Result<EventTime> {
        if let Some(end) = &self.end {
            return time_of(end, zones);
        }
        let start = self.start(zones)?;
        match self.extra_property("DURATION") {
            Some(prop) => {
                let duration = parse_duration(&prop.value)?;
                let out_of_range = || {
                    WebcalError::InvalidDatetime(format!(
                        "{start} + DURATION '{}' is out of range",
                        prop.value
                    ))
                };
                match start {
                    EventTime::Date(date) if duration.num_seconds() % 86_400 == 0 => date
                        .checked_add_signed(duration)
                        .map(EventTime::Date)
                        .ok_or_else(out_of_range),
                    other => other
                        .instant()
                        .checked_add_signed(duration)
                        .map(EventTime::DateTime)
                        .ok_or_else(out_of_range),
                }
            }
            None => match start {
                EventTime::Date(date) => date.succ_opt().map(EventTime::Date).ok_or_else(|| {
                    WebcalError::InvalidDatetime(format!("no day after {date}"))
                }),
                other => Ok(other),
            },
        }
    }

    /// Set `DTEND`, dropping any `DURATION` it would contradict.
    pub fn set_end(&mut self, end: EventTime) {
        self.extra.retain(|p| !p.name.eq_ignore_ascii_case("DURATION"));
        self.end = Some(encode_time("DTEND", end));
    }

    /// The raw `RRULE` text, for diagnostics.
    pub fn rrule_str(&self) -> Option<&str> {
        self.rrule.as_deref()
    }

    /// Parse this event's recurrence, seeded with its start instant.
    ///
    /// An unparsable rule is reported as [`EventRecurrence::Unparsable`]
    /// rather than as an error, so one bad rule cannot break every query
    /// over the calendar.
    ///
    /// # Errors
    ///
    /// Only start/EXDATE/RDATE resolution failures are returned.
    pub fn rrule(&self, zones: &TimezoneTable) -> Result<EventRecurrence> {
        let Some(text) = self.rrule.as_deref() else {
            return Ok(EventRecurrence::None);
        };
        let seed = resolve(&self.start.value, self.start.param("TZID"), zones)?;
        let exdates = resolve_list(&self.exdates, zones)?;
        let rdates = resolve_list(&self.rdates, zones)?;

        match Recurrence::parse(text, seed, &exdates, &rdates) {
            Ok(rule) => Ok(EventRecurrence::Rule(rule)),
            Err(err) => {
                tracing::warn!(uid = %self.uid, rule = %text, error = %err, "ignoring unparsable RRULE");
                Ok(EventRecurrence::Unparsable {
                    rule: text.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }
}

fn time_of(prop: &Property, zones: &TimezoneTable) -> Result<EventTime> {
    let value = prop.value.trim();
    let is_date = prop
        .param("VALUE")
        .is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
        || value.len() == 8;
    if is_date {
        return parse_date(value).map(EventTime::Date);
    }
    resolve(value, prop.param("TZID"), zones).map(EventTime::DateTime)
}

fn encode_time(name: &str, time: EventTime) -> Property {
    match time {
        EventTime::Date(date) => {
            let mut prop = Property::new(name, format_date(&date));
            prop.set_param("VALUE", "DATE");
            prop
        }
        EventTime::DateTime(dt) => Property::new(name, format_utc(&dt)),
    }
}

/// Resolve every value of `EXDATE`/`RDATE`-style list properties.
fn resolve_list(props: &[Property], zones: &TimezoneTable) -> Result<Vec<DateTime<Utc>>> {
    let mut out = Vec::new();
    for prop in props {
        if prop.param("VALUE").is_some_and(|v| v.eq_ignore_ascii_case("PERIOD")) {
            continue;
        }
        for value in prop.value.split(',') {
            out.push(resolve(value, prop.param("TZID"), zones)?);
        }
    }
    Ok(out)
}

/// Parse an RFC 5545 `DURATION` such as `PT1H30M`, `P1D` or `-P2W`.
fn parse_duration(raw: &str) -> Result<TimeDelta> {
    let invalid = || WebcalError::InvalidDatetime(format!("invalid DURATION '{raw}'"));
    let s = raw.trim();
    let (sign, s) = match s.as_bytes().first() {
        Some(b'-') => (-1, &s[1..]),
        Some(b'+') => (1, &s[1..]),
        _ => (1, s),
    };
    let s = s.strip_prefix('P').ok_or_else(invalid)?;

    let mut seconds: i64 = 0;
    let mut digits = String::new();
    let mut in_time = false;
    let mut found_any = false;
    for ch in s.chars() {
        match ch {
            'T' if !in_time => in_time = true,
            '0'..='9' => digits.push(ch),
            unit => {
                let n: i64 = digits.parse().map_err(|_| invalid())?;
                digits.clear();
                found_any = true;
                let unit_seconds: i64 = match (unit, in_time) {
                    ('W', false) => 7 * 86_400,
                    ('D', false) => 86_400,
                    ('H', true) => 3_600,
                    ('M', true) => 60,
                    ('S', true) => 1,
                    _ => return Err(invalid()),
                };
                seconds = n
                    .checked_mul(unit_seconds)
                    .and_then(|part| seconds.checked_add(part))
                    .ok_or_else(invalid)?;
            }
        }
    }
    if !digits.is_empty() || !found_any {
        return Err(invalid());
    }
    TimeDelta::try_seconds(sign * seconds).ok_or_else(invalid)
}
