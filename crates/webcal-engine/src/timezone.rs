//! Timezone resolution for iCalendar date/time values.
//!
//! A [`TimezoneTable`] is built once per calendar from its `VTIMEZONE`
//! components. [`resolve`] then turns a raw `DTSTART`-style value plus an
//! optional `TZID` into a UTC instant:
//!
//! 1. `YYYYMMDDTHHMMSSZ` is already UTC; no lookup happens.
//! 2. An attached `TZID` is looked up in the table, falling back to the
//!    IANA database for zones the calendar references but never defines.
//! 3. Without a `TZID`, a calendar declaring exactly one zone uses it.
//! 4. Anything else is [`WebcalError::AmbiguousTimezone`].
//!
//! Date-only values (`YYYYMMDD`) are widened to midnight first. A date in a
//! calendar without any zone is a floating day and lands on UTC midnight.

use std::str::FromStr;

use chrono::{
    DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone,
    Utc,
};
use chrono_tz::Tz;
use indexmap::IndexMap;
use rrule::{RRule, RRuleSet, Unvalidated};

use crate::error::{Result, WebcalError};
use crate::ics::Component;

const DATE_FORMAT: &str = "%Y%m%d";
const LOCAL_FORMAT: &str = "%Y%m%dT%H%M%S";
const UTC_FORMAT: &str = "%Y%m%dT%H%M%SZ";

// ── Zone rules ──────────────────────────────────────────────────────────────

/// One `STANDARD` or `DAYLIGHT` block of a `VTIMEZONE`.
#[derive(Debug, Clone, PartialEq)]
pub struct Observance {
    /// Local wall-clock time of the first onset.
    pub dtstart: NaiveDateTime,
    pub offset_from: FixedOffset,
    pub offset_to: FixedOffset,
    /// Raw `RRULE` value for repeating onsets.
    pub rrule: Option<String>,
    pub rdates: Vec<NaiveDateTime>,
}

impl Observance {
    fn from_component(component: &Component, tzid: &str) -> Result<Self> {
        let missing = |prop: &str| {
            WebcalError::Parse(format!(
                "{} in VTIMEZONE {tzid} has no {prop}",
                component.name
            ))
        };

        let dtstart = component
            .property("DTSTART")
            .ok_or_else(|| missing("DTSTART"))?;
        let offset_to = component
            .property("TZOFFSETTO")
            .ok_or_else(|| missing("TZOFFSETTO"))?;
        let offset_to = parse_offset(&offset_to.value)?;
        let offset_from = match component.property("TZOFFSETFROM") {
            Some(prop) => parse_offset(&prop.value)?,
            None => offset_to,
        };

        let mut rdates = Vec::new();
        for prop in component.properties_named("RDATE") {
            for value in prop.value.split(',') {
                rdates.push(parse_local(value)?);
            }
        }

        let dtstart = parse_local(&dtstart.value)?;
        let rrule = component.property("RRULE").map(|p| p.value.clone());
        if let Some(rule) = &rrule {
            observance_rule(rule, dtstart).map_err(|reason| {
                WebcalError::Parse(format!(
                    "{} in VTIMEZONE {tzid} has an unusable RRULE '{rule}': {reason}",
                    component.name
                ))
            })?;
        }

        Ok(Self {
            dtstart,
            offset_from,
            offset_to,
            rrule,
            rdates,
        })
    }

    /// Latest onset at or before `local`, if this observance has started.
    fn latest_onset(&self, local: NaiveDateTime) -> Option<NaiveDateTime> {
        if self.dtstart > local {
            return None;
        }
        let mut latest = self.dtstart;
        if let Some(onset) = self
            .rrule
            .as_deref()
            .and_then(|rule| last_rule_onset(rule, self.dtstart, local))
        {
            latest = latest.max(onset);
        }
        for rdate in &self.rdates {
            if *rdate <= local && *rdate > latest {
                latest = *rdate;
            }
        }
        Some(latest)
    }
}

/// Build an observance rule on the wall-clock timeline (local times are
/// carried as UTC so no conversion happens).
fn observance_rule(rule: &str, dtstart: NaiveDateTime) -> std::result::Result<RRuleSet, String> {
    let seed = rrule::Tz::UTC.from_utc_datetime(&dtstart);
    rule.parse::<RRule<Unvalidated>>()
        .map_err(|e| e.to_string())?
        .build(seed)
        .map_err(|e| e.to_string())
}

/// Return the last onset of an observance rule not after `local`. The rule
/// was checked when the observance was built.
fn last_rule_onset(rule: &str, dtstart: NaiveDateTime, local: NaiveDateTime) -> Option<NaiveDateTime> {
    let set = observance_rule(rule, dtstart).ok()?;
    let bound = rrule::Tz::UTC.from_utc_datetime(&(local + TimeDelta::seconds(1)));
    set.before(bound)
        .all(u16::MAX)
        .dates
        .into_iter()
        .map(|d| d.naive_utc())
        .filter(|d| *d <= local)
        .last()
}

/// How a named zone turns local wall-clock time into UTC.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneRule {
    /// A zone from the IANA database.
    Iana(Tz),
    /// The observances embedded in a `VTIMEZONE`.
    Observances(Vec<Observance>),
}

impl ZoneRule {
    /// Build a rule from a `VTIMEZONE` component, returning its `TZID` too.
    ///
    /// Embedded observances win over the IANA database; a definition without
    /// any observance must name an IANA zone.
    ///
    /// # Errors
    ///
    /// Returns [`WebcalError::Parse`] when the `TZID` is missing or an
    /// observance is malformed.
    pub fn from_vtimezone(component: &Component) -> Result<(String, Self)> {
        let tzid = component
            .property("TZID")
            .map(|p| p.value.clone())
            .ok_or_else(|| WebcalError::Parse("VTIMEZONE without TZID".to_string()))?;

        let observances = component
            .components
            .iter()
            .filter(|c| c.name == "STANDARD" || c.name == "DAYLIGHT")
            .map(|c| Observance::from_component(c, &tzid))
            .collect::<Result<Vec<_>>>()?;

        if !observances.is_empty() {
            return Ok((tzid, Self::Observances(observances)));
        }
        let tz = parse_iana(&tzid).ok_or_else(|| {
            WebcalError::Parse(format!("VTIMEZONE {tzid} has no observances"))
        })?;
        Ok((tzid, Self::Iana(tz)))
    }

    /// Convert a local wall-clock time in this zone to UTC.
    ///
    /// Times inside a DST gap move forward one hour; times inside a fold
    /// take the earlier instant.
    ///
    /// # Errors
    ///
    /// Returns [`WebcalError::InvalidDatetime`] if the time cannot be placed
    /// even after the gap shift.
    pub fn to_utc(&self, local: NaiveDateTime) -> Result<DateTime<Utc>> {
        match self {
            Self::Iana(tz) => match tz.from_local_datetime(&local) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Ok(dt.with_timezone(&Utc)),
                LocalResult::None => tz
                    .from_local_datetime(&(local + TimeDelta::hours(1)))
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or_else(|| {
                        WebcalError::InvalidDatetime(format!("{local} does not exist in {tz}"))
                    }),
            },
            Self::Observances(observances) => {
                let offset = offset_for(observances, local).ok_or_else(|| {
                    WebcalError::InvalidDatetime(format!("no observance covers {local}"))
                })?;
                Ok(Utc.from_utc_datetime(&(local - TimeDelta::seconds(offset.local_minus_utc().into()))))
            }
        }
    }
}

fn offset_for(observances: &[Observance], local: NaiveDateTime) -> Option<FixedOffset> {
    let current = observances
        .iter()
        .filter_map(|obs| obs.latest_onset(local).map(|onset| (onset, obs)))
        .max_by_key(|(onset, _)| *onset);
    match current {
        Some((_, obs)) => Some(obs.offset_to),
        // Before the first onset the zone was on that onset's "from" offset.
        None => observances
            .iter()
            .min_by_key(|obs| obs.dtstart)
            .map(|obs| obs.offset_from),
    }
}

// ── Table ───────────────────────────────────────────────────────────────────

/// The zones one calendar declares, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimezoneTable {
    zones: IndexMap<String, ZoneRule>,
}

impl TimezoneTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table from a calendar's `VTIMEZONE` components.
    ///
    /// # Errors
    ///
    /// Propagates [`ZoneRule::from_vtimezone`] failures.
    pub fn from_components<'a>(components: impl IntoIterator<Item = &'a Component>) -> Result<Self> {
        let mut table = Self::new();
        for component in components {
            let (tzid, rule) = ZoneRule::from_vtimezone(component)?;
            table.insert(tzid, rule);
        }
        Ok(table)
    }

    pub fn insert(&mut self, tzid: impl Into<String>, rule: ZoneRule) {
        self.zones.insert(tzid.into(), rule);
    }

    pub fn get(&self, tzid: &str) -> Option<&ZoneRule> {
        self.zones.get(tzid)
    }

    /// Zone names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// The implicit zone of a calendar that declares exactly one.
    fn sole(&self) -> Option<&ZoneRule> {
        match self.zones.len() {
            1 => self.zones.values().next(),
            _ => None,
        }
    }
}

// ── Resolution ──────────────────────────────────────────────────────────────

/// Resolve a raw iCalendar date or date-time value to a UTC instant.
///
/// # Errors
///
/// - [`WebcalError::InvalidDatetime`] if `raw` is not a date or date-time.
/// - [`WebcalError::UnknownTimezone`] if `tzid` is neither declared nor an
///   IANA zone.
/// - [`WebcalError::AmbiguousTimezone`] if there is no `tzid` and the table
///   does not hold exactly one zone.
pub fn resolve(raw: &str, tzid: Option<&str>, table: &TimezoneTable) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.len() == 16 && raw.ends_with('Z') {
        return Ok(Utc.from_utc_datetime(&parse_local(&raw[..15])?));
    }

    let date_only = raw.len() == 8;
    let local = if date_only {
        parse_date(raw)?.and_time(NaiveTime::MIN)
    } else {
        parse_local(raw)?
    };

    if let Some(tzid) = tzid {
        return match table.get(tzid) {
            Some(rule) => rule.to_utc(local),
            None => parse_iana(tzid)
                .map(ZoneRule::Iana)
                .ok_or_else(|| WebcalError::UnknownTimezone(tzid.to_string()))?
                .to_utc(local),
        };
    }

    match table.sole() {
        Some(rule) => rule.to_utc(local),
        None if date_only && table.is_empty() => Ok(Utc.from_utc_datetime(&local)),
        None => Err(WebcalError::AmbiguousTimezone(raw.to_string())),
    }
}

/// Parse `YYYYMMDD`.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|e| WebcalError::InvalidDatetime(format!("'{raw}': {e}")))
}

/// Parse a local `YYYYMMDDTHHMMSS` (a trailing `Z` is tolerated and ignored).
pub fn parse_local(raw: &str) -> Result<NaiveDateTime> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix('Z').unwrap_or(trimmed);
    NaiveDateTime::parse_from_str(trimmed, LOCAL_FORMAT)
        .map_err(|e| WebcalError::InvalidDatetime(format!("'{raw}': {e}")))
}

pub fn format_utc(dt: &DateTime<Utc>) -> String {
    dt.format(UTC_FORMAT).to_string()
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a `TZOFFSETTO`-style offset: `+HHMM` or `+HHMMSS`.
fn parse_offset(raw: &str) -> Result<FixedOffset> {
    let s = raw.trim();
    let invalid = || WebcalError::InvalidDatetime(format!("invalid UTC offset '{raw}'"));
    let (sign, digits) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(invalid()),
    };
    if !(digits.len() == 4 || digits.len() == 6) || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let field = |range: std::ops::Range<usize>| digits.get(range).and_then(|d| d.parse::<i32>().ok());
    let hours = field(0..2).ok_or_else(invalid)?;
    let minutes = field(2..4).ok_or_else(invalid)?;
    let seconds = field(4..6).unwrap_or(0);
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60 + seconds)).ok_or_else(invalid)
}

/// Look a TZID up in the IANA database, tolerating common vendor spellings.
fn parse_iana(tzid: &str) -> Option<Tz> {
    Tz::from_str(normalize_tzid(tzid)).ok()
}

fn normalize_tzid(tzid: &str) -> &str {
    let tzid = tzid
        .strip_prefix("/mozilla.org/20050126_1/")
        .or_else(|| tzid.strip_prefix("/mozilla.org/"))
        .or_else(|| tzid.strip_prefix("/softwarestudio.org/Olson_20011030_5/"))
        .or_else(|| tzid.strip_prefix("/softwarestudio.org/"))
        .unwrap_or(tzid);
    match tzid {
        "Eastern Standard Time" => "America/New_York",
        "Central Standard Time" => "America/Chicago",
        "Mountain Standard Time" => "America/Denver",
        "Pacific Standard Time" => "America/Los_Angeles",
        "W. Europe Standard Time" => "Europe/Berlin",
        "Central Europe Standard Time" => "Europe/Budapest",
        "GMT Standard Time" => "Europe/London",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ics::parse_components;

    const VIENNA: &str = "BEGIN:VTIMEZONE\r\n\
TZID:Vienna Local\r\n\
BEGIN:DAYLIGHT\r\n\
TZOFFSETFROM:+0100\r\n\
TZOFFSETTO:+0200\r\n\
DTSTART:19700329T020000\r\n\
RRULE:FREQ=YEARLY;BYMONTH=3;BYDAY=-1SU\r\n\
END:DAYLIGHT\r\n\
BEGIN:STANDARD\r\n\
TZOFFSETFROM:+0200\r\n\
TZOFFSETTO:+0100\r\n\
DTSTART:19701025T030000\r\n\
RRULE:FREQ=YEARLY;BYMONTH=10;BYDAY=-1SU\r\n\
END:STANDARD\r\n\
END:VTIMEZONE\r\n";

    fn vienna_table() -> TimezoneTable {
        let components = parse_components(VIENNA).unwrap();
        TimezoneTable::from_components(&components).unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_bare_utc_skips_lookup() {
        // Even a bogus TZID is ignored for the Z form.
        let dt = resolve("20100813T000000Z", Some("Nowhere/Land"), &TimezoneTable::new()).unwrap();
        assert_eq!(dt, utc(2010, 8, 13, 0, 0));
    }

    #[test]
    fn test_embedded_observances_summer_and_winter() {
        let table = vienna_table();
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["Vienna Local"]);

        let summer = resolve("20100905T200000", Some("Vienna Local"), &table).unwrap();
        assert_eq!(summer, utc(2010, 9, 5, 18, 0));

        let winter = resolve("20101128T200000", Some("Vienna Local"), &table).unwrap();
        assert_eq!(winter, utc(2010, 11, 28, 19, 0));
    }

    #[test]
    fn test_observance_switches_on_last_sunday() {
        let table = vienna_table();
        // 2010-10-31 is the last Sunday of October: 03:00 local switches back.
        let before = resolve("20101030T120000", None, &table).unwrap();
        assert_eq!(before, utc(2010, 10, 30, 10, 0));
        let after = resolve("20101031T120000", None, &table).unwrap();
        assert_eq!(after, utc(2010, 10, 31, 11, 0));
    }

    #[test]
    fn test_before_first_onset_uses_offset_from() {
        let table = vienna_table();
        // Earliest observance is DAYLIGHT 1970-03-29 with TZOFFSETFROM +0100.
        let dt = resolve("19600101T120000", None, &table).unwrap();
        assert_eq!(dt, utc(1960, 1, 1, 11, 0));
    }

    #[test]
    fn test_undeclared_iana_tzid_resolves() {
        let dt = resolve("20260715T100000", Some("America/New_York"), &TimezoneTable::new()).unwrap();
        assert_eq!(dt, utc(2026, 7, 15, 14, 0));
    }

    #[test]
    fn test_mozilla_prefixed_tzid_resolves() {
        let dt = resolve(
            "20260115T100000",
            Some("/mozilla.org/20050126_1/America/New_York"),
            &TimezoneTable::new(),
        )
        .unwrap();
        assert_eq!(dt, utc(2026, 1, 15, 15, 0));
    }

    #[test]
    fn test_unknown_tzid_is_error() {
        let err = resolve("20260115T100000", Some("Mars/Olympus"), &TimezoneTable::new()).unwrap_err();
        assert!(matches!(err, WebcalError::UnknownTimezone(ref z) if z == "Mars/Olympus"));
    }

    #[test]
    fn test_floating_time_without_zones_is_ambiguous() {
        let err = resolve("20100813T000000", None, &TimezoneTable::new()).unwrap_err();
        assert!(matches!(err, WebcalError::AmbiguousTimezone(_)));
    }

    #[test]
    fn test_floating_time_with_several_zones_is_ambiguous() {
        let mut table = vienna_table();
        table.insert("Asia/Tokyo", ZoneRule::Iana(Tz::Asia__Tokyo));
        let err = resolve("20100813T000000", None, &table).unwrap_err();
        assert!(matches!(err, WebcalError::AmbiguousTimezone(_)));
        // Dates are ambiguous too once several zones compete.
        assert!(resolve("20100813", None, &table).is_err());
    }

    #[test]
    fn test_date_only_widens_to_midnight() {
        let floating = resolve("20100905", None, &TimezoneTable::new()).unwrap();
        assert_eq!(floating, utc(2010, 9, 5, 0, 0));

        let vienna = resolve("20100905", None, &vienna_table()).unwrap();
        assert_eq!(vienna, utc(2010, 9, 4, 22, 0));
    }

    #[test]
    fn test_dst_gap_shifts_forward() {
        let mut table = TimezoneTable::new();
        table.insert("US", ZoneRule::Iana(Tz::America__New_York));
        // 2026-03-08 02:30 does not exist in New York; 03:30 EDT does.
        let dt = resolve("20260308T023000", None, &table).unwrap();
        assert_eq!(dt, utc(2026, 3, 8, 7, 30));
    }

    #[test]
    fn test_vtimezone_without_observances_falls_back_to_iana() {
        let text = "BEGIN:VTIMEZONE\r\nTZID:Europe/Bratislava\r\nEND:VTIMEZONE\r\n";
        let components = parse_components(text).unwrap();
        let (tzid, rule) = ZoneRule::from_vtimezone(&components[0]).unwrap();
        assert_eq!(tzid, "Europe/Bratislava");
        assert_eq!(rule, ZoneRule::Iana(Tz::Europe__Bratislava));
    }

    #[test]
    fn test_malformed_observance_rule_is_error() {
        let text = VIENNA.replace("RRULE:FREQ=YEARLY;BYMONTH=3;BYDAY=-1SU", "RRULE:FREQ=YEARLY;BYMONTH=13");
        let components = parse_components(&text).unwrap();
        let err = ZoneRule::from_vtimezone(&components[0]).unwrap_err();
        assert!(matches!(err, WebcalError::Parse(_)));
        assert!(err.to_string().contains("Vienna Local"), "got: {err}");
    }

    #[test]
    fn test_outlook_style_1601_observances() {
        let text = VIENNA
            .replace("19700329T020000", "16010325T020000")
            .replace("19701025T030000", "16011028T030000");
        let table = TimezoneTable::from_components(&parse_components(&text).unwrap()).unwrap();
        let summer = resolve("20100905T200000", None, &table).unwrap();
        assert_eq!(summer, utc(2010, 9, 5, 18, 0));
        let winter = resolve("20101128T200000", None, &table).unwrap();
        assert_eq!(winter, utc(2010, 11, 28, 19, 0));
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(resolve("2010-08-13", None, &TimezoneTable::new()).is_err());
        assert!(parse_offset("0100").is_err());
        assert!(parse_offset("+01").is_err());
        assert_eq!(parse_offset("-0530").unwrap().local_minus_utc(), -(5 * 3600 + 30 * 60));
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_utc(&utc(2010, 8, 15, 0, 59)), "20100815T005900Z");
        assert_eq!(
            format_date(&NaiveDate::from_ymd_opt(2010, 9, 5).unwrap()),
            "20100905"
        );
    }
}
