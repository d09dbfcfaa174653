//! Temporal queries over a [`CalendarDocument`].
//!
//! Each query returns at most one [`Occurrence`] per event, in document
//! order:
//!
//! - a single-occurrence event matches on its start, compared at the
//!   start's granularity (a date-only start only sees the date of the
//!   query instant);
//! - a recurring event contributes its nearest occurrence on the queried
//!   side of the bound, with inclusive bounds.
//!
//! An event whose `RRULE` cannot be parsed is treated as single-occurrence.

use chrono::{DateTime, Utc};

use crate::document::CalendarDocument;
use crate::error::Result;
use crate::event::{Event, EventTime};
use crate::recurrence::Recurrence;

/// An event paired with the start of the occurrence that matched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Occurrence<'a> {
    pub start: EventTime,
    pub event: &'a Event,
}

impl CalendarDocument {
    /// Events starting at or before `t`.
    ///
    /// Recurring events yield their latest occurrence at or before `t`.
    ///
    /// # Errors
    ///
    /// Propagates start-time resolution failures (e.g. an ambiguous
    /// floating time).
    pub fn events_before(&self, t: DateTime<Utc>) -> Result<Vec<Occurrence<'_>>> {
        self.select(
            |start| start.cmp_at_granularity(&t).is_le(),
            |rule| rule.before(t, true),
        )
    }

    /// Events starting at or after `t`.
    ///
    /// Recurring events yield their earliest occurrence at or after `t`.
    ///
    /// # Errors
    ///
    /// Propagates start-time resolution failures.
    pub fn events_after(&self, t: DateTime<Utc>) -> Result<Vec<Occurrence<'_>>> {
        self.select(
            |start| start.cmp_at_granularity(&t).is_ge(),
            |rule| rule.after(t, true),
        )
    }

    /// Events starting within `[start, end]`.
    ///
    /// Recurring events yield their first occurrence inside the window.
    ///
    /// # Errors
    ///
    /// Propagates start-time resolution failures.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use webcal_engine::CalendarDocument;
    ///
    /// let doc = CalendarDocument::parse(
    ///     "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:grape\r\n\
    ///      DTSTART:20100813T000000Z\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
    /// )
    /// .unwrap();
    /// let from = Utc.with_ymd_and_hms(2010, 8, 12, 0, 0, 0).unwrap();
    /// let to = Utc.with_ymd_and_hms(2010, 8, 24, 0, 0, 0).unwrap();
    /// let found = doc.events_between(from, to).unwrap();
    /// assert_eq!(found[0].event.uid(), "grape");
    /// ```
    pub fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Occurrence<'_>>> {
        self.select(
            |at| at.cmp_at_granularity(&start).is_ge() && at.cmp_at_granularity(&end).is_le(),
            |rule| rule.between(start, end, true).into_iter().next(),
        )
    }

    fn select<'a>(
        &'a self,
        single: impl Fn(EventTime) -> bool,
        recurring: impl Fn(&Recurrence) -> Option<DateTime<Utc>>,
    ) -> Result<Vec<Occurrence<'a>>> {
        let zones = self.zones();
        let mut found = Vec::new();
        for event in self.events() {
            let recurrence = event.rrule(zones)?;
            match recurrence.rule() {
                Some(rule) => {
                    if let Some(at) = recurring(rule) {
                        found.push(Occurrence {
                            start: EventTime::DateTime(at),
                            event,
                        });
                    }
                }
                // No rule, or one that did not parse: a single occurrence.
                None => {
                    let start = event.start(zones)?;
                    if single(start) {
                        found.push(Occurrence { start, event });
                    }
                }
            }
        }
        tracing::trace!(matched = found.len(), "temporal query");
        Ok(found)
    }
}

/// Order occurrences by start; ties keep their document order.
pub fn sort_occurrences(occurrences: &mut [Occurrence<'_>]) {
    occurrences.sort_by_key(|o| o.start);
}
