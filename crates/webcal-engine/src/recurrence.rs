//! Recurrence rules (`RRULE` + `EXDATE` + `RDATE`) over UTC instants.
//!
//! Expansion is delegated to the `rrule` crate's lazy iterator; window
//! bounds are checked here, so `before`/`after`/`between` have exact
//! inclusive or exclusive semantics.

use std::collections::HashSet;
use std::ops::ControlFlow;

use chrono::{DateTime, Utc};
use rrule::RRuleSet;

use crate::error::{Result, WebcalError};
use crate::timezone::format_utc;

/// An expanded recurrence, seeded at the event's start instant.
#[derive(Debug, Clone)]
pub struct Recurrence {
    set: RRuleSet,
    exdates: HashSet<DateTime<Utc>>,
    rdates: Vec<DateTime<Utc>>,
}

/// What an event's `RRULE` turned out to be.
#[derive(Debug, Clone)]
pub enum EventRecurrence {
    /// No `RRULE`: a single occurrence.
    None,
    Rule(Recurrence),
    /// The rule text could not be parsed; queries treat the event as
    /// non-recurring.
    Unparsable { rule: String, reason: String },
}

impl EventRecurrence {
    pub fn rule(&self) -> Option<&Recurrence> {
        match self {
            Self::Rule(rule) => Some(rule),
            _ => None,
        }
    }
}

impl Recurrence {
    /// Parse `rule` (the `RRULE` value) seeded at `start`.
    ///
    /// A date-only or floating `UNTIL` is normalized to UTC first, since
    /// the seed is always a UTC instant.
    ///
    /// # Errors
    ///
    /// Returns [`WebcalError::InvalidRule`] if the rule does not parse or
    /// validate.
    pub fn parse(
        rule: &str,
        start: DateTime<Utc>,
        exdates: &[DateTime<Utc>],
        rdates: &[DateTime<Utc>],
    ) -> Result<Self> {
        let text = format!("DTSTART:{}\nRRULE:{}", format_utc(&start), normalize_until(rule));
        let set = text
            .parse::<RRuleSet>()
            .map_err(|e| WebcalError::InvalidRule(format!("'{rule}': {e}")))?;
        let exdates: HashSet<_> = exdates.iter().copied().collect();
        let rdates = rdates
            .iter()
            .copied()
            .filter(|d| !exdates.contains(d))
            .collect();
        Ok(Self {
            set,
            exdates,
            rdates,
        })
    }

    /// Latest occurrence before `t` (or at `t` when `inclusive`).
    pub fn before(&self, t: DateTime<Utc>, inclusive: bool) -> Option<DateTime<Utc>> {
        let keep = |d: &DateTime<Utc>| if inclusive { *d <= t } else { *d < t };
        let mut latest = self.rdates.iter().copied().filter(keep).max();
        self.scan(None, Some(t), |d| {
            if keep(&d) {
                latest = latest.max(Some(d));
            }
            ControlFlow::Continue(())
        });
        latest
    }

    /// Earliest occurrence after `t` (or at `t` when `inclusive`).
    pub fn after(&self, t: DateTime<Utc>, inclusive: bool) -> Option<DateTime<Utc>> {
        let keep = |d: &DateTime<Utc>| if inclusive { *d >= t } else { *d > t };
        let mut earliest = None;
        self.scan(Some(t), None, |d| {
            if keep(&d) {
                earliest = Some(d);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        let from_rdates = self.rdates.iter().copied().filter(keep).min();
        match (earliest, from_rdates) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Every occurrence in `[start, end]` (or `(start, end)`), ascending.
    pub fn between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        inclusive: bool,
    ) -> Vec<DateTime<Utc>> {
        let keep = |d: &DateTime<Utc>| {
            if inclusive {
                start <= *d && *d <= end
            } else {
                start < *d && *d < end
            }
        };
        let mut found: Vec<_> = self.rdates.iter().copied().filter(keep).collect();
        self.scan(Some(start), Some(end), |d| {
            if keep(&d) {
                found.push(d);
            }
            ControlFlow::Continue(())
        });
        found.sort_unstable();
        found.dedup();
        found
    }

    /// Walk rule occurrences (minus `EXDATE`s) in ascending order, starting
    /// at `from` and stopping after `to`, until `visit` breaks.
    ///
    /// The lazy iterator is consumed once, so the cost is linear in the
    /// number of occurrences up to `to` (or up to the first break).
    fn scan(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        mut visit: impl FnMut(DateTime<Utc>) -> ControlFlow<()>,
    ) {
        for date in &self.set {
            let date = date.with_timezone(&Utc);
            if to.is_some_and(|to| date > to) {
                return;
            }
            if from.is_some_and(|from| date < from) || self.exdates.contains(&date) {
                continue;
            }
            if visit(date).is_break() {
                return;
            }
        }
    }
}

/// Rewrite `UNTIL` so it is a UTC date-time: `UNTIL=20101231` becomes
/// `UNTIL=20101231T000000Z`, and a floating `UNTIL=20101231T120000` gets a
/// trailing `Z`.
pub(crate) fn normalize_until(rule: &str) -> String {
    rule.trim()
        .split(';')
        .map(|part| match part.split_once('=') {
            Some((key, value)) if key.trim().eq_ignore_ascii_case("UNTIL") => {
                let value = value.trim();
                if value.len() == 8 {
                    format!("UNTIL={value}T000000Z")
                } else if value.len() == 15 && !value.ends_with('Z') {
                    format!("UNTIL={value}Z")
                } else {
                    format!("UNTIL={value}")
                }
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::{Duration, Instant};

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn weekly() -> Recurrence {
        // Every Friday at 20:00Z from 2010-08-13, ten times.
        Recurrence::parse("FREQ=WEEKLY;COUNT=10", utc(2010, 8, 13, 20), &[], &[]).unwrap()
    }

    #[test]
    fn test_after_inclusive_and_exclusive() {
        let rule = weekly();
        assert_eq!(rule.after(utc(2010, 8, 20, 20), true), Some(utc(2010, 8, 20, 20)));
        assert_eq!(rule.after(utc(2010, 8, 20, 20), false), Some(utc(2010, 8, 27, 20)));
        assert_eq!(rule.after(utc(2010, 8, 1, 0), true), Some(utc(2010, 8, 13, 20)));
        assert_eq!(rule.after(utc(2011, 1, 1, 0), true), None);
    }

    #[test]
    fn test_before_inclusive_and_exclusive() {
        let rule = weekly();
        assert_eq!(rule.before(utc(2010, 8, 20, 20), true), Some(utc(2010, 8, 20, 20)));
        assert_eq!(rule.before(utc(2010, 8, 20, 20), false), Some(utc(2010, 8, 13, 20)));
        assert_eq!(rule.before(utc(2010, 8, 13, 19), true), None);
        // Last of the ten.
        assert_eq!(rule.before(utc(2011, 1, 1, 0), true), Some(utc(2010, 10, 15, 20)));
    }

    #[test]
    fn test_between_bounds() {
        let rule = weekly();
        let all = rule.between(utc(2010, 8, 20, 20), utc(2010, 9, 3, 20), true);
        assert_eq!(all, vec![utc(2010, 8, 20, 20), utc(2010, 8, 27, 20), utc(2010, 9, 3, 20)]);
        let inner = rule.between(utc(2010, 8, 20, 20), utc(2010, 9, 3, 20), false);
        assert_eq!(inner, vec![utc(2010, 8, 27, 20)]);
    }

    #[test]
    fn test_exdates_and_rdates() {
        let rule = Recurrence::parse(
            "FREQ=WEEKLY;COUNT=3",
            utc(2010, 8, 13, 20),
            &[utc(2010, 8, 20, 20)],
            &[utc(2010, 8, 22, 18)],
        )
        .unwrap();
        assert_eq!(rule.after(utc(2010, 8, 14, 0), true), Some(utc(2010, 8, 22, 18)));
        assert_eq!(
            rule.between(utc(2010, 8, 1, 0), utc(2010, 9, 1, 0), true),
            vec![utc(2010, 8, 13, 20), utc(2010, 8, 22, 18), utc(2010, 8, 27, 20)]
        );
    }

    #[test]
    fn test_long_rule_reaches_far_dates() {
        let rule = Recurrence::parse("FREQ=DAILY", utc(2000, 1, 1, 12), &[], &[]).unwrap();
        assert_eq!(rule.before(utc(2010, 8, 13, 0), true), Some(utc(2010, 8, 12, 12)));
        assert_eq!(rule.after(utc(2010, 8, 13, 0), true), Some(utc(2010, 8, 13, 12)));
    }

    #[test]
    fn test_before_on_long_hourly_rule_walks_once() {
        // ~26k occurrences between the seed and the query.
        let rule = Recurrence::parse("FREQ=HOURLY", utc(2000, 1, 1, 0), &[], &[]).unwrap();
        let started = Instant::now();
        assert_eq!(rule.before(utc(2003, 1, 1, 0), true), Some(utc(2003, 1, 1, 0)));
        assert_eq!(rule.before(utc(2003, 1, 1, 0), false), Some(utc(2002, 12, 31, 23)));
        assert_eq!(
            rule.between(utc(2002, 12, 31, 22), utc(2003, 1, 1, 0), true).len(),
            3
        );
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    }

    #[test]
    fn test_date_only_until_is_accepted() {
        let rule =
            Recurrence::parse("FREQ=DAILY;UNTIL=20100815", utc(2010, 8, 13, 0), &[], &[]).unwrap();
        assert_eq!(
            rule.between(utc(2010, 8, 1, 0), utc(2010, 9, 1, 0), true),
            vec![utc(2010, 8, 13, 0), utc(2010, 8, 14, 0), utc(2010, 8, 15, 0)]
        );
    }

    #[test]
    fn test_invalid_rule_is_error() {
        let err = Recurrence::parse("FREQ=SOMETIMES", utc(2010, 8, 13, 0), &[], &[]).unwrap_err();
        assert!(matches!(err, WebcalError::InvalidRule(_)));
    }

    #[test]
    fn test_normalize_until() {
        assert_eq!(normalize_until("FREQ=DAILY;UNTIL=20101231"), "FREQ=DAILY;UNTIL=20101231T000000Z");
        assert_eq!(
            normalize_until("FREQ=DAILY;UNTIL=20101231T120000"),
            "FREQ=DAILY;UNTIL=20101231T120000Z"
        );
        assert_eq!(
            normalize_until("FREQ=WEEKLY;UNTIL=20101231T120000Z;BYDAY=FR"),
            "FREQ=WEEKLY;UNTIL=20101231T120000Z;BYDAY=FR"
        );
        assert_eq!(normalize_until("FREQ=MONTHLY"), "FREQ=MONTHLY");
    }
}
