use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use proptest::prelude::*;
use webcal_engine::{Attendee, CalendarDocument, EventTime};

const FESTIVALS: &str = include_str!("fixtures/festivals.ics");

const FIRST_UID: &str = "grape-festival-2010@concerts.example";
const LAST_UID: &str = "blind-guardian-gasometer@concerts.example";

fn festivals() -> CalendarDocument {
    CalendarDocument::parse(FESTIVALS).unwrap()
}

fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

// ── Document shape ──────────────────────────────────────────────────────────

#[test]
fn test_lists_all_events_and_zones() {
    let doc = festivals();
    assert_eq!(doc.event_ids().len(), 32);
    assert_eq!(doc.events().len(), 32);
    assert_eq!(doc.event_ids()[0], FIRST_UID);
    assert_eq!(doc.event_ids()[31], LAST_UID);
    assert_eq!(doc.timezone_ids(), vec!["Europe/Vienna"]);
    assert_eq!(doc.name().as_deref(), Some("Metal Concerts & Festivals"));
}

#[test]
fn test_first_and_last_event_fields() {
    let doc = festivals();
    let first = doc.event(FIRST_UID).unwrap();
    assert_eq!(first.summary(), Some("Grape Festival 2010"));
    assert_eq!(first.location(), Some("Letisko, Slovakia"));
    assert_eq!(
        first.start(doc.zones()).unwrap(),
        EventTime::DateTime(Utc.with_ymd_and_hms(2010, 8, 13, 0, 0, 0).unwrap())
    );

    let last = doc.event(LAST_UID).unwrap();
    assert_eq!(last.summary(), Some("Blind Guardian + Enforcer + more at Gasometer"));
    assert_eq!(last.location(), Some("Gasometer, Austria"));
    // 19:00 Vienna in December is 18:00 UTC.
    assert_eq!(
        last.start(doc.zones()).unwrap(),
        EventTime::DateTime(Utc.with_ymd_and_hms(2010, 12, 5, 18, 0, 0).unwrap())
    );
    assert_eq!(last.attendees().len(), 2);
    assert_eq!(last.attendees()[0].name.as_deref(), Some("Hansi Kuersch"));
}

// ── Queries ─────────────────────────────────────────────────────────────────

#[test]
fn test_query_counts() {
    let doc = festivals();
    assert_eq!(doc.events_before(utc(2010, 7, 10)).unwrap().len(), 0);
    assert_eq!(doc.events_before(utc(2010, 12, 7)).unwrap().len(), 32);
    assert_eq!(doc.events_before(utc(2010, 10, 3)).unwrap().len(), 12);
    assert_eq!(doc.events_between(utc(2010, 8, 20), utc(2010, 8, 24)).unwrap().len(), 0);
    assert_eq!(doc.events_between(utc(2010, 8, 12), utc(2010, 8, 24)).unwrap().len(), 2);
    assert_eq!(doc.events_after(utc(2010, 7, 10)).unwrap().len(), 32);
    assert_eq!(doc.events_after(utc(2010, 8, 20)).unwrap().len(), 26);
    assert_eq!(doc.events_after(utc(2010, 12, 7)).unwrap().len(), 0);
}

#[test]
fn test_results_keep_document_order() {
    let doc = festivals();
    let found = doc.events_before(utc(2010, 12, 7)).unwrap();
    let uids: Vec<&str> = found.iter().map(|o| o.event.uid()).collect();
    assert_eq!(uids, doc.event_ids());
}

#[test]
fn test_between_window_finds_first_two() {
    let doc = festivals();
    let found = doc.events_between(utc(2010, 8, 12), utc(2010, 8, 24)).unwrap();
    assert_eq!(found[0].event.summary(), Some("Grape Festival 2010"));
    assert_eq!(found[1].event.summary(), Some("Sodom + Destruction at Arena Wien"));
}

// ── Mutation ────────────────────────────────────────────────────────────────

#[test]
fn test_moving_end_by_one_hour() {
    let mut doc = festivals();
    let zones = doc.zones().clone();
    let event = doc.event_mut(FIRST_UID).unwrap();
    let end = event.end(&zones).unwrap();
    event.set_end(EventTime::DateTime(end.instant() + TimeDelta::hours(1)));
    assert_eq!(
        doc.event(FIRST_UID).unwrap().end(doc.zones()).unwrap(),
        EventTime::DateTime(Utc.with_ymd_and_hms(2010, 8, 15, 0, 59, 0).unwrap())
    );
}

#[test]
fn test_setters_survive_serialization() {
    let mut doc = festivals();
    let event = doc.event_mut(LAST_UID).unwrap();
    event.set_summary("Testing sum");
    event.set_description("Doors at 18:00, show at 19:00; no re-entry");
    event.set_location("Letisko, Slovakia");
    event.set_url("http://concerts.example/moved");
    let mut guest = Attendee::new("mailto:guest@example.com");
    guest.rsvp_request = Some(true);
    event.set_attendees(vec![guest.clone()]);

    let reparsed = CalendarDocument::parse(&doc.serialize()).unwrap();
    let event = reparsed.event(LAST_UID).unwrap();
    assert_eq!(event.summary(), Some("Testing sum"));
    assert_eq!(event.description(), Some("Doors at 18:00, show at 19:00; no re-entry"));
    assert_eq!(event.location(), Some("Letisko, Slovakia"));
    assert_eq!(event.url(), Some("http://concerts.example/moved"));
    assert_eq!(event.attendees(), &[guest]);
    assert_eq!(reparsed.events().len(), 32);
}

#[test]
fn test_serialize_is_lossless() {
    let doc = festivals();
    let text = doc.serialize();
    assert!(text.contains("BEGIN:VALARM\r\n"));
    assert!(text.contains("X-TICKET-STATUS:SOLD-OUT\r\n"));
    assert!(text.contains("BEGIN:VTODO\r\n"));
    assert_eq!(CalendarDocument::parse(&text).unwrap(), doc);
}

// ── Recurrence through the document ─────────────────────────────────────────

const WEEKLY_JAM: &str = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:jam@concerts.example\r\n\
DTSTART:20100806T180000Z\r\n\
RRULE:FREQ=WEEKLY;UNTIL=20101231\r\n\
EXDATE:20100820T180000Z\r\n\
SUMMARY:Friday jam session\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

#[test]
fn test_recurring_event_appears_once_with_nearest_occurrence() {
    let doc = CalendarDocument::parse(WEEKLY_JAM).unwrap();

    let after = doc.events_after(utc(2010, 8, 14)).unwrap();
    assert_eq!(after.len(), 1);
    // 08-20 is excluded.
    assert_eq!(
        after[0].start,
        EventTime::DateTime(Utc.with_ymd_and_hms(2010, 8, 27, 18, 0, 0).unwrap())
    );

    let before = doc.events_before(utc(2010, 8, 22)).unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(
        before[0].start,
        EventTime::DateTime(Utc.with_ymd_and_hms(2010, 8, 13, 18, 0, 0).unwrap())
    );

    assert!(doc.events_after(utc(2011, 1, 1)).unwrap().is_empty());
    assert!(doc.events_before(utc(2010, 8, 1)).unwrap().is_empty());
}

proptest! {
    #[test]
    fn prop_event_at_bound_is_both_before_and_after(secs in 0i64..(365 * 24 * 3600)) {
        let at = utc(2010, 1, 1) + TimeDelta::seconds(secs);
        let text = format!(
            "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:p\r\nDTSTART:{}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
            at.format("%Y%m%dT%H%M%SZ")
        );
        let doc = CalendarDocument::parse(&text).unwrap();
        prop_assert_eq!(doc.events_before(at).unwrap().len(), 1);
        prop_assert_eq!(doc.events_after(at).unwrap().len(), 1);
        prop_assert_eq!(doc.events_between(at, at).unwrap().len(), 1);
        prop_assert_eq!(doc.events_after(at + TimeDelta::seconds(1)).unwrap().len(), 0);
    }
}
