//! Error types for webcal-engine operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebcalError {
    #[error("No such event: {0}")]
    NoSuchEvent(String),

    #[error("Ambiguous timezone for {0}: no TZID and the calendar does not declare exactly one zone")]
    AmbiguousTimezone(String),

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Invalid datetime: {0}")]
    InvalidDatetime(String),

    #[error("Invalid RRULE: {0}")]
    InvalidRule(String),

    #[error("Calendar parse error: {0}")]
    Parse(String),

    #[error("Unknown calendar: {0}")]
    UnknownCalendar(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WebcalError>;
