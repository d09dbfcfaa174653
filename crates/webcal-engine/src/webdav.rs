//! WebDAV transport: `PROPFIND` listings and `GET` downloads over HTTP(S).

use std::time::Duration;

use chrono::{DateTime, Utc};
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;

use crate::error::{Result, WebcalError};
use crate::source::{CalendarId, CalendarTransport, RemoteCalendar, SourceConfig, Target};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:getlastmodified/>
    <D:resourcetype/>
  </D:prop>
</D:propfind>"#;

const TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to one WebDAV URL. Basic auth is sent only when both a username
/// and a password are configured.
#[derive(Debug)]
pub struct WebDavTransport {
    url: String,
    username: Option<String>,
    password: Option<String>,
    client: Option<Client>,
}

impl WebDavTransport {
    pub fn new(url: impl Into<String>, username: Option<String>, password: Option<String>) -> Self {
        Self {
            url: url.into(),
            username,
            password,
            client: None,
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(config.url.clone(), config.username.clone(), config.password.clone())
    }

    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| WebcalError::Transport("not connected".to_string()))?;
        let builder = client.request(method, url);
        Ok(match (&self.username, &self.password) {
            (Some(user), Some(password)) => builder.basic_auth(user, Some(password)),
            _ => builder,
        })
    }

    fn member_url(&self, name: &str) -> String {
        if self.url.ends_with('/') {
            format!("{}{name}", self.url)
        } else {
            format!("{}/{name}", self.url)
        }
    }
}

impl CalendarTransport for WebDavTransport {
    fn connect(&mut self) -> Result<()> {
        let client = Client::builder()
            .timeout(TIMEOUT)
            .user_agent(concat!("webcal/", env!("CARGO_PKG_VERSION")))
            .build()?;
        self.client = Some(client);
        tracing::debug!(url = %self.url, "webdav session ready");
        Ok(())
    }

    fn target(&self) -> Target {
        Target::from_url(&self.url)
    }

    fn list(&mut self) -> Result<Vec<RemoteCalendar>> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| WebcalError::Transport(e.to_string()))?;
        let response = self
            .request(method, &self.url)?
            .header("Depth", "1")
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebcalError::Transport(format!(
                "PROPFIND {} returned {status}",
                self.url
            )));
        }
        let body = response.bytes()?;

        let mut calendars = Vec::new();
        for entry in parse_multistatus(&body)? {
            if entry.is_collection || entry.href.ends_with('/') {
                continue;
            }
            let Some(id) = entry.href.rsplit('/').next().filter(|s| !s.is_empty()) else {
                continue;
            };
            let last_modified = entry.last_modified.unwrap_or_else(|| {
                tracing::warn!(href = %entry.href, "no getlastmodified; forcing refresh");
                Utc::now()
            });
            calendars.push(RemoteCalendar {
                id: id.to_string(),
                last_modified,
            });
        }
        Ok(calendars)
    }

    fn download(&mut self, id: &CalendarId) -> Result<Vec<u8>> {
        let url = match id {
            CalendarId::Resource => self.url.clone(),
            CalendarId::Member(name) => self.member_url(name),
        };
        let response = self.request(Method::GET, &url)?.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebcalError::Transport(format!("GET {url} returned {status}")));
        }
        Ok(response.bytes()?.to_vec())
    }
}

// ── Multistatus parsing ─────────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct DavEntry {
    pub href: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub is_collection: bool,
}

/// Pull `href`, `getlastmodified` and collection-ness out of each
/// `<D:response>` of a `207 Multi-Status` body. Namespace prefixes are
/// ignored; character and predefined entity references are resolved.
pub(crate) fn parse_multistatus(xml: &[u8]) -> Result<Vec<DavEntry>> {
    let mut reader = Reader::from_reader(xml);

    let mut buf = Vec::new();
    let mut entries = Vec::new();
    let mut current: Option<DavEntry> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                match local_name(e.local_name().as_ref())?.as_str() {
                    "response" => current = Some(DavEntry::default()),
                    "collection" => mark_collection(&mut current),
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                if local_name(e.local_name().as_ref())? == "collection" {
                    mark_collection(&mut current);
                }
            }
            Ok(Event::Text(e)) => {
                text.push_str(&e.decode().map_err(xml_error)?);
            }
            Ok(Event::GeneralRef(e)) => match e.resolve_char_ref().map_err(xml_error)? {
                Some(ch) => text.push(ch),
                None => {
                    let name = e.decode().map_err(xml_error)?;
                    let resolved = resolve_xml_entity(&name).ok_or_else(|| {
                        WebcalError::Transport(format!("unknown entity &{name}; in multistatus"))
                    })?;
                    text.push_str(resolved);
                }
            },
            Ok(Event::End(e)) => {
                let name = local_name(e.local_name().as_ref())?;
                if let Some(entry) = current.as_mut() {
                    match name.as_str() {
                        "href" => entry.href.push_str(text.trim()),
                        "getlastmodified" => {
                            entry.last_modified = DateTime::parse_from_rfc2822(text.trim())
                                .map(|dt| dt.with_timezone(&Utc))
                                .ok();
                        }
                        _ => {}
                    }
                }
                if name == "response" {
                    entries.extend(current.take());
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(entries)
}

fn xml_error(err: impl std::fmt::Display) -> WebcalError {
    WebcalError::Transport(format!("bad multistatus: {err}"))
}

fn local_name(raw: &[u8]) -> Result<String> {
    std::str::from_utf8(raw)
        .map(str::to_ascii_lowercase)
        .map_err(|e| WebcalError::Transport(format!("non-UTF-8 element name: {e}")))
}

fn mark_collection(current: &mut Option<DavEntry>) {
    if let Some(entry) = current.as_mut() {
        entry.is_collection = true;
    }
}
