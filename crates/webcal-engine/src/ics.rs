//! iCalendar (RFC 5545) content-line codec.
//!
//! Turns calendar text into a tree of [`Component`]s holding raw
//! [`Property`] values, and serializes that tree back. Value typing
//! (dates, text escaping, recurrence rules) is left to the callers that
//! know which property they are looking at.
//!
//! Parsing is lenient about line endings (CRLF or bare LF) and about the
//! case of names, which are normalized to upper case. Serialization always
//! emits CRLF and folds lines at 75 octets.

use crate::error::{Result, WebcalError};

/// Maximum octets per physical line (RFC 5545 §3.1), excluding CRLF.
const FOLD_WIDTH: usize = 75;

// ── Data model ──────────────────────────────────────────────────────────────

/// A property parameter such as `TZID=Europe/Vienna` or `MEMBER="a","b"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub values: Vec<String>,
}

/// One content line: `NAME;PARAM=value:VALUE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub params: Vec<Param>,
    /// Raw value text, still escaped.
    pub value: String,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_uppercase(),
            params: Vec::new(),
            value: value.into(),
        }
    }

    /// First value of the named parameter, if present.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .and_then(|p| p.values.first())
            .map(String::as_str)
    }

    /// Replace (or add) a single-valued parameter.
    pub fn set_param(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .params
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(name))
        {
            Some(p) => p.values = vec![value],
            None => self.params.push(Param {
                name: name.to_ascii_uppercase(),
                values: vec![value],
            }),
        }
    }

    /// Render as an unfolded content line (no line terminator).
    pub fn to_line(&self) -> String {
        let mut line = self.name.clone();
        for param in &self.params {
            line.push(';');
            line.push_str(&param.name);
            line.push('=');
            let rendered: Vec<String> = param.values.iter().map(|v| quote_param(v)).collect();
            line.push_str(&rendered.join(","));
        }
        line.push(':');
        line.push_str(&self.value);
        line
    }
}

/// A `BEGIN:NAME` ... `END:NAME` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub properties: Vec<Property>,
    pub components: Vec<Component>,
}

impl Component {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_uppercase(),
            properties: Vec::new(),
            components: Vec::new(),
        }
    }

    /// First property with the given name.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// All properties with the given name, in order.
    pub fn properties_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Property> {
        self.properties
            .iter()
            .filter(move |p| p.name.eq_ignore_ascii_case(name))
    }

    /// Direct sub-components with the given name, in order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Component> {
        self.components
            .iter()
            .filter(move |c| c.name.eq_ignore_ascii_case(name))
    }

    /// Serialize this component (and its children) as folded CRLF text.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        self.write_into(&mut out);
        out
    }

    fn write_into(&self, out: &mut String) {
        push_line(out, &format!("BEGIN:{}", self.name));
        for prop in &self.properties {
            push_line(out, &prop.to_line());
        }
        for child in &self.components {
            child.write_into(out);
        }
        push_line(out, &format!("END:{}", self.name));
    }
}

// ── Parsing ─────────────────────────────────────────────────────────────────

/// Parse calendar text into its top-level components (normally a single
/// `VCALENDAR`).
///
/// # Errors
///
/// Returns [`WebcalError::Parse`] for malformed content lines, properties
/// outside any component, and unbalanced `BEGIN`/`END` pairs.
pub fn parse_components(input: &str) -> Result<Vec<Component>> {
    let mut stack: Vec<Component> = Vec::new();
    let mut roots = Vec::new();

    for (line_num, line) in unfold(input) {
        let prop = parse_content_line(&line, line_num)?;
        match prop.name.as_str() {
            "BEGIN" => stack.push(Component::new(prop.value.trim())),
            "END" => {
                let name = prop.value.trim().to_ascii_uppercase();
                let done = stack.pop().ok_or_else(|| {
                    WebcalError::Parse(format!("line {line_num}: END:{name} without BEGIN"))
                })?;
                if done.name != name {
                    return Err(WebcalError::Parse(format!(
                        "line {line_num}: END:{name} closes BEGIN:{}",
                        done.name
                    )));
                }
                match stack.last_mut() {
                    Some(parent) => parent.components.push(done),
                    None => roots.push(done),
                }
            }
            _ => match stack.last_mut() {
                Some(current) => current.properties.push(prop),
                None => {
                    return Err(WebcalError::Parse(format!(
                        "line {line_num}: property {} outside any component",
                        prop.name
                    )));
                }
            },
        }
    }

    if let Some(open) = stack.last() {
        return Err(WebcalError::Parse(format!(
            "unterminated BEGIN:{}",
            open.name
        )));
    }
    Ok(roots)
}

/// Split input into logical content lines, merging folded continuations.
///
/// Returns `(first physical line number, logical line)` pairs. Blank lines
/// are skipped. A continuation drops exactly one leading SPACE or HTAB.
pub fn unfold(input: &str) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();

    for (i, raw) in input.split('\n').enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix([' ', '\t']) {
            match lines.last_mut() {
                Some((_, prev)) => prev.push_str(rest),
                None => lines.push((i + 1, rest.to_string())),
            }
        } else {
            lines.push((i + 1, line.to_string()));
        }
    }

    lines
}

/// Parse one unfolded content line: `name *(";" param) ":" value`.
fn parse_content_line(line: &str, line_num: usize) -> Result<Property> {
    let colon = find_unquoted(line, ':').ok_or_else(|| {
        WebcalError::Parse(format!("line {line_num}: missing ':' in {line:?}"))
    })?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);

    let mut parts = split_unquoted(head, ';').into_iter();
    let name = parts.next().unwrap_or_default().trim();
    if name.is_empty() {
        return Err(WebcalError::Parse(format!(
            "line {line_num}: empty property name"
        )));
    }

    let mut params = Vec::new();
    for part in parts {
        let (pname, pvalues) = part.split_once('=').ok_or_else(|| {
            WebcalError::Parse(format!("line {line_num}: parameter without '=': {part:?}"))
        })?;
        params.push(Param {
            name: pname.trim().to_ascii_uppercase(),
            values: split_unquoted(pvalues, ',')
                .into_iter()
                .map(|v| v.trim_matches('"').to_string())
                .collect(),
        });
    }

    Ok(Property {
        name: name.to_ascii_uppercase(),
        params,
        value: value.to_string(),
    })
}

fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c == needle && !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = s;
    while let Some(i) = find_unquoted(rest, sep) {
        parts.push(&rest[..i]);
        rest = &rest[i + sep.len_utf8()..];
    }
    parts.push(rest);
    parts
}

// ── Serialization ───────────────────────────────────────────────────────────

fn push_line(out: &mut String, line: &str) {
    out.push_str(&fold_line(line));
    out.push_str("\r\n");
}

/// Fold a logical line into CRLF-separated physical lines of at most 75
/// octets, never splitting a UTF-8 sequence.
pub fn fold_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len() + line.len() / FOLD_WIDTH * 3);
    let mut width = 0;
    for c in line.chars() {
        let len = c.len_utf8();
        if width + len > FOLD_WIDTH {
            out.push_str("\r\n ");
            // The leading space counts towards the continuation line.
            width = 1;
        }
        out.push(c);
        width += len;
    }
    out
}

fn quote_param(value: &str) -> String {
    if value.contains([':', ';', ',']) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

// ── TEXT values ─────────────────────────────────────────────────────────────

/// Escape a TEXT value (RFC 5545 §3.3.11).
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

/// Undo [`escape_text`]. Unknown escapes keep the escaped character.
pub fn unescape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
