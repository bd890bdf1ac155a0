//! Framing: `@@@command||KEY:VALUE||KEY@@@`, NUL-terminated on transmit.
//! Embedded mud records reuse the grammar with single `|` separators.

use std::net::SocketAddr;

use encoding_rs::Encoding;

use crate::protocol::{field, value, Message, Params};

const MARKER: &str = "@@@";
const FIELD_SEP: &str = "||";
const RECORD_SEP: char = '|';

/// Outbound frame builder. Fields keep insertion order on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: String,
    fields: Vec<(String, String)>,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn render(&self) -> String {
        let mut out = String::from(MARKER);
        out.push_str(&self.command);
        for (key, value) in &self.fields {
            out.push_str(FIELD_SEP);
            out.push_str(key);
            out.push(':');
            out.push_str(value);
        }
        out.push_str(MARKER);
        out
    }

    /// Wire bytes: ASCII rendering (unmappable characters become `?`) plus a trailing NUL.
    pub fn encode(&self) -> Vec<u8> {
        let mut out: Vec<u8> = self
            .render()
            .chars()
            .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
            .collect();
        out.push(0);
        out
    }
}

/// Render an embedded record value: `|KEY:VALUE|KEY:VALUE`.
pub fn render_record(fields: &[(&str, String)]) -> String {
    let mut out = String::new();
    for (key, value) in fields {
        out.push(RECORD_SEP);
        out.push_str(key);
        out.push(':');
        out.push_str(value);
    }
    out
}

/// Error decoding a datagram into a message.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload is not wrapped in @@@ markers")]
    NotFramed,
    #[error("frame has no command")]
    MissingCommand,
}

/// Decode one datagram. The payload is read as ASCII first; a self-declared
/// `ENCODING` triggers a second pass with that charset. Unknown charsets keep
/// the ASCII reading.
pub fn decode(bytes: &[u8], sender: SocketAddr) -> Result<Message, DecodeError> {
    let ascii: String = bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
        .collect();
    let (command, params) = parse_frame(&ascii)?;

    if let Some(label) = value(&params, field::ENCODING) {
        match Encoding::for_label(label.as_bytes()) {
            Some(encoding) => {
                let (text, _) = encoding.decode_without_bom_handling(bytes);
                match parse_frame(&text) {
                    Ok((command, params)) => {
                        return Ok(Message {
                            command,
                            params,
                            sender,
                        })
                    }
                    Err(e) => {
                        tracing::debug!(%sender, encoding = label, "re-decode failed, keeping ASCII: {e}")
                    }
                }
            }
            None => tracing::debug!(%sender, encoding = label, "unknown encoding, keeping ASCII"),
        }
    }

    Ok(Message {
        command,
        params,
        sender,
    })
}

/// Parse a frame body into command and fields. Both markers are required.
pub fn parse_frame(text: &str) -> Result<(String, Params), DecodeError> {
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if text.len() < 2 * MARKER.len() || !text.starts_with(MARKER) || !text.ends_with(MARKER) {
        return Err(DecodeError::NotFramed);
    }
    let inner = &text[MARKER.len()..text.len() - MARKER.len()];
    let mut parts = inner.split(FIELD_SEP);
    let command = parts.next().unwrap_or("").trim();
    if command.is_empty() {
        return Err(DecodeError::MissingCommand);
    }
    Ok((command.to_string(), parse_fields(parts)))
}

/// Sub-parse an embedded record value (`|KEY:VALUE|...`).
pub fn parse_record(text: &str) -> Params {
    parse_fields(text.split(RECORD_SEP))
}

fn parse_fields<'a>(parts: impl Iterator<Item = &'a str>) -> Params {
    let mut params = Params::new();
    for part in parts.filter(|p| !p.is_empty()) {
        match part.find(':') {
            Some(i) if i > 0 => {
                params.insert(part[..i].to_string(), Some(part[i + 1..].to_string()));
            }
            _ => {
                params.insert(part.to_string(), None);
            }
        }
    }
    params
}
