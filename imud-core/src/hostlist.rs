//! Flat-file formats: the host list read at startup (`NAME | HOST | UDP_PORT`)
//! and the snapshot written every maintenance tick.

use std::fmt::Write as _;

use crate::contact::Contact;

/// One line of the host list. `host` may be an IP literal or a DNS name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub name: String,
    pub host: String,
    pub udp_port: u16,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HostListError {
    #[error("missing {0} field")]
    MissingField(&'static str),
    #[error("invalid UDP port {0:?}")]
    BadPort(String),
}

/// Parse one line. Comments (`#`) and blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<HostEntry>, HostListError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let mut parts = trimmed.split('|').map(str::trim).filter(|p| !p.is_empty());
    let name = parts.next().ok_or(HostListError::MissingField("name"))?;
    let host = parts.next().ok_or(HostListError::MissingField("host"))?;
    let port = parts.next().ok_or(HostListError::MissingField("port"))?;
    let udp_port = port
        .parse::<u16>()
        .map_err(|_| HostListError::BadPort(port.to_string()))?;
    Ok(Some(HostEntry {
        name: name.to_string(),
        host: host.to_string(),
        udp_port,
    }))
}

/// Parse a whole host list, skipping malformed lines with a warning.
pub fn parse_host_list(text: &str) -> Vec<HostEntry> {
    text.lines()
        .enumerate()
        .filter_map(|(n, line)| match parse_line(line) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(lineno = n + 1, "skipping host list line {line:?}: {e}");
                None
            }
        })
        .collect()
}

/// One snapshot line per contact, in the given order.
pub fn render_snapshot<'a>(contacts: impl IntoIterator<Item = &'a Contact>) -> String {
    let mut out = String::new();
    for c in contacts {
        let services: Vec<&str> = c.services().iter().map(|s| s.as_str()).collect();
        let _ = write!(
            out,
            "{:>20} \t|{:>15} \t|{} \t|{}|{}|{} | {} #[{}]\r\n",
            c.name.as_deref().unwrap_or(""),
            c.addr().ip().to_string(),
            c.udp_port(),
            c.driver.as_deref().unwrap_or(""),
            c.mudlib.as_deref().unwrap_or(""),
            c.version.as_deref().unwrap_or(""),
            c.state(),
            services.join(", "),
        );
    }
    out
}
