//! Peer record: identity, declared attributes, liveness state and supported services.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Duration, Utc};

use crate::protocol::{field, value, Params};

/// Silence longer than this turns a live contact Offline on the next sweep.
pub const OFFLINE_AFTER_MINUTES: i64 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactState {
    /// Loaded from the host list, never heard from.
    Unknown,
    Offline,
    /// Answered a ping but has not sent its mudlist yet.
    Online,
    Scanned,
}

impl ContactState {
    /// Online or Scanned.
    pub fn is_live(self) -> bool {
        matches!(self, ContactState::Online | ContactState::Scanned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContactState::Unknown => "UNKNOWN",
            ContactState::Offline => "OFFLINE",
            ContactState::Online => "ONLINE",
            ContactState::Scanned => "SCANNED",
        }
    }
}

impl fmt::Display for ContactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intermud2 services a peer may support, each tied to the query that exercises it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Service {
    Ping,
    Mudlist,
    WizMsg,
    Finger,
    Tell,
    Channel,
    Locate,
    Mail,
    RWho,
}

impl Service {
    pub const ALL: [Service; 9] = [
        Service::Ping,
        Service::Mudlist,
        Service::WizMsg,
        Service::Finger,
        Service::Tell,
        Service::Channel,
        Service::Locate,
        Service::Mail,
        Service::RWho,
    ];

    pub fn query(self) -> &'static str {
        match self {
            Service::Ping => "ping_q",
            Service::Mudlist => "mudlist_q",
            Service::WizMsg => "gwizmsg",
            Service::Finger => "gfinger_q",
            Service::Tell => "gtell",
            Service::Channel => "gchannel",
            Service::Locate => "locate_q",
            Service::Mail => "mail_q",
            Service::RWho => "rwho_q",
        }
    }

    pub fn from_query(query: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.query() == query)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Service::Ping => "PING",
            Service::Mudlist => "MUDLIST",
            Service::WizMsg => "WIZMSG",
            Service::Finger => "FINGER",
            Service::Tell => "TELL",
            Service::Channel => "CHANNEL",
            Service::Locate => "LOCATE",
            Service::Mail => "MAIL",
            Service::RWho => "RWHO",
        }
    }
}

/// A peer MUD. Keyed by `addr` (IP plus Intermud UDP port).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    addr: SocketAddr,
    pub name: Option<String>,
    pub mud_name: Option<String>,
    /// Host name the peer declares for itself.
    pub host: Option<String>,
    /// Game (TCP) port. When never declared, derived from the UDP port.
    pub game_port: Option<u16>,
    pub driver: Option<String>,
    pub mudlib: Option<String>,
    pub version: Option<String>,
    pub location: Option<String>,
    pub encoding: Option<String>,
    pub mud_group: Option<String>,
    last_contact: Option<DateTime<Utc>>,
    state: ContactState,
    services: BTreeSet<Service>,
}

impl Contact {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            name: None,
            mud_name: None,
            host: None,
            game_port: None,
            driver: None,
            mudlib: None,
            version: None,
            location: None,
            encoding: None,
            mud_group: None,
            last_contact: None,
            state: ContactState::Unknown,
            services: BTreeSet::new(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn udp_port(&self) -> u16 {
        self.addr.port()
    }

    pub fn state(&self) -> ContactState {
        self.state
    }

    pub fn last_contact(&self) -> Option<DateTime<Utc>> {
        self.last_contact
    }

    pub fn services(&self) -> &BTreeSet<Service> {
        &self.services
    }

    pub fn supports(&self, service: Service) -> bool {
        self.services.contains(&service)
    }

    /// Declared game port, or the I2 convention of UDP port minus four.
    pub fn effective_game_port(&self) -> u16 {
        self.game_port
            .filter(|p| *p != 0)
            .unwrap_or_else(|| self.udp_port().saturating_sub(4))
    }

    /// Name for logs: declared name or the address.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.addr.to_string())
    }

    pub(crate) fn set_addr(&mut self, addr: SocketAddr) {
        self.addr = addr;
    }

    pub(crate) fn mark_supported(&mut self, service: Service) -> bool {
        self.services.insert(service)
    }

    /// Ping reply: refresh liveness; Unknown/Offline becomes Online. Returns true on state change.
    pub(crate) fn on_ping_reply(&mut self, now: DateTime<Utc>) -> bool {
        self.last_contact = Some(now);
        self.mark_supported(Service::Ping);
        if matches!(self.state, ContactState::Unknown | ContactState::Offline) {
            self.state = ContactState::Online;
            return true;
        }
        false
    }

    /// Mudlist reply: always Scanned. Returns true on state change.
    pub(crate) fn on_mudlist_reply(&mut self, now: DateTime<Utc>) -> bool {
        self.last_contact = Some(now);
        self.mark_supported(Service::Mudlist);
        let changed = self.state != ContactState::Scanned;
        self.state = ContactState::Scanned;
        changed
    }

    /// RWho reply: refresh liveness only.
    pub(crate) fn on_rwho_reply(&mut self, now: DateTime<Utc>) {
        self.last_contact = Some(now);
        self.mark_supported(Service::RWho);
    }

    /// Liveness rule: a live contact silent for more than the threshold goes Offline.
    pub(crate) fn sweep(&mut self, now: DateTime<Utc>) -> bool {
        if !self.state.is_live() {
            return false;
        }
        let stale = match self.last_contact {
            Some(t) => now.signed_duration_since(t) > Duration::minutes(OFFLINE_AFTER_MINUTES),
            None => true,
        };
        if stale {
            self.state = ContactState::Offline;
        }
        stale
    }

    /// Attributes a peer declares about itself (`ping_a`). Absent fields keep known values.
    pub(crate) fn apply_self_description(&mut self, params: &Params) {
        self.apply_identity(params);
        merge(&mut self.version, params, field::VERSION);
        merge(&mut self.location, params, field::LOCATION);
        merge(&mut self.encoding, params, field::ENCODING);
        merge(&mut self.mud_group, params, field::MUDGROUP);
    }

    /// Identifying attributes carried by mudlist records and announcements.
    pub(crate) fn apply_identity(&mut self, params: &Params) {
        merge(&mut self.name, params, field::NAME);
        merge(&mut self.mud_name, params, field::MUDNAME);
        merge(&mut self.host, params, field::HOST);
        merge(&mut self.driver, params, field::DRIVER);
        merge(&mut self.mudlib, params, field::MUDLIB);
        if let Some(port) = value(params, field::PORT).and_then(|p| p.parse().ok()) {
            self.game_port = Some(port);
        }
    }
}

fn merge(slot: &mut Option<String>, params: &Params, key: &str) {
    if let Some(v) = value(params, key) {
        *slot = Some(v.to_string());
    }
}

/// Snapshot order: most recent contact first, then by name, then by address.
pub fn export_order(a: &Contact, b: &Contact) -> Ordering {
    b.last_contact
        .cmp(&a.last_contact)
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.addr.cmp(&b.addr))
}
