//! Local identity: what this node advertises about itself to peers.

use chrono::{DateTime, Utc};

use crate::protocol::field;
use crate::wire::Frame;

/// Mudlib marker sent in the self-description.
pub const DEFAULT_MUDLIB: &str = "imud";

/// This node as seen by the Intermud2 network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Name used on the network and for the self-filter.
    pub name: String,
    /// Display name, advertised as `MUDNAME`.
    pub mud_name: String,
    /// Advertised host name.
    pub hostname: String,
    /// Game (TCP) port.
    pub game_port: u16,
    /// Intermud2 UDP port.
    pub udp_port: u16,
    pub version: String,
    pub mudlib: String,
}

impl LocalIdentity {
    /// Identity with the usual defaults: UDP port is game port + 4, mud name is the name.
    pub fn new(name: impl Into<String>, hostname: impl Into<String>, game_port: u16) -> Self {
        let name = name.into();
        Self {
            mud_name: name.clone(),
            name,
            hostname: hostname.into(),
            game_port,
            udp_port: game_port.saturating_add(4),
            version: env!("CARGO_PKG_VERSION").to_string(),
            mudlib: DEFAULT_MUDLIB.to_string(),
        }
    }

    /// `NAME` and `PORTUDP`, the minimum every query carries.
    pub fn sign(&self, frame: Frame) -> Frame {
        frame
            .field(field::NAME, &self.name)
            .field(field::PORTUDP, self.udp_port)
    }

    /// Full self-description used by `ping_a` and `startup`.
    pub fn describe(&self, frame: Frame, now: DateTime<Utc>) -> Frame {
        frame
            .field(field::NAME, &self.name)
            .field(field::MUDNAME, &self.mud_name)
            .field(field::VERSION, &self.version)
            .field(field::MUDLIB, &self.mudlib)
            .field(field::HOST, &self.hostname)
            .field(field::PORT, self.game_port)
            .field(field::PORTUDP, self.udp_port)
            .field(field::TIME, now.timestamp_millis())
            .field(field::USERS, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_derive_from_game_port() {
        let id = LocalIdentity::new("Eden", "eden.example", 4000);
        assert_eq!(id.udp_port, 4004);
        assert_eq!(id.mud_name, "Eden");
    }

    #[test]
    fn description_fields() {
        let id = LocalIdentity::new("Eden", "eden.example", 4000);
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let frame = id.describe(Frame::new("ping_a"), now);
        let rendered = frame.render();
        assert!(rendered.starts_with("@@@ping_a||NAME:Eden||MUDNAME:Eden||VERSION:"));
        assert!(rendered.contains("||HOST:eden.example||PORT:4000||PORTUDP:4004"));
        assert!(rendered.ends_with("||TIME:1700000000000||USERS:0@@@"));
    }

    #[test]
    fn configured_mud_name_is_advertised() {
        let mut id = LocalIdentity::new("eden", "eden.example", 4000);
        id.mud_name = "Garden of Eden".to_string();
        let rendered = id.describe(Frame::new("startup"), Utc::now()).render();
        assert!(rendered.contains("||NAME:eden||MUDNAME:Garden of Eden||"));
        assert!(!id.sign(Frame::new("ping_q")).render().contains("MUDNAME"));
    }
}
