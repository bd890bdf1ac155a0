//! Intermud2 wire vocabulary: command names, field names and the decoded message.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

/// Field mapping of a frame or embedded record. Bare keys carry `None`.
pub type Params = HashMap<String, Option<String>>;

/// Commands this engine understands. Anything else is carried as a raw string
/// in [`Message::command`] and ignored by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    PingQ,
    PingA,
    MudlistQ,
    MudlistA,
    RwhoQ,
    RwhoA,
    SupportedQ,
    SupportedA,
    Startup,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::PingQ => "ping_q",
            Command::PingA => "ping_a",
            Command::MudlistQ => "mudlist_q",
            Command::MudlistA => "mudlist_a",
            Command::RwhoQ => "rwho_q",
            Command::RwhoA => "rwho_a",
            Command::SupportedQ => "supported_q",
            Command::SupportedA => "supported_a",
            Command::Startup => "startup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let cmd = match s {
            "ping_q" => Command::PingQ,
            "ping_a" => Command::PingA,
            "mudlist_q" => Command::MudlistQ,
            "mudlist_a" => Command::MudlistA,
            "rwho_q" => Command::RwhoQ,
            "rwho_a" => Command::RwhoA,
            "supported_q" => Command::SupportedQ,
            "supported_a" => Command::SupportedA,
            "startup" => Command::Startup,
            _ => return None,
        };
        Some(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known field keys.
pub mod field {
    pub const NAME: &str = "NAME";
    pub const MUDNAME: &str = "MUDNAME";
    pub const MUDGROUP: &str = "MUDGROUP";
    pub const HOST: &str = "HOST";
    pub const HOSTADDRESS: &str = "HOSTADDRESS";
    pub const PORT: &str = "PORT";
    pub const PORTUDP: &str = "PORTUDP";
    /// Legacy spelling of `PORTUDP` seen in some mudlists.
    pub const UDPPORT: &str = "UDPPORT";
    pub const DRIVER: &str = "DRIVER";
    pub const MUDLIB: &str = "MUDLIB";
    pub const VERSION: &str = "VERSION";
    pub const LOCATION: &str = "LOCATION";
    pub const ENCODING: &str = "ENCODING";
    pub const TIME: &str = "TIME";
    pub const USERS: &str = "USERS";
    pub const ANSWERID: &str = "ANSWERID";
    pub const ASKWIZ: &str = "ASKWIZ";
    pub const CMD: &str = "CMD";
    pub const SUPPORTED: &str = "SUPPORTED";
    pub const NOTSUPPORTED: &str = "NOTSUPPORTED";
    pub const RWHO: &str = "RWHO";
}

/// Non-empty value of `key`, if present.
pub fn value<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_deref())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Declared UDP port (`PORTUDP`, or the legacy `UDPPORT`).
pub fn udp_port(params: &Params) -> Option<u16> {
    value(params, field::PORTUDP)
        .or_else(|| value(params, field::UDPPORT))
        .and_then(|p| p.parse().ok())
}

/// One decoded datagram. Ephemeral: built per datagram, never persisted.
#[derive(Debug, Clone)]
pub struct Message {
    pub command: String,
    pub params: Params,
    pub sender: SocketAddr,
}

impl Message {
    pub fn kind(&self) -> Option<Command> {
        Command::parse(&self.command)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        value(&self.params, key)
    }

    pub fn name(&self) -> Option<&str> {
        self.get(field::NAME)
    }

    pub fn udp_port(&self) -> Option<u16> {
        udp_port(&self.params)
    }

    /// Where answers to this message go: sender IP plus the declared UDP port,
    /// or the datagram source port when none was declared.
    pub fn reply_addr(&self) -> SocketAddr {
        SocketAddr::new(
            self.sender.ip(),
            self.udp_port().unwrap_or(self.sender.port()),
        )
    }

    /// Embedded mud records (numeric keys), sub-parsed and ordered by index.
    pub fn records(&self) -> Vec<(u32, Params)> {
        let mut out: Vec<(u32, Params)> = self
            .params
            .iter()
            .filter_map(|(k, v)| {
                let index = k.parse::<u32>().ok()?;
                Some((index, crate::wire::parse_record(v.as_deref().unwrap_or(""))))
            })
            .collect();
        out.sort_by_key(|(i, _)| *i);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_names_roundtrip() {
        for cmd in [
            Command::PingQ,
            Command::PingA,
            Command::MudlistQ,
            Command::MudlistA,
            Command::RwhoQ,
            Command::RwhoA,
            Command::SupportedQ,
            Command::SupportedA,
            Command::Startup,
        ] {
            assert_eq!(Command::parse(cmd.as_str()), Some(cmd));
        }
        assert_eq!(Command::parse("gtell"), None);
    }

    #[test]
    fn reply_addr_prefers_declared_port() {
        let sender: SocketAddr = "10.0.0.1:5555".parse().unwrap();
        let mut params = Params::new();
        params.insert(field::UDPPORT.into(), Some("4004".into()));
        let msg = Message {
            command: "ping_q".into(),
            params,
            sender,
        };
        assert_eq!(msg.reply_addr(), "10.0.0.1:4004".parse().unwrap());

        let bare = Message {
            command: "ping_q".into(),
            params: Params::new(),
            sender,
        };
        assert_eq!(bare.reply_addr(), sender);
    }
}
