//! Host-driven API: ImudCore receives datagrams and timer ticks from the host, returns actions.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::color;
use crate::contact::Service;
use crate::directory::{ContactObserver, Directory, MergeOutcome};
use crate::identity::LocalIdentity;
use crate::protocol::{field, Command, Message};
use crate::wire::{self, DecodeError, Frame};

/// Records per `mudlist_a` datagram.
pub const MUDLIST_BATCH: usize = 4;

/// Services this node answers, reported through `supported_a`.
const ANSWERED: [Command; 4] = [
    Command::PingQ,
    Command::MudlistQ,
    Command::SupportedQ,
    Command::Startup,
];

/// Action for host to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    /// Encoded frame (NUL-terminated) for the given peer.
    SendDatagram(SocketAddr, Vec<u8>),
    /// Remote who listing, already translated to ANSI, for the operator.
    RemoteWho {
        from: SocketAddr,
        mud: Option<String>,
        text: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("failed to decode datagram: {0}")]
    Decode(#[from] DecodeError),
}

/// Protocol engine. Owns the contact directory; the host serializes access.
pub struct ImudCore {
    identity: LocalIdentity,
    directory: Directory,
    local_addr: Option<SocketAddr>,
}

impl ImudCore {
    pub fn new(identity: LocalIdentity) -> Self {
        Self {
            directory: Directory::new(identity.name.clone()),
            identity,
            local_addr: None,
        }
    }

    pub fn with_observer(identity: LocalIdentity, observer: Box<dyn ContactObserver>) -> Self {
        let mut core = Self::new(identity);
        core.directory.set_observer(observer);
        core
    }

    /// Address the host socket is bound to. Frames addressed there are never emitted.
    pub fn set_local_addr(&mut self, addr: SocketAddr) {
        self.local_addr = Some(addr);
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut Directory {
        &mut self.directory
    }

    /// Decode and dispatch one datagram.
    pub fn on_datagram(
        &mut self,
        bytes: &[u8],
        from: SocketAddr,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboundAction>, MessageError> {
        let msg = wire::decode(bytes, from)?;
        Ok(self.on_message(&msg, now))
    }

    /// Dispatch a decoded message by command.
    pub fn on_message(&mut self, msg: &Message, now: DateTime<Utc>) -> Vec<OutboundAction> {
        let mut actions = Vec::new();
        match msg.kind() {
            Some(Command::PingA) => self.on_ping_answer(msg, now, &mut actions),
            Some(Command::PingQ) => self.on_ping_query(msg, now, &mut actions),
            Some(Command::MudlistA) => self.on_mudlist_answer(msg, now),
            Some(Command::MudlistQ) => self.on_mudlist_query(msg, &mut actions),
            Some(Command::RwhoA) => self.on_rwho_answer(msg, now, &mut actions),
            Some(Command::Startup) => self.on_startup(msg),
            Some(Command::SupportedQ) => self.on_supported_query(msg, &mut actions),
            Some(Command::SupportedA) => self.on_supported_answer(msg),
            Some(Command::RwhoQ) | None => {
                tracing::info!(command = %msg.command, from = %msg.sender, "unhandled message");
            }
        }
        actions
    }

    fn from_self(&self, msg: &Message) -> bool {
        msg.name().is_some_and(|n| self.directory.is_self(n))
    }

    fn on_ping_answer(&mut self, msg: &Message, now: DateTime<Utc>, actions: &mut Vec<OutboundAction>) {
        if self.from_self(msg) {
            return;
        }
        let peer = msg.reply_addr();
        tracing::trace!(%peer, "ping answer");
        self.directory.record_ping_reply(peer, &msg.params, now);
        self.query_mudlist(peer, actions);
    }

    fn on_ping_query(&mut self, msg: &Message, now: DateTime<Utc>, actions: &mut Vec<OutboundAction>) {
        tracing::debug!(mud = msg.name(), from = %msg.sender, "pinged");
        let frame = self.identity.describe(Frame::new(Command::PingA.as_str()), now);
        self.send(msg.reply_addr(), &frame, actions);
    }

    fn on_mudlist_answer(&mut self, msg: &Message, now: DateTime<Utc>) {
        if self.from_self(msg) {
            return;
        }
        tracing::trace!(from = %msg.sender, "mudlist answer");
        if self
            .directory
            .record_mudlist_reply(msg.sender.ip(), msg.udp_port(), msg.name(), now)
            .is_none()
        {
            tracing::debug!(from = %msg.sender, "mudlist answer from unidentified sender");
        }
        for (index, record) in msg.records() {
            let outcome = self.directory.merge_record(&record);
            tracing::trace!(index, ?outcome, "mudlist record");
        }
    }

    fn on_mudlist_query(&mut self, msg: &Message, actions: &mut Vec<OutboundAction>) {
        tracing::debug!(mud = msg.name(), from = %msg.sender, "mudlist queried");
        let records: Vec<String> = self
            .directory
            .known()
            .into_iter()
            .map(|c| {
                let ip = c.addr().ip().to_string();
                wire::render_record(&[
                    (field::NAME, c.label()),
                    (field::HOST, c.host.clone().unwrap_or_else(|| ip.clone())),
                    (field::HOSTADDRESS, ip),
                    (field::PORT, c.effective_game_port().to_string()),
                    (field::PORTUDP, c.udp_port().to_string()),
                ])
            })
            .collect();
        let to = msg.reply_addr();
        for (batch_no, batch) in records.chunks(MUDLIST_BATCH).enumerate() {
            let mut frame = self.identity.sign(Frame::new(Command::MudlistA.as_str()));
            if let Some(id) = msg.get(field::ANSWERID) {
                frame = frame.field(field::ANSWERID, id);
            }
            for (i, record) in batch.iter().enumerate() {
                frame = frame.field((batch_no * MUDLIST_BATCH + i + 1).to_string(), record);
            }
            self.send(to, &frame, actions);
        }
    }

    fn on_rwho_answer(&mut self, msg: &Message, now: DateTime<Utc>, actions: &mut Vec<OutboundAction>) {
        let exact = msg.udp_port().map(|p| SocketAddr::new(msg.sender.ip(), p));
        if self
            .directory
            .record_rwho_reply(exact, msg.name(), now)
            .is_none()
        {
            tracing::debug!(from = %msg.sender, "rwho answer from unknown mud");
        }
        if let Some(text) = msg.get(field::RWHO) {
            actions.push(OutboundAction::RemoteWho {
                from: msg.sender,
                mud: msg.name().map(str::to_string),
                text: color::pinkfish_to_ansi(text),
            });
        }
    }

    /// A peer announcing itself: same rules as a mudlist record, with the
    /// datagram source standing in for a missing `HOSTADDRESS`.
    fn on_startup(&mut self, msg: &Message) {
        let mut params = msg.params.clone();
        if !params.contains_key(field::HOSTADDRESS) {
            params.insert(
                field::HOSTADDRESS.to_string(),
                Some(msg.sender.ip().to_string()),
            );
        }
        match self.directory.merge_record(&params) {
            MergeOutcome::Created(addr) | MergeOutcome::Updated(addr) => {
                tracing::debug!(mud = msg.name(), %addr, "startup announcement")
            }
            outcome => tracing::debug!(mud = msg.name(), ?outcome, "startup ignored"),
        }
    }

    fn on_supported_query(&mut self, msg: &Message, actions: &mut Vec<OutboundAction>) {
        let Some(cmd) = msg.get(field::CMD) else {
            return;
        };
        let supported = Command::parse(cmd).is_some_and(|c| ANSWERED.contains(&c));
        let mut frame = self
            .identity
            .sign(Frame::new(Command::SupportedA.as_str()));
        if let Some(id) = msg.get(field::ANSWERID) {
            frame = frame.field(field::ANSWERID, id);
        }
        frame = frame.field(field::CMD, cmd).field(
            if supported {
                field::SUPPORTED
            } else {
                field::NOTSUPPORTED
            },
            1,
        );
        self.send(msg.reply_addr(), &frame, actions);
    }

    fn on_supported_answer(&mut self, msg: &Message) {
        let Some(service) = msg.get(field::CMD).and_then(Service::from_query) else {
            return;
        };
        if !msg.params.contains_key(field::SUPPORTED) {
            return;
        }
        let peer = msg.reply_addr();
        let addr = self
            .directory
            .get(&peer)
            .map(|c| c.addr())
            .or_else(|| msg.name().and_then(|n| self.directory.find_by_name(n)));
        if let Some(addr) = addr {
            self.directory.mark_supported(addr, service);
        }
    }

    /// True when `to` is the address this node is bound to.
    pub fn is_local(&self, to: SocketAddr) -> bool {
        let Some(local) = self.local_addr else {
            return false;
        };
        if to.port() != local.port() {
            return false;
        }
        to.ip() == local.ip()
            || (local.ip().is_unspecified() && (to.ip().is_loopback() || to.ip().is_unspecified()))
    }

    pub(crate) fn send(&self, to: SocketAddr, frame: &Frame, actions: &mut Vec<OutboundAction>) {
        if self.is_local(to) {
            tracing::trace!(%to, command = frame.command(), "not sending to self");
            return;
        }
        tracing::trace!(%to, "SND {}", frame.render());
        actions.push(OutboundAction::SendDatagram(to, frame.encode()));
    }

    /// `ping_q` to a peer. Port 0 marks a peer as unreachable.
    pub(crate) fn ping(&self, to: SocketAddr, actions: &mut Vec<OutboundAction>) {
        if to.port() == 0 {
            tracing::warn!(%to, "cannot ping mud with UDP port 0");
            return;
        }
        let frame = self.identity.sign(Frame::new(Command::PingQ.as_str()));
        self.send(to, &frame, actions);
    }

    pub(crate) fn query_mudlist(&self, to: SocketAddr, actions: &mut Vec<OutboundAction>) {
        if to.port() == 0 {
            tracing::debug!(%to, "not querying mud with UDP port 0");
            return;
        }
        let answer_id: u32 = rand::thread_rng().gen_range(0..100);
        let frame = self
            .identity
            .sign(Frame::new(Command::MudlistQ.as_str()))
            .field(field::ANSWERID, answer_id);
        self.send(to, &frame, actions);
    }

    pub(crate) fn request_who(&self, to: SocketAddr, actions: &mut Vec<OutboundAction>) {
        if to.port() == 0 {
            return;
        }
        let frame = self
            .identity
            .sign(Frame::new(Command::RwhoQ.as_str()))
            .field(field::ASKWIZ, &self.identity.name);
        self.send(to, &frame, actions);
    }

    pub(crate) fn query_supported(
        &self,
        to: SocketAddr,
        command: Command,
        actions: &mut Vec<OutboundAction>,
    ) {
        let frame = self
            .identity
            .sign(Frame::new(Command::SupportedQ.as_str()))
            .field(field::ANSWERID, &self.identity.name)
            .field(field::CMD, command);
        self.send(to, &frame, actions);
    }

    pub(crate) fn announce(&self, to: SocketAddr, now: DateTime<Utc>, actions: &mut Vec<OutboundAction>) {
        let frame = self
            .identity
            .describe(Frame::new(Command::Startup.as_str()), now);
        self.send(to, &frame, actions);
    }
}
