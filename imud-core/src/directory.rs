//! Contact directory: one entry per IP:UDP-port, a name index for messages
//! that only carry a name, and the merge rules for third-party announcements.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Utc};

use crate::contact::{export_order, Contact, ContactState, Service};
use crate::protocol::{field, udp_port, value, Params};

/// Host callback for directory changes.
pub trait ContactObserver: Send {
    /// A contact was created or materially updated.
    fn contact_changed(&self, contact: &Contact);
}

/// Result of merging an announced mud record into the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created(SocketAddr),
    Updated(SocketAddr),
    /// Name-only match on a contact that is already Online or Scanned.
    Discarded,
    /// The record describes this node.
    SelfFiltered,
    /// No usable address and no name match.
    Unresolved,
}

pub struct Directory {
    local_name: String,
    contacts: HashMap<SocketAddr, Contact>,
    by_name: HashMap<String, SocketAddr>,
    observer: Option<Box<dyn ContactObserver>>,
}

impl Directory {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            contacts: HashMap::new(),
            by_name: HashMap::new(),
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: Box<dyn ContactObserver>) {
        self.observer = Some(observer);
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&Contact> {
        self.contacts.get(addr)
    }

    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values()
    }

    /// True when `name` is this node's own name (case-insensitive).
    pub fn is_self(&self, name: &str) -> bool {
        name.trim().eq_ignore_ascii_case(&self.local_name)
    }

    pub fn find_by_name(&self, name: &str) -> Option<SocketAddr> {
        if let Some(addr) = self.by_name.get(name) {
            if self.contacts.get(addr).and_then(|c| c.name.as_deref()) == Some(name) {
                return Some(*addr);
            }
        }
        self.contacts
            .values()
            .filter(|c| c.name.as_deref() == Some(name))
            .map(Contact::addr)
            .min()
    }

    /// Any contact at `ip`, lowest port first.
    pub fn find_by_ip(&self, ip: IpAddr) -> Option<SocketAddr> {
        self.contacts.keys().filter(|a| a.ip() == ip).min().copied()
    }

    /// Host list entry: inserted as Unknown unless the address is already known.
    pub fn load(&mut self, name: &str, addr: SocketAddr) -> bool {
        if self.contacts.contains_key(&addr) || self.is_self(name) {
            return false;
        }
        let mut contact = Contact::new(addr);
        contact.name = Some(name.to_string());
        self.insert(contact);
        true
    }

    /// `ping_a` from `addr`: upsert with the declared attributes and apply the ping transition.
    pub fn record_ping_reply(&mut self, addr: SocketAddr, params: &Params, now: DateTime<Utc>) {
        let contact = self
            .contacts
            .entry(addr)
            .or_insert_with(|| Contact::new(addr));
        contact.apply_self_description(params);
        if contact.on_ping_reply(now) {
            tracing::info!(mud = %contact.label(), %addr, "mud is online");
        }
        self.reindex(addr);
        self.notify(addr);
    }

    /// `mudlist_a` from `ip`. Resolution order: exact IP + declared UDP port,
    /// declared name, IP alone. Unresolved senders with a declared port are created.
    pub fn record_mudlist_reply(
        &mut self,
        ip: IpAddr,
        declared_port: Option<u16>,
        name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<SocketAddr> {
        let resolved = declared_port
            .map(|p| SocketAddr::new(ip, p))
            .filter(|k| self.contacts.contains_key(k))
            .or_else(|| name.and_then(|n| self.find_by_name(n)))
            .or_else(|| self.find_by_ip(ip));
        let addr = match resolved {
            Some(addr) => addr,
            None => {
                let addr = SocketAddr::new(ip, declared_port?);
                let mut contact = Contact::new(addr);
                contact.name = name.map(str::to_string);
                self.insert(contact);
                addr
            }
        };
        if let Some(contact) = self.contacts.get_mut(&addr) {
            if contact.on_mudlist_reply(now) {
                tracing::info!(mud = %contact.label(), %addr, "mud scanned");
            }
        }
        self.notify(addr);
        Some(addr)
    }

    /// `rwho_a`: refresh liveness of an existing contact, by exact address or by name.
    pub fn record_rwho_reply(
        &mut self,
        addr: Option<SocketAddr>,
        name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<SocketAddr> {
        let addr = addr
            .filter(|k| self.contacts.contains_key(k))
            .or_else(|| name.and_then(|n| self.find_by_name(n)))?;
        self.contacts.get_mut(&addr)?.on_rwho_reply(now);
        self.notify(addr);
        Some(addr)
    }

    pub fn mark_supported(&mut self, addr: SocketAddr, service: Service) -> bool {
        let added = self
            .contacts
            .get_mut(&addr)
            .map(|c| c.mark_supported(service))
            .unwrap_or(false);
        if added {
            self.notify(addr);
        }
        added
    }

    /// Merge an announced record (mudlist entry or `startup`) into the directory.
    pub fn merge_record(&mut self, params: &Params) -> MergeOutcome {
        let name = value(params, field::NAME);
        if name.is_some_and(|n| self.is_self(n)) {
            return MergeOutcome::SelfFiltered;
        }
        let key = value(params, field::HOSTADDRESS)
            .and_then(|h| h.parse::<IpAddr>().ok())
            .zip(udp_port(params))
            .map(|(ip, port)| SocketAddr::new(ip, port));

        if let Some(addr) = key.filter(|k| self.contacts.contains_key(k)) {
            self.update_identity(addr, params);
            return MergeOutcome::Updated(addr);
        }

        match name.and_then(|n| self.find_by_name(n)) {
            Some(existing) => {
                if self.contacts[&existing].state().is_live() {
                    tracing::debug!(mud = name, %existing, "ignoring record for verified contact");
                    return MergeOutcome::Discarded;
                }
                let target = match key {
                    Some(new_addr) => {
                        tracing::info!(mud = name, from = %existing, to = %new_addr, "contact moved");
                        self.rekey(existing, new_addr);
                        new_addr
                    }
                    None => existing,
                };
                self.update_identity(target, params);
                MergeOutcome::Updated(target)
            }
            None => match key {
                Some(addr) => {
                    let mut contact = Contact::new(addr);
                    contact.apply_identity(params);
                    tracing::debug!(mud = name, %addr, "new contact from record");
                    self.insert(contact);
                    MergeOutcome::Created(addr)
                }
                None => {
                    tracing::debug!(mud = name, "record has no usable address");
                    MergeOutcome::Unresolved
                }
            },
        }
    }

    /// Liveness sweep. Returns the contacts that went Offline.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<SocketAddr> {
        let gone: Vec<SocketAddr> = self
            .contacts
            .values_mut()
            .filter_map(|c| c.sweep(now).then(|| c.addr()))
            .collect();
        for addr in &gone {
            if let Some(c) = self.contacts.get(addr) {
                tracing::info!(mud = %c.label(), %addr, "mud went offline");
            }
            self.notify(*addr);
        }
        gone
    }

    /// Online or Scanned contacts, in address order.
    pub fn live(&self) -> Vec<SocketAddr> {
        self.select(|c| c.state().is_live())
    }

    /// Unknown or Offline contacts, in address order.
    pub fn not_live(&self) -> Vec<SocketAddr> {
        self.select(|c| !c.state().is_live())
    }

    /// Reachable contacts that have been heard from at least once, in snapshot order.
    pub fn known(&self) -> Vec<&Contact> {
        let mut out: Vec<&Contact> = self
            .contacts
            .values()
            .filter(|c| c.state() != ContactState::Unknown && c.udp_port() != 0)
            .collect();
        out.sort_by(|a, b| export_order(a, b));
        out
    }

    fn select(&self, pred: impl Fn(&Contact) -> bool) -> Vec<SocketAddr> {
        let mut out: Vec<SocketAddr> = self
            .contacts
            .values()
            .filter(|c| pred(c))
            .map(Contact::addr)
            .collect();
        out.sort();
        out
    }

    fn insert(&mut self, contact: Contact) {
        let addr = contact.addr();
        self.contacts.insert(addr, contact);
        self.reindex(addr);
        self.notify(addr);
    }

    fn update_identity(&mut self, addr: SocketAddr, params: &Params) {
        if let Some(contact) = self.contacts.get_mut(&addr) {
            contact.apply_identity(params);
        }
        self.reindex(addr);
        self.notify(addr);
    }

    fn rekey(&mut self, from: SocketAddr, to: SocketAddr) {
        if let Some(mut contact) = self.contacts.remove(&from) {
            contact.set_addr(to);
            self.contacts.insert(to, contact);
            self.reindex(to);
        }
    }

    fn reindex(&mut self, addr: SocketAddr) {
        if let Some(name) = self.contacts.get(&addr).and_then(|c| c.name.clone()) {
            self.by_name.insert(name, addr);
        }
    }

    fn notify(&self, addr: SocketAddr) {
        if let (Some(observer), Some(contact)) = (&self.observer, self.contacts.get(&addr)) {
            observer.contact_changed(contact);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::{Arc, Mutex};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn record(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect()
    }

    struct Recorder(Arc<Mutex<Vec<SocketAddr>>>);

    impl ContactObserver for Recorder {
        fn contact_changed(&self, contact: &Contact) {
            self.0.lock().unwrap().push(contact.addr());
        }
    }

    #[test]
    fn same_address_never_duplicates() {
        let mut dir = Directory::new("Local");
        let a = addr("10.0.0.1:4004");
        dir.record_ping_reply(a, &record(&[("NAME", "Eden")]), now());
        dir.record_ping_reply(a, &record(&[("NAME", "Eden"), ("VERSION", "2")]), now());
        let r = record(&[("NAME", "Eden"), ("HOSTADDRESS", "10.0.0.1"), ("PORTUDP", "4004")]);
        assert_eq!(dir.merge_record(&r), MergeOutcome::Updated(a));
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.get(&a).unwrap().version.as_deref(), Some("2"));
    }

    #[test]
    fn name_only_update_never_downgrades_scanned() {
        let mut dir = Directory::new("Local");
        let a = addr("10.0.0.1:4004");
        dir.load("Eden", a);
        dir.record_mudlist_reply(a.ip(), Some(4004), None, now());
        assert_eq!(dir.get(&a).unwrap().state(), ContactState::Scanned);

        let moved = record(&[("NAME", "Eden"), ("HOSTADDRESS", "10.9.9.9"), ("PORTUDP", "5555")]);
        assert_eq!(dir.merge_record(&moved), MergeOutcome::Discarded);
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.get(&a).unwrap().state(), ContactState::Scanned);
        assert!(dir.get(&addr("10.9.9.9:5555")).is_none());
    }

    #[test]
    fn name_match_on_unverified_contact_moves_it() {
        let mut dir = Directory::new("Local");
        let old = addr("10.0.0.1:4004");
        dir.load("Eden", old);
        let moved = record(&[
            ("NAME", "Eden"),
            ("HOSTADDRESS", "10.9.9.9"),
            ("PORTUDP", "5555"),
            ("DRIVER", "DGD"),
        ]);
        let new = addr("10.9.9.9:5555");
        assert_eq!(dir.merge_record(&moved), MergeOutcome::Updated(new));
        assert_eq!(dir.len(), 1);
        assert!(dir.get(&old).is_none());
        let c = dir.get(&new).unwrap();
        assert_eq!(c.driver.as_deref(), Some("DGD"));
        assert_eq!(c.state(), ContactState::Unknown);
        assert_eq!(dir.find_by_name("Eden"), Some(new));
    }

    #[test]
    fn self_named_records_are_ignored() {
        let mut dir = Directory::new("Eden");
        let r = record(&[("NAME", "EDEN"), ("HOSTADDRESS", "10.0.0.1"), ("PORTUDP", "4004")]);
        assert_eq!(dir.merge_record(&r), MergeOutcome::SelfFiltered);
        assert!(!dir.load("eden", addr("10.0.0.1:4004")));
        assert!(dir.is_empty());
    }

    #[test]
    fn record_without_address_or_match_is_dropped() {
        let mut dir = Directory::new("Local");
        let r = record(&[("NAME", "Nowhere"), ("HOSTADDRESS", "not-an-ip")]);
        assert_eq!(dir.merge_record(&r), MergeOutcome::Unresolved);
        assert!(dir.is_empty());
    }

    #[test]
    fn new_record_creates_unknown_contact() {
        let mut dir = Directory::new("Local");
        let r = record(&[
            ("NAME", "Universes"),
            ("HOSTADDRESS", "108.252.255.105"),
            ("UDPPORT", "3341"),
            ("PORT", "3333"),
        ]);
        let a = addr("108.252.255.105:3341");
        assert_eq!(dir.merge_record(&r), MergeOutcome::Created(a));
        let c = dir.get(&a).unwrap();
        assert_eq!(c.state(), ContactState::Unknown);
        assert_eq!(c.effective_game_port(), 3333);
    }

    #[test]
    fn mudlist_reply_resolution_order() {
        let mut dir = Directory::new("Local");
        let by_name = addr("10.0.0.2:4004");
        dir.load("Eden", by_name);
        let by_ip = addr("10.0.0.3:6000");
        dir.load("Other", by_ip);

        let hit = dir.record_mudlist_reply(by_name.ip(), Some(9999), Some("Eden"), now());
        assert_eq!(hit, Some(by_name));

        let hit = dir.record_mudlist_reply(by_ip.ip(), None, None, now());
        assert_eq!(hit, Some(by_ip));
        assert_eq!(dir.get(&by_ip).unwrap().state(), ContactState::Scanned);

        let fresh = dir.record_mudlist_reply("10.0.0.4".parse().unwrap(), Some(4004), None, now());
        assert_eq!(fresh, Some(addr("10.0.0.4:4004")));
        assert_eq!(dir.len(), 3);

        assert_eq!(
            dir.record_mudlist_reply("10.0.0.5".parse().unwrap(), None, None, now()),
            None
        );
    }

    #[test]
    fn sweep_only_touches_stale_live_contacts() {
        let mut dir = Directory::new("Local");
        let stale = addr("10.0.0.1:4004");
        let fresh = addr("10.0.0.2:4004");
        let unknown = addr("10.0.0.3:4004");
        dir.record_ping_reply(stale, &Params::new(), now());
        dir.record_ping_reply(fresh, &Params::new(), now() + Duration::minutes(30));
        dir.load("Quiet", unknown);

        let gone = dir.sweep(now() + Duration::minutes(41));
        assert_eq!(gone, vec![stale]);
        assert_eq!(dir.get(&stale).unwrap().state(), ContactState::Offline);
        assert_eq!(dir.get(&fresh).unwrap().state(), ContactState::Online);
        assert_eq!(dir.get(&unknown).unwrap().state(), ContactState::Unknown);
        assert_eq!(dir.not_live(), vec![stale, unknown]);
    }

    #[test]
    fn rwho_reply_needs_known_contact() {
        let mut dir = Directory::new("Local");
        assert_eq!(dir.record_rwho_reply(Some(addr("10.0.0.1:4004")), None, now()), None);
        dir.load("Eden", addr("10.0.0.1:4004"));
        assert_eq!(
            dir.record_rwho_reply(None, Some("Eden"), now()),
            Some(addr("10.0.0.1:4004"))
        );
        assert!(dir.get(&addr("10.0.0.1:4004")).unwrap().supports(Service::RWho));
    }

    #[test]
    fn observer_sees_creations_and_updates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dir = Directory::new("Local");
        dir.set_observer(Box::new(Recorder(seen.clone())));
        let a = addr("10.0.0.1:4004");
        dir.load("Eden", a);
        dir.record_ping_reply(a, &Params::new(), now());
        assert_eq!(*seen.lock().unwrap(), vec![a, a]);
    }
}
