//! Maintenance chains: startup burst, periodic persist + ping of silent muds,
//! and the liveness refresh of live ones. The host owns the timers.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::core::{ImudCore, OutboundAction};
use crate::hostlist;
use crate::protocol::Command;

/// Timing of one repeating chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub first: Duration,
    pub period: Duration,
}

/// Chain A: persist snapshot, then ping every mud not Online/Scanned.
pub const MAINTENANCE: Schedule = Schedule {
    first: Duration::from_secs(60),
    period: Duration::from_secs(60),
};

/// Chain B: liveness sweep, then ping + rwho every live mud.
pub const REFRESH: Schedule = Schedule {
    first: Duration::from_secs(120),
    period: Duration::from_secs(300),
};

/// Queries sent to each loaded host at startup to learn what it supports.
const STARTUP_PROBES: [Command; 3] = [Command::MudlistQ, Command::PingQ, Command::RwhoQ];

impl ImudCore {
    /// One-time startup: load the host list as Unknown, announce to and probe
    /// every loaded host, ping them all, then ping the bootmaster.
    pub fn startup(
        &mut self,
        hosts: &[(String, SocketAddr)],
        bootmaster: Option<SocketAddr>,
        now: DateTime<Utc>,
    ) -> Vec<OutboundAction> {
        let mut loaded = Vec::new();
        for (name, addr) in hosts {
            if self.directory_mut().load(name, *addr) {
                tracing::info!(mud = %name, %addr, "added contact");
                loaded.push(*addr);
            }
        }

        let mut actions = Vec::new();
        for addr in &loaded {
            self.announce(*addr, now, &mut actions);
            for probe in STARTUP_PROBES {
                self.query_supported(*addr, probe, &mut actions);
            }
        }
        for addr in &loaded {
            self.ping(*addr, &mut actions);
        }
        if let Some(boot) = bootmaster {
            tracing::info!(%boot, "pinging bootmaster");
            self.ping(boot, &mut actions);
        }
        actions
    }

    /// Snapshot of every contact heard from at least once, most recent first.
    pub fn snapshot(&self) -> String {
        hostlist::render_snapshot(self.directory().known())
    }

    /// Chain A body (after the snapshot): ping every mud not Online or Scanned.
    pub fn maintenance_tick(&mut self) -> Vec<OutboundAction> {
        let mut actions = Vec::new();
        for addr in self.directory().not_live() {
            self.ping(addr, &mut actions);
        }
        actions
    }

    /// Chain B body: apply the offline rule to live muds, then ping and rwho each of them.
    pub fn refresh_tick(&mut self, now: DateTime<Utc>) -> Vec<OutboundAction> {
        let live = self.directory().live();
        self.directory_mut().sweep(now);
        let mut actions = Vec::new();
        for addr in live {
            self.ping(addr, &mut actions);
            self.request_who(addr, &mut actions);
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::ContactState;
    use crate::identity::LocalIdentity;
    use crate::protocol::Params;
    use crate::wire;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn core() -> ImudCore {
        ImudCore::new(LocalIdentity::new("Eden", "eden.example", 4000))
    }

    fn commands(actions: &[OutboundAction]) -> Vec<(SocketAddr, String)> {
        actions
            .iter()
            .filter_map(|a| match a {
                OutboundAction::SendDatagram(to, bytes) => {
                    Some((*to, wire::decode(bytes, *to).unwrap().command))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn startup_announces_probes_pings_then_bootstraps() {
        let mut core = core();
        let hosts = vec![
            ("Foo".to_string(), addr("10.0.0.1:4004")),
            ("Bar".to_string(), addr("10.0.0.2:4004")),
            ("Foo".to_string(), addr("10.0.0.1:4004")),
        ];
        let boot = addr("210.59.236.38:4004");
        let out = commands(&core.startup(&hosts, Some(boot), now()));
        assert_eq!(core.directory().len(), 2);
        // 2 hosts x (startup + 3 supported_q) + 2 pings + bootmaster ping
        assert_eq!(out.len(), 11);
        assert_eq!(out[0], (addr("10.0.0.1:4004"), "startup".to_string()));
        assert_eq!(
            out.iter().filter(|(_, c)| c == "supported_q").count(),
            6
        );
        assert_eq!(out.last().unwrap(), &(boot, "ping_q".to_string()));
        assert!(core
            .directory()
            .contacts()
            .all(|c| c.state() == ContactState::Unknown));
    }

    #[test]
    fn maintenance_pings_only_silent_muds() {
        let mut core = core();
        core.directory_mut().load("Quiet", addr("10.0.0.1:4004"));
        core.directory_mut().load("Dead", addr("10.0.0.3:0"));
        core.directory_mut()
            .record_ping_reply(addr("10.0.0.2:4004"), &Params::new(), now());
        let out = commands(&core.maintenance_tick());
        assert_eq!(out, vec![(addr("10.0.0.1:4004"), "ping_q".to_string())]);
    }

    #[test]
    fn refresh_sweeps_then_pings_and_asks_who() {
        let mut core = core();
        let stale = addr("10.0.0.1:4004");
        let fresh = addr("10.0.0.2:4004");
        core.directory_mut()
            .record_ping_reply(stale, &Params::new(), now());
        core.directory_mut().record_ping_reply(
            fresh,
            &Params::new(),
            now() + ChronoDuration::minutes(30),
        );
        core.directory_mut().load("Quiet", addr("10.0.0.3:4004"));

        let out = commands(&core.refresh_tick(now() + ChronoDuration::minutes(45)));
        assert_eq!(
            out,
            vec![
                (stale, "ping_q".to_string()),
                (stale, "rwho_q".to_string()),
                (fresh, "ping_q".to_string()),
                (fresh, "rwho_q".to_string()),
            ]
        );
        assert_eq!(
            core.directory().get(&stale).unwrap().state(),
            ContactState::Offline
        );
        assert_eq!(
            core.directory().get(&fresh).unwrap().state(),
            ContactState::Online
        );
    }

    #[test]
    fn idle_mud_stays_online_until_swept() {
        let mut core = core();
        let peer = addr("10.0.0.1:4004");
        core.directory_mut()
            .record_ping_reply(peer, &Params::new(), now());
        // An unrelated datagram long after the threshold does not flip the state.
        core.on_datagram(b"@@@ping_q||PORTUDP:5000@@@", addr("10.0.0.9:1"), now() + ChronoDuration::hours(2))
            .unwrap();
        assert_eq!(
            core.directory().get(&peer).unwrap().state(),
            ContactState::Online
        );
        core.refresh_tick(now() + ChronoDuration::hours(2));
        assert_eq!(
            core.directory().get(&peer).unwrap().state(),
            ContactState::Offline
        );
    }

    #[test]
    fn snapshot_is_stable_and_skips_unknown() {
        let mut core = core();
        core.directory_mut().load("Quiet", addr("10.0.0.1:4004"));
        let mut p = Params::new();
        p.insert("NAME".into(), Some("Foo".into()));
        core.directory_mut()
            .record_ping_reply(addr("10.0.0.2:4004"), &p, now());
        p.insert("NAME".into(), Some("Bar".into()));
        core.directory_mut()
            .record_ping_reply(addr("10.0.0.3:4004"), &p, now());

        let first = core.snapshot();
        assert_eq!(first, core.snapshot());
        let lines: Vec<&str> = first.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Bar"));
        assert!(lines[1].contains("Foo"));
        assert!(!first.contains("Quiet"));
    }
}
