//! Startup sequence and the two repeating maintenance chains.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use imud_core::scheduler::{MAINTENANCE, REFRESH};
use imud_core::{parse_host_list, HostEntry, ImudCore};
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::Config;
use crate::transport::Transport;

/// Resolve a host name or IP literal, preferring IPv4 (the I2 network is IPv4).
pub async fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    match tokio::net::lookup_host((host, port)).await {
        Ok(addrs) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            addrs
                .iter()
                .find(|a| a.is_ipv4())
                .or_else(|| addrs.first())
                .copied()
        }
        Err(e) => {
            tracing::warn!(host, port, "cannot resolve: {e}");
            None
        }
    }
}

/// Read and resolve the configured host list. Missing or unreadable files yield an empty list.
pub async fn load_host_list(path: Option<&Path>) -> Vec<(String, SocketAddr)> {
    let Some(path) = path else {
        return Vec::new();
    };
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(path = %path.display(), "cannot read host list: {e}");
            return Vec::new();
        }
    };
    let mut out = Vec::new();
    for HostEntry {
        name,
        host,
        udp_port,
    } in parse_host_list(&text)
    {
        if let Some(addr) = resolve(&host, udp_port).await {
            out.push((name, addr));
        }
    }
    out
}

/// One-time startup: load hosts, announce, probe, ping, and join through the bootmaster.
pub async fn startup(core: &Mutex<ImudCore>, transport: &Transport, cfg: &Config) {
    let hosts = load_host_list(cfg.mud_list.as_deref()).await;
    let bootmaster = match cfg.bootmaster() {
        Ok((host, port)) => resolve(&host, port).await,
        Err(e) => {
            tracing::warn!("no bootmaster: {e:#}");
            None
        }
    };
    tracing::info!(hosts = hosts.len(), "starting intermud2");
    let actions = core
        .lock()
        .await
        .startup(&hosts, bootmaster, chrono::Utc::now());
    transport.perform(actions).await;
}

/// Chain A: persist the snapshot (if an export path is set), then ping silent muds.
pub async fn maintenance_chain(
    core: Arc<Mutex<ImudCore>>,
    transport: Arc<Transport>,
    export_to: Option<PathBuf>,
) {
    let mut timer = interval_at(Instant::now() + MAINTENANCE.first, MAINTENANCE.period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        timer.tick().await;
        let (snapshot, actions) = {
            let mut c = core.lock().await;
            let snapshot = export_to.as_ref().map(|_| c.snapshot());
            (snapshot, c.maintenance_tick())
        };
        if let (Some(path), Some(snapshot)) = (&export_to, snapshot) {
            persist(path, &snapshot).await;
        }
        transport.perform(actions).await;
    }
}

/// Chain B: offline sweep, then ping + rwho every live mud.
pub async fn refresh_chain(core: Arc<Mutex<ImudCore>>, transport: Arc<Transport>) {
    let mut timer = interval_at(Instant::now() + REFRESH.first, REFRESH.period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        timer.tick().await;
        let actions = core.lock().await.refresh_tick(chrono::Utc::now());
        transport.perform(actions).await;
    }
}

/// Write the snapshot. Failures are logged; the next tick retries.
async fn persist(path: &Path, snapshot: &str) {
    let started = std::time::Instant::now();
    match tokio::fs::write(path, snapshot).await {
        Ok(()) => tracing::debug!(
            path = %path.display(),
            hosts = snapshot.lines().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "wrote mudlist snapshot"
        ),
        Err(e) => tracing::warn!(path = %path.display(), "cannot write snapshot: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imud_core::{LocalIdentity, Params};
    use std::io::Write;
    use tokio::net::UdpSocket;

    async fn node() -> (Arc<Mutex<ImudCore>>, Arc<Transport>) {
        let transport = Arc::new(Transport::bind(0).await.unwrap());
        let mut core = ImudCore::new(LocalIdentity::new("Eden", "localhost", 4000));
        core.set_local_addr(transport.local_addr());
        (Arc::new(Mutex::new(core)), transport)
    }

    fn named(name: &str) -> Params {
        let mut p = Params::new();
        p.insert("NAME".into(), Some(name.into()));
        p
    }

    async fn next_command(peer: &UdpSocket) -> String {
        let mut buf = [0u8; 4096];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        imud_core::decode(&buf[..n], from).unwrap().command
    }

    #[tokio::test]
    async fn host_list_resolves_ip_literals_and_skips_bad_lines() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# test list\nEden | 10.0.0.1 | 4004\nbroken line\nBeta | 10.0.0.2 | 5004").unwrap();
        let hosts = load_host_list(Some(f.path())).await;
        assert_eq!(
            hosts,
            vec![
                ("Eden".to_string(), "10.0.0.1:4004".parse().unwrap()),
                ("Beta".to_string(), "10.0.0.2:5004".parse().unwrap()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_host_list_is_empty() {
        assert!(load_host_list(None).await.is_empty());
        assert!(load_host_list(Some(Path::new("/nonexistent/mudlist.txt")))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn persist_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muds.txt");
        persist(&path, "line\r\n").await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line\r\n");
        // Unwritable target is logged, not fatal.
        persist(&dir.path().join("missing/dir/muds.txt"), "x").await;
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_chain_persists_then_pings_silent_muds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muds.txt");
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (core, transport) = node().await;
        {
            let mut c = core.lock().await;
            c.directory_mut().load("Silent", peer.local_addr().unwrap());
            c.directory_mut().record_ping_reply(
                "192.0.2.10:4004".parse().unwrap(),
                &named("Known"),
                chrono::Utc::now(),
            );
        }

        let started = Instant::now();
        tokio::spawn(maintenance_chain(core, transport, Some(path.clone())));
        assert_eq!(next_command(&peer).await, "ping_q");
        assert!(started.elapsed() >= MAINTENANCE.first);
        let snapshot = std::fs::read_to_string(&path).unwrap();
        assert!(snapshot.contains("Known"));
        assert!(!snapshot.contains("Silent"));
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_chain_without_export_path_still_pings() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (core, transport) = node().await;
        core.lock()
            .await
            .directory_mut()
            .load("Silent", peer.local_addr().unwrap());

        tokio::spawn(maintenance_chain(core, transport, None));
        assert_eq!(next_command(&peer).await, "ping_q");
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_chain_pings_and_asks_who_of_live_muds() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (core, transport) = node().await;
        core.lock().await.directory_mut().record_ping_reply(
            peer.local_addr().unwrap(),
            &named("Live"),
            chrono::Utc::now(),
        );

        let started = Instant::now();
        tokio::spawn(refresh_chain(core, transport));
        assert_eq!(next_command(&peer).await, "ping_q");
        assert!(started.elapsed() >= REFRESH.first);
        assert_eq!(next_command(&peer).await, "rwho_q");
    }
}
