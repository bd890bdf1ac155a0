//! UDP transport: one shared socket, a receive loop feeding the core, fire-and-forget sends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use imud_core::{ImudCore, OutboundAction};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// Pause between datagrams so a flood cannot pin the loop.
const RECV_IDLE: Duration = Duration::from_millis(10);
const MAX_DATAGRAM: usize = 65536;

pub struct Transport {
    socket: UdpSocket,
    local: SocketAddr,
}

impl Transport {
    pub async fn bind(port: u16) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        let local = socket.local_addr()?;
        tracing::info!(%local, "listening for intermud2");
        Ok(Self { socket, local })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Send one datagram. Failures are logged, never returned.
    pub async fn send(&self, to: SocketAddr, bytes: &[u8]) {
        if let Err(e) = self.socket.send_to(bytes, to).await {
            tracing::warn!(%to, "send failed: {e}");
        }
    }

    /// Carry out core actions in order. One failed send does not stop the rest.
    pub async fn perform(&self, actions: Vec<OutboundAction>) {
        for action in actions {
            match action {
                OutboundAction::SendDatagram(to, bytes) => self.send(to, &bytes).await,
                OutboundAction::RemoteWho { from, mud, text } => {
                    tracing::info!(%from, mud = mud.as_deref(), "rwho: {}", imud_core::color::strip(&text));
                    println!("{text}\x1b[0m");
                }
            }
        }
    }
}

/// Receive loop: decode and dispatch each datagram, then perform the resulting actions.
/// Runs until the runtime shuts down; receive errors are logged and the loop continues.
pub async fn recv_loop(transport: Arc<Transport>, core: Arc<Mutex<ImudCore>>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match transport.socket.recv_from(&mut buf).await {
            Ok((n, from)) => {
                let now = chrono::Utc::now();
                let result = core.lock().await.on_datagram(&buf[..n], from, now);
                match result {
                    Ok(actions) => transport.perform(actions).await,
                    Err(e) => tracing::debug!(%from, "dropping datagram: {e}"),
                }
            }
            Err(e) => tracing::warn!("receive failed: {e}"),
        }
        tokio::time::sleep(RECV_IDLE).await;
    }
}
