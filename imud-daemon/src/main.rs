// imud: Intermud2 daemon. Transport, maintenance chains and persistence around imud-core.

mod config;
mod maintenance;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use imud_core::{Contact, ContactObserver, ImudCore};
use tokio::sync::Mutex;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logs every directory change.
struct LogObserver;

impl ContactObserver for LogObserver {
    fn contact_changed(&self, contact: &Contact) {
        tracing::debug!(
            mud = %contact.label(),
            addr = %contact.addr(),
            state = %contact.state(),
            "contact updated"
        );
    }
}

fn main() -> anyhow::Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("imud-daemon {}", VERSION);
                return Ok(());
            }
            "--config" | "-c" => {
                config_path = Some(args.next().context("--config needs a path")?.into());
            }
            other => anyhow::bail!("unknown argument {other:?}"),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = config::load(config_path.as_deref())?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let transport = Arc::new(
            transport::Transport::bind(cfg.i2_port())
                .await
                .with_context(|| format!("binding UDP port {}", cfg.i2_port()))?,
        );
        let mut core = ImudCore::with_observer(cfg.identity(), Box::new(LogObserver));
        core.set_local_addr(transport.local_addr());
        let core = Arc::new(Mutex::new(core));

        tokio::spawn(transport::recv_loop(transport.clone(), core.clone()));
        maintenance::startup(&core, &transport, &cfg).await;
        tokio::spawn(maintenance::maintenance_chain(
            core.clone(),
            transport.clone(),
            cfg.export_to.clone(),
        ));
        tokio::spawn(maintenance::refresh_chain(core.clone(), transport.clone()));

        shutdown_signal().await?;
        tracing::info!("shutting down");
        Ok::<(), anyhow::Error>(())
    })?;
    // Dropping the runtime cancels the receive loop and both chains and closes the socket.
    drop(rt);
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
