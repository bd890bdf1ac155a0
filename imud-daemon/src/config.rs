//! Load config from file and environment.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use imud_core::LocalIdentity;
use serde::Deserialize;

/// Daemon configuration. File: $IMUD_CONFIG, ~/.config/imud/config.toml or /etc/imud/config.toml.
/// Env overrides: IMUD_PORT, IMUD_I2_PORT, IMUD_NAME, IMUD_HOSTNAME, IMUD_BOOTMASTER,
/// IMUD_EXPORT_TO, IMUD_MUD_LIST.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Game listen port (default 4000).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Intermud2 UDP port (default: port + 4).
    #[serde(default)]
    pub i2_port: Option<u16>,
    /// Display name, also the name on the network.
    #[serde(default = "default_name")]
    pub name: String,
    /// Advertised mud name (default: name).
    #[serde(default)]
    pub mud_name: Option<String>,
    /// Advertised host name.
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Rendezvous used to join the network, as "host port".
    #[serde(default = "default_bootmaster")]
    pub bootmaster: String,
    /// Snapshot written every maintenance tick.
    #[serde(default)]
    pub export_to: Option<PathBuf>,
    /// Host list read at startup.
    #[serde(default)]
    pub mud_list: Option<PathBuf>,
}

fn default_port() -> u16 {
    4000
}
fn default_name() -> String {
    "RustMUD".to_string()
}
fn default_hostname() -> String {
    "localhost".to_string()
}
fn default_bootmaster() -> String {
    "210.59.236.38 4004".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            i2_port: None,
            name: default_name(),
            mud_name: None,
            hostname: default_hostname(),
            bootmaster: default_bootmaster(),
            export_to: None,
            mud_list: None,
        }
    }
}

impl Config {
    pub fn i2_port(&self) -> u16 {
        self.i2_port.unwrap_or(self.port.saturating_add(4))
    }

    pub fn mud_name(&self) -> &str {
        self.mud_name.as_deref().unwrap_or(&self.name)
    }

    /// Bootmaster as (host, port).
    pub fn bootmaster(&self) -> anyhow::Result<(String, u16)> {
        let mut parts = self.bootmaster.split_whitespace();
        let (Some(host), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
            bail!("bootmaster must be \"host port\", got {:?}", self.bootmaster);
        };
        let port = port
            .parse::<u16>()
            .with_context(|| format!("bad bootmaster port {port:?}"))?;
        Ok((host.to_string(), port))
    }

    pub fn identity(&self) -> LocalIdentity {
        let mut id = LocalIdentity::new(&self.name, &self.hostname, self.port);
        id.mud_name = self.mud_name().to_string();
        id.udp_port = self.i2_port();
        id
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(p) = var("IMUD_PORT").and_then(|s| s.parse().ok()) {
            self.port = p;
        }
        if let Some(p) = var("IMUD_I2_PORT").and_then(|s| s.parse().ok()) {
            self.i2_port = Some(p);
        }
        if let Some(s) = var("IMUD_NAME") {
            self.name = s;
        }
        if let Some(s) = var("IMUD_HOSTNAME") {
            self.hostname = s;
        }
        if let Some(s) = var("IMUD_BOOTMASTER") {
            self.bootmaster = s;
        }
        if let Some(s) = var("IMUD_EXPORT_TO") {
            self.export_to = Some(PathBuf::from(s));
        }
        if let Some(s) = var("IMUD_MUD_LIST") {
            self.mud_list = Some(PathBuf::from(s));
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(p) => load_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => load_file(&p)?,
            None => Config::default(),
        },
    };
    c.apply_env(|k| std::env::var(k).ok());
    c.bootmaster()?;
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(p) = std::env::var_os("IMUD_CONFIG") {
        out.push(PathBuf::from(p));
    }
    if let Some(h) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(h.join(".config/imud/config.toml"));
    }
    out.push(PathBuf::from("/etc/imud/config.toml"));
    out
}

fn load_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))
}
