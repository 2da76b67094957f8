//! Node configuration: recognized keys, defaults, file loading.
//!
//! Configuration comes from a JSON file (`--conf`) with CLI flags layered
//! on top. A `--conf` path that cannot be read is a fatal startup error;
//! everything else falls back to the defaults below.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Coordinates of the overlay bridge (the SAM-style datagram endpoint).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SamConfig {
    pub address: String,
    pub tcp: u16,
    pub udp: u16,
    pub name: String,
}

impl Default for SamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            tcp: 7656,
            udp: 7655,
            name: "rbote".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Seed node destinations in base64.
    pub address: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// External endpoint the bridge publishes for us.
    pub host: String,
    pub port: u16,
    pub sam: SamConfig,
    pub bootstrap: BootstrapConfig,
    /// Root for persistent state; empty means autodetect.
    pub datadir: String,
    pub loglevel: String,
    pub logfile: String,
    /// Log destination: `stdout`, `file`, or `syslog`.
    pub log: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5050,
            sam: SamConfig::default(),
            bootstrap: BootstrapConfig::default(),
            datadir: String::new(),
            loglevel: "info".to_string(),
            logfile: String::new(),
            log: "file".to_string(),
        }
    }
}

impl Config {
    /// Load from a JSON file. A missing or malformed file is fatal; the
    /// caller decides whether a file was requested at all.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("missing/unreadable config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("malformed config file: {}", path.display()))
    }

    /// The data directory: explicit value, `$HOME/.rboted`, or
    /// `/tmp/rboted` in that order.
    pub fn resolve_datadir(&self) -> PathBuf {
        if !self.datadir.is_empty() {
            return PathBuf::from(&self.datadir);
        }
        match std::env::var_os("HOME") {
            Some(home) if !home.is_empty() => PathBuf::from(home).join(".rboted"),
            _ => PathBuf::from("/tmp/rboted"),
        }
    }
}

/// Create the mailbox directories under the data directory. The DHT class
/// directories are created by the content store itself.
pub fn init_mailboxes(datadir: &Path) -> Result<()> {
    for mailbox in ["inbox", "outbox", "sent", "incomplete"] {
        let dir = datadir.join(mailbox);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create {}", dir.display()))?;
    }
    Ok(())
}
