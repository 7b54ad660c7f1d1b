// src/config.rs

//! Manages server configuration: loading, defaults, and validation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Tunables for the hub and its per-connection pumps.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue. A full queue evicts the
    /// connection instead of blocking the hub loop.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    /// Capacity of the hub's register/unregister/broadcast/relay channels.
    #[serde(default = "default_event_queue")]
    pub event_queue: usize,
    /// Capacity of the buffered log channel. Overflowing lines are dropped.
    #[serde(default = "default_log_queue")]
    pub log_queue: usize,
    /// Keepalive ping period. Must be shorter than the peer's read timeout.
    #[serde(default = "default_ping_period", with = "humantime_serde")]
    pub ping_period: Duration,
    /// Time allowed for a single write (including a coalesced batch) to the peer.
    #[serde(default = "default_write_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,
    /// Maximum inbound frame size in bytes. Oversized frames are logged and skipped.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue: default_outbound_queue(),
            event_queue: default_event_queue(),
            log_queue: default_log_queue(),
            ping_period: default_ping_period(),
            write_timeout: default_write_timeout(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

fn default_outbound_queue() -> usize {
    32
}
fn default_event_queue() -> usize {
    256
}
fn default_log_queue() -> usize {
    256
}
fn default_ping_period() -> Duration {
    // 90% of the conventional 60s peer read timeout.
    Duration::from_secs(54)
}
fn default_write_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_max_frame_bytes() -> usize {
    64 * 1024
}

/// The main server configuration structure.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub hub: HubConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            hub: HubConfig::default(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    9443
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file at '{path}'"))?;
        Ok(config)
    }
}
