//! Process configuration.
//!
//! Defaults are built in, an optional TOML file overrides them, and
//! environment variables override the file:
//!
//! - `TICKSTEP_CONFIG`: path to a TOML config file (optional)
//! - `TICKSTEP_SIM_HZ` / `TICKSTEP_NET_HZ`: simulation / network rates
//! - `TICKSTEP_INPUT_DELAY`: sim ticks between receive and apply
//! - `TICKSTEP_RING_CAPACITY`: scheduled-input ring size
//! - `TICKSTEP_MAX_PEERS`: concurrent peer limit (== ack table size)
//! - `TICKSTEP_BIND_ADDR` / `TICKSTEP_PORT`: server listen address
//! - `TICKSTEP_SERVER_HOST` / `TICKSTEP_SERVER_PORT`: client target
//! - `TICKSTEP_SEND_PERIOD_MS`: client input cadence

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_SIM_HZ: u32 = 60;
pub const DEFAULT_NET_HZ: u32 = 20;
pub const DEFAULT_INPUT_DELAY: u64 = 1;
pub const DEFAULT_RING_CAPACITY: usize = 256;
pub const DEFAULT_MAX_PEERS: usize = 64;
pub const DEFAULT_PORT: u16 = 7777;
pub const DEFAULT_SEND_PERIOD_MS: u64 = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server process configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Simulation rate in ticks per second.
    pub sim_hz: u32,
    /// Snapshot emission rate in ticks per second.
    pub net_hz: u32,
    /// Sim ticks between an input's receipt and its application.
    pub input_delay_ticks: u64,
    /// Capacity of the tick-scheduled input ring.
    pub ring_capacity: usize,
    /// Maximum concurrent peers; also the ack table length.
    pub max_peers: usize,
    /// Listen address. Use "::" for kernel dual-stack where enabled.
    pub bind_addr: String,
    /// Listen port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            sim_hz: DEFAULT_SIM_HZ,
            net_hz: DEFAULT_NET_HZ,
            input_delay_ticks: DEFAULT_INPUT_DELAY,
            ring_capacity: DEFAULT_RING_CAPACITY,
            max_peers: DEFAULT_MAX_PEERS,
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Load configuration: defaults, then `TICKSTEP_CONFIG` file if set,
    /// then environment overrides, then validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("TICKSTEP_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config.validated())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    fn apply_env(&mut self) {
        env_override("TICKSTEP_SIM_HZ", &mut self.sim_hz);
        env_override("TICKSTEP_NET_HZ", &mut self.net_hz);
        env_override("TICKSTEP_INPUT_DELAY", &mut self.input_delay_ticks);
        env_override("TICKSTEP_RING_CAPACITY", &mut self.ring_capacity);
        env_override("TICKSTEP_MAX_PEERS", &mut self.max_peers);
        env_override("TICKSTEP_BIND_ADDR", &mut self.bind_addr);
        env_override("TICKSTEP_PORT", &mut self.port);
    }

    /// Clamp nonsense values back to defaults so a bad deployment knob
    /// degrades to a running server instead of a crash or a spin.
    pub fn validated(mut self) -> Self {
        if self.sim_hz == 0 {
            warn!("sim_hz of 0 is invalid, falling back to {}", DEFAULT_SIM_HZ);
            self.sim_hz = DEFAULT_SIM_HZ;
        }
        if self.net_hz == 0 {
            warn!("net_hz of 0 is invalid, falling back to {}", DEFAULT_NET_HZ);
            self.net_hz = DEFAULT_NET_HZ;
        }
        if self.max_peers == 0 {
            warn!("max_peers of 0 is invalid, falling back to {}", DEFAULT_MAX_PEERS);
            self.max_peers = DEFAULT_MAX_PEERS;
        }
        if self.ring_capacity as u64 <= self.input_delay_ticks {
            let bumped = (self.input_delay_ticks as usize + 1)
                .next_power_of_two()
                .max(DEFAULT_RING_CAPACITY);
            warn!(
                "ring_capacity {} cannot cover an input delay of {} ticks, using {}",
                self.ring_capacity, self.input_delay_ticks, bumped
            );
            self.ring_capacity = bumped;
        }
        self
    }

    pub fn sim_period_ns(&self) -> u64 {
        1_000_000_000 / u64::from(self.sim_hz)
    }

    pub fn net_period_ns(&self) -> u64 {
        1_000_000_000 / u64::from(self.net_hz)
    }

    pub fn sim_dt_fixed(&self) -> f64 {
        1.0 / f64::from(self.sim_hz)
    }
}

/// Client process configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    /// Milliseconds between input sends.
    pub send_period_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_host: "127.0.0.1".to_string(),
            server_port: DEFAULT_PORT,
            send_period_ms: DEFAULT_SEND_PERIOD_MS,
        }
    }
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("TICKSTEP_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        env_override("TICKSTEP_SERVER_HOST", &mut config.server_host);
        env_override("TICKSTEP_SERVER_PORT", &mut config.server_port);
        env_override("TICKSTEP_SEND_PERIOD_MS", &mut config.send_period_ms);
        if config.send_period_ms == 0 {
            warn!(
                "send_period_ms of 0 is invalid, falling back to {}",
                DEFAULT_SEND_PERIOD_MS
            );
            config.send_period_ms = DEFAULT_SEND_PERIOD_MS;
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

fn env_override<T: FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!("ignoring unparseable {key}={raw}"),
        }
    }
}
