use serde_derive::{Deserialize, Serialize};
use skua::buffer::BufferConfig;
use skua::net::NetworkConfig;
use std::path::Path;
use vane::logging::{self, Logger};

pub const DEFAULT_COLLECTOR_PORT: u16 = 10004;
pub const DEFAULT_RECEIVER_PORT: u16 = 10003;

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Buffer {
    pub static_backlog: usize,
    pub dynamic_backlog: usize,
    pub dynamic_increments: usize,
    pub history: bool,
    pub gc: bool,
    pub gc_interval: u64,
    pub gc_level: usize,
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer {
            static_backlog: 200,
            dynamic_backlog: 1000,
            dynamic_increments: 1080,
            history: false,
            gc: false,
            gc_interval: 120,
            gc_level: 2,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub crc: bool,
    pub ext_squitter_only: bool,
    pub sync_filter: bool,
}

impl Default for Filter {
    fn default() -> Filter {
        Filter {
            crc: true,
            ext_squitter_only: true,
            sync_filter: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Network {
    pub host: String,
    pub port: u16,
    /// Keep-alive cadence of the relay in milliseconds
    pub timeout: u64,
    /// Seconds between reconnection attempts
    pub reconnect_interval: u64,
}

impl Default for Network {
    fn default() -> Network {
        Network {
            host: "localhost".to_owned(),
            port: DEFAULT_COLLECTOR_PORT,
            timeout: 1500,
            reconnect_interval: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Input {
    pub host: String,
    pub port: u16,
    pub fec: bool,
}

impl Default for Input {
    fn default() -> Input {
        Input {
            host: "localhost".to_owned(),
            port: DEFAULT_RECEIVER_PORT,
            fec: true,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Ident {
    pub username: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Device {
    pub serial: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Log {
    pub level: String,
}

impl Default for Log {
    fn default() -> Log {
        Log {
            level: "info".to_owned(),
        }
    }
}

/// Daemon configuration, loaded from one TOML file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeederConfig {
    pub buffer: Buffer,
    pub filter: Filter,
    pub network: Network,
    pub input: Input,
    pub ident: Ident,
    pub device: Device,
    pub log: Log,
}

impl FeederConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<FeederConfig, String> {
        serdeconv::from_toml_file(path).map_err(|err| err.to_string())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        serdeconv::to_toml_file(self, path).map_err(|err| err.to_string())
    }

    /// Fixes up inconsistent settings, warning about each adjustment.
    pub fn fix(&mut self, log: &Logger) {
        let mut buffer = self.buffer_config();
        buffer.fix(log);

        self.buffer.static_backlog = buffer.static_backlog;
        self.buffer.gc = buffer.gc;
        self.buffer.gc_level = buffer.gc_level;
    }

    /// Validates settings that cannot be fixed up. Fatal at startup.
    pub fn check(&self, log: &Logger) -> bool {
        let mut sane = true;

        if self.network.host.is_empty() {
            logging::error!(log, "network.host is missing");
            sane = false;
        }
        if self.network.port == 0 {
            logging::error!(log, "network.port = 0");
            sane = false;
        }
        if self.network.timeout == 0 {
            logging::error!(log, "network.timeout = 0");
            sane = false;
        }
        if self.input.host.is_empty() {
            logging::error!(log, "input.host is missing");
            sane = false;
        }
        if self.input.port == 0 {
            logging::error!(log, "input.port = 0");
            sane = false;
        }

        sane
    }

    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            static_backlog: self.buffer.static_backlog,
            dynamic_backlog: self.buffer.dynamic_backlog,
            dynamic_increments: self.buffer.dynamic_increments,
            history: self.buffer.history,
            gc: self.buffer.gc,
            gc_interval: self.buffer.gc_interval,
            gc_level: self.buffer.gc_level,
        }
    }

    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.network.host.clone(),
            port: self.network.port,
            reconnect_interval: self.network.reconnect_interval,
        }
    }
}
