//! Configuration for adbwire
//!
//! Centralized configuration with sensible defaults.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::error::{AdbError, Result};

/// Default adb server port
pub const DEFAULT_ADB_PORT: u16 = 5037;

/// Main configuration for a client
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Address of the local adb host daemon (host:port)
    pub server_addr: String,

    /// Connect timeout (milliseconds, 0 = OS default)
    pub connect_timeout_ms: u64,

    /// Socket read timeout (milliseconds, 0 = none)
    pub read_timeout_ms: u64,

    /// Socket write timeout (milliseconds, 0 = none)
    pub write_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Compression Configuration
    // -------------------------------------------------------------------------
    /// Brotli quality used when pushing (0-11)
    pub brotli_quality: u32,

    /// Zstd level used when pushing (0 = library default)
    pub zstd_level: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{}", DEFAULT_ADB_PORT),
            connect_timeout_ms: 5000,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            brotli_quality: 5,
            zstd_level: 0,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Default config with the server address taken from the environment
    ///
    /// Honours `ANDROID_ADB_SERVER_ADDRESS` and `ANDROID_ADB_SERVER_PORT`
    /// the same way the stock adb client does.
    pub fn from_env() -> Self {
        let host = std::env::var("ANDROID_ADB_SERVER_ADDRESS")
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let port = std::env::var("ANDROID_ADB_SERVER_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(DEFAULT_ADB_PORT);

        Self {
            server_addr: format!("{}:{}", host, port),
            ..Self::default()
        }
    }

    /// Resolve `server_addr` to a socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.server_addr
            .to_socket_addrs()
            .map_err(|e| AdbError::Config(format!("bad server address {}: {}", self.server_addr, e)))?
            .next()
            .ok_or_else(|| AdbError::Config(format!("server address {} did not resolve", self.server_addr)))
    }

    pub(crate) fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    pub(crate) fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    pub(crate) fn write_timeout(&self) -> Option<Duration> {
        millis(self.write_timeout_ms)
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the adb server address (host:port)
    pub fn server_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server_addr = addr.into();
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the Brotli quality for compressed pushes
    pub fn brotli_quality(mut self, quality: u32) -> Self {
        self.config.brotli_quality = quality.min(11);
        self
    }

    /// Set the Zstd level for compressed pushes
    pub fn zstd_level(mut self, level: i32) -> Self {
        self.config.zstd_level = level;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
