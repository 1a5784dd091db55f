//! Command definitions
//!
//! Host and device request strings sent to the adb server.

use std::fmt;

/// Longest command the 4-hex-digit length prefix can describe
pub const MAX_COMMAND_LEN: usize = 0xFFFF;

/// An immutable request identifier such as `host:transport:<serial>` or `sync:`
///
/// The core only frames and sends whatever string it is given; the
/// constructors below cover the commands the crate itself issues.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(String);

impl Command {
    /// Wrap an arbitrary request string
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Switch the connection to the device with this serial
    pub fn transport(serial: &str) -> Self {
        Self(format!("host:transport:{}", serial))
    }

    /// Switch the connection to the only connected device
    pub fn transport_any() -> Self {
        Self::new("host:transport-any")
    }

    /// Ask the server for its device list
    pub fn devices() -> Self {
        Self::new("host:devices")
    }

    /// Ask the server for its protocol version
    pub fn version() -> Self {
        Self::new("host:version")
    }

    /// Switch a device connection into sync mode
    pub fn sync() -> Self {
        Self::new("sync:")
    }

    /// Run a command in the device shell (raw pty output)
    pub fn shell(command: &str) -> Self {
        Self(format!("shell:{}", command))
    }

    /// Run a command using the shell v2 packet protocol
    pub fn shell_v2(command: &str) -> Self {
        Self(format!("shell,v2:{}", command))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Command {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Command {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}
