//! Protocol Session
//!
//! Owns one connection to the adb server for one top-level operation.

use std::io::{Read, Write};
use std::net::TcpStream;

use crate::config::Config;
use crate::error::{AdbError, Result};
use crate::protocol::{read_status, read_string, write_command, Command, StatusToken};
use crate::shell::ShellLineFilter;
use crate::sync::{CompressionLevels, SyncChannel};

/// A single-use request/response session over one connection
///
/// Preparatory requests such as [`select_device`](Self::select_device) borrow
/// the session; the top-level operations consume it, so a session can never
/// run a second one.
#[derive(Debug)]
pub struct Session<S = TcpStream> {
    stream: S,

    /// Peer address for logging
    peer_addr: String,

    levels: CompressionLevels,

    /// Set once a request failed; the server closes the connection after FAIL
    failed: bool,
}

impl Session<TcpStream> {
    /// Connect to the adb server named by `config`
    ///
    /// Sets the configured timeouts and disables Nagle's algorithm.
    pub fn connect(config: &Config) -> Result<Self> {
        let addr = config.socket_addr()?;
        let stream = match config.connect_timeout() {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };

        stream.set_nodelay(true)?;
        stream.set_read_timeout(config.read_timeout())?;
        stream.set_write_timeout(config.write_timeout())?;

        tracing::debug!("Connected to adb server at {}", addr);
        Ok(Self {
            stream,
            peer_addr: addr.to_string(),
            levels: CompressionLevels::from(config),
            failed: false,
        })
    }

    /// Connect and switch the connection to a device transport
    pub fn open(config: &Config, serial: Option<&str>) -> Result<Self> {
        let mut session = Self::connect(config)?;
        session.select_device(serial)?;
        Ok(session)
    }
}

impl<S: Read + Write> Session<S> {
    /// Wrap an already connected stream
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            peer_addr: "stream".to_string(),
            levels: CompressionLevels::default(),
            failed: false,
        }
    }

    pub fn with_levels(mut self, levels: CompressionLevels) -> Self {
        self.levels = levels;
        self
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Send a command and require `OKAY`
    ///
    /// `FAIL` surfaces as [`AdbError::Remote`] with the server's message.
    /// Only the consuming operations and [`select_device`](Self::select_device)
    /// send commands, so one session never carries a second operation.
    pub(crate) fn request(&mut self, command: &Command) -> Result<()> {
        if self.failed {
            return Err(AdbError::InvalidRequest("session already failed".to_string()));
        }
        // Cleared again only when the server answers OKAY.
        self.failed = true;
        write_command(&mut self.stream, command)?;

        match read_status(&mut self.stream)? {
            StatusToken::Okay => {
                tracing::trace!("{} accepted {:?}", self.peer_addr, command.as_str());
                self.failed = false;
                Ok(())
            }
            StatusToken::Fail(message) => {
                tracing::debug!("{} refused {:?}: {}", self.peer_addr, command.as_str(), message);
                Err(AdbError::Remote(message))
            }
        }
    }

    /// Whether a request on this session has failed
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Route the connection to `serial`, or to the only device when `None`
    pub fn select_device(&mut self, serial: Option<&str>) -> Result<()> {
        let command = match serial {
            Some(serial) => Command::transport(serial),
            None => Command::transport_any(),
        };
        self.request(&command)
    }

    /// Run a request answered with `OKAY` plus a length-prefixed string
    pub fn query(mut self, command: &Command) -> Result<String> {
        self.request(command)?;
        read_string(&mut self.stream)
    }

    /// Run a request and hand back the switched stream untouched
    pub fn raw(mut self, command: &Command) -> Result<S> {
        self.request(command)?;
        Ok(self.stream)
    }

    /// Run `shell:<command>` and return its output with CR LF collapsed
    pub fn shell(self, command: &str) -> Result<ShellLineFilter<S>> {
        let stream = self.raw(&Command::shell(command))?;
        Ok(ShellLineFilter::new(stream))
    }

    /// Switch the connection into sync mode
    pub fn sync(mut self) -> Result<SyncChannel<S>> {
        self.request(&Command::sync())?;
        Ok(SyncChannel::new(self.stream).with_levels(self.levels))
    }

    /// Drive one sync operation, then send `QUIT` and close the connection
    pub fn with_sync<T, F>(self, op: F) -> Result<T>
    where
        F: FnOnce(&mut SyncChannel<S>) -> Result<T>,
    {
        let mut channel = self.sync()?;
        let result = op(&mut channel);

        if channel.is_usable() {
            if let Err(e) = channel.quit() {
                tracing::debug!("QUIT after sync operation failed: {}", e);
            }
        }
        result
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
