//! Suspendable protocol session on tokio

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::Config;
use crate::error::{AdbError, Result};
use crate::protocol::{read_status_async, read_string_async, write_command_async, Command, StatusToken};
use crate::shell::ShellLineFilter;
use crate::sync::{AsyncSyncChannel, CompressionLevels};

/// Async counterpart of [`Session`](super::Session)
#[derive(Debug)]
pub struct AsyncSession<S = TcpStream> {
    stream: S,
    levels: CompressionLevels,
    failed: bool,
}

impl AsyncSession<TcpStream> {
    /// Connect to the adb server named by `config`
    ///
    /// Read and write timeouts are left to the caller (e.g.
    /// `tokio::time::timeout` around an operation).
    pub async fn connect(config: &Config) -> Result<Self> {
        let addr = config.socket_addr()?;
        let connecting = TcpStream::connect(addr);
        let stream = match config.connect_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, connecting).await.map_err(|_| {
                AdbError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                ))
            })??,
            None => connecting.await?,
        };
        stream.set_nodelay(true)?;

        tracing::debug!("Connected to adb server at {}", addr);
        Ok(Self {
            stream,
            levels: CompressionLevels::from(config),
            failed: false,
        })
    }

    pub async fn open(config: &Config, serial: Option<&str>) -> Result<Self> {
        let mut session = Self::connect(config).await?;
        session.select_device(serial).await?;
        Ok(session)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncSession<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            levels: CompressionLevels::default(),
            failed: false,
        }
    }

    pub fn with_levels(mut self, levels: CompressionLevels) -> Self {
        self.levels = levels;
        self
    }

    pub(crate) async fn request(&mut self, command: &Command) -> Result<()> {
        if self.failed {
            return Err(AdbError::InvalidRequest("session already failed".to_string()));
        }
        self.failed = true;
        write_command_async(&mut self.stream, command).await?;

        match read_status_async(&mut self.stream).await? {
            StatusToken::Okay => {
                self.failed = false;
                Ok(())
            }
            StatusToken::Fail(message) => {
                tracing::debug!("Server refused {:?}: {}", command.as_str(), message);
                Err(AdbError::Remote(message))
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub async fn select_device(&mut self, serial: Option<&str>) -> Result<()> {
        let command = match serial {
            Some(serial) => Command::transport(serial),
            None => Command::transport_any(),
        };
        self.request(&command).await
    }

    pub async fn query(mut self, command: &Command) -> Result<String> {
        self.request(command).await?;
        read_string_async(&mut self.stream).await
    }

    pub async fn raw(mut self, command: &Command) -> Result<S> {
        self.request(command).await?;
        Ok(self.stream)
    }

    pub async fn shell(self, command: &str) -> Result<ShellLineFilter<S>> {
        let stream = self.raw(&Command::shell(command)).await?;
        Ok(ShellLineFilter::new(stream))
    }

    /// Switch into sync mode; call [`AsyncSyncChannel::quit`] when done
    pub async fn sync(mut self) -> Result<AsyncSyncChannel<S>> {
        self.request(&Command::sync()).await?;
        Ok(AsyncSyncChannel::new(self.stream).with_levels(self.levels))
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
