//! Exchange bookkeeping shared by the blocking and async channels

use tokio_util::sync::CancellationToken;

use crate::error::{AdbError, Result};
use super::CompressionLevels;

/// Progress of the current logical exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    #[default]
    Idle,
    SentRequest,
    ReceivingHeader,
    ReceivingPayload,
    Done,
    Failed,
}

impl ExchangeState {
    /// Whether an exchange was left between its request and its terminator
    pub fn is_mid_exchange(self) -> bool {
        matches!(
            self,
            ExchangeState::SentRequest | ExchangeState::ReceivingHeader | ExchangeState::ReceivingPayload
        )
    }
}

#[derive(Debug, Default)]
pub(crate) struct Exchange {
    pub(crate) state: ExchangeState,
    broken: Option<String>,
    pub(crate) levels: CompressionLevels,
    cancel: Option<CancellationToken>,
}

impl Exchange {
    pub(crate) fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancel = Some(token);
    }

    pub(crate) fn is_usable(&self) -> bool {
        self.broken.is_none() && !self.state.is_mid_exchange()
    }

    /// Start a new exchange on this connection
    pub(crate) fn begin(&mut self, what: &str) -> Result<()> {
        if self.state.is_mid_exchange() {
            // An earlier exchange was abandoned part way (dropped future or iterator).
            self.poison(format!("{:?} exchange was abandoned", self.state));
        }
        if let Some(reason) = &self.broken {
            return Err(AdbError::InvalidRequest(format!(
                "sync connection unusable for {}: {}",
                what, reason
            )));
        }

        self.check_cancelled()?;
        self.state = ExchangeState::Idle;
        tracing::debug!("Sync {}", what);
        Ok(())
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(AdbError::Cancelled),
            _ => Ok(()),
        }
    }

    pub(crate) fn poison(&mut self, reason: impl Into<String>) {
        if self.broken.is_none() {
            self.broken = Some(reason.into());
        }
    }

    /// Close the exchange with its outcome
    ///
    /// A failure after the request went out leaves the stream at an unknown
    /// position, so the connection is poisoned. A remote errno reply was
    /// consumed whole and leaves the stream in step.
    pub(crate) fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.state = ExchangeState::Done;
                Ok(value)
            }
            Err(e) => {
                if self.state != ExchangeState::Idle {
                    self.state = ExchangeState::Failed;
                    if !e.is_remote_failure() {
                        self.poison(e.to_string());
                    }
                }
                tracing::debug!("Sync exchange failed: {}", e);
                Err(e)
            }
        }
    }
}
