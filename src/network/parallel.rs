//! Parallel pulls, one connection per transfer

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::config::Config;
use crate::error::{AdbError, Result};
use crate::sync::CompressionType;
use super::Session;

/// One file to pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub remote: String,
    pub local: PathBuf,

    /// `Some` pulls with sync V2 negotiation, `None` uses V1
    pub compression: Option<CompressionType>,
}

impl PullRequest {
    pub fn new(remote: impl Into<String>, local: impl Into<PathBuf>) -> Self {
        Self {
            remote: remote.into(),
            local: local.into(),
            compression: None,
        }
    }

    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = Some(compression);
        self
    }
}

/// Pull every request concurrently, each on its own connection
///
/// Results come back in request order; one failure does not stop the others.
pub fn pull_many(config: &Config, serial: Option<&str>, requests: &[PullRequest]) -> Vec<Result<u64>> {
    let outcome = crossbeam::thread::scope(|scope| {
        let handles: Vec<_> = requests
            .iter()
            .map(|request| scope.spawn(move |_| pull_one(config, serial, request)))
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(AdbError::Io(std::io::Error::other("pull thread panicked"))))
            })
            .collect::<Vec<_>>()
    });

    outcome.unwrap_or_else(|_| {
        requests
            .iter()
            .map(|_| Err(AdbError::Io(std::io::Error::other("pull thread panicked"))))
            .collect()
    })
}

fn pull_one(config: &Config, serial: Option<&str>, request: &PullRequest) -> Result<u64> {
    tracing::debug!("Pulling {} to {}", request.remote, request.local.display());

    // The local file is only created once the device is reachable.
    let session = Session::open(config, serial)?;
    let mut sink = BufWriter::new(File::create(&request.local)?);

    let pulled = session.with_sync(|channel| match request.compression {
        Some(compression) => channel.pull_v2(&request.remote, compression, &mut sink),
        None => channel.pull(&request.remote, &mut sink),
    })?;
    sink.flush()?;
    Ok(pulled)
}
