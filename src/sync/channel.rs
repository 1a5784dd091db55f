//! Blocking sync channel
//!
//! Drives list/stat/pull/push over a stream that has already been switched
//! into sync mode (`sync:` answered with `OKAY`).
//!
//! ## Exchange Flow
//! ```text
//! Idle ──request──► SentRequest ──► { ReceivingHeader ──► ReceivingPayload }*
//!                                              │
//!                                   DONE/OKAY ─┴─ FAIL / bad frame
//!                                      │              │
//!                                      ▼              ▼
//!                                    Done           Failed (connection poisoned)
//! ```

use std::io::{self, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::error::{AdbError, Result};
use super::compression::{new_decoder, new_encoder, CompressionLevels, Decoder, Encoder};
use super::exchange::{Exchange, ExchangeState};
use super::packet::{
    encode_data, encode_recv_v2, encode_request, encode_send, encode_send_v2, encode_word, read_packet,
    Layout, SyncId, SyncPacket, SYNC_DATA_MAX,
};
use super::{CompressionType, FileEntry, SyncFlag};

/// Sync protocol client over a blocking stream
#[derive(Debug)]
pub struct SyncChannel<S> {
    stream: S,
    exchange: Exchange,
}

impl<S: Read + Write> SyncChannel<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            exchange: Exchange::default(),
        }
    }

    /// Set the compression effort used by compressed pushes
    pub fn with_levels(mut self, levels: CompressionLevels) -> Self {
        self.exchange.levels = levels;
        self
    }

    /// Abort transfers at the next packet boundary once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.exchange.set_cancellation(token);
        self
    }

    pub fn state(&self) -> ExchangeState {
        self.exchange.state
    }

    /// Whether another exchange may run on this connection
    pub fn is_usable(&self) -> bool {
        self.exchange.is_usable()
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Stat a remote path (V1, 32-bit size)
    ///
    /// A missing path yields an all-zero entry; see [`FileEntry::exists`].
    pub fn stat(&mut self, path: &str) -> Result<FileEntry> {
        self.exchange.begin("STAT")?;
        let result = self.stat_inner(SyncId::Stat, Layout::StatV1, path);
        self.exchange.finish(result)
    }

    /// Stat a remote path, following symlinks (V2)
    pub fn stat_v2(&mut self, path: &str) -> Result<FileEntry> {
        self.exchange.begin("STA2")?;
        let result = self.stat_inner(SyncId::StatV2, Layout::StatV2, path);
        self.exchange.finish(result)
    }

    /// Stat a remote path without following symlinks (V2)
    pub fn lstat_v2(&mut self, path: &str) -> Result<FileEntry> {
        self.exchange.begin("LST2")?;
        let result = self.stat_inner(SyncId::LstatV2, Layout::StatV2, path);
        self.exchange.finish(result)
    }

    /// List a remote directory (V1)
    ///
    /// Entries are read lazily; dropping the iterator before it ends leaves
    /// the connection unusable.
    pub fn list(&mut self, path: &str) -> Result<DirEntries<'_, S>> {
        self.list_request(SyncId::List, Layout::DentV1, path)
    }

    /// List a remote directory with 64-bit sizes (V2)
    pub fn list_v2(&mut self, path: &str) -> Result<DirEntries<'_, S>> {
        self.list_request(SyncId::ListV2, Layout::DentV2, path)
    }

    /// List a remote directory into a vector
    pub fn list_all(&mut self, path: &str) -> Result<Vec<FileEntry>> {
        self.list(path)?.collect()
    }

    /// Pull a remote file into `sink` (V1), returning the bytes written
    ///
    /// On failure, data already written to `sink` stays there.
    pub fn pull<W: Write>(&mut self, remote: &str, sink: &mut W) -> Result<u64> {
        self.exchange.begin("RECV")?;
        let result = self.pull_inner(remote, sink);
        self.exchange.finish(result)
    }

    /// Pull with negotiated compression (V2)
    ///
    /// `CompressionType::Any` lets the remote pick the codec.
    pub fn pull_v2<W: Write>(&mut self, remote: &str, compression: CompressionType, sink: &mut W) -> Result<u64> {
        self.exchange.begin("RCV2")?;
        let result = self.pull_v2_inner(remote, compression, sink);
        self.exchange.finish(result)
    }

    /// Pull with a raw flag word (V2, no negotiation)
    pub fn pull_with_flags<W: Write>(&mut self, remote: &str, flags: SyncFlag, sink: &mut W) -> Result<u64> {
        self.exchange.begin("RCV2")?;
        let result = self.pull_flags_inner(remote, flags, sink);
        self.exchange.finish(result)
    }

    /// Push `source` to a remote file (V1) with the current time as mtime
    pub fn push<R: Read>(&mut self, source: &mut R, remote: &str, mode: u32) -> Result<u64> {
        self.push_with_mtime(source, remote, mode, unix_now())
    }

    /// Push `source` to a remote file (V1), returning the bytes read from `source`
    pub fn push_with_mtime<R: Read>(&mut self, source: &mut R, remote: &str, mode: u32, mtime: u32) -> Result<u64> {
        self.exchange.begin("SEND")?;
        let result = self.push_inner(source, remote, mode, mtime);
        self.exchange.finish(result)
    }

    /// Push with negotiated compression (V2)
    pub fn push_v2<R: Read>(
        &mut self,
        source: &mut R,
        remote: &str,
        mode: u32,
        mtime: u32,
        compression: CompressionType,
    ) -> Result<u64> {
        self.exchange.begin("SND2")?;
        let result = self.push_v2_inner(source, remote, mode, mtime, compression);
        self.exchange.finish(result)
    }

    /// Push with a raw flag word (V2, no negotiation); `DRY_RUN` is allowed
    pub fn push_with_flags<R: Read>(
        &mut self,
        source: &mut R,
        remote: &str,
        mode: u32,
        mtime: u32,
        flags: SyncFlag,
    ) -> Result<u64> {
        self.exchange.begin("SND2")?;
        let result = self.push_flags_inner(source, remote, mode, mtime, flags);
        self.exchange.finish(result)
    }

    /// End the sync session; the remote closes the connection afterwards
    pub fn quit(&mut self) -> Result<()> {
        self.exchange.begin("QUIT")?;
        let bytes = encode_word(SyncId::Quit, 0);
        let result = self.send(&bytes);
        self.exchange.poison("sync session ended with QUIT");
        self.exchange.finish(result)
    }

    // =========================================================================
    // Exchange bodies
    // =========================================================================

    fn stat_inner(&mut self, id: SyncId, layout: Layout, path: &str) -> Result<FileEntry> {
        let request = encode_request(id, path)?;
        self.send(&request)?;

        match self.recv(layout)? {
            SyncPacket::Stat(entry) => Ok(entry),
            other => Err(unexpected(&other, layout)),
        }
    }

    fn list_request(&mut self, id: SyncId, layout: Layout, path: &str) -> Result<DirEntries<'_, S>> {
        self.exchange.begin(if id == SyncId::List { "LIST" } else { "LIS2" })?;
        if let Err(e) = encode_request(id, path).and_then(|request| self.send(&request)) {
            return self.exchange.finish(Err(e));
        }

        Ok(DirEntries {
            channel: self,
            layout,
            finished: false,
        })
    }

    fn pull_inner<W: Write>(&mut self, remote: &str, sink: &mut W) -> Result<u64> {
        let request = encode_request(SyncId::Recv, remote)?;
        self.send(&request)?;
        let mut decoder = new_decoder(CompressionType::None)?;
        self.receive_data(decoder.as_mut(), sink)
    }

    fn pull_v2_inner<W: Write>(&mut self, remote: &str, compression: CompressionType, sink: &mut W) -> Result<u64> {
        let request = encode_recv_v2(remote, compression.flag())?;
        self.send(&request)?;

        let negotiated = self.negotiate(SyncId::RecvV2, compression)?;
        let mut decoder = new_decoder(negotiated)?;
        self.receive_data(decoder.as_mut(), sink)
    }

    fn pull_flags_inner<W: Write>(&mut self, remote: &str, flags: SyncFlag, sink: &mut W) -> Result<u64> {
        if flags.is_dry_run() {
            return Err(AdbError::InvalidRequest("dry run only applies to pushes".to_string()));
        }
        let mut decoder = new_decoder(flags.compression()?)?;

        let request = encode_recv_v2(remote, flags)?;
        self.send(&request)?;
        self.receive_data(decoder.as_mut(), sink)
    }

    fn push_inner<R: Read>(&mut self, source: &mut R, remote: &str, mode: u32, mtime: u32) -> Result<u64> {
        let request = encode_send(remote, mode)?;
        self.send(&request)?;
        let mut encoder = new_encoder(CompressionType::None, self.exchange.levels)?;
        self.send_data(encoder.as_mut(), source, mtime)
    }

    fn push_v2_inner<R: Read>(
        &mut self,
        source: &mut R,
        remote: &str,
        mode: u32,
        mtime: u32,
        compression: CompressionType,
    ) -> Result<u64> {
        let request = encode_send_v2(remote, mode, compression.flag())?;
        self.send(&request)?;

        let negotiated = self.negotiate(SyncId::SendV2, compression)?;
        let mut encoder = new_encoder(negotiated, self.exchange.levels)?;
        self.send_data(encoder.as_mut(), source, mtime)
    }

    fn push_flags_inner<R: Read>(
        &mut self,
        source: &mut R,
        remote: &str,
        mode: u32,
        mtime: u32,
        flags: SyncFlag,
    ) -> Result<u64> {
        let mut encoder = new_encoder(flags.compression()?, self.exchange.levels)?;

        let request = encode_send_v2(remote, mode, flags)?;
        self.send(&request)?;
        self.send_data(encoder.as_mut(), source, mtime)
    }

    // =========================================================================
    // Packet plumbing
    // =========================================================================

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.exchange.state == ExchangeState::Idle {
            self.exchange.state = ExchangeState::SentRequest;
        }
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    fn recv(&mut self, layout: Layout) -> Result<SyncPacket> {
        self.exchange.check_cancelled()?;
        self.exchange.state = ExchangeState::ReceivingHeader;
        let packet = read_packet(&mut self.stream, layout)?;
        self.exchange.state = ExchangeState::ReceivingPayload;

        tracing::trace!("Received {} packet", packet.id_name());
        if let SyncPacket::Fail(message) = packet {
            self.exchange.poison("remote sent FAIL");
            return Err(AdbError::Remote(message));
        }
        Ok(packet)
    }

    fn negotiate(&mut self, id: SyncId, requested: CompressionType) -> Result<CompressionType> {
        let layout = Layout::Negotiation(id);
        let negotiated = match self.recv(layout)? {
            SyncPacket::Negotiated(compression) => compression,
            other => return Err(unexpected(&other, layout)),
        };
        check_negotiated(requested, negotiated)?;
        tracing::debug!("Negotiated {} for {} (requested {})", negotiated, id, requested);
        Ok(negotiated)
    }

    /// Feed every `DATA` payload through one decoder; the stream may be cut anywhere
    fn receive_data<W: Write>(&mut self, decoder: &mut dyn Decoder, sink: &mut W) -> Result<u64> {
        let mut plain = Vec::new();
        let mut written = 0u64;
        loop {
            match self.recv(Layout::Transfer)? {
                SyncPacket::Data(payload) => {
                    plain.clear();
                    decoder.decode(&payload, &mut plain)?;
                    sink.write_all(&plain)?;
                    written += plain.len() as u64;
                }
                SyncPacket::Done(_) => break,
                other => return Err(unexpected(&other, Layout::Transfer)),
            }
        }

        plain.clear();
        decoder.finish(&mut plain)?;
        sink.write_all(&plain)?;
        written += plain.len() as u64;

        sink.flush()?;
        Ok(written)
    }

    fn send_data<R: Read>(&mut self, encoder: &mut dyn Encoder, source: &mut R, mtime: u32) -> Result<u64> {
        let mut raw = vec![0u8; SYNC_DATA_MAX];
        let mut packed = Vec::new();
        let mut total = 0u64;

        loop {
            let n = read_chunk(source, &mut raw)?;
            if n == 0 {
                break;
            }
            total += n as u64;

            packed.clear();
            encoder.encode(&raw[..n], &mut packed)?;
            self.send_payloads(&packed)?;
        }

        packed.clear();
        encoder.finish(&mut packed)?;
        self.send_payloads(&packed)?;

        self.send(&encode_word(SyncId::Done, mtime))?;
        match self.recv(Layout::Status)? {
            SyncPacket::Okay => Ok(total),
            other => Err(unexpected(&other, Layout::Status)),
        }
    }

    /// Cut encoder output into `DATA` packets of at most 64 KiB
    fn send_payloads(&mut self, packed: &[u8]) -> Result<()> {
        for piece in packed.chunks(SYNC_DATA_MAX) {
            self.exchange.check_cancelled()?;
            self.send(&encode_data(piece)?)?;
        }
        Ok(())
    }
}

/// Lazy directory listing; yields entries until the terminating `DONE`
#[derive(Debug)]
pub struct DirEntries<'a, S: Read + Write> {
    channel: &'a mut SyncChannel<S>,
    layout: Layout,
    finished: bool,
}

impl<S: Read + Write> Iterator for DirEntries<'_, S> {
    type Item = Result<FileEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let result = match self.channel.recv(self.layout) {
            Ok(SyncPacket::Dent(entry)) => return Some(Ok(entry)),
            Ok(SyncPacket::Done(_)) => Ok(()),
            Ok(other) => Err(unexpected(&other, self.layout)),
            Err(e) => Err(e),
        };

        self.finished = true;
        match self.channel.exchange.finish(result) {
            Ok(()) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl<S: Read + Write> Drop for DirEntries<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            self.channel.exchange.poison("directory listing dropped before DONE");
        }
    }
}

// =============================================================================
// Helpers shared with the async channel
// =============================================================================

pub(crate) fn unexpected(packet: &SyncPacket, layout: Layout) -> AdbError {
    AdbError::protocol(format!("unexpected {} packet while expecting {:?}", packet.id_name(), layout))
}

/// A concrete request must be honoured as asked; `Any` may resolve to anything concrete
pub(crate) fn check_negotiated(requested: CompressionType, negotiated: CompressionType) -> Result<()> {
    if requested.is_concrete() && negotiated != requested {
        return Err(AdbError::protocol(format!(
            "requested {} compression but remote chose {}",
            requested, negotiated
        )));
    }
    Ok(())
}

pub(crate) fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Fill `buf` from `source` until it is full or the source ends
fn read_chunk<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
