//! Suspendable sync channel
//!
//! Same exchanges and packet handling as [`SyncChannel`](super::SyncChannel)
//! over a tokio stream. Suspension happens only at stream reads and writes.
//! A future dropped mid-exchange leaves the exchange marked as in progress,
//! and the next operation on the channel refuses to run.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{AdbError, Result};
use super::channel::{check_negotiated, unexpected, unix_now};
use super::compression::{new_decoder, new_encoder, CompressionLevels, Decoder, Encoder};
use super::exchange::{Exchange, ExchangeState};
use super::packet::{
    encode_data, encode_recv_v2, encode_request, encode_send, encode_send_v2, encode_word, read_packet_async,
    Layout, SyncId, SyncPacket, SYNC_DATA_MAX,
};
use super::{CompressionType, FileEntry, SyncFlag};

/// Sync protocol client over an async stream
#[derive(Debug)]
pub struct AsyncSyncChannel<S> {
    stream: S,
    exchange: Exchange,
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncSyncChannel<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            exchange: Exchange::default(),
        }
    }

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

    pub async fn stat(&mut self, path: &str) -> Result<FileEntry> {
        self.exchange.begin("STAT")?;
        let result = self.stat_inner(SyncId::Stat, Layout::StatV1, path).await;
        self.exchange.finish(result)
    }

    pub async fn stat_v2(&mut self, path: &str) -> Result<FileEntry> {
        self.exchange.begin("STA2")?;
        let result = self.stat_inner(SyncId::StatV2, Layout::StatV2, path).await;
        self.exchange.finish(result)
    }

    pub async fn lstat_v2(&mut self, path: &str) -> Result<FileEntry> {
        self.exchange.begin("LST2")?;
        let result = self.stat_inner(SyncId::LstatV2, Layout::StatV2, path).await;
        self.exchange.finish(result)
    }

    /// Start a V1 listing; drain it with [`AsyncDirEntries::next_entry`]
    pub async fn list(&mut self, path: &str) -> Result<AsyncDirEntries<'_, S>> {
        self.list_request(SyncId::List, Layout::DentV1, path).await
    }

    pub async fn list_v2(&mut self, path: &str) -> Result<AsyncDirEntries<'_, S>> {
        self.list_request(SyncId::ListV2, Layout::DentV2, path).await
    }

    pub async fn list_all(&mut self, path: &str) -> Result<Vec<FileEntry>> {
        let mut entries = self.list(path).await?;
        let mut all = Vec::new();
        while let Some(entry) = entries.next_entry().await {
            all.push(entry?);
        }
        Ok(all)
    }

    pub async fn pull<W: AsyncWrite + Unpin>(&mut self, remote: &str, sink: &mut W) -> Result<u64> {
        self.exchange.begin("RECV")?;
        let result = self.pull_inner(remote, sink).await;
        self.exchange.finish(result)
    }

    pub async fn pull_v2<W: AsyncWrite + Unpin>(
        &mut self,
        remote: &str,
        compression: CompressionType,
        sink: &mut W,
    ) -> Result<u64> {
        self.exchange.begin("RCV2")?;
        let result = self.pull_v2_inner(remote, compression, sink).await;
        self.exchange.finish(result)
    }

    pub async fn pull_with_flags<W: AsyncWrite + Unpin>(
        &mut self,
        remote: &str,
        flags: SyncFlag,
        sink: &mut W,
    ) -> Result<u64> {
        self.exchange.begin("RCV2")?;
        let result = self.pull_flags_inner(remote, flags, sink).await;
        self.exchange.finish(result)
    }

    pub async fn push<R: AsyncRead + Unpin>(&mut self, source: &mut R, remote: &str, mode: u32) -> Result<u64> {
        self.push_with_mtime(source, remote, mode, unix_now()).await
    }

    pub async fn push_with_mtime<R: AsyncRead + Unpin>(
        &mut self,
        source: &mut R,
        remote: &str,
        mode: u32,
        mtime: u32,
    ) -> Result<u64> {
        self.exchange.begin("SEND")?;
        let result = self.push_inner(source, remote, mode, mtime).await;
        self.exchange.finish(result)
    }

    pub async fn push_v2<R: AsyncRead + Unpin>(
        &mut self,
        source: &mut R,
        remote: &str,
        mode: u32,
        mtime: u32,
        compression: CompressionType,
    ) -> Result<u64> {
        self.exchange.begin("SND2")?;
        let result = self.push_v2_inner(source, remote, mode, mtime, compression).await;
        self.exchange.finish(result)
    }

    pub async fn push_with_flags<R: AsyncRead + Unpin>(
        &mut self,
        source: &mut R,
        remote: &str,
        mode: u32,
        mtime: u32,
        flags: SyncFlag,
    ) -> Result<u64> {
        self.exchange.begin("SND2")?;
        let result = self.push_flags_inner(source, remote, mode, mtime, flags).await;
        self.exchange.finish(result)
    }

    pub async fn quit(&mut self) -> Result<()> {
        self.exchange.begin("QUIT")?;
        let bytes = encode_word(SyncId::Quit, 0);
        let result = self.send(&bytes).await;
        self.exchange.poison("sync session ended with QUIT");
        self.exchange.finish(result)
    }

    // =========================================================================
    // Exchange bodies
    // =========================================================================

    async fn stat_inner(&mut self, id: SyncId, layout: Layout, path: &str) -> Result<FileEntry> {
        let request = encode_request(id, path)?;
        self.send(&request).await?;

        match self.recv(layout).await? {
            SyncPacket::Stat(entry) => Ok(entry),
            other => Err(unexpected(&other, layout)),
        }
    }

    async fn list_request(&mut self, id: SyncId, layout: Layout, path: &str) -> Result<AsyncDirEntries<'_, S>> {
        self.exchange.begin(if id == SyncId::List { "LIST" } else { "LIS2" })?;
        let sent = match encode_request(id, path) {
            Ok(request) => self.send(&request).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            return self.exchange.finish(Err(e));
        }

        Ok(AsyncDirEntries {
            channel: self,
            layout,
            finished: false,
        })
    }

    async fn pull_inner<W: AsyncWrite + Unpin>(&mut self, remote: &str, sink: &mut W) -> Result<u64> {
        let request = encode_request(SyncId::Recv, remote)?;
        self.send(&request).await?;
        let mut decoder = new_decoder(CompressionType::None)?;
        self.receive_data(decoder.as_mut(), sink).await
    }

    async fn pull_v2_inner<W: AsyncWrite + Unpin>(
        &mut self,
        remote: &str,
        compression: CompressionType,
        sink: &mut W,
    ) -> Result<u64> {
        let request = encode_recv_v2(remote, compression.flag())?;
        self.send(&request).await?;

        let negotiated = self.negotiate(SyncId::RecvV2, compression).await?;
        let mut decoder = new_decoder(negotiated)?;
        self.receive_data(decoder.as_mut(), sink).await
    }

    async fn pull_flags_inner<W: AsyncWrite + Unpin>(
        &mut self,
        remote: &str,
        flags: SyncFlag,
        sink: &mut W,
    ) -> Result<u64> {
        if flags.is_dry_run() {
            return Err(AdbError::InvalidRequest("dry run only applies to pushes".to_string()));
        }
        let mut decoder = new_decoder(flags.compression()?)?;

        let request = encode_recv_v2(remote, flags)?;
        self.send(&request).await?;
        self.receive_data(decoder.as_mut(), sink).await
    }

    async fn push_inner<R: AsyncRead + Unpin>(
        &mut self,
        source: &mut R,
        remote: &str,
        mode: u32,
        mtime: u32,
    ) -> Result<u64> {
        let request = encode_send(remote, mode)?;
        self.send(&request).await?;
        let mut encoder = new_encoder(CompressionType::None, self.exchange.levels)?;
        self.send_data(encoder.as_mut(), source, mtime).await
    }

    async fn push_v2_inner<R: AsyncRead + Unpin>(
        &mut self,
        source: &mut R,
        remote: &str,
        mode: u32,
        mtime: u32,
        compression: CompressionType,
    ) -> Result<u64> {
        let request = encode_send_v2(remote, mode, compression.flag())?;
        self.send(&request).await?;

        let negotiated = self.negotiate(SyncId::SendV2, compression).await?;
        let mut encoder = new_encoder(negotiated, self.exchange.levels)?;
        self.send_data(encoder.as_mut(), source, mtime).await
    }

    async fn push_flags_inner<R: AsyncRead + Unpin>(
        &mut self,
        source: &mut R,
        remote: &str,
        mode: u32,
        mtime: u32,
        flags: SyncFlag,
    ) -> Result<u64> {
        let mut encoder = new_encoder(flags.compression()?, self.exchange.levels)?;

        let request = encode_send_v2(remote, mode, flags)?;
        self.send(&request).await?;
        self.send_data(encoder.as_mut(), source, mtime).await
    }

    // =========================================================================
    // Packet plumbing
    // =========================================================================

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.exchange.state == ExchangeState::Idle {
            self.exchange.state = ExchangeState::SentRequest;
        }
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self, layout: Layout) -> Result<SyncPacket> {
        self.exchange.check_cancelled()?;
        self.exchange.state = ExchangeState::ReceivingHeader;
        let packet = read_packet_async(&mut self.stream, layout).await?;
        self.exchange.state = ExchangeState::ReceivingPayload;

        tracing::trace!("Received {} packet", packet.id_name());
        if let SyncPacket::Fail(message) = packet {
            self.exchange.poison("remote sent FAIL");
            return Err(AdbError::Remote(message));
        }
        Ok(packet)
    }

    async fn negotiate(&mut self, id: SyncId, requested: CompressionType) -> Result<CompressionType> {
        let layout = Layout::Negotiation(id);
        let negotiated = match self.recv(layout).await? {
            SyncPacket::Negotiated(compression) => compression,
            other => return Err(unexpected(&other, layout)),
        };
        check_negotiated(requested, negotiated)?;
        tracing::debug!("Negotiated {} for {} (requested {})", negotiated, id, requested);
        Ok(negotiated)
    }

    async fn receive_data<W: AsyncWrite + Unpin>(&mut self, decoder: &mut dyn Decoder, sink: &mut W) -> Result<u64> {
        let mut plain = Vec::new();
        let mut written = 0u64;
        loop {
            match self.recv(Layout::Transfer).await? {
                SyncPacket::Data(payload) => {
                    plain.clear();
                    decoder.decode(&payload, &mut plain)?;
                    sink.write_all(&plain).await?;
                    written += plain.len() as u64;
                }
                SyncPacket::Done(_) => break,
                other => return Err(unexpected(&other, Layout::Transfer)),
            }
        }

        plain.clear();
        decoder.finish(&mut plain)?;
        sink.write_all(&plain).await?;
        written += plain.len() as u64;

        sink.flush().await?;
        Ok(written)
    }

    async fn send_data<R: AsyncRead + Unpin>(
        &mut self,
        encoder: &mut dyn Encoder,
        source: &mut R,
        mtime: u32,
    ) -> Result<u64> {
        let mut raw = vec![0u8; SYNC_DATA_MAX];
        let mut packed = Vec::new();
        let mut total = 0u64;

        loop {
            let n = read_chunk(source, &mut raw).await?;
            if n == 0 {
                break;
            }
            total += n as u64;

            packed.clear();
            encoder.encode(&raw[..n], &mut packed)?;
            self.send_payloads(&packed).await?;
        }

        packed.clear();
        encoder.finish(&mut packed)?;
        self.send_payloads(&packed).await?;

        self.send(&encode_word(SyncId::Done, mtime)).await?;
        match self.recv(Layout::Status).await? {
            SyncPacket::Okay => Ok(total),
            other => Err(unexpected(&other, Layout::Status)),
        }
    }

    async fn send_payloads(&mut self, packed: &[u8]) -> Result<()> {
        for piece in packed.chunks(SYNC_DATA_MAX) {
            self.exchange.check_cancelled()?;
            self.send(&encode_data(piece)?).await?;
        }
        Ok(())
    }
}

/// Async directory listing; ends at the terminating `DONE`
#[derive(Debug)]
pub struct AsyncDirEntries<'a, S: AsyncRead + AsyncWrite + Unpin> {
    channel: &'a mut AsyncSyncChannel<S>,
    layout: Layout,
    finished: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncDirEntries<'_, S> {
    /// Next entry, or `None` once the listing has ended
    pub async fn next_entry(&mut self) -> Option<Result<FileEntry>> {
        if self.finished {
            return None;
        }

        let result = match self.channel.recv(self.layout).await {
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

impl<S: AsyncRead + AsyncWrite + Unpin> Drop for AsyncDirEntries<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            self.channel.exchange.poison("directory listing dropped before DONE");
        }
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
