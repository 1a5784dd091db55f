//! Compression streams for sync V2 transfers
//!
//! A compressed transfer is one continuous codec stream. The sender cuts the
//! stream into `DATA` payloads wherever it likes, so a payload boundary says
//! nothing about codec boundaries:
//!
//! ```text
//! raw file  ─► Encoder ─► | stream ............................. trailer |
//!                         └── DATA ──┘└── DATA ──┘└── DATA ──┘└─ DATA ──┘
//! ```
//!
//! Each transfer owns one [`Encoder`] or [`Decoder`]. Payloads are fed through
//! it as they arrive and whatever raw bytes they complete are handed on, so a
//! whole file is never buffered.

use std::io::{self, Read, Write};

use crate::config::Config;
use crate::error::{AdbError, Result};
use super::CompressionType;

/// Upper bound on the raw bytes a single payload may inflate to
pub const MAX_DECOMPRESSED_CHUNK: usize = 16 * 1024 * 1024;

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_WINDOW_BITS: u32 = 22;

/// Compressing half of a transfer
pub trait Encoder: Send {
    fn compression(&self) -> CompressionType;

    /// Compress `raw` and flush, appending everything the stream produced to `out`
    fn encode(&mut self, raw: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// End the stream, appending its trailer to `out`
    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()>;
}

/// Decompressing half of a transfer
pub trait Decoder: Send {
    fn compression(&self) -> CompressionType;

    /// Feed one payload, appending every raw byte it completes to `out`
    fn decode(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// The sender ended the transfer; fails when the stream stopped mid-unit
    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()>;
}

/// Compression effort used on the push side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevels {
    pub brotli_quality: u32,
    pub zstd_level: i32,
}

impl Default for CompressionLevels {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for CompressionLevels {
    fn from(config: &Config) -> Self {
        Self {
            brotli_quality: config.brotli_quality.min(11),
            zstd_level: config.zstd_level,
        }
    }
}

/// Start the compressing stream for a concrete compression type
pub fn new_encoder(compression: CompressionType, levels: CompressionLevels) -> Result<Box<dyn Encoder>> {
    let encoder: Box<dyn Encoder> = match compression {
        CompressionType::None => Box::new(RawEncoder),
        CompressionType::Brotli => Box::new(BrotliEncoder {
            inner: Some(brotli::CompressorWriter::new(
                Vec::new(),
                BROTLI_BUFFER_SIZE,
                levels.brotli_quality,
                BROTLI_WINDOW_BITS,
            )),
        }),
        CompressionType::Lz4 => Box::new(Lz4Encoder {
            inner: lz4_flex::frame::FrameEncoder::new(Vec::new()),
        }),
        CompressionType::Zstd => Box::new(ZstdEncoder {
            inner: zstd::stream::write::Encoder::new(Vec::new(), levels.zstd_level)?,
        }),
        CompressionType::Any => return Err(unresolved()),
    };
    Ok(encoder)
}

/// Start the decompressing stream for a concrete compression type
pub fn new_decoder(compression: CompressionType) -> Result<Box<dyn Decoder>> {
    let decoder: Box<dyn Decoder> = match compression {
        CompressionType::None => Box::new(RawDecoder),
        CompressionType::Brotli => Box::new(BrotliDecoder {
            inner: brotli::DecompressorWriter::new(Inflated::default(), BROTLI_BUFFER_SIZE),
            fed: false,
        }),
        CompressionType::Lz4 => Box::new(Lz4Decoder::new()),
        CompressionType::Zstd => Box::new(ZstdDecoder {
            inner: zstd::stream::zio::Writer::new(Inflated::default(), zstd::stream::raw::Decoder::new()?),
            fed: false,
        }),
        CompressionType::Any => return Err(unresolved()),
    };
    Ok(decoder)
}

fn unresolved() -> AdbError {
    AdbError::Unsupported("compression 'any' must be resolved before a codec is selected".to_string())
}

fn corrupt(what: CompressionType, e: io::Error) -> AdbError {
    AdbError::protocol(format!("corrupt {} stream: {}", what, e))
}

/// Write target for decoders that refuses to grow past [`MAX_DECOMPRESSED_CHUNK`]
#[derive(Debug, Default)]
struct Inflated(Vec<u8>);

impl Write for Inflated {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.0.len() + buf.len() > MAX_DECOMPRESSED_CHUNK {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("payload inflates past {} bytes", MAX_DECOMPRESSED_CHUNK),
            ));
        }
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Encoders
// =============================================================================

struct RawEncoder;

impl Encoder for RawEncoder {
    fn compression(&self) -> CompressionType {
        CompressionType::None
    }

    fn encode(&mut self, raw: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(raw);
        Ok(())
    }

    fn finish(&mut self, _out: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

struct BrotliEncoder {
    /// `None` once the stream has been finished
    inner: Option<brotli::CompressorWriter<Vec<u8>>>,
}

impl Encoder for BrotliEncoder {
    fn compression(&self) -> CompressionType {
        CompressionType::Brotli
    }

    fn encode(&mut self, raw: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| AdbError::InvalidRequest("brotli stream already finished".to_string()))?;
        inner.write_all(raw)?;
        inner.flush()?;
        out.append(inner.get_mut());
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if let Some(inner) = self.inner.take() {
            out.append(&mut inner.into_inner());
        }
        Ok(())
    }
}

struct Lz4Encoder {
    inner: lz4_flex::frame::FrameEncoder<Vec<u8>>,
}

impl Encoder for Lz4Encoder {
    fn compression(&self) -> CompressionType {
        CompressionType::Lz4
    }

    fn encode(&mut self, raw: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.inner.write_all(raw)?;
        self.inner.flush()?;
        out.append(self.inner.get_mut());
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        self.inner.try_finish().map_err(io::Error::from)?;
        out.append(self.inner.get_mut());
        Ok(())
    }
}

struct ZstdEncoder {
    inner: zstd::stream::write::Encoder<'static, Vec<u8>>,
}

impl Encoder for ZstdEncoder {
    fn compression(&self) -> CompressionType {
        CompressionType::Zstd
    }

    fn encode(&mut self, raw: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.inner.write_all(raw)?;
        self.inner.flush()?;
        out.append(self.inner.get_mut());
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        self.inner.do_finish()?;
        out.append(self.inner.get_mut());
        Ok(())
    }
}

// =============================================================================
// Decoders
// =============================================================================

struct RawDecoder;

impl Decoder for RawDecoder {
    fn compression(&self) -> CompressionType {
        CompressionType::None
    }

    fn decode(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(payload);
        Ok(())
    }

    fn finish(&mut self, _out: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

struct BrotliDecoder {
    inner: brotli::DecompressorWriter<Inflated>,

    /// A transfer without any payload is an empty file, not a cut stream
    fed: bool,
}

impl Decoder for BrotliDecoder {
    fn compression(&self) -> CompressionType {
        CompressionType::Brotli
    }

    fn decode(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.fed |= !payload.is_empty();
        self.inner
            .write_all(payload)
            .and_then(|()| self.inner.flush())
            .map_err(|e| corrupt(CompressionType::Brotli, e))?;
        out.append(&mut self.inner.get_mut().0);
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if !self.fed {
            return Ok(());
        }
        self.inner
            .close()
            .map_err(|e| corrupt(CompressionType::Brotli, e))?;
        out.append(&mut self.inner.get_mut().0);
        Ok(())
    }
}

struct ZstdDecoder {
    inner: zstd::stream::zio::Writer<Inflated, zstd::stream::raw::Decoder<'static>>,
    fed: bool,
}

impl Decoder for ZstdDecoder {
    fn compression(&self) -> CompressionType {
        CompressionType::Zstd
    }

    fn decode(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.fed |= !payload.is_empty();
        self.inner
            .write_all(payload)
            .and_then(|()| self.inner.flush())
            .map_err(|e| corrupt(CompressionType::Zstd, e))?;
        out.append(&mut self.inner.writer_mut().0);
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if !self.fed {
            return Ok(());
        }
        // Fails with "incomplete frame" unless the last frame was closed.
        self.inner
            .flush()
            .and_then(|()| self.inner.finish())
            .map_err(|e| corrupt(CompressionType::Zstd, e))?;
        out.append(&mut self.inner.writer_mut().0);
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// LZ4 frames
// -----------------------------------------------------------------------------

const LZ4_MAGIC: u32 = 0x184D_2204;
const LZ4_MAX_BLOCK: usize = 4 * 1024 * 1024;

const FLG_DICT_ID: u8 = 0x01;
const FLG_CONTENT_CHECKSUM: u8 = 0x04;
const FLG_CONTENT_SIZE: u8 = 0x08;
const FLG_BLOCK_CHECKSUM: u8 = 0x10;

/// Complete frame units waiting for the frame decoder
///
/// An empty feed reports `WouldBlock` rather than end of input, so the
/// decoder stops at a unit boundary and resumes there on the next payload.
#[derive(Debug, Default)]
struct Feed {
    buf: Vec<u8>,
    pos: usize,
}

impl Feed {
    fn is_drained(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn compact(&mut self) {
        self.buf.drain(..self.pos);
        self.pos = 0;
    }
}

impl Read for Feed {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let available = &self.buf[self.pos..];
        if available.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = available.len().min(dst.len());
        dst[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Streaming LZ4 frame decoder
///
/// `lz4_flex` decodes frames from a reader, so incoming bytes are held back
/// until a whole header, block or end mark is present and only then handed
/// to the decoder. The decoder therefore never sees a unit cut in half.
struct Lz4Decoder {
    inner: lz4_flex::frame::FrameDecoder<Feed>,
    pending: Vec<u8>,

    /// FLG byte of the frame being read, `None` between frames
    frame_flags: Option<u8>,

    scratch: Vec<u8>,
}

impl Lz4Decoder {
    fn new() -> Self {
        Self {
            inner: lz4_flex::frame::FrameDecoder::new(Feed::default()),
            pending: Vec::new(),
            frame_flags: None,
            scratch: vec![0u8; 64 * 1024],
        }
    }

    /// Size of the next complete unit in `pending`, or `None` while it is
    /// still unknown or incomplete
    fn next_unit(&self) -> Result<Option<usize>> {
        let pending = &self.pending;
        let len = match self.frame_flags {
            None => {
                if pending.len() < 5 {
                    return Ok(None);
                }
                let magic = u32::from_le_bytes([pending[0], pending[1], pending[2], pending[3]]);
                if magic != LZ4_MAGIC {
                    return Err(AdbError::protocol(format!("unsupported lz4 frame magic {:#010x}", magic)));
                }
                let flags = pending[4];
                let mut len = 4 + 1 + 1 + 1;
                if flags & FLG_CONTENT_SIZE != 0 {
                    len += 8;
                }
                if flags & FLG_DICT_ID != 0 {
                    len += 4;
                }
                len
            }
            Some(flags) => {
                if pending.len() < 4 {
                    return Ok(None);
                }
                let word = u32::from_le_bytes([pending[0], pending[1], pending[2], pending[3]]);
                if word == 0 {
                    4 + if flags & FLG_CONTENT_CHECKSUM != 0 { 4 } else { 0 }
                } else {
                    let size = (word & 0x7FFF_FFFF) as usize;
                    if size > LZ4_MAX_BLOCK {
                        return Err(AdbError::protocol(format!("lz4 block of {} bytes", size)));
                    }
                    4 + size + if flags & FLG_BLOCK_CHECKSUM != 0 { 4 } else { 0 }
                }
            }
        };
        Ok((pending.len() >= len).then_some(len))
    }

    /// Move every complete unit from `pending` into the decoder's feed
    fn release_units(&mut self) -> Result<()> {
        while let Some(len) = self.next_unit()? {
            self.frame_flags = match self.frame_flags {
                None => Some(self.pending[4]),
                Some(_) if self.pending[..4] == [0, 0, 0, 0] => None,
                flags => flags,
            };
            self.inner.get_mut().buf.extend_from_slice(&self.pending[..len]);
            self.pending.drain(..len);
        }
        Ok(())
    }

    fn drain(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let mut produced = 0;
        loop {
            match self.inner.read(&mut self.scratch) {
                Ok(0) if self.inner.get_ref().is_drained() => break,
                // One frame ended and the next one is already queued.
                Ok(0) => continue,
                Ok(n) => {
                    produced += n;
                    if produced > MAX_DECOMPRESSED_CHUNK {
                        return Err(AdbError::protocol(format!(
                            "lz4 payload inflates past {} bytes",
                            MAX_DECOMPRESSED_CHUNK
                        )));
                    }
                    out.extend_from_slice(&self.scratch[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(corrupt(CompressionType::Lz4, e)),
            }
        }
        self.inner.get_mut().compact();
        Ok(())
    }
}

impl Decoder for Lz4Decoder {
    fn compression(&self) -> CompressionType {
        CompressionType::Lz4
    }

    fn decode(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.pending.extend_from_slice(payload);
        self.release_units()?;
        self.drain(out)
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        self.drain(out)?;
        if !self.pending.is_empty() || self.frame_flags.is_some() {
            return Err(AdbError::protocol("lz4 stream ended inside a frame"));
        }
        Ok(())
    }
}
