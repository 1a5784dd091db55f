//! Sync packet definitions
//!
//! Every packet starts with a 4-byte ASCII id. What follows the id depends on
//! the id and on what the exchange expects at that point (a `DONE` closing a
//! listing carries a zeroed directory entry, a `DONE` closing a pull carries a
//! zero length), so reading is driven by a [`Layout`].

use std::fmt;
use std::io::Read;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{AdbError, Result};
use super::{CompressionType, ExtendedStat, FileEntry, SyncFlag};

/// Largest DATA payload either side may send
pub const SYNC_DATA_MAX: usize = 64 * 1024;

/// Longest remote path a request may carry
pub const SYNC_PATH_MAX: usize = 1024;

/// Size of the id at the start of every packet
pub const ID_SIZE: usize = 4;

const STAT_V1_BODY: usize = 12;
const DENT_V1_BODY: usize = 16;
const STAT_V2_BODY: usize = 68;
const DENT_V2_BODY: usize = 72;
const LENGTH_BODY: usize = 4;
const MAX_FIXED_BODY: usize = DENT_V2_BODY;

/// Sync packet ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncId {
    Stat,
    List,
    Dent,
    Recv,
    Send,
    Data,
    Done,
    Okay,
    Fail,
    Quit,
    StatV2,
    LstatV2,
    ListV2,
    DentV2,
    RecvV2,
    SendV2,
}

impl SyncId {
    /// The 4 ASCII bytes on the wire
    pub fn code(&self) -> &'static [u8; 4] {
        use self::SyncId::*;
        match *self {
            Stat => b"STAT",
            List => b"LIST",
            Dent => b"DENT",
            Recv => b"RECV",
            Send => b"SEND",
            Data => b"DATA",
            Done => b"DONE",
            Okay => b"OKAY",
            Fail => b"FAIL",
            Quit => b"QUIT",
            StatV2 => b"STA2",
            LstatV2 => b"LST2",
            ListV2 => b"LIS2",
            DentV2 => b"DNT2",
            RecvV2 => b"RCV2",
            SendV2 => b"SND2",
        }
    }

    pub fn from_code(code: &[u8; 4]) -> Option<Self> {
        use self::SyncId::*;
        let id = match code {
            b"STAT" => Stat,
            b"LIST" => List,
            b"DENT" => Dent,
            b"RECV" => Recv,
            b"SEND" => Send,
            b"DATA" => Data,
            b"DONE" => Done,
            b"OKAY" => Okay,
            b"FAIL" => Fail,
            b"QUIT" => Quit,
            b"STA2" => StatV2,
            b"LST2" => LstatV2,
            b"LIS2" => ListV2,
            b"DNT2" => DentV2,
            b"RCV2" => RecvV2,
            b"SND2" => SendV2,
            _ => return None,
        };
        Some(id)
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(std::str::from_utf8(self.code()).unwrap_or("????"))
    }
}

/// What the exchange expects to receive next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `STAT` reply
    StatV1,
    /// `STA2`/`LST2` reply
    StatV2,
    /// `DENT` entries closed by `DONE`
    DentV1,
    /// `DNT2` entries closed by `DONE`
    DentV2,
    /// `DATA` packets closed by `DONE`
    Transfer,
    /// `OKAY` closing a push
    Status,
    /// Compression answer echoing the request id (`RCV2` or `SND2`)
    Negotiation(SyncId),
}

/// A packet received from the remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPacket {
    /// Stat reply (V1 or V2)
    Stat(FileEntry),
    /// One directory entry (V1 or V2)
    Dent(FileEntry),
    /// File content
    Data(Bytes),
    /// End of a sequence, with its declared length
    Done(u32),
    Okay,
    /// Remote refusal with its message
    Fail(String),
    Quit,
    /// The codec the remote settled on
    Negotiated(CompressionType),
}

impl SyncPacket {
    pub fn id_name(&self) -> &'static str {
        match self {
            SyncPacket::Stat(_) => "STAT",
            SyncPacket::Dent(_) => "DENT",
            SyncPacket::Data(_) => "DATA",
            SyncPacket::Done(_) => "DONE",
            SyncPacket::Okay => "OKAY",
            SyncPacket::Fail(_) => "FAIL",
            SyncPacket::Quit => "QUIT",
            SyncPacket::Negotiated(_) => "NEGOTIATED",
        }
    }
}

// =============================================================================
// Request Encoding
// =============================================================================

fn check_path(path: &[u8]) -> Result<()> {
    if path.len() > SYNC_PATH_MAX {
        return Err(AdbError::InvalidRequest(format!(
            "remote path of {} bytes exceeds {} bytes",
            path.len(),
            SYNC_PATH_MAX
        )));
    }
    Ok(())
}

/// Encode `id` + length + path
pub fn encode_request(id: SyncId, path: &str) -> Result<Bytes> {
    check_path(path.as_bytes())?;

    let mut buf = BytesMut::with_capacity(ID_SIZE + 4 + path.len());
    buf.put_slice(id.code());
    buf.put_u32_le(path.len() as u32);
    buf.put_slice(path.as_bytes());
    Ok(buf.freeze())
}

/// Encode a V1 `SEND` request: `"<path>,<mode>"`
pub fn encode_send(path: &str, mode: u32) -> Result<Bytes> {
    encode_request(SyncId::Send, &format!("{},{}", path, mode))
}

/// Encode a `RCV2` request followed by its flag word
pub fn encode_recv_v2(path: &str, flags: SyncFlag) -> Result<Bytes> {
    let request = encode_request(SyncId::RecvV2, path)?;

    let mut buf = BytesMut::with_capacity(request.len() + ID_SIZE + 4);
    buf.put_slice(&request);
    buf.put_slice(SyncId::RecvV2.code());
    buf.put_u32_le(flags.bits());
    Ok(buf.freeze())
}

/// Encode a `SND2` request followed by its mode and flag word
pub fn encode_send_v2(path: &str, mode: u32, flags: SyncFlag) -> Result<Bytes> {
    let request = encode_request(SyncId::SendV2, path)?;

    let mut buf = BytesMut::with_capacity(request.len() + ID_SIZE + 8);
    buf.put_slice(&request);
    buf.put_slice(SyncId::SendV2.code());
    buf.put_u32_le(mode);
    buf.put_u32_le(flags.bits());
    Ok(buf.freeze())
}

/// Encode a `DATA` packet
pub fn encode_data(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > SYNC_DATA_MAX {
        return Err(AdbError::InvalidRequest(format!(
            "DATA payload of {} bytes exceeds {} bytes",
            payload.len(),
            SYNC_DATA_MAX
        )));
    }

    let mut buf = BytesMut::with_capacity(ID_SIZE + 4 + payload.len());
    buf.put_slice(SyncId::Data.code());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Encode an id whose length slot carries a plain value (`DONE` + mtime, `QUIT` + 0)
pub fn encode_word(id: SyncId, value: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(ID_SIZE + 4);
    buf.put_slice(id.code());
    buf.put_u32_le(value);
    buf.freeze()
}

// =============================================================================
// Response Decoding
// =============================================================================

/// Validate an id against the layout and return the size of its fixed body
pub fn fixed_body_len(id: SyncId, layout: Layout) -> Result<usize> {
    let len = match (layout, id) {
        (_, SyncId::Fail) => LENGTH_BODY,
        (Layout::StatV1, SyncId::Stat) => STAT_V1_BODY,
        (Layout::StatV2, SyncId::StatV2 | SyncId::LstatV2) => STAT_V2_BODY,
        (Layout::DentV1, SyncId::Dent | SyncId::Done) => DENT_V1_BODY,
        (Layout::DentV2, SyncId::DentV2 | SyncId::Done) => DENT_V2_BODY,
        (Layout::Transfer, SyncId::Data | SyncId::Done) => LENGTH_BODY,
        (Layout::Status, SyncId::Okay) => LENGTH_BODY,
        (Layout::Negotiation(expected), id) if id == expected => LENGTH_BODY,
        (layout, id) => {
            return Err(AdbError::protocol(format!(
                "unexpected {} packet while expecting {:?}",
                id, layout
            )))
        }
    };
    Ok(len)
}

/// Parse a packet id
pub fn decode_id(code: &[u8; ID_SIZE]) -> Result<SyncId> {
    SyncId::from_code(code).ok_or_else(|| {
        AdbError::protocol(format!("unknown sync packet id {:?}", String::from_utf8_lossy(code)))
    })
}

/// Outcome of decoding a fixed body
enum Head {
    Complete(SyncPacket),
    Tail { len: usize, partial: Partial },
}

/// A packet waiting for its variable-length tail
enum Partial {
    Dent(FileEntry),
    Data,
    Fail,
}

impl Partial {
    fn complete(self, tail: Vec<u8>) -> SyncPacket {
        match self {
            Partial::Dent(mut entry) => {
                entry.name = String::from_utf8_lossy(&tail).into_owned();
                SyncPacket::Dent(entry)
            }
            Partial::Data => SyncPacket::Data(Bytes::from(tail)),
            Partial::Fail => SyncPacket::Fail(String::from_utf8_lossy(&tail).into_owned()),
        }
    }
}

fn bounded_len(id: SyncId, len: u32, max: usize) -> Result<usize> {
    let len = len as usize;
    if len > max {
        return Err(AdbError::protocol(format!(
            "{} packet declares {} bytes (max {})",
            id, len, max
        )));
    }
    Ok(len)
}

fn zero_len(id: SyncId, len: u32) -> Result<()> {
    if len != 0 {
        return Err(AdbError::protocol(format!(
            "{} packet declares {} payload bytes, expected none",
            id, len
        )));
    }
    Ok(())
}

fn decode_stat_v2(body: &mut &[u8]) -> FileEntry {
    let errno = body.get_u32_le();
    let dev = body.get_u64_le();
    let ino = body.get_u64_le();
    let mode = body.get_u32_le();
    let nlink = body.get_u32_le();
    let uid = body.get_u32_le();
    let gid = body.get_u32_le();
    let size = body.get_u64_le();
    let atime = body.get_i64_le();
    let mtime = body.get_i64_le();
    let ctime = body.get_i64_le();

    FileEntry {
        name: String::new(),
        mode,
        size,
        mtime,
        extended: Some(ExtendedStat {
            errno,
            dev,
            ino,
            nlink,
            uid,
            gid,
            atime,
            ctime,
        }),
    }
}

fn decode_head(id: SyncId, layout: Layout, mut body: &[u8]) -> Result<Head> {
    let head = match (layout, id) {
        (_, SyncId::Fail) => Head::Tail {
            len: bounded_len(id, body.get_u32_le(), SYNC_DATA_MAX)?,
            partial: Partial::Fail,
        },
        (Layout::StatV1, SyncId::Stat) => {
            let mode = body.get_u32_le();
            let size = body.get_u32_le();
            let mtime = body.get_u32_le();
            Head::Complete(SyncPacket::Stat(FileEntry {
                mode,
                size: size as u64,
                mtime: mtime as i64,
                ..FileEntry::default()
            }))
        }
        (Layout::StatV2, _) => {
            let entry = decode_stat_v2(&mut body);
            match entry.extended.map(|ext| ext.errno) {
                Some(errno) if errno != 0 => {
                    return Err(AdbError::Remote(format!("stat failed with errno {}", errno)))
                }
                _ => Head::Complete(SyncPacket::Stat(entry)),
            }
        }
        (Layout::DentV1, _) => {
            let mode = body.get_u32_le();
            let size = body.get_u32_le();
            let mtime = body.get_u32_le();
            let namelen = body.get_u32_le();
            if id == SyncId::Done {
                zero_len(id, namelen)?;
                Head::Complete(SyncPacket::Done(0))
            } else {
                let entry = FileEntry {
                    mode,
                    size: size as u64,
                    mtime: mtime as i64,
                    ..FileEntry::default()
                };
                Head::Tail {
                    len: bounded_len(id, namelen, SYNC_PATH_MAX)?,
                    partial: Partial::Dent(entry),
                }
            }
        }
        (Layout::DentV2, _) => {
            if id == SyncId::Done {
                let namelen = (&body[STAT_V2_BODY..]).get_u32_le();
                zero_len(id, namelen)?;
                Head::Complete(SyncPacket::Done(0))
            } else {
                // A per-entry errno stays on the entry; the name still follows.
                let entry = decode_stat_v2(&mut body);
                Head::Tail {
                    len: bounded_len(id, body.get_u32_le(), SYNC_PATH_MAX)?,
                    partial: Partial::Dent(entry),
                }
            }
        }
        (Layout::Transfer, SyncId::Data) => Head::Tail {
            len: bounded_len(id, body.get_u32_le(), SYNC_DATA_MAX)?,
            partial: Partial::Data,
        },
        (Layout::Transfer, _) => {
            zero_len(id, body.get_u32_le())?;
            Head::Complete(SyncPacket::Done(0))
        }
        (Layout::Status, _) => {
            zero_len(id, body.get_u32_le())?;
            Head::Complete(SyncPacket::Okay)
        }
        (Layout::Negotiation(_), _) => {
            let ordinal = body.get_u32_le();
            let compression = CompressionType::from_wire(ordinal).ok_or_else(|| {
                AdbError::protocol(format!("unknown compression ordinal {}", ordinal))
            })?;
            if !compression.is_concrete() {
                return Err(AdbError::protocol("remote left the compression negotiation unresolved (Any)"));
            }
            Head::Complete(SyncPacket::Negotiated(compression))
        }
        (layout, id) => {
            return Err(AdbError::protocol(format!(
                "unexpected {} packet while expecting {:?}",
                id, layout
            )))
        }
    };
    Ok(head)
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read the body following an already-read id
pub fn read_body<R: Read>(reader: &mut R, id: SyncId, layout: Layout) -> Result<SyncPacket> {
    let mut fixed = [0u8; MAX_FIXED_BODY];
    let fixed = &mut fixed[..fixed_body_len(id, layout)?];
    reader.read_exact(fixed)?;

    match decode_head(id, layout, fixed)? {
        Head::Complete(packet) => Ok(packet),
        Head::Tail { len, partial } => {
            let mut tail = vec![0u8; len];
            if len > 0 {
                reader.read_exact(&mut tail)?;
            }
            Ok(partial.complete(tail))
        }
    }
}

/// Read one complete packet
pub fn read_packet<R: Read>(reader: &mut R, layout: Layout) -> Result<SyncPacket> {
    let mut code = [0u8; ID_SIZE];
    reader.read_exact(&mut code)?;
    let id = decode_id(&code)?;
    read_body(reader, id, layout)
}

/// Read the body following an already-read id from an async stream
pub async fn read_body_async<R: AsyncRead + Unpin>(reader: &mut R, id: SyncId, layout: Layout) -> Result<SyncPacket> {
    let mut fixed = [0u8; MAX_FIXED_BODY];
    let fixed = &mut fixed[..fixed_body_len(id, layout)?];
    reader.read_exact(fixed).await?;

    match decode_head(id, layout, fixed)? {
        Head::Complete(packet) => Ok(packet),
        Head::Tail { len, partial } => {
            let mut tail = vec![0u8; len];
            if len > 0 {
                reader.read_exact(&mut tail).await?;
            }
            Ok(partial.complete(tail))
        }
    }
}

/// Read one complete packet from an async stream
pub async fn read_packet_async<R: AsyncRead + Unpin>(reader: &mut R, layout: Layout) -> Result<SyncPacket> {
    let mut code = [0u8; ID_SIZE];
    reader.read_exact(&mut code).await?;
    let id = decode_id(&code)?;
    read_body_async(reader, id, layout).await
}
