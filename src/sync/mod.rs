//! Sync Module
//!
//! File listing, stat and transfer over a connection switched into sync mode.
//!
//! ## Packet Format
//!
//! ```text
//! ┌──────────┬──────────────────┬─────────────────────────────┐
//! │ Id (4)   │ Len (u32 LE)     │ Payload (Len bytes)         │
//! └──────────┴──────────────────┴─────────────────────────────┘
//! ```
//!
//! `STAT`, `DENT` and their V2 counterparts replace `Len` with a fixed
//! record; see [`packet`] for every layout.
//!
//! ## Two V2 request variants
//! - [`SyncFlag`] word: the caller names at most one codec, the remote
//!   starts streaming straight away.
//! - [`CompressionType`] negotiation: the remote answers with the codec it
//!   chose before any `DATA`; `Any` must come back resolved.

mod flags;
mod entry;
pub mod packet;
mod compression;
mod exchange;
mod channel;
mod async_channel;

pub use flags::{CompressionType, SyncFlag};
pub use entry::{ExtendedStat, FileEntry};
pub use packet::{SyncId, SyncPacket, SYNC_DATA_MAX, SYNC_PATH_MAX};
pub use compression::{new_decoder, new_encoder, CompressionLevels, Decoder, Encoder, MAX_DECOMPRESSED_CHUNK};
pub use exchange::ExchangeState;
pub use channel::{DirEntries, SyncChannel};
pub use async_channel::{AsyncDirEntries, AsyncSyncChannel};
