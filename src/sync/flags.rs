//! Sync capability flags and compression choices
//!
//! Two independently evolved ways of choosing a codec live side by side:
//! the raw [`SyncFlag`] word adbd reads from `RCV2`/`SND2` requests, and the
//! negotiated [`CompressionType`] whose `Any` is resolved by the remote.

use std::fmt;
use std::str::FromStr;

use crate::error::{AdbError, Result};

bitflags::bitflags! {
    /// Flag word carried by `RCV2` and `SND2` requests
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SyncFlag: u32 {
        const BROTLI = 1;
        const LZ4 = 2;
        const ZSTD = 4;
        const DRY_RUN = 0x8000_0000;
    }
}

impl SyncFlag {
    /// Transmit raw
    pub const NONE: Self = Self::empty();

    /// Every codec bit
    pub const CODECS: Self = Self::BROTLI.union(Self::LZ4).union(Self::ZSTD);

    /// The single codec these flags select
    ///
    /// No codec bit means raw transfer; more than one is ambiguous without a
    /// negotiating remote.
    pub fn compression(self) -> Result<CompressionType> {
        let codecs = self & Self::CODECS;
        if codecs.is_empty() {
            Ok(CompressionType::None)
        } else if codecs == Self::BROTLI {
            Ok(CompressionType::Brotli)
        } else if codecs == Self::LZ4 {
            Ok(CompressionType::Lz4)
        } else if codecs == Self::ZSTD {
            Ok(CompressionType::Zstd)
        } else {
            Err(AdbError::Unsupported(format!(
                "sync flags {:#x} select more than one codec",
                self.bits()
            )))
        }
    }

    pub fn is_dry_run(self) -> bool {
        self.contains(Self::DRY_RUN)
    }
}

/// Compression used by a sync V2 transfer
///
/// The discriminants are the wire ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum CompressionType {
    #[default]
    None = 0,
    /// Request-time wildcard: let the remote choose
    Any = 1,
    Brotli = 2,
    Lz4 = 3,
    Zstd = 4,
}

impl CompressionType {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Any),
            2 => Some(CompressionType::Brotli),
            3 => Some(CompressionType::Lz4),
            4 => Some(CompressionType::Zstd),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        self as u32
    }

    /// Everything but the `Any` wildcard
    pub fn is_concrete(self) -> bool {
        self != CompressionType::Any
    }

    /// Flag bits advertising this choice in a request
    pub fn flag(self) -> SyncFlag {
        match self {
            CompressionType::None => SyncFlag::NONE,
            CompressionType::Any => SyncFlag::CODECS,
            CompressionType::Brotli => SyncFlag::BROTLI,
            CompressionType::Lz4 => SyncFlag::LZ4,
            CompressionType::Zstd => SyncFlag::ZSTD,
        }
    }
}

impl From<CompressionType> for SyncFlag {
    fn from(compression: CompressionType) -> Self {
        compression.flag()
    }
}

impl TryFrom<SyncFlag> for CompressionType {
    type Error = AdbError;

    fn try_from(flags: SyncFlag) -> Result<Self> {
        flags.compression()
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionType::None => "none",
            CompressionType::Any => "any",
            CompressionType::Brotli => "brotli",
            CompressionType::Lz4 => "lz4",
            CompressionType::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

impl FromStr for CompressionType {
    type Err = AdbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionType::None),
            "any" => Ok(CompressionType::Any),
            "brotli" => Ok(CompressionType::Brotli),
            "lz4" => Ok(CompressionType::Lz4),
            "zstd" => Ok(CompressionType::Zstd),
            other => Err(AdbError::Unsupported(format!("unknown compression {:?}", other))),
        }
    }
}
