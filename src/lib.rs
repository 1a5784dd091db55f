//! # adbwire
//!
//! A client for the Android Debug Bridge wire protocol, speaking directly to
//! the local adb server over a socket:
//! - Host request framing (4 hex digit length prefix, `OKAY`/`FAIL`)
//! - Sync V1 and V2 file transfer with Brotli, LZ4 and Zstd compression
//! - CR LF undoing filter for raw shell output
//! - Blocking and tokio-based execution with identical wire behaviour
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Session / AsyncSession                   │
//! │           (one connection, one top-level operation)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ command ──► OKAY
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │    Shell    │          │    Sync     │
//!   │ (LineFilter)│          │  (Channel)  │
//!   └─────────────┘          └──────┬──────┘
//!                                   │
//!                                   ▼
//!                           ┌─────────────┐
//!                           │   Codecs    │
//!                           │(br/lz4/zstd)│
//!                           └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod shell;
pub mod sync;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{AdbError, Result};
pub use config::Config;
pub use protocol::{Command, StatusToken};
pub use shell::ShellLineFilter;
pub use sync::{AsyncSyncChannel, CompressionType, FileEntry, SyncChannel, SyncFlag};
pub use network::{AsyncSession, Session};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of adbwire
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
