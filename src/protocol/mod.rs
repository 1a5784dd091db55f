//! Protocol Module
//!
//! Framing for host and device requests sent to the adb server.
//!
//! ## Protocol Format
//!
//! ### Request Format
//! ```text
//! ┌──────────────────┬─────────────────────────────┐
//! │ Len (4 hex chars)│           Command           │
//! └──────────────────┴─────────────────────────────┘
//! ```
//!
//! ### Commands
//! - `host:transport:<serial>` - switch the socket to a device
//! - `host:devices`            - device list (consumed by higher layers)
//! - `sync:`                   - enter the sync sub-protocol
//! - `shell:<cmd>`             - raw shell output
//! - `shell,v2:<cmd>`          - shell v2 packet protocol
//!
//! ### Status Tokens
//! - `OKAY`: request accepted, socket now belongs to the requested service
//! - `FAIL`: followed by a 4-hex-digit length and a UTF-8 message

mod command;
mod response;
mod codec;

pub use command::{Command, MAX_COMMAND_LEN};
pub use response::StatusToken;
pub use codec::{
    decode_length, decode_status, encode_command, read_length_prefixed, read_length_prefixed_async,
    read_status, read_status_async, read_string, read_string_async, write_command,
    write_command_async, LENGTH_PREFIX_SIZE, STATUS_SIZE,
};
