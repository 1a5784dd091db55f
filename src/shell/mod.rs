//! Shell Module
//!
//! Read-side adapters for raw `shell:` output.
//!
//! ## Responsibilities
//! - Undo the pty's LF -> CR LF rewrite, byte for byte
//! - Same behaviour on the blocking and suspendable read paths
//! - Carry at most one byte between reads

mod filter;

pub use filter::{FilterState, ShellLineFilter};
