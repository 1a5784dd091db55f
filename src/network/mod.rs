//! Network Module
//!
//! Sessions against the local adb server.
//!
//! ## Architecture
//! - One connection per session, one top-level operation per session
//! - No state shared between sessions; parallel transfers open parallel
//!   connections
//! - Timeouts belong to the transport; nothing here retries

mod session;
mod async_session;
mod parallel;

pub use session::Session;
pub use async_session::AsyncSession;
pub use parallel::{pull_many, PullRequest};
