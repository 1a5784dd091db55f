//! Response definitions
//!
//! Status tokens returned by the adb server for every request.

/// Status token that starts every response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusToken {
    /// `OKAY`: the request was accepted
    Okay,

    /// `FAIL`: the request was refused, with the server's message
    Fail(String),
}

impl StatusToken {
    pub const OKAY: &'static [u8; 4] = b"OKAY";
    pub const FAIL: &'static [u8; 4] = b"FAIL";

    pub fn is_okay(&self) -> bool {
        matches!(self, StatusToken::Okay)
    }

    /// Failure message, if any
    pub fn message(&self) -> Option<&str> {
        match self {
            StatusToken::Okay => None,
            StatusToken::Fail(message) => Some(message),
        }
    }
}
