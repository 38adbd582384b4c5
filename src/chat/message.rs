//! Chat messages as they travel on the wire.
//!
//! Every message is ASCII text followed by a single NUL byte, and the NUL is
//! part of the transmitted length. Server notices end with `\n`; attributed
//! chat lines carry whatever the client sent, without an added newline.

use std::fmt;
use std::os::unix::io::RawFd;

use crate::constants::{MAX_MESSAGE_LENGTH, MAX_NOTICE_LENGTH};

/// A NUL-terminated broadcast payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    /// Text bytes followed by exactly one trailing NUL.
    bytes: Vec<u8>,
}

impl Message {
    /// Build a message from text, truncating to `limit` bytes including the
    /// terminator, the way `snprintf` would.
    fn bounded(mut text: Vec<u8>, limit: usize) -> Self {
        text.truncate(limit.saturating_sub(1));
        text.push(0);
        Self { bytes: text }
    }

    /// `user <id> joined the chat room\n`
    pub fn joined(id: RawFd) -> Self {
        Self::bounded(
            format!("user {id} joined the chat room\n").into_bytes(),
            MAX_NOTICE_LENGTH,
        )
    }

    /// `user <id> disconnected\n`
    pub fn disconnected(id: RawFd) -> Self {
        Self::bounded(
            format!("user {id} disconnected\n").into_bytes(),
            MAX_NOTICE_LENGTH,
        )
    }

    /// `client <id> disconnected due to error`
    pub fn errored(id: RawFd) -> Self {
        Self::bounded(
            format!("client {id} disconnected due to error").into_bytes(),
            MAX_NOTICE_LENGTH,
        )
    }

    /// `user <id>: <payload>`
    ///
    /// The payload is cut at its first NUL byte, so a client cannot smuggle
    /// a terminator into the middle of a message.
    pub fn chat(id: RawFd, payload: &[u8]) -> Self {
        let payload = payload
            .iter()
            .position(|&b| b == 0)
            .map_or(payload, |nul| &payload[..nul]);

        let mut text = format!("user {id}: ").into_bytes();
        text.extend_from_slice(payload);
        Self::bounded(text, MAX_MESSAGE_LENGTH)
    }

    /// Bytes handed to `send`, terminator included.
    pub fn wire(&self) -> &[u8] {
        &self.bytes
    }

    /// Text without the terminator, as shown on the operator console.
    pub fn text(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - 1]
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Message")
            .field(&String::from_utf8_lossy(self.text()))
            .finish()
    }
}
