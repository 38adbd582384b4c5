//! Readiness notification strategies behind one contract.
//!
//! The chat loop asks a [`ReadinessSource`] for the next batch of registry
//! slots with pending input, hang-up or error. Two implementations exist:
//!
//! ```text
//! PollSource   (all unix)   pollfd array mirrors the registry; poll(2) with
//!                           infinite timeout; O(N) scan per wakeup
//! EpollSource  (linux)      kernel interest set, token = slot index;
//!                           epoll_wait(7) returns only the ready subset
//! ```
//!
//! Both are kept in lockstep with the registry through `add` / `modify` /
//! `delete`, always called with the handle's current slot as the token.

pub mod poll;

#[cfg(target_os = "linux")]
pub mod epoll;

#[cfg(target_os = "linux")]
pub use epoll::EpollSource;
pub use poll::PollSource;

use std::io;
use std::os::unix::io::RawFd;

/// What a readiness source reported for one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Input is pending.
    Readable,
    /// The peer hung up. Serviced exactly like [`EventKind::Readable`]:
    /// the read returns zero and the peer is removed.
    HangUp,
    /// Error condition on the handle (or anything unrecognised).
    Error,
}

impl EventKind {
    /// True for the merged "data-ready-or-hangup" class.
    pub fn is_data_ready(self) -> bool {
        matches!(self, Self::Readable | Self::HangUp)
    }
}

/// One ready slot as reported by a single wait call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEvent {
    /// Registry slot (the correlation token) the event was reported for.
    pub slot: usize,
    /// Classified event.
    pub kind: EventKind,
}

/// A readiness notification strategy.
///
/// Every method takes the slot the handle occupies *after* the registry
/// operation that triggered it. Implementations must not reorder events
/// within one batch.
pub trait ReadinessSource {
    /// Short name used in logs and on the operator console.
    fn name(&self) -> &'static str;

    /// Start watching `fd` for input, correlated with `slot`.
    fn add(&mut self, fd: RawFd, slot: usize) -> io::Result<()>;

    /// `fd` was relocated into `slot` by a swap-remove.
    fn modify(&mut self, fd: RawFd, slot: usize) -> io::Result<()>;

    /// `fd` is leaving `slot`; called before the registry relocates anything.
    fn delete(&mut self, fd: RawFd, slot: usize) -> io::Result<()>;

    /// Block until at least one watched handle is ready and fill `events`.
    ///
    /// `events` is cleared first. An `Interrupted` error means a signal
    /// arrived; any other error is fatal to the caller.
    fn wait(&mut self, events: &mut Vec<SlotEvent>) -> io::Result<()>;
}

impl<S: ReadinessSource + ?Sized> ReadinessSource for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn add(&mut self, fd: RawFd, slot: usize) -> io::Result<()> {
        (**self).add(fd, slot)
    }

    fn modify(&mut self, fd: RawFd, slot: usize) -> io::Result<()> {
        (**self).modify(fd, slot)
    }

    fn delete(&mut self, fd: RawFd, slot: usize) -> io::Result<()> {
        (**self).delete(fd, slot)
    }

    fn wait(&mut self, events: &mut Vec<SlotEvent>) -> io::Result<()> {
        (**self).wait(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readable_and_hangup_are_data_ready() {
        assert!(EventKind::Readable.is_data_ready());
        assert!(EventKind::HangUp.is_data_ready());
        assert!(!EventKind::Error.is_data_ready());
    }
}
