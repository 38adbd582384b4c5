//! Fan-out of one message to every registered peer but a few.
//!
//! Sends are blocking and best-effort: a failure on one peer is logged and
//! skipped. The peer stays registered; the dispatch loop removes it when its
//! own readiness reports the hang-up or error.

use std::io::{self, Write};
use std::os::unix::io::RawFd;

use super::message::Message;
use super::registry::Registry;
use crate::readiness::ReadinessSource;
use crate::sys;

/// Local operator console. Every broadcast is echoed here once.
pub struct Console {
    out: Box<dyn Write>,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

impl Console {
    /// Console writing to the process's standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Console writing to any sink.
    pub fn new(out: impl Write + 'static) -> Self {
        Self { out: Box::new(out) }
    }

    /// Print one operator line.
    pub fn announce(&mut self, line: &str) {
        self.emit(format!("{line}\n").as_bytes());
    }

    /// Echo a broadcast message, without its terminator.
    pub fn echo(&mut self, msg: &Message) {
        self.emit(msg.text());
    }

    fn emit(&mut self, bytes: &[u8]) {
        if let Err(e) = self.out.write_all(bytes).and_then(|()| self.out.flush()) {
            log::warn!("[chat] console write: {e}");
        }
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Peers that accepted the whole message.
    pub delivered: usize,
    /// Peers whose send failed.
    pub failed: usize,
}

/// Send `msg` to every live handle except the listener and `exclude`, then
/// echo it on `console`.
///
/// Never fails and never touches registry membership.
pub fn broadcast<S: ReadinessSource>(
    registry: &Registry<S>,
    msg: &Message,
    exclude: &[RawFd],
    console: &mut Console,
) -> Delivery {
    let mut delivery = Delivery::default();
    registry.for_each_except(exclude, |id, fd| match sys::send_all(fd, msg.wire()) {
        Ok(()) => delivery.delivered += 1,
        Err(e) => {
            log::warn!("[chat] send to user {id}: {e}");
            delivery.failed += 1;
        }
    });
    console.echo(msg);
    delivery
}
