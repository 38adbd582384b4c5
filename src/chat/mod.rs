//! The chat room: dispatch loop and connection handler.
//!
//! # Architecture
//!
//! ```text
//! ChatServer::run
//!   └── turn()                      one readiness batch
//!         Registry::wait ──► [Ready { slot, id, serial, kind }, ...]
//!         for each entry, resolved against the live registry:
//!           listener + data-ready  ──► accept_peer   insert, join notice
//!           peer + data-ready      ──► service_peer  recv; chat line or leave
//!           peer + error           ──► drop_errored  error notice, remove
//!           listener + error       ──► fatal
//! ```
//!
//! Everything runs on the calling thread. Reads and sends are blocking, so
//! one slow peer stalls the room; that is accepted here.

pub mod broadcast;
pub mod message;
pub mod registry;

pub use broadcast::{broadcast, Console, Delivery};
pub use message::Message;
pub use registry::{Ready, Registry};

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

use crate::constants::MAX_CLIENT_MSG_LENGTH;
use crate::readiness::ReadinessSource;
use crate::sys;

/// Single-threaded chat server over one readiness strategy.
#[derive(Debug)]
pub struct ChatServer<S> {
    registry: Registry<S>,
    console: Console,
    local_addr: SocketAddr,
    read_chunk: usize,
    batch: Vec<Ready>,
}

impl<S: ReadinessSource> ChatServer<S> {
    /// Take ownership of a listening socket and register it with `source`.
    ///
    /// `capacity` sizes the registry up front (listener included);
    /// `read_chunk` is clamped to `1..=MAX_CLIENT_MSG_LENGTH`.
    pub fn new(
        listener: TcpListener,
        source: S,
        capacity: usize,
        read_chunk: usize,
        console: Console,
    ) -> Result<Self> {
        let local_addr = listener.local_addr().context("listener has no local address")?;
        let mut registry =
            Registry::with_capacity(source, capacity).context("allocate connection registry")?;
        registry
            .insert_listener(OwnedFd::from(listener))
            .context("watch listening socket")?;

        Ok(Self {
            registry,
            console,
            local_addr,
            read_chunk: read_chunk.clamp(1, MAX_CLIENT_MSG_LENGTH),
            batch: Vec::new(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The connection registry.
    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    /// Run until `shutdown` is observed, then close every handle.
    ///
    /// The flag is checked between batches and whenever a signal interrupts
    /// the wait. Any other wait failure is returned as fatal.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        let strategy = self.registry.source().name();
        self.console
            .announce(&format!("started the main {strategy} loop"));
        log::info!("[chat] {strategy} loop running on {}", self.local_addr);

        while !shutdown.load(Ordering::Relaxed) {
            match self.turn() {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).with_context(|| format!("{strategy} loop failed")),
            }
        }

        log::info!("[chat] shutting down, closing {} handle(s)", self.registry.len());
        self.registry.close_all();
        Ok(())
    }

    /// Wait for one readiness batch and service every entry in order.
    ///
    /// Returns an error only for a failed wait or an error condition on the
    /// listener; per-peer failures are handled inside. A listener error is
    /// not announced and removed like a peer error: without the listener the
    /// room could never accept again, so it ends the loop instead.
    pub fn turn(&mut self) -> io::Result<()> {
        let mut batch = std::mem::take(&mut self.batch);
        let result = self.registry.wait(&mut batch).and_then(|()| {
            batch.iter().try_for_each(|ready| self.dispatch(ready))
        });
        self.batch = batch;
        result
    }

    fn dispatch(&mut self, ready: &Ready) -> io::Result<()> {
        let Some(slot) = self.registry.resolve(ready) else {
            log::debug!("[chat] skipping event for departed user {}", ready.id);
            return Ok(());
        };
        let is_listener = self.registry.listener() == Some(ready.id);

        match (is_listener, ready.kind.is_data_ready()) {
            (true, true) => self.accept_peer(),
            (true, false) => Err(io::Error::other(format!(
                "error condition on listening socket {}",
                ready.id
            ))),
            (false, true) => {
                self.service_peer(slot);
                Ok(())
            }
            (false, false) => {
                self.drop_errored(slot);
                Ok(())
            }
        }
    }

    /// Accept one pending connection and announce it.
    ///
    /// Accept failures are logged and swallowed. Only running out of memory
    /// while growing the registry is fatal.
    fn accept_peer(&mut self) -> io::Result<()> {
        let Some(listener) = self.registry.listener_fd() else {
            return Ok(());
        };
        let listener_id = listener.as_raw_fd();

        let (fd, addr) = match sys::accept(listener) {
            Ok(accepted) => accepted,
            Err(e) => {
                log::warn!("[chat] accept: {e}");
                return Ok(());
            }
        };

        let id = fd.as_raw_fd();
        match self.registry.insert(fd) {
            Ok(slot) => {
                log::info!("[chat] user {id} connected from {addr} (slot {slot})");
                self.fan_out(&Message::joined(id), &[listener_id, id]);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::OutOfMemory => Err(e),
            Err(e) => {
                log::warn!("[chat] could not register user {id} from {addr}: {e}");
                Ok(())
            }
        }
    }

    /// Read from the peer in `slot`; relay the data or retire the peer.
    fn service_peer(&mut self, slot: usize) {
        let Some(fd) = self.registry.fd_at(slot) else {
            return;
        };
        let id = fd.as_raw_fd();

        let mut buf = [0u8; MAX_CLIENT_MSG_LENGTH];
        let received = sys::recv(fd, &mut buf[..self.read_chunk]);

        match received {
            Ok(n) if n > 0 => {
                let listener_id = self.listener_id();
                self.fan_out(&Message::chat(id, &buf[..n]), &[listener_id, id]);
            }
            Ok(_) => {
                log::info!("[chat] user {id} hung up");
                self.retire(slot, id);
            }
            Err(e) => {
                log::warn!("[chat] recv from user {id}: {e}");
                self.retire(slot, id);
            }
        }
    }

    fn retire(&mut self, slot: usize, id: RawFd) {
        self.registry.remove_at(slot);
        // The departing handle is already gone; only the listener is excluded.
        let listener_id = self.listener_id();
        self.fan_out(&Message::disconnected(id), &[listener_id]);
    }

    /// Announce and remove a peer whose handle reported an error.
    fn drop_errored(&mut self, slot: usize) {
        let Some(id) = self.registry.id_at(slot) else {
            return;
        };
        log::warn!("[chat] error condition on user {id}");
        let listener_id = self.listener_id();
        self.fan_out(&Message::errored(id), &[listener_id, id]);
        self.registry.remove_at(slot);
    }

    fn listener_id(&self) -> RawFd {
        self.registry.listener().unwrap_or(-1)
    }

    fn fan_out(&mut self, msg: &Message, exclude: &[RawFd]) -> Delivery {
        let delivery = broadcast(&self.registry, msg, exclude, &mut self.console);
        if delivery.failed > 0 {
            log::debug!(
                "[chat] {} of {} sends failed",
                delivery.failed,
                delivery.failed + delivery.delivered
            );
        }
        delivery
    }
}
