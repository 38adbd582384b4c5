//! Connection registry: the dense set of live handles.
//!
//! Slots `[0, len)` always hold distinct open descriptors with no gaps. The
//! registry owns its [`ReadinessSource`] and keeps it in lockstep, so the
//! source's token for the handle in slot `i` is always `i`.
//!
//! ```text
//! insert(h)      slot = len            source.add(h, slot)
//! remove_at(k)   source.delete(h_k, k)
//!                close(h_k)
//!                h_last -> k           source.modify(h_last, k)
//! ```
//!
//! Removal is a swap-remove: O(1), and it reorders the tail. Readiness
//! batches are therefore snapshots tagged with a per-peer serial, resolved
//! back to a live slot with [`Registry::resolve`] at dispatch time.

use std::io;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use crate::constants::DEFAULT_REGISTRY_CAPACITY;
use crate::readiness::{EventKind, ReadinessSource, SlotEvent};
use crate::sys;

/// One registered handle.
#[derive(Debug)]
struct Peer {
    fd: OwnedFd,
    /// Never reused, unlike the descriptor number.
    serial: u64,
}

/// A ready handle captured by one wait call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    /// Slot the handle occupied when the batch was taken.
    pub slot: usize,
    /// Descriptor number, used as the user-visible id.
    pub id: RawFd,
    /// Registry serial of the handle.
    pub serial: u64,
    /// What was reported.
    pub kind: EventKind,
}

/// Dense, growable set of live handles plus the readiness source watching them.
#[derive(Debug)]
pub struct Registry<S> {
    peers: Vec<Peer>,
    capacity: usize,
    listener: Option<RawFd>,
    listener_slot: usize,
    next_serial: u64,
    source: S,
    slot_events: Vec<SlotEvent>,
}

impl<S: ReadinessSource> Registry<S> {
    /// Create an empty registry with room for `capacity` handles.
    pub fn with_capacity(source: S, capacity: usize) -> io::Result<Self> {
        let mut peers = Vec::new();
        peers
            .try_reserve_exact(capacity)
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        Ok(Self {
            peers,
            capacity,
            listener: None,
            listener_slot: 0,
            next_serial: 0,
            source,
            slot_events: Vec::new(),
        })
    }

    /// Number of live handles, listener included.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Slots available before the next growth.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The readiness source.
    pub fn source(&self) -> &S {
        &self.source
    }

    #[cfg(test)]
    pub(crate) fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Descriptor number of the listening handle, once registered.
    pub fn listener(&self) -> Option<RawFd> {
        self.listener
    }

    /// Borrow the listening handle.
    pub fn listener_fd(&self) -> Option<BorrowedFd<'_>> {
        let id = self.listener?;
        self.peers
            .get(self.listener_slot)
            .filter(|p| p.fd.as_raw_fd() == id)
            .map(|p| p.fd.as_fd())
    }

    /// Descriptor number held in `slot`.
    pub fn id_at(&self, slot: usize) -> Option<RawFd> {
        self.peers.get(slot).map(|p| p.fd.as_raw_fd())
    }

    /// Borrow the handle held in `slot`.
    pub fn fd_at(&self, slot: usize) -> Option<BorrowedFd<'_>> {
        self.peers.get(slot).map(|p| p.fd.as_fd())
    }

    /// Descriptor numbers in slot order.
    pub fn ids(&self) -> Vec<RawFd> {
        self.peers.iter().map(|p| p.fd.as_raw_fd()).collect()
    }

    /// Register the listening handle. It takes part in every wait but is
    /// never a broadcast source or destination.
    pub fn insert_listener(&mut self, fd: OwnedFd) -> io::Result<usize> {
        let id = fd.as_raw_fd();
        let slot = self.insert(fd)?;
        self.listener = Some(id);
        self.listener_slot = slot;
        Ok(slot)
    }

    /// Append a handle at slot `len`, growing first when full.
    ///
    /// If the readiness source refuses the handle it is closed and the
    /// registry is left unchanged.
    pub fn insert(&mut self, fd: OwnedFd) -> io::Result<usize> {
        self.grow_if_full()?;

        let slot = self.peers.len();
        if let Err(e) = self.source.add(fd.as_raw_fd(), slot) {
            sys::close_logged(fd);
            return Err(e);
        }

        let serial = self.next_serial;
        self.next_serial += 1;
        self.peers.push(Peer { fd, serial });
        Ok(slot)
    }

    fn grow_if_full(&mut self) -> io::Result<()> {
        if self.peers.len() < self.capacity {
            return Ok(());
        }
        let grown = if self.capacity == 0 {
            DEFAULT_REGISTRY_CAPACITY
        } else {
            self.capacity * 2
        };
        self.peers
            .try_reserve_exact(grown - self.peers.len())
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        log::debug!("[chat] registry capacity {} -> {grown}", self.capacity);
        self.capacity = grown;
        Ok(())
    }

    /// Swap-remove the handle in `slot` and close it.
    ///
    /// Never fails part-way: deregistration and close errors are logged and
    /// the slot is reclaimed regardless. Returns the removed descriptor
    /// number, or `None` if `slot` is out of range.
    ///
    /// After this call `slot` holds what used to be the last handle.
    pub fn remove_at(&mut self, slot: usize) -> Option<RawFd> {
        let id = self.id_at(slot)?;

        if let Err(e) = self.source.delete(id, slot) {
            log::debug!("[chat] deregister fd {id} from slot {slot}: {e}");
        }
        let peer = self.peers.swap_remove(slot);
        sys::close_logged(peer.fd);

        if let Some(moved) = self.peers.get(slot) {
            let moved_id = moved.fd.as_raw_fd();
            if let Err(e) = self.source.modify(moved_id, slot) {
                log::error!("[chat] re-register fd {moved_id} at slot {slot}: {e}");
            }
            if self.listener == Some(moved_id) {
                self.listener_slot = slot;
            }
        }

        if self.listener == Some(id) {
            self.listener = None;
        }
        Some(id)
    }

    /// Call `f` for every live handle except the listener and `exclude`.
    ///
    /// Visits in slot order.
    pub fn for_each_except<F>(&self, exclude: &[RawFd], mut f: F)
    where
        F: FnMut(RawFd, BorrowedFd<'_>),
    {
        for peer in &self.peers {
            let id = peer.fd.as_raw_fd();
            if Some(id) == self.listener || exclude.contains(&id) {
                continue;
            }
            f(id, peer.fd.as_fd());
        }
    }

    /// Block for the next readiness batch and snapshot it into `batch`.
    ///
    /// Events for slots beyond the live range are dropped with a warning.
    pub fn wait(&mut self, batch: &mut Vec<Ready>) -> io::Result<()> {
        batch.clear();
        self.source.wait(&mut self.slot_events)?;

        for ev in &self.slot_events {
            match self.peers.get(ev.slot) {
                Some(peer) => batch.push(Ready {
                    slot: ev.slot,
                    id: peer.fd.as_raw_fd(),
                    serial: peer.serial,
                    kind: ev.kind,
                }),
                None => log::warn!(
                    "[{}] event for slot {} beyond {} live handles",
                    self.source.name(),
                    ev.slot,
                    self.peers.len()
                ),
            }
        }
        Ok(())
    }

    /// Current slot of a handle captured in an earlier batch.
    ///
    /// Returns `None` once the handle has been removed, even if its
    /// descriptor number was reused by a later accept.
    pub fn resolve(&self, ready: &Ready) -> Option<usize> {
        match self.peers.get(ready.slot) {
            Some(peer) if peer.serial == ready.serial => Some(ready.slot),
            _ => self.peers.iter().position(|p| p.serial == ready.serial),
        }
    }

    /// Close every handle, listener included.
    pub fn close_all(&mut self) {
        while !self.peers.is_empty() {
            self.remove_at(self.peers.len() - 1);
        }
    }
}
