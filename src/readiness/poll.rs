//! Level-triggered `poll(2)` strategy.
//!
//! The watched set is a dense `pollfd` array whose index `i` always holds
//! the handle in registry slot `i`. Every wait hands the whole array to the
//! kernel and scans all of it afterwards.

use std::io;
use std::os::unix::io::RawFd;

use super::{EventKind, ReadinessSource, SlotEvent};

/// `poll(2)`-backed readiness source.
#[derive(Default)]
pub struct PollSource {
    pfds: Vec<libc::pollfd>,
}

impl std::fmt::Debug for PollSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollSource")
            .field("watched", &self.pfds.iter().map(|p| p.fd).collect::<Vec<_>>())
            .finish()
    }
}

impl PollSource {
    /// Create an empty source with room for `capacity` handles.
    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        let mut pfds = Vec::new();
        pfds.try_reserve_exact(capacity)
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        Ok(Self { pfds })
    }

    /// Number of watched handles.
    pub fn len(&self) -> usize {
        self.pfds.len()
    }

    /// True when nothing is watched.
    pub fn is_empty(&self) -> bool {
        self.pfds.is_empty()
    }

    /// Descriptor watched at `slot`, if any.
    pub fn watched(&self, slot: usize) -> Option<RawFd> {
        self.pfds.get(slot).map(|p| p.fd)
    }

    fn entry(fd: RawFd) -> libc::pollfd {
        libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        }
    }
}

/// Map `revents` to an [`EventKind`].
///
/// Input wins over hang-up so buffered bytes are still delivered before the
/// zero-length read.
fn classify(revents: libc::c_short) -> EventKind {
    if revents & libc::POLLIN != 0 {
        EventKind::Readable
    } else if revents & libc::POLLHUP != 0 {
        EventKind::HangUp
    } else {
        EventKind::Error
    }
}

impl ReadinessSource for PollSource {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn add(&mut self, fd: RawFd, slot: usize) -> io::Result<()> {
        if slot != self.pfds.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("poll add at slot {slot} but {} watched", self.pfds.len()),
            ));
        }
        self.pfds
            .try_reserve(1)
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        self.pfds.push(Self::entry(fd));
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, slot: usize) -> io::Result<()> {
        let Some(pfd) = self.pfds.get_mut(slot) else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no poll slot {slot}"),
            ));
        };
        *pfd = Self::entry(fd);
        Ok(())
    }

    fn delete(&mut self, fd: RawFd, slot: usize) -> io::Result<()> {
        let Some(watched) = self.watched(slot) else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no poll slot {slot}"),
            ));
        };
        // Mirrors the registry's swap-remove, which happens whatever we
        // return, so the slot goes even on a mismatch. The relocated entry
        // is rewritten again by the `modify` that follows.
        self.pfds.swap_remove(slot);
        if watched != fd {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("poll slot {slot} held fd {watched}, expected fd {fd}"),
            ));
        }
        Ok(())
    }

    fn wait(&mut self, events: &mut Vec<SlotEvent>) -> io::Result<()> {
        events.clear();
        for pfd in &mut self.pfds {
            pfd.revents = 0;
        }

        // SAFETY: `pfds` is a live, exclusively borrowed array of
        // `pfds.len()` initialised `pollfd` structs.
        let n = unsafe {
            libc::poll(
                self.pfds.as_mut_ptr(),
                self.pfds.len() as libc::nfds_t,
                -1,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        events.extend(
            self.pfds
                .iter()
                .enumerate()
                .filter(|(_, pfd)| pfd.revents != 0)
                .map(|(slot, pfd)| SlotEvent {
                    slot,
                    kind: classify(pfd.revents),
                }),
        );
        log::debug!("[poll] {n} ready of {}", self.pfds.len());
        Ok(())
    }
}
