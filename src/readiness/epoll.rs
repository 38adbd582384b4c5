//! `epoll(7)` strategy.
//!
//! The kernel holds the interest set. Each registration carries the handle's
//! registry slot in `epoll_event.u64`, so a wakeup maps straight back to a
//! slot without scanning. A swap-remove that relocates a handle must be
//! followed by [`ReadinessSource::modify`] before the next wait, or later
//! events will point at the wrong slot.

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use super::{EventKind, ReadinessSource, SlotEvent};

/// `epoll`-backed readiness source.
pub struct EpollSource {
    epfd: OwnedFd,
    events: Vec<libc::epoll_event>,
}

impl std::fmt::Debug for EpollSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpollSource")
            .field("epfd", &self.epfd)
            .field("max_events", &self.events.len())
            .finish()
    }
}

impl EpollSource {
    /// Create an epoll instance that reports at most `max_events` per wait.
    pub fn new(max_events: usize) -> io::Result<Self> {
        // SAFETY: plain syscall, no pointers involved.
        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw == -1 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
        let epfd = unsafe { OwnedFd::from_raw_fd(raw) };

        let max_events = max_events.max(1);
        let mut events = Vec::new();
        events
            .try_reserve_exact(max_events)
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        events.resize(max_events, libc::epoll_event { events: 0, u64: 0 });

        Ok(Self { epfd, events })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, slot: usize) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: slot as u64,
        };
        // SAFETY: `ev` outlives the call; the kernel copies it.
        let rc = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Map an epoll event mask to an [`EventKind`].
fn classify(mask: u32) -> EventKind {
    if mask & libc::EPOLLIN as u32 != 0 {
        EventKind::Readable
    } else if mask & libc::EPOLLHUP as u32 != 0 {
        EventKind::HangUp
    } else {
        EventKind::Error
    }
}

impl ReadinessSource for EpollSource {
    fn name(&self) -> &'static str {
        "epoll"
    }

    fn add(&mut self, fd: RawFd, slot: usize) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, slot)
    }

    fn modify(&mut self, fd: RawFd, slot: usize) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, slot)
    }

    fn delete(&mut self, fd: RawFd, _slot: usize) -> io::Result<()> {
        // SAFETY: a null event pointer is allowed for EPOLL_CTL_DEL.
        let rc = unsafe {
            libc::epoll_ctl(
                self.epfd.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn wait(&mut self, events: &mut Vec<SlotEvent>) -> io::Result<()> {
        events.clear();

        // SAFETY: `self.events` holds `len` initialised entries the kernel
        // may overwrite.
        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                -1,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        events.extend(self.events[..n as usize].iter().map(|ev| {
            // Copy out of the packed struct before use.
            let mask = ev.events;
            let token = ev.u64;
            SlotEvent {
                slot: token as usize,
                kind: classify(mask),
            }
        }));
        log::debug!("[epoll] {n} ready");
        Ok(())
    }
}
