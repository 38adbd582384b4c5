//! Thin `libc` wrappers for the blocking socket calls the chat loop makes.
//!
//! Descriptors are borrowed, never adopted: ownership stays with the
//! [`Registry`](crate::chat::Registry), which is the only place a handle is
//! closed.

use std::io;
use std::mem::ManuallyDrop;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

#[cfg(target_os = "linux")]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(target_os = "linux"))]
const SEND_FLAGS: libc::c_int = 0;

/// Accept one pending connection on a listening socket.
///
/// The listener is only borrowed: `ManuallyDrop` keeps the temporary
/// `TcpListener` from closing it.
pub fn accept(listener: BorrowedFd<'_>) -> io::Result<(OwnedFd, SocketAddr)> {
    // SAFETY: `listener` is a live descriptor for the duration of the borrow
    // and the wrapper is never dropped, so ownership is not taken.
    let borrowed = ManuallyDrop::new(unsafe { TcpListener::from_raw_fd(listener.as_raw_fd()) });
    let (stream, addr) = borrowed.accept()?;
    Ok((OwnedFd::from(stream), addr))
}

/// Blocking receive of at most `buf.len()` bytes.
///
/// Returns `Ok(0)` on orderly shutdown by the peer. `EINTR` is retried.
pub fn recv(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        let n = unsafe {
            libc::recv(
                fd.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
                0,
            )
        };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Blocking send of the whole buffer.
///
/// Short writes are continued until every byte is handed to the kernel.
/// A peer that has gone away yields `EPIPE` instead of raising `SIGPIPE`.
pub fn send_all(fd: BorrowedFd<'_>, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        // SAFETY: `buf` is valid for reads of `buf.len()` bytes.
        let n = unsafe {
            libc::send(
                fd.as_raw_fd(),
                buf.as_ptr().cast::<libc::c_void>(),
                buf.len(),
                SEND_FLAGS,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        buf = &buf[n as usize..];
    }
    Ok(())
}

/// Close a descriptor, logging instead of propagating a failed `close(2)`.
///
/// The descriptor is released either way; callers use this where the slot
/// has to be reclaimed regardless of the outcome.
pub fn close_logged(fd: OwnedFd) {
    let raw: RawFd = fd.into_raw_fd();
    // SAFETY: `raw` was just released from an `OwnedFd`, so it is open and
    // nothing else will close it.
    if unsafe { libc::close(raw) } == -1 {
        log::warn!("[chat] close({raw}): {}", io::Error::last_os_error());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::os::unix::io::AsFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_send_all_and_recv_over_pair() {
        let (a, mut b) = UnixStream::pair().unwrap();
        send_all(a.as_fd(), b"hello\0").unwrap();

        let mut buf = [0u8; 16];
        let n = b.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello\0");
    }

    #[test]
    fn test_recv_returns_zero_on_peer_close() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);

        let mut buf = [0u8; 16];
        assert_eq!(recv(a.as_fd(), &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_recv_reads_at_most_buffer_len() {
        let (a, mut b) = UnixStream::pair().unwrap();
        b.write_all(b"0123456789").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(recv(a.as_fd(), &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
    }

    #[test]
    fn test_send_all_to_closed_peer_is_epipe_not_signal() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);

        let err = send_all(a.as_fd(), b"late").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_accept_borrows_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();

        let (peer, peer_addr) = accept(listener.as_fd()).unwrap();
        assert!(peer.as_raw_fd() >= 0);
        assert!(peer_addr.ip().is_loopback());

        // The listener must still be usable after the borrowed accept.
        let _second = TcpStream::connect(addr).unwrap();
        assert!(accept(listener.as_fd()).is_ok());
    }

    #[test]
    fn test_close_logged_releases_descriptor() {
        let (a, b) = UnixStream::pair().unwrap();
        close_logged(OwnedFd::from(a));

        let mut b = b;
        let mut buf = [0u8; 1];
        assert_eq!(b.read(&mut buf).unwrap(), 0);
    }
}
