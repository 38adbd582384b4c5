//! Listening socket construction.
//!
//! Resolves the service to a port, creates a stream socket for the chosen
//! address family, sets `SO_REUSEADDR` before binding to the wildcard
//! address and enters the listening state with the requested backlog.
//! Failures are reported once; nothing is retried.

use std::ffi::CString;
use std::io;
use std::mem;
use std::net::TcpListener;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Address family the listener binds in.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// `AF_INET`, bound to `0.0.0.0`.
    #[default]
    Ipv4,
    /// `AF_INET6`, bound to `::`.
    Ipv6,
}

impl std::str::FromStr for Family {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ipv4" | "inet" | "4" => Ok(Self::Ipv4),
            "ipv6" | "inet6" | "6" => Ok(Self::Ipv6),
            other => bail!("unknown address family '{other}' (expected ipv4 or ipv6)"),
        }
    }
}

/// Resolve a numeric port or a TCP service name (`/etc/services`).
pub fn resolve_port(service: &str) -> Result<u16> {
    if let Ok(port) = service.parse::<u16>() {
        return Ok(port);
    }

    let name = CString::new(service).context("service name contains a NUL byte")?;
    let proto = c"tcp";
    // SAFETY: both arguments are valid NUL-terminated strings; the returned
    // entry is read immediately, before any other netdb call.
    let entry = unsafe { libc::getservbyname(name.as_ptr(), proto.as_ptr()) };
    if entry.is_null() {
        bail!("unknown service '{service}'");
    }
    // SAFETY: non-null pointer returned by getservbyname.
    let raw = unsafe { (*entry).s_port };
    Ok(u16::from_be(raw as u16))
}

/// Open a bound, listening, address-reusing TCP socket for `service`.
pub fn open_listener(service: &str, backlog: i32, family: Family) -> Result<TcpListener> {
    let port = resolve_port(service)?;
    let domain = match family {
        Family::Ipv4 => libc::AF_INET,
        Family::Ipv6 => libc::AF_INET6,
    };

    // SAFETY: plain syscall.
    let raw = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if raw == -1 {
        return Err(io::Error::last_os_error()).context("socket");
    }
    // SAFETY: `raw` is a fresh descriptor owned by nobody else.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    set_cloexec(&fd).context("fcntl(FD_CLOEXEC)")?;
    set_reuseaddr(&fd).context("setsockopt(SO_REUSEADDR)")?;
    bind_wildcard(&fd, family, port).with_context(|| format!("bind port {port}"))?;

    // SAFETY: plain syscall on an owned descriptor.
    if unsafe { libc::listen(fd.as_raw_fd(), backlog) } == -1 {
        return Err(io::Error::last_os_error()).context("listen");
    }

    let listener = TcpListener::from(fd);
    if let Ok(addr) = listener.local_addr() {
        log::info!("[listener] listening on {addr} (backlog {backlog})");
    }
    Ok(listener)
}

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    // SAFETY: plain fcntl calls on an owned descriptor.
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, flags | libc::FD_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_reuseaddr(fd: &OwnedFd) -> io::Result<()> {
    let yes: libc::c_int = 1;
    // SAFETY: `yes` is a live c_int and its size is passed alongside.
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            std::ptr::addr_of!(yes).cast::<libc::c_void>(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn bind_wildcard(fd: &OwnedFd, family: Family, port: u16) -> io::Result<()> {
    let rc = match family {
        Family::Ipv4 => {
            // SAFETY: all-zero is a valid sockaddr_in (INADDR_ANY).
            let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
            addr.sin_family = libc::AF_INET as libc::sa_family_t;
            addr.sin_port = port.to_be();
            // SAFETY: `addr` is a properly sized sockaddr_in.
            unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
                    mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            }
        }
        Family::Ipv6 => {
            // SAFETY: all-zero is a valid sockaddr_in6 (in6addr_any).
            let mut addr: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            addr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            addr.sin6_port = port.to_be();
            // SAFETY: `addr` is a properly sized sockaddr_in6.
            unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
                    mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            }
        }
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
