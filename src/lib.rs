//! multichat - a single-threaded TCP chat room.
//!
//! One listening socket accepts many clients. Bytes received from one client
//! are rebroadcast, prefixed with `user <id>: `, to every other client.
//! Joins and departures are announced the same way.
//!
//! # Architecture
//!
//! - **Listener** - [`listener::open_listener`] builds the bound socket
//! - **Registry** - [`chat::Registry`] owns every live handle in a dense array
//! - **Readiness** - [`readiness::ReadinessSource`], implemented by `poll(2)`
//!   and (on Linux) `epoll(7)`
//! - **Dispatch** - [`chat::ChatServer`] pulls batches and routes each entry
//! - **Broadcast** - [`chat::broadcast`] fans a message out
//!
//! Everything runs on one thread; no handle is touched after it is closed.

#[cfg(not(unix))]
compile_error!("multichat only supports Unix-like operating systems.");

pub mod chat;
pub mod config;
pub mod constants;
pub mod listener;
pub mod readiness;
pub mod sys;

pub use chat::{ChatServer, Console, Message};
pub use config::Config;
pub use listener::{open_listener, Family};
pub use readiness::{PollSource, ReadinessSource};

#[cfg(target_os = "linux")]
pub use readiness::EpollSource;
