//! Application-wide constants for multichat.
//!
//! Buffer bounds, socket defaults and registry sizing live here so the
//! handler, config and readiness modules agree on them.
//!
//! # Categories
//!
//! - **Messages**: read chunk and attribution budgets
//! - **Listener**: socket defaults
//! - **Registry**: initial capacities and event batch size

// ============================================================================
// Messages
// ============================================================================

/// Maximum number of bytes read from a peer in one service call.
pub const MAX_CLIENT_MSG_LENGTH: usize = 256;

/// Bytes reserved for the `user <id>: ` attribution prefix.
///
/// Budgeted separately from the payload so a full-size read is never
/// truncated by the prefix.
pub const PREFIX_BUDGET: usize = 32;

/// Upper bound for an attributed chat message, terminator included.
pub const MAX_MESSAGE_LENGTH: usize = PREFIX_BUDGET + MAX_CLIENT_MSG_LENGTH;

/// Upper bound for a server-synthesized notice, terminator included.
pub const MAX_NOTICE_LENGTH: usize = 256;

// ============================================================================
// Listener
// ============================================================================

/// Pending-connection backlog handed to `listen(2)`.
pub const DEFAULT_BACKLOG: i32 = 512;

// ============================================================================
// Registry
// ============================================================================

/// Capacity used when the registry is created empty or no room size is given.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 16;

/// Maximum number of events collected by one `epoll_wait(2)` call.
pub const DEFAULT_MAX_EVENTS: usize = 16_384;
