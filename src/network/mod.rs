//! Network Module
//!
//! TCP connections to memcached servers.
//!
//! ## Architecture
//! - One task per server connection, all on the client's event loop
//! - Callers enqueue commands and await a oneshot completion
//! - Requests are pipelined; responses matched by correlation id
//! - Failed connections reconnect on their own after a backoff

mod backoff;
mod connection;
mod pool;

pub use backoff::Backoff;
pub use connection::{ConnectionHandle, ConnectionState, ConnectionStats};
pub use pool::{HashRouter, Router, ServerPool};
