//! # AtlasMC
//!
//! An asynchronous memcached client speaking the binary protocol:
//! - Pipelined requests matched to responses by correlation id
//! - Resumable frame decoding over partial reads
//! - Per-request deadlines and caller cancellation
//! - Automatic reconnect with jittered exponential backoff
//! - Key-hashed routing over a fixed set of servers
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Client (async) / CallbackClient              │
//! │            validate → build command → await result           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Server Pool                             │
//! │                (Router: key → server index)                  │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  mpsc queue per server
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Connection  │   ...    │ Connection  │   tasks on one
//!   │  + Tracker  │          │  + Tracker  │   event loop thread
//!   └──────┬──────┘          └──────┬──────┘
//!          │ binary protocol codec  │
//!          ▼                         ▼
//!      memcached                 memcached
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod tracker;
pub mod network;
pub mod event_loop;
pub mod client;
pub mod compat;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{McError, Result};
pub use config::{Config, ServerAddr};
pub use client::{Client, Item};
pub use compat::CallbackClient;
pub use network::{ConnectionState, ConnectionStats, HashRouter, Router};
pub use protocol::{Expiry, Status};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasMC
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
