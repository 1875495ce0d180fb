//! Server Pool
//!
//! A fixed set of connections, one per configured server, and the router that
//! picks which one a key belongs to.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};

use super::connection::{ConnectionHandle, ConnectionState, ConnectionStats};
use crate::config::{Config, ServerAddr};
use crate::error::{McError, Result};
use crate::protocol::{Command, ResponseFrame};

/// Maps a key to a server index
///
/// Implementations must be deterministic: the same key and server count
/// always yield the same index. Out-of-range results are reduced modulo the
/// server count.
pub trait Router: Send + Sync + fmt::Debug {
    fn route(&self, key: &[u8], servers: usize) -> usize;
}

/// Default router: CRC32 of the key, modulo the server count
///
/// Uses bits 16..31 of the checksum, the classic memcached client hash, so
/// keys land on the same server as with other clients using that scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashRouter;

impl Router for HashRouter {
    fn route(&self, key: &[u8], servers: usize) -> usize {
        if servers <= 1 {
            return 0;
        }
        let hash = (crc32fast::hash(key) >> 16) & 0x7fff;
        hash as usize % servers
    }
}

/// All connections of one client
#[derive(Debug)]
pub struct ServerPool {
    connections: Vec<ConnectionHandle>,
    router: Box<dyn Router>,
}

impl ServerPool {
    /// Spawn one connection task per configured server
    pub fn new(config: Arc<Config>, router: Box<dyn Router>, runtime: &Handle) -> Result<Self> {
        if config.servers.is_empty() {
            return Err(McError::Config("at least one server is required".to_string()));
        }

        let connections = config
            .servers
            .iter()
            .map(|addr| ConnectionHandle::spawn(addr.clone(), Arc::clone(&config), runtime))
            .collect();

        Ok(Self {
            connections,
            router,
        })
    }

    /// Index of the server that owns `key`
    pub fn route(&self, key: &[u8]) -> usize {
        self.router.route(key, self.connections.len()) % self.connections.len()
    }

    /// Route a command by its key and queue it on that server's connection
    pub fn dispatch(&self, command: Command) -> Result<oneshot::Receiver<Result<ResponseFrame>>> {
        let index = self.route(command.key());
        self.connections[index].dispatch(command)
    }

    /// Close every connection, waiting for each to drain
    pub async fn close(&self) {
        for connection in &self.connections {
            connection.close().await;
        }
    }

    /// Number of servers
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Always false once built; a pool needs at least one server
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Connection of server `index`, if it exists
    pub fn connection(&self, index: usize) -> Option<&ConnectionHandle> {
        self.connections.get(index)
    }

    /// Current state of every server, in configuration order
    pub fn states(&self) -> Vec<(ServerAddr, ConnectionState)> {
        self.connections
            .iter()
            .map(|c| (c.addr().clone(), c.state()))
            .collect()
    }

    /// Counters of every server, in configuration order
    pub fn stats(&self) -> Vec<(ServerAddr, ConnectionStats)> {
        self.connections
            .iter()
            .map(|c| (c.addr().clone(), c.stats()))
            .collect()
    }

    /// Watch the state of one server
    pub fn subscribe(&self, index: usize) -> Option<watch::Receiver<ConnectionState>> {
        self.connections.get(index).map(ConnectionHandle::subscribe)
    }
}
