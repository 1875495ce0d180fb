//! Client Facade
//!
//! The public, async API. Every call validates its input, builds exactly one
//! wire command, hands it to the server pool and waits for the tracker to
//! resolve it.
//!
//! ## Outcomes
//! - `Ok(Some(_))` / `Ok(true)`: the server answered with a value or success
//! - `Ok(None)` / `Ok(false)`: the key does not exist (a miss)
//! - `Err(_)`: local validation, transport, protocol or server failure
//!
//! There are no retries at this layer. A command that failed in transit may
//! or may not have been applied by the server.
//!
//! ## Example
//! ```no_run
//! # async fn demo() -> atlasmc::Result<()> {
//! use atlasmc::{Client, Expiry};
//!
//! let client = Client::connect("127.0.0.1:11211")?;
//! client.set("greeting", "hello", Expiry::Never).await?;
//! assert_eq!(client.get("greeting").await?.as_deref(), Some(&b"hello"[..]));
//! client.close().await;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::config::{Config, ServerAddr, MAX_KEY_LENGTH};
use crate::error::{McError, Result};
use crate::event_loop::EventLoop;
use crate::network::{ConnectionState, ConnectionStats, HashRouter, Router, ServerPool};
use crate::protocol::{Command, Counter, Expiry, ResponseFrame, Status};

/// A stored value with its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub value: Bytes,
    /// Opaque flag word stored alongside the value
    pub flags: u32,
    /// Compare-and-swap token, when the server reports one
    pub cas: Option<u64>,
}

/// Async memcached client
///
/// Cheap to clone; clones share the same connections. All I/O runs on the
/// client's event loop, never on the calling task.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: Arc<Config>,
    pool: ServerPool,
    // Must stay declared after `pool`: the loop stops when dropped.
    event_loop: parking_lot::Mutex<EventLoop>,
    closed: AtomicBool,
}

impl Client {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Connect to one server, or a comma-separated list of servers
    ///
    /// Sockets are opened lazily, on the first request to each server.
    pub fn connect(servers: impl AsRef<str>) -> Result<Self> {
        let config = Config::builder().server(servers).build()?;
        Self::with_config(config)
    }

    /// Create a client from a full configuration
    pub fn with_config(config: Config) -> Result<Self> {
        Self::with_router(config, HashRouter)
    }

    /// Create a client with a custom key-to-server routing policy
    pub fn with_router(config: Config, router: impl Router + 'static) -> Result<Self> {
        Self::build(config, Box::new(router), EventLoop::start()?)
    }

    /// Create a client whose connections run on an existing tokio runtime
    pub fn on_runtime(config: Config, runtime: Handle) -> Result<Self> {
        Self::build(config, Box::new(HashRouter), EventLoop::from_handle(runtime))
    }

    fn build(config: Config, router: Box<dyn Router>, event_loop: EventLoop) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let pool = ServerPool::new(Arc::clone(&config), router, event_loop.handle())?;

        tracing::info!(servers = pool.len(), "client created");
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                pool,
                event_loop: parking_lot::Mutex::new(event_loop),
                closed: AtomicBool::new(false),
            }),
        })
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Fetch a value; `None` on a miss
    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        Ok(self.get_item(key).await?.map(|item| item.value))
    }

    /// Fetch a value together with its flags and CAS token
    pub async fn get_item(&self, key: impl AsRef<[u8]>) -> Result<Option<Item>> {
        let key = self.key(key)?;
        let Some(frame) = hit_or_miss(self.execute(Command::Get { key }).await?)? else {
            return Ok(None);
        };

        let flags = frame.flags().ok_or_else(|| {
            McError::Protocol(format!(
                "get response carries {} extras bytes, expected 4",
                frame.extras.len()
            ))
        })?;
        Ok(Some(Item {
            flags,
            cas: frame.cas(),
            value: frame.value,
        }))
    }

    /// Store a value unconditionally
    pub async fn set(
        &self,
        key: impl AsRef<[u8]>,
        value: impl Into<Bytes>,
        expiry: impl Into<Expiry>,
    ) -> Result<()> {
        self.set_with_flags(key, value, 0, expiry).await
    }

    /// Store a value with a caller-defined flag word
    pub async fn set_with_flags(
        &self,
        key: impl AsRef<[u8]>,
        value: impl Into<Bytes>,
        flags: u32,
        expiry: impl Into<Expiry>,
    ) -> Result<()> {
        let key = self.key(key)?;
        let value = value.into();
        if value.len() > self.inner.config.max_value_size {
            return Err(McError::InvalidArgument(format!(
                "value of {} bytes exceeds the {} byte limit",
                value.len(),
                self.inner.config.max_value_size
            )));
        }

        let frame = self
            .execute(Command::Set {
                key,
                value,
                flags,
                expiry: expiry.into(),
            })
            .await?;
        match frame.status {
            Status::NoError => Ok(()),
            status => Err(McError::Server(status)),
        }
    }

    /// Add `delta` to a numeric value (wrapping at 2^64); `None` if the key
    /// does not exist
    pub async fn increment(&self, key: impl AsRef<[u8]>, delta: u64) -> Result<Option<u64>> {
        let counter = self.counter(key, delta, None)?;
        self.counter_op(Command::Increment(counter)).await
    }

    /// Subtract `delta` from a numeric value (stopping at 0); `None` if the
    /// key does not exist
    pub async fn decrement(&self, key: impl AsRef<[u8]>, delta: u64) -> Result<Option<u64>> {
        let counter = self.counter(key, delta, None)?;
        self.counter_op(Command::Decrement(counter)).await
    }

    /// Like `increment`, but a missing key is created holding `initial`
    pub async fn increment_with_initial(
        &self,
        key: impl AsRef<[u8]>,
        delta: u64,
        initial: u64,
        expiry: impl Into<Expiry>,
    ) -> Result<u64> {
        let counter = self.counter(key, delta, Some((initial, expiry.into())))?;
        self.counter_op(Command::Increment(counter))
            .await?
            .ok_or(McError::Server(Status::KeyNotFound))
    }

    /// Like `decrement`, but a missing key is created holding `initial`
    pub async fn decrement_with_initial(
        &self,
        key: impl AsRef<[u8]>,
        delta: u64,
        initial: u64,
        expiry: impl Into<Expiry>,
    ) -> Result<u64> {
        let counter = self.counter(key, delta, Some((initial, expiry.into())))?;
        self.counter_op(Command::Decrement(counter))
            .await?
            .ok_or(McError::Server(Status::KeyNotFound))
    }

    /// Remove a key; `false` if it did not exist
    pub async fn delete(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let key = self.key(key)?;
        Ok(hit_or_miss(self.execute(Command::Delete { key }).await?)?.is_some())
    }

    /// Drain every connection and stop the event loop
    ///
    /// Requests still unanswered fail with `ClientClosed`, as does every
    /// operation issued afterwards. Closing twice is harmless.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("closing client");

        self.inner.pool.close().await;
        self.inner.event_loop.lock().shutdown();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Number of configured servers
    pub fn server_count(&self) -> usize {
        self.inner.pool.len()
    }

    /// Index of the server a key is routed to
    pub fn server_for_key(&self, key: impl AsRef<[u8]>) -> usize {
        self.inner.pool.route(key.as_ref())
    }

    /// Connection state of every server, in configuration order
    pub fn server_states(&self) -> Vec<(ServerAddr, ConnectionState)> {
        self.inner.pool.states()
    }

    /// Observe state transitions of server `index`
    pub fn watch_state(&self, index: usize) -> Option<watch::Receiver<ConnectionState>> {
        self.inner.pool.subscribe(index)
    }

    /// Per-connection counters, in configuration order
    pub fn server_stats(&self) -> Vec<(ServerAddr, ConnectionStats)> {
        self.inner.pool.stats()
    }

    /// Runtime that drives this client's I/O
    pub fn runtime(&self) -> Handle {
        self.inner.event_loop.lock().handle().clone()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn execute(&self, command: Command) -> Result<ResponseFrame> {
        if self.is_closed() {
            return Err(McError::ClientClosed);
        }
        let response = self.inner.pool.dispatch(command)?;
        // A dropped completion means the connection task is gone.
        response.await.map_err(|_| McError::ClientClosed)?
    }

    async fn counter_op(&self, command: Command) -> Result<Option<u64>> {
        match hit_or_miss(self.execute(command).await?)? {
            Some(frame) => frame.counter_value().map(Some),
            None => Ok(None),
        }
    }

    fn counter(
        &self,
        key: impl AsRef<[u8]>,
        delta: u64,
        initial: Option<(u64, Expiry)>,
    ) -> Result<Counter> {
        Ok(Counter {
            key: self.key(key)?,
            delta,
            initial,
        })
    }

    fn key(&self, key: impl AsRef<[u8]>) -> Result<Bytes> {
        let key = key.as_ref();
        if key.is_empty() || key.len() > MAX_KEY_LENGTH {
            return Err(McError::InvalidArgument(format!(
                "key length {} is outside 1..={}",
                key.len(),
                MAX_KEY_LENGTH
            )));
        }
        Ok(Bytes::copy_from_slice(key))
    }
}

/// Split a response into hit, miss, or server error
fn hit_or_miss(frame: ResponseFrame) -> Result<Option<ResponseFrame>> {
    match frame.status {
        Status::NoError => Ok(Some(frame)),
        Status::KeyNotFound => Ok(None),
        status => Err(McError::Server(status)),
    }
}
