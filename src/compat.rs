//! Callback-style API
//!
//! For callers built around `(err, value)` callbacks rather than futures.
//! Errors are flattened to strings: a miss is reported as `"Not found"` and
//! an expired deadline as `"operation timeout"`. Callbacks run on the
//! client's event loop thread and must not block it.

use bytes::Bytes;
use tokio::runtime::Handle;

use crate::client::Client;
use crate::error::{McError, Result};
use crate::protocol::Expiry;

/// Error text reported for a missing key
pub const NOT_FOUND: &str = "Not found";

/// Wraps a `Client` with a callback interface
#[derive(Debug, Clone)]
pub struct CallbackClient {
    client: Client,
    runtime: Handle,
}

impl CallbackClient {
    pub fn new(client: Client) -> Self {
        let runtime = client.runtime();
        Self { client, runtime }
    }

    /// Connect to one server or a comma-separated list
    pub fn connect(servers: impl AsRef<str>) -> Result<Self> {
        Ok(Self::new(Client::connect(servers)?))
    }

    /// The underlying async client
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn get<F>(&self, key: impl AsRef<[u8]>, cb: F)
    where
        F: FnOnce(Option<String>, Option<Bytes>) + Send + 'static,
    {
        let client = self.client.clone();
        let key = Bytes::copy_from_slice(key.as_ref());
        self.runtime.spawn(async move {
            complete(client.get(key).await, cb);
        });
    }

    /// Store a value; `expiry` is in seconds, 0 meaning never
    pub fn set<F>(&self, key: impl AsRef<[u8]>, value: impl Into<Bytes>, expiry: u32, cb: F)
    where
        F: FnOnce(Option<String>, Option<()>) + Send + 'static,
    {
        let client = self.client.clone();
        let key = Bytes::copy_from_slice(key.as_ref());
        let value = value.into();
        self.runtime.spawn(async move {
            let result = client.set(key, value, Expiry::from(expiry)).await;
            complete(result.map(Some), cb);
        });
    }

    pub fn increment<F>(&self, key: impl AsRef<[u8]>, delta: u64, cb: F)
    where
        F: FnOnce(Option<String>, Option<u64>) + Send + 'static,
    {
        let client = self.client.clone();
        let key = Bytes::copy_from_slice(key.as_ref());
        self.runtime.spawn(async move {
            complete(client.increment(key, delta).await, cb);
        });
    }

    pub fn decrement<F>(&self, key: impl AsRef<[u8]>, delta: u64, cb: F)
    where
        F: FnOnce(Option<String>, Option<u64>) + Send + 'static,
    {
        let client = self.client.clone();
        let key = Bytes::copy_from_slice(key.as_ref());
        self.runtime.spawn(async move {
            complete(client.decrement(key, delta).await, cb);
        });
    }

    pub fn delete<F>(&self, key: impl AsRef<[u8]>, cb: F)
    where
        F: FnOnce(Option<String>, Option<()>) + Send + 'static,
    {
        let client = self.client.clone();
        let key = Bytes::copy_from_slice(key.as_ref());
        self.runtime.spawn(async move {
            let result = client.delete(key).await;
            complete(result.map(|deleted| deleted.then_some(())), cb);
        });
    }

    /// Close the client, then invoke `cb`
    pub fn close<F>(&self, cb: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let client = self.client.clone();
        self.runtime.spawn(async move {
            // No await after close(): the loop only stops once this task yields.
            client.close().await;
            cb();
        });
    }
}

/// Render an error the way callback callers expect to see it
pub fn error_text(error: &McError) -> String {
    match error {
        McError::Server(status) => status.as_str().to_string(),
        other => other.to_string(),
    }
}

fn complete<T, F>(result: Result<Option<T>>, cb: F)
where
    F: FnOnce(Option<String>, Option<T>),
{
    match result {
        Ok(Some(value)) => cb(None, Some(value)),
        Ok(None) => cb(Some(NOT_FOUND.to_string()), None),
        Err(e) => cb(Some(error_text(&e)), None),
    }
}
