//! Event Loop
//!
//! All socket I/O and timers of a client run on one single-threaded tokio
//! runtime. By default the client starts its own on a dedicated thread; it can
//! also borrow a runtime the application already runs.

use std::thread;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;

use crate::error::Result;

const THREAD_NAME: &str = "atlasmc-io";

/// The runtime a client's connection tasks are spawned on
#[derive(Debug)]
pub struct EventLoop {
    handle: Handle,
    /// Present only when this loop owns its thread
    shutdown: Option<oneshot::Sender<()>>,
}

impl EventLoop {
    /// Start a current-thread runtime on a new thread
    pub fn start() -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .thread_name(THREAD_NAME)
            .build()?;
        let handle = runtime.handle().clone();
        let (shutdown, stopped) = oneshot::channel::<()>();

        thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                // Runs until shut down or until every EventLoop handle is gone;
                // dropping the runtime then cancels the remaining tasks.
                runtime.block_on(async {
                    let _ = stopped.await;
                });
                tracing::debug!("event loop stopped");
            })?;

        tracing::debug!("event loop started");
        Ok(Self {
            handle,
            shutdown: Some(shutdown),
        })
    }

    /// Use an existing runtime instead of starting one
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            shutdown: None,
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Whether this loop runs on its own thread
    pub fn is_owned(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Stop the owned runtime; tasks still running are cancelled
    pub fn shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
