//! Server Connection
//!
//! One task per server owns the socket, its buffers, and the request tracker.
//! The pool talks to it through a `ConnectionHandle` (an unbounded queue, so
//! callers never wait on socket backpressure).
//!
//! ## Lifecycle
//! ```text
//!                first use
//! ┌──────────────┐ ────────► ┌────────────┐  connected  ┌───────────┐
//! │ Disconnected │           │ Connecting │ ──────────► │ Connected │
//! └──────────────┘ ◄──┐      └─────┬──────┘             └─────┬─────┘
//!        ▲            │            │ error                    │ error / close
//!        │   backoff  │            ▼                          ▼
//!        │   elapsed  │      ┌──────────┐          ┌──────────────────┐
//!        │            └───── │  Failed  │ ◄─────── │ Failed/Draining  │
//!        │                   └──────────┘          └────────┬─────────┘
//!        └──────────────────────────────────────────────────┘ drained
//! ```
//!
//! - `Failed` fails every pending request with `ConnectionLost`, rejects new
//!   ones with `ConnectionUnavailable`, and waits a jittered exponential
//!   backoff before the next connect attempt.
//! - `Draining` flushes queued bytes, closes the socket and fails whatever is
//!   still unanswered with `ClientClosed`.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Interval, MissedTickBehavior};

use super::backoff::Backoff;
use crate::config::{Config, ServerAddr};
use crate::error::{McError, Result};
use crate::protocol::{decode_response, encode_command, Command, ResponseFrame};
use crate::tracker::{Completion, PendingRequest, RequestTracker};

/// Minimum free space kept in the inbound buffer before each read
const READ_RESERVE: usize = 16 * 1024;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Draining,
    Failed,
}

impl ConnectionState {
    /// Whether new requests are accepted in this state
    pub fn accepts_requests(&self) -> bool {
        !matches!(self, ConnectionState::Failed | ConnectionState::Draining)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Draining => "draining",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Counters kept per connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub requests_sent: u64,
    pub responses_matched: u64,
    pub timeouts: u64,
    pub cancelled: u64,
    /// Responses whose correlation id matched nothing
    pub discarded_frames: u64,
    pub connects: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

/// Messages from the handle to the connection task
enum Message {
    Dispatch {
        command: Command,
        completion: Completion,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Dispatch { command, .. } => write!(f, "Dispatch({:?})", command.opcode()),
            Message::Close { .. } => f.write_str("Close"),
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Cheap, cloneable handle to a connection task
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    addr: ServerAddr,
    tx: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<ConnectionState>,
    stats: Arc<Mutex<ConnectionStats>>,
}

impl ConnectionHandle {
    /// Spawn the connection task on `runtime`. No socket is opened until the
    /// first request arrives.
    pub fn spawn(addr: ServerAddr, config: Arc<Config>, runtime: &Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let stats = Arc::new(Mutex::new(ConnectionStats::default()));

        let task_addr = addr.clone();
        let task_stats = Arc::clone(&stats);
        runtime.spawn(async move {
            // The sweep timer must be created inside the runtime.
            Connection::new(task_addr, config, rx, state_tx, task_stats)
                .run()
                .await
        });

        Self {
            addr,
            tx,
            state,
            stats,
        }
    }

    /// Queue a command; the receiver resolves with the matching response
    ///
    /// Fails immediately with `InvalidArgument` for a command that does not
    /// fit a frame, with `ConnectionUnavailable` while the connection is
    /// `Failed` or `Draining`, and with `ClientClosed` once the task is gone.
    pub fn dispatch(&self, command: Command) -> Result<oneshot::Receiver<Result<ResponseFrame>>> {
        command.check_frame_limits()?;
        let state = self.state();
        if !state.accepts_requests() {
            return Err(self.unavailable(state));
        }

        let (completion, response) = oneshot::channel();
        self.tx
            .send(Message::Dispatch {
                command,
                completion,
            })
            .map_err(|_| McError::ClientClosed)?;
        Ok(response)
    }

    /// Drain and close the connection, waiting until it is done
    pub async fn close(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Message::Close { done }).is_ok() {
            let _ = wait.await;
        }
    }

    pub fn addr(&self) -> &ServerAddr {
        &self.addr
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Snapshot of the connection's counters
    pub fn stats(&self) -> ConnectionStats {
        self.stats.lock().clone()
    }

    fn unavailable(&self, state: ConnectionState) -> McError {
        McError::ConnectionUnavailable {
            server: self.addr.to_string(),
            state: state.to_string(),
        }
    }
}

// =============================================================================
// Connection Task
// =============================================================================

/// Why the task stopped serving a socket
enum Exit {
    /// Close requested (or every handle dropped); the task ends
    Closed,
    /// Transport or protocol failure; the task backs off and reconnects
    Failed(McError),
}

struct Connection {
    addr: ServerAddr,
    config: Arc<Config>,
    rx: mpsc::UnboundedReceiver<Message>,
    state_tx: watch::Sender<ConnectionState>,
    stats: Arc<Mutex<ConnectionStats>>,
    tracker: RequestTracker,
    /// Bytes read but not yet decoded (may hold a partial frame)
    inbound: BytesMut,
    /// Encoded requests not yet written
    outbound: BytesMut,
    backoff: Backoff,
    sweep: Interval,
}

impl Connection {
    fn new(
        addr: ServerAddr,
        config: Arc<Config>,
        rx: mpsc::UnboundedReceiver<Message>,
        state_tx: watch::Sender<ConnectionState>,
        stats: Arc<Mutex<ConnectionStats>>,
    ) -> Self {
        let mut sweep = time::interval_at(
            time::Instant::now() + config.sweep_interval,
            config.sweep_interval,
        );
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Self {
            backoff: Backoff::new(config.reconnect_backoff_initial, config.reconnect_backoff_max),
            addr,
            config,
            rx,
            state_tx,
            stats,
            tracker: RequestTracker::new(),
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            sweep,
        }
    }

    async fn run(mut self) {
        // Stay disconnected until the first request (or a close) arrives.
        match self.rx.recv().await {
            Some(Message::Dispatch {
                command,
                completion,
            }) => self.enqueue(command, completion),
            Some(Message::Close { done }) => {
                self.finish(Some(done));
                return;
            }
            None => return,
        }

        loop {
            let exit = match self.connect().await {
                Ok(Some(stream)) => self.serve(stream).await,
                Ok(None) => Exit::Closed,
                Err(e) => Exit::Failed(e),
            };

            match exit {
                Exit::Closed => return,
                Exit::Failed(error) => self.fail(error),
            }

            if !self.back_off().await {
                return;
            }
            self.set_state(ConnectionState::Disconnected);
        }
    }

    // -------------------------------------------------------------------------
    // Phases
    // -------------------------------------------------------------------------

    /// Open the socket, queueing requests meanwhile. `Ok(None)` means the
    /// connection was closed while connecting; queued bytes are still flushed
    /// if the socket comes up.
    async fn connect(&mut self) -> Result<Option<TcpStream>> {
        self.set_state(ConnectionState::Connecting);

        let host = self.addr.host().to_string();
        let port = self.addr.port();
        let attempt = time::timeout(self.config.connect_timeout, TcpStream::connect((host, port)));
        tokio::pin!(attempt);

        let mut closing: Option<oneshot::Sender<()>> = None;
        let connected = loop {
            tokio::select! {
                res = &mut attempt => break match res {
                    Ok(Ok(stream)) => Ok(stream),
                    Ok(Err(e)) => Err(McError::Io(e)),
                    Err(_) => Err(McError::ConnectionLost {
                        server: self.addr.to_string(),
                        reason: format!("connect timed out after {:?}", self.config.connect_timeout),
                    }),
                },
                msg = self.rx.recv(), if closing.is_none() => match msg {
                    Some(Message::Dispatch { command, completion }) => self.enqueue(command, completion),
                    Some(Message::Close { done }) => {
                        self.set_state(ConnectionState::Draining);
                        self.reject_queued();
                        closing = Some(done);
                    }
                    None => {
                        self.finish(None);
                        return Ok(None);
                    }
                },
                _ = self.sweep.tick() => self.sweep_pending(),
            }
        };

        if let Some(done) = closing {
            if let Ok(mut stream) = connected {
                let (_, mut writer) = stream.split();
                self.drain(&mut writer).await;
            }
            self.finish(Some(done));
            return Ok(None);
        }

        let stream = connected?;
        if self.config.tcp_nodelay {
            stream.set_nodelay(true)?;
        }

        self.backoff.reset();
        self.stats.lock().connects += 1;
        tracing::debug!(server = %self.addr, "connected");
        self.set_state(ConnectionState::Connected);
        Ok(Some(stream))
    }

    /// Pump requests out and responses in until the socket fails or a close
    /// is requested
    async fn serve(&mut self, mut stream: TcpStream) -> Exit {
        let (mut reader, mut writer) = stream.split();

        loop {
            if self.inbound.capacity() - self.inbound.len() < READ_RESERVE {
                self.inbound.reserve(READ_RESERVE);
            }

            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(Message::Dispatch { command, completion }) => {
                        self.enqueue(command, completion);
                        // Batch whatever else is already queued into one write.
                        while let Ok(next) = self.rx.try_recv() {
                            match next {
                                Message::Dispatch { command, completion } => {
                                    self.enqueue(command, completion)
                                }
                                Message::Close { done } => {
                                    self.drain(&mut writer).await;
                                    self.finish(Some(done));
                                    return Exit::Closed;
                                }
                            }
                        }
                    }
                    Some(Message::Close { done }) => {
                        self.drain(&mut writer).await;
                        self.finish(Some(done));
                        return Exit::Closed;
                    }
                    None => {
                        self.drain(&mut writer).await;
                        self.finish(None);
                        return Exit::Closed;
                    }
                },
                res = reader.read_buf(&mut self.inbound) => match res {
                    Ok(0) => {
                        return Exit::Failed(McError::ConnectionLost {
                            server: self.addr.to_string(),
                            reason: "closed by server".to_string(),
                        })
                    }
                    Ok(n) => {
                        tracing::trace!(server = %self.addr, bytes = n, "read");
                        if let Err(e) = self.process_inbound() {
                            return Exit::Failed(e);
                        }
                    }
                    Err(e) => return Exit::Failed(McError::Io(e)),
                },
                res = writer.write_buf(&mut self.outbound), if !self.outbound.is_empty() => match res {
                    Ok(0) => {
                        return Exit::Failed(McError::ConnectionLost {
                            server: self.addr.to_string(),
                            reason: "socket refused further writes".to_string(),
                        })
                    }
                    Ok(n) => tracing::trace!(server = %self.addr, bytes = n, "wrote"),
                    Err(e) => return Exit::Failed(McError::Io(e)),
                },
                _ = self.sweep.tick() => self.sweep_pending(),
            }
        }
    }

    /// Wait out the reconnect delay, rejecting requests meanwhile.
    /// Returns false if the connection was closed instead.
    async fn back_off(&mut self) -> bool {
        let delay = self.backoff.next_delay();
        tracing::warn!(
            server = %self.addr,
            attempt = self.backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        let sleep = time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                msg = self.rx.recv() => match msg {
                    Some(Message::Dispatch { completion, .. }) => {
                        let _ = completion.send(Err(McError::ConnectionUnavailable {
                            server: self.addr.to_string(),
                            state: ConnectionState::Failed.to_string(),
                        }));
                    }
                    Some(Message::Close { done }) => {
                        self.finish(Some(done));
                        return false;
                    }
                    None => {
                        self.finish(None);
                        return false;
                    }
                },
            }
        }
    }

    /// Best-effort flush of queued bytes before closing
    async fn drain<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) {
        self.set_state(ConnectionState::Draining);
        self.reject_queued();

        let limit = self.config.connect_timeout;
        let outbound = &mut self.outbound;
        let flush = async {
            writer.write_all_buf(outbound).await?;
            writer.shutdown().await
        };
        match time::timeout(limit, flush).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(server = %self.addr, error = %e, "flush on close failed"),
            Err(_) => tracing::debug!(server = %self.addr, "flush on close timed out"),
        }
    }

    /// Release everything and settle in `Disconnected`
    fn finish(&mut self, done: Option<oneshot::Sender<()>>) {
        self.set_state(ConnectionState::Draining);
        self.reject_queued();

        let failed = self.tracker.fail_all(|| McError::ClientClosed);
        if failed > 0 {
            tracing::debug!(server = %self.addr, failed, "failed unanswered requests on close");
        }
        self.inbound.clear();
        self.outbound.clear();

        self.set_state(ConnectionState::Disconnected);
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    // -------------------------------------------------------------------------
    // Request Bookkeeping
    // -------------------------------------------------------------------------

    fn enqueue(&mut self, command: Command, completion: Completion) {
        let opaque = match self.tracker.allocate() {
            Ok(opaque) => opaque,
            Err(e) => {
                tracing::error!(server = %self.addr, error = %e, "cannot allocate correlation id");
                let _ = completion.send(Err(e));
                return;
            }
        };

        encode_command(&command, opaque, &mut self.outbound);
        let deadline = self.config.request_timeout.map(|t| Instant::now() + t);
        self.tracker
            .insert(opaque, PendingRequest::new(command.opcode(), deadline, completion));
        self.stats.lock().requests_sent += 1;

        tracing::trace!(server = %self.addr, opaque, opcode = ?command.opcode(), "queued");
    }

    /// Decode and route every complete frame in the inbound buffer
    fn process_inbound(&mut self) -> Result<()> {
        while let Some(frame) = decode_response(&mut self.inbound, self.config.max_body_size)? {
            let opaque = frame.opaque;
            if self.tracker.complete(frame)? {
                self.stats.lock().responses_matched += 1;
            } else {
                tracing::warn!(server = %self.addr, opaque, "discarding response with unknown correlation id");
                self.stats.lock().discarded_frames += 1;
            }
        }
        Ok(())
    }

    fn sweep_pending(&mut self) {
        if self.tracker.is_empty() {
            return;
        }
        let result = self.tracker.sweep(Instant::now());
        if result.timed_out > 0 || result.cancelled > 0 {
            tracing::debug!(
                server = %self.addr,
                timed_out = result.timed_out,
                cancelled = result.cancelled,
                "swept pending requests"
            );
            let mut stats = self.stats.lock();
            stats.timeouts += result.timed_out as u64;
            stats.cancelled += result.cancelled as u64;
        }
    }

    /// Answer anything still sitting in the queue with `ClientClosed`
    fn reject_queued(&mut self) {
        self.rx.close();
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                Message::Dispatch { completion, .. } => {
                    let _ = completion.send(Err(McError::ClientClosed));
                }
                Message::Close { done } => {
                    let _ = done.send(());
                }
            }
        }
    }

    /// Enter `Failed`: drop buffers and fail every pending request
    fn fail(&mut self, error: McError) {
        self.set_state(ConnectionState::Failed);
        self.inbound.clear();
        self.outbound.clear();

        let server = self.addr.to_string();
        let failed = match &error {
            McError::Protocol(reason) => {
                tracing::error!(server = %server, error = %reason, "protocol violation, closing connection");
                self.tracker.fail_all(|| McError::Protocol(reason.clone()))
            }
            other => {
                let reason = match other {
                    McError::ConnectionLost { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                tracing::warn!(server = %server, error = %reason, "connection failed");
                self.tracker.fail_all(|| McError::ConnectionLost {
                    server: server.clone(),
                    reason: reason.clone(),
                })
            }
        };

        let mut stats = self.stats.lock();
        stats.failures += 1;
        stats.last_error = Some(error.to_string());
        drop(stats);

        if failed > 0 {
            tracing::debug!(server = %self.addr, failed, "failed pending requests");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(server = %self.addr, from = %previous, to = %state, "state transition");
        }
    }
}
