//! Connection management for ESL
//!
//! One reader task per socket decodes frames and routes them: replies to the
//! reply queue, events to the listener registry. Callers write commands through
//! a shared writer lock and wait on their own reply slot, so any number of
//! tasks can use one [`Connection`] at once.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use futures_util::{FutureExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    codec::FrameCodec,
    command::{self, Command, CommandFrame},
    constants::{
        DEFAULT_AUTH_TIMEOUT_MS, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS,
        DEFAULT_EXIT_TIMEOUT_MS, MAX_EVENT_QUEUE_SIZE,
    },
    correlator::Correlator,
    error::{EslError, EslResult},
    event::{EslEvent, EventFormat},
    frame::Frame,
    protocol::{is_linger_notice, MessageType},
    registry::{ListenerId, ListenerScope, Registry},
    response::RawResponse,
};

/// Which side opened the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// We dialed the switch's event socket and authenticated.
    Outbound,
    /// The switch dialed us for one call leg.
    Inbound,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Outbound => write!(f, "outbound"),
            Topology::Inbound => write!(f, "inbound"),
        }
    }
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionState {
    /// Socket open, handshake not started.
    Connecting,
    /// Waiting for the switch to accept our password.
    Authenticating,
    /// Commands may be sent.
    Ready,
    /// Teardown in progress; new commands are refused.
    Closing,
    /// Terminal.
    Closed(DisconnectReason),
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Server sent a text/disconnect-notice with Content-Disposition: disconnect
    ServerNotice,
    /// TCP I/O error (io::Error is not Clone, so we store the message)
    IoError(String),
    /// The inbound byte stream could not be decoded
    ProtocolError(String),
    /// Clean EOF on the TCP connection
    ConnectionClosed,
    /// Client called close() or exit_and_close()
    ClientRequested,
    /// A write was abandoned halfway, leaving the stream unusable
    WriteCancelled,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ServerNotice => write!(f, "server sent disconnect notice"),
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ProtocolError(msg) => write!(f, "protocol error: {}", msg),
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
            DisconnectReason::ClientRequested => write!(f, "client requested disconnect"),
            DisconnectReason::WriteCancelled => write!(f, "write cancelled mid-command"),
        }
    }
}

/// Options for ESL connection configuration.
///
/// Use [`Default::default()`] for standard settings.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// TCP connect, and the `connect` exchange on inbound sockets. Default: 5s.
    pub connect_timeout: Duration,
    /// Wait for `auth/request` and for the reply to `auth`. Default: 5s.
    pub auth_timeout: Duration,
    /// Bound on each `send_command`, write and reply together. `None` waits
    /// forever. Default: 5s.
    pub command_timeout: Option<Duration>,
    /// Bound on the `exit` sent by `exit_and_close`. Default: 5s.
    pub exit_timeout: Duration,
    /// Capacity of each listener's event queue. Default: 1000.
    pub event_queue_size: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            auth_timeout: Duration::from_millis(DEFAULT_AUTH_TIMEOUT_MS),
            command_timeout: Some(Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS)),
            exit_timeout: Duration::from_millis(DEFAULT_EXIT_TIMEOUT_MS),
            event_queue_size: MAX_EVENT_QUEUE_SIZE,
        }
    }
}

/// Called once with the reason when the connection closes.
pub type DisconnectHook = Box<dyn FnOnce(DisconnectReason) + Send>;

fn timeout_error(limit: Duration) -> EslError {
    EslError::Timeout {
        timeout_ms: limit.as_millis() as u64,
    }
}

/// Resolves at the deadline, or never when there is none.
async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Write all of `buf`, keeping `written` current so an abandoned write can
/// tell how much of the command reached the socket.
async fn write_counted(
    writer: &mut OwnedWriteHalf,
    buf: &[u8],
    written: &mut usize,
) -> io::Result<()> {
    while *written < buf.len() {
        let n = writer
            .write(&buf[*written..])
            .await?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        *written += n;
    }
    writer
        .flush()
        .await
}

enum WriteOutcome {
    Written(io::Result<()>),
    Cancelled,
    TimedOut,
    Closed,
}

/// State shared between connection handles and the reader task
struct Inner {
    topology: Topology,
    options: ConnectOptions,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    correlator: Arc<Correlator>,
    registry: Registry,
    state_tx: watch::Sender<ConnectionState>,
    /// Fired once the connection starts closing; stops the reader and any write in progress.
    closing: CancellationToken,
    auth_request: Notify,
    exit_requested: AtomicBool,
    on_disconnect: StdMutex<Option<DisconnectHook>>,
    peer: Option<SocketAddr>,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        self.state_tx
            .borrow()
            .clone()
    }

    fn check_sendable(&self, handshake: bool) -> EslResult<()> {
        match &*self
            .state_tx
            .borrow()
        {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Connecting | ConnectionState::Authenticating if handshake => Ok(()),
            ConnectionState::Connecting | ConnectionState::Authenticating => {
                Err(EslError::NotReady)
            }
            ConnectionState::Closing | ConnectionState::Closed(_) => {
                Err(EslError::ConnectionClosed)
            }
        }
    }

    /// Tear the connection down. Only the first call has any effect.
    fn mark_closed(&self, reason: DisconnectReason) {
        let mut first = false;
        self.state_tx
            .send_if_modified(|state| {
                if matches!(state, ConnectionState::Closing | ConnectionState::Closed(_)) {
                    return false;
                }
                *state = ConnectionState::Closing;
                first = true;
                true
            });
        if !first {
            return;
        }

        info!("Connection closing: {}", reason);
        self.closing
            .cancel();
        self.correlator
            .close();
        self.registry
            .clear();

        let hook = self
            .on_disconnect
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(hook) = hook {
            hook(reason.clone());
        }
        self.state_tx
            .send_replace(ConnectionState::Closed(reason));

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let writer = Arc::clone(&self.writer);
            let limit = self
                .options
                .exit_timeout;
            handle.spawn(async move {
                let shutdown = async {
                    writer
                        .lock()
                        .await
                        .shutdown()
                        .await
                };
                if let Ok(Err(e)) = timeout(limit, shutdown).await {
                    trace!("writer shutdown: {}", e);
                }
            });
        }
    }

    /// The remote end hung up; that is expected once we asked it to.
    fn remote_closed(&self, reason: DisconnectReason) -> DisconnectReason {
        if self
            .exit_requested
            .load(Ordering::Acquire)
        {
            DisconnectReason::ClientRequested
        } else {
            reason
        }
    }

    /// Route one decoded frame. An `Err` means the connection must close.
    fn route(&self, frame: Frame) -> Result<(), DisconnectReason> {
        match MessageType::classify(&frame) {
            MessageType::Event => match EslEvent::from_frame(&frame) {
                Ok(event) => {
                    trace!("event {:?} received", event.event_name());
                    self.registry
                        .dispatch(event);
                }
                Err(e) => warn!("Failed to parse event: {}", e),
            },
            MessageType::Disconnect => {
                if is_linger_notice(&frame) {
                    debug!("Received disconnect notice with linger disposition, ignoring");
                } else {
                    info!("Received disconnect notice from server");
                    return Err(self.remote_closed(DisconnectReason::ServerNotice));
                }
            }
            MessageType::AuthRequest => {
                debug!("Received auth/request");
                self.auth_request
                    .notify_one();
            }
            reply @ (MessageType::CommandReply
            | MessageType::ApiResponse
            | MessageType::Unknown(_)) => {
                trace!("{:?} routed to oldest pending command", reply);
                self.correlator
                    .fulfill(RawResponse::from_frame(frame));
            }
        }
        Ok(())
    }

    async fn send_frame(
        &self,
        frame: CommandFrame,
        cancel: &CancellationToken,
        limit: Option<Duration>,
        handshake: bool,
    ) -> EslResult<RawResponse> {
        let deadline = limit.map(|d| Instant::now() + d);
        let timed_out = || limit.map_or(EslError::Cancelled, timeout_error);

        let wire = frame.to_wire()?;
        self.check_sendable(handshake)?;
        debug!("Sending command: {}", frame.loggable_line());

        let mut writer = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = cancel.cancelled() => return Err(EslError::Cancelled),
            _ = self.closing.cancelled() => return Err(EslError::ConnectionClosed),
            _ = expire(deadline) => return Err(timed_out()),
        };
        // State may have moved while we queued for the lock.
        self.check_sendable(handshake)?;
        // Nothing queued or written yet.
        if cancel.is_cancelled() {
            return Err(EslError::Cancelled);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(timed_out());
        }
        let pending = self
            .correlator
            .push()?;

        let bytes = wire.as_bytes();
        let mut written = 0;
        let outcome = tokio::select! {
            biased;
            result = write_counted(&mut writer, bytes, &mut written) => WriteOutcome::Written(result),
            _ = self.closing.cancelled() => WriteOutcome::Closed,
            _ = cancel.cancelled() => WriteOutcome::Cancelled,
            _ = expire(deadline) => WriteOutcome::TimedOut,
        };
        drop(writer);

        let abandoned = match outcome {
            WriteOutcome::Written(Ok(())) => None,
            WriteOutcome::Written(Err(e)) => {
                warn!("Write error: {}", e);
                pending.retract();
                self.mark_closed(DisconnectReason::IoError(e.to_string()));
                return Err(EslError::ConnectionClosed);
            }
            WriteOutcome::Cancelled => Some(EslError::Cancelled),
            WriteOutcome::TimedOut => Some(timed_out()),
            WriteOutcome::Closed => return Err(EslError::ConnectionClosed),
        };
        if let Some(err) = abandoned {
            if written == 0 {
                pending.retract();
            } else if written < bytes.len() {
                // A partial command on the wire garbles the next one.
                drop(pending);
                self.mark_closed(DisconnectReason::WriteCancelled);
            }
            // A complete command keeps its slot as a tombstone for the reply.
            return Err(err);
        }

        let mut pending = pending;
        let slot = pending.id();
        let result = tokio::select! {
            biased;
            reply = pending.wait() => reply,
            _ = cancel.cancelled() => {
                debug!(
                    "{} (slot {}) cancelled while awaiting its reply",
                    frame.name(),
                    slot
                );
                Err(EslError::Cancelled)
            }
            _ = expire(deadline) => {
                warn!(
                    "{} (slot {}) timed out awaiting its reply",
                    frame.name(),
                    slot
                );
                Err(timed_out())
            }
        };
        if let Ok(response) = &result {
            debug!(
                "Received reply to {}: {:?}",
                frame.name(),
                response.reply_status()
            );
        }
        result
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.mark_closed(DisconnectReason::ClientRequested);
    }
}

async fn reader_loop(inner: Weak<Inner>, reader: OwnedReadHalf, closing: CancellationToken) {
    let weak = inner.clone();
    let result = AssertUnwindSafe(reader_loop_inner(inner, reader, closing))
        .catch_unwind()
        .await;
    if result.is_err() {
        error!("reader task panicked");
        if let Some(inner) = weak.upgrade() {
            inner.mark_closed(DisconnectReason::IoError(
                "reader task panicked".to_string(),
            ));
        }
    }
}

async fn reader_loop_inner(weak: Weak<Inner>, reader: OwnedReadHalf, closing: CancellationToken) {
    let mut frames = FramedRead::new(reader, FrameCodec::new());

    let (inner, reason) = loop {
        let next = tokio::select! {
            _ = closing.cancelled() => {
                trace!("reader stopping, connection closing");
                return;
            }
            next = frames.next() => next,
        };
        let Some(inner) = weak.upgrade() else {
            return;
        };

        match next {
            None => {
                info!("Connection closed (EOF)");
                let reason = inner.remote_closed(DisconnectReason::ConnectionClosed);
                break (inner, reason);
            }
            Some(Err(EslError::Io(e))) => {
                warn!("Read error: {}", e);
                break (inner, DisconnectReason::IoError(e.to_string()));
            }
            Some(Err(e)) => {
                warn!("Parser error: {}", e);
                break (inner, DisconnectReason::ProtocolError(e.to_string()));
            }
            Some(Ok(frame)) => {
                if let Err(reason) = inner.route(frame) {
                    break (inner, reason);
                }
            }
        }
    };
    inner.mark_closed(reason);
}

/// ESL connection handle (Clone + Send + Sync)
///
/// Every clone drives the same socket. Commands from different tasks are
/// written one at a time and each caller gets back the reply to its own
/// command. The socket closes when the last handle is dropped, or earlier
/// through [`close`](Self::close) or [`exit_and_close`](Self::exit_and_close).
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("topology", &self.inner.topology)
            .field("state", &self.inner.state())
            .field("peer", &self.inner.peer)
            .field("pending", &self.inner.correlator.len())
            .field("listeners", &self.inner.registry.len())
            .finish()
    }
}

impl Connection {
    /// Wrap an open socket and start its reader task.
    pub(crate) fn start(
        stream: TcpStream,
        topology: Topology,
        options: ConnectOptions,
        initial: ConnectionState,
        on_disconnect: Option<DisconnectHook>,
    ) -> Self {
        let peer = stream
            .peer_addr()
            .ok();
        let (read_half, write_half) = stream.into_split();
        let (state_tx, _) = watch::channel(initial);
        let closing = CancellationToken::new();
        let runtime = Handle::current();

        let inner = Arc::new(Inner {
            topology,
            registry: Registry::new(options.event_queue_size, runtime.clone()),
            options,
            writer: Arc::new(Mutex::new(write_half)),
            correlator: Correlator::new(),
            state_tx,
            closing: closing.clone(),
            auth_request: Notify::new(),
            exit_requested: AtomicBool::new(false),
            on_disconnect: StdMutex::new(on_disconnect),
            peer,
        });

        runtime.spawn(reader_loop(Arc::downgrade(&inner), read_half, closing));
        debug!("{} connection to {:?} started", topology, peer);

        Self { inner }
    }

    pub(crate) fn options(&self) -> &ConnectOptions {
        &self.inner.options
    }

    /// Move from a handshake state to `Ready`.
    pub(crate) fn set_ready(&self) -> EslResult<()> {
        let mut moved = false;
        self.inner
            .state_tx
            .send_if_modified(|state| match state {
                ConnectionState::Connecting | ConnectionState::Authenticating => {
                    *state = ConnectionState::Ready;
                    moved = true;
                    true
                }
                _ => false,
            });
        if moved {
            Ok(())
        } else {
            Err(EslError::ConnectionClosed)
        }
    }

    pub(crate) fn set_authenticating(&self) {
        self.inner
            .state_tx
            .send_if_modified(|state| {
                if *state == ConnectionState::Connecting {
                    *state = ConnectionState::Authenticating;
                    true
                } else {
                    false
                }
            });
    }

    /// Wait for the switch's `auth/request`. `false` if the connection closed first.
    pub(crate) async fn auth_requested(&self) -> bool {
        tokio::select! {
            _ = self.inner.auth_request.notified() => true,
            _ = self.inner.closing.cancelled() => false,
        }
    }

    /// Send a command before the connection is `Ready`.
    pub(crate) async fn send_handshake<C: Command + ?Sized>(
        &self,
        command: &C,
        limit: Duration,
    ) -> EslResult<RawResponse> {
        let frame = command.render()?;
        self.inner
            .send_frame(frame, &CancellationToken::new(), Some(limit), true)
            .await
    }

    pub(crate) fn close_with(&self, reason: DisconnectReason) {
        self.inner
            .mark_closed(reason);
    }

    /// Send a command and wait for its reply.
    ///
    /// The reply comes back whatever its status; use
    /// [`RawResponse::into_result`] to turn `-ERR` into an error. Dropping
    /// the returned future after the command was written leaves its reply
    /// slot in place, so later commands still get their own replies.
    pub async fn send_command<C: Command + ?Sized>(&self, command: &C) -> EslResult<RawResponse> {
        self.send_command_cancellable(command, &CancellationToken::new())
            .await
    }

    /// [`send_command`](Self::send_command) that gives up when `cancel` fires.
    ///
    /// Cancelling while the command is being written closes the connection,
    /// since a partial command may be on the wire.
    pub async fn send_command_cancellable<C: Command + ?Sized>(
        &self,
        command: &C,
        cancel: &CancellationToken,
    ) -> EslResult<RawResponse> {
        let frame = command.render()?;
        self.inner
            .send_frame(frame, cancel, self.inner.options.command_timeout, false)
            .await
    }

    /// Receive events in `scope` on a dedicated task.
    ///
    /// The task runs on the runtime the connection was opened on, so this can
    /// be called from any thread. The callback must not block; events beyond
    /// the queue capacity are dropped and counted in
    /// [`dropped_event_count`](Self::dropped_event_count).
    pub fn register_event_listener<F>(&self, scope: ListenerScope, callback: F) -> ListenerId
    where
        F: FnMut(&EslEvent) + Send + 'static,
    {
        self.inner
            .registry
            .register(scope, callback)
    }

    /// Stop a listener. Returns `false` if it was not registered under `scope`.
    pub fn remove_event_listener(&self, scope: &ListenerScope, id: ListenerId) -> bool {
        self.inner
            .registry
            .remove(scope, id)
    }

    /// Ask the switch to start sending events.
    ///
    /// Dialed connections subscribe to every event; per-call connections
    /// subscribe to their own session's events.
    pub async fn enable_events(&self, format: EventFormat) -> EslResult<()> {
        self.enable_events_cancellable(format, &CancellationToken::new())
            .await
    }

    pub async fn enable_events_cancellable(
        &self,
        format: EventFormat,
        cancel: &CancellationToken,
    ) -> EslResult<()> {
        let response = match self.inner.topology {
            Topology::Outbound => {
                let subscribe = command::Event {
                    format,
                    listen: vec!["all".to_string()],
                    ignore: false,
                };
                self.send_command_cancellable(&subscribe, cancel)
                    .await?
            }
            Topology::Inbound => {
                let subscribe = command::MyEvents { format, uuid: None };
                self.send_command_cancellable(&subscribe, cancel)
                    .await?
            }
        };
        response.into_result()?;
        Ok(())
    }

    /// Send `exit` (bounded by `exit_timeout`), then close.
    ///
    /// Errors from `exit` are logged and otherwise ignored.
    pub async fn exit_and_close(&self) {
        if self.is_ready() {
            self.inner
                .exit_requested
                .store(true, Ordering::Release);
            let limit = self
                .inner
                .options
                .exit_timeout;
            match timeout(limit, self.send_command(&command::Exit)).await {
                Ok(Ok(response)) => debug!("exit acknowledged: {:?}", response.reply_text()),
                Ok(Err(e)) => debug!("exit failed: {}", e),
                Err(_) => debug!("exit timed out after {}ms", limit.as_millis()),
            }
        }
        self.close_with(DisconnectReason::ClientRequested);
    }

    /// Close immediately. Pending commands fail with `ConnectionClosed`.
    pub fn close(&self) {
        self.close_with(DisconnectReason::ClientRequested);
    }

    /// Wait until the connection is closed and return why.
    pub async fn closed(&self) -> DisconnectReason {
        let mut rx = self
            .inner
            .state_tx
            .subscribe();
        let state = rx
            .wait_for(|state| matches!(state, ConnectionState::Closed(_)))
            .await;
        match state.as_deref() {
            Ok(ConnectionState::Closed(reason)) => reason.clone(),
            _ => DisconnectReason::ConnectionClosed,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner
            .state()
    }

    /// Watch state changes.
    pub fn state_watcher(&self) -> watch::Receiver<ConnectionState> {
        self.inner
            .state_tx
            .subscribe()
    }

    pub fn topology(&self) -> Topology {
        self.inner
            .topology
    }

    /// Check if the connection accepts commands.
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Total events dropped because a listener's queue was full.
    pub fn dropped_event_count(&self) -> u64 {
        self.inner
            .registry
            .dropped_count()
    }

    /// Remote address of the socket.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner
            .peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Api;
    use std::sync::mpsc as std_mpsc;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn pair_with(
        state: ConnectionState,
        options: ConnectOptions,
        hook: Option<DisconnectHook>,
    ) -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener
            .local_addr()
            .unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let conn = Connection::start(
            client.unwrap(),
            Topology::Outbound,
            options,
            state,
            hook,
        );
        (conn, server.unwrap().0)
    }

    async fn pair() -> (Connection, TcpStream) {
        pair_with(ConnectionState::Ready, ConnectOptions::default(), None).await
    }

    async fn read_command(server: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while !buf.ends_with(b"\r\n\r\n") {
            server
                .read_exact(&mut byte)
                .await
                .unwrap();
            buf.push(byte[0]);
        }
        String::from_utf8(buf).unwrap()
    }

    fn api(cmd: &str) -> Api {
        Api {
            command: cmd.to_string(),
        }
    }

    #[tokio::test]
    async fn reply_reaches_caller() {
        let (conn, mut server) = pair().await;
        let c = conn.clone();
        let call = tokio::spawn(async move { c.send_command(&api("status")).await });

        assert_eq!(read_command(&mut server).await, "api status\r\n\r\n");
        server
            .write_all(b"Content-Type: api/response\nContent-Length: 2\n\nUP")
            .await
            .unwrap();

        let response = call
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.body(), Some("UP"));
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn not_ready_before_handshake() {
        let (conn, _server) =
            pair_with(ConnectionState::Connecting, ConnectOptions::default(), None).await;
        assert!(matches!(
            conn.send_command(&api("status"))
                .await,
            Err(EslError::NotReady)
        ));
        conn.set_ready()
            .unwrap();
        assert!(conn.is_ready());
    }

    #[tokio::test]
    async fn cancelled_call_keeps_fifo_aligned() {
        let (conn, mut server) = pair().await;
        let token = CancellationToken::new();

        let (c, t) = (conn.clone(), token.clone());
        let first =
            tokio::spawn(async move { c.send_command_cancellable(&api("first"), &t).await });
        read_command(&mut server).await;
        token.cancel();
        assert!(matches!(first.await.unwrap(), Err(EslError::Cancelled)));

        let c = conn.clone();
        let second = tokio::spawn(async move { c.send_command(&api("second")).await });
        read_command(&mut server).await;
        server
            .write_all(b"Content-Type: api/response\nContent-Length: 5\n\nfirst")
            .await
            .unwrap();
        server
            .write_all(b"Content-Type: api/response\nContent-Length: 6\n\nsecond")
            .await
            .unwrap();

        let reply = second
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.body(), Some("second"));
        assert!(conn.is_ready());
    }

    #[tokio::test]
    async fn command_timeout() {
        let options = ConnectOptions {
            command_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (conn, _server) = pair_with(ConnectionState::Ready, options, None).await;
        assert!(matches!(
            conn.send_command(&api("status"))
                .await,
            Err(EslError::Timeout { timeout_ms: 50 })
        ));
        assert!(conn.is_ready());
    }

    #[tokio::test]
    async fn close_fails_pending_calls() {
        let (conn, mut server) = pair().await;
        let mut calls = Vec::new();
        for i in 0..3 {
            let c = conn.clone();
            calls.push(tokio::spawn(async move {
                c.send_command(&api(&format!("cmd{}", i)))
                    .await
            }));
            read_command(&mut server).await;
        }

        conn.close();
        for call in calls {
            assert!(matches!(
                call.await
                    .unwrap(),
                Err(EslError::ConnectionClosed)
            ));
        }
        assert_eq!(conn.closed().await, DisconnectReason::ClientRequested);
        assert!(matches!(
            conn.send_command(&api("late"))
                .await,
            Err(EslError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn disconnect_notice_closes_and_runs_hook_once() {
        let (tx, rx) = std_mpsc::channel();
        let hook: DisconnectHook = Box::new(move |reason| {
            let _ = tx.send(reason);
        });
        let (conn, mut server) =
            pair_with(ConnectionState::Ready, ConnectOptions::default(), Some(hook)).await;

        server
            .write_all(b"Content-Type: text/disconnect-notice\nContent-Disposition: linger\n\n")
            .await
            .unwrap();
        server
            .write_all(b"Content-Type: text/disconnect-notice\nContent-Disposition: disconnect\n\n")
            .await
            .unwrap();

        assert_eq!(conn.closed().await, DisconnectReason::ServerNotice);
        conn.close();
        assert_eq!(rx.recv().unwrap(), DisconnectReason::ServerNotice);
        assert!(rx
            .try_recv()
            .is_err());
    }

    #[tokio::test]
    async fn missing_content_type_is_a_reply() {
        let (conn, mut server) = pair().await;
        let c = conn.clone();
        let call = tokio::spawn(async move { c.send_command(&api("status")).await });

        read_command(&mut server).await;
        server
            .write_all(b"Reply-Text: +OK\n\n")
            .await
            .unwrap();

        let response = call
            .await
            .unwrap()
            .unwrap();
        assert!(response.is_ok());
        assert!(conn.is_ready());
    }

    #[tokio::test]
    async fn already_cancelled_token_writes_nothing() {
        let (conn, mut server) = pair().await;
        let token = CancellationToken::new();
        token.cancel();

        for _ in 0..20 {
            assert!(matches!(
                conn.send_command_cancellable(&api("status"), &token)
                    .await,
                Err(EslError::Cancelled)
            ));
            assert!(conn.is_ready());
        }
        assert_eq!(
            conn.inner
                .correlator
                .len(),
            0
        );

        let c = conn.clone();
        let call = tokio::spawn(async move { c.send_command(&api("version")).await });
        assert_eq!(read_command(&mut server).await, "api version\r\n\r\n");
        server
            .write_all(b"Content-Type: api/response\nContent-Length: 3\n\n1.0")
            .await
            .unwrap();
        assert_eq!(
            call.await
                .unwrap()
                .unwrap()
                .body(),
            Some("1.0")
        );
    }

    #[tokio::test]
    async fn write_failure_closes_connection() {
        let (conn, _server) = pair().await;
        conn.inner
            .writer
            .lock()
            .await
            .shutdown()
            .await
            .unwrap();

        let err = conn
            .send_command(&api("status"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Closed);
        assert!(matches!(
            conn.closed()
                .await,
            DisconnectReason::IoError(_)
        ));
        assert_eq!(
            conn.inner
                .correlator
                .len(),
            0
        );
    }

    #[tokio::test]
    async fn eof_closes() {
        let (conn, server) = pair().await;
        drop(server);
        assert_eq!(conn.closed().await, DisconnectReason::ConnectionClosed);
        assert!(matches!(conn.state(), ConnectionState::Closed(_)));
    }

    #[tokio::test]
    async fn events_reach_listeners() {
        let (conn, mut server) = pair().await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        conn.register_event_listener(ListenerScope::All, move |event| {
            let _ = tx.send(
                event
                    .event_name()
                    .map(str::to_string),
            );
        });

        let body = "Event-Name: HEARTBEAT\nCore-UUID: abc\n\n";
        let frame = format!(
            "Content-Type: text/event-plain\nContent-Length: {}\n\n{}",
            body.len(),
            body
        );
        server
            .write_all(frame.as_bytes())
            .await
            .unwrap();
        assert_eq!(
            rx.recv()
                .await
                .unwrap()
                .as_deref(),
            Some("HEARTBEAT")
        );
    }

    #[tokio::test]
    async fn listener_registered_off_runtime() {
        let (conn, mut server) = pair().await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let c = conn.clone();
        std::thread::spawn(move || {
            c.register_event_listener(ListenerScope::All, move |event| {
                let _ = tx.send(
                    event
                        .event_name()
                        .map(str::to_string),
                );
            })
        })
        .join()
        .unwrap();

        let body = "Event-Name: CUSTOM\n\n";
        let frame = format!(
            "Content-Type: text/event-plain\nContent-Length: {}\n\n{}",
            body.len(),
            body
        );
        server
            .write_all(frame.as_bytes())
            .await
            .unwrap();
        assert_eq!(
            rx.recv()
                .await
                .unwrap()
                .as_deref(),
            Some("CUSTOM")
        );
    }

    #[test]
    fn disconnect_reason_display() {
        assert_eq!(
            DisconnectReason::ServerNotice.to_string(),
            "server sent disconnect notice"
        );
        assert_eq!(
            DisconnectReason::IoError("reset".into()).to_string(),
            "I/O error: reset"
        );
    }
}
