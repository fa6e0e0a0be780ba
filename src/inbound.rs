//! Accepting per-call sockets the switch opens to us.
//!
//! A dialplan `socket` application connects one call leg to a TCP server.
//! Each accepted socket gets its own [`Connection`]; the handler runs once
//! per call and the connection is closed when it returns.

use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    command::Connect,
    connection::{ConnectOptions, Connection, ConnectionState, Topology},
    error::{EslError, EslResult},
    response::RawResponse,
};

/// Back-off after a failed `accept`, so fd exhaustion does not spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A listening socket that hands each call to a handler.
#[derive(Debug)]
pub struct InboundServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl InboundServer {
    /// Bind `address` and serve every connection with `on_connection`.
    ///
    /// The handler receives the ready connection and the reply to `connect`,
    /// which carries the channel's variables (see [`RawResponse::channel_data`]).
    ///
    /// ```no_run
    /// # async fn example() -> Result<(), freeswitch_esl_mux::EslError> {
    /// use freeswitch_esl_mux::InboundServer;
    ///
    /// let server = InboundServer::listen("0.0.0.0:8084", |conn, channel| async move {
    ///     let Some(uuid) = channel.channel_uuid().map(str::to_string) else { return };
    ///     let _ = conn.answer(&uuid).await;
    ///     let _ = conn.playback(&uuid, "ivr/ivr-welcome.wav", 1).await;
    ///     let _ = conn.hangup(&uuid, "NORMAL_CLEARING").await;
    /// })
    /// .await?;
    /// println!("listening on {}", server.local_addr());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn listen<H, Fut>(address: &str, on_connection: H) -> EslResult<InboundServer>
    where
        H: Fn(Connection, RawResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::listen_with_options(address, on_connection, ConnectOptions::default()).await
    }

    /// [`listen`](Self::listen) with options applied to every accepted connection.
    pub async fn listen_with_options<H, Fut>(
        address: &str,
        on_connection: H,
        options: ConnectOptions,
    ) -> EslResult<InboundServer>
    where
        H: Fn(Connection, RawResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(address)
            .await
            .map_err(EslError::Io)?;
        let local_addr = listener.local_addr()?;
        info!("Listening for FreeSWITCH connections on {}", local_addr);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            listener,
            Arc::new(on_connection),
            options,
            shutdown.clone(),
        ));

        Ok(InboundServer {
            local_addr,
            shutdown,
            task,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. Calls already in progress keep running.
    pub async fn shutdown(mut self) {
        self.shutdown
            .cancel();
        if let Err(e) = (&mut self.task).await {
            warn!("accept loop ended abnormally: {}", e);
        }
        info!("Stopped listening on {}", self.local_addr);
    }
}

impl Drop for InboundServer {
    fn drop(&mut self) {
        self.shutdown
            .cancel();
    }
}

async fn accept_loop<H, Fut>(
    listener: TcpListener,
    handler: Arc<H>,
    options: ConnectOptions,
    shutdown: CancellationToken,
) where
    H: Fn(Connection, RawResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("Accepted outbound connection from {}", peer);
                    tokio::spawn(serve_call(
                        stream,
                        peer,
                        Arc::clone(&handler),
                        options.clone(),
                    ));
                }
                Err(e) => {
                    warn!("Accept error: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
        }
    }
    debug!("accept loop finished");
}

async fn serve_call<H, Fut>(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
    options: ConnectOptions,
) where
    H: Fn(Connection, RawResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let limit = options.connect_timeout;
    let conn = Connection::start(
        stream,
        Topology::Inbound,
        options,
        ConnectionState::Connecting,
        None,
    );

    let channel = match conn
        .send_handshake(&Connect, limit)
        .await
        .and_then(RawResponse::into_result)
    {
        Ok(channel) => channel,
        Err(e) => {
            warn!("connect with {} failed: {}", peer, e);
            conn.close();
            return;
        }
    };
    if conn
        .set_ready()
        .is_err()
    {
        debug!("connection from {} closed during connect", peer);
        return;
    }
    debug!(
        "call {} connected from {}",
        channel
            .channel_uuid()
            .unwrap_or("<unknown>"),
        peer
    );

    if AssertUnwindSafe(handler(conn.clone(), channel))
        .catch_unwind()
        .await
        .is_err()
    {
        error!("connection handler for {} panicked", peer);
    }
    conn.exit_and_close()
        .await;
}
