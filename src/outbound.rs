//! Dialing the switch's event socket.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    command::Auth,
    connection::{
        ConnectOptions, Connection, ConnectionState, DisconnectHook, DisconnectReason, Topology,
    },
    constants::DEFAULT_ESL_PORT,
    error::{EslError, EslResult},
};

/// `host`, `host:port`, `1.2.3.4`, `[::1]:8021` or `::1`; the port defaults to 8021.
fn with_default_port(address: &str) -> String {
    if address
        .parse::<SocketAddr>()
        .is_ok()
    {
        return address.to_string();
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return SocketAddr::new(ip, DEFAULT_ESL_PORT).to_string();
    }
    match address.rsplit_once(':') {
        Some((_, port)) if port
            .parse::<u16>()
            .is_ok() =>
        {
            address.to_string()
        }
        _ => format!("{}:{}", address, DEFAULT_ESL_PORT),
    }
}

/// Establish a TCP connection with a timeout.
async fn tcp_connect_with_timeout(address: &str, limit: Duration) -> EslResult<TcpStream> {
    match timeout(limit, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(stream)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect failed: {}", e);
            Err(EslError::Io(e))
        }
        Err(_) => {
            warn!(
                "[CONNECT] TCP connect timed out after {}ms",
                limit.as_millis()
            );
            Err(EslError::Timeout {
                timeout_ms: limit.as_millis() as u64,
            })
        }
    }
}

/// Wait for `auth/request`, answer it, and require `+OK`.
async fn authenticate(conn: &Connection, password: &str) -> EslResult<()> {
    let limit = conn
        .options()
        .auth_timeout;

    debug!("[AUTH] Waiting for auth request from FreeSWITCH");
    match timeout(limit, conn.auth_requested()).await {
        Ok(true) => {}
        Ok(false) => return Err(EslError::ConnectionClosed),
        Err(_) => {
            return Err(EslError::Timeout {
                timeout_ms: limit.as_millis() as u64,
            })
        }
    }

    let auth = Auth {
        password: password.to_string(),
    };
    let response = conn
        .send_handshake(&auth, limit)
        .await?;
    if !response.is_ok() {
        return Err(EslError::auth_failed(
            response
                .reply_text()
                .unwrap_or("Authentication failed"),
        ));
    }

    debug!("Authentication successful");
    Ok(())
}

impl Connection {
    /// Dial the switch's event socket and authenticate.
    ///
    /// `on_disconnect` runs once when the connection closes, whatever the cause.
    ///
    /// ```no_run
    /// # async fn example() -> Result<(), freeswitch_esl_mux::EslError> {
    /// use freeswitch_esl_mux::{Connection, EventFormat};
    ///
    /// let conn = Connection::dial("127.0.0.1:8021", "ClueCon", None).await?;
    /// conn.enable_events(EventFormat::Plain).await?;
    /// let uptime = conn.api("uptime").await?;
    /// println!("{}", uptime.body_string());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn dial(
        address: &str,
        password: &str,
        on_disconnect: Option<DisconnectHook>,
    ) -> EslResult<Connection> {
        Self::dial_with_options(address, password, on_disconnect, ConnectOptions::default()).await
    }

    /// [`dial`](Self::dial) with custom timeouts and queue sizes.
    pub async fn dial_with_options(
        address: &str,
        password: &str,
        on_disconnect: Option<DisconnectHook>,
        options: ConnectOptions,
    ) -> EslResult<Connection> {
        let address = with_default_port(address);
        info!("Connecting to FreeSWITCH at {}", address);

        let stream = tcp_connect_with_timeout(&address, options.connect_timeout).await?;
        let conn = Connection::start(
            stream,
            Topology::Outbound,
            options,
            ConnectionState::Connecting,
            on_disconnect,
        );
        conn.set_authenticating();

        if let Err(e) = authenticate(&conn, password).await {
            warn!("Authentication with {} failed: {}", address, e);
            conn.close_with(DisconnectReason::ClientRequested);
            return Err(e);
        }
        conn.set_ready()?;

        info!("Successfully connected and authenticated to FreeSWITCH");
        Ok(conn)
    }
}
