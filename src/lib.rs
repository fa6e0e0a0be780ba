//! FreeSWITCH Event Socket Library (ESL) connections for Rust
//!
//! This crate speaks FreeSWITCH's Event Socket protocol in both directions:
//! dialing the switch's event socket, and accepting the per-call sockets the
//! `socket` dialplan application opens. Either way you get the same
//! [`Connection`].
//!
//! # Architecture
//!
//! - [`Connection`] (Clone + Send + Sync): send commands from any number of
//!   tasks. The switch answers commands in order, so replies are matched to
//!   callers first-in first-out. A caller that gives up (cancellation token,
//!   timeout, or dropping the future) leaves its slot behind and the late
//!   reply is discarded, so nobody else receives it.
//! - Event listeners: callbacks registered for every event or for one
//!   channel/job UUID. Each listener has its own queue and task, so a slow
//!   listener only ever loses its own events.
//! - Commands: any type implementing [`Command`]. Connection-level commands
//!   live in [`command`], call control (`sendmsg`) in [`call`].
//!
//! # Examples
//!
//! ## Dialing the event socket
//!
//! ```rust,no_run
//! use freeswitch_esl_mux::{Connection, EslError, EventFormat, ListenerScope};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EslError> {
//!     let conn = Connection::dial("localhost", "ClueCon", None).await?;
//!
//!     conn.register_event_listener(ListenerScope::All, |event| {
//!         println!("Received event: {:?}", event.event_type());
//!     });
//!     conn.enable_events(EventFormat::Plain).await?;
//!
//!     let response = conn.api("status").await?;
//!     println!("Status: {}", response.body().unwrap_or("No body"));
//!
//!     let reason = conn.closed().await;
//!     println!("Disconnected: {}", reason);
//!     Ok(())
//! }
//! ```
//!
//! ## Serving calls
//!
//! The switch connects to *your* application through the
//! [`socket`](https://developer.signalwire.com/freeswitch/FreeSWITCH-Explained/Modules/mod_event_socket_1048924/)
//! dialplan application. The server sends `connect` on each socket and hands
//! you the channel data:
//!
//! ```rust,no_run
//! use freeswitch_esl_mux::{EslError, EventFormat, InboundServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EslError> {
//!     let server = InboundServer::listen("0.0.0.0:8040", |conn, channel| async move {
//!         let Some(uuid) = channel.channel_uuid().map(str::to_string) else {
//!             return;
//!         };
//!         let _ = conn.enable_events(EventFormat::Plain).await;
//!         let _ = conn.answer(&uuid).await;
//!         let _ = conn.playback(&uuid, "ivr/ivr-welcome.wav", 1).await;
//!         if let Ok(digit) = conn.wait_for_dtmf(&uuid).await {
//!             println!("caller pressed {}", digit);
//!         }
//!         let _ = conn.hangup(&uuid, "NORMAL_CLEARING").await;
//!     })
//!     .await?;
//!
//!     println!("listening on {}", server.local_addr());
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! Configure FreeSWITCH to connect to your app:
//! ```xml
//! <action application="socket" data="127.0.0.1:8040 async full"/>
//! ```
//!
//! ## Custom commands
//!
//! ```rust
//! use freeswitch_esl_mux::{call::Execute, Command};
//!
//! let answer = Execute {
//!     uuid: "6f2c1b38-0d45-4b6e-9c0b-3f1e2a9d7c11".into(),
//!     app_name: "answer".into(),
//!     sync: true,
//!     ..Default::default()
//! };
//! let frame = answer.render().unwrap();
//! assert_eq!(frame.name(), "sendmsg");
//! ```

#[macro_use]
mod macros;

pub mod call;
pub mod command;
pub mod connection;
pub mod constants;
pub mod error;
pub mod event;
pub mod headers;
pub mod inbound;
pub mod variables;

pub(crate) mod codec;
pub(crate) mod correlator;
pub(crate) mod frame;
pub(crate) mod helpers;
pub(crate) mod outbound;
pub(crate) mod protocol;
pub(crate) mod registry;
pub(crate) mod response;

pub use codec::{encode_frame, encode_message, sanitize_header_value, FrameCodec};
pub use command::{Command, CommandFrame};
pub use connection::{
    ConnectOptions, Connection, ConnectionState, DisconnectHook, DisconnectReason, Topology,
};
pub use constants::DEFAULT_ESL_PORT;
pub use error::{ErrorKind, EslError, EslResult};
pub use event::{EslEvent, EslEventType, EventFormat, ParseEventFormatError, ParseEventTypeError};
pub use frame::{Frame, Headers};
pub use headers::{EventHeader, ParseEventHeaderError, ParseSendMsgHeaderError, SendMsgHeader};
pub use inbound::InboundServer;
pub use protocol::MessageType;
pub use registry::{ListenerId, ListenerScope};
pub use response::{RawResponse, ReplyStatus};
pub use tokio_util::sync::CancellationToken;
pub use variables::{Variables, VariablesType};
