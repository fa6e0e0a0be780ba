//! `sendmsg` commands that act on a single call leg.
//!
//! Every type here renders to `sendmsg <uuid>` followed by a `call-command`
//! header. An empty `uuid` renders a bare `sendmsg`, which on a per-call socket
//! targets the socket's own channel.

use std::fmt;
use std::net::SocketAddr;

use crate::{
    codec::validate_no_newlines,
    command::{Command, CommandFrame},
    constants::{CONTENT_TYPE_TEXT_PLAIN, EXECUTE_ARG_HEADER_LIMIT, HEADER_CONTENT_TYPE},
    error::EslResult,
    frame::Headers,
    headers::SendMsgHeader,
};

fn sendmsg(uuid: &str, sync: bool, sync_pri: bool) -> EslResult<CommandFrame> {
    validate_no_newlines(uuid, "sendmsg uuid")?;
    let line = if uuid.is_empty() {
        "sendmsg".to_string()
    } else {
        format!("sendmsg {}", uuid)
    };
    Ok(CommandFrame::new(line).locks(sync, sync_pri))
}

/// Raw `sendmsg` with caller-supplied headers and body.
#[derive(Debug, Clone, Default)]
pub struct SendMsg {
    pub uuid: String,
    pub headers: Headers,
    pub body: String,
    pub sync: bool,
    pub sync_pri: bool,
}

impl Command for SendMsg {
    fn render(&self) -> EslResult<CommandFrame> {
        let mut frame = sendmsg(&self.uuid, self.sync, self.sync_pri)?;
        frame.headers = self
            .headers
            .clone();
        frame.body = self
            .body
            .clone();
        Ok(frame)
    }
}

/// Run a dialplan application on a channel.
///
/// ```
/// use freeswitch_esl_mux::{call::Execute, Command};
///
/// let cmd = Execute {
///     uuid: "abc".into(),
///     app_name: "playback".into(),
///     app_args: "ivr/ivr-welcome.wav".into(),
///     sync: true,
///     ..Default::default()
/// };
/// let text = cmd.render().unwrap().encode().unwrap();
/// assert!(text.starts_with("sendmsg abc\r\nevent-lock: true\r\n"));
/// assert!(text.contains("execute-app-arg: ivr/ivr-welcome.wav"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Execute {
    pub uuid: String,
    pub app_name: String,
    pub app_args: String,
    /// Echoed back as `Application-UUID` on the execute events.
    pub app_uuid: Option<String>,
    /// Repeat count; zero is treated as one.
    pub loops: u32,
    pub sync: bool,
    pub sync_pri: bool,
    /// Always carry the argument in the body.
    pub force_body: bool,
}

impl Command for Execute {
    fn render(&self) -> EslResult<CommandFrame> {
        validate_no_newlines(&self.app_name, "execute app name")?;
        let loops = self
            .loops
            .max(1);
        let mut frame = sendmsg(&self.uuid, self.sync, self.sync_pri)?
            .header(SendMsgHeader::CallCommand.as_str(), "execute")
            .header(SendMsgHeader::ExecuteAppName.as_str(), &self.app_name)
            .header(SendMsgHeader::Loops.as_str(), loops.to_string());
        if let Some(app_uuid) = &self.app_uuid {
            frame = frame.header(SendMsgHeader::EventUuid.as_str(), app_uuid);
        }

        if self
            .app_args
            .len()
            > EXECUTE_ARG_HEADER_LIMIT
            || self.force_body
        {
            frame = frame
                .header(HEADER_CONTENT_TYPE, CONTENT_TYPE_TEXT_PLAIN)
                .body(&self.app_args);
        } else {
            frame = frame.header(SendMsgHeader::ExecuteAppArg.as_str(), &self.app_args);
        }
        Ok(frame)
    }
}

macro_rules! variable_app {
    ($(#[$meta:meta])* $Name:ident => $app:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default)]
        pub struct $Name {
            pub uuid: String,
            pub key: String,
            pub value: String,
            pub sync: bool,
            pub sync_pri: bool,
        }

        impl Command for $Name {
            fn render(&self) -> EslResult<CommandFrame> {
                Execute {
                    uuid: self.uuid.clone(),
                    app_name: $app.to_string(),
                    app_args: format!("{}={}", self.key, self.value),
                    sync: self.sync,
                    sync_pri: self.sync_pri,
                    force_body: true,
                    ..Default::default()
                }
                .render()
            }
        }
    };
}

variable_app! {
    /// `set` a channel variable.
    Set => "set"
}

variable_app! {
    /// `export` a channel variable to the bridged leg.
    Export => "export"
}

variable_app! {
    /// `push` a value onto a channel variable.
    Push => "push"
}

/// Hang up a channel with the given cause.
#[derive(Debug, Clone, Default)]
pub struct Hangup {
    pub uuid: String,
    /// Q.850 cause name such as `NORMAL_CLEARING`.
    pub cause: String,
    pub sync: bool,
    pub sync_pri: bool,
}

impl Command for Hangup {
    fn render(&self) -> EslResult<CommandFrame> {
        Ok(sendmsg(&self.uuid, self.sync, self.sync_pri)?
            .header(SendMsgHeader::CallCommand.as_str(), "hangup")
            .header(SendMsgHeader::HangupCause.as_str(), &self.cause))
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoMedia {
    pub uuid: String,
    pub nomedia_uuid: String,
    pub sync: bool,
    pub sync_pri: bool,
}

impl Command for NoMedia {
    fn render(&self) -> EslResult<CommandFrame> {
        Ok(sendmsg(&self.uuid, self.sync, self.sync_pri)?
            .header(SendMsgHeader::CallCommand.as_str(), "nomedia")
            .header(SendMsgHeader::NoMediaUuid.as_str(), &self.nomedia_uuid))
    }
}

/// Hand the channel to an extension (`xferext`).
#[derive(Debug, Clone, Default)]
pub struct Transfer {
    pub uuid: String,
    pub application: String,
    pub sync: bool,
    pub sync_pri: bool,
}

impl Command for Transfer {
    fn render(&self) -> EslResult<CommandFrame> {
        Ok(sendmsg(&self.uuid, self.sync, self.sync_pri)?
            .header(SendMsgHeader::CallCommand.as_str(), "xferext")
            .header(SendMsgHeader::Application.as_str(), &self.application))
    }
}

/// Socket transport for [`Unicast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => f.write_str("tcp"),
            Transport::Udp => f.write_str("udp"),
        }
    }
}

/// Stream the channel's media to a socket.
#[derive(Debug, Clone)]
pub struct Unicast {
    pub uuid: String,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub transport: Transport,
    /// e.g. `native` to skip transcoding to L16.
    pub flags: Option<String>,
    pub sync: bool,
    pub sync_pri: bool,
}

impl Unicast {
    pub fn new(uuid: impl Into<String>, local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            uuid: uuid.into(),
            local,
            remote,
            transport: Transport::Tcp,
            flags: None,
            sync: false,
            sync_pri: false,
        }
    }
}

impl Command for Unicast {
    fn render(&self) -> EslResult<CommandFrame> {
        let mut frame = sendmsg(&self.uuid, self.sync, self.sync_pri)?
            .header(SendMsgHeader::CallCommand.as_str(), "unicast")
            .header(
                SendMsgHeader::LocalIp.as_str(),
                self.local
                    .ip()
                    .to_string(),
            )
            .header(
                SendMsgHeader::LocalPort.as_str(),
                self.local
                    .port()
                    .to_string(),
            )
            .header(
                SendMsgHeader::RemoteIp.as_str(),
                self.remote
                    .ip()
                    .to_string(),
            )
            .header(
                SendMsgHeader::RemotePort.as_str(),
                self.remote
                    .port()
                    .to_string(),
            )
            .header(
                SendMsgHeader::Transport.as_str(),
                self.transport
                    .to_string(),
            );
        if let Some(flags) = &self.flags {
            frame = frame.header(SendMsgHeader::Flags.as_str(), flags);
        }
        Ok(frame)
    }
}
