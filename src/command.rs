//! Command rendering and the plain (non-`sendmsg`) commands.

use std::fmt;
use std::time::Duration;

use crate::{
    codec::{encode_message, validate_no_newlines},
    constants::END_OF_MESSAGE,
    error::EslResult,
    event::EventFormat,
    frame::Headers,
};

/// Anything that can be sent over an ESL connection.
///
/// Rendering is a pure function of the command's fields. Implement this for
/// your own types to send raw data; the connection appends the terminating
/// blank line itself.
pub trait Command: Send + Sync + fmt::Debug {
    /// Produce the structured message for this command.
    fn render(&self) -> EslResult<CommandFrame>;
}

/// A rendered command: command line, headers, optional body and lock flags.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CommandFrame {
    /// First line, e.g. `api status` or `sendmsg <uuid>`.
    pub line: String,
    /// Headers following the command line.
    pub headers: Headers,
    /// Body; empty means none.
    pub body: String,
    /// Emit `event-lock: true`.
    pub event_lock: bool,
    /// Emit `event-lock-pri: true`.
    pub event_lock_pri: bool,
}

impl CommandFrame {
    /// Frame with only a command line.
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            ..Default::default()
        }
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .add(name, value);
        self
    }

    /// Set the body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the `event-lock` / `event-lock-pri` flags.
    pub fn locks(mut self, event_lock: bool, event_lock_pri: bool) -> Self {
        self.event_lock = event_lock;
        self.event_lock_pri = event_lock_pri;
        self
    }

    /// Encode without the terminating blank line.
    ///
    /// ```
    /// use freeswitch_esl_mux::CommandFrame;
    ///
    /// let frame = CommandFrame::new("sendmsg abc")
    ///     .header("call-command", "hangup")
    ///     .header("hangup-cause", "NORMAL_CLEARING");
    /// assert_eq!(
    ///     frame.encode().unwrap(),
    ///     "sendmsg abc\r\ncall-command: hangup\r\nhangup-cause: NORMAL_CLEARING"
    /// );
    /// ```
    pub fn encode(&self) -> EslResult<String> {
        encode_message(
            &self.line,
            &self.headers,
            &self.body,
            self.event_lock,
            self.event_lock_pri,
        )
    }

    /// Bytes to put on the wire, terminator included when there is no body.
    pub fn to_wire(&self) -> EslResult<String> {
        let mut wire = self.encode()?;
        if self
            .body
            .is_empty()
        {
            wire.push_str(END_OF_MESSAGE);
        }
        Ok(wire)
    }

    /// First word of the command line.
    pub fn name(&self) -> &str {
        self.line
            .split_whitespace()
            .next()
            .unwrap_or("")
    }

    /// Command line safe for logs (credentials removed).
    pub fn loggable_line(&self) -> String {
        match self.name() {
            "auth" | "userauth" => format!("{} [REDACTED]", self.name()),
            _ => self
                .line
                .clone(),
        }
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandFrame")
            .field("line", &self.loggable_line())
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("event_lock", &self.event_lock)
            .field("event_lock_pri", &self.event_lock_pri)
            .finish()
    }
}

/// A pre-rendered frame can be sent as-is.
impl Command for CommandFrame {
    fn render(&self) -> EslResult<CommandFrame> {
        Ok(self.clone())
    }
}

fn simple(cmd: &str, args: &[&str]) -> CommandFrame {
    let mut line = String::from(cmd);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    CommandFrame::new(line)
}

/// `auth <password>`: answer the switch's `auth/request`.
#[derive(Clone)]
pub struct Auth {
    /// ESL password.
    pub password: String,
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Command for Auth {
    fn render(&self) -> EslResult<CommandFrame> {
        validate_no_newlines(&self.password, "password")?;
        Ok(simple("auth", &[&self.password]))
    }
}

/// `api <command>`: blocking API call, result in the reply body.
#[derive(Debug, Clone)]
pub struct Api {
    /// Command and arguments, e.g. `status` or `uuid_kill abc`.
    pub command: String,
}

impl Command for Api {
    fn render(&self) -> EslResult<CommandFrame> {
        validate_no_newlines(&self.command, "api command")?;
        Ok(simple("api", &[&self.command]))
    }
}

/// `bgapi <command>`: background API call, result arrives as `BACKGROUND_JOB`.
#[derive(Debug, Clone)]
pub struct BgApi {
    /// Command and arguments.
    pub command: String,
    /// Caller-chosen `Job-UUID`; the switch generates one when absent.
    pub job_uuid: Option<String>,
}

impl Command for BgApi {
    fn render(&self) -> EslResult<CommandFrame> {
        validate_no_newlines(&self.command, "bgapi command")?;
        let frame = simple("bgapi", &[&self.command]);
        Ok(match &self.job_uuid {
            Some(job_uuid) => frame.header("Job-UUID", job_uuid),
            None => frame,
        })
    }
}

/// `event <format> <names...>` subscription, or `nixevent <names...>` when ignoring.
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// Event encoding; unused by `nixevent`.
    pub format: EventFormat,
    /// Event names, e.g. `["all"]` or `["CHANNEL_ANSWER", "DTMF"]`.
    pub listen: Vec<String>,
    /// Unsubscribe instead of subscribing.
    pub ignore: bool,
}

impl Command for Event {
    fn render(&self) -> EslResult<CommandFrame> {
        for name in &self.listen {
            validate_no_newlines(name, "event name")?;
        }
        let names = self
            .listen
            .join(" ");
        Ok(if self.ignore {
            simple("nixevent", &[&names])
        } else {
            simple("event", &[self.format.as_str(), &names])
        })
    }
}

/// `myevents [<uuid>] <format>`: subscribe to one session's events.
#[derive(Debug, Clone, Default)]
pub struct MyEvents {
    /// Event encoding.
    pub format: EventFormat,
    /// Session to follow; on a per-call socket the switch infers it.
    pub uuid: Option<String>,
}

impl Command for MyEvents {
    fn render(&self) -> EslResult<CommandFrame> {
        Ok(match &self.uuid {
            Some(uuid) => {
                validate_no_newlines(uuid, "myevents uuid")?;
                simple("myevents", &[uuid, self.format.as_str()])
            }
            None => simple("myevents", &[self.format.as_str()]),
        })
    }
}

/// `filter <header> <value>` or `filter delete <header> [<value>]`.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    /// Event header to match.
    pub header: String,
    /// Value to match; optional only when deleting.
    pub value: Option<String>,
    /// Remove a filter instead of adding it.
    pub delete: bool,
}

impl Command for Filter {
    fn render(&self) -> EslResult<CommandFrame> {
        validate_no_newlines(&self.header, "filter header")?;
        if let Some(value) = &self.value {
            validate_no_newlines(value, "filter value")?;
        }
        let mut args: Vec<&str> = Vec::with_capacity(3);
        if self.delete {
            args.push("delete");
        }
        args.push(&self.header);
        if let Some(value) = &self.value {
            args.push(value);
        }
        Ok(simple("filter", &args))
    }
}

/// `noevents`: drop every subscription.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl Command for NoEvents {
    fn render(&self) -> EslResult<CommandFrame> {
        Ok(simple("noevents", &[]))
    }
}

/// `linger [<seconds>]` when enabled, `nolinger` otherwise.
///
/// Lingering keeps a per-call socket open after hangup so the final events
/// still arrive.
#[derive(Debug, Clone, Copy, Default)]
pub struct Linger {
    /// Turn lingering on or off.
    pub enabled: bool,
    /// How long to linger; the switch default applies when absent.
    pub duration: Option<Duration>,
}

impl Command for Linger {
    fn render(&self) -> EslResult<CommandFrame> {
        if !self.enabled {
            return Ok(simple("nolinger", &[]));
        }
        Ok(match self.duration {
            Some(d) => simple("linger", &[&d.as_secs().to_string()]),
            None => simple("linger", &[]),
        })
    }
}

/// `connect`: first command on a socket the switch opened; replies with channel data.
#[derive(Debug, Clone, Copy, Default)]
pub struct Connect;

impl Command for Connect {
    fn render(&self) -> EslResult<CommandFrame> {
        Ok(simple("connect", &[]))
    }
}

/// `resume`: let the dialplan continue if this socket goes away.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resume;

impl Command for Resume {
    fn render(&self) -> EslResult<CommandFrame> {
        Ok(simple("resume", &[]))
    }
}

/// `exit`: ask the switch to close the socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exit;

impl Command for Exit {
    fn render(&self) -> EslResult<CommandFrame> {
        Ok(simple("exit", &[]))
    }
}
