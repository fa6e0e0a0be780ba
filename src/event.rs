//! ESL event types and structures

use std::fmt;
use std::str::FromStr;

use percent_encoding::{percent_decode_str, percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{
        CONTENT_TYPE_LOG_DATA, CONTENT_TYPE_TEXT_EVENT_JSON, CONTENT_TYPE_TEXT_EVENT_PLAIN,
        CONTENT_TYPE_TEXT_EVENT_XML, HEADER_CONTENT_LENGTH, HEADER_CONTENT_TYPE,
    },
    error::{EslError, EslResult},
    frame::{Frame, Headers},
    headers::{EventHeader, SCOPE_HEADERS},
};

/// Event format types supported by FreeSWITCH ESL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum EventFormat {
    /// Plain text format (default)
    #[default]
    Plain,
    /// JSON format
    Json,
    /// XML format
    Xml,
}

impl EventFormat {
    /// Determine event format from a Content-Type header value.
    pub fn from_content_type(ct: &str) -> Option<Self> {
        match ct {
            CONTENT_TYPE_TEXT_EVENT_PLAIN => Some(Self::Plain),
            CONTENT_TYPE_TEXT_EVENT_JSON => Some(Self::Json),
            CONTENT_TYPE_TEXT_EVENT_XML => Some(Self::Xml),
            _ => None,
        }
    }

    /// Name used in `event` / `myevents` commands.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventFormat::Plain => "plain",
            EventFormat::Json => "json",
            EventFormat::Xml => "xml",
        }
    }

    /// Content-Type the switch uses for events in this format.
    pub fn content_type(&self) -> &'static str {
        match self {
            EventFormat::Plain => CONTENT_TYPE_TEXT_EVENT_PLAIN,
            EventFormat::Json => CONTENT_TYPE_TEXT_EVENT_JSON,
            EventFormat::Xml => CONTENT_TYPE_TEXT_EVENT_XML,
        }
    }
}

impl fmt::Display for EventFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventFormat {
    type Err = ParseEventFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            _ => Err(ParseEventFormatError(s.to_string())),
        }
    }
}

/// Error returned when parsing an invalid event format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventFormatError(pub String);

impl fmt::Display for ParseEventFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event format: {}", self.0)
    }
}

impl std::error::Error for ParseEventFormatError {}

define_header_enum! {
    error_type: ParseEventTypeError, "event type",
    /// FreeSWITCH event names as they appear in `Event-Name`.
    pub enum EslEventType {
        Custom => "CUSTOM",
        Clone => "CLONE",
        ChannelCreate => "CHANNEL_CREATE",
        ChannelDestroy => "CHANNEL_DESTROY",
        ChannelState => "CHANNEL_STATE",
        ChannelCallstate => "CHANNEL_CALLSTATE",
        ChannelAnswer => "CHANNEL_ANSWER",
        ChannelHangup => "CHANNEL_HANGUP",
        ChannelHangupComplete => "CHANNEL_HANGUP_COMPLETE",
        ChannelExecute => "CHANNEL_EXECUTE",
        ChannelExecuteComplete => "CHANNEL_EXECUTE_COMPLETE",
        ChannelHold => "CHANNEL_HOLD",
        ChannelUnhold => "CHANNEL_UNHOLD",
        ChannelBridge => "CHANNEL_BRIDGE",
        ChannelUnbridge => "CHANNEL_UNBRIDGE",
        ChannelProgress => "CHANNEL_PROGRESS",
        ChannelProgressMedia => "CHANNEL_PROGRESS_MEDIA",
        ChannelOutgoing => "CHANNEL_OUTGOING",
        ChannelPark => "CHANNEL_PARK",
        ChannelUnpark => "CHANNEL_UNPARK",
        ChannelApplication => "CHANNEL_APPLICATION",
        ChannelOriginate => "CHANNEL_ORIGINATE",
        ChannelUuid => "CHANNEL_UUID",
        ChannelData => "CHANNEL_DATA",
        Api => "API",
        Log => "LOG",
        Startup => "STARTUP",
        Shutdown => "SHUTDOWN",
        Talk => "TALK",
        Notalk => "NOTALK",
        Dtmf => "DTMF",
        Message => "MESSAGE",
        PresenceIn => "PRESENCE_IN",
        NotifyIn => "NOTIFY_IN",
        Codec => "CODEC",
        BackgroundJob => "BACKGROUND_JOB",
        DetectedSpeech => "DETECTED_SPEECH",
        DetectedTone => "DETECTED_TONE",
        Heartbeat => "HEARTBEAT",
        ReloadXml => "RELOADXML",
        Notify => "NOTIFY",
        SessionHeartbeat => "SESSION_HEARTBEAT",
        RecordStart => "RECORD_START",
        RecordStop => "RECORD_STOP",
        PlaybackStart => "PLAYBACK_START",
        PlaybackStop => "PLAYBACK_STOP",
        CallUpdate => "CALL_UPDATE",
        MediaBugStart => "MEDIA_BUG_START",
        MediaBugStop => "MEDIA_BUG_STOP",
        CallDetail => "CALL_DETAIL",
        DeviceState => "DEVICE_STATE",
        ShutdownRequested => "SHUTDOWN_REQUESTED",
        All => "ALL",
    }
}

impl EslEventType {
    /// Parse an `Event-Name` value; `None` for names this crate does not know.
    pub fn parse_event_type(s: &str) -> Option<Self> {
        s.parse()
            .ok()
    }
}

fn decode_value(raw: &str) -> String {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// ESL event: headers plus an optional body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EslEvent {
    headers: Headers,
    body: Option<String>,
}

impl EslEvent {
    /// Create a new empty event
    pub fn new() -> Self {
        Self::default()
    }

    /// Create event with the given `Event-Name`.
    pub fn with_type(event_type: EslEventType) -> Self {
        let mut event = Self::new();
        event.set_header(EventHeader::EventName, event_type.as_str());
        event
    }

    /// Build an event from a decoded frame.
    ///
    /// Handles `text/event-plain`, `text/event-json`, `text/event-xml` and
    /// `log/data`. Any other Content-Type is a protocol error.
    pub fn from_frame(frame: &Frame) -> EslResult<Self> {
        let content_type = frame
            .content_type()
            .unwrap_or("");
        match content_type {
            CONTENT_TYPE_TEXT_EVENT_PLAIN => Self::parse_plain(frame.body()),
            CONTENT_TYPE_TEXT_EVENT_JSON => Self::parse_json(frame.body()),
            CONTENT_TYPE_TEXT_EVENT_XML => Self::parse_xml(frame.body()),
            CONTENT_TYPE_LOG_DATA => Ok(Self::parse_log(frame)),
            other => Err(EslError::protocol_error(format!(
                "Content-Type {:?} is not an event",
                other
            ))),
        }
    }

    /// Plain text event.
    ///
    /// The outer frame only carries Content-Type and Content-Length; its body
    /// holds percent-encoded `key: value` lines, a blank line, and an optional
    /// inner body sized by the inner `Content-Length`.
    fn parse_plain(body: Option<&str>) -> EslResult<Self> {
        let body = body.ok_or_else(|| EslError::protocol_error("Plain event missing body"))?;
        let mut event = Self::new();

        let (header_section, inner_body) = match body.find("\n\n") {
            Some(pos) => (&body[..pos], Some(&body[pos + 2..])),
            None => (body, None),
        };

        for line in header_section.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(colon_pos) = line.find(':') {
                let key = line[..colon_pos].trim();
                let value = decode_value(line[colon_pos + 1..].trim());
                event.add_header(key, value);
            }
        }

        if let Some(inner) = inner_body {
            let declared = event
                .header(HEADER_CONTENT_LENGTH)
                .and_then(|v| v.parse::<usize>().ok());
            let inner = match declared {
                Some(len) if len <= inner.len() && inner.is_char_boundary(len) => &inner[..len],
                _ => inner,
            };
            if !inner.is_empty() {
                event.set_body(inner);
            }
        }

        Ok(event)
    }

    /// JSON event. Arrays become multi-valued headers; `_body` is the body.
    fn parse_json(body: Option<&str>) -> EslResult<Self> {
        let body = body.ok_or_else(|| EslError::protocol_error("JSON event missing body"))?;
        let value: serde_json::Value = serde_json::from_str(body)?;
        let obj = value
            .as_object()
            .ok_or_else(|| EslError::protocol_error("JSON event is not an object"))?;

        let mut event = Self::new();
        for (key, value) in obj {
            if key == "_body" {
                if let Some(s) = value.as_str() {
                    event.set_body(s);
                }
                continue;
            }
            match value {
                serde_json::Value::String(s) => event.add_header(key.as_str(), s.as_str()),
                serde_json::Value::Array(items) => {
                    for item in items {
                        match item {
                            serde_json::Value::String(s) => {
                                event.add_header(key.as_str(), s.as_str())
                            }
                            other => event.add_header(key.as_str(), other.to_string()),
                        }
                    }
                }
                other => event.add_header(key.as_str(), other.to_string()),
            }
        }
        Ok(event)
    }

    /// XML event using quick_xml.
    ///
    /// ```xml
    /// <event>
    ///   <headers>
    ///     <Event-Name>HEARTBEAT</Event-Name>
    ///     <Core-UUID>abc-123</Core-UUID>
    ///   </headers>
    ///   <body>...</body>
    /// </event>
    /// ```
    fn parse_xml(body: Option<&str>) -> EslResult<Self> {
        use quick_xml::events::Event as XmlEvent;
        use quick_xml::Reader;

        let body = body.ok_or_else(|| EslError::protocol_error("XML event missing body"))?;
        let mut reader = Reader::from_str(body);
        let mut event = Self::new();
        let mut in_headers = false;
        let mut in_body = false;
        let mut current_tag: Option<String> = None;

        loop {
            match reader.read_event()? {
                XmlEvent::Start(ref e) => {
                    let tag = String::from_utf8_lossy(
                        e.name()
                            .as_ref(),
                    )
                    .to_string();
                    match tag.as_str() {
                        "headers" => in_headers = true,
                        "body" => in_body = true,
                        _ if in_headers => current_tag = Some(tag),
                        _ => {}
                    }
                }
                XmlEvent::End(ref e) => {
                    match e
                        .name()
                        .as_ref()
                    {
                        b"headers" => in_headers = false,
                        b"body" => in_body = false,
                        _ if in_headers => current_tag = None,
                        _ => {}
                    }
                }
                XmlEvent::Text(ref e) => {
                    let text = e
                        .unescape()?
                        .to_string();
                    if in_body {
                        event.set_body(text);
                    } else if let Some(tag) = &current_tag {
                        event.add_header(tag.as_str(), decode_value(&text));
                    }
                }
                XmlEvent::Eof => break,
                _ => {}
            }
        }

        Ok(event)
    }

    /// `log/data` frame: the frame headers describe the line, the body is the text.
    fn parse_log(frame: &Frame) -> Self {
        let mut event = Self::new();
        for (name, values) in frame
            .headers()
            .iter()
        {
            if name.eq_ignore_ascii_case(HEADER_CONTENT_TYPE)
                || name.eq_ignore_ascii_case(HEADER_CONTENT_LENGTH)
            {
                continue;
            }
            for value in values {
                event.add_header(name, decode_value(value));
            }
        }
        if !event.contains(EventHeader::EventName) {
            event.set_header(EventHeader::EventName, EslEventType::Log.as_str());
        }
        if let Some(body) = frame.body() {
            event.set_body(body);
        }
        event
    }

    /// Parsed `Event-Name`, if this crate knows it.
    pub fn event_type(&self) -> Option<EslEventType> {
        EslEventType::parse_event_type(self.event_name()?)
    }

    /// Raw `Event-Name` header.
    pub fn event_name(&self) -> Option<&str> {
        self.header(EventHeader::EventName)
    }

    /// Check whether this event matches the given type.
    pub fn is_event_type(&self, event_type: EslEventType) -> bool {
        self.event_type() == Some(event_type)
    }

    /// Look up a header by name (case-insensitive, first value).
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
    }

    /// All values of a header.
    pub fn header_values(&self, name: impl AsRef<str>) -> &[String] {
        self.headers
            .get_all(name.as_ref())
    }

    /// Whether the header is present.
    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.headers
            .contains(name.as_ref())
    }

    /// All headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Set or overwrite a header.
    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .set(name.as_ref(), value);
    }

    /// Append a value to a header.
    pub fn add_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .add(name.as_ref(), value);
    }

    /// Remove a header, returning its values if it existed.
    pub fn del_header(&mut self, name: impl AsRef<str>) -> Option<Vec<String>> {
        self.headers
            .remove(name.as_ref())
    }

    /// Event body (the content after the blank line in plain-text events).
    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    /// Set the event body.
    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = Some(body.into());
    }

    /// `Unique-ID` header.
    pub fn unique_id(&self) -> Option<&str> {
        self.header(EventHeader::UniqueId)
    }

    /// `Application-UUID` header, echoed from an execute's `Event-UUID`.
    pub fn application_uuid(&self) -> Option<&str> {
        self.header(EventHeader::ApplicationUuid)
    }

    /// `Job-UUID` header from `bgapi` `BACKGROUND_JOB` events.
    pub fn job_uuid(&self) -> Option<&str> {
        self.header(EventHeader::JobUuid)
    }

    /// `DTMF-Digit` header of `DTMF` events.
    pub fn dtmf_digit(&self) -> Option<&str> {
        self.header(EventHeader::DtmfDigit)
    }

    /// `Channel-Name` header (e.g. `sofia/internal/1000@domain`).
    pub fn channel_name(&self) -> Option<&str> {
        self.header(EventHeader::ChannelName)
    }

    /// `Hangup-Cause` header.
    pub fn hangup_cause(&self) -> Option<&str> {
        self.header(EventHeader::HangupCause)
    }

    /// `Event-Subclass` header, for `CUSTOM` events.
    pub fn event_subclass(&self) -> Option<&str> {
        self.header(EventHeader::EventSubclass)
    }

    /// Channel variable (`variable_<name>` header).
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.header(format!("variable_{}", name))
    }

    /// Values of the headers that tie this event to a listener scope.
    pub fn scope_ids(&self) -> impl Iterator<Item = &str> {
        SCOPE_HEADERS
            .into_iter()
            .filter_map(move |h| self.header(h))
    }

    /// Whether any scope header equals `id`.
    pub fn matches_scope(&self, id: &str) -> bool {
        self.scope_ids()
            .any(|v| v == id)
    }

    /// Serialize to ESL plain text wire format with percent-encoded header values.
    ///
    /// This is the body of a `text/event-plain` frame; parsing it back yields an
    /// equal event. `Event-Name` comes first, the rest are sorted for stable
    /// output, and `Content-Length` is recomputed from the body.
    pub fn to_plain_format(&self) -> String {
        use std::fmt::Write;
        let mut result = String::new();

        for value in self.header_values(EventHeader::EventName) {
            let _ = writeln!(
                result,
                "Event-Name: {}",
                percent_encode(value.as_bytes(), NON_ALPHANUMERIC)
            );
        }

        let mut sorted: Vec<(&str, &[String])> = self
            .headers
            .iter()
            .filter(|(k, _)| {
                !k.eq_ignore_ascii_case(EventHeader::EventName.as_str())
                    && !k.eq_ignore_ascii_case(HEADER_CONTENT_LENGTH)
            })
            .collect();
        sorted.sort_by_key(|(k, _)| *k);

        for (key, values) in sorted {
            for value in values {
                let _ = writeln!(
                    result,
                    "{}: {}",
                    key,
                    percent_encode(value.as_bytes(), NON_ALPHANUMERIC)
                );
            }
        }

        if let Some(body) = &self.body {
            let _ = writeln!(result, "Content-Length: {}", body.len());
            result.push('\n');
            result.push_str(body);
        } else {
            result.push('\n');
        }

        result
    }

    /// Wrap this event in a `text/event-plain` frame, as the switch sends it.
    pub fn to_plain_frame(&self) -> Frame {
        let mut headers = Headers::new();
        headers.set(HEADER_CONTENT_TYPE, CONTENT_TYPE_TEXT_EVENT_PLAIN);
        Frame::with_body(headers, self.to_plain_format())
    }
}
