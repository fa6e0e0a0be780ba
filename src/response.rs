//! Replies to commands.

use percent_encoding::percent_decode_str;

use crate::{
    constants::{CONTENT_TYPE_API_RESPONSE, HEADER_REPLY_TEXT},
    error::{EslError, EslResult},
    frame::{Frame, Headers},
    headers::EventHeader,
};

/// Reply classification per the ESL wire protocol.
///
/// FreeSWITCH commands return `+OK …` on success and `-ERR …` on failure.
/// A handful of commands (`getvar`) return the raw value with no prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReplyStatus {
    /// Reply-Text starts with `+OK`, or there is no Reply-Text and the body
    /// does not start with `-ERR`.
    Ok,
    /// Reply-Text (or, without one, the `api/response` body) starts with `-ERR`.
    Err,
    /// Reply-Text present but matches neither `+OK` nor `-ERR`.
    Other,
}

/// The reply frame matched to a command.
///
/// `send_command` hands this back whatever the status; call
/// [`into_result`](Self::into_result) to turn `-ERR` into an error.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    headers: Headers,
    body: Option<String>,
    status: ReplyStatus,
}

impl RawResponse {
    /// `ReplyStatus` is derived from `Reply-Text`, falling back to the body.
    pub fn new(headers: Headers, body: Option<String>) -> Self {
        let status = match headers.get(HEADER_REPLY_TEXT) {
            Some(t) if t.starts_with("+OK") => ReplyStatus::Ok,
            Some(t) if t.starts_with("-ERR") => ReplyStatus::Err,
            Some("") => ReplyStatus::Ok,
            Some(_) => ReplyStatus::Other,
            None => match body.as_deref() {
                Some(b) if b.starts_with("-ERR") => ReplyStatus::Err,
                _ => ReplyStatus::Ok,
            },
        };

        Self {
            headers,
            body,
            status,
        }
    }

    /// Build from a decoded reply frame.
    pub fn from_frame(frame: Frame) -> Self {
        let (headers, body) = frame.into_parts();
        Self::new(headers, body)
    }

    /// `true` if the reply is `+OK` (or an `api/response` that is not `-ERR`).
    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    /// Reply classification.
    pub fn reply_status(&self) -> ReplyStatus {
        self.status
    }

    /// Response body (the `api/` response payload).
    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    /// Body as owned `String`, empty if `None`.
    pub fn body_string(&self) -> String {
        self.body
            .clone()
            .unwrap_or_default()
    }

    /// Look up a header by name (raw, not percent-decoded).
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
    }

    /// All response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// `Content-Type` of the reply (`command/reply`, `api/response`, ...).
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Raw `Reply-Text` header value (e.g. `+OK`, `-ERR invalid command`).
    pub fn reply_text(&self) -> Option<&str> {
        self.header(HEADER_REPLY_TEXT)
    }

    /// `Job-UUID` header from `bgapi` replies.
    pub fn job_uuid(&self) -> Option<&str> {
        self.header(EventHeader::JobUuid)
    }

    /// Text following `-ERR`, or the whole text for an unexpected reply.
    fn failure_text(&self) -> String {
        let text = match self.reply_text() {
            Some(t) => t,
            None => self
                .body()
                .unwrap_or("")
                .trim_end_matches(|c: char| c == '\r' || c == '\n'),
        };
        match text.strip_prefix("-ERR") {
            Some(rest) => rest
                .strip_prefix(' ')
                .unwrap_or(rest)
                .to_string(),
            None => text.to_string(),
        }
    }

    /// Convert to a result based on the reply status.
    ///
    /// ```
    /// # use freeswitch_esl_mux::{Headers, RawResponse};
    /// let headers: Headers = [("Reply-Text", "-ERR no such channel")].into_iter().collect();
    /// let err = RawResponse::new(headers, None).into_result().unwrap_err();
    /// assert_eq!(err.to_string(), "command rejected: no such channel");
    /// ```
    pub fn into_result(self) -> EslResult<Self> {
        match self.status {
            ReplyStatus::Ok => Ok(self),
            ReplyStatus::Err => Err(EslError::CommandRejected {
                reply_text: self.failure_text(),
            }),
            ReplyStatus::Other => Err(EslError::UnexpectedReply {
                reply_text: self.failure_text(),
            }),
        }
    }

    /// Channel data headers, percent-decoded.
    ///
    /// The `connect` reply on a per-call socket carries every channel
    /// variable as a header.
    pub fn channel_data(&self) -> Headers {
        self.headers
            .iter()
            .flat_map(|(name, values)| {
                values
                    .iter()
                    .map(move |v| {
                        let decoded = percent_decode_str(v)
                            .decode_utf8()
                            .map(|s| s.into_owned())
                            .unwrap_or_else(|_| v.clone());
                        (name.to_string(), decoded)
                    })
            })
            .collect()
    }

    /// `Unique-ID` of the channel in a `connect` reply.
    pub fn channel_uuid(&self) -> Option<&str> {
        self.header(EventHeader::UniqueId)
    }

    /// Whether this came back as an `api/response`.
    pub fn is_api_response(&self) -> bool {
        self.content_type() == Some(CONTENT_TYPE_API_RESPONSE)
    }
}
