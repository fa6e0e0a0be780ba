//! Wire framing: header block, blank line, optional `Content-Length` body.
//!
//! Decoding is done by [`FrameCodec`], a [`tokio_util::codec::Decoder`] driven
//! by the connection's reader task. Encoding of outgoing messages goes through
//! [`encode_message`], which every command rendering ends up in.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::{
    constants::{CRLF, HEADER_CONTENT_LENGTH, MAX_HEADER_BLOCK, MAX_MESSAGE_SIZE},
    error::{EslError, EslResult},
    frame::{Frame, Headers},
};

/// Reject strings that would break line framing.
pub(crate) fn validate_no_newlines(s: &str, context: &str) -> EslResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(EslError::encoding_error(format!(
            "{} must not contain newlines",
            context
        )));
    }
    Ok(())
}

/// Normalize a header value for the wire.
///
/// CR LF pairs collapse to LF and surrounding whitespace is trimmed. Unlike
/// the switch's own clients, which stop there, a value that still carries a
/// line break is refused with an encoding error, since it would inject a
/// header line.
pub fn sanitize_header_value(value: &str) -> EslResult<String> {
    let value = value
        .replace("\r\n", "\n")
        .trim()
        .to_string();
    if value.contains('\n') || value.contains('\r') {
        return Err(EslError::encoding_error(format!(
            "header value {:?} contains a line break",
            value
        )));
    }
    Ok(value)
}

fn validate_header_name(name: &str) -> EslResult<()> {
    if name.is_empty() || name.contains(':') || name.contains(char::is_whitespace) {
        return Err(EslError::encoding_error(format!(
            "invalid header name {:?}",
            name
        )));
    }
    Ok(())
}

/// Encode one outgoing message without its terminating blank line.
///
/// Layout: the command line, then `event-lock` / `event-lock-pri` when set,
/// then every other header sorted by key. A non-empty body gets a computed
/// `Content-Length` (any caller value is replaced) and follows one blank
/// line; an empty body strips `Content-Length` entirely.
pub fn encode_message(
    line: &str,
    headers: &Headers,
    body: &str,
    event_lock: bool,
    event_lock_pri: bool,
) -> EslResult<String> {
    validate_no_newlines(line, "command line")?;

    let mut lines: Vec<String> = Vec::with_capacity(headers.len() + 3);
    if event_lock {
        lines.push("event-lock: true".to_string());
    }
    if event_lock_pri {
        lines.push("event-lock-pri: true".to_string());
    }

    let content_length = body
        .len()
        .to_string();
    let content_length = [content_length];
    let mut sorted: Vec<(&str, &[String])> = headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case(HEADER_CONTENT_LENGTH))
        .collect();
    if !body.is_empty() {
        sorted.push((HEADER_CONTENT_LENGTH, &content_length));
    }
    sorted.sort_by(|a, b| {
        a.0.as_bytes()
            .cmp(b.0.as_bytes())
    });

    for (name, values) in sorted {
        validate_header_name(name)?;
        for value in values {
            lines.push(format!("{}: {}", name, sanitize_header_value(value)?));
        }
    }

    let mut out = String::with_capacity(line.len() + body.len() + lines.len() * 32);
    out.push_str(line);
    if !lines.is_empty() {
        out.push_str(CRLF);
        out.push_str(&lines.join(CRLF));
    }
    if !body.is_empty() {
        out.push_str(CRLF);
        out.push_str(CRLF);
        out.push_str(body);
    }
    Ok(out)
}

/// Encode an inbound-style frame (headers, blank line, body).
///
/// This is what the switch writes; the crate only needs it for fake switches
/// in tests and for logging frames back out. Header values are written as
/// they are stored, so `FrameCodec` decodes the output back to an equal frame.
pub fn encode_frame(frame: &Frame) -> EslResult<String> {
    let body = frame
        .body()
        .unwrap_or("");
    let mut out = encode_message("", frame.headers(), body, false, false)?;
    // encode_message always leads with the (empty) command line.
    let out = out.split_off(CRLF.len().min(out.len()));
    if body.is_empty() {
        Ok(format!("{}{}{}", out, CRLF, CRLF))
    } else {
        Ok(out)
    }
}

/// Parse a header block into multi-valued headers.
pub(crate) fn parse_header_block(block: &str) -> EslResult<Headers> {
    let mut headers = Headers::new();
    for line in block.split('\n') {
        let line = line.trim_end_matches('\r');
        if line
            .trim()
            .is_empty()
        {
            continue;
        }
        let Some(colon_pos) = line.find(':') else {
            return Err(EslError::InvalidHeader {
                header: line.to_string(),
            });
        };
        let key = line[..colon_pos].trim();
        let value = line[colon_pos + 1..].trim();
        headers.add(key, value);
    }
    Ok(headers)
}

/// Locate the blank line ending a header block.
///
/// Returns `(header_len, terminator_len)`. Both `\n\n` and `\n\r\n` count.
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match buf.get(i + 1) {
                Some(b'\n') => return Some((i, 2)),
                Some(b'\r') if buf.get(i + 2) == Some(&b'\n') => return Some((i, 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Stateful ESL frame decoder.
///
/// Frames come out in arrival order. Header values are not percent-decoded
/// here; event parsing does that on the event body.
#[derive(Debug, Default)]
pub struct FrameCodec {
    pending: Option<(Headers, usize)>,
}

impl FrameCodec {
    /// Fresh decoder waiting for a header block.
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_headers(&mut self, src: &mut BytesMut) -> EslResult<Option<Frame>> {
        let skip = src
            .iter()
            .take_while(|b| **b == b'\r' || **b == b'\n')
            .count();
        src.advance(skip);

        let Some((header_len, terminator_len)) = find_header_end(src) else {
            if src.len() > MAX_HEADER_BLOCK {
                return Err(EslError::protocol_error(format!(
                    "header block exceeds {} bytes without a blank line",
                    MAX_HEADER_BLOCK
                )));
            }
            return Ok(None);
        };

        let block = src.split_to(header_len);
        src.advance(terminator_len);
        let block = std::str::from_utf8(&block)
            .map_err(|_| EslError::protocol_error("Invalid UTF-8 in headers"))?;
        let headers = parse_header_block(block)?;

        let length = match headers.get(HEADER_CONTENT_LENGTH) {
            None => 0,
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| EslError::InvalidHeader {
                    header: format!("{}: {}", HEADER_CONTENT_LENGTH, raw),
                })?,
        };
        if length > MAX_MESSAGE_SIZE {
            return Err(EslError::protocol_error(format!(
                "Message too large: Content-Length {} exceeds limit {}",
                length, MAX_MESSAGE_SIZE
            )));
        }

        if length == 0 {
            return Ok(Some(Frame::new(headers)));
        }
        self.pending = Some((headers, length));
        Ok(None)
    }

    fn decode_body(&mut self, src: &mut BytesMut) -> EslResult<Option<Frame>> {
        let Some(length) = self
            .pending
            .as_ref()
            .map(|(_, len)| *len)
        else {
            return Ok(None);
        };
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }
        let body = src.split_to(length);
        let body = String::from_utf8(body.to_vec())
            .map_err(|_| EslError::protocol_error("Invalid UTF-8 in body"))?;
        Ok(self
            .pending
            .take()
            .map(|(headers, _)| Frame::with_body(headers, body)))
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = EslError;

    fn decode(&mut self, src: &mut BytesMut) -> EslResult<Option<Frame>> {
        if self
            .pending
            .is_none()
        {
            if let Some(frame) = self.decode_headers(src)? {
                return Ok(Some(frame));
            }
        }
        if self
            .pending
            .is_some()
        {
            return self.decode_body(src);
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> EslResult<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if self
            .pending
            .is_some()
            || src
                .iter()
                .any(|b| *b != b'\r' && *b != b'\n')
        {
            return Err(EslError::protocol_error(
                "connection closed in the middle of a frame",
            ));
        }
        Ok(None)
    }
}
