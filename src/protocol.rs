//! Classification of inbound frames.

use crate::{
    constants::{
        CONTENT_TYPE_API_RESPONSE, CONTENT_TYPE_AUTH_REQUEST, CONTENT_TYPE_COMMAND_REPLY,
        CONTENT_TYPE_DISCONNECT_NOTICE, CONTENT_TYPE_LOG_DATA, CONTENT_TYPE_TEXT_EVENT_JSON,
        CONTENT_TYPE_TEXT_EVENT_PLAIN, CONTENT_TYPE_TEXT_EVENT_XML, HEADER_CONTENT_DISPOSITION,
    },
    frame::Frame,
};

/// ESL message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    /// Authentication request from server
    AuthRequest,
    /// Command reply
    CommandReply,
    /// API response
    ApiResponse,
    /// Event message (any event format, or `log/data`)
    Event,
    /// Disconnect notice
    Disconnect,
    /// Unrecognized or absent Content-Type (empty when absent); routed like a reply
    Unknown(String),
}

impl MessageType {
    /// Parse message type from Content-Type header
    pub fn from_content_type(content_type: &str) -> Self {
        match content_type {
            CONTENT_TYPE_AUTH_REQUEST => MessageType::AuthRequest,
            CONTENT_TYPE_COMMAND_REPLY => MessageType::CommandReply,
            CONTENT_TYPE_API_RESPONSE => MessageType::ApiResponse,
            CONTENT_TYPE_TEXT_EVENT_PLAIN
            | CONTENT_TYPE_TEXT_EVENT_JSON
            | CONTENT_TYPE_TEXT_EVENT_XML
            | CONTENT_TYPE_LOG_DATA => MessageType::Event,
            CONTENT_TYPE_DISCONNECT_NOTICE => MessageType::Disconnect,
            _ => MessageType::Unknown(content_type.to_string()),
        }
    }

    /// Classify a decoded frame.
    ///
    /// A frame without a Content-Type carries no event marker, so it answers
    /// the oldest pending command like any other reply.
    pub fn classify(frame: &Frame) -> Self {
        match frame.content_type() {
            Some(content_type) => Self::from_content_type(content_type),
            None => MessageType::Unknown(String::new()),
        }
    }
}

/// Whether a disconnect notice asks the client to stay connected.
///
/// With `linger` the switch keeps sending the call's final events after
/// hangup, so the notice is informational.
pub fn is_linger_notice(frame: &Frame) -> bool {
    frame
        .header(HEADER_CONTENT_DISPOSITION)
        .map(|d| d.eq_ignore_ascii_case("linger"))
        .unwrap_or(false)
}
