//! Protocol constants and configuration values

/// Default FreeSWITCH ESL port for dialed connections
pub const DEFAULT_ESL_PORT: u16 = 8021;

/// Maximum single message body size (8MB) - validates Content-Length header
/// No legitimate ESL message should exceed this (largest is sofia status ~1-2MB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Maximum size of a header block before the blank line is seen (1MB).
/// Channel data replies carry a few hundred headers, well under this.
pub const MAX_HEADER_BLOCK: usize = 1024 * 1024;

/// Longest `execute-app-arg` kept in a header; longer arguments move to the body.
pub const EXECUTE_ARG_HEADER_LIMIT: usize = 2048;

/// Line separator used when encoding outbound messages
pub const CRLF: &str = "\r\n";

/// Blank line that ends an outbound message without a body
pub const END_OF_MESSAGE: &str = "\r\n\r\n";

/// Content-Type header values
pub const CONTENT_TYPE_AUTH_REQUEST: &str = "auth/request";
pub const CONTENT_TYPE_COMMAND_REPLY: &str = "command/reply";
pub const CONTENT_TYPE_API_RESPONSE: &str = "api/response";
pub const CONTENT_TYPE_TEXT_EVENT_PLAIN: &str = "text/event-plain";
pub const CONTENT_TYPE_TEXT_EVENT_JSON: &str = "text/event-json";
pub const CONTENT_TYPE_TEXT_EVENT_XML: &str = "text/event-xml";
pub const CONTENT_TYPE_LOG_DATA: &str = "log/data";
pub const CONTENT_TYPE_DISCONNECT_NOTICE: &str = "text/disconnect-notice";
pub const CONTENT_TYPE_TEXT_PLAIN: &str = "text/plain";

/// Protocol framing header: body content type.
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
/// Protocol framing header: body length.
pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";
/// Protocol framing header: command reply status.
pub const HEADER_REPLY_TEXT: &str = "Reply-Text";
/// Disconnect notice disposition (`linger` or `disconnect`).
pub const HEADER_CONTENT_DISPOSITION: &str = "Content-Disposition";

/// Default TCP connect timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Default timeout for each handshake read in milliseconds
pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 5000;

/// Default command reply timeout in milliseconds
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;

/// Default bound on the `exit` command sent by `exit_and_close`
pub const DEFAULT_EXIT_TIMEOUT_MS: u64 = 5000;

/// Maximum number of queued events per listener before dropping
pub const MAX_EVENT_QUEUE_SIZE: usize = 1000;
