//! Typed header names: the ones events carry and the ones `sendmsg` writes.

define_header_enum! {
    error_type: ParseEventHeaderError, "event header",
    /// Header names found on parsed events.
    ///
    /// These are the headers of the event itself, not protocol framing headers
    /// like `Content-Type`. Use with [`EslEvent::header()`](crate::EslEvent::header).
    pub enum EventHeader {
        EventName => "Event-Name",
        EventSubclass => "Event-Subclass",
        UniqueId => "Unique-ID",
        ApplicationUuid => "Application-UUID",
        Application => "Application",
        ApplicationData => "Application-Data",
        ApplicationResponse => "Application-Response",
        JobUuid => "Job-UUID",
        JobCommand => "Job-Command",
        ChannelName => "Channel-Name",
        ChannelState => "Channel-State",
        ChannelCallState => "Channel-Call-State",
        AnswerState => "Answer-State",
        CallDirection => "Call-Direction",
        HangupCause => "Hangup-Cause",
        CallerCallerIdName => "Caller-Caller-ID-Name",
        CallerCallerIdNumber => "Caller-Caller-ID-Number",
        CallerDestinationNumber => "Caller-Destination-Number",
        CoreUuid => "Core-UUID",
        DtmfDigit => "DTMF-Digit",
        DtmfDuration => "DTMF-Duration",
        LogLevel => "Log-Level",
        ControlledSessionUuid => "Controlled-Session-UUID",
    }
}

define_header_enum! {
    error_type: ParseSendMsgHeaderError, "sendmsg header",
    /// Header names written into `sendmsg` commands.
    pub enum SendMsgHeader {
        CallCommand => "call-command",
        ExecuteAppName => "execute-app-name",
        ExecuteAppArg => "execute-app-arg",
        Loops => "loops",
        EventUuid => "Event-UUID",
        HangupCause => "hangup-cause",
        NoMediaUuid => "nomedia-uuid",
        Application => "application",
        LocalIp => "local-ip",
        LocalPort => "local-port",
        RemoteIp => "remote-ip",
        RemotePort => "remote-port",
        Transport => "transport",
        Flags => "flags",
    }
}

/// Event headers whose value can tie an event to a listener scope.
///
/// A listener scoped to an id receives events where any of these equals it.
pub const SCOPE_HEADERS: [EventHeader; 3] = [
    EventHeader::UniqueId,
    EventHeader::ApplicationUuid,
    EventHeader::JobUuid,
];
